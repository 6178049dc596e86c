//! Matcher, sorter and filter capabilities
//!
//! Sources and the host refer to these by identifier (`"prefix"`,
//! `"fuzzy"`, ...). [`CapabilityRegistry`] maps identifiers to factories
//! that build an implementation from its options; an identifier with no
//! factory is a configuration error.

use crate::error::{AutocompleteError, AutocompleteResult};
use crate::types::{Candidate, Context, PluginOptions, SourceDescriptor};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Decides whether a candidate matches the typed base
pub trait Matcher: Send + Sync {
    fn matches(&self, base: &str, candidate: &Candidate) -> AutocompleteResult<bool>;
}

/// Reorders a candidate list
pub trait Sorter: Send + Sync {
    fn sort(&self, candidates: Vec<Candidate>) -> AutocompleteResult<Vec<Candidate>>;
}

/// What a filter gets to look at besides the candidates
pub struct FilterInput<'a> {
    /// Live context of the current event
    pub live: &'a Context,
    pub source: &'a SourceDescriptor,
    /// Context the source answered
    pub source_context: &'a Context,
    pub start_column: usize,
}

/// Removes candidates from a list
pub trait Filter: Send + Sync {
    fn filter(
        &self,
        input: &FilterInput<'_>,
        candidates: Vec<Candidate>,
    ) -> AutocompleteResult<Vec<Candidate>>;
}

pub type MatcherFactory =
    Arc<dyn Fn(&PluginOptions) -> AutocompleteResult<Box<dyn Matcher>> + Send + Sync>;
pub type SorterFactory =
    Arc<dyn Fn(&PluginOptions) -> AutocompleteResult<Box<dyn Sorter>> + Send + Sync>;
pub type FilterFactory =
    Arc<dyn Fn(&PluginOptions) -> AutocompleteResult<Box<dyn Filter>> + Send + Sync>;

/// How matchers treat letter case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Respect,
    Ignore,
    /// Ignore case unless the base contains an uppercase letter
    Smart,
}

impl CaseMode {
    pub fn from_options(opts: &PluginOptions) -> Self {
        if opts.flag("smart_case") {
            CaseMode::Smart
        } else if opts.flag("ignore_case") {
            CaseMode::Ignore
        } else {
            CaseMode::Respect
        }
    }

    fn folds(&self, base: &str) -> bool {
        match self {
            CaseMode::Respect => false,
            CaseMode::Ignore => true,
            CaseMode::Smart => !base.chars().any(char::is_uppercase),
        }
    }

    fn compare<F>(&self, base: &str, word: &str, test: F) -> bool
    where
        F: Fn(&str, &str) -> bool,
    {
        if self.folds(base) {
            test(&word.to_lowercase(), &base.to_lowercase())
        } else {
            test(word, base)
        }
    }
}

/// Candidate word starts with the base
pub struct PrefixMatcher {
    case: CaseMode,
}

impl Matcher for PrefixMatcher {
    fn matches(&self, base: &str, candidate: &Candidate) -> AutocompleteResult<bool> {
        Ok(self
            .case
            .compare(base, &candidate.word, |word, base| word.starts_with(base)))
    }
}

/// Candidate word contains the base
pub struct SubstrMatcher {
    case: CaseMode,
}

impl Matcher for SubstrMatcher {
    fn matches(&self, base: &str, candidate: &Candidate) -> AutocompleteResult<bool> {
        Ok(self
            .case
            .compare(base, &candidate.word, |word, base| word.contains(base)))
    }
}

/// Candidate word equals the base
pub struct EqualMatcher {
    case: CaseMode,
}

impl Matcher for EqualMatcher {
    fn matches(&self, base: &str, candidate: &Candidate) -> AutocompleteResult<bool> {
        Ok(self.case.compare(base, &candidate.word, |word, base| word == base))
    }
}

/// Fuzzy subsequence match on the abbreviation using nucleo
pub struct FuzzyMatcher {
    case: CaseMode,
}

impl Matcher for FuzzyMatcher {
    fn matches(&self, base: &str, candidate: &Candidate) -> AutocompleteResult<bool> {
        use nucleo::pattern::{AtomKind, CaseMatching, Normalization, Pattern};
        use nucleo::{Config, Matcher as NucleoMatcher, Utf32Str};

        if base.is_empty() {
            return Ok(true);
        }

        let case_matching = match self.case {
            CaseMode::Respect => CaseMatching::Respect,
            CaseMode::Ignore => CaseMatching::Ignore,
            CaseMode::Smart => CaseMatching::Smart,
        };

        let mut matcher = NucleoMatcher::new(Config::DEFAULT);
        let pattern = Pattern::new(base, case_matching, Normalization::Smart, AtomKind::Fuzzy);
        let mut buf = Vec::new();
        let haystack = Utf32Str::new(&candidate.abbr, &mut buf);

        Ok(pattern.score(haystack, &mut matcher).is_some())
    }
}

/// Keeps the source's order
pub struct NoneSorter;

impl Sorter for NoneSorter {
    fn sort(&self, candidates: Vec<Candidate>) -> AutocompleteResult<Vec<Candidate>> {
        Ok(candidates)
    }
}

/// Case-insensitive alphabetical order on the word
pub struct AlphanumSorter;

impl Sorter for AlphanumSorter {
    fn sort(&self, mut candidates: Vec<Candidate>) -> AutocompleteResult<Vec<Candidate>> {
        candidates.sort_by_cached_key(|c| (c.word.to_lowercase(), c.word.clone()));
        Ok(candidates)
    }
}

/// Shorter words first, stable otherwise
pub struct WordLengthSorter;

impl Sorter for WordLengthSorter {
    fn sort(&self, mut candidates: Vec<Candidate>) -> AutocompleteResult<Vec<Candidate>> {
        candidates.sort_by_key(|c| c.word.chars().count());
        Ok(candidates)
    }
}

pub struct NoneFilter;

impl Filter for NoneFilter {
    fn filter(
        &self,
        _input: &FilterInput<'_>,
        candidates: Vec<Candidate>,
    ) -> AutocompleteResult<Vec<Candidate>> {
        Ok(candidates)
    }
}

/// Drops later candidates whose word was already seen
pub struct DedupFilter;

impl Filter for DedupFilter {
    fn filter(
        &self,
        _input: &FilterInput<'_>,
        mut candidates: Vec<Candidate>,
    ) -> AutocompleteResult<Vec<Candidate>> {
        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.word.clone()));
        Ok(candidates)
    }
}

/// Drops candidates identical to what is already typed
pub struct SameWordFilter;

impl Filter for SameWordFilter {
    fn filter(
        &self,
        input: &FilterInput<'_>,
        mut candidates: Vec<Candidate>,
    ) -> AutocompleteResult<Vec<Candidate>> {
        candidates.retain(|c| {
            let typed = input.live.typed_from(c.start_column_or(input.start_column));
            c.word != typed
        });
        Ok(candidates)
    }
}

/// Keep the candidates whose own base, the live text typed from their start
/// column, satisfies `matcher`
pub fn retain_matching(
    matcher: &dyn Matcher,
    live: &Context,
    start_column: usize,
    candidates: Vec<Candidate>,
) -> AutocompleteResult<Vec<Candidate>> {
    let mut kept = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let base = live.typed_from(candidate.start_column_or(start_column));
        if matcher.matches(&base, &candidate)? {
            kept.push(candidate);
        }
    }
    Ok(kept)
}

/// Identifier-to-implementation lookup for matchers, sorters and filters
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    matchers: HashMap<String, MatcherFactory>,
    sorters: HashMap<String, SorterFactory>,
    filters: HashMap<String, FilterFactory>,
}

impl CapabilityRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in matchers, sorters and filters
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    pub fn register_builtins(&mut self) {
        self.register_matcher("prefix", |opts| {
            Ok(Box::new(PrefixMatcher {
                case: CaseMode::from_options(opts),
            }))
        });
        self.register_matcher("substr", |opts| {
            Ok(Box::new(SubstrMatcher {
                case: CaseMode::from_options(opts),
            }))
        });
        self.register_matcher("equal", |opts| {
            Ok(Box::new(EqualMatcher {
                case: CaseMode::from_options(opts),
            }))
        });
        self.register_matcher("fuzzy", |opts| {
            Ok(Box::new(FuzzyMatcher {
                case: CaseMode::from_options(opts),
            }))
        });

        self.register_sorter("none", |_| Ok(Box::new(NoneSorter)));
        self.register_sorter("alphanum", |_| Ok(Box::new(AlphanumSorter)));
        self.register_sorter("word_length", |_| Ok(Box::new(WordLengthSorter)));

        self.register_filter("none", |_| Ok(Box::new(NoneFilter)));
        self.register_filter("dedup", |_| Ok(Box::new(DedupFilter)));
        self.register_filter("same_word", |_| Ok(Box::new(SameWordFilter)));
    }

    /// Register a matcher factory, replacing any previous one with that name
    pub fn register_matcher<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PluginOptions) -> AutocompleteResult<Box<dyn Matcher>> + Send + Sync + 'static,
    {
        self.matchers.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_sorter<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PluginOptions) -> AutocompleteResult<Box<dyn Sorter>> + Send + Sync + 'static,
    {
        self.sorters.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_filter<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&PluginOptions) -> AutocompleteResult<Box<dyn Filter>> + Send + Sync + 'static,
    {
        self.filters.insert(name.to_string(), Arc::new(factory));
    }

    pub fn matcher(&self, opts: &PluginOptions) -> AutocompleteResult<Box<dyn Matcher>> {
        let name = opts.require_name()?;
        let factory = self
            .matchers
            .get(name)
            .ok_or_else(|| AutocompleteError::Configuration(format!("unknown matcher: {}", name)))?;
        factory(opts)
    }

    pub fn sorter(&self, opts: &PluginOptions) -> AutocompleteResult<Box<dyn Sorter>> {
        let name = opts.require_name()?;
        let factory = self
            .sorters
            .get(name)
            .ok_or_else(|| AutocompleteError::Configuration(format!("unknown sorter: {}", name)))?;
        factory(opts)
    }

    pub fn filter(&self, opts: &PluginOptions) -> AutocompleteResult<Box<dyn Filter>> {
        let name = opts.require_name()?;
        let factory = self
            .filters
            .get(name)
            .ok_or_else(|| AutocompleteError::Configuration(format!("unknown filter: {}", name)))?;
        factory(opts)
    }

    /// Build a filter chain, applied in order
    pub fn filter_chain(&self, opts: &[PluginOptions]) -> AutocompleteResult<Vec<Box<dyn Filter>>> {
        opts.iter().map(|opt| self.filter(opt)).collect()
    }
}
