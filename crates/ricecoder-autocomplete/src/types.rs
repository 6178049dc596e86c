//! Core data types shared by the scheduling, caching and popup layers
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{AutocompleteError, AutocompleteResult};

/// Value of the `origin` metadata key on every candidate this system emits.
///
/// A completion-accepted payload without it did not come from our popup.
pub const ORIGIN: &str = "ricecoder-autocomplete";

/// Which host event produced a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEvent {
    #[default]
    Complete,
    Warmup,
    Completed,
}

/// A point-in-time description of the cursor and the text before it.
///
/// Line and column numbers are 1-based; columns count characters. Contexts
/// are never mutated in place once handed out: every transformation returns
/// a fresh copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    /// Line number, local to the scope region for nested contexts
    pub line: usize,
    /// Cursor column
    pub column: usize,
    pub scope: String,
    /// Text on the line before the cursor
    pub typed: String,
    /// Trailing word before the cursor
    pub base: String,
    /// Column where `base` starts
    pub start_column: usize,
    /// Character offset in `typed` where the trigger match ends
    pub match_end: usize,
    /// Nesting level, 1 for the root context
    pub scope_level: usize,
    /// Byte offset of the scope region in the newline-joined buffer
    pub scope_offset: usize,
    /// Byte length of the scope region, the whole buffer when unset
    pub scope_len: Option<usize>,
    /// Buffer line where the scope region starts
    pub scope_line: usize,
    /// Column where the scope region starts on its first line
    pub scope_column: usize,
    /// Buffer revision tick
    pub tick: u64,
    /// Epoch id distinguishing evaluations within one revision
    pub context_id: u64,
    pub manual: bool,
    pub early_cache: bool,
    /// Set by the host when the context was computed against older text
    pub dated: bool,
    pub event: ContextEvent,
    pub timestamp: Option<DateTime<Utc>>,
    /// Name of the source this context was prepared for
    pub source: Option<String>,
    pub matcher: Option<PluginOptions>,
    pub word_pattern: Option<String>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            line: 1,
            column: 1,
            scope: String::new(),
            typed: String::new(),
            base: String::new(),
            start_column: 0,
            match_end: 0,
            scope_level: 1,
            scope_offset: 0,
            scope_len: None,
            scope_line: 1,
            scope_column: 1,
            tick: 0,
            context_id: 0,
            manual: false,
            early_cache: false,
            dated: false,
            event: ContextEvent::Complete,
            timestamp: None,
            source: None,
            matcher: None,
            word_pattern: None,
        }
    }
}

impl Context {
    /// Create a root context with the cursor right after `typed`
    pub fn new(line: usize, typed: impl Into<String>, scope: impl Into<String>) -> Self {
        let typed = typed.into();
        Self {
            line,
            column: typed.chars().count() + 1,
            scope: scope.into(),
            typed,
            ..Self::default()
        }
    }

    pub fn with_tick(mut self, tick: u64) -> Self {
        self.tick = tick;
        self
    }

    pub fn with_context_id(mut self, context_id: u64) -> Self {
        self.context_id = context_id;
        self
    }

    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub fn with_dated(mut self, dated: bool) -> Self {
        self.dated = dated;
        self
    }

    pub fn with_event(mut self, event: ContextEvent) -> Self {
        self.event = event;
        self
    }

    pub fn with_early_cache(mut self, early_cache: bool) -> Self {
        self.early_cache = early_cache;
        self
    }

    /// Copy of this context prepared for one source
    pub fn for_source(&self, name: &str, matcher: PluginOptions) -> Self {
        Self {
            source: Some(name.to_string()),
            matcher: Some(matcher),
            early_cache: false,
            ..self.clone()
        }
    }

    pub fn stamped(mut self, now: DateTime<Utc>) -> Self {
        self.timestamp = Some(now);
        self
    }

    pub fn is_root(&self) -> bool {
        self.scope_level == 1
    }

    /// Typed text from `column` up to the cursor
    pub fn typed_from(&self, column: usize) -> String {
        self.typed
            .chars()
            .skip(column.saturating_sub(1))
            .collect()
    }

    /// Typed text between two columns
    pub fn typed_between(&self, from: usize, to: usize) -> String {
        self.typed
            .chars()
            .skip(from.saturating_sub(1))
            .take(to.saturating_sub(from))
            .collect()
    }
}

/// Minimum base-word length before a source fires without a trigger pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MinLengthPolicy {
    Flat(i64),
    /// `(priority threshold, minimum length)` pairs
    Tiered(Vec<(i64, i64)>),
}

impl MinLengthPolicy {
    /// Minimum length for a source of the given priority.
    ///
    /// For a tiered table the entry with the highest threshold not exceeding
    /// `priority` wins. `None` means no entry applies.
    pub fn resolve(&self, priority: i64) -> Option<i64> {
        match self {
            MinLengthPolicy::Flat(len) => Some(*len),
            MinLengthPolicy::Tiered(table) => table
                .iter()
                .filter(|(threshold, _)| *threshold <= priority)
                .max_by_key(|(threshold, _)| *threshold)
                .map(|(_, len)| *len),
        }
    }
}

impl Default for MinLengthPolicy {
    fn default() -> Self {
        MinLengthPolicy::Tiered(vec![(1, 4), (7, 3)])
    }
}

/// Word pattern override on a source, optionally keyed by scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WordPatternOverride {
    Single(String),
    PerScope(HashMap<String, String>),
}

/// Options for a matcher, sorter or filter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PluginOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

impl PluginOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Overlay `other` on top of these options; keys present in `other` win
    pub fn merged(&self, other: &PluginOptions) -> PluginOptions {
        let mut merged = self.clone();
        if other.name.is_some() {
            merged.name = other.name.clone();
        }
        merged
            .params
            .extend(other.params.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    pub fn require_name(&self) -> AutocompleteResult<&str> {
        self.name.as_deref().ok_or_else(|| {
            AutocompleteError::Configuration("plugin options are missing a name".to_string())
        })
    }

    pub fn flag(&self, key: &str) -> bool {
        match self.params.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }
}

/// A plugin given either by bare identifier or by an options object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PluginSpec {
    Name(String),
    Options(PluginOptions),
}

impl PluginSpec {
    pub fn options(&self) -> PluginOptions {
        match self {
            PluginSpec::Name(name) => PluginOptions::named(name.clone()),
            PluginSpec::Options(opts) => opts.clone(),
        }
    }
}

impl From<&str> for PluginSpec {
    fn from(name: &str) -> Self {
        PluginSpec::Name(name.to_string())
    }
}

/// One filter or a chain of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterChain {
    One(PluginSpec),
    Many(Vec<PluginSpec>),
}

impl FilterChain {
    pub fn options(&self) -> Vec<PluginOptions> {
        match self {
            FilterChain::One(spec) => vec![spec.options()],
            FilterChain::Many(specs) => specs.iter().map(PluginSpec::options).collect(),
        }
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Host-supplied description of a completion source, fresh on every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceDescriptor {
    pub name: String,
    /// Higher is preferred
    pub priority: i64,
    pub enable: bool,
    pub ready: bool,
    pub auto_popup: bool,
    pub early_cache: bool,
    pub subscope_enable: bool,
    /// Source wants to hear about accepted completions
    pub on_completed: bool,
    /// Scopes this source serves; `None` (or empty) marks a general source
    pub scope: Option<Vec<String>>,
    #[serde(deserialize_with = "one_or_many")]
    pub complete_pattern: Vec<String>,
    pub complete_length: Option<MinLengthPolicy>,
    pub word_pattern: Option<WordPatternOverride>,
    pub matcher: Option<PluginSpec>,
    pub sorter: Option<PluginSpec>,
    pub filter: Option<FilterChain>,
    pub mark: String,
    pub popup_limit: Option<i64>,
}

impl Default for SourceDescriptor {
    fn default() -> Self {
        Self {
            name: String::new(),
            priority: 5,
            enable: true,
            ready: true,
            auto_popup: true,
            early_cache: false,
            subscope_enable: false,
            on_completed: false,
            scope: None,
            complete_pattern: Vec::new(),
            complete_length: None,
            word_pattern: None,
            matcher: None,
            sorter: None,
            filter: None,
            mark: String::new(),
            popup_limit: None,
        }
    }
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, priority: i64) -> Self {
        Self {
            name: name.into(),
            priority,
            ..Self::default()
        }
    }

    /// Scope restriction, `None` for a general-purpose source
    pub fn scopes(&self) -> Option<&[String]> {
        self.scope.as_deref().filter(|scopes| !scopes.is_empty())
    }
}

/// Per-candidate metadata carried through the popup as an opaque blob
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchMetadata {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub origin: String,
    /// Per-match start column override
    #[serde(rename = "startccol", default, skip_serializing_if = "Option::is_none")]
    pub start_column: Option<usize>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl MatchMetadata {
    pub fn is_ours(&self) -> bool {
        self.origin == ORIGIN
    }
}

/// A match as returned by a source, before normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawMatch {
    Word(String),
    Item {
        word: String,
        #[serde(default)]
        abbr: Option<String>,
        #[serde(default)]
        menu: Option<String>,
        #[serde(default)]
        user_data: Option<serde_json::Map<String, Value>>,
    },
}

/// A normalized completion candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub word: String,
    pub abbr: String,
    pub menu: String,
    pub user_data: MatchMetadata,
}

impl Candidate {
    pub fn new(word: impl Into<String>, source: &str) -> Self {
        let word = word.into();
        Self {
            abbr: word.clone(),
            word,
            menu: String::new(),
            user_data: MatchMetadata {
                source: source.to_string(),
                origin: ORIGIN.to_string(),
                ..MatchMetadata::default()
            },
        }
    }

    pub fn with_start_column(mut self, start_column: usize) -> Self {
        self.user_data.start_column = Some(start_column);
        self
    }

    /// Normalize a raw source match into the canonical shape
    pub fn from_raw(raw: RawMatch, source: &str) -> AutocompleteResult<Self> {
        match raw {
            RawMatch::Word(word) => Ok(Self::new(word, source)),
            RawMatch::Item {
                word,
                abbr,
                menu,
                user_data,
            } => {
                let mut meta: MatchMetadata = match user_data {
                    Some(map) => serde_json::from_value(Value::Object(map)).map_err(|e| {
                        AutocompleteError::Protocol(format!("bad match metadata: {}", e))
                    })?,
                    None => MatchMetadata::default(),
                };
                meta.source = source.to_string();
                meta.origin = ORIGIN.to_string();
                Ok(Self {
                    abbr: abbr.unwrap_or_else(|| word.clone()),
                    word,
                    menu: menu.unwrap_or_default(),
                    user_data: meta,
                })
            }
        }
    }

    /// Start column of this candidate, given its source's start column
    pub fn start_column_or(&self, source_start: usize) -> usize {
        self.user_data.start_column.unwrap_or(source_start)
    }
}

/// The accepted item reported by the host after the user picks a candidate
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletedItem {
    pub word: String,
    pub abbr: String,
    pub menu: String,
    /// The JSON metadata blob that was attached to the candidate
    pub user_data: String,
}

/// Everything the host sends with one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBundle {
    pub context: Context,
    #[serde(default)]
    pub sources: HashMap<String, SourceDescriptor>,
    /// Scopes whose detectors the host has activated
    #[serde(default)]
    pub subscope_detectors: HashSet<String>,
    /// Full buffer
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub matcher: Option<PluginSpec>,
    #[serde(default)]
    pub sorter: Option<PluginSpec>,
    #[serde(default)]
    pub filter: Option<FilterChain>,
    #[serde(default)]
    pub complete_length: Option<MinLengthPolicy>,
    #[serde(default)]
    pub popup_limit: Option<i64>,
    /// Only show results produced by the completion-accepted event at this tick
    #[serde(default)]
    pub skip_tick: Option<u64>,
}

impl EventBundle {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            sources: HashMap::new(),
            subscope_detectors: HashSet::new(),
            lines: Vec::new(),
            matcher: None,
            sorter: None,
            filter: None,
            complete_length: None,
            popup_limit: None,
            skip_tick: None,
        }
    }

    pub fn with_source(mut self, source: SourceDescriptor) -> Self {
        self.sources.insert(source.name.clone(), source);
        self
    }

    pub fn with_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_active_detector(mut self, scope: impl Into<String>) -> Self {
        self.subscope_detectors.insert(scope.into());
        self
    }

    pub fn source(&self, name: &str) -> AutocompleteResult<&SourceDescriptor> {
        self.sources
            .get(name)
            .ok_or_else(|| AutocompleteError::unknown_source(name))
    }

    /// Source names in a stable order
    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn effective_skip_tick(&self) -> Option<u64> {
        self.skip_tick.filter(|tick| *tick != 0)
    }
}
