//! Word pattern resolution and trailing-base extraction
//!
//! Every place that needs to know "what word is the cursor on" goes through
//! [`WordPatternMatcher`]: the scheduler's trigger check, the cache's
//! staleness check and the compatibility test between two contexts.

use crate::error::{AutocompleteError, AutocompleteResult};
use crate::types::{Context, SourceDescriptor, WordPatternOverride};
use regex::Regex;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Scope key for the universal default pattern
pub const DEFAULT_SCOPE: &str = "*";

const DEFAULT_PATTERN: &str =
    r##"(-?\d*\.\d\w*)|([^`~!@#$%^&*()\-=+\[{\]}\\|;:'",.<>/?\s]+)"##;
const CSS_PATTERN: &str = r##"(-?\d*\.\d[\w\-]*)|([^`~!@#$%^&*()=+\[{\]}\\|;:'",.<>/?\s]+)"##;
const PHP_PATTERN: &str = r##"(-?\d*\.\d\w*)|([^\-`~!@#%^&*()=+\[{\]}\\|;:'",.<>/?\s]+)"##;
const VIM_PATTERN: &str = r##"(-?\d*\.\d\w*)|([^\-`~!@%^&*()=+\[{\]}\\|;'",.<>/?\s]+)"##;

/// Result of applying a word pattern at the cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseExtraction {
    pub base: String,
    pub start_column: usize,
    /// Character length of the typed text with the base removed
    pub match_end: usize,
    pub pattern: String,
}

/// Outcome of the full trigger check for one source
#[derive(Debug, Clone, PartialEq)]
pub struct PatternCheck {
    /// Copy of the checked context with base, start column and match end filled in
    pub context: Context,
    /// Whether a trigger pattern or the minimum-length policy fired
    pub fired: bool,
}

/// Resolves per-scope word patterns and applies them to contexts
pub struct WordPatternMatcher {
    patterns: HashMap<String, String>,
    compiled: RwLock<HashMap<String, Regex>>,
}

impl WordPatternMatcher {
    /// Create a matcher with the built-in scope table
    pub fn new() -> Self {
        let mut patterns = HashMap::new();
        patterns.insert(DEFAULT_SCOPE.to_string(), DEFAULT_PATTERN.to_string());
        patterns.insert("css".to_string(), CSS_PATTERN.to_string());
        patterns.insert("scss".to_string(), CSS_PATTERN.to_string());
        patterns.insert("php".to_string(), PHP_PATTERN.to_string());
        patterns.insert("vim".to_string(), VIM_PATTERN.to_string());

        Self {
            patterns,
            compiled: RwLock::new(HashMap::new()),
        }
    }

    /// Create a matcher with the built-in table overlaid by `overrides`
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut matcher = Self::new();
        for (scope, pattern) in overrides {
            matcher.set_pattern(scope, pattern);
        }
        matcher
    }

    pub fn set_pattern(&mut self, scope: &str, pattern: &str) {
        self.patterns
            .insert(scope.to_lowercase(), pattern.to_string());
    }

    /// Word pattern for a context: source override, then scope table, then default
    pub fn resolve(&self, ctx: &Context, source: &SourceDescriptor) -> String {
        let scope = ctx.scope.to_lowercase();

        let from_source = match &source.word_pattern {
            Some(WordPatternOverride::Single(pattern)) => Some(pattern.clone()),
            Some(WordPatternOverride::PerScope(by_scope)) => by_scope
                .get(&scope)
                .or_else(|| by_scope.get(DEFAULT_SCOPE))
                .cloned(),
            None => None,
        };

        from_source.unwrap_or_else(|| {
            self.patterns
                .get(&scope)
                .or_else(|| self.patterns.get(DEFAULT_SCOPE))
                .cloned()
                .unwrap_or_else(|| DEFAULT_PATTERN.to_string())
        })
    }

    fn compiled(&self, expr: &str) -> AutocompleteResult<Regex> {
        {
            let cache = self.compiled.read().map_err(|_| {
                AutocompleteError::Internal("Failed to acquire read lock on pattern cache".to_string())
            })?;
            if let Some(re) = cache.get(expr) {
                return Ok(re.clone());
            }
        }

        let re = Regex::new(expr)?;
        let mut cache = self.compiled.write().map_err(|_| {
            AutocompleteError::Internal("Failed to acquire write lock on pattern cache".to_string())
        })?;
        cache.insert(expr.to_string(), re.clone());
        Ok(re)
    }

    /// Find the longest match of the word pattern ending at the cursor
    pub fn extract_base(
        &self,
        ctx: &Context,
        source: &SourceDescriptor,
    ) -> AutocompleteResult<BaseExtraction> {
        let pattern = self.resolve(ctx, source);
        let re = self.compiled(&format!("(?:{})$", pattern))?;

        let extraction = match re.find(&ctx.typed) {
            Some(m) => {
                let base = m.as_str().to_string();
                BaseExtraction {
                    start_column: ctx.column.saturating_sub(base.chars().count()),
                    match_end: ctx.typed[..m.start()].chars().count(),
                    base,
                    pattern,
                }
            }
            None => BaseExtraction {
                base: String::new(),
                start_column: ctx.column,
                match_end: ctx.typed.chars().count(),
                pattern,
            },
        };
        Ok(extraction)
    }

    /// Run the full trigger check for a source.
    ///
    /// Source trigger patterns are matched greedily against the typed text
    /// and only count when the match ends inside the trailing word. Without
    /// a firing pattern the base must reach `min_length`.
    pub fn check(
        &self,
        ctx: &Context,
        source: &SourceDescriptor,
        min_length: Option<i64>,
    ) -> AutocompleteResult<PatternCheck> {
        let extraction = self.extract_base(ctx, source)?;
        let word_len = extraction.base.chars().count();
        let typed_len = ctx.typed.chars().count();

        let mut context = Context {
            base: extraction.base,
            start_column: extraction.start_column,
            match_end: extraction.match_end,
            word_pattern: Some(extraction.pattern),
            ..ctx.clone()
        };

        for pattern in &source.complete_pattern {
            let expr = if pattern.starts_with('^') {
                pattern.clone()
            } else {
                format!(".*(?:{})", pattern)
            };
            let re = self.compiled(&expr)?;

            if let Some(m) = re.find(&ctx.typed) {
                let end = ctx.typed[..m.end()].chars().count();
                if end + word_len >= typed_len {
                    debug!(source = %source.name, pattern = %pattern, "trigger pattern fired");
                    context.match_end = end;
                    return Ok(PatternCheck {
                        context,
                        fired: true,
                    });
                }
            }
        }

        let fired = match min_length {
            Some(len) if len >= 0 => word_len as i64 >= len,
            _ => false,
        };
        Ok(PatternCheck { context, fired })
    }

    /// Whether a result computed for `earlier` still answers `later`.
    ///
    /// Both contexts are re-checked; they are compatible when they share a
    /// start column and the earlier base is a prefix of the later one.
    pub fn is_compatible(
        &self,
        source: &SourceDescriptor,
        earlier: &Context,
        later: &Context,
        min_length: Option<i64>,
    ) -> AutocompleteResult<bool> {
        let a = self.check(earlier, source, min_length)?.context;
        let b = self.check(later, source, min_length)?.context;
        Ok(a.start_column == b.start_column && b.base.starts_with(&a.base))
    }
}

impl Default for WordPatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceDescriptor {
        SourceDescriptor::new("buf", 5)
    }

    #[test]
    fn test_builtin_patterns_compile() {
        for pattern in [DEFAULT_PATTERN, CSS_PATTERN, PHP_PATTERN, VIM_PATTERN] {
            assert!(Regex::new(pattern).is_ok(), "{}", pattern);
        }
    }

    #[test]
    fn test_extract_base_trailing_word() {
        let matcher = WordPatternMatcher::new();
        let ctx = Context::new(1, "let foo = ba", "rust");
        let ext = matcher.extract_base(&ctx, &source()).unwrap();
        assert_eq!(ext.base, "ba");
        assert_eq!(ext.start_column, 11);
        assert_eq!(ext.match_end, 10);
    }

    #[test]
    fn test_extract_base_empty_after_punctuation() {
        let matcher = WordPatternMatcher::new();
        let ctx = Context::new(1, "foo.", "rust");
        let ext = matcher.extract_base(&ctx, &source()).unwrap();
        assert_eq!(ext.base, "");
        assert_eq!(ext.start_column, ctx.column);
    }

    #[test]
    fn test_css_words_include_hyphen() {
        let matcher = WordPatternMatcher::new();
        let ctx = Context::new(1, "  border-top", "css");
        assert_eq!(matcher.extract_base(&ctx, &source()).unwrap().base, "border-top");

        let ctx = Context::new(1, "  border-top", "rust");
        assert_eq!(matcher.extract_base(&ctx, &source()).unwrap().base, "top");
    }

    #[test]
    fn test_source_override_by_scope() {
        let matcher = WordPatternMatcher::new();
        let mut src = source();
        let mut by_scope = HashMap::new();
        by_scope.insert("*".to_string(), r"\d+".to_string());
        src.word_pattern = Some(WordPatternOverride::PerScope(by_scope));

        let ctx = Context::new(1, "abc123", "python");
        assert_eq!(matcher.extract_base(&ctx, &src).unwrap().base, "123");
    }

    #[test]
    fn test_config_override_beats_builtin() {
        let mut overrides = HashMap::new();
        overrides.insert("rust".to_string(), r"[a-z]+".to_string());
        let matcher = WordPatternMatcher::with_overrides(&overrides);
        let ctx = Context::new(1, "fooBar", "rust");
        assert_eq!(matcher.extract_base(&ctx, &source()).unwrap().base, "ar");
    }

    #[test]
    fn test_trigger_pattern_contiguous_with_cursor() {
        let matcher = WordPatternMatcher::new();
        let mut src = source();
        src.complete_pattern = vec![r"\.".to_string()];

        let check = matcher
            .check(&Context::new(1, "self.fo", "rust"), &src, Some(10))
            .unwrap();
        assert!(check.fired);
        assert_eq!(check.context.base, "fo");
        assert_eq!(check.context.match_end, 5);

        // the dot is not adjacent to the word being typed
        let check = matcher
            .check(&Context::new(1, "a.b foo", "rust"), &src, Some(10))
            .unwrap();
        assert!(!check.fired);
    }

    #[test]
    fn test_min_length_policy() {
        let matcher = WordPatternMatcher::new();
        let ctx = Context::new(1, "x = abc", "rust");
        assert!(matcher.check(&ctx, &source(), Some(3)).unwrap().fired);
        assert!(!matcher.check(&ctx, &source(), Some(4)).unwrap().fired);
        assert!(!matcher.check(&ctx, &source(), Some(-1)).unwrap().fired);
        assert!(!matcher.check(&ctx, &source(), None).unwrap().fired);
    }

    #[test]
    fn test_compatibility_prefix_rule() {
        let matcher = WordPatternMatcher::new();
        let earlier = Context::new(1, "x fo", "rust");
        let later = Context::new(1, "x foo", "rust");
        assert!(matcher.is_compatible(&source(), &earlier, &later, Some(1)).unwrap());
        assert!(!matcher.is_compatible(&source(), &later, &earlier, Some(1)).unwrap());

        let moved = Context::new(1, "x foo b", "rust");
        assert!(!matcher.is_compatible(&source(), &earlier, &moved, Some(1)).unwrap());
    }

    #[test]
    fn test_invalid_source_pattern_is_error() {
        let matcher = WordPatternMatcher::new();
        let mut src = source();
        src.complete_pattern = vec!["(".to_string()];
        let result = matcher.check(&Context::new(1, "abc", "rust"), &src, Some(1));
        assert!(matches!(result, Err(AutocompleteError::InvalidPattern(_))));
    }
}
