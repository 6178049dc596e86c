//! Notification scheduling
//!
//! For each (source, context) pair of an event the scheduler decides whether
//! the source must be asked again, or whether its cached answer or an
//! outstanding request already covers what the user is typing.

use crate::cache::MatchCache;
use crate::config::EventSettings;
use crate::types::{Context, SourceDescriptor};
use crate::word_pattern::WordPatternMatcher;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Why a source was not notified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    NotReady,
    ScopeMismatch,
    NotAutoPopup,
    PatternMismatch,
    /// A trigger or word pattern failed to compile
    PatternError,
    /// The cached result still answers the current word
    Cached,
    /// A compatible request is already outstanding
    InFlight,
}

/// Scheduling decision for one (source, context) pair
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Ask the source; the context carries base, start column and the
    /// early-cache flag
    Notify(Context),
    Skip(SkipReason),
}

impl Decision {
    pub fn is_notify(&self) -> bool {
        matches!(self, Decision::Notify(_))
    }
}

/// Whether a source serves a context's scope.
///
/// A source without a scope restriction only serves root contexts. A scoped
/// source serves contexts in its scopes, and nested ones only with
/// `subscope_enable`.
pub fn scope_matches(source: &SourceDescriptor, ctx: &Context) -> bool {
    match source.scopes() {
        None => ctx.is_root(),
        Some(scopes) => {
            scopes.iter().any(|scope| *scope == ctx.scope)
                && (source.subscope_enable || ctx.is_root())
        }
    }
}

/// The one outstanding notification per source
#[derive(Debug, Clone, Default)]
pub struct InFlightNotifications {
    by_source: HashMap<String, Context>,
}

impl InFlightNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a notification, replacing any earlier one for the source
    pub fn record(&mut self, name: &str, ctx: Context) {
        self.by_source.insert(name.to_string(), ctx);
    }

    pub fn get(&self, name: &str) -> Option<&Context> {
        self.by_source.get(name)
    }

    /// Forget a notification the host failed to deliver, if it is still the
    /// one on record
    pub fn remove_if_same(&mut self, name: &str, ctx: &Context) -> bool {
        if self.by_source.get(name) == Some(ctx) {
            self.by_source.remove(name);
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.by_source.clear();
    }

    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

/// Decides which sources need a fresh request
pub struct NotificationScheduler<'a> {
    patterns: &'a WordPatternMatcher,
    settings: &'a EventSettings,
}

impl<'a> NotificationScheduler<'a> {
    pub fn new(patterns: &'a WordPatternMatcher, settings: &'a EventSettings) -> Self {
        Self { patterns, settings }
    }

    /// Decide whether `source` should be asked about `ctx`.
    ///
    /// May toggle the popup flag of the source's cache entry and consumes a
    /// pending refresh request when the decision is to notify.
    pub fn should_notify(
        &self,
        source: &SourceDescriptor,
        ctx: &Context,
        cache: &mut MatchCache,
        in_flight: &InFlightNotifications,
    ) -> Decision {
        let name = source.name.as_str();

        if !source.enable {
            debug!(source = %name, "source is not enabled");
            return Decision::Skip(SkipReason::Disabled);
        }

        if !source.ready {
            debug!(source = %name, "source is not ready");
            return Decision::Skip(SkipReason::NotReady);
        }

        if !scope_matches(source, ctx) {
            debug!(source = %name, scope = %ctx.scope, "scope check ignores source");
            return Decision::Skip(SkipReason::ScopeMismatch);
        }

        let manual = ctx.manual;
        if !source.auto_popup && !manual {
            debug!(source = %name, "source is not auto_popup");
            return Decision::Skip(SkipReason::NotAutoPopup);
        }

        let min_length = self.settings.min_length_for(source);
        let check = match self.patterns.check(ctx, source, min_length) {
            Ok(check) => check,
            Err(e) => {
                warn!(source = %name, "pattern check failed: {}", e);
                return Decision::Skip(SkipReason::PatternError);
            }
        };
        let mut ctx = check.context;

        if !check.fired {
            if source.early_cache && !ctx.base.is_empty() {
                ctx.early_cache = true;
            } else {
                debug!(source = %name, base = %ctx.base, "pattern check failed, source ignored");
                cache.set_enabled(name, false);
                return Decision::Skip(SkipReason::PatternMismatch);
            }
        } else if cache.set_enabled(name, true) {
            debug!(source = %name, "cache enabled");
        }

        let mut need_refresh = false;

        if !manual {
            if let Some(entry) = cache.get(name) {
                need_refresh = entry.refresh;
                if !need_refresh && self.compatible(source, &entry.context, &ctx) {
                    debug!(
                        source = %name,
                        matches = entry.matches.len(),
                        "source was cached"
                    );
                    return Decision::Skip(SkipReason::Cached);
                }
            }

            // only notify once for each word
            if let Some(notified) = in_flight.get(name) {
                if !need_refresh && self.compatible(source, notified, &ctx) {
                    debug!(source = %name, "source has been notified");
                    return Decision::Skip(SkipReason::InFlight);
                }
            }
        }

        if need_refresh {
            cache.clear_refresh(name);
        }

        Decision::Notify(ctx)
    }

    /// Compatibility of two contexts for a source; failures count as incompatible
    pub fn compatible(&self, source: &SourceDescriptor, earlier: &Context, later: &Context) -> bool {
        let min_length = self.settings.min_length_for(source);
        match self.patterns.is_compatible(source, earlier, later, min_length) {
            Ok(compatible) => compatible,
            Err(e) => {
                warn!(source = %source.name, "compatibility check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use crate::types::{Candidate, MinLengthPolicy};

    fn settings() -> EventSettings {
        EventSettings {
            complete_length: MinLengthPolicy::Flat(1),
            ..EventSettings::default()
        }
    }

    fn cached(ctx: Context, start_column: usize) -> CacheEntry {
        CacheEntry {
            start_column,
            matches: vec![Candidate::new("foobar", "buf")],
            filtered_matches: Vec::new(),
            context: ctx,
            enable: true,
            refresh: false,
        }
    }

    #[test]
    fn test_scope_matches_general_source_root_only() {
        let source = SourceDescriptor::new("buf", 5);
        let root = Context::new(1, "x", "html");
        let nested = Context {
            scope_level: 2,
            ..root.clone()
        };
        assert!(scope_matches(&source, &root));
        assert!(!scope_matches(&source, &nested));
    }

    #[test]
    fn test_scope_matches_scoped_source() {
        let mut source = SourceDescriptor::new("css", 5);
        source.scope = Some(vec!["css".to_string()]);

        assert!(!scope_matches(&source, &Context::new(1, "x", "html")));

        let nested = Context {
            scope_level: 2,
            ..Context::new(1, "x", "css")
        };
        assert!(!scope_matches(&source, &nested));

        source.subscope_enable = true;
        assert!(scope_matches(&source, &nested));
    }

    #[test]
    fn test_disabled_and_not_ready() {
        let patterns = WordPatternMatcher::new();
        let settings = settings();
        let scheduler = NotificationScheduler::new(&patterns, &settings);
        let mut cache = MatchCache::new();
        let in_flight = InFlightNotifications::new();
        let ctx = Context::new(1, "foo", "rust");

        let mut source = SourceDescriptor::new("buf", 5);
        source.enable = false;
        assert_eq!(
            scheduler.should_notify(&source, &ctx, &mut cache, &in_flight),
            Decision::Skip(SkipReason::Disabled)
        );

        source.enable = true;
        source.ready = false;
        assert_eq!(
            scheduler.should_notify(&source, &ctx, &mut cache, &in_flight),
            Decision::Skip(SkipReason::NotReady)
        );
    }

    #[test]
    fn test_auto_popup_only_matters_for_automatic_triggers() {
        let patterns = WordPatternMatcher::new();
        let settings = settings();
        let scheduler = NotificationScheduler::new(&patterns, &settings);
        let mut cache = MatchCache::new();
        let in_flight = InFlightNotifications::new();

        let mut source = SourceDescriptor::new("buf", 5);
        source.auto_popup = false;

        let ctx = Context::new(1, "foo", "rust");
        assert_eq!(
            scheduler.should_notify(&source, &ctx, &mut cache, &in_flight),
            Decision::Skip(SkipReason::NotAutoPopup)
        );
        assert!(scheduler
            .should_notify(&source, &ctx.with_manual(true), &mut cache, &in_flight)
            .is_notify());
    }

    #[test]
    fn test_pattern_failure_disables_cache() {
        let patterns = WordPatternMatcher::new();
        let settings = EventSettings {
            complete_length: MinLengthPolicy::Flat(3),
            ..EventSettings::default()
        };
        let scheduler = NotificationScheduler::new(&patterns, &settings);
        let mut cache = MatchCache::new();
        let in_flight = InFlightNotifications::new();
        let source = SourceDescriptor::new("buf", 5);

        let ctx = Context::new(1, "x fo", "rust");
        cache.insert("buf", cached(ctx.clone(), 3));

        assert_eq!(
            scheduler.should_notify(&source, &ctx, &mut cache, &in_flight),
            Decision::Skip(SkipReason::PatternMismatch)
        );
        assert!(!cache.get("buf").unwrap().enable);

        // typing on re-enables it, and the cache still answers
        let ctx = Context::new(1, "x foo", "rust");
        assert_eq!(
            scheduler.should_notify(&source, &ctx, &mut cache, &in_flight),
            Decision::Skip(SkipReason::Cached)
        );
        assert!(cache.get("buf").unwrap().enable);
    }

    #[test]
    fn test_early_cache_probe() {
        let patterns = WordPatternMatcher::new();
        let settings = EventSettings {
            complete_length: MinLengthPolicy::Flat(3),
            ..EventSettings::default()
        };
        let scheduler = NotificationScheduler::new(&patterns, &settings);
        let mut cache = MatchCache::new();
        let in_flight = InFlightNotifications::new();

        let mut source = SourceDescriptor::new("buf", 5);
        source.early_cache = true;

        match scheduler.should_notify(&source, &Context::new(1, "x f", "rust"), &mut cache, &in_flight) {
            Decision::Notify(ctx) => assert!(ctx.early_cache),
            other => panic!("expected notify, got {:?}", other),
        }

        // nothing typed yet: no probe
        assert_eq!(
            scheduler.should_notify(&source, &Context::new(1, "x ", "rust"), &mut cache, &in_flight),
            Decision::Skip(SkipReason::PatternMismatch)
        );
    }

    #[test]
    fn test_in_flight_suppresses_duplicate() {
        let patterns = WordPatternMatcher::new();
        let settings = settings();
        let scheduler = NotificationScheduler::new(&patterns, &settings);
        let mut cache = MatchCache::new();
        let mut in_flight = InFlightNotifications::new();
        let source = SourceDescriptor::new("buf", 5);

        in_flight.record("buf", Context::new(1, "x f", "rust"));
        assert_eq!(
            scheduler.should_notify(&source, &Context::new(1, "x fo", "rust"), &mut cache, &in_flight),
            Decision::Skip(SkipReason::InFlight)
        );

        // manual trigger always goes through
        assert!(scheduler
            .should_notify(
                &source,
                &Context::new(1, "x fo", "rust").with_manual(true),
                &mut cache,
                &in_flight
            )
            .is_notify());
    }

    #[test]
    fn test_refresh_request_is_consumed() {
        let patterns = WordPatternMatcher::new();
        let settings = settings();
        let scheduler = NotificationScheduler::new(&patterns, &settings);
        let mut cache = MatchCache::new();
        let in_flight = InFlightNotifications::new();
        let source = SourceDescriptor::new("buf", 5);

        let mut entry = cached(Context::new(1, "x fo", "rust"), 3);
        entry.refresh = true;
        cache.insert("buf", entry);

        let ctx = Context::new(1, "x foo", "rust");
        assert!(scheduler
            .should_notify(&source, &ctx, &mut cache, &in_flight)
            .is_notify());
        assert!(!cache.get("buf").unwrap().refresh);
        assert_eq!(
            scheduler.should_notify(&source, &ctx, &mut cache, &in_flight),
            Decision::Skip(SkipReason::Cached)
        );
    }

    #[test]
    fn test_remove_if_same() {
        let mut in_flight = InFlightNotifications::new();
        let ctx = Context::new(1, "foo", "rust");
        in_flight.record("buf", ctx.clone());

        assert!(!in_flight.remove_if_same("buf", &ctx.clone().with_context_id(9)));
        assert!(in_flight.remove_if_same("buf", &ctx));
        assert!(in_flight.is_empty());
    }
}
