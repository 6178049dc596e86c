/// RiceCoder Autocomplete Core
///
/// The decision engine between an editor's live buffer and a set of
/// independently implemented completion sources. It decides which sources to
/// ask, keeps their answers, and merges them into one popup.
///
/// # Architecture
///
/// Every host event flows through the same layers:
///
/// 1. **Context Layer**: Expand the root context into nested embedded-language
///    contexts using registered subscope detectors
/// 2. **Scheduling Layer**: Decide per (source, context) pair whether a fresh
///    request is needed, or whether a cached or outstanding answer covers it
/// 3. **Cache Layer**: Accept asynchronous source answers, rejecting outdated
///    and stale ones
/// 4. **Popup Layer**: Filter, sort and merge cached answers against the live
///    text, align them to one start column and emit the popup
///
/// Sources answer out of order. Correctness rests on context epoch ids and on
/// re-validating answers against the live text, never on sequencing.
///
/// # Core Components
///
/// ## WordPatternMatcher
/// Resolves the per-scope word pattern and extracts the base word before the
/// cursor. Every staleness check goes through it.
///
/// ## ContextBuilder
/// Breadth-first subscope expansion over a [`DetectorRegistry`].
///
/// ## NotificationScheduler
/// The ordered notify/skip decision for one source and context.
///
/// ## MatchCache
/// Per-source answers with epoch and dated-result checks.
///
/// ## MatchPipeline
/// Matcher, sorter and filter chain per source, popup limit, column alignment
/// and anti-flicker suppression. Plugins come from a [`CapabilityRegistry`].
///
/// ## CompletionOrchestrator
/// Owns the session state and the [`HostSink`] and wires the layers together.
///
/// # Configuration
///
/// Configuration is loaded from YAML/JSON files and supports:
/// - Per-scope word patterns
/// - Default matcher, sorter and filter chain
/// - Minimum base length (flat or tiered by priority) and popup limit
///
/// # Example: Basic Usage
///
/// ```ignore
/// use ricecoder_autocomplete::*;
///
/// let mut orchestrator = CompletionOrchestrator::new(EngineConfig::default(), BufferedSink::new())?;
///
/// let bundle = EventBundle::new(Context::new(1, "let x = fo", "rust"))
///     .with_source(SourceDescriptor::new("buffer", 5));
/// orchestrator.on_complete(bundle.clone(), false);
///
/// // later, when the source answers
/// orchestrator.complete(&bundle, IncomingResult {
///     context: source_context,
///     start_column: 9,
///     matches: vec![RawMatch::Word("foo".to_string())],
///     refresh: false,
/// })?;
///
/// for message in orchestrator.sink_mut().drain() {
///     // forward to the editor
/// }
/// ```
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod plugins;
pub mod scheduler;
pub mod session;
pub mod subscope;
pub mod types;
pub mod word_pattern;

// Re-export public types and traits
pub use cache::{AcceptEnv, AcceptOutcome, CacheEntry, IncomingResult, MatchCache};
pub use config::{ConfigFormat, ConfigLoader, EngineConfig, EventSettings, GlobalDefaults};
pub use context::{region_text, ContextBuilder};
pub use error::{AutocompleteError, AutocompleteResult};
pub use host::{BufferedSink, ChannelSink, HostMessage, HostSink, Notification};
pub use pipeline::{
    byte_column, AllSources, MatchPipeline, PopupCandidate, PopupSnapshot, PopupUpdate,
    SourceSelector,
};
pub use plugins::{
    retain_matching, CapabilityRegistry, CaseMode, Filter, FilterInput, Matcher, Sorter,
};
pub use scheduler::{
    scope_matches, Decision, InFlightNotifications, NotificationScheduler, SkipReason,
};
pub use session::{CompletionOrchestrator, SessionState};
pub use subscope::{DetectorRegistry, SubscopeDetector, SubscopeResult};
pub use types::*;
pub use word_pattern::{BaseExtraction, PatternCheck, WordPatternMatcher, DEFAULT_SCOPE};
