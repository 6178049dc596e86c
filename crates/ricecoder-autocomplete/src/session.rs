//! Completion session orchestration
//!
//! [`CompletionOrchestrator`] owns all per-session state and handles the
//! host's events one at a time: completion triggers, source callbacks,
//! warm-ups, accepted completions and delivery failures.

use crate::cache::{AcceptEnv, AcceptOutcome, IncomingResult, MatchCache};
use crate::config::{EngineConfig, EventSettings};
use crate::context::ContextBuilder;
use crate::error::{AutocompleteError, AutocompleteResult};
use crate::host::{HostMessage, HostSink, Notification};
use crate::pipeline::{AllSources, MatchPipeline, PopupSnapshot, SourceSelector};
use crate::plugins::CapabilityRegistry;
use crate::scheduler::{scope_matches, Decision, InFlightNotifications, NotificationScheduler};
use crate::subscope::{DetectorRegistry, SubscopeDetector};
use crate::types::{
    CompletedItem, Context, ContextEvent, EventBundle, MatchMetadata, SourceDescriptor,
};
use crate::word_pattern::WordPatternMatcher;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Mutable state shared by every event of a session
///
/// All three stores belong to the line in `cache_line` and are reset
/// together.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    cache_line: usize,
    pub cache: MatchCache,
    pub in_flight: InFlightNotifications,
    pub last_popup: Option<PopupSnapshot>,
}

impl SessionState {
    pub fn reset(&mut self) {
        self.cache.clear();
        self.in_flight.clear();
        self.last_popup = None;
    }

    /// Reset when the cursor moved to another line. Returns `true` on reset.
    pub fn check_line(&mut self, line: usize) -> bool {
        if self.cache_line == line {
            return false;
        }
        debug!(from = self.cache_line, to = line, "line changed, cache cleared");
        self.reset();
        self.cache_line = line;
        true
    }

    pub fn cache_line(&self) -> usize {
        self.cache_line
    }
}

/// Coordinates sources, cache and popup for one editing session
pub struct CompletionOrchestrator<S: HostSink> {
    config: EngineConfig,
    patterns: WordPatternMatcher,
    detectors: DetectorRegistry,
    capabilities: CapabilityRegistry,
    selector: Box<dyn SourceSelector>,
    state: SessionState,
    sink: S,
}

impl<S: HostSink> CompletionOrchestrator<S> {
    /// Create an orchestrator with the built-in matchers, sorters and filters
    pub fn new(config: EngineConfig, sink: S) -> AutocompleteResult<Self> {
        Self::with_capabilities(config, CapabilityRegistry::with_builtins(), sink)
    }

    /// Create an orchestrator with a caller-populated capability registry
    pub fn with_capabilities(
        config: EngineConfig,
        capabilities: CapabilityRegistry,
        sink: S,
    ) -> AutocompleteResult<Self> {
        config.check_plugins(&capabilities)?;
        let patterns = WordPatternMatcher::with_overrides(&config.word_patterns);
        Ok(Self {
            config,
            patterns,
            detectors: DetectorRegistry::new(),
            capabilities,
            selector: Box::new(AllSources),
            state: SessionState::default(),
            sink,
        })
    }

    pub fn set_selector(&mut self, selector: Box<dyn SourceSelector>) {
        self.selector = selector;
    }

    /// Register a subscope detector and tell the host when it covers a new scope
    pub fn register_detector(&mut self, detector: Arc<dyn SubscopeDetector>) {
        if self.detectors.register(detector) {
            self.sink.send(HostMessage::SyncDetectors {
                scopes: self.detectors.scopes(),
            });
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle a completion trigger: notify every source that needs asking,
    /// then refresh the popup from the cache
    pub fn on_complete(&mut self, mut bundle: EventBundle, manual: bool) {
        bundle.context.manual = manual;
        self.state.check_line(bundle.context.line);

        let settings = EventSettings::resolve(&bundle, &self.config.defaults);
        let contexts = self.expand(&bundle);
        let scheduler = NotificationScheduler::new(&self.patterns, &settings);
        let now = Utc::now();

        let mut notifies = Vec::new();
        for ctx in &contexts {
            for name in bundle.source_names() {
                let Ok(source) = bundle.source(name) else {
                    continue;
                };
                let candidate = ctx.for_source(name, settings.matcher_for(source));
                match scheduler.should_notify(
                    source,
                    &candidate,
                    &mut self.state.cache,
                    &self.state.in_flight,
                ) {
                    Decision::Notify(ctx) => {
                        let ctx = ctx.stamped(now);
                        self.state.in_flight.record(name, ctx.clone());
                        notifies.push(Notification {
                            name: name.to_string(),
                            context: ctx,
                        });
                    }
                    Decision::Skip(reason) => {
                        debug!(source = %name, scope = %ctx.scope, ?reason, "source skipped");
                    }
                }
            }
        }

        if notifies.is_empty() {
            debug!("no source needs notifying");
        } else {
            info!(
                sources = ?notifies.iter().map(|n| n.name.as_str()).collect::<Vec<_>>(),
                "notifying sources"
            );
            self.sink.send(HostMessage::NotifyComplete {
                context: bundle.context.clone(),
                notifies,
            });
        }

        self.refresh_popup(&bundle, &settings);
    }

    /// Handle a source's answer
    ///
    /// Stored results trigger a popup refresh. Results for an unknown source
    /// and results that no longer match the buffer come back as errors after
    /// being logged.
    pub fn complete(
        &mut self,
        bundle: &EventBundle,
        incoming: IncomingResult,
    ) -> AutocompleteResult<AcceptOutcome> {
        let live = &bundle.context;
        self.state.check_line(live.line);

        let name = incoming.context.source.clone().unwrap_or_default();
        let source = match bundle.source(&name) {
            Ok(source) => source,
            Err(e) => {
                error!(source = %name, "{}", e);
                return Err(e);
            }
        };

        let settings = EventSettings::resolve(bundle, &self.config.defaults);
        let expanded = if incoming.context.dated {
            self.expand(bundle)
        } else {
            Vec::new()
        };
        let scope_live = expanded
            .iter()
            .find(|ctx| {
                ctx.scope == incoming.context.scope
                    && ctx.scope_level == incoming.context.scope_level
            })
            .unwrap_or(live);
        let env = AcceptEnv {
            live,
            scope_live,
            source,
            patterns: &self.patterns,
            settings: &settings,
            capabilities: &self.capabilities,
        };

        let sctx_typed = incoming.context.typed.clone();
        let outcome = match self.state.cache.accept(incoming, &env) {
            Ok(outcome) => outcome,
            Err(AutocompleteError::StaleData(msg)) => {
                info!(source = %name, old = %sctx_typed, current = %live.typed, "dated result discarded");
                return Err(AutocompleteError::StaleData(msg));
            }
            Err(e) => {
                warn!(source = %name, "completion result rejected: {}", e);
                return Err(e);
            }
        };

        if outcome == AcceptOutcome::Stored {
            self.refresh_popup(bundle, &settings);
        }
        Ok(outcome)
    }

    /// Ask sources to prepare for upcoming requests
    ///
    /// An empty `names` list means every source in the bundle.
    pub fn on_warmup(&mut self, bundle: &EventBundle, names: &[String]) {
        let names: Vec<String> = if names.is_empty() {
            bundle.source_names().into_iter().map(String::from).collect()
        } else {
            names.to_vec()
        };

        let settings = EventSettings::resolve(bundle, &self.config.defaults);
        let mut warmups = Vec::new();
        for ctx in self.expand(bundle) {
            for name in &names {
                let source = match bundle.source(name) {
                    Ok(source) => source,
                    Err(e) => {
                        error!(source = %name, "{}", e);
                        continue;
                    }
                };
                if !source.enable || !scope_matches(source, &ctx) {
                    continue;
                }
                warmups.push(Notification {
                    name: name.clone(),
                    context: ctx.for_source(name, settings.matcher_for(source)),
                });
            }
        }

        self.sink.send(HostMessage::WarmupSources {
            context: bundle.context.clone(),
            warmups,
        });
    }

    /// Route an accepted completion back to the source that produced it
    pub fn on_complete_done(&mut self, bundle: &EventBundle, completed: CompletedItem) {
        info!("on_complete_done");
        self.state.check_line(bundle.context.line);

        let meta: MatchMetadata = match serde_json::from_str(&completed.user_data) {
            Ok(meta) => meta,
            Err(e) => {
                debug!("completed item is not ours: {}", e);
                return;
            }
        };
        if !meta.is_ours() {
            debug!(origin = %meta.origin, "completed item is not ours");
            return;
        }

        let name = meta.source.as_str();
        let source = match bundle.source(name) {
            Ok(source) => source,
            Err(e) => {
                error!(source = %name, "{}", e);
                return;
            }
        };
        if !source.on_completed {
            debug!(source = %name, "source has no on_completed handler");
            return;
        }

        let mut root = bundle.clone();
        root.context.manual = false;

        let settings = EventSettings::resolve(&root, &self.config.defaults);
        let Some(ctx) = self.first_context_for(&root, source, &settings) else {
            debug!(source = %name, "no context in scope for completed item");
            return;
        };
        let ctx = ctx.with_event(ContextEvent::Completed);

        self.state.in_flight.record(name, ctx.clone());
        self.sink.send(HostMessage::NotifyCompleted {
            context: root.context,
            name: name.to_string(),
            source_context: ctx,
            completed,
        });
    }

    /// Forget notifications the host failed to deliver
    pub fn on_notify_dated(&mut self, failed: &[Notification]) {
        for notification in failed {
            if self
                .state
                .in_flight
                .remove_if_same(&notification.name, &notification.context)
            {
                debug!(source = %notification.name, "notification is dated");
            }
        }
    }

    /// Context a source would be asked with for this event
    pub fn get_context(
        &self,
        bundle: &EventBundle,
        name: &str,
    ) -> AutocompleteResult<Option<Context>> {
        let source = bundle.source(name)?;
        let settings = EventSettings::resolve(bundle, &self.config.defaults);
        Ok(self.first_context_for(bundle, source, &settings))
    }

    /// Drop every cached result, in-flight record and the last popup
    pub fn cache_cleanup(&mut self) {
        self.state.reset();
    }

    /// Re-run the popup pass for the bundle's live context
    pub fn update_popup(&mut self, bundle: &EventBundle) {
        self.state.check_line(bundle.context.line);
        let settings = EventSettings::resolve(bundle, &self.config.defaults);
        self.refresh_popup(bundle, &settings);
    }

    fn expand(&self, bundle: &EventBundle) -> Vec<Context> {
        ContextBuilder::new(&self.detectors, &bundle.subscope_detectors)
            .expand(&bundle.context, &bundle.lines)
    }

    fn first_context_for(
        &self,
        bundle: &EventBundle,
        source: &SourceDescriptor,
        settings: &EventSettings,
    ) -> Option<Context> {
        let min_length = settings.min_length_for(source);
        self.expand(bundle)
            .into_iter()
            .map(|ctx| ctx.for_source(&source.name, settings.matcher_for(source)))
            .find(|ctx| scope_matches(source, ctx))
            .and_then(|ctx| match self.patterns.check(&ctx, source, min_length) {
                Ok(check) => Some(check.context.stamped(Utc::now())),
                Err(e) => {
                    warn!(source = %source.name, "pattern check failed: {}", e);
                    None
                }
            })
    }

    fn refresh_popup(&mut self, bundle: &EventBundle, settings: &EventSettings) {
        let pipeline = MatchPipeline::new(&self.capabilities, self.selector.as_ref(), settings);
        if let Some(update) =
            pipeline.update_popup(&mut self.state.cache, bundle, &mut self.state.last_popup)
        {
            self.sink.send(HostMessage::UpdateMatches {
                context: update.context,
                start_byte_column: update.start_byte_column,
                matches: update.matches,
            });
        }
    }
}
