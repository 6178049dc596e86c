/// Per-source result cache with epoch and staleness checks
use crate::config::EventSettings;
use crate::error::{AutocompleteError, AutocompleteResult};
use crate::plugins::{retain_matching, CapabilityRegistry};
use crate::types::{Candidate, Context, RawMatch, SourceDescriptor};
use crate::word_pattern::WordPatternMatcher;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Cached answer of one source
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Column where the source's completion starts in the live buffer
    pub start_column: usize,
    /// Normalized matches as stored
    pub matches: Vec<Candidate>,
    /// What this source contributed to the last popup
    pub filtered_matches: Vec<Candidate>,
    /// Context the source answered
    pub context: Context,
    /// Whether the entry may feed the popup
    pub enable: bool,
    /// Whether the source asked to be queried again
    pub refresh: bool,
}

/// A completion result as delivered by a source
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingResult {
    /// Context the source answered
    pub context: Context,
    /// Start column in the source context's coordinates
    pub start_column: usize,
    pub matches: Vec<RawMatch>,
    pub refresh: bool,
}

/// What happened to an incoming result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptOutcome {
    Stored,
    /// An answer to a newer request is already cached
    Outdated,
}

/// Collaborators needed to validate and prefilter an incoming result
pub struct AcceptEnv<'a> {
    pub live: &'a Context,
    /// Live context in the same scope frame as the result, used to re-validate dated results
    pub scope_live: &'a Context,
    pub source: &'a SourceDescriptor,
    pub patterns: &'a WordPatternMatcher,
    pub settings: &'a EventSettings,
    pub capabilities: &'a CapabilityRegistry,
}

/// Source name to cached answer
#[derive(Debug, Clone, Default)]
pub struct MatchCache {
    entries: HashMap<String, CacheEntry>,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&CacheEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CacheEntry> {
        self.entries.get_mut(name)
    }

    pub fn insert(&mut self, name: &str, entry: CacheEntry) {
        self.entries.insert(name.to_string(), entry);
    }

    pub fn remove(&mut self, name: &str) -> Option<CacheEntry> {
        self.entries.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Toggle the popup flag of an existing entry. Returns `true` if the
    /// flag changed.
    pub fn set_enabled(&mut self, name: &str, enable: bool) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) if entry.enable != enable => {
                entry.enable = enable;
                true
            }
            _ => false,
        }
    }

    pub fn clear_refresh(&mut self, name: &str) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.refresh = false;
        }
    }

    /// Validate, normalize and store a source's answer.
    ///
    /// A result older than the cached one is dropped. A result computed
    /// against an outdated buffer is kept only if it still answers the live
    /// word, otherwise [`AutocompleteError::StaleData`] is returned.
    pub fn accept(
        &mut self,
        incoming: IncomingResult,
        env: &AcceptEnv<'_>,
    ) -> AutocompleteResult<AcceptOutcome> {
        let name = env.source.name.as_str();
        let sctx = incoming.context;

        if let Some(existing) = self.entries.get(name) {
            if existing.context.context_id > sctx.context_id {
                debug!(
                    source = %name,
                    cached = existing.context.context_id,
                    incoming = sctx.context_id,
                    "ignoring outdated completion result"
                );
                return Ok(AcceptOutcome::Outdated);
            }
        }

        if sctx.dated {
            let min_length = env.settings.min_length_for(env.source);
            if !env
                .patterns
                .is_compatible(env.source, &sctx, env.scope_live, min_length)?
            {
                return Err(AutocompleteError::StaleData(format!(
                    "{} answered for '{}', buffer now has '{}'",
                    name, sctx.typed, env.scope_live.typed
                )));
            }
        }

        let mut start_column = incoming.start_column;
        if sctx.line == 1 {
            start_column += sctx.scope_column.saturating_sub(1);
        }

        let mut matches = Vec::with_capacity(incoming.matches.len());
        for raw in incoming.matches {
            match Candidate::from_raw(raw, name) {
                Ok(candidate) => matches.push(candidate),
                Err(e) => warn!(source = %name, "dropping malformed match: {}", e),
            }
        }

        let matcher_opts = sctx
            .matcher
            .clone()
            .unwrap_or_else(|| env.settings.matcher_for(env.source));
        let prefiltered = env
            .capabilities
            .matcher(&matcher_opts)
            .and_then(|matcher| {
                retain_matching(matcher.as_ref(), env.live, start_column, matches.clone())
            });
        let matches = match prefiltered {
            Ok(kept) => kept,
            Err(e) => {
                warn!(source = %name, "matcher failed, caching unfiltered matches: {}", e);
                matches
            }
        };

        info!(
            source = %name,
            matches = matches.len(),
            start_column,
            early_cache = sctx.early_cache,
            refresh = incoming.refresh,
            "completion result cached"
        );

        let enable = !sctx.early_cache;
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                start_column,
                matches,
                filtered_matches: Vec::new(),
                context: sctx,
                enable,
                refresh: incoming.refresh,
            },
        );
        Ok(AcceptOutcome::Stored)
    }
}
