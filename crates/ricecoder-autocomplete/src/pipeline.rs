//! Popup assembly
//!
//! [`MatchPipeline`] turns the per-source cache into one popup list: each
//! enabled source's matches run through matcher, sorter and filter chain,
//! survivors are cut to the popup limit, aligned to a common start column
//! and decorated with their source mark.

use crate::cache::MatchCache;
use crate::config::EventSettings;
use crate::error::AutocompleteResult;
use crate::plugins::{retain_matching, CapabilityRegistry, FilterInput};
use crate::types::{Candidate, Context, ContextEvent, EventBundle, SourceDescriptor};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use tracing::{debug, error, info, warn};
use unicode_width::UnicodeWidthStr;

/// Inter-source selection hook applied after per-source filtering
pub trait SourceSelector: Send + Sync {
    /// Pick which of `names` (already in popup order) make it into the popup
    fn select(&self, bundle: &EventBundle, names: Vec<String>) -> Vec<String>;
}

/// Keeps every source that has matches
pub struct AllSources;

impl SourceSelector for AllSources {
    fn select(&self, _bundle: &EventBundle, names: Vec<String>) -> Vec<String> {
        names
    }
}

/// A popup entry as handed to the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupCandidate {
    pub word: String,
    pub abbr: String,
    pub menu: String,
    /// JSON-encoded match metadata
    pub user_data: String,
}

/// Everything that determines what the popup shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopupSnapshot {
    pub tick: u64,
    pub start_column: usize,
    pub matches: Vec<PopupCandidate>,
}

/// A popup update to send to the host
#[derive(Debug, Clone, PartialEq)]
pub struct PopupUpdate {
    pub context: Context,
    /// 1-based byte column of the popup start
    pub start_byte_column: usize,
    pub matches: Vec<PopupCandidate>,
}

/// Merges cached results into a popup
pub struct MatchPipeline<'a> {
    capabilities: &'a CapabilityRegistry,
    selector: &'a dyn SourceSelector,
    settings: &'a EventSettings,
}

impl<'a> MatchPipeline<'a> {
    pub fn new(
        capabilities: &'a CapabilityRegistry,
        selector: &'a dyn SourceSelector,
        settings: &'a EventSettings,
    ) -> Self {
        Self {
            capabilities,
            selector,
            settings,
        }
    }

    /// Build the popup for the bundle's live context.
    ///
    /// Records each source's contribution in its cache entry's
    /// `filtered_matches`.
    pub fn assemble(&self, cache: &mut MatchCache, bundle: &EventBundle) -> PopupSnapshot {
        let live = &bundle.context;
        let column = live.column;

        let mut names = cache.names();
        names.sort_by_key(|name| {
            let priority = bundle.sources.get(name).map(|s| s.priority).unwrap_or(i64::MIN);
            (Reverse(priority), name.clone())
        });

        let skip_tick = bundle.effective_skip_tick();
        let mut with_matches = Vec::new();

        for name in names {
            let Some(source) = bundle.sources.get(&name) else {
                error!(source = %name, "source does not exist");
                continue;
            };
            let Some(entry) = cache.get_mut(&name) else {
                continue;
            };
            entry.filtered_matches.clear();

            if !entry.enable {
                debug!(source = %name, "source is disabled");
                continue;
            }

            if entry.start_column > column || entry.start_column == 0 {
                warn!(source = %name, start_column = entry.start_column, "invalid start column");
                continue;
            }

            if let Some(tick) = skip_tick {
                if entry.context.event != ContextEvent::Completed || entry.context.tick != tick {
                    debug!(source = %name, skip_tick = tick, "matches ignored by skip_tick");
                    continue;
                }
            }

            let filtered = match self.filter_source(
                live,
                source,
                &entry.context,
                entry.start_column,
                entry.matches.clone(),
            ) {
                Ok(filtered) => filtered,
                Err(e) => {
                    warn!(source = %name, "match filtering failed: {}", e);
                    continue;
                }
            };
            debug!(
                source = %name,
                before = entry.matches.len(),
                after = filtered.len(),
                "matches filtered"
            );

            if filtered.is_empty() {
                continue;
            }
            entry.filtered_matches = filtered;
            with_matches.push(name);
        }

        let names = self.selector.select(bundle, with_matches);

        let mut start_column = column;
        for name in &names {
            let (Some(source), Some(entry)) = (bundle.sources.get(name), cache.get_mut(name)) else {
                continue;
            };
            let limit = self.settings.popup_limit_for(source);
            if limit >= 0 && entry.filtered_matches.len() > limit as usize {
                debug!(
                    source = %name,
                    before = entry.filtered_matches.len(),
                    limit,
                    "matches cut to popup limit"
                );
                entry.filtered_matches.truncate(limit as usize);
            }
            for candidate in &entry.filtered_matches {
                start_column = start_column.min(candidate.start_column_or(entry.start_column));
            }
        }

        let mut matches = Vec::new();
        for name in &names {
            let Some(entry) = cache.get(name) else {
                continue;
            };
            for candidate in &entry.filtered_matches {
                let match_column = candidate.start_column_or(entry.start_column);
                let prefix = live.typed_between(start_column, match_column);
                let pad = " ".repeat(UnicodeWidthStr::width(prefix.as_str()));

                let mut aligned = candidate.clone();
                aligned.abbr = format!("{}{}", pad, candidate.abbr);
                aligned.word = format!("{}{}", prefix, candidate.word);
                matches.push(aligned);
            }
        }

        info!(
            sources = ?names,
            start_column,
            matches = matches.len(),
            "popup assembled"
        );

        PopupSnapshot {
            tick: live.tick,
            start_column,
            matches: decorate(bundle, matches),
        }
    }

    /// Assemble the popup and return an update unless it is identical to
    /// the last one sent
    pub fn update_popup(
        &self,
        cache: &mut MatchCache,
        bundle: &EventBundle,
        last: &mut Option<PopupSnapshot>,
    ) -> Option<PopupUpdate> {
        let snapshot = self.assemble(cache, bundle);
        if last.as_ref() == Some(&snapshot) {
            debug!(tick = snapshot.tick, "popup unchanged");
            return None;
        }

        let live = &bundle.context;
        let start_byte_column = byte_column(&live.typed, snapshot.start_column);
        let update = PopupUpdate {
            context: live.clone(),
            start_byte_column,
            matches: snapshot.matches.clone(),
        };
        *last = Some(snapshot);
        Some(update)
    }

    fn filter_source(
        &self,
        live: &Context,
        source: &SourceDescriptor,
        source_context: &Context,
        start_column: usize,
        candidates: Vec<Candidate>,
    ) -> AutocompleteResult<Vec<Candidate>> {
        let matcher_opts = source_context
            .matcher
            .clone()
            .unwrap_or_else(|| self.settings.matcher_for(source));
        let matcher = self.capabilities.matcher(&matcher_opts)?;
        let candidates = retain_matching(matcher.as_ref(), live, start_column, candidates)?;

        let sorter = self.capabilities.sorter(&self.settings.sorter_for(source))?;
        let mut candidates = sorter.sort(candidates)?;

        let input = FilterInput {
            live,
            source,
            source_context,
            start_column,
        };
        for filter in self
            .capabilities
            .filter_chain(&self.settings.filter_for(source))?
        {
            candidates = filter.filter(&input, candidates)?;
        }
        Ok(candidates)
    }
}

/// 1-based byte column of a 1-based character column in `typed`
pub fn byte_column(typed: &str, column: usize) -> usize {
    let prefix: String = typed.chars().take(column.saturating_sub(1)).collect();
    prefix.len() + 1
}

/// Prefix menus with the source mark and encode metadata for the host
fn decorate(bundle: &EventBundle, candidates: Vec<Candidate>) -> Vec<PopupCandidate> {
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let mark = bundle
                .sources
                .get(&candidate.user_data.source)
                .map(|s| s.mark.as_str())
                .unwrap_or("");
            let menu = if mark.is_empty() {
                candidate.menu
            } else {
                format!("[{}] {}", mark, candidate.menu)
            };
            match serde_json::to_string(&candidate.user_data) {
                Ok(user_data) => Some(PopupCandidate {
                    word: candidate.word,
                    abbr: candidate.abbr,
                    menu,
                    user_data,
                }),
                Err(e) => {
                    warn!(word = %candidate.word, "failed to encode match metadata: {}", e);
                    None
                }
            }
        })
        .collect()
}
