//! Context expansion through nested subscopes
//!
//! The host hands over one root context per event. [`ContextBuilder`] turns it
//! into the full list of contexts the cursor is in, outermost first, by
//! running registered subscope detectors breadth-first.

use crate::error::{AutocompleteError, AutocompleteResult};
use crate::subscope::{DetectorRegistry, SubscopeDetector};
use crate::types::Context;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Builds the list of (possibly nested) contexts for an event
pub struct ContextBuilder<'a> {
    registry: &'a DetectorRegistry,
    active_scopes: &'a HashSet<String>,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(registry: &'a DetectorRegistry, active_scopes: &'a HashSet<String>) -> Self {
        Self {
            registry,
            active_scopes,
        }
    }

    /// Expand `root` into itself followed by every nested context found.
    ///
    /// A failing detector is logged and skipped; its siblings still run.
    pub fn expand(&self, root: &Context, lines: &[String]) -> Vec<Context> {
        let mut contexts = vec![Context {
            scope_level: 1,
            ..root.clone()
        }];
        let src = lines.join("\n");

        let mut next = 0;
        while next < contexts.len() {
            let ctx = contexts[next].clone();
            next += 1;

            if !self.active_scopes.contains(&ctx.scope) {
                continue;
            }

            for detector in self.registry.detectors_for(&ctx.scope) {
                match derive_context(detector.as_ref(), &ctx, &src) {
                    Ok(Some(sub)) => {
                        debug!(
                            scope = %sub.scope,
                            level = sub.scope_level,
                            offset = sub.scope_offset,
                            "new sub context"
                        );
                        contexts.push(sub);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            detector = detector.name(),
                            scope = %ctx.scope,
                            "exception on scope processing: {}",
                            e
                        );
                    }
                }
            }
        }

        contexts
    }
}

/// Text of the region `ctx` covers within the joined buffer
pub fn region_text<'s>(src: &'s str, ctx: &Context) -> AutocompleteResult<&'s str> {
    let start = ctx.scope_offset;
    let end = match ctx.scope_len {
        Some(len) => start.saturating_add(len).min(src.len()),
        None => src.len(),
    };
    src.get(start..end).ok_or_else(|| {
        AutocompleteError::Configuration(format!(
            "scope region {}..{} is outside the buffer or splits a character",
            start, end
        ))
    })
}

fn derive_context(
    detector: &dyn SubscopeDetector,
    parent: &Context,
    src: &str,
) -> AutocompleteResult<Option<Context>> {
    let region = region_text(src, parent)?;
    let Some(found) = detector.detect(parent.line, parent.column, region)? else {
        return Ok(None);
    };
    if found.line == 0 || found.column == 0 || found.scope_line == 0 || found.scope_column == 0 {
        return Err(AutocompleteError::plugin(
            detector.name(),
            format!(
                "reported position {}:{} in region at {}:{}; positions are 1-based",
                found.line, found.column, found.scope_line, found.scope_column
            ),
        ));
    }

    let mut sub = Context {
        scope: found.scope,
        line: found.line,
        column: found.column,
        typed: found.typed,
        scope_offset: found.scope_offset + parent.scope_offset,
        scope_len: found.scope_len,
        scope_line: found.scope_line + parent.scope_line.saturating_sub(1),
        scope_column: found.scope_column,
        scope_level: parent.scope_level + 1,
        ..parent.clone()
    };

    // the region starts mid-line: re-base the typed text onto the region start
    if sub.line == 1 {
        sub.typed = sub
            .typed
            .chars()
            .skip(sub.scope_column.saturating_sub(1))
            .collect();
        sub.scope_column += parent.scope_column.saturating_sub(1);
    }

    Ok(Some(sub))
}
