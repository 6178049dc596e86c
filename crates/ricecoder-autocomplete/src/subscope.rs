//! Subscope detection for embedded-language regions
//!
//! A detector looks at the text of one scope (say, an HTML document) and
//! reports the nested region the cursor sits in (say, a `<script>` block).
//! Detector implementations live outside this crate; the registry only
//! files them by the scopes they understand.

use crate::error::AutocompleteResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;

/// A nested region reported by a detector, in coordinates local to the
/// region it was asked about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscopeResult {
    pub scope: String,
    /// Cursor line within the nested region
    pub line: usize,
    /// Cursor column within the nested region
    pub column: usize,
    /// Text before the cursor on the cursor line
    pub typed: String,
    /// Byte offset of the region within the text the detector was given
    pub scope_offset: usize,
    /// Byte length of the region, to the end of the text when unset
    #[serde(default)]
    pub scope_len: Option<usize>,
    /// Line where the region starts
    pub scope_line: usize,
    /// Column where the region starts on its first line
    pub scope_column: usize,
}

/// Detector for nested regions inside a set of scopes
pub trait SubscopeDetector: Send + Sync {
    /// Scopes this detector can look into
    fn scopes(&self) -> Vec<String>;

    /// Inspect `region` with the cursor at (`line`, `column`)
    fn detect(
        &self,
        line: usize,
        column: usize,
        region: &str,
    ) -> AutocompleteResult<Option<SubscopeResult>>;

    /// Name used in diagnostics
    fn name(&self) -> &str {
        "subscope-detector"
    }
}

/// Detectors grouped by the scope they inspect
#[derive(Default, Clone)]
pub struct DetectorRegistry {
    detectors: BTreeMap<String, Vec<Arc<dyn SubscopeDetector>>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector under every scope it declares.
    ///
    /// Returns `true` when a scope without detectors gained one, which means
    /// the host should be told about the new scope set.
    pub fn register(&mut self, detector: Arc<dyn SubscopeDetector>) -> bool {
        let mut new_scope = false;
        let scopes = detector.scopes();
        for scope in &scopes {
            let entry = self.detectors.entry(scope.clone()).or_default();
            if entry.is_empty() {
                new_scope = true;
            }
            entry.push(Arc::clone(&detector));
        }
        info!(detector = detector.name(), ?scopes, "subscope detector registered");
        new_scope
    }

    pub fn detectors_for(&self, scope: &str) -> &[Arc<dyn SubscopeDetector>] {
        self.detectors
            .get(scope)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Scopes with at least one detector
    pub fn scopes(&self) -> BTreeSet<String> {
        self.detectors.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<&'static str>);

    impl SubscopeDetector for Fixed {
        fn scopes(&self) -> Vec<String> {
            self.0.iter().map(|s| s.to_string()).collect()
        }

        fn detect(&self, _: usize, _: usize, _: &str) -> AutocompleteResult<Option<SubscopeResult>> {
            Ok(None)
        }
    }

    #[test]
    fn test_register_reports_new_scopes() {
        let mut registry = DetectorRegistry::new();
        assert!(registry.register(Arc::new(Fixed(vec!["html", "markdown"]))));
        assert!(!registry.register(Arc::new(Fixed(vec!["html"]))));
        assert!(registry.register(Arc::new(Fixed(vec!["html", "vue"]))));

        assert_eq!(registry.detectors_for("html").len(), 3);
        assert_eq!(registry.detectors_for("rust").len(), 0);
        assert_eq!(registry.scopes().len(), 3);
    }
}
