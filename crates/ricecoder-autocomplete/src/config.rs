/// Configuration loading and per-event option resolution
use crate::error::{AutocompleteError, AutocompleteResult};
use crate::plugins::CapabilityRegistry;
use crate::types::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Global defaults used when an event bundle leaves a setting out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalDefaults {
    pub matcher: PluginSpec,
    pub sorter: PluginSpec,
    pub filter: FilterChain,
    pub complete_length: MinLengthPolicy,
    /// Negative means unlimited
    pub popup_limit: i64,
}

impl Default for GlobalDefaults {
    fn default() -> Self {
        Self {
            matcher: PluginSpec::from("prefix"),
            sorter: PluginSpec::from("none"),
            filter: FilterChain::Many(Vec::new()),
            complete_length: MinLengthPolicy::default(),
            popup_limit: -1,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Word patterns keyed by scope, layered over the built-in table
    pub word_patterns: HashMap<String, String>,
    pub defaults: GlobalDefaults,
}

impl EngineConfig {
    /// Check that every plugin identifier in the defaults resolves
    pub fn check_plugins(&self, registry: &CapabilityRegistry) -> AutocompleteResult<()> {
        registry.matcher(&self.defaults.matcher.options())?;
        registry.sorter(&self.defaults.sorter.options())?;
        for filter in self.defaults.filter.options() {
            registry.filter(&filter)?;
        }
        Ok(())
    }
}

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

/// Engine configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub fn load_from_yaml(path: &Path) -> AutocompleteResult<EngineConfig> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_string(&content, ConfigFormat::Yaml)
    }

    /// Load configuration from a JSON file
    pub fn load_from_json(path: &Path) -> AutocompleteResult<EngineConfig> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_string(&content, ConfigFormat::Json)
    }

    /// Load configuration from a file, picking the format from its extension
    pub fn load_from_path(path: &Path) -> AutocompleteResult<EngineConfig> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::load_from_yaml(path),
            Some("json") => Self::load_from_json(path),
            _ => Err(AutocompleteError::Configuration(format!(
                "Unsupported configuration file: {}",
                path.display()
            ))),
        }
    }

    /// Load configuration from a string
    pub fn load_from_string(content: &str, format: ConfigFormat) -> AutocompleteResult<EngineConfig> {
        let config = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Self::validate_config(&config)?;
        Ok(config)
    }

    fn validate_config(config: &EngineConfig) -> AutocompleteResult<()> {
        for (scope, pattern) in &config.word_patterns {
            Regex::new(pattern).map_err(|e| {
                AutocompleteError::Configuration(format!(
                    "Invalid word pattern for scope {}: {}",
                    scope, e
                ))
            })?;
        }

        if let MinLengthPolicy::Tiered(table) = &config.defaults.complete_length {
            if table.is_empty() {
                return Err(AutocompleteError::Configuration(
                    "complete_length table cannot be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Options in force for one event, after falling back to configured defaults
#[derive(Debug, Clone, PartialEq)]
pub struct EventSettings {
    pub matcher: PluginOptions,
    pub sorter: PluginOptions,
    pub filter: Vec<PluginOptions>,
    pub complete_length: MinLengthPolicy,
    pub popup_limit: i64,
}

impl EventSettings {
    pub fn resolve(bundle: &EventBundle, defaults: &GlobalDefaults) -> Self {
        Self {
            matcher: bundle.matcher.as_ref().unwrap_or(&defaults.matcher).options(),
            sorter: bundle.sorter.as_ref().unwrap_or(&defaults.sorter).options(),
            filter: bundle.filter.as_ref().unwrap_or(&defaults.filter).options(),
            complete_length: bundle
                .complete_length
                .clone()
                .unwrap_or_else(|| defaults.complete_length.clone()),
            popup_limit: bundle.popup_limit.unwrap_or(defaults.popup_limit),
        }
    }

    /// Matcher options for a source: its own options layered over the global ones
    pub fn matcher_for(&self, source: &SourceDescriptor) -> PluginOptions {
        match &source.matcher {
            Some(spec) => self.matcher.merged(&spec.options()),
            None => self.matcher.clone(),
        }
    }

    pub fn sorter_for(&self, source: &SourceDescriptor) -> PluginOptions {
        match &source.sorter {
            Some(spec) => self.sorter.merged(&spec.options()),
            None => self.sorter.clone(),
        }
    }

    /// A source's filter chain replaces the global chain outright
    pub fn filter_for(&self, source: &SourceDescriptor) -> Vec<PluginOptions> {
        match &source.filter {
            Some(chain) => chain.options(),
            None => self.filter.clone(),
        }
    }

    pub fn min_length_for(&self, source: &SourceDescriptor) -> Option<i64> {
        source
            .complete_length
            .as_ref()
            .unwrap_or(&self.complete_length)
            .resolve(source.priority)
    }

    pub fn popup_limit_for(&self, source: &SourceDescriptor) -> i64 {
        source.popup_limit.unwrap_or(self.popup_limit)
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self::resolve(&EventBundle::new(Context::default()), &GlobalDefaults::default())
    }
}
