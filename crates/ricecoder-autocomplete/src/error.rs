//! Autocomplete error types

use thiserror::Error;

/// Errors raised while scheduling, caching or merging completion results
#[derive(Error, Debug)]
pub enum AutocompleteError {
    /// The host and the core disagree about configuration, e.g. a source
    /// name or plugin identifier that does not resolve
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A completion-accepted payload is malformed or was not produced here
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A detector, matcher, sorter or filter failed
    #[error("Plugin error in {plugin}: {message}")]
    Plugin { plugin: String, message: String },

    /// A response no longer matches the live buffer
    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AutocompleteError {
    pub fn plugin(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            message: message.into(),
        }
    }

    pub fn unknown_source(name: &str) -> Self {
        Self::Configuration(format!("source does not exist: {}", name))
    }
}

/// Result type for autocomplete operations
pub type AutocompleteResult<T> = std::result::Result<T, AutocompleteError>;
