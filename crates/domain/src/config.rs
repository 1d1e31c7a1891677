//! Repository configuration loaded from environment variables.

use crate::converter::DEFAULT_MAX_CONVERSION_DEPTH;
use crate::error::{DomainError, Result};

/// Repository settings with sensible defaults.
///
/// Reads from environment variables:
/// - `REPOSITORY_MAX_CONVERSION_DEPTH` — longest converter chain allowed per
///   event (default: `32`)
/// - `REPOSITORY_PUBLISH_EMPTY_BATCHES` — whether saving an aggregate without
///   uncommitted events still publishes an empty batch (default: `false`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub max_conversion_depth: usize,
    pub publish_empty_batches: bool,
}

impl RepositoryConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_conversion_depth: lookup("REPOSITORY_MAX_CONVERSION_DEPTH")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_conversion_depth),
            publish_empty_batches: lookup("REPOSITORY_PUBLISH_EMPTY_BATCHES")
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.publish_empty_batches),
        }
    }

    /// Rejects settings the repository cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_conversion_depth == 0 {
            return Err(DomainError::InvalidConfig(
                "max_conversion_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_conversion_depth: DEFAULT_MAX_CONVERSION_DEPTH,
            publish_empty_batches: false,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
