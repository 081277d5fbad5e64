// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Memory configuration.
//!
//! [`MemoryConfig`] controls auto-snapshotting, the policy that keeps the
//! ancestor walk of every read bounded regardless of how long the edit history
//! grows:
//!
//! - every `slices_per_snapshot` calls to `switch_to`, the memory measures the
//!   flattened ancestor chain of the current slice;
//! - when that chain is longer than `flat_slices + slices_per_snapshot`, the
//!   oldest window of `slices_per_snapshot` plain slices is compacted into one
//!   snapshot slice.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The document parsed but describes an unusable policy.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tuning knobs for a [`crate::Memory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Number of plain (non-snapshot) slices tolerated in an ancestor chain
    /// before auto-snapshotting kicks in.
    pub flat_slices: usize,
    /// Window size of one auto-snapshot, and the number of switches between
    /// two auto-snapshot checks.
    pub slices_per_snapshot: usize,
    /// Enables the auto-snapshot policy.
    pub auto_snapshot: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            flat_slices: 40,
            slices_per_snapshot: 8,
            auto_snapshot: true,
        }
    }
}

impl MemoryConfig {
    /// Parses and validates a JSON config document. Missing fields take their
    /// default values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the policy can make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slices_per_snapshot < 2 {
            return Err(ConfigError::Invalid(format!(
                "slices_per_snapshot must be at least 2, got {}",
                self.slices_per_snapshot
            )));
        }
        Ok(())
    }

    /// Chain length above which an auto-snapshot is taken.
    pub(crate) fn snapshot_threshold(&self) -> usize {
        self.flat_slices + self.slices_per_snapshot
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = MemoryConfig::default();
        assert_eq!(config.flat_slices, 40);
        assert_eq!(config.slices_per_snapshot, 8);
        assert_eq!(config.snapshot_threshold(), 48);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = MemoryConfig::from_json(r#"{ "flat_slices": 4 }"#).unwrap();
        assert_eq!(config.flat_slices, 4);
        assert_eq!(config.slices_per_snapshot, 8);
        assert!(config.auto_snapshot);
    }

    #[test]
    fn rejects_degenerate_window() {
        let err = MemoryConfig::from_json(r#"{ "slices_per_snapshot": 1 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = MemoryConfig::from_json(r#"{ "flat": 4 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Serde(_)));
    }
}
