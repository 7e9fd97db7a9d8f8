//! Configuration for resolution services and runtimes.

use serde::{Deserialize, Serialize};

use crate::error::{ResolutionError, ResolutionResult};

/// Default upper bound on values generated for a ranged feature.
pub const DEFAULT_MAX_RANGE_VALUES: usize = 500;

/// Limits applied by a [`ResolutionService`](crate::ResolutionService).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    /// Maximum number of cached sessions before the least recently used is evicted.
    pub max_sessions: usize,
    /// Number of lock stripes the session cache is split into.
    pub session_stripes: usize,
    /// Per-session capacity of the event stack.
    pub max_events: usize,
    /// Per-session capacity of the rule stack.
    pub max_rules: usize,
    /// Maximum cardinality of a generated feature range. Materializing a
    /// variant whose range exceeds it fails with `InvalidRange`.
    pub max_range_values: usize,
    /// Maximum tree depth AutoCompletion may reach.
    pub max_autocompletion_depth: usize,
    /// Maximum warnings/errors retained per session.
    pub max_session_messages: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            session_stripes: 16,
            max_events: 1024,
            max_rules: 512,
            max_range_values: DEFAULT_MAX_RANGE_VALUES,
            max_autocompletion_depth: 64,
            max_session_messages: 256,
        }
    }
}

impl ResolutionConfig {
    /// Parses a configuration document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> ResolutionResult<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| ResolutionError::internal(format!("invalid resolution config: {e}")))?;
        Ok(cfg.normalized())
    }

    /// Clamps every limit to at least one.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.max_sessions = self.max_sessions.max(1);
        self.session_stripes = self.session_stripes.max(1);
        self.max_events = self.max_events.max(1);
        self.max_rules = self.max_rules.max(1);
        self.max_range_values = self.max_range_values.max(1);
        self.max_autocompletion_depth = self.max_autocompletion_depth.max(1);
        self.max_session_messages = self.max_session_messages.max(1);
        self
    }
}

/// Worker configuration for a [`ResolutionRuntime`](crate::ResolutionRuntime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of mailbox workers.
    pub workers: usize,
    /// Maximum queued jobs per worker.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let cfg = ResolutionConfig::default();
        assert_eq!(cfg.max_events, 1024);
        assert_eq!(cfg.max_rules, 512);
        assert_eq!(cfg.max_range_values, 500);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg = ResolutionConfig::from_json_str(r#"{"max_sessions": 8, "session_stripes": 0}"#).unwrap();
        assert_eq!(cfg.max_sessions, 8);
        assert_eq!(cfg.session_stripes, 1);
        assert_eq!(cfg.max_rules, 512);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = ResolutionConfig::from_json_str("{not json").unwrap_err();
        assert!(matches!(err, ResolutionError::Internal { .. }));
    }
}
