//! Configuration for rule engines.

use serde::{Deserialize, Serialize};

/// When negation-as-absence conditions look at the fact store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NegationMode {
    /// Negations see every live fact at each match pass, so a fact asserted
    /// by one firing blocks negated rules that have not fired yet.
    #[default]
    PerFiring,
    /// Negations only see facts up to the one that started the episode;
    /// facts asserted during the episode take effect in the next one.
    PerEpisode,
}

/// Defines the configuration of one ruleset's engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on firings within one episode before it fails with
    /// `RuleCycleExceeded`.
    pub max_firings_per_episode: usize,
    /// How negations are evaluated during an episode.
    pub negation_mode: NegationMode,
    /// Reject facts whose values cannot be compared by an ordering test on
    /// the same field.
    pub strict_types: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_firings_per_episode: 10_000,
            negation_mode: NegationMode::PerFiring,
            strict_types: true,
        }
    }
}

impl EngineConfig {
    /// Type mismatches simply fail to match instead of rejecting the fact.
    pub fn permissive() -> Self {
        Self {
            strict_types: false,
            ..Default::default()
        }
    }

    /// Negations are evaluated once per externally posted fact.
    pub fn per_episode() -> Self {
        Self {
            negation_mode: NegationMode::PerEpisode,
            ..Default::default()
        }
    }

    /// Sets the firing bound per episode.
    pub fn with_max_firings(mut self, limit: usize) -> Self {
        self.max_firings_per_episode = limit;
        self
    }

    /// Sets when negations look at the fact store.
    pub fn with_negation_mode(mut self, mode: NegationMode) -> Self {
        self.negation_mode = mode;
        self
    }

    /// Enables or disables assertion-time type checks.
    pub fn with_strict_types(mut self, strict: bool) -> Self {
        self.strict_types = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.negation_mode, NegationMode::PerFiring);
        assert!(config.strict_types);
        assert!(config.max_firings_per_episode > 0);
    }

    #[test]
    fn test_presets() {
        assert!(!EngineConfig::permissive().strict_types);
        assert_eq!(
            EngineConfig::per_episode().negation_mode,
            NegationMode::PerEpisode
        );
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_firings(5)
            .with_negation_mode(NegationMode::PerEpisode)
            .with_strict_types(false);
        assert_eq!(config.max_firings_per_episode, 5);
        assert_eq!(config.negation_mode, NegationMode::PerEpisode);
        assert!(!config.strict_types);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"max_firings_per_episode": 12}"#).unwrap();
        assert_eq!(config.max_firings_per_episode, 12);
        assert!(config.strict_types);
    }
}
