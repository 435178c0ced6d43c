//! Configuration for the audit ledger

use crate::constants::{
    DEFAULT_DIFFICULTY, DEFAULT_HISTORY_LIMIT, DEFAULT_SEAL_THRESHOLD, HASH_HEX_SIZE,
};
use crate::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Leading zero hex characters required on every block hash
    pub difficulty: usize,

    /// Pending pool size that triggers a seal after a submission
    pub seal_threshold: usize,

    /// Period of the timer that seals any non-empty pool
    pub seal_interval_secs: u64,

    /// Period of the slower timer that seals once `forced_seal_min_pending` is reached
    pub forced_seal_interval_secs: u64,

    pub forced_seal_min_pending: usize,

    /// Upper bound on nonces tried per seal
    pub max_seal_iterations: u64,

    pub history_default_limit: usize,

    /// Start from a fresh genesis block when the stored snapshot is corrupt
    pub reset_on_corruption: bool,

    pub redaction_marker: String,

    /// Payload keys containing any of these fragments are redacted
    pub sensitive_key_fragments: Vec<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            seal_threshold: DEFAULT_SEAL_THRESHOLD,
            seal_interval_secs: 30,
            forced_seal_interval_secs: 300,
            forced_seal_min_pending: 5,
            max_seal_iterations: 50_000_000,
            history_default_limit: DEFAULT_HISTORY_LIMIT,
            reset_on_corruption: false,
            redaction_marker: "[REDACTED]".to_string(),
            sensitive_key_fragments: [
                "password",
                "passwd",
                "secret",
                "token",
                "api_key",
                "apikey",
                "private_key",
                "privatekey",
                "credential",
                "authorization",
                "pin_code",
                "cvv",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl LedgerConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: LedgerConfig = toml::from_str(&content)
            .map_err(|e| LedgerError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `AUDIT_*` environment variables.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse::<usize>("AUDIT_DIFFICULTY")? {
            self.difficulty = v;
        }
        if let Some(v) = env_parse::<usize>("AUDIT_SEAL_THRESHOLD")? {
            self.seal_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("AUDIT_SEAL_INTERVAL_SECS")? {
            self.seal_interval_secs = v;
        }
        if let Some(v) = env_parse::<bool>("AUDIT_RESET_ON_CORRUPTION")? {
            self.reset_on_corruption = v;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty > HASH_HEX_SIZE {
            return Err(LedgerError::Config(format!(
                "difficulty {} exceeds digest length {HASH_HEX_SIZE}",
                self.difficulty
            )));
        }
        if self.seal_threshold == 0 {
            return Err(LedgerError::Config("seal_threshold must be at least 1".into()));
        }
        if self.seal_interval_secs == 0 || self.forced_seal_interval_secs == 0 {
            return Err(LedgerError::Config("seal intervals must be non-zero".into()));
        }
        if self.max_seal_iterations == 0 {
            return Err(LedgerError::Config(
                "max_seal_iterations must be at least 1".into(),
            ));
        }
        if self.history_default_limit == 0 {
            return Err(LedgerError::Config(
                "history_default_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| LedgerError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_policy() {
        let config = LedgerConfig::default();
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.seal_threshold, 10);
        assert_eq!(config.seal_interval_secs, 30);
        assert_eq!(config.forced_seal_interval_secs, 300);
        assert_eq!(config.forced_seal_min_pending, 5);
        assert!(!config.reset_on_corruption);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: LedgerConfig = toml::from_str("difficulty = 3\nseal_threshold = 4\n").unwrap();
        assert_eq!(config.difficulty, 3);
        assert_eq!(config.seal_threshold, 4);
        assert_eq!(config.history_default_limit, 100);
        assert_eq!(config.redaction_marker, "[REDACTED]");
    }

    #[test]
    fn rejects_impossible_difficulty() {
        let config = LedgerConfig {
            difficulty: 65,
            ..LedgerConfig::default()
        };
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));
    }

    #[test]
    fn rejects_zero_threshold() {
        let config = LedgerConfig {
            seal_threshold: 0,
            ..LedgerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "difficulty = 1\nreset_on_corruption = true\n").unwrap();
        let config = LedgerConfig::from_file(&path).unwrap();
        assert_eq!(config.difficulty, 1);
        assert!(config.reset_on_corruption);
    }
}
