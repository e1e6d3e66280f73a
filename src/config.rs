//! Node configuration
//!
//! Protocol rules live in [`crate::constants`]; everything an operator may
//! tune lives here and can be loaded from a JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::constants::{DEFAULT_DIFFICULTY, DEFAULT_MAX_ORPHANS};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Difficulty must be between 1 and 255 bits, got {0}")]
    InvalidDifficulty(u32),
}

/// Chain and node settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChainConfig {
    /// Directory holding the sled database
    pub data_dir: PathBuf,
    /// Required leading zero bits of every block hash
    pub difficulty: u32,
    /// Orphan pool capacity before the oldest entries are pruned
    pub max_orphans: usize,
    /// Log specification handed to the logger (e.g. "info", "ledger_core=debug")
    pub log_level: String,
    /// Use a throwaway in-memory store (tests, benchmarks)
    pub temporary: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("ledger_data"),
            difficulty: DEFAULT_DIFFICULTY,
            max_orphans: DEFAULT_MAX_ORPHANS,
            log_level: "info".to_string(),
            temporary: false,
        }
    }
}

impl ChainConfig {
    /// Load a configuration file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: ChainConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Throwaway store with the given difficulty
    pub fn temporary(difficulty: u32) -> Self {
        Self {
            difficulty,
            temporary: true,
            ..Self::default()
        }
    }

    pub fn with_data_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty == 0 || self.difficulty > 255 {
            return Err(ConfigError::InvalidDifficulty(self.difficulty));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ChainConfig = serde_json::from_str(r#"{"difficulty": 12}"#).unwrap();
        assert_eq!(config.difficulty, 12);
        assert_eq!(config.max_orphans, DEFAULT_MAX_ORPHANS);
        assert!(!config.temporary);
    }

    #[test]
    fn test_zero_difficulty_rejected() {
        let config = ChainConfig::temporary(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidDifficulty(0))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ledger_config_{}.json", std::process::id()));
        fs::write(&path, r#"{"data_dir": "/tmp/chain", "max_orphans": 7}"#).unwrap();

        let config = ChainConfig::load(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/chain"));
        assert_eq!(config.max_orphans, 7);
        assert_eq!(config.difficulty, DEFAULT_DIFFICULTY);

        fs::remove_file(path).unwrap();
    }
}
