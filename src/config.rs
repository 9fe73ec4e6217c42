//! Node configuration: local network identity, orphan limits and consensus

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::consensus::Consensus;
use crate::constants::{MAIN_NETWORK_ID, MAX_ORPHAN_BLOCKS};
use crate::error::{ConsensusError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network this node accepts blocks for
    pub network_id: u32,
    /// Orphan blocks kept before the oldest are evicted
    pub max_orphan_blocks: usize,
    pub consensus: Consensus,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network_id: MAIN_NETWORK_ID,
            max_orphan_blocks: MAX_ORPHAN_BLOCKS,
            consensus: Consensus::default(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| ConsensusError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::from_json_str(&json)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConsensusError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_orphan_blocks == 0 {
            return Err(ConsensusError::Configuration(
                "max_orphan_blocks must be positive".to_string(),
            ));
        }
        self.consensus.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_override() {
        let config = Config::from_json_str(
            r#"{"network_id": 7, "consensus": {"coinbase_maturity_depth": 3}}"#,
        )
        .unwrap();
        assert_eq!(config.network_id, 7);
        assert_eq!(config.consensus.coinbase_maturity_depth, 3);
        assert_eq!(config.max_orphan_blocks, MAX_ORPHAN_BLOCKS);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = Config::from_json_str(r#"{"max_orphan_blocks": 0}"#);
        assert!(matches!(result, Err(ConsensusError::Configuration(_))));

        let result = Config::from_json_str(r#"{"consensus": {"max_nonce_size": 65}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(Config::from_json_str("{network_id").is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = Config {
            network_id: 12,
            ..Config::default()
        };
        let json = config.to_json_string().unwrap();
        assert_eq!(Config::from_json_str(&json).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = Config::load("/nonexistent/chain-rules.json").unwrap_err();
        assert!(err.to_string().contains("reading config"));
    }
}
