// configuration for a distributed run. every worker must be handed the same
// configuration, the transport supplies the worker count and rank.

use crate::error::{ConfigError, Result};
use crate::fusion::MAX_FUSED_QUBITS;
use serde::{Deserialize, Serialize};
use std::path::Path;

// data distribution strategy, see policy.rs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    Simple,
    Unit {
        unit_qubits: usize,
        processes_per_unit: usize,
    },
    General,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub total_qubits: usize,
    pub page_qubits: usize,
    pub policy: PolicyConfig,
    // runtime bound on fused qubits, never above MAX_FUSED_QUBITS
    pub fusion_qubit_limit: usize,
    // seed for measurement and sampling, drawn on rank 0 only
    pub seed: u64,
    // receive timeout for exchanges and collectives
    pub exchange_timeout_ms: u64,
    // realise SWAP gates as table swaps instead of data movement
    pub swap_via_permutation: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            total_qubits: 10,
            page_qubits: 0,
            policy: PolicyConfig::Simple,
            fusion_qubit_limit: MAX_FUSED_QUBITS,
            seed: 0,
            exchange_timeout_ms: 30_000,
            swap_via_permutation: true,
        }
    }
}

impl SimulatorConfig {
    pub fn new(total_qubits: usize) -> Self {
        Self {
            total_qubits,
            ..Self::default()
        }
    }

    pub fn with_page_qubits(mut self, page_qubits: usize) -> Self {
        self.page_qubits = page_qubits;
        self
    }

    pub fn with_policy(mut self, policy: PolicyConfig) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_fusion_limit(mut self, limit: usize) -> Self {
        self.fusion_qubit_limit = limit;
        self
    }

    pub fn with_swap_via_permutation(mut self, enabled: bool) -> Self {
        self.swap_via_permutation = enabled;
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| ConfigError::InvalidConfig(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            ConfigError::InvalidConfig(format!("failed to serialize config: {}", e)).into()
        })
    }

    // checks that do not depend on the worker count. topology checks happen
    // when the policy is built.
    pub fn validate(&self) -> Result<()> {
        if self.total_qubits == 0 {
            return Err(ConfigError::InvalidConfig("total_qubits must be at least 1".into()).into());
        }
        if self.total_qubits >= usize::BITS as usize {
            return Err(ConfigError::InvalidConfig(format!(
                "{} qubits cannot be addressed with {}-bit indices",
                self.total_qubits,
                usize::BITS
            ))
            .into());
        }
        if self.page_qubits > self.total_qubits {
            return Err(ConfigError::UnsupportedPageCount {
                policy: self.policy.name(),
                requested: self.page_qubits,
                supported: self.total_qubits,
            }
            .into());
        }
        if self.fusion_qubit_limit == 0 || self.fusion_qubit_limit > MAX_FUSED_QUBITS {
            return Err(ConfigError::FusionLimitExceeded {
                requested: self.fusion_qubit_limit,
                limit: MAX_FUSED_QUBITS,
            }
            .into());
        }
        if self.exchange_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig("exchange_timeout_ms must be positive".into()).into());
        }
        Ok(())
    }
}

impl PolicyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyConfig::Simple => "simple",
            PolicyConfig::Unit { .. } => "unit",
            PolicyConfig::General => "general",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SimulatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fusion_qubit_limit, MAX_FUSED_QUBITS);
    }

    #[test]
    fn test_json_round_trip_with_unit_policy() {
        let config = SimulatorConfig::new(12)
            .with_page_qubits(2)
            .with_policy(PolicyConfig::Unit {
                unit_qubits: 3,
                processes_per_unit: 2,
            })
            .with_seed(7);
        let text = config.to_json_pretty().unwrap();
        assert!(text.contains("\"kind\": \"unit\""));
        let parsed = SimulatorConfig::from_json_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let parsed = SimulatorConfig::from_json_str(r#"{ "total_qubits": 4 }"#).unwrap();
        assert_eq!(parsed.total_qubits, 4);
        assert_eq!(parsed.policy, PolicyConfig::Simple);
        assert!(parsed.swap_via_permutation);
    }

    #[test]
    fn test_rejects_fusion_limit_above_ceiling() {
        let config = SimulatorConfig::new(4).with_fusion_limit(MAX_FUSED_QUBITS + 1);
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rejects_zero_qubits() {
        assert!(SimulatorConfig::new(0).validate().is_err());
        assert!(SimulatorConfig::from_json_str("{ not json").is_err());
    }
}
