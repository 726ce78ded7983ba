//! Matching subsystem configuration
//!
//! Loaded from JSON by the node; every field has a default so a partial
//! document is enough.

use crate::errors::MovError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Fee output program in force for an inclusive height range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardProgram {
    pub begin_height: u64,
    pub end_height: u64,
    /// Hex-encoded control program
    pub program: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovConfig {
    /// Blocks below are ignored; the block at this height initializes the store.
    pub start_block_height: u64,
    /// Blocks strictly below validate fees with the legacy range rule.
    pub legacy_fee_epoch_height: u64,
    /// Upper fee bound of the legacy rule, as a fraction of the receive amount.
    pub legacy_max_fee_rate: Decimal,
    pub reward_programs: Vec<RewardProgram>,
    /// Collector worker tasks.
    pub worker_num: usize,
    pub trade_pair_queue_size: usize,
    pub result_queue_size: usize,
    /// Gas charged per serialized byte of a matched tx.
    pub storage_gas_rate: u64,
    /// Gas charged per input of a matched tx.
    pub vm_gas_per_input: u64,
}

impl Default for MovConfig {
    fn default() -> Self {
        Self {
            start_block_height: 0,
            legacy_fee_epoch_height: 0,
            legacy_max_fee_rate: Decimal::new(5, 2),
            reward_programs: Vec::new(),
            worker_num: 32,
            trade_pair_queue_size: 32,
            result_queue_size: 32,
            storage_gas_rate: 1,
            vm_gas_per_input: 1000,
        }
    }
}

impl MovConfig {
    pub fn from_json_str(json: &str) -> Result<Self, MovError> {
        let config: Self = serde_json::from_str(json).map_err(|e| MovError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MovError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MovError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), MovError> {
        if self.worker_num == 0 {
            return Err(MovError::Config("worker_num must be positive".into()));
        }
        if self.trade_pair_queue_size == 0 || self.result_queue_size == 0 {
            return Err(MovError::Config("queue sizes must be positive".into()));
        }
        if self.legacy_max_fee_rate.is_sign_negative() {
            return Err(MovError::Config("legacy_max_fee_rate must not be negative".into()));
        }
        for rp in &self.reward_programs {
            if rp.begin_height > rp.end_height {
                return Err(MovError::Config(format!(
                    "reward program range {}..={} is empty",
                    rp.begin_height, rp.end_height
                )));
            }
            hex::decode(&rp.program)
                .map_err(|e| MovError::Config(format!("reward program {}: {}", rp.program, e)))?;
        }
        Ok(())
    }

    /// Hex reward program whose range contains `height`.
    pub fn reward_program_hex(&self, height: u64) -> Option<&str> {
        self.reward_programs
            .iter()
            .find(|rp| rp.begin_height <= height && height <= rp.end_height)
            .map(|rp| rp.program.as_str())
    }

    pub fn reward_program(&self, height: u64) -> Result<Vec<u8>, MovError> {
        let program = self
            .reward_program_hex(height)
            .ok_or(MovError::NotConfiguredRewardProgram)?;
        hex::decode(program).map_err(|_| MovError::NotConfiguredRewardProgram)
    }

    /// Fail unless `program` is the configured reward program for `height`.
    pub fn validate_reward_program(&self, height: u64, program: &[u8]) -> Result<(), MovError> {
        let expected = self.reward_program(height)?;
        if expected != program {
            return Err(MovError::RewardProgramIsWrong(format!(
                "height {} expects {}, got {}",
                height,
                hex::encode(&expected),
                hex::encode(program)
            )));
        }
        Ok(())
    }
}
