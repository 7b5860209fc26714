//! Operator tuning loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::ops::MAX_BATCH;

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Largest static shared-memory block a kernel may request.
const MAX_STATIC_SMEM_BYTES: u32 = 48 * 1024;
const MAX_THREADS_PER_BLOCK: u32 = 1024;

/// Arithmetic used by the Pillow-style resize.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PillowPrecision {
    /// f32 weights and accumulators for every element type.
    #[default]
    Float,
    /// 22-bit fixed-point weights with per-pass clipping; `u8` only.
    Fixed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub config_schema_version: u32,
    /// `(x, y)` threads per block for every 2-D kernel.
    pub block_dim: [u32; 2],
    /// Per-block budget for staging one axis' coefficients in shared memory.
    pub coeff_smem_bytes: u32,
    /// Capacity of an erase operator instance.
    pub max_erase_regions: usize,
    /// Capacity of rotate operator instances.
    pub max_varshape_batch: usize,
    pub pillow_precision: PillowPrecision,
    /// Idle workspaces kept per size bucket.
    pub pool_max_per_bucket: usize,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            config_schema_version: CONFIG_SCHEMA_VERSION,
            block_dim: [16, 16],
            coeff_smem_bytes: 4096,
            max_erase_regions: 64,
            max_varshape_batch: 256,
            pillow_precision: PillowPrecision::Float,
            pool_max_per_bucket: 32,
        }
    }
}

impl OperatorConfig {
    pub fn from_json_str(data: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(data).map_err(|err| {
            EngineError::InvalidConfig(format!("Invalid operator config JSON: {err}"))
        })?;

        let Some(version_value) = value.get("config_schema_version") else {
            return Err(EngineError::InvalidConfig(format!(
                "Config schema mismatch: expected {}, got missing",
                CONFIG_SCHEMA_VERSION
            )));
        };
        let Some(version) = version_value.as_u64() else {
            return Err(EngineError::InvalidConfig(format!(
                "Config schema mismatch: expected {}, got non-integer",
                CONFIG_SCHEMA_VERSION
            )));
        };
        if version != CONFIG_SCHEMA_VERSION as u64 {
            return Err(EngineError::InvalidConfig(format!(
                "Config schema mismatch: expected {}, got {}",
                CONFIG_SCHEMA_VERSION, version
            )));
        }

        let config: Self = serde_json::from_value(value).map_err(|err| {
            EngineError::InvalidConfig(format!("Invalid operator config JSON: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|err| {
            EngineError::InvalidConfig(format!(
                "Failed to read operator config from {}: {err}",
                path.display()
            ))
        })?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.config_schema_version != CONFIG_SCHEMA_VERSION {
            return Err(EngineError::InvalidConfig(format!(
                "Config schema mismatch: expected {}, got {}",
                CONFIG_SCHEMA_VERSION, self.config_schema_version
            )));
        }
        let [bx, by] = self.block_dim;
        let threads = bx.checked_mul(by).unwrap_or(u32::MAX);
        if bx == 0 || by == 0 || threads > MAX_THREADS_PER_BLOCK {
            return Err(EngineError::InvalidConfig(format!(
                "block_dim {bx}x{by} must be non-empty with at most {MAX_THREADS_PER_BLOCK} threads"
            )));
        }
        // The kernels declare a shared array of this many bytes; it cannot be empty.
        if self.coeff_smem_bytes < 4
            || self.coeff_smem_bytes % 4 != 0
            || self.coeff_smem_bytes > MAX_STATIC_SMEM_BYTES
        {
            return Err(EngineError::InvalidConfig(format!(
                "coeff_smem_bytes {} must be a non-zero multiple of 4 and at most {MAX_STATIC_SMEM_BYTES}",
                self.coeff_smem_bytes
            )));
        }
        for (name, value) in [
            ("max_erase_regions", self.max_erase_regions),
            ("max_varshape_batch", self.max_varshape_batch),
        ] {
            if value == 0 || value > MAX_BATCH {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} {value} must be in 1..={MAX_BATCH}"
                )));
            }
        }
        if self.pool_max_per_bucket == 0 {
            return Err(EngineError::InvalidConfig(
                "pool_max_per_bucket must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// `-D` definitions every kernel module is compiled with.
    pub fn nvrtc_defines(&self) -> Vec<String> {
        vec![format!("-DCOEFF_SMEM_BYTES={}", self.coeff_smem_bytes)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn defaults_validate() {
        OperatorConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let raw = format!(
            r#"{{"config_schema_version":{},"pillow_precision":"fixed","block_dim":[32,8]}}"#,
            CONFIG_SCHEMA_VERSION
        );
        let cfg = OperatorConfig::from_json_str(&raw).expect("valid config");
        assert_eq!(cfg.pillow_precision, PillowPrecision::Fixed);
        assert_eq!(cfg.block_dim, [32, 8]);
        assert_eq!(cfg.coeff_smem_bytes, 4096);
        assert_eq!(cfg.nvrtc_defines(), vec!["-DCOEFF_SMEM_BYTES=4096".to_string()]);
    }

    #[test]
    fn from_json_rejects_missing_schema_version() {
        let err = OperatorConfig::from_json_str("{}").expect_err("missing schema must fail");
        assert!(err.to_string().contains("Config schema mismatch"));
        assert_eq!(err.status(), Status::InvalidParameter);
    }

    #[test]
    fn from_json_rejects_schema_version_mismatch() {
        let raw = format!(
            "{{\"config_schema_version\":{}}}",
            CONFIG_SCHEMA_VERSION + 1
        );
        let err = OperatorConfig::from_json_str(&raw).expect_err("mismatch schema must fail");
        assert!(err.to_string().contains("Config schema mismatch"));
    }

    #[test]
    fn validation_rejects_oversized_blocks_and_smem() {
        let cfg = OperatorConfig {
            block_dim: [64, 32],
            ..OperatorConfig::default()
        };
        assert!(cfg.validate().unwrap_err().to_string().contains("block_dim"));

        let cfg = OperatorConfig {
            coeff_smem_bytes: 4098,
            ..OperatorConfig::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = OperatorConfig {
            max_erase_regions: 0,
            ..OperatorConfig::default()
        };
        assert!(cfg.validate().unwrap_err().to_string().contains("max_erase_regions"));
    }

    #[test]
    fn overflowing_block_dims_are_rejected() {
        let err = OperatorConfig::from_json_str(
            r#"{"config_schema_version":1,"block_dim":[65536,65536]}"#,
        )
        .expect_err("65536x65536 threads cannot fit a block");
        assert_eq!(err.status(), Status::InvalidParameter);
        assert!(err.to_string().contains("block_dim"));

        let cfg = OperatorConfig {
            block_dim: [u32::MAX, 2],
            ..OperatorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn coefficient_staging_needs_at_least_one_word() {
        let at = |coeff_smem_bytes| OperatorConfig {
            coeff_smem_bytes,
            ..OperatorConfig::default()
        };
        let err = at(0).validate().expect_err("empty shared array");
        assert!(err.to_string().contains("coeff_smem_bytes"));
        assert!(at(2).validate().is_err());
        at(4).validate().expect("one f32 word is enough");
    }
}
