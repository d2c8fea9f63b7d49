//! Configuration structures for the ZModSim simulator.
//!
//! Supports JSON deserialization (`-f/--config`) with every field optional,
//! so a config file may set only the fields it cares about. The CLI
//! collaborator merges the file over built-in defaults, then merges its own
//! flag overrides on top (CLI > file > defaults), and finally calls
//! [`SimulatorConfig::validate`] before handing the record to the supervisor.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-bank auto-increment configuration (holding or input registers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoIncrementConfig {
    /// Whether the background worker for this bank runs at all.
    pub enabled: bool,
    /// Target addresses, in the order ticks apply to them. Duplicates allowed.
    pub addresses: Vec<u16>,
    /// Milliseconds between ticks. Must be `> 0` when `enabled`.
    pub interval_ms: u64,
    /// Step added on each tick.
    pub increment: u16,
    /// Wrap-to-zero threshold.
    pub max: u16,
}

impl Default for AutoIncrementConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addresses: Vec::new(),
            interval_ms: 1000,
            increment: 1,
            max: u16::MAX,
        }
    }
}

/// Sizes of the four register banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankSizes {
    /// Number of coils (read/write bits).
    pub coils: u16,
    /// Number of discrete inputs (read-only bits).
    pub discrete: u16,
    /// Number of holding registers (read/write words).
    pub holding: u16,
    /// Number of input registers (read-only words).
    pub input: u16,
}

impl Default for BankSizes {
    fn default() -> Self {
        Self {
            coils: 100,
            discrete: 100,
            holding: 100,
            input: 100,
        }
    }
}

/// Fully materialized, validated configuration the core consumes.
///
/// Constructed once by the CLI collaborator and handed to the supervisor by
/// shared reference; read-only for the remainder of the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Modbus slave address, `1..=247`.
    pub unit_id: u8,
    /// TCP port to listen on.
    pub port: u16,
    /// Log verbosity forwarded to the tracing subscriber (`trace`..`error`).
    pub log_level: String,
    /// Sizes of the four register banks.
    pub bank_sizes: BankSizes,
    /// Auto-increment configuration for holding registers.
    pub holding_auto: AutoIncrementConfig,
    /// Auto-increment configuration for input registers.
    pub input_auto: AutoIncrementConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            unit_id: 1,
            port: 502,
            log_level: "info".to_string(),
            bank_sizes: BankSizes::default(),
            holding_auto: AutoIncrementConfig::default(),
            input_auto: AutoIncrementConfig::default(),
        }
    }
}

impl SimulatorConfig {
    /// Validate every invariant spec.md §3 and §4.7 require before the
    /// supervisor is allowed to start.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant encountered.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.unit_id == 0 || self.unit_id > 247 {
            return Err(ConfigError::OutOfRange {
                field: "unit_id",
                range: "1..=247",
                value: self.unit_id.to_string(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::OutOfRange {
                field: "port",
                range: "1..=65535",
                value: self.port.to_string(),
            });
        }
        self.validate_auto("holding", &self.holding_auto)?;
        self.validate_auto("input", &self.input_auto)?;
        Ok(())
    }

    fn validate_auto(&self, bank: &'static str, auto: &AutoIncrementConfig) -> ConfigResult<()> {
        if !auto.enabled {
            return Ok(());
        }
        if auto.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval { bank });
        }
        if auto.increment > auto.max {
            return Err(ConfigError::IncrementExceedsMax {
                bank,
                increment: auto.increment,
                max: auto.max,
            });
        }
        Ok(())
    }

    /// Serialize this record to pretty-printed JSON (used by `--generate-config`
    /// and by tests round-tripping a config file).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails (should not happen for this type).
    pub fn to_json_pretty(&self) -> ConfigResult<String> {
        serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Partial configuration as deserialized directly from a JSON config file.
///
/// Every field is optional so a config file can override only what it cares
/// about; absent fields leave the corresponding [`SimulatorConfig`] default
/// untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfigFile {
    /// See [`SimulatorConfig::unit_id`].
    pub unit_id: Option<u8>,
    /// See [`SimulatorConfig::port`].
    pub port: Option<u16>,
    /// See [`SimulatorConfig::log_level`].
    pub log_level: Option<String>,
    /// See [`SimulatorConfig::bank_sizes`]; each field independently optional.
    pub bank_sizes: Option<BankSizesFile>,
    /// See [`SimulatorConfig::holding_auto`].
    pub holding_auto: Option<AutoIncrementConfig>,
    /// See [`SimulatorConfig::input_auto`].
    pub input_auto: Option<AutoIncrementConfig>,
}

/// Optional-field mirror of [`BankSizes`] for partial JSON overrides.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BankSizesFile {
    /// See [`BankSizes::coils`].
    pub coils: Option<u16>,
    /// See [`BankSizes::discrete`].
    pub discrete: Option<u16>,
    /// See [`BankSizes::holding`].
    pub holding: Option<u16>,
    /// See [`BankSizes::input`].
    pub input: Option<u16>,
}

impl SimulatorConfigFile {
    /// Load and parse a config file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are not valid JSON matching
    /// this shape.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Merge this file's overrides onto `base`, returning the merged record.
    ///
    /// Fields left `None` in the file keep `base`'s value untouched.
    #[must_use]
    pub fn merge_into(self, mut base: SimulatorConfig) -> SimulatorConfig {
        if let Some(unit_id) = self.unit_id {
            base.unit_id = unit_id;
        }
        if let Some(port) = self.port {
            base.port = port;
        }
        if let Some(log_level) = self.log_level {
            base.log_level = log_level;
        }
        if let Some(sizes) = self.bank_sizes {
            if let Some(v) = sizes.coils {
                base.bank_sizes.coils = v;
            }
            if let Some(v) = sizes.discrete {
                base.bank_sizes.discrete = v;
            }
            if let Some(v) = sizes.holding {
                base.bank_sizes.holding = v;
            }
            if let Some(v) = sizes.input {
                base.bank_sizes.input = v;
            }
        }
        if let Some(holding_auto) = self.holding_auto {
            base.holding_auto = holding_auto;
        }
        if let Some(input_auto) = self.input_auto {
            base.input_auto = input_auto;
        }
        base
    }
}

/// Parse a register-list expression into a materialized, order-preserving
/// list of addresses.
///
/// Grammar: `item (',' item)*` where `item := u16 | u16 '-' u16`. A range's
/// bounds are inclusive and duplicates across items are preserved (each
/// occurrence increments once per auto-increment tick, per spec.md §3).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidRegisterList`] if any item fails to parse
/// as `u16` or a range has its bounds reversed.
pub fn parse_register_list(expr: &str) -> ConfigResult<Vec<u16>> {
    let mut addresses = Vec::new();
    for item in expr.split(',') {
        let item = item.trim();
        if item.is_empty() {
            return Err(ConfigError::InvalidRegisterList(
                expr.to_string(),
                "empty item".to_string(),
            ));
        }
        match item.split_once('-') {
            Some((lo, hi)) => {
                let lo: u16 = lo.trim().parse().map_err(|_| {
                    ConfigError::InvalidRegisterList(
                        expr.to_string(),
                        format!("{lo:?} is not a valid u16"),
                    )
                })?;
                let hi: u16 = hi.trim().parse().map_err(|_| {
                    ConfigError::InvalidRegisterList(
                        expr.to_string(),
                        format!("{hi:?} is not a valid u16"),
                    )
                })?;
                if lo > hi {
                    return Err(ConfigError::InvalidRegisterList(
                        expr.to_string(),
                        format!("range start {lo} exceeds end {hi}"),
                    ));
                }
                addresses.extend(lo..=hi);
            }
            None => {
                let addr: u16 = item.parse().map_err(|_| {
                    ConfigError::InvalidRegisterList(
                        expr.to_string(),
                        format!("{item:?} is not a valid u16"),
                    )
                })?;
                addresses.push(addr);
            }
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(SimulatorConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_unit_id_zero() {
        let mut cfg = SimulatorConfig::default();
        cfg.unit_id = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange { field: "unit_id", .. })
        ));
    }

    #[test]
    fn rejects_unit_id_above_247() {
        let mut cfg = SimulatorConfig::default();
        cfg.unit_id = 248;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_interval_when_enabled() {
        let mut cfg = SimulatorConfig::default();
        cfg.holding_auto.enabled = true;
        cfg.holding_auto.interval_ms = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroInterval { bank: "holding" })
        ));
    }

    #[test]
    fn ignores_zero_interval_when_disabled() {
        let mut cfg = SimulatorConfig::default();
        cfg.holding_auto.interval_ms = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_increment_exceeding_max() {
        let mut cfg = SimulatorConfig::default();
        cfg.input_auto.enabled = true;
        cfg.input_auto.interval_ms = 10;
        cfg.input_auto.increment = 20;
        cfg.input_auto.max = 5;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::IncrementExceedsMax { bank: "input", .. })
        ));
    }

    #[test]
    fn parses_single_item() {
        assert_eq!(parse_register_list("5").unwrap(), vec![5]);
    }

    #[test]
    fn parses_range() {
        assert_eq!(parse_register_list("2-4").unwrap(), vec![2, 3, 4]);
    }

    #[test]
    fn parses_mixed_list_preserving_duplicates() {
        assert_eq!(
            parse_register_list("0,2-4,2").unwrap(),
            vec![0, 2, 3, 4, 2]
        );
    }

    #[test]
    fn rejects_reversed_range() {
        assert!(parse_register_list("4-2").is_err());
    }

    #[test]
    fn rejects_garbage_item() {
        assert!(parse_register_list("0,abc").is_err());
    }

    #[test]
    fn file_merge_overrides_only_set_fields() {
        let file = SimulatorConfigFile {
            port: Some(1502),
            ..Default::default()
        };
        let merged = file.merge_into(SimulatorConfig::default());
        assert_eq!(merged.port, 1502);
        assert_eq!(merged.unit_id, 1);
    }

    #[test]
    fn roundtrip_json() {
        let cfg = SimulatorConfig::default();
        let json = cfg.to_json_pretty().unwrap();
        let parsed: SimulatorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, parsed);
    }
}
