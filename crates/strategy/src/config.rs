use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use common::{Error, Result};

use crate::indicators::IndicatorConfig;
use crate::patterns::PatternConfig;

/// Top-level strategy config file (TOML).
///
/// Example `config/strategy.toml`:
/// ```toml
/// [strategy]
/// type = "macd_ema_bb"
/// name = "LTC MACD/EMA/BB"
///
/// [strategy.indicators]
/// ema_period = 100
/// bb_period = 20
///
/// [strategy.pattern]
/// order = 3
/// recency = 20
///
/// [strategy.params]
/// rr_ratio = 2.0
/// use_qml = false
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyFileConfig {
    pub strategy: StrategyConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyConfig {
    /// Strategy type identifier: "macd_ema_bb" or "qml_reversal".
    #[serde(rename = "type")]
    pub strategy_type: String,
    /// Human-readable name shown in logs and reports.
    pub name: String,
    #[serde(default)]
    pub indicators: IndicatorConfig,
    #[serde(default)]
    pub pattern: PatternConfig,
    /// Strategy-specific parameters.
    #[serde(default)]
    pub params: HashMap<String, toml::Value>,
}

impl StrategyFileConfig {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read strategy config at '{path}': {e}"))
        })?;
        content.parse()
    }
}

impl std::str::FromStr for StrategyFileConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::Config(format!("Invalid strategy config: {e}")))
    }
}
