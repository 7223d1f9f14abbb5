use std::collections::HashMap;

use tracing::info;

use common::{Error, Result};

use crate::config::StrategyConfig;
use crate::macd_ema_bb::{MacdEmaBbParams, MacdEmaBbStrategy};
use crate::qml::{QmlReversalParams, QmlReversalStrategy};
use crate::Strategy;

/// Strategy type identifiers accepted in `[strategy] type`.
pub const STRATEGY_TYPES: &[&str] = &["macd_ema_bb", "qml_reversal"];

const MACD_EMA_BB_PARAMS: &[&str] = &[
    "atr_sl_mult",
    "rr_ratio",
    "use_qml",
    "use_qml_extreme_sl",
    "use_vol_filter",
    "vol_filter_mult",
    "squeeze_threshold",
    "use_exit_rules",
    "use_trailing",
];

const QML_REVERSAL_PARAMS: &[&str] = &["atr_sl_mult", "rr_ratio", "use_trend_filter", "use_head_stop"];

/// Parameter names accepted in `[strategy.params]` for a strategy type.
pub fn known_params(strategy_type: &str) -> Option<&'static [&'static str]> {
    match strategy_type {
        "macd_ema_bb" => Some(MACD_EMA_BB_PARAMS),
        "qml_reversal" => Some(QML_REVERSAL_PARAMS),
        _ => None,
    }
}

/// Build the configured strategy. Unknown types, unknown parameter names and
/// invalid parameter values are configuration errors.
pub fn build_strategy(cfg: &StrategyConfig) -> Result<Box<dyn Strategy>> {
    let p = &cfg.params;
    if let Some(known) = known_params(&cfg.strategy_type) {
        check_param_names(p, known, &cfg.strategy_type)?;
    }
    let strategy: Box<dyn Strategy> = match cfg.strategy_type.as_str() {
        "macd_ema_bb" => {
            let d = MacdEmaBbParams::default();
            let params = MacdEmaBbParams {
                atr_sl_mult: param_f64(p, "atr_sl_mult", d.atr_sl_mult)?,
                rr_ratio: param_f64(p, "rr_ratio", d.rr_ratio)?,
                use_qml: param_bool(p, "use_qml", d.use_qml)?,
                use_qml_extreme_sl: param_bool(p, "use_qml_extreme_sl", d.use_qml_extreme_sl)?,
                use_vol_filter: param_bool(p, "use_vol_filter", d.use_vol_filter)?,
                vol_filter_mult: param_f64(p, "vol_filter_mult", d.vol_filter_mult)?,
                squeeze_threshold: param_f64(p, "squeeze_threshold", d.squeeze_threshold)?,
                use_exit_rules: param_bool(p, "use_exit_rules", d.use_exit_rules)?,
                use_trailing: param_bool(p, "use_trailing", d.use_trailing)?,
            };
            Box::new(MacdEmaBbStrategy::new(
                cfg.name.clone(),
                cfg.indicators.clone(),
                cfg.pattern.clone(),
                params,
            )?)
        }
        "qml_reversal" => {
            let d = QmlReversalParams::default();
            let params = QmlReversalParams {
                atr_sl_mult: param_f64(p, "atr_sl_mult", d.atr_sl_mult)?,
                rr_ratio: param_f64(p, "rr_ratio", d.rr_ratio)?,
                use_trend_filter: param_bool(p, "use_trend_filter", d.use_trend_filter)?,
                use_head_stop: param_bool(p, "use_head_stop", d.use_head_stop)?,
            };
            Box::new(QmlReversalStrategy::new(
                cfg.name.clone(),
                cfg.indicators.clone(),
                cfg.pattern.clone(),
                params,
            )?)
        }
        other => {
            return Err(Error::Config(format!(
                "unknown strategy type '{other}', expected one of {STRATEGY_TYPES:?}"
            )))
        }
    };
    info!(
        name = %strategy.name(),
        kind = %cfg.strategy_type,
        warmup = strategy.warmup(),
        "Built strategy"
    );
    Ok(strategy)
}

fn check_param_names(
    params: &HashMap<String, toml::Value>,
    known: &[&str],
    strategy_type: &str,
) -> Result<()> {
    let mut unknown: Vec<&str> = params
        .keys()
        .map(String::as_str)
        .filter(|k| !known.contains(k))
        .collect();
    if unknown.is_empty() {
        return Ok(());
    }
    unknown.sort_unstable();
    Err(Error::Config(format!(
        "unknown param(s) {unknown:?} for strategy type '{strategy_type}', expected some of {known:?}"
    )))
}

// Integers are accepted where floats are expected so `rr_ratio = 2` works.
fn param_f64(params: &HashMap<String, toml::Value>, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Float(v)) => Ok(*v),
        Some(toml::Value::Integer(v)) => Ok(*v as f64),
        Some(other) => Err(Error::Config(format!("param '{key}' must be a number, got {other}"))),
    }
}

fn param_bool(params: &HashMap<String, toml::Value>, key: &str, default: bool) -> Result<bool> {
    match params.get(key) {
        None => Ok(default),
        Some(toml::Value::Boolean(v)) => Ok(*v),
        Some(other) => Err(Error::Config(format!("param '{key}' must be a boolean, got {other}"))),
    }
}
