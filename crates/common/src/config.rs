use crate::{Error, GapPolicy, Interval, Result, TradingMode};

/// All process configuration, loaded from environment variables at startup.
/// Any invalid value is a configuration error reported before evaluation begins.
#[derive(Debug, Clone)]
pub struct Config {
    // Mode
    pub trading_mode: TradingMode,

    // Instrument
    pub symbol: String,
    pub interval: Interval,
    pub history_bars: usize,

    // Risk
    pub account_equity: f64,
    pub risk_per_trade: f64,
    pub leverage: f64,
    pub max_position_fraction: f64,
    pub quantity_step: Option<f64>,

    // Live feed
    pub gap_policy: GapPolicy,

    // Paper trading
    pub paper_slippage_bps: f64,

    // Exchange credentials (live mode only)
    pub bingx_api_key: String,
    pub bingx_secret: String,
    pub use_testnet: bool,

    // Strategy config file path
    pub strategy_config_path: String,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let trading_mode = match lookup("TRADING_MODE")
            .unwrap_or_else(|| "paper".to_string())
            .to_lowercase()
            .as_str()
        {
            "backtest" => TradingMode::Backtest,
            "paper" => TradingMode::Paper,
            "live" => TradingMode::Live,
            other => {
                return Err(Error::Config(format!(
                    "TRADING_MODE must be 'backtest', 'paper' or 'live', got: '{other}'"
                )))
            }
        };

        let (bingx_api_key, bingx_secret) = match trading_mode {
            TradingMode::Live => (
                required(&lookup, "BINGX_API_KEY")?,
                required(&lookup, "BINGX_API_SECRET")?,
            ),
            _ => (
                lookup("BINGX_API_KEY").unwrap_or_default(),
                lookup("BINGX_API_SECRET").unwrap_or_default(),
            ),
        };

        let interval = lookup("INTERVAL")
            .unwrap_or_else(|| "1h".to_string())
            .parse::<Interval>()?;

        let gap_policy = lookup("GAP_POLICY")
            .map(|v| v.parse::<GapPolicy>())
            .transpose()?
            .unwrap_or_default();

        let cfg = Config {
            trading_mode,
            symbol: lookup("SYMBOL").unwrap_or_else(|| "LTCUSDT".to_string()),
            interval,
            history_bars: parsed(&lookup, "HISTORY_BARS", 500)?,
            account_equity: parsed(&lookup, "ACCOUNT_EQUITY", 10_000.0)?,
            risk_per_trade: parsed(&lookup, "RISK_PER_TRADE", 0.01)?,
            leverage: parsed(&lookup, "LEVERAGE", 20.0)?,
            max_position_fraction: parsed(&lookup, "MAX_POSITION_FRACTION", 1.0)?,
            quantity_step: lookup("QUANTITY_STEP")
                .map(|v| parse_value::<f64>("QUANTITY_STEP", &v))
                .transpose()?,
            gap_policy,
            paper_slippage_bps: parsed(&lookup, "PAPER_SLIPPAGE_BPS", 10.0)?,
            bingx_api_key,
            bingx_secret,
            use_testnet: parsed(&lookup, "USE_TESTNET", true)?,
            strategy_config_path: lookup("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategy.toml".to_string()),
        };

        if cfg.history_bars == 0 {
            return Err(Error::Config("HISTORY_BARS must be > 0".into()));
        }
        if cfg.paper_slippage_bps < 0.0 {
            return Err(Error::Config("PAPER_SLIPPAGE_BPS must be >= 0".into()));
        }
        Ok(cfg)
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        Error::Config(format!(
            "Required environment variable '{key}' is not set. Check your .env file."
        ))
    })
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(v) => parse_value(key, &v),
        None => Ok(default),
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: '{value}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_paper_mode() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paper);
        assert_eq!(cfg.interval, Interval::H1);
        assert_eq!(cfg.gap_policy, GapPolicy::Fail);
        assert!(cfg.quantity_step.is_none());
    }

    #[test]
    fn live_mode_requires_credentials() {
        let err = Config::from_lookup(lookup(&[("TRADING_MODE", "live")])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("BINGX_API_KEY")));
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let err = Config::from_lookup(lookup(&[("LEVERAGE", "lots")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn parses_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("TRADING_MODE", "backtest"),
            ("INTERVAL", "15m"),
            ("GAP_POLICY", "backfill"),
            ("QUANTITY_STEP", "0.01"),
            ("USE_TESTNET", "false"),
        ]))
        .unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Backtest);
        assert_eq!(cfg.interval, Interval::M15);
        assert_eq!(cfg.gap_policy, GapPolicy::Backfill);
        assert_eq!(cfg.quantity_step, Some(0.01));
        assert!(!cfg.use_testnet);
    }
}
