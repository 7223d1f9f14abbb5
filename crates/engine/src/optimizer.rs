//! Grid search over strategy parameters.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use common::{Bar, Error, Result};
use risk::RiskConfig;
use strategy::registry::known_params;
use strategy::{build_strategy, StrategyConfig};

use crate::backtest::{run_backtest, BacktestOptions, BacktestSummary};

/// Value lists per parameter. Keys are `indicators.<field>`,
/// `pattern.<field>` or a bare strategy param name such as `rr_ratio`.
#[derive(Debug, Clone, Default)]
pub struct ParamGrid {
    axes: Vec<(String, Vec<toml::Value>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn axis<V: Into<toml::Value>>(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.axes
            .push((key.into(), values.into_iter().map(Into::into).collect()));
        self
    }

    /// Number of combinations; an empty grid has exactly one (the base config).
    pub fn size(&self) -> usize {
        self.axes.iter().map(|(_, v)| v.len()).product()
    }

    /// Every combination, first axis varying slowest.
    pub fn combinations(&self) -> Vec<Vec<(String, toml::Value)>> {
        let mut combos: Vec<Vec<(String, toml::Value)>> = vec![Vec::new()];
        for (key, values) in &self.axes {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |v| {
                        let mut next = prefix.clone();
                        next.push((key.clone(), v.clone()));
                        next
                    })
                })
                .collect();
        }
        combos
    }
}

/// Ranking metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    TotalReturnPct,
    TotalPnl,
    WinRate,
    AvgPnl,
    /// Lower drawdown ranks higher.
    MaxDrawdownPct,
}

impl Metric {
    fn score(&self, s: &BacktestSummary) -> f64 {
        match self {
            Metric::TotalReturnPct => s.total_return_pct,
            Metric::TotalPnl => s.total_pnl,
            Metric::WinRate => s.win_rate,
            Metric::AvgPnl => s.avg_pnl,
            Metric::MaxDrawdownPct => -s.max_drawdown_pct,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    /// Runs with fewer trades rank below every run that reaches it.
    pub min_trades: usize,
    pub metric: Metric,
    pub options: BacktestOptions,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            min_trades: 10,
            metric: Metric::default(),
            options: BacktestOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationRun {
    pub params: Vec<(String, toml::Value)>,
    pub score: f64,
    pub meets_min_trades: bool,
    pub summary: BacktestSummary,
}

/// Apply one combination on top of `base`.
pub fn apply_params(base: &StrategyConfig, params: &[(String, toml::Value)]) -> Result<StrategyConfig> {
    let mut cfg = base.clone();
    for (key, value) in params {
        match key.split_once('.') {
            Some(("indicators", field)) => {
                cfg.indicators = with_field(&cfg.indicators, field, value)?;
            }
            Some(("pattern", field)) => {
                cfg.pattern = with_field(&cfg.pattern, field, value)?;
            }
            Some(_) => return Err(Error::Config(format!("unknown parameter section in '{key}'"))),
            None => {
                check_param_name(&cfg.strategy_type, key)?;
                cfg.params.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(cfg)
}

fn check_param_name(strategy_type: &str, key: &str) -> Result<()> {
    match known_params(strategy_type) {
        Some(known) if known.contains(&key) => Ok(()),
        Some(known) => Err(Error::Config(format!(
            "unknown parameter '{key}' for strategy type '{strategy_type}', expected one of {known:?}"
        ))),
        None => Err(Error::Config(format!("unknown strategy type '{strategy_type}'"))),
    }
}

// Round-trips the struct through a TOML table so any field can be set by name.
fn with_field<T>(current: &T, field: &str, value: &toml::Value) -> Result<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let mut table = toml::Value::try_from(current)
        .map_err(|e| Error::Config(e.to_string()))?;
    let map = table
        .as_table_mut()
        .ok_or_else(|| Error::Config("expected a table".into()))?;
    if !map.contains_key(field) {
        return Err(Error::Config(format!("unknown parameter '{field}'")));
    }
    map.insert(field.to_string(), value.clone());
    table
        .try_into()
        .map_err(|e| Error::Config(format!("parameter '{field}': {e}")))
}

/// Backtest every combination of `grid` in parallel and rank the results.
///
/// Combinations that fail validation (for example MACD fast >= slow) are
/// skipped with a warning. Results are sorted best first; ties keep grid order.
pub fn optimize(
    bars: &[Bar],
    base: &StrategyConfig,
    grid: &ParamGrid,
    risk: &RiskConfig,
    settings: &OptimizerSettings,
) -> Result<Vec<OptimizationRun>> {
    risk.validate()?;
    // A misspelled axis would otherwise be skipped in every combination.
    for (key, _) in &grid.axes {
        if !key.contains('.') {
            check_param_name(&base.strategy_type, key)?;
        }
    }
    let combos = grid.combinations();
    info!(combinations = combos.len(), bars = bars.len(), "Starting grid search");

    let mut runs: Vec<OptimizationRun> = combos
        .into_par_iter()
        .filter_map(|params| match run_one(bars, base, params.clone(), risk, settings) {
            Ok(run) => Some(run),
            Err(e) => {
                warn!(?params, error = %e, "Skipping parameter combination");
                None
            }
        })
        .collect();

    runs.sort_by(|a, b| {
        b.meets_min_trades
            .cmp(&a.meets_min_trades)
            .then(b.score.total_cmp(&a.score))
    });

    if let Some(best) = runs.first() {
        info!(
            params = ?best.params,
            score = best.score,
            trades = best.summary.total_trades,
            "Grid search finished"
        );
    } else {
        warn!("Grid search produced no valid runs");
    }
    Ok(runs)
}

fn run_one(
    bars: &[Bar],
    base: &StrategyConfig,
    params: Vec<(String, toml::Value)>,
    risk: &RiskConfig,
    settings: &OptimizerSettings,
) -> Result<OptimizationRun> {
    let cfg = apply_params(base, &params)?;
    let strategy = build_strategy(&cfg)?;
    let report = run_backtest(bars, strategy, risk.clone(), &settings.options)?;
    Ok(OptimizationRun {
        score: settings.metric.score(&report.summary),
        meets_min_trades: report.summary.total_trades >= settings.min_trades,
        summary: report.summary,
        params,
    })
}
