use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, EngineCommand, Error, ExchangeClient, Result, TradingMode};
use engine::{
    control_channel, optimize, run_backtest, BacktestOptions, BingxClient, LiveDriver,
    LiveSettings, Metric, OptimizerSettings, ParamGrid,
};
use paper::PaperClient;
use risk::RiskConfig;
use strategy::{build_strategy, StrategyConfig, StrategyFileConfig};

/// Optional `[optimize]` table in the strategy file. When present, backtest
/// mode runs a grid search instead of a single backtest.
#[derive(Debug, Deserialize)]
struct OptimizeFile {
    optimize: Option<OptimizeSection>,
}

#[derive(Debug, Deserialize)]
struct OptimizeSection {
    #[serde(default = "default_min_trades")]
    min_trades: usize,
    #[serde(default)]
    metric: Metric,
    #[serde(default = "default_top")]
    top: usize,
    grid: BTreeMap<String, Vec<toml::Value>>,
}

fn default_min_trades() -> usize {
    10
}

fn default_top() -> usize {
    10
}

#[tokio::main]
async fn main() -> ExitCode {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "QmlBot exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    info!(
        mode = %cfg.trading_mode,
        symbol = %cfg.symbol,
        interval = %cfg.interval,
        "QmlBot starting"
    );
    let file = StrategyFileConfig::load(&cfg.strategy_config_path)?;
    let risk = RiskConfig::from(&cfg);
    risk.validate()?;

    // ── Exchange client (injected based on TRADING_MODE) ──────────────────────
    let bingx = Arc::new(BingxClient::new(
        cfg.bingx_api_key.clone(),
        cfg.bingx_secret.clone(),
        cfg.use_testnet,
    )?);

    match cfg.trading_mode {
        TradingMode::Backtest => backtest(&cfg, &file.strategy, bingx, risk).await,
        TradingMode::Paper => {
            info!(slippage_bps = cfg.paper_slippage_bps, "Paper trading mode, using PaperClient");
            let client = Arc::new(PaperClient::with_market_data(
                bingx,
                cfg.account_equity,
                cfg.paper_slippage_bps,
            ));
            trade(&cfg, &file.strategy, client, risk).await
        }
        TradingMode::Live => {
            info!(testnet = cfg.use_testnet, "Live trading mode, using BingxClient");
            bingx.sync_time().await?;
            bingx
                .set_leverage(&cfg.symbol, cfg.leverage.round() as u32)
                .await?;
            trade(&cfg, &file.strategy, bingx, risk).await
        }
    }
}

async fn backtest(
    cfg: &Config,
    strategy_cfg: &StrategyConfig,
    client: Arc<BingxClient>,
    risk: RiskConfig,
) -> Result<()> {
    let bars = client
        .fetch_history(&cfg.symbol, cfg.interval, cfg.history_bars)
        .await?;
    info!(bars = bars.len(), "History loaded");

    let content = std::fs::read_to_string(&cfg.strategy_config_path)?;
    let sweep: OptimizeFile =
        toml::from_str(&content).map_err(|e| Error::Config(format!("[optimize]: {e}")))?;

    let Some(section) = sweep.optimize else {
        let strategy = build_strategy(strategy_cfg)?;
        let report = run_backtest(&bars, strategy, risk, &BacktestOptions { close_at_end: true })?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    };

    let grid = section
        .grid
        .into_iter()
        .fold(ParamGrid::new(), |grid, (key, values)| grid.axis(key, values));
    let settings = OptimizerSettings {
        min_trades: section.min_trades,
        metric: section.metric,
        options: BacktestOptions { close_at_end: true },
    };
    let base = strategy_cfg.clone();
    let runs = tokio::task::spawn_blocking(move || optimize(&bars, &base, &grid, &risk, &settings))
        .await
        .map_err(|e| Error::Other(format!("optimizer task failed: {e}")))??;

    let top = &runs[..section.top.min(runs.len())];
    println!("{}", serde_json::to_string_pretty(top)?);
    Ok(())
}

async fn trade(
    cfg: &Config,
    strategy_cfg: &StrategyConfig,
    client: Arc<dyn ExchangeClient>,
    risk: RiskConfig,
) -> Result<()> {
    let strategy = build_strategy(strategy_cfg)?;
    let driver = LiveDriver::new(client, strategy, risk, LiveSettings::from(cfg))?;
    let (handle, control) = control_channel();
    let mut task = tokio::spawn(driver.run(control));

    info!("Live driver started. Waiting for shutdown signal.");
    let joined = tokio::select! {
        joined = &mut task => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, stopping");
            handle.send(EngineCommand::Stop).await;
            task.await
        }
    };
    let result = joined.map_err(|e| Error::Other(format!("live driver task failed: {e}")))?;
    if let Err(e) = &result {
        warn!(error = %e, "Live driver ended with an error");
    }
    result
}
