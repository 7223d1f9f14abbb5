pub mod backtest;
pub mod bingx;
pub mod evaluator;
pub mod executor;
pub mod lifecycle;
pub mod live;
pub mod optimizer;

pub use backtest::{run_backtest, BacktestOptions, BacktestReport, BacktestSummary};
pub use bingx::BingxClient;
pub use evaluator::{Evaluator, StepOutcome};
pub use executor::OrderExecutor;
pub use lifecycle::{control_channel, EngineControl, EngineHandle};
pub use live::{LiveDriver, LiveSettings};
pub use optimizer::{optimize, Metric, OptimizerSettings, ParamGrid};
