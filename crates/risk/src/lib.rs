pub mod manager;

pub use manager::{PositionManager, RiskConfig};
