pub mod config;
pub mod evaluator;
pub mod frame;
pub mod indicators;

pub use config::{PairConfig, StrategyConfig, StrategyFileConfig};
pub use evaluator::{columns, Condition, Evaluator, SignalResult};
pub use frame::IndicatorFrame;
