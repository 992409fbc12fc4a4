//! Windowed indicator math over bar sequences.
//!
//! Every function returns a series aligned index-for-index to its input;
//! positions before the lookback window fills are `None`. Evaluators must
//! treat `None` as "not evaluable", never as a false condition.

pub mod atr;
pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod vwap;

pub use atr::atr;
pub use bollinger::{bollinger, BollingerBands};
pub use macd::{macd, Macd};
pub use moving_average::{ema, rolling_median, sma};
pub use rsi::rsi;
pub use vwap::vwap;
