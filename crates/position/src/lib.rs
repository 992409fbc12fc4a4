pub mod pair;
pub mod single;

pub use pair::{spread_zscore, Leg, LegOrder, PairSettings, PairTracker};
pub use single::{OpenLot, OrderIntent, PositionConfig, PositionTracker};
