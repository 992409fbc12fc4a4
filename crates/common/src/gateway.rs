use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Bar, Fill, OpenPosition, Order, Result, Timeframe};

/// Abstraction over the historical/recent bar feed.
///
/// An empty result is not an error: the runner skips the cycle and
/// retries on the next poll.
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>>;
}

/// Abstraction over the order-execution venue.
///
/// `AlpacaClient` implements this for live trading and `PaperGateway`
/// for simulation. Position state machines never transition on the
/// strength of a submission alone; the runner confirms with the returned
/// `Fill` or rolls the machine back on failure.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Submit a market order and return the fill confirmation.
    async fn submit_order(&self, order: &Order) -> Result<Fill>;

    /// Query lots the venue currently reports as open.
    async fn open_positions(&self) -> Result<Vec<OpenPosition>>;
}

/// Fire-and-forget notification channel. Implementations must swallow
/// and log their own failures; a dead notifier never aborts a cycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str);
}
