use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Order rejected: {reason}")]
    OrderRejected { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the gateway explicitly rejected the order. A rejection
    /// means nothing was executed, so the same intent may be retried on
    /// the next cycle. Transport failures stay ambiguous.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::OrderRejected { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
