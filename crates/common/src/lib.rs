pub mod config;
pub mod error;
pub mod gateway;
pub mod types;

pub use config::{Config, RunMode, SessionHours};
pub use error::{Error, Result};
pub use gateway::{BarSource, ExecutionGateway, Notifier};
pub use types::*;
