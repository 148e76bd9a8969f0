use crate::{executor::PoolError, fanout::FailureReason};

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the core can
/// tell a classified delivery failure from an opaque external one.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("delivery failed: {0}")]
    Delivery(FailureReason),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("broadcast to {requested} recipients exceeds the limit of {limit}")]
    BroadcastTooLarge { requested: usize, limit: usize },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
