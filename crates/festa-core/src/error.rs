//! Error types shared across the workspace.

/// Top-level error for Festa operations.
#[derive(Debug, thiserror::Error)]
pub enum FestaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Channel error: {0}")]
    Channel(String),

    /// User or CLI input that does not have the expected shape.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A day/month(/year) combination that is not a real calendar date.
    #[error("Invalid date: {day:02}.{month:02}")]
    InvalidDate { day: u32, month: u32 },

    #[error("Delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    /// Generic refusal. Carries no detail about who is allowed.
    #[error("Not authorized")]
    Unauthorized,

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

/// Failure of an outbound send, classified by whether the destination is
/// still worth talking to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Destination is unreachable for the foreseeable future (bot blocked,
    /// kicked, chat deleted).
    #[error("permanent: {0}")]
    Permanent(String),
    /// Network hiccup, rate limit, timeout. Retried at the next firing.
    #[error("transient: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

pub type Result<T> = std::result::Result<T, FestaError>;
