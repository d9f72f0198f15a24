use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Broker error: {0}")]
    BrokerError(String),

    #[error("Session expired")]
    SessionExpired,

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Chat channel error: {0}")]
    ChatError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}
