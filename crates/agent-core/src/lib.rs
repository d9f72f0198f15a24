pub mod broker;
pub mod chat;
pub mod config;
pub mod error;
pub mod types;

pub use broker::{Broker, Holding, OrderRequest, OrderType, ProductType, QuoteTick};
pub use chat::{ChatChannel, ChatUpdate};
pub use config::AgentConfig;
pub use error::AgentError;
pub use types::*;
