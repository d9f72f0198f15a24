mod index_client;
mod ingestion;
mod store;
mod valuator;

pub use index_client::IndexSeriesClient;
pub use ingestion::{derive_regime, MarketDataEngine, RefreshOutcome};
pub use store::SnapshotStore;
pub use valuator::PortfolioValuator;
