use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::FundamentalData;

/// Source of per-symbol business fundamentals. The signal engine only depends
/// on this trait so tests can inject canned data.
#[async_trait]
pub trait FundamentalSource: Send + Sync {
    /// `Ok(None)` means the provider has nothing for this symbol; the symbol
    /// is then dropped silently.
    async fn fundamentals(&self, symbol: &str) -> Result<Option<FundamentalData>>;
}

/// HTTP client for the fundamentals provider. Provider calls are bounded by a
/// counting semaphore so a batch of symbols cannot stampede the upstream.
pub struct FundamentalsClient {
    client: reqwest::Client,
    base_url: String,
    limiter: Semaphore,
}

impl FundamentalsClient {
    pub fn new(base_url: String, max_concurrency: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()?;
        Ok(Self {
            client,
            base_url,
            limiter: Semaphore::new(max_concurrency.max(1)),
        })
    }
}

#[async_trait]
impl FundamentalSource for FundamentalsClient {
    async fn fundamentals(&self, symbol: &str) -> Result<Option<FundamentalData>> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .context("fundamentals limiter closed")?;

        let url = format!("{}/api/fundamentals/{}", self.base_url, symbol);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("fundamentals request for {symbol}"))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            anyhow::bail!(
                "fundamentals provider returned {} for {symbol}",
                response.status()
            );
        }

        let data: FundamentalData = response
            .json()
            .await
            .with_context(|| format!("fundamentals body for {symbol}"))?;
        Ok(Some(data))
    }
}
