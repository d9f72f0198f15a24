use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";
const NIFTY_SYMBOL: &str = "^NSEI";

/// Secondary provider for the broad-index daily close series (the broker's
/// history endpoint does not serve index candles on the cash segment).
pub struct IndexSeriesClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteBlock>,
}

#[derive(Debug, Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

impl IndexSeriesClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(
            std::env::var("INDEX_PROVIDER_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        )
    }

    pub fn with_base_url(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .user_agent("Mozilla/5.0")
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Daily closes for the broad index over roughly the last year, oldest
    /// first, with null entries dropped.
    pub async fn nifty_daily_closes(&self) -> Result<Vec<f64>> {
        let url = format!(
            "{}/v8/finance/chart/{}?range=1y&interval=1d",
            self.base_url, NIFTY_SYMBOL
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("index series request")?;
        if !response.status().is_success() {
            anyhow::bail!("index provider returned {}", response.status());
        }

        let body: ChartResponse = response.json().await.context("index series body")?;
        let closes = body
            .chart
            .result
            .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
            .and_then(|r| r.indicators.quote.into_iter().next())
            .map(|q| q.close.into_iter().flatten().collect::<Vec<f64>>())
            .ok_or_else(|| anyhow!("index provider returned no close series"))?;

        if closes.is_empty() {
            return Err(anyhow!("index close series is empty"));
        }
        Ok(closes)
    }
}
