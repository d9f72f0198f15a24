use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use agent_core::{Exchange, Instrument};

const DEFAULT_CATALOG_URL: &str =
    "https://margincalculator.angelbroking.com/OpenAPI_File/files/OpenAPIScripMaster.json";

/// Name/symbol substrings that mark index funds, ETFs and liquid/gilt
/// vehicles; matched against both fields, uppercased.
const EXCLUDED_SUBSTRINGS: &[&str] = &[
    "ETF", "BEES", "NIFTY", "SENSEX", "INDEX", "LIQUID", "GILT", "MUTUAL",
];

/// Degraded-mode universe installed when no catalog was ever downloaded.
const FALLBACK_NSE: &[(&str, &str, &str)] = &[
    ("RELIANCE", "2885", "RELIANCE INDUSTRIES"),
    ("TCS", "11536", "TATA CONSULTANCY SERVICES"),
    ("INFY", "1594", "INFOSYS"),
    ("HDFCBANK", "1333", "HDFC BANK"),
    ("ICICIBANK", "4963", "ICICI BANK"),
    ("SBIN", "3045", "STATE BANK OF INDIA"),
    ("ITC", "1660", "ITC"),
    ("BHARTIARTL", "10604", "BHARTI AIRTEL"),
    ("LT", "11483", "LARSEN & TOUBRO"),
    ("HINDUNILVR", "1394", "HINDUSTAN UNILEVER"),
    ("AXISBANK", "5900", "AXIS BANK"),
    ("KOTAKBANK", "1922", "KOTAK MAHINDRA BANK"),
    ("MARUTI", "10999", "MARUTI SUZUKI"),
    ("TITAN", "3506", "TITAN COMPANY"),
    ("SUNPHARMA", "3351", "SUN PHARMACEUTICAL"),
    ("TATAMOTORS", "3456", "TATA MOTORS"),
    ("BAJFINANCE", "317", "BAJAJ FINANCE"),
    ("ASIANPAINT", "236", "ASIAN PAINTS"),
    ("WIPRO", "3787", "WIPRO"),
    ("NTPC", "11630", "NTPC"),
];

/// One row of the broker's instrument catalog dump.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRow {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub exch_seg: String,
    #[serde(default, rename = "instrumenttype")]
    pub instrument_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrySource {
    Remote,
    Fallback,
}

#[derive(Debug)]
struct RegistryData {
    by_key: HashMap<(Exchange, String), Instrument>,
    source: RegistrySource,
    loaded_at: DateTime<Utc>,
}

/// Symbol↔broker-token map for the exchange universe, replaced atomically on
/// reload. Readers clone an `Arc` and always observe a complete map.
pub struct InstrumentRegistry {
    client: reqwest::Client,
    catalog_url: String,
    include_secondary: bool,
    inner: RwLock<Arc<RegistryData>>,
}

impl InstrumentRegistry {
    pub fn new(include_secondary: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            catalog_url: std::env::var("INSTRUMENT_CATALOG_URL")
                .unwrap_or_else(|_| DEFAULT_CATALOG_URL.to_string()),
            include_secondary,
            inner: RwLock::new(Arc::new(RegistryData {
                by_key: HashMap::new(),
                source: RegistrySource::Fallback,
                loaded_at: Utc::now(),
            })),
        })
    }

    /// Download and install the day's catalog. On failure the previous map is
    /// retained if it has any entries, otherwise the built-in fallback list is
    /// installed.
    pub async fn reload(&self) -> Result<()> {
        match self.download().await {
            Ok(rows) => {
                let instruments = filter_catalog(&rows, self.include_secondary);
                tracing::info!(
                    "Instrument catalog loaded: {} tradeable equities of {} rows",
                    instruments.len(),
                    rows.len()
                );
                self.install(instruments, RegistrySource::Remote);
                Ok(())
            }
            Err(e) => {
                let have_previous = !self.snapshot().by_key.is_empty();
                if have_previous {
                    tracing::warn!("Catalog download failed, keeping previous registry: {e:#}");
                } else {
                    tracing::warn!("Catalog download failed, installing fallback list: {e:#}");
                    self.install(fallback_instruments(), RegistrySource::Fallback);
                }
                Err(e)
            }
        }
    }

    /// Install the fallback list without a network round trip (used at boot
    /// before the first reload completes).
    pub fn install_fallback(&self) {
        self.install(fallback_instruments(), RegistrySource::Fallback);
    }

    pub fn resolve(&self, symbol: &str, exchange: Exchange) -> Option<String> {
        self.snapshot()
            .by_key
            .get(&(exchange, symbol.to_ascii_uppercase()))
            .map(|i| i.token.clone())
    }

    pub fn instruments_on(&self, exchange: Exchange) -> Vec<Instrument> {
        let snapshot = self.snapshot();
        let mut list: Vec<Instrument> = snapshot
            .by_key
            .values()
            .filter(|i| i.exchange == exchange)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        list
    }

    pub fn symbols_on(&self, exchange: Exchange) -> Vec<String> {
        self.instruments_on(exchange)
            .into_iter()
            .map(|i| i.symbol)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source(&self) -> RegistrySource {
        self.snapshot().source
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.snapshot().loaded_at
    }

    fn snapshot(&self) -> Arc<RegistryData> {
        self.inner.read().expect("registry lock poisoned").clone()
    }

    fn install(&self, instruments: Vec<Instrument>, source: RegistrySource) {
        let by_key = instruments
            .into_iter()
            .map(|i| ((i.exchange, i.symbol.clone()), i))
            .collect();
        let data = Arc::new(RegistryData {
            by_key,
            source,
            loaded_at: Utc::now(),
        });
        *self.inner.write().expect("registry lock poisoned") = data;
    }

    async fn download(&self) -> Result<Vec<CatalogRow>> {
        let response = self
            .client
            .get(&self.catalog_url)
            .send()
            .await
            .context("instrument catalog request")?;
        if !response.status().is_success() {
            anyhow::bail!("instrument catalog returned {}", response.status());
        }
        response.json().await.context("instrument catalog body")
    }
}

/// Keep only tradeable cash-market equities: enabled exchange, equity symbol
/// suffix, blank-or-equity instrument type, and not an index/ETF/liquid/gilt
/// vehicle by name or symbol.
pub fn filter_catalog(rows: &[CatalogRow], include_secondary: bool) -> Vec<Instrument> {
    rows.iter()
        .filter_map(|row| {
            let exchange = match row.exch_seg.as_str() {
                "NSE" => Exchange::Nse,
                "BSE" if include_secondary => Exchange::Bse,
                _ => return None,
            };
            if !row.symbol.ends_with("-EQ") {
                return None;
            }
            if !(row.instrument_type.is_empty() || row.instrument_type == "EQ") {
                return None;
            }

            let symbol = row.symbol.trim_end_matches("-EQ").to_ascii_uppercase();
            let name = row.name.to_ascii_uppercase();
            let excluded = EXCLUDED_SUBSTRINGS
                .iter()
                .any(|pat| name.contains(pat) || symbol.contains(pat));
            if excluded || symbol.is_empty() || row.token.is_empty() {
                return None;
            }

            Some(Instrument {
                symbol,
                exchange,
                token: row.token.clone(),
                name,
            })
        })
        .collect()
}

fn fallback_instruments() -> Vec<Instrument> {
    FALLBACK_NSE
        .iter()
        .map(|(symbol, token, name)| Instrument {
            symbol: symbol.to_string(),
            exchange: Exchange::Nse,
            token: token.to_string(),
            name: name.to_string(),
        })
        .collect()
}
