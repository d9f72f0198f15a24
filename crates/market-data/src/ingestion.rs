use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;

use agent_core::config::{AgentConfig, MacroConfig};
use agent_core::{
    Bar, Broker, Exchange, Instrument, MacroSnapshot, MarketRegime, StockSnapshot,
    MIN_HISTORY_BARS,
};
use instrument_registry::InstrumentRegistry;

use crate::index_client::IndexSeriesClient;
use crate::store::SnapshotStore;
use crate::valuator::PortfolioValuator;

/// Broker token of the India VIX index on the primary exchange.
const INDIA_VIX_TOKEN: &str = "99926017";

#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    /// A refresh was already in progress; this call did nothing.
    pub skipped: bool,
    /// The Phase-2 deadline expired and a partial store was published.
    pub partial: bool,
    pub candidates: usize,
    pub published: usize,
    pub portfolio_value: f64,
}

/// Owns the daily two-phase universe scan and the macro refresh; the only
/// writer of the snapshot store.
pub struct MarketDataEngine {
    broker: Arc<dyn Broker>,
    registry: Arc<InstrumentRegistry>,
    valuator: Arc<PortfolioValuator>,
    store: Arc<SnapshotStore>,
    index_client: IndexSeriesClient,
    config: AgentConfig,
    in_progress: watch::Sender<bool>,
}

impl MarketDataEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        registry: Arc<InstrumentRegistry>,
        valuator: Arc<PortfolioValuator>,
        store: Arc<SnapshotStore>,
        index_client: IndexSeriesClient,
        config: AgentConfig,
    ) -> Self {
        let (in_progress, _) = watch::channel(false);
        Self {
            broker,
            registry,
            valuator,
            store,
            index_client,
            config,
            in_progress,
        }
    }

    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    pub fn is_refreshing(&self) -> bool {
        *self.in_progress.borrow()
    }

    /// Wait until no refresh is running, up to `max_wait`. Returns `true` when
    /// idle, `false` on timeout.
    pub async fn wait_for_refresh(&self, max_wait: Duration) -> bool {
        let mut rx = self.in_progress.subscribe();
        let result = tokio::time::timeout(max_wait, rx.wait_for(|busy| !busy)).await;
        result.is_ok()
    }

    /// Pre-market refresh: portfolio valuation, Phase-1 batch-quote filter,
    /// universe cap, Phase-2 parallel history fetch under the configured
    /// deadline, then the macro refresh. Not reentrant: a concurrent second
    /// call observes the in-progress flag and returns immediately.
    pub async fn refresh_all(&self) -> Result<RefreshOutcome> {
        if self.in_progress.send_replace(true) {
            tracing::info!("Refresh already in progress, skipping duplicate trigger");
            return Ok(RefreshOutcome {
                skipped: true,
                ..Default::default()
            });
        }
        let result = self.run_refresh().await;
        self.in_progress.send_replace(false);
        result
    }

    async fn run_refresh(&self) -> Result<RefreshOutcome> {
        let started = std::time::Instant::now();
        let portfolio_value = self.valuator.refresh().await;

        let watchlist: HashSet<String> = self
            .config
            .filters
            .watchlist
            .iter()
            .map(|s| s.to_ascii_uppercase())
            .collect();

        // Phase 1: batch quotes over every enabled exchange.
        let mut exchanges = vec![Exchange::Nse];
        if self.config.filters.include_secondary_exchange {
            exchanges.push(Exchange::Bse);
        }

        let mut watchlisted: Vec<Instrument> = Vec::new();
        let mut filtered: Vec<Instrument> = Vec::new();
        for exchange in exchanges {
            let instruments = self.registry.instruments_on(exchange);
            let quotes = self.batch_quotes(exchange, &instruments).await;
            let (watch_part, filter_part) = filter_candidates(
                &instruments,
                &quotes,
                &watchlist,
                self.config.filters.min_stock_price,
                self.config.filters.min_avg_daily_volume,
            );
            tracing::info!(
                "Phase 1 {}: {} of {} symbols pass the quote filter ({} watchlisted)",
                exchange,
                filter_part.len(),
                instruments.len(),
                watch_part.len()
            );
            watchlisted.extend(watch_part);
            filtered.extend(filter_part);
        }

        let watch_count = watchlisted.len();
        let mut candidates = watchlisted;
        candidates.extend(filtered);
        let candidates = cap_universe(
            candidates,
            watch_count,
            self.config.filters.max_analysis_universe,
        );
        let candidate_count = candidates.len();

        // Phase 2: parallel history fetch, bounded by the semaphore, under an
        // overall deadline. On expiry the partial store is still published.
        let (snapshots, partial) = self.fetch_histories(candidates, &watchlist).await;
        let published = snapshots.len();
        self.store.publish_stocks(snapshots);

        // Macro refresh; failures install the neutral default.
        let macro_snapshot = self.refresh_macro().await;
        tracing::info!(
            "Macro: VIX {:.1}, index {:.1}% vs 200-day mean, regime {}{}",
            macro_snapshot.vix,
            macro_snapshot.index_deviation_pct,
            macro_snapshot.regime,
            if macro_snapshot.new_buys_suppressed {
                " (new buys suppressed)"
            } else {
                ""
            }
        );
        self.store.publish_macro(macro_snapshot);

        if partial {
            tracing::warn!(
                "Refresh deadline expired: published {published} of {candidate_count} candidates"
            );
        }
        tracing::info!(
            "Refresh complete in {:.0?}: {} snapshots from {} candidates",
            started.elapsed(),
            published,
            candidate_count
        );

        Ok(RefreshOutcome {
            skipped: false,
            partial,
            candidates: candidate_count,
            published,
            portfolio_value,
        })
    }

    /// Quote all instruments in batches; a failed batch is logged and lost,
    /// never the whole phase.
    async fn batch_quotes(
        &self,
        exchange: Exchange,
        instruments: &[Instrument],
    ) -> HashMap<String, (f64, f64)> {
        let batch_size = self.config.data.quote_batch_size.clamp(1, 250);
        let mut quotes: HashMap<String, (f64, f64)> = HashMap::new();

        for chunk in instruments.chunks(batch_size) {
            let tokens: Vec<String> = chunk.iter().map(|i| i.token.clone()).collect();
            match self.broker.quotes(exchange, &tokens).await {
                Ok(ticks) => {
                    for tick in ticks {
                        quotes.insert(tick.token, (tick.last_price, tick.traded_value));
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Quote batch of {} tokens on {} failed, skipping: {e:#}",
                        tokens.len(),
                        exchange
                    );
                }
            }
        }
        quotes
    }

    async fn fetch_histories(
        &self,
        candidates: Vec<Instrument>,
        watchlist: &HashSet<String>,
    ) -> (HashMap<String, Arc<StockSnapshot>>, bool) {
        let semaphore = Arc::new(Semaphore::new(self.config.data.history_concurrency.max(1)));
        let results: Arc<Mutex<HashMap<String, Arc<StockSnapshot>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let min_traded_value = self.config.filters.min_avg_daily_volume;
        let from = Utc::now() - chrono::Duration::days(self.config.data.history_days);
        let to = Utc::now();

        let mut tasks = JoinSet::new();
        for instrument in candidates {
            let broker = Arc::clone(&self.broker);
            let semaphore = Arc::clone(&semaphore);
            let results = Arc::clone(&results);
            let watchlisted = watchlist.contains(&instrument.symbol);

            tasks.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                match broker
                    .daily_history(instrument.exchange, &instrument.token, from, to)
                    .await
                {
                    Ok(bars) => {
                        if let Some(snapshot) =
                            build_snapshot(&instrument, bars, watchlisted, min_traded_value)
                        {
                            results
                                .lock()
                                .await
                                .insert(snapshot.symbol.clone(), Arc::new(snapshot));
                        }
                    }
                    Err(e) => {
                        // Per-symbol failures drop the symbol from the cache.
                        tracing::debug!("History fetch failed for {}: {e:#}", instrument.symbol);
                    }
                }
            });
        }

        let deadline = Duration::from_secs(self.config.data.refresh_deadline_secs);
        let completed = tokio::time::timeout(deadline, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        let partial = completed.is_err();
        if partial {
            tasks.abort_all();
        }

        let snapshots = std::mem::take(&mut *results.lock().await);
        (snapshots, partial)
    }

    async fn refresh_macro(&self) -> MacroSnapshot {
        match self.fetch_macro().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Macro refresh failed, installing neutral default: {e:#}");
                MacroSnapshot::neutral(Utc::now().date_naive())
            }
        }
    }

    async fn fetch_macro(&self) -> Result<MacroSnapshot> {
        let closes = self.index_client.nifty_daily_closes().await?;
        if closes.len() < 200 {
            anyhow::bail!("index series too short for 200-day mean: {}", closes.len());
        }
        let index_price = *closes.last().expect("non-empty checked above");
        let mean_200 = closes[closes.len() - 200..].iter().sum::<f64>() / 200.0;
        let deviation_pct = (index_price - mean_200) / mean_200 * 100.0;

        let vix = self
            .broker
            .ltp(Exchange::Nse, "INDIA VIX", INDIA_VIX_TOKEN)
            .await?;

        let thresholds = &self.config.macro_thresholds;
        Ok(MacroSnapshot {
            date: Utc::now().date_naive(),
            vix,
            index_price,
            index_200d_mean: mean_200,
            index_deviation_pct: deviation_pct,
            regime: derive_regime(vix, index_price, mean_200, thresholds),
            new_buys_suppressed: vix > thresholds.vix_no_buys || index_price < 0.95 * mean_200,
            fii_net_flow: None,
            fetched_at: Utc::now(),
        })
    }
}

/// Regime table: hard-ceiling VIX below the 200-day mean is a bear market,
/// elevated VIX alone is high volatility, a calm extended index is a bull
/// market, anything else is sideways.
pub fn derive_regime(
    vix: f64,
    index_price: f64,
    index_200d_mean: f64,
    config: &MacroConfig,
) -> MarketRegime {
    if vix > config.vix_no_buys && index_price < index_200d_mean {
        MarketRegime::Bear
    } else if vix > config.vix_caution {
        MarketRegime::HighVolatility
    } else if index_price > 1.05 * index_200d_mean && vix < config.vix_favorable {
        MarketRegime::Bull
    } else {
        MarketRegime::Sideways
    }
}

/// Phase-1 keep rule: watchlisted symbols unconditionally (returned first),
/// then symbols whose quote clears both the price floor and the traded-value
/// floor.
fn filter_candidates(
    instruments: &[Instrument],
    quotes: &HashMap<String, (f64, f64)>,
    watchlist: &HashSet<String>,
    min_price: f64,
    min_traded_value: f64,
) -> (Vec<Instrument>, Vec<Instrument>) {
    let mut watchlisted: Vec<Instrument> = Vec::new();
    let mut filtered: Vec<Instrument> = Vec::new();

    for instrument in instruments {
        if watchlist.contains(&instrument.symbol) {
            watchlisted.push(instrument.clone());
            continue;
        }
        if let Some(&(last_price, traded_value)) = quotes.get(&instrument.token) {
            if last_price >= min_price && traded_value >= min_traded_value {
                filtered.push(instrument.clone());
            }
        }
    }

    (watchlisted, filtered)
}

/// Truncate to the universe cap without ever dropping the watchlist prefix.
fn cap_universe(mut candidates: Vec<Instrument>, watch_count: usize, cap: usize) -> Vec<Instrument> {
    candidates.truncate(cap.max(watch_count));
    candidates
}

/// Phase-2 admission: enough bars for the long indicators, and liquid enough
/// over the trailing 20 sessions unless watchlisted.
fn build_snapshot(
    instrument: &Instrument,
    bars: Vec<Bar>,
    watchlisted: bool,
    min_traded_value: f64,
) -> Option<StockSnapshot> {
    if bars.len() < MIN_HISTORY_BARS {
        return None;
    }

    let tail = &bars[bars.len() - 20..];
    let avg_volume_20d = tail.iter().map(|b| b.volume).sum::<f64>() / 20.0;
    let avg_traded_value_20d = tail.iter().map(|b| b.close * b.volume).sum::<f64>() / 20.0;

    if !watchlisted && avg_traded_value_20d < min_traded_value {
        return None;
    }

    let day = bars.last()?.clone();
    Some(StockSnapshot {
        symbol: instrument.symbol.clone(),
        exchange: instrument.exchange,
        token: instrument.token.clone(),
        name: instrument.name.clone(),
        last_price: day.close,
        day,
        avg_volume_20d,
        avg_traded_value_20d,
        bars,
        fetched_at: Utc::now(),
    })
}
