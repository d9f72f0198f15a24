use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use agent_core::config::{AgentConfig, RiskConfig};
use agent_core::{Bar, Exchange, MacroSnapshot, MarketRegime, StockSnapshot};
use fundamental_analysis::{FundamentalData, FundamentalSource, SectorOutlook};
use market_data::SnapshotStore;

use super::{derive_levels, new_trade_id, rr_score, SignalEngine};

struct CannedFundamentals {
    by_symbol: HashMap<String, FundamentalData>,
}

#[async_trait]
impl FundamentalSource for CannedFundamentals {
    async fn fundamentals(&self, symbol: &str) -> Result<Option<FundamentalData>> {
        Ok(self.by_symbol.get(symbol).cloned())
    }
}

fn strong_fundamentals(symbol: &str, sector: &str) -> FundamentalData {
    FundamentalData {
        symbol: symbol.to_string(),
        sector: Some(sector.to_string()),
        annual_revenue: vec![100.0, 120.0, 145.0, 170.0, 200.0],
        roe_pct: Some(20.0),
        roce_pct: Some(22.0),
        debt_to_equity: Some(0.3),
        operating_cash_flow: vec![10.0, 12.0, 14.0, 16.0, 18.0],
        promoter_holding_pct: Some(55.0),
        promoter_pledged_pct: Some(0.0),
        pe_ratio: Some(20.0),
        sector_pe_median: Some(30.0),
        peg_ratio: Some(0.9),
        sector_outlook: SectorOutlook::Positive,
    }
}

fn uptrend_snapshot(symbol: &str) -> StockSnapshot {
    let start = Utc::now() - ChronoDuration::days(300);
    let bars: Vec<Bar> = (0..260)
        .map(|i| {
            let close = 80.0 + i as f64 * 0.08;
            Bar {
                timestamp: start + ChronoDuration::days(i as i64),
                open: close * 0.998,
                high: close * 1.012,
                low: close * 0.988,
                close,
                volume: 2_000_000.0,
            }
        })
        .collect();
    let day = bars.last().unwrap().clone();
    StockSnapshot {
        symbol: symbol.to_string(),
        exchange: Exchange::Nse,
        token: "42".to_string(),
        name: symbol.to_string(),
        last_price: day.close,
        day,
        avg_volume_20d: 2_000_000.0,
        avg_traded_value_20d: 200_000_000.0,
        bars,
        fetched_at: Utc::now(),
    }
}

fn calm_macro() -> MacroSnapshot {
    MacroSnapshot {
        date: Utc::now().date_naive(),
        vix: 12.0,
        index_price: 23_100.0,
        index_200d_mean: 21_000.0,
        index_deviation_pct: 10.0,
        regime: MarketRegime::Bull,
        new_buys_suppressed: false,
        fii_net_flow: None,
        fetched_at: Utc::now(),
    }
}

fn store_with(snapshots: Vec<StockSnapshot>, macro_snapshot: MacroSnapshot) -> SnapshotStore {
    let store = SnapshotStore::new();
    let map = snapshots
        .into_iter()
        .map(|s| (s.symbol.clone(), Arc::new(s)))
        .collect();
    store.publish_stocks(map);
    store.publish_macro(macro_snapshot);
    store
}

fn engine_with(data: Vec<FundamentalData>) -> SignalEngine {
    let by_symbol = data.into_iter().map(|d| (d.symbol.clone(), d)).collect();
    SignalEngine::new(
        Arc::new(CannedFundamentals { by_symbol }),
        AgentConfig::default(),
    )
}

// ---------------------------------------------------------------------------
// Level derivation and scoring arithmetic
// ---------------------------------------------------------------------------

#[test]
fn levels_follow_support_and_resistance() {
    let risk = RiskConfig::default();
    let levels = derive_levels(100.0, 95.0, 120.0, &risk);
    // Stop = 95 * 0.99 = 94.05, inside the [85, 97] band
    assert!((levels.stop - 94.05).abs() < 1e-9);
    assert!((levels.target - 120.0).abs() < 1e-9);
    let expected_rr = (120.0 - 100.0) / (100.0 - 94.05);
    assert!((levels.risk_reward - expected_rr).abs() < 1e-9);
    assert!(levels.risk_reward > 3.0);
}

#[test]
fn stop_is_clamped_into_the_band() {
    let risk = RiskConfig::default();
    // Support far below: clamp at the 15% floor
    let levels = derive_levels(100.0, 60.0, 120.0, &risk);
    assert!((levels.stop - 85.0).abs() < 1e-9);
    // Support at entry: clamp at the 3% ceiling
    let levels = derive_levels(100.0, 100.0, 120.0, &risk);
    assert!((levels.stop - 97.0).abs() < 1e-9);
    // No usable support: default to the ceiling
    let levels = derive_levels(100.0, 0.0, 120.0, &risk);
    assert!((levels.stop - 97.0).abs() < 1e-9);
}

#[test]
fn weak_resistance_falls_back_to_ten_percent_target() {
    let risk = RiskConfig::default();
    let levels = derive_levels(100.0, 95.0, 101.0, &risk);
    assert!((levels.target - 110.0).abs() < 1e-9);
}

#[test]
fn rr_score_bands() {
    assert_eq!(rr_score(3.5), 100.0);
    assert_eq!(rr_score(3.0), 100.0);
    assert_eq!(rr_score(2.7), 85.0);
    assert_eq!(rr_score(2.0), 70.0);
    assert_eq!(rr_score(1.6), 40.0);
    assert_eq!(rr_score(1.2), 0.0);
}

#[test]
fn trade_ids_are_well_formed_and_unique() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..1_000 {
        let id = new_trade_id();
        assert!(id.starts_with("TRD-"));
        let hex = &id[4..];
        assert_eq!(hex.len(), 12);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert!(seen.insert(id));
    }
}

// ---------------------------------------------------------------------------
// Generator behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generates_proposal_for_quality_uptrend() {
    let store = store_with(vec![uptrend_snapshot("QUALCO")], calm_macro());
    let engine = engine_with(vec![strong_fundamentals("QUALCO", "IT")]);

    let proposals = engine.generate(&store, 500_000.0).await;
    assert_eq!(proposals.len(), 1);
    let p = &proposals[0];

    assert!(p.target_price > p.entry_price && p.entry_price > p.stop_loss && p.stop_loss > 0.0);
    let stop_pct = (p.entry_price - p.stop_loss) / p.entry_price * 100.0;
    assert!((3.0..=15.0).contains(&stop_pct), "stop pct {stop_pct}");
    assert!((p.capital_allocation - 50_000.0).abs() < 1e-6);
    assert!(p.cash_buffer_safe);
    assert_eq!(p.sector, "IT");

    // Composite is the exact weighted sum of the sub-scores
    let c = &p.confidence;
    let expected = 0.35 * c.fundamental
        + 0.30 * c.technical
        + 0.20 * c.macro_regime
        + 0.15 * c.risk_reward;
    assert!((c.composite - expected).abs() < 1e-9);
}

#[tokio::test]
async fn empty_store_yields_empty_set() {
    let store = store_with(vec![], calm_macro());
    let engine = engine_with(vec![]);
    assert!(engine.generate(&store, 500_000.0).await.is_empty());
}

#[tokio::test]
async fn suppressed_macro_yields_empty_set() {
    let mut macro_snapshot = calm_macro();
    macro_snapshot.new_buys_suppressed = true;
    let store = store_with(vec![uptrend_snapshot("QUALCO")], macro_snapshot);
    let engine = engine_with(vec![strong_fundamentals("QUALCO", "IT")]);
    assert!(engine.generate(&store, 500_000.0).await.is_empty());
}

#[tokio::test]
async fn debt_disqualifier_drops_symbol() {
    let store = store_with(vec![uptrend_snapshot("LEVERCO")], calm_macro());
    let mut data = strong_fundamentals("LEVERCO", "Infra");
    data.debt_to_equity = Some(3.0);
    let engine = engine_with(vec![data]);
    assert!(engine.generate(&store, 500_000.0).await.is_empty());
}

#[tokio::test]
async fn missing_fundamentals_drop_symbol() {
    let store = store_with(vec![uptrend_snapshot("GHOSTCO")], calm_macro());
    let engine = engine_with(vec![]);
    assert!(engine.generate(&store, 500_000.0).await.is_empty());
}

#[tokio::test]
async fn proposals_sorted_by_composite() {
    let store = store_with(
        vec![uptrend_snapshot("STRONGCO"), uptrend_snapshot("OKCO")],
        calm_macro(),
    );
    let mut weaker = strong_fundamentals("OKCO", "Auto");
    weaker.roe_pct = Some(9.0);
    weaker.roce_pct = Some(9.0);
    weaker.promoter_holding_pct = Some(40.0);
    let engine = engine_with(vec![strong_fundamentals("STRONGCO", "IT"), weaker]);

    let proposals = engine.generate(&store, 500_000.0).await;
    assert_eq!(proposals.len(), 2);
    assert!(proposals[0].confidence.composite >= proposals[1].confidence.composite);
    assert_eq!(proposals[0].symbol, "STRONGCO");
}

#[tokio::test]
async fn analyse_symbol_reports_even_disqualified_stocks() {
    let snapshot = uptrend_snapshot("LEVERCO");
    let mut data = strong_fundamentals("LEVERCO", "Infra");
    data.debt_to_equity = Some(5.0);
    let engine = engine_with(vec![data]);

    let bundle = engine.analyse_symbol(&snapshot, &calm_macro()).await;
    let fundamental = bundle.fundamental.expect("fundamental report");
    assert!(fundamental.result.disqualified);
    assert_eq!(fundamental.score, 0.0);
    assert!(bundle.technical.is_some());
    assert!(bundle.levels.is_some());
    assert!(bundle.confidence.is_some());
}
