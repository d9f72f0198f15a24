use anyhow::Result;
use serde::Serialize;

use crate::TradeStore;

/// Win rate within one confidence band.
#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    pub label: String,
    pub trades: i64,
    pub wins: i64,
    pub win_rate_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectorStats {
    pub sector: String,
    pub trades: i64,
    pub wins: i64,
    pub win_rate_pct: f64,
    pub avg_pnl: f64,
}

/// Read-only reduction over closed trades; never feeds back into the rules.
#[derive(Debug, Clone, Serialize)]
pub struct LearningSummary {
    pub closed_trades: i64,
    pub wins: i64,
    pub losses: i64,
    pub win_rate_pct: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub total_realized_pnl: f64,
    pub by_confidence: Vec<BucketStats>,
    pub by_sector: Vec<SectorStats>,
    pub rejection_reasons: Vec<(String, i64)>,
}

impl TradeStore {
    /// Reduce all closed trades into the learning summary.
    pub async fn learning_summary(&self) -> Result<LearningSummary> {
        let (closed_trades, wins, total_realized_pnl): (i64, i64, Option<f64>) = sqlx::query_as(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN realized_pnl > 0 THEN 1 ELSE 0 END), 0),
                    SUM(realized_pnl)
             FROM trade_records WHERE exit_reason IS NOT NULL",
        )
        .fetch_one(self.pool())
        .await?;
        let losses = closed_trades - wins;

        let (avg_win_pct,): (Option<f64>,) = sqlx::query_as(
            "SELECT AVG(realized_pnl_pct) FROM trade_records
             WHERE exit_reason IS NOT NULL AND realized_pnl > 0",
        )
        .fetch_one(self.pool())
        .await?;
        let (avg_loss_pct,): (Option<f64>,) = sqlx::query_as(
            "SELECT AVG(realized_pnl_pct) FROM trade_records
             WHERE exit_reason IS NOT NULL AND realized_pnl <= 0",
        )
        .fetch_one(self.pool())
        .await?;

        let mut by_confidence = Vec::new();
        for (label, low, high) in [
            (">=85", 85.0, f64::MAX),
            ("70-84", 70.0, 85.0),
            ("60-69", 60.0, 70.0),
        ] {
            let (trades, bucket_wins): (i64, i64) = sqlx::query_as(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN realized_pnl > 0 THEN 1 ELSE 0 END), 0)
                 FROM trade_records
                 WHERE exit_reason IS NOT NULL
                   AND confidence_composite >= ? AND confidence_composite < ?",
            )
            .bind(low)
            .bind(high)
            .fetch_one(self.pool())
            .await?;
            by_confidence.push(BucketStats {
                label: label.to_string(),
                trades,
                wins: bucket_wins,
                win_rate_pct: percentage(bucket_wins, trades),
            });
        }

        let sector_rows: Vec<(String, i64, i64, Option<f64>)> = sqlx::query_as(
            "SELECT sector, COUNT(*),
                    COALESCE(SUM(CASE WHEN realized_pnl > 0 THEN 1 ELSE 0 END), 0),
                    AVG(realized_pnl)
             FROM trade_records WHERE exit_reason IS NOT NULL
             GROUP BY sector ORDER BY COUNT(*) DESC",
        )
        .fetch_all(self.pool())
        .await?;
        let by_sector = sector_rows
            .into_iter()
            .map(|(sector, trades, sector_wins, avg_pnl)| SectorStats {
                sector,
                trades,
                wins: sector_wins,
                win_rate_pct: percentage(sector_wins, trades),
                avg_pnl: avg_pnl.unwrap_or(0.0),
            })
            .collect();

        let rejection_reasons: Vec<(String, i64)> = sqlx::query_as(
            "SELECT COALESCE(rejection_reason, 'unspecified'), COUNT(*)
             FROM trade_records WHERE status = 'REJECTED'
             GROUP BY rejection_reason ORDER BY COUNT(*) DESC",
        )
        .fetch_all(self.pool())
        .await?;

        Ok(LearningSummary {
            closed_trades,
            wins,
            losses,
            win_rate_pct: percentage(wins, closed_trades),
            avg_win_pct: avg_win_pct.unwrap_or(0.0),
            avg_loss_pct: avg_loss_pct.unwrap_or(0.0),
            total_realized_pnl: total_realized_pnl.unwrap_or(0.0),
            by_confidence,
            by_sector,
            rejection_reasons,
        })
    }
}

fn percentage(part: i64, whole: i64) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}
