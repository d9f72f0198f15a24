use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;

use agent_core::{Position, TradeProposal};
use risk_manager::RiskValidation;
use trade_store::LearningSummary;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

fn ist(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Kolkata).format("%d-%b-%Y %H:%M").to_string()
}

/// The pre-trade report pushed to the operator for approval.
pub fn pre_trade_report(proposal: &TradeProposal, validation: &RiskValidation) -> String {
    let c = &proposal.confidence;
    let mut report = format!(
        "📊 PRE-TRADE ANALYSIS REPORT — {}\n\
         {RULE}\n\
         TRADE ID          :  {}\n\
         ASSET NAME        :  {} ({}: {})\n\
         SIGNAL TYPE       :  {}\n\
         {RULE}\n\
         BUY PRICE         :  ₹{:.2}  (Limit order)\n\
         TARGET PRICE      :  ₹{:.2}\n\
         STOP-LOSS PRICE   :  ₹{:.2}   (NEVER moved down)\n\
         RISK-REWARD RATIO :  1 : {:.2}\n\
         CONFIDENCE SCORE  :  {:.1}%  [F:{:.0}% T:{:.0}% M:{:.0}% RR:{:.0}%]\n\
         {RULE}\n\
         CAPITAL ALLOC     :  ₹{:.0}  ({:.1}% of portfolio)\n\
         {RULE}\n\
         📲 Reply: APPROVE {}  or  REJECT {} [reason]\n\
         ⏰ Signal expires at: {}",
        ist(proposal.generated_at),
        proposal.id,
        proposal.symbol,
        proposal.exchange,
        proposal.symbol,
        proposal.side,
        proposal.entry_price,
        proposal.target_price,
        proposal.stop_loss,
        proposal.risk_reward,
        c.composite,
        c.fundamental,
        c.technical,
        c.macro_regime,
        c.risk_reward,
        proposal.capital_allocation,
        proposal.allocation_pct,
        proposal.id,
        proposal.id,
        ist(proposal.expires_at),
    );

    for warning in &validation.warnings {
        report.push_str(&format!("\n⚠ {warning}"));
    }
    report
}

pub fn pending_status(pending: &[TradeProposal], open_positions: usize) -> String {
    if pending.is_empty() {
        return format!("No signals awaiting approval. Open positions: {open_positions}.");
    }
    let mut lines = vec![format!(
        "{} signal(s) awaiting approval | Open positions: {open_positions}",
        pending.len()
    )];
    for p in pending {
        lines.push(format!(
            "• {} {} @ ₹{:.2} → ₹{:.2} (conf {:.0}%, expires {})",
            p.id,
            p.symbol,
            p.entry_price,
            p.target_price,
            p.confidence.composite,
            ist(p.expires_at),
        ));
    }
    lines.join("\n")
}

pub fn positions_report(positions: &[Position]) -> String {
    if positions.is_empty() {
        return "No open positions.".to_string();
    }
    let mut lines = vec![format!("{} open position(s):", positions.len())];
    for p in positions {
        lines.push(format!(
            "• {} x{} @ ₹{:.2} | LTP ₹{:.2} ({:+.1}%) | stop ₹{:.2} | target ₹{:.2}",
            p.symbol,
            p.quantity,
            p.entry_price,
            p.current_price,
            p.gain_pct(),
            p.current_stop,
            p.target,
        ));
    }
    lines.join("\n")
}

pub fn end_of_day_summary(open: i64, closed_today: i64, pnl_today: f64) -> String {
    format!(
        "🔔 End of day — open positions: {open}, closed today: {closed_today}, \
         realised P&L today: ₹{pnl_today:.2}"
    )
}

pub fn learning_report(summary: &LearningSummary) -> String {
    let mut lines = vec![
        "📈 Monthly performance review".to_string(),
        format!(
            "Closed trades: {} | Win rate: {:.1}% | Avg win {:+.1}% | Avg loss {:+.1}% | Net P&L ₹{:.0}",
            summary.closed_trades,
            summary.win_rate_pct,
            summary.avg_win_pct,
            summary.avg_loss_pct,
            summary.total_realized_pnl,
        ),
    ];
    for bucket in &summary.by_confidence {
        if bucket.trades > 0 {
            lines.push(format!(
                "Confidence {}: {} trades, {:.0}% wins",
                bucket.label, bucket.trades, bucket.win_rate_pct
            ));
        }
    }
    for sector in summary.by_sector.iter().take(5) {
        lines.push(format!(
            "{}: {} trades, {:.0}% wins, avg ₹{:.0}",
            sector.sector, sector.trades, sector.win_rate_pct, sector.avg_pnl
        ));
    }
    if !summary.rejection_reasons.is_empty() {
        let reasons: Vec<String> = summary
            .rejection_reasons
            .iter()
            .take(3)
            .map(|(reason, count)| format!("{reason} ({count})"))
            .collect();
        lines.push(format!("Top rejections: {}", reasons.join(", ")));
    }
    lines.join("\n")
}
