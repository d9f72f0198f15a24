use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Datelike, Timelike, Weekday};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use risk_manager::RiskContext;

use crate::context::AgentContext;
use crate::report;

/// Wall-clock triggers, evaluated once per minute in exchange-local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// 08:45 Mon-Fri: pre-market data refresh.
    Refresh,
    /// 09:15 Mon-Fri: signal generation, risk gate, approval submission.
    SignalCycle,
    /// Every 15 minutes 09:30-15:30 Mon-Fri: monitor tick + expiry sweep.
    MonitorTick,
    /// 15:30 Mon-Fri: end-of-day summary.
    EndOfDay,
    /// 00:00 daily: instrument catalog reload.
    RegistryReload,
    /// 1st of month 07:00: learning summary push.
    LearningSummary,
}

/// Which triggers are due at this exchange-local minute.
pub fn due_triggers(now: DateTime<Tz>) -> Vec<Trigger> {
    let mut due = Vec::new();
    let weekday = !matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
    let (hour, minute) = (now.hour(), now.minute());

    if hour == 0 && minute == 0 {
        due.push(Trigger::RegistryReload);
    }
    if now.day() == 1 && hour == 7 && minute == 0 {
        due.push(Trigger::LearningSummary);
    }
    if weekday {
        if hour == 8 && minute == 45 {
            due.push(Trigger::Refresh);
        }
        if hour == 9 && minute == 15 {
            due.push(Trigger::SignalCycle);
        }
        let after_open = (hour, minute) >= (9, 30);
        let before_close = (hour, minute) <= (15, 30);
        if after_open && before_close && minute % 15 == 0 {
            due.push(Trigger::MonitorTick);
        }
        if hour == 15 && minute == 30 {
            due.push(Trigger::EndOfDay);
        }
    }
    due
}

/// Spawn the clock loop and the chat long-poll loop. Both stop when the
/// shutdown channel flips.
pub fn spawn_loops(
    ctx: Arc<AgentContext>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(clock_loop(Arc::clone(&ctx), shutdown.clone())),
        tokio::spawn(chat_loop(ctx, shutdown)),
    ]
}

/// Sequential long-poll over the chat channel; poll ticks never overlap.
async fn chat_loop(ctx: Arc<AgentContext>, mut shutdown: watch::Receiver<bool>) {
    let poll_timeout = ctx.config.chat.poll_timeout_secs;
    let idle_wait = Duration::from_secs(ctx.config.chat.poll_interval_secs.max(1));

    loop {
        let poll = ctx.chat.poll(poll_timeout);
        tokio::select! {
            _ = shutdown.changed() => break,
            result = poll => match result {
                Ok(updates) => {
                    for update in updates {
                        if let Err(e) = ctx.gateway.on_reply(&update).await {
                            tracing::warn!("Reply handling failed: {e:#}");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Chat poll failed: {e:#}");
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
            },
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(idle_wait) => {}
        }
    }
    tracing::info!("Chat poll loop stopped");
}

/// Evaluate the trigger table once per minute of IST wall-clock time.
/// Long-running triggers are spawned; the monitor tick runs inline so
/// consecutive ticks can never overlap.
async fn clock_loop(ctx: Arc<AgentContext>, mut shutdown: watch::Receiver<bool>) {
    let mut fired: HashSet<(String, Trigger)> = HashSet::new();
    let mut interval = tokio::time::interval(Duration::from_secs(20));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = interval.tick() => {}
        }

        let now = chrono::Utc::now().with_timezone(&Kolkata);
        let minute_key = now.format("%Y-%m-%d %H:%M").to_string();
        fired.retain(|(key, _)| *key == minute_key);

        for trigger in due_triggers(now) {
            if !fired.insert((minute_key.clone(), trigger)) {
                continue;
            }
            dispatch(&ctx, trigger).await;
        }
    }
    tracing::info!("Clock loop stopped");
}

async fn dispatch(ctx: &Arc<AgentContext>, trigger: Trigger) {
    tracing::info!("Trigger fired: {trigger:?}");
    match trigger {
        Trigger::Refresh => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                match ctx.market_data.refresh_all().await {
                    Ok(outcome) => ctx.record_refresh(outcome),
                    Err(e) => tracing::error!("Morning refresh failed: {e:#}"),
                }
            });
        }
        Trigger::SignalCycle => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                if let Err(e) = run_signal_cycle(&ctx).await {
                    tracing::error!("Signal cycle failed: {e:#}");
                }
            });
        }
        Trigger::MonitorTick => {
            if let Err(e) = ctx.monitor.tick().await {
                tracing::warn!("Monitor tick failed: {e:#}");
            }
            if let Err(e) = ctx.gateway.expire_timed_out().await {
                tracing::warn!("Expiry sweep failed: {e:#}");
            }
        }
        Trigger::EndOfDay => {
            if let Err(e) = ctx.monitor.end_of_day_summary().await {
                tracing::warn!("End-of-day summary failed: {e:#}");
            }
        }
        Trigger::RegistryReload => {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                if ctx.registry.reload().await.is_ok() {
                    tracing::info!("Instrument registry reloaded ({} symbols)", ctx.registry.len());
                }
            });
        }
        Trigger::LearningSummary => {
            match ctx.trade_store.learning_summary().await {
                Ok(summary) => {
                    ctx.chat
                        .send(&report::learning_report(&summary))
                        .await
                        .ok();
                }
                Err(e) => tracing::warn!("Learning summary failed: {e:#}"),
            }
        }
    }
}

/// The 09:15 cycle: wait out a still-running refresh (bounded), then
/// generate, risk-gate and submit proposals.
pub async fn run_signal_cycle(ctx: &AgentContext) -> Result<()> {
    let idle = ctx
        .market_data
        .wait_for_refresh(Duration::from_secs(600))
        .await;
    if !idle {
        ctx.chat
            .send("⚠ Morning refresh still running after 10 minutes; proceeding with the partial universe")
            .await
            .ok();
    }
    if let Some(outcome) = ctx.last_refresh_outcome() {
        if outcome.partial {
            ctx.chat
                .send(&format!(
                    "⚠ Partial market data today: {} of {} candidates fetched before the deadline",
                    outcome.published, outcome.candidates
                ))
                .await
                .ok();
        }
    }

    // Fallback registry plus an empty snapshot store means both the catalog
    // download and Phase 2 failed: emit nothing and alert once.
    if ctx.snapshots.is_empty() {
        if ctx.registry.source() == instrument_registry::RegistrySource::Fallback {
            ctx.chat
                .send("🚨 Degraded data cycle: instrument catalog and history fetch both failed; no signals today")
                .await
                .ok();
        }
        return Ok(());
    }

    let portfolio_value = ctx.valuator.current();
    let proposals = ctx.signals.generate(&ctx.snapshots, portfolio_value).await;
    if proposals.is_empty() {
        return Ok(());
    }

    let open_positions = ctx.trade_store.open_positions().await?;
    let new_buys_this_week = ctx
        .trade_store
        .count_buys_since(start_of_trading_week())
        .await?;

    for proposal in proposals {
        let risk_context = RiskContext {
            open_positions: &open_positions,
            portfolio_value,
            new_buys_this_week,
        };
        let validation = risk_manager::validate(&proposal, &risk_context, &ctx.config);
        if !validation.passed {
            tracing::info!(
                "Risk gate blocked {} {}: {}",
                proposal.id,
                proposal.symbol,
                validation.failures.join("; ")
            );
            continue;
        }
        ctx.gateway.submit(proposal, &validation).await?;
    }
    Ok(())
}

/// Monday 00:00 exchange-local time of the current week, in UTC.
fn start_of_trading_week() -> DateTime<chrono::Utc> {
    let now = chrono::Utc::now().with_timezone(&Kolkata);
    let monday = now.date_naive() - chrono::Duration::days(now.weekday().num_days_from_monday() as i64);
    monday
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_local_timezone(Kolkata)
        .single()
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(chrono::Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Tz> {
        Kolkata
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn weekday_morning_triggers() {
        // Monday 2025-03-03
        assert_eq!(due_triggers(at(2025, 3, 3, 8, 45)), vec![Trigger::Refresh]);
        assert_eq!(due_triggers(at(2025, 3, 3, 9, 15)), vec![Trigger::SignalCycle]);
    }

    #[test]
    fn monitor_runs_quarter_hourly_in_market_hours() {
        assert_eq!(due_triggers(at(2025, 3, 3, 9, 30)), vec![Trigger::MonitorTick]);
        assert_eq!(due_triggers(at(2025, 3, 3, 12, 45)), vec![Trigger::MonitorTick]);
        assert!(due_triggers(at(2025, 3, 3, 12, 44)).is_empty());
        assert!(due_triggers(at(2025, 3, 3, 9, 0)).is_empty());
        assert!(due_triggers(at(2025, 3, 3, 15, 45)).is_empty());
    }

    #[test]
    fn close_fires_tick_and_summary() {
        let due = due_triggers(at(2025, 3, 3, 15, 30));
        assert!(due.contains(&Trigger::MonitorTick));
        assert!(due.contains(&Trigger::EndOfDay));
    }

    #[test]
    fn weekend_is_quiet_except_registry() {
        // Saturday 2025-03-01
        assert!(due_triggers(at(2025, 3, 1, 9, 15)).is_empty());
        assert_eq!(
            due_triggers(at(2025, 3, 1, 0, 0)),
            vec![Trigger::RegistryReload]
        );
    }

    #[test]
    fn monthly_learning_on_the_first() {
        assert_eq!(
            due_triggers(at(2025, 3, 1, 7, 0)),
            vec![Trigger::LearningSummary]
        );
        assert!(due_triggers(at(2025, 3, 2, 7, 0)).is_empty());
    }
}
