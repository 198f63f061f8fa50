//! Dual Taker - Main Entry Point
//!
//! Wires the two account sessions, the spread evaluator, the execution
//! coordinator, and the guard into one engine loop, and drives the
//! bounded shutdown drain.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use dual_taker::config::Config;
use dual_taker::engine::{
    AttemptOutcome, Evaluation, ExecutionCoordinator, ExecutionTiming, SessionId, SpreadEvaluator,
    SuppressReason, TradeAttempt,
};
use dual_taker::persistence::LedgerStore;
use dual_taker::risk::{Admission, TradeGuard};
use dual_taker::session::{FeedConfig, ParadexSession, QuoteFeed, SessionApi, SessionCredential};
use dual_taker::shutdown::{DrainOutcome, ShutdownCoordinator, ShutdownPhase};
use dual_taker::status::StatusPublisher;
use dual_taker::utils::decimal::{round_down_to_lot, safe_div, to_basis_points};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Dual Taker CLI
#[derive(Parser)]
#[command(name = "dual-taker")]
#[command(version, about = "Dual-session spread taker on Paradex")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show guard state and recent trade attempts from the ledger
    Status {
        /// Path to the SQLite database
        #[arg(short, long, default_value = "data/dual_taker.db")]
        db: String,

        /// Number of ledger entries to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Clear the exposure halt latch after manual reconciliation
    ClearHalt {
        /// Path to the SQLite database
        #[arg(short, long, default_value = "data/dual_taker.db")]
        db: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Some(Commands::Status { db, limit }) => return show_status(&db, limit),
        Some(Commands::ClearHalt { db }) => return clear_halt(&db),
        None => {
            // Default: run the engine
        }
    }

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║         Dual Taker v{} - spread engine                  ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    // Credentials are produced by the external login flow; refuse to start
    // without both.
    let credential_a = SessionCredential::load(&config.sessions.a.auth_file)?;
    let credential_b = SessionCredential::load(&config.sessions.b.auth_file)?;

    let session_a: Arc<dyn SessionApi> = Arc::new(ParadexSession::new(
        &config.sessions.a.label,
        &config.sessions.rest_url,
        &credential_a,
    )?);
    let session_b: Arc<dyn SessionApi> = Arc::new(ParadexSession::new(
        &config.sessions.b.label,
        &config.sessions.rest_url,
        &credential_b,
    )?);

    // Restore guard state so a restart cannot bypass the trade limit.
    let store = LedgerStore::new(&config.guard.db_path)?;
    let restored_window = store.load_guard()?;
    let halted = store.exposure_halt()?;
    if let Some(window) = &restored_window {
        info!(
            "📂 [GUARD] Restored window: {} trades since {}",
            window.trade_count, window.window_start
        );
    }
    let mut guard = TradeGuard::new(
        config.guard.max_trades,
        config.guard.window_hours,
        restored_window,
        halted,
    );

    let publisher = StatusPublisher::new(&config.instrument.market, guard.snapshot());

    let feed_config = FeedConfig {
        ws_url: config.sessions.ws_url.clone(),
        market: config.instrument.market.clone(),
        reconnect_initial: Duration::from_millis(config.sessions.reconnect_initial_ms),
        reconnect_max: Duration::from_millis(config.sessions.reconnect_max_ms),
        max_reconnect_attempts: config.sessions.max_reconnect_attempts,
    };
    let feed_a = QuoteFeed::new(SessionId::A, &config.sessions.a.label, feed_config.clone()).spawn();
    let feed_b = QuoteFeed::new(SessionId::B, &config.sessions.b.label, feed_config).spawn();
    let mut quotes_a = feed_a.quotes;
    let mut quotes_b = feed_b.quotes;

    let (outcome_tx, mut outcome_rx) = mpsc::channel::<TradeAttempt>(16);
    let coordinator = ExecutionCoordinator::new(
        session_a,
        session_b,
        &config.instrument.market,
        ExecutionTiming::from_config(&config.execution),
        outcome_tx,
    );

    let evaluator = SpreadEvaluator::new(&config.instrument.market, config.spread.clone());

    let leg_size = round_down_to_lot(config.instrument.leg_size, config.instrument.size_step);
    if leg_size <= Decimal::ZERO {
        bail!(
            "leg_size {} rounds to zero at step {}",
            config.instrument.leg_size,
            config.instrument.size_step
        );
    }

    let shutdown = ShutdownCoordinator::new(Duration::from_secs(config.shutdown.grace_period_secs));
    shutdown.listen();

    let mut uncompensated_seen = false;
    let mut feed_a_down = false;
    let mut feed_b_down = false;

    info!("🚀 Engine running - watching both session feeds");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    loop {
        let mut reevaluate = false;

        tokio::select! {
            _ = shutdown.requested() => {
                info!("🛑 [SHUTDOWN] Requested - trigger evaluation stopped");
                break;
            }
            changed = quotes_a.changed(), if !feed_a_down => {
                match changed {
                    Ok(()) => reevaluate = true,
                    Err(_) => {
                        feed_a_down = true;
                        error!("❌ [FEED] Session A feed unavailable - triggering halted on this side");
                    }
                }
            }
            changed = quotes_b.changed(), if !feed_b_down => {
                match changed {
                    Ok(()) => reevaluate = true,
                    Err(_) => {
                        feed_b_down = true;
                        error!("❌ [FEED] Session B feed unavailable - triggering halted on this side");
                    }
                }
            }
            maybe_attempt = outcome_rx.recv() => {
                if let Some(attempt) = maybe_attempt {
                    handle_completed(
                        attempt,
                        &mut guard,
                        &store,
                        &publisher,
                        &mut uncompensated_seen,
                    );
                }
            }
        }

        if feed_a_down && feed_b_down {
            error!("❌ [FEED] Both session feeds unavailable - stopping engine");
            shutdown.request();
            continue;
        }

        if !reevaluate || shutdown.is_requested() {
            continue;
        }

        // Level-triggered: whichever feed updated, evaluate with the
        // freshest pair from both sides.
        let quote_a = quotes_a.borrow().clone();
        let quote_b = quotes_b.borrow().clone();
        let now = Utc::now();

        let evaluation = evaluator.evaluate(quote_a.as_ref(), quote_b.as_ref(), now);

        let effective_spread = match &evaluation {
            Evaluation::Trigger(sample) => Some(sample.effective_spread),
            Evaluation::Suppressed(SuppressReason::BelowThreshold { best_effective }) => {
                Some(*best_effective)
            }
            _ => None,
        };
        publisher.update_market(quote_a, quote_b, effective_spread);

        match evaluation {
            Evaluation::Trigger(sample) => {
                if !coordinator.is_idle() {
                    // Reactive to current market state, not a queue.
                    debug!("⏩ [EVAL] Trigger dropped - attempt in flight");
                    continue;
                }

                match guard.admit(now) {
                    Admission::Admit => {
                        let spread_bps =
                            to_basis_points(safe_div(sample.effective_spread, sample.cheap_ask));
                        info!(
                            "🔫 [TRIGGER] {} | effective spread {} ({:.2} bps) >= threshold | size {}",
                            sample.direction, sample.effective_spread, spread_bps, leg_size
                        );
                        coordinator.try_trigger(sample, leg_size);
                    }
                    Admission::WindowExhausted { resets_at } => {
                        info!(
                            "⏳ [GUARD] Trigger suppressed - window exhausted, resets at {}",
                            resets_at
                        );
                    }
                    Admission::ExposureHalt => {
                        warn!(
                            "🚧 [GUARD] Trigger suppressed - exposure halt latched, \
                             run `dual-taker clear-halt` after reconciliation"
                        );
                    }
                }
            }
            Evaluation::Suppressed(SuppressReason::BelowThreshold { .. }) => {}
            Evaluation::Suppressed(reason) => {
                debug!(?reason, "Evaluation suppressed");
            }
        }
    }

    // Bounded drain: never kill an in-flight leg, wait for it to settle.
    publisher.set_shutdown(ShutdownPhase::Requested);
    let drain = shutdown.drain(coordinator.phase_receiver()).await;

    // An attempt that settled during the drain still belongs in the ledger.
    while let Ok(attempt) = outcome_rx.try_recv() {
        handle_completed(
            attempt,
            &mut guard,
            &store,
            &publisher,
            &mut uncompensated_seen,
        );
    }

    if let Err(e) = store.save_guard(guard.window()) {
        warn!("⚠️  [PERSISTENCE] Final guard save failed: {}", e);
    }

    feed_a.task.abort();
    feed_b.task.abort();

    match drain {
        DrainOutcome::Clean => {
            publisher.set_shutdown(ShutdownPhase::Drained);
            if let Ok(snapshot) = serde_json::to_string(&publisher.snapshot()) {
                info!("📸 [STATUS] Final snapshot: {}", snapshot);
            }
        }
        DrainOutcome::GraceExpired => {
            error!("🚨 [SHUTDOWN] Attempt still pending after grace period");
            bail!("shutdown grace period expired with an attempt in flight - reconcile manually");
        }
    }

    if uncompensated_seen {
        bail!("uncompensated exposure occurred this run - reconcile manually, then clear-halt");
    }

    info!("👋 Dual taker shutdown complete");
    Ok(())
}

/// Fold one completed attempt into guard, ledger, and snapshot.
fn handle_completed(
    attempt: TradeAttempt,
    guard: &mut TradeGuard,
    store: &LedgerStore,
    publisher: &StatusPublisher,
    uncompensated_seen: &mut bool,
) {
    let now = Utc::now();

    info!(
        "📒 [ATTEMPT] #{} {} | buy {} / sell {} | outcome {}",
        attempt.attempt_id,
        attempt.direction,
        attempt.buy_leg.state,
        attempt.sell_leg.state,
        attempt.outcome
    );

    if attempt.outcome == AttemptOutcome::OneLegFailedUncompensated {
        *uncompensated_seen = true;
        guard.latch_exposure_halt();
        if let Err(e) = store.set_exposure_halt(true) {
            error!("❌ [PERSISTENCE] Failed to persist exposure halt: {}", e);
        }
        error!(
            "🚨 [ALERT] Attempt #{} left uncompensated exposure on session {} - \
             no new triggers will be admitted until `clear-halt` is run",
            attempt.attempt_id,
            attempt
                .compensation
                .as_ref()
                .map(|leg| leg.session.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
    }

    let counted = guard.record_completed(attempt.outcome, now);
    if counted {
        if let Err(e) = store.save_guard(guard.window()) {
            warn!("⚠️  [PERSISTENCE] Guard save failed: {}", e);
        }
    }

    if let Err(e) = store.append_attempt(&attempt) {
        warn!("⚠️  [PERSISTENCE] Ledger append failed: {}", e);
    }

    publisher.record_attempt(&attempt);
    publisher.update_guard(guard.snapshot());
}

/// Initialize comprehensive logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "dual-taker.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("dual_taker=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Market: {}", config.instrument.market);
    info!("   Leg Size: {}", config.instrument.leg_size);
    info!(
        "   Trigger Threshold: {}",
        config.spread.trigger_threshold
    );
    info!(
        "   Fee Buffer: {:.4}%",
        config.spread.fee_buffer_rate * dec!(100)
    );
    info!(
        "   Max Quote Age / Skew: {}ms / {}ms",
        config.spread.max_quote_age_ms, config.spread.max_skew_ms
    );
    info!("   Min Depth: {}", config.spread.min_depth);
    info!(
        "   Guard: {} trades / {}h",
        config.guard.max_trades, config.guard.window_hours
    );
    info!(
        "   Leg Timeout: {}s | Compensation: {:?}",
        config.execution.leg_timeout_secs, config.execution.compensation
    );
    info!(
        "   Shutdown Grace: {}s",
        config.shutdown.grace_period_secs
    );
}

/// Show guard state and recent ledger entries.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║                  DUAL TAKER STATUS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The engine has not run yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = LedgerStore::new(db_path)?;

    println!("\n🛡️  Guard");
    match store.load_guard()? {
        Some(window) => {
            println!("   ├─ Window Start:  {}", window.window_start.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("   └─ Trade Count:   {}", window.trade_count);
        }
        None => println!("   └─ No persisted window"),
    }

    if store.exposure_halt()? {
        println!("\n🚨 EXPOSURE HALT LATCHED - reconcile positions, then run `clear-halt`");
    }

    let counts = store.outcome_counts()?;
    if !counts.is_empty() {
        println!("\n📊 Outcomes");
        for (outcome, count) in &counts {
            println!("   ├─ {:28} {}", outcome, count);
        }
    }

    let attempts = store.recent_attempts(limit)?;
    if attempts.is_empty() {
        println!("\n📒 No attempts recorded yet.");
    } else {
        println!("\n📒 Recent Attempts");
        for entry in &attempts {
            println!(
                "   ┌─ #{} {} ({})",
                entry.attempt_id, entry.market, entry.direction
            );
            println!("   ├─ Spread:   {}", entry.effective_spread);
            println!(
                "   ├─ Legs:     buy {} / sell {}{}",
                entry.buy_state,
                entry.sell_state,
                entry
                    .compensation_state
                    .as_ref()
                    .map(|s| format!(" / compensation {}", s))
                    .unwrap_or_default()
            );
            println!("   ├─ Outcome:  {}", entry.outcome);
            println!(
                "   └─ Finished: {}",
                entry.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
        }
    }

    println!();
    Ok(())
}

/// Clear the exposure halt latch after manual reconciliation.
fn clear_halt(db_path: &str) -> Result<()> {
    if !Path::new(db_path).exists() {
        println!("❌ Database not found: {}", db_path);
        return Ok(());
    }

    let store = LedgerStore::new(db_path)?;

    if !store.exposure_halt()? {
        println!("✅ No exposure halt is latched.");
        return Ok(());
    }

    store.set_exposure_halt(false)?;
    println!("✅ Exposure halt cleared - the engine will admit triggers on next start.");
    Ok(())
}
