//! Serve command - runs a session store node.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tether_session::{Clock, SystemClock, WritePolicy};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use super::{Context, DatabaseArgs};

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,
}

/// Run the serve command until Ctrl-C.
///
/// The invalidation sweep and the time-based write cycle each run on their
/// own interval. Store calls block on SQLite, so they go through
/// `spawn_blocking`.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let store = Arc::new(ctx.open_store(&args.database)?);
    let config = store.config().clone();
    let time_based = config.write_policy() == WritePolicy::TimeBased;

    let sweep_every = ctx.config.invalidation_interval();
    let mut sweep_tick = interval(sweep_every);
    sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut write_tick = interval(config.write_interval.max(Duration::from_secs(1)));
    write_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        policy = ?config.write_policy(),
        sweep_secs = sweep_every.as_secs(),
        write_secs = config.write_interval.as_secs(),
        "Session store node running"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = sweep_tick.tick() => {
                let store = Arc::clone(&store);
                let report = tokio::task::spawn_blocking(move || {
                    store.run_invalidation(SystemClock.now_millis())
                })
                .await?;
                debug!(skipped = report.skipped, expired = report.expired.len(), removed = report.removed.len(), "Sweep tick");
            }
            _ = write_tick.tick(), if time_based => {
                let store = Arc::clone(&store);
                let report = tokio::task::spawn_blocking(move || store.run_time_based_writes(false)).await?;
                debug!(written = report.written, deferred = report.deferred, "Write tick");
            }
            result = &mut shutdown => {
                result?;
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let stats = store.stats();
    tokio::task::spawn_blocking(move || store.stop()).await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else if ctx.verbose {
        println!("Stopped with {} cached sessions", stats.cached);
    }
    Ok(())
}
