//! Sweep command - one invalidation pass against the database.

use anyhow::Result;
use clap::Args;
use tether_session::{Clock, SystemClock};

use super::{Context, DatabaseArgs};

/// Arguments for the sweep command.
#[derive(Args, Debug)]
pub struct SweepArgs {
    #[command(flatten)]
    pub database: DatabaseArgs,
}

/// Run the sweep command.
///
/// Raises the remote invalidation signal first, so a node configured for
/// scheduled sweeps with remote invalidation sweeps now.
pub async fn run(args: SweepArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store(&args.database)?;
    store.signal_remote_invalidation();
    let report = store.run_invalidation(SystemClock.now_millis());

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.skipped {
        println!("Sweep skipped: outside the scheduled invalidation hours");
    } else if report.removed.is_empty() {
        println!("No expired sessions");
    } else {
        println!("Removed {} expired sessions", report.removed.len());
        if ctx.verbose {
            for id in &report.removed {
                println!("  {id}");
            }
        }
    }
    Ok(())
}
