//! Inspect command - shows the stored copy of a session.

use anyhow::{Result, bail};
use clap::Args;

use super::{Context, DatabaseArgs};

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Session id
    pub id: String,

    #[command(flatten)]
    pub database: DatabaseArgs,
}

/// Run the inspect command.
pub async fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store(&args.database)?;
    let Some(snapshot) = store.read_persisted(&args.id)? else {
        bail!("session '{}' not found", args.id);
    };

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("Session {}", snapshot.id);
    println!("  created:      {}", snapshot.creation_time);
    println!("  last access:  {}", snapshot.last_access_time);
    println!("  max inactive: {}s", snapshot.max_inactive_secs);
    if snapshot.attributes.is_empty() {
        println!("  attributes:   (none)");
    } else {
        println!("  attributes:");
        for (name, value) in &snapshot.attributes {
            println!("    {name} = {value}");
        }
    }
    Ok(())
}
