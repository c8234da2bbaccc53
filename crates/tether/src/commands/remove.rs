//! Remove command - deletes a stored session.

use anyhow::{Result, bail};
use clap::Args;

use super::{Context, DatabaseArgs};

/// Arguments for the remove command.
#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Session id
    pub id: String,

    #[command(flatten)]
    pub database: DatabaseArgs,
}

/// Run the remove command.
pub async fn run(args: RemoveArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store(&args.database)?;
    if !store.is_persisted(&args.id)? {
        bail!("session '{}' not found", args.id);
    }
    store.remove_session(&args.id)?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "removed": args.id }));
    } else {
        println!("Removed session {}", args.id);
    }
    Ok(())
}
