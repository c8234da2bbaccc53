//! Config command - inspect and initialise configuration.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use tether_config::{LayerStatus, TetherConfig, load_config, save_config, xdg_config_path};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: Option<ConfigCommand>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration with defaults filled in
    Show,

    /// List the config files checked, in load order
    Which,

    /// Write a default config file
    Init {
        /// Write ./tether.toml instead of the user config
        #[arg(long)]
        local: bool,
    },
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command.unwrap_or(ConfigCommand::Show) {
        ConfigCommand::Show => show(ctx),
        ConfigCommand::Which => which(ctx),
        ConfigCommand::Init { local } => init(local, ctx),
    }
}

fn show(ctx: &Context) -> Result<()> {
    let resolved = ctx.config.resolved();
    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        print!("{}", resolved.to_toml()?);
    }
    Ok(())
}

fn which(ctx: &Context) -> Result<()> {
    let loaded = load_config(None)?;
    if ctx.json_output {
        let sources: Vec<_> = loaded
            .sources
            .iter()
            .map(|s| {
                serde_json::json!({
                    "layer": format!("{:?}", s.layer).to_lowercase(),
                    "path": s.path,
                    "loaded": s.is_loaded(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    for source in &loaded.sources {
        let status = match &source.status {
            LayerStatus::Loaded => "loaded".to_string(),
            LayerStatus::Missing => "missing".to_string(),
            LayerStatus::Rejected(reason) => format!("ignored ({reason})"),
        };
        println!("{:<8} {} {}", format!("{:?}", source.layer).to_lowercase(), source.path.display(), status);
    }
    Ok(())
}

fn init(local: bool, ctx: &Context) -> Result<()> {
    let path = if local {
        PathBuf::from("tether.toml")
    } else {
        match xdg_config_path() {
            Some(path) => path,
            None => bail!("could not determine the user config directory"),
        }
    };
    if path.exists() {
        bail!("config file already exists: {}", path.display());
    }

    save_config(&TetherConfig::new().resolved(), &path)?;
    if ctx.json_output {
        println!("{}", serde_json::json!({ "written": path }));
    } else {
        println!("Wrote {}", path.display());
    }
    Ok(())
}
