//! Config CLI subcommands: inspect effective config, write item overrides
//! and show the resolved paths.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;

use crate::adapters::{ConfigStore, FileConfigStore};
use crate::core::{ConfigResolver, STANDARD_CHAINS};

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective config for a tenant and item
    Show {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        item: String,

        /// Only this chain (default: all standard chains)
        #[arg(long)]
        chain: Option<String>,
    },

    /// Set one key in a tenant+item override
    SetOverride {
        #[arg(long)]
        tenant: String,

        #[arg(long)]
        item: String,

        #[arg(long)]
        chain: String,

        /// Dotted key, e.g. retries.attempts
        #[arg(long)]
        key: String,

        /// JSON value; bare words are stored as strings
        #[arg(long)]
        value: String,
    },

    /// Show the resolved configuration paths (debug)
    Paths,
}

pub async fn execute(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show {
            tenant,
            item,
            chain,
        } => show_effective(&tenant, &item, chain.as_deref()).await,
        ConfigCommands::SetOverride {
            tenant,
            item,
            chain,
            key,
            value,
        } => set_override(&tenant, &item, &chain, &key, &value).await,
        ConfigCommands::Paths => show_paths(),
    }
}

fn store() -> Result<FileConfigStore> {
    Ok(FileConfigStore::new(crate::config::config_store_dir()?))
}

async fn show_effective(tenant: &str, item: &str, chain: Option<&str>) -> Result<()> {
    let layers = store()?
        .load_layers(tenant, item)
        .await
        .context("Failed to load config layers")?;
    let mut resolver = ConfigResolver::new(layers);

    let chains: Vec<&str> = match chain {
        Some(chain) => vec![chain],
        None => STANDARD_CHAINS.to_vec(),
    };

    let mut output = serde_json::Map::new();
    for chain in chains {
        let effective = resolver.resolve(tenant, item, chain);
        for warning in &effective.warnings {
            eprintln!("warning: {}", warning);
        }
        output.insert(chain.to_string(), Value::Object(effective.values));
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Parse as JSON, falling back to a plain string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn set_override(tenant: &str, item: &str, chain: &str, key: &str, raw: &str) -> Result<()> {
    crate::domain::run::validate_identifier("tenant", tenant)?;
    crate::domain::run::validate_identifier("item", item)?;

    let value = parse_value(raw);
    let path = store()?
        .write_override(tenant, item, chain, key, value.clone())
        .await?;

    println!("Set {}.{} = {} for {}/{}", chain, key, value, tenant, item);
    eprintln!("Written to {}", path.display());
    Ok(())
}

fn show_paths() -> Result<()> {
    let cfg = crate::config::config()?;

    println!("ccms configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Environment: {}", cfg.settings.environment.as_str());
    println!("Review mode: {:?}", cfg.settings.review_mode);
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Config layers:       {}", crate::config::config_store_dir()?.display());
    println!("  Research:            {}", crate::config::research_dir()?.display());
    println!("  Runs:                {}", crate::config::runs_dir()?.display());
    println!("  Review tickets:      {}", crate::config::review_log_path()?.display());
    println!("  Metrics:             {}", crate::config::metrics_db_path()?.display());

    Ok(())
}
