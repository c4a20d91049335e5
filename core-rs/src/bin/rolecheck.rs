//! rolecheck - condition engine CLI
//!
//! Validates and packs condition trees, and clears single operations
//! against an engine configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rolecheck::allowance::SystemClock;
use rolecheck::condition::{self, Condition};
use rolecheck::config::{self, EngineConfig};
use rolecheck::primitives::{parse_hex, to_hex, Address, AllowanceKey};
use rolecheck::rbac::{CheckError, ExecutionError, Operation};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser)]
#[command(name = "rolecheck")]
#[command(version)]
#[command(about = "Permission condition engine", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the integrity checker over a tree file
    Validate {
        /// Tree file (YAML, or JSON by extension)
        tree: PathBuf,
    },
    /// Print the packed form and handle of a tree file
    Pack {
        tree: PathBuf,
    },
    /// Decode a packed tree back to YAML
    Unpack {
        /// Packed tree as hex
        hex: String,
    },
    /// Evaluate one operation
    Check {
        /// Engine configuration file
        #[arg(long)]
        config: PathBuf,
        /// Tree file
        #[arg(long)]
        tree: PathBuf,
        /// Payload as hex
        #[arg(long)]
        payload: String,
        /// Value transfer attached to the call
        #[arg(long, default_value_t = 0)]
        value: u128,
        /// Target address
        #[arg(long)]
        target: Option<Address>,
        /// Debit the allowances and persist the ledger snapshot
        #[arg(long)]
        commit: bool,
    },
    /// Show an allowance as stored and as available now
    Allowance {
        /// Engine configuration file
        #[arg(long)]
        config: PathBuf,
        /// Allowance key as 32-byte hex, or a short label
        key: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate { tree } => handle_validate(&tree),
        Commands::Pack { tree } => handle_pack(&tree),
        Commands::Unpack { hex } => handle_unpack(&hex),
        Commands::Check {
            config,
            tree,
            payload,
            value,
            target,
            commit,
        } => handle_check(&config, &tree, &payload, value, target, commit),
        Commands::Allowance { config, key } => handle_allowance(&config, &key),
    }
}

/// Handle `rolecheck validate <tree>`
fn handle_validate(path: &Path) -> Result<()> {
    let nodes = config::load_tree_file(path)?;
    match condition::check(nodes) {
        Ok(tree) => {
            println!("✓ {} nodes, handle {}", tree.len(), tree.handle());
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ {} ({})", e, e.as_str());
            std::process::exit(1);
        }
    }
}

/// Handle `rolecheck pack <tree>`
fn handle_pack(path: &Path) -> Result<()> {
    let nodes = config::load_tree_file(path)?;
    let tree = match condition::check(nodes) {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("✗ {} ({})", e, e.as_str());
            std::process::exit(1);
        }
    };
    println!("{}", to_hex(tree.packed().bytes()));
    println!("handle: {}", tree.handle());
    Ok(())
}

/// Handle `rolecheck unpack <hex>`
fn handle_unpack(input: &str) -> Result<()> {
    let bytes = parse_hex(input).context("Invalid packed tree hex")?;
    let nodes = condition::unpack(&bytes)?;
    condition::packing::check_structure(&nodes).context("Packed tree is malformed")?;
    let tree = Condition::unflatten(&nodes).context("Packed tree has no root")?;
    print!("{}", serde_yaml::to_string(&tree)?);
    Ok(())
}

/// Handle `rolecheck check`
fn handle_check(
    config_path: &Path,
    tree_path: &Path,
    payload: &str,
    value: u128,
    target: Option<Address>,
    commit: bool,
) -> Result<()> {
    let engine = EngineConfig::load(config_path)?;
    let ledger_path = engine.resolve_ledger_path(config_path);
    let checker = engine.checker(Box::new(SystemClock), ledger_path.as_deref())?;

    let handle = match checker.submit_tree(config::load_tree_file(tree_path)?) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("✗ {} ({})", e, e.as_str());
            std::process::exit(1);
        }
    };

    let payload = parse_hex(payload).context("Invalid payload hex")?;
    let operation = Operation::new(target.unwrap_or(Address::ZERO), payload, value);

    if !commit {
        return match checker.check(&handle, &operation) {
            Ok(consumptions) => {
                println!("✓ Permitted");
                println!("{}", serde_json::to_string_pretty(&consumptions)?);
                Ok(())
            }
            Err(e) => deny(&e),
        };
    }

    match checker.execute(&handle, &operation, || Ok::<_, Infallible>(())) {
        Ok(((), events)) => {
            println!("✓ Permitted, {} allowance(s) debited", events.len());
            println!("{}", serde_json::to_string_pretty(&events)?);
            if let Some(path) = ledger_path {
                checker
                    .ledger_snapshot()
                    .save(&path)
                    .with_context(|| format!("Failed to write ledger {}", path.display()))?;
            }
            Ok(())
        }
        Err(ExecutionError::Check(e)) => deny(&e),
        Err(ExecutionError::Downstream(never)) => match never {},
    }
}

fn deny(error: &CheckError) -> Result<()> {
    match error {
        CheckError::Violation(violation) => {
            eprintln!("✗ Denied: {}", violation);
            eprintln!("{}", serde_json::to_string_pretty(violation)?);
        }
        other => eprintln!("✗ {}", other),
    }
    std::process::exit(1);
}

/// Handle `rolecheck allowance --config <engine.yaml> <key>`
fn handle_allowance(config_path: &Path, key: &str) -> Result<()> {
    let engine = EngineConfig::load(config_path)?;
    let ledger_path = engine.resolve_ledger_path(config_path);
    let checker = engine.checker(Box::new(SystemClock), ledger_path.as_deref())?;

    let key = if key.starts_with("0x") {
        key.parse::<AllowanceKey>().context("Invalid allowance key")?
    } else {
        AllowanceKey::from_label(key)
    };

    match checker.allowance(&key) {
        Some(stored) => {
            println!("key: {}", key);
            println!("stored: {}", serde_json::to_string(&stored)?);
            println!("available: {}", checker.preview_allowance(&key));
        }
        None => {
            eprintln!("✗ No allowance configured for {}", key);
            std::process::exit(1);
        }
    }
    Ok(())
}
