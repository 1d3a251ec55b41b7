//! # Ledger Repair
//!
//! Replays every ledger chain and rewrites drifted balance/due snapshots.
//! Safe to run repeatedly; a healthy ledger reports zero corrections.
//!
//! ## Usage
//! ```bash
//! CYLINDER_DB_PATH=./data/ledger.db cargo run -p cylinder-db --bin repair
//!
//! # One chain only
//! cargo run -p cylinder-db --bin repair -- --customer cust-0001 --variant var-dom14
//! ```
//!
//! Prints the report as JSON on stdout.

use std::env;
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use cylinder_db::{ApiError, AppConfig, Database};

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,cylinder=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (customer, variant) = match parse_args(&args) {
        Ok(Command::Repair { customer, variant }) => (customer, variant),
        Ok(Command::Help) => {
            println!("Usage: repair [--customer <ID> [--variant <ID>]]");
            println!();
            println!("Database and engine settings come from CYLINDER_* environment variables.");
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("{}", message);
            eprintln!("Usage: repair [--customer <ID> [--variant <ID>]]");
            return ExitCode::from(2);
        }
    };

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    let db = match Database::new(config.db).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let engine = db.engine(config.engine);

    let result = match &customer {
        Some(customer) => engine.repair_chain(customer, variant.as_deref()).await,
        None => engine.repair_all_chains().await,
    };
    db.close().await;

    match result {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to encode report: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            let api = ApiError::from(e);
            match serde_json::to_string_pretty(&api) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("{}", api),
            }
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Help,
    Repair {
        customer: Option<String>,
        variant: Option<String>,
    },
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut customer = None;
    let mut variant = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--customer" => customer = Some(flag_value(&mut iter, "--customer")?),
            "--variant" => variant = Some(flag_value(&mut iter, "--variant")?),
            "--help" | "-h" => return Ok(Command::Help),
            other => return Err(format!("Unknown argument: {}", other)),
        }
    }

    if variant.is_some() && customer.is_none() {
        return Err("--variant requires --customer".to_string());
    }
    Ok(Command::Repair { customer, variant })
}

fn flag_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<String, String> {
    match iter.next() {
        Some(value) if !value.starts_with("--") => Ok(value.clone()),
        _ => Err(format!("{} needs a value", flag)),
    }
}
