/// Miniflow: multi-tenant workflow automation service
///
/// Main entry point. Subcommands:
/// - setup: create the schema and seed plans/global scripts (idempotent)
/// - run: start the HTTP service plus the scheduler/collector loops
/// - quickstart: interactive .env wizard
/// - help: clap-generated usage

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use rand::rngs::OsRng;
use rand::RngCore;
use std::io::Write;

use miniflow::config::Config;

#[derive(Parser)]
#[command(name = "miniflow", about = "Multi-tenant workflow automation service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the schema and seed plans, roles and global scripts
    Setup,
    /// Start the HTTP service plus scheduler/collector loops
    Run,
    /// Interactive .env wizard
    Quickstart,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Setup => {
            let config = Config::load()?;
            miniflow::setup::run_setup(&config).await?;
        }
        Command::Run => {
            let config = Config::load()?;
            miniflow::server::start_server(config).await?;
        }
        Command::Quickstart => quickstart()?,
    }
    Ok(())
}

/// Prompt for the handful of required settings and write .env
fn quickstart() -> Result<()> {
    if std::path::Path::new(".env").exists() {
        bail!(".env already exists; remove it first or edit it directly");
    }

    println!("Miniflow quickstart — press enter to accept defaults.\n");
    let host = prompt("Server host", "0.0.0.0")?;
    let port = prompt("Server port", "3004")?;
    let dsn = prompt("SQLite database path", "data/miniflow.db")?;
    let jwt_secret = prompt("JWT secret (blank = generate)", "")?;
    let jwt_secret = if jwt_secret.is_empty() { random_key() } else { jwt_secret };
    let encryption_key = prompt("Encryption key (blank = generate)", "")?;
    let encryption_key = if encryption_key.is_empty() { random_key() } else { encryption_key };

    let contents = format!(
        "APP_ENV=local\nDB_TYPE=sqlite\nDATABASE_DSN={}\nMINIFLOW_HOST={}\nMINIFLOW_PORT={}\nJWT_SECRET_KEY={}\nENCRYPTION_KEY={}\n",
        dsn, host, port, jwt_secret, encryption_key
    );
    std::fs::write(".env", contents)?;
    println!("\nWrote .env — next steps:\n  miniflow setup\n  miniflow run");
    Ok(())
}

fn prompt(label: &str, default: &str) -> Result<String> {
    if default.is_empty() {
        print!("{}: ", label);
    } else {
        print!("{} [{}]: ", label, default);
    }
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let value = line.trim();
    Ok(if value.is_empty() { default.to_string() } else { value.to_string() })
}

fn random_key() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
