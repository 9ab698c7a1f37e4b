//! idempotent CLI — operator interface to the request store.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use idempotent_rs::Idempotent;
use idempotent_rs::config::Config;
use idempotent_rs::model::RequestState;
use idempotent_rs::store::{PgStore, RequestStore};
use idempotent_rs::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

#[derive(Parser)]
#[command(name = "idempotent", about = "Run commands at most once per idempotency key")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or upgrade the request table
    Migrate,
    /// Show the record stored for a key
    Show {
        /// Idempotency key
        key: String,
    },
    /// Delete expired records
    Purge,
    /// Run a command at most once for a key and print its output
    Run {
        /// Idempotency key
        key: String,
        /// Wait deadline for callers that lose the claim (e.g. "30s", "1m", or milliseconds)
        #[arg(long)]
        timeout: Option<String>,
        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

/// Stored result of a `run` command.
#[derive(Debug, Serialize, Deserialize)]
struct CommandOutput {
    exit_code: i32,
    stdout: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "idempotent".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let store = PgStore::connect(config.database_url.expose_secret(), config.expiry).await?;

    match cli.command {
        Command::Migrate => {
            store.migrate().await?;
            println!("Migrations applied.");
            Ok(())
        }
        Command::Show { key } => cmd_show(&store, &key).await,
        Command::Purge => {
            let removed = store.purge_expired().await?;
            println!("Purged {removed} expired record(s).");
            Ok(())
        }
        Command::Run {
            key,
            timeout,
            command,
        } => cmd_run(&config, store, key, timeout, command).await,
    }
}

async fn cmd_show(store: &PgStore, key: &str) -> anyhow::Result<()> {
    let Some(request) = store.get(key).await? else {
        println!("No record for '{key}'.");
        return Ok(());
    };

    println!("Key:      {}", request.id);
    println!("Status:   {}", request.status());
    match request.state {
        RequestState::Started => {}
        RequestState::Done { ref result } => {
            println!("Result:   {}", serde_json::to_string_pretty(result)?);
        }
        RequestState::Failed { ref error } => println!("Error:    {error}"),
    }
    println!("Created:  {}", request.created_at);
    println!("Updated:  {}", request.updated_at);
    Ok(())
}

async fn cmd_run(
    config: &Config,
    store: PgStore,
    key: String,
    timeout: Option<String>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let mut settings = config.idempotent_config();
    if let Some(expr) = timeout {
        settings = settings.with_timeout_expr(&expr)?;
    }
    let idempotent = Idempotent::new(Arc::new(store), settings);

    let Some((program, args)) = command.split_first() else {
        anyhow::bail!("no command given");
    };

    let output = idempotent
        .execute(|| run_command(program, args), &key)
        .await?;

    print!("{}", output.stdout);
    Ok(())
}

async fn run_command(program: &str, args: &[String]) -> anyhow::Result<CommandOutput> {
    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await?;
    let exit_code = output.status.code().unwrap_or(-1);
    if !output.status.success() {
        anyhow::bail!(
            "{program} exited with {exit_code}: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}
