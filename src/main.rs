#![warn(rust_2018_idioms)]

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::app::App;
use crate::config::Config;

mod app;
mod config;
mod logging;

/// Kafka topic and connector operations over REST proxies and gateways.
#[derive(Parser, Debug)]
#[command(name = "kafka-gateway", version)]
struct Cli {
    /// JSON5 config file (default: $KAFKA_GATEWAY_CONFIG, then ~/.kafka-gateway.json5)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticate and probe every configured service.
    AuthStatus,
    /// Refresh the token of every configured service.
    Refresh,
    /// Print the backend order of every operation.
    Routes,
    /// Run an operation: `<tool> ['{"json": "arguments"}']`.
    #[command(external_subcommand)]
    Tool(Vec<String>),
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config).await?;
    let _guard = logging::init(&config.log_level)?;
    let app = App::build(&config)?;

    let (output, succeeded) = match cli.command {
        Command::AuthStatus => {
            let statuses = app.auth().test_all_services().await;
            let succeeded = statuses.values().all(|s| s.authenticated);
            (serde_json::to_value(statuses)?, succeeded)
        }
        Command::Refresh => {
            let refreshed = app.auth().refresh_all_tokens().await;
            let succeeded = refreshed.values().all(|ok| *ok);
            (serde_json::to_value(refreshed)?, succeeded)
        }
        Command::Routes => (app.route_table(), true),
        Command::Tool(args) => {
            let (tool, rest) = args.split_first().ok_or("missing tool name")?;
            let arguments = match rest {
                [] => Value::Null,
                [raw] => serde_json::from_str(raw)?,
                _ => return Err("expected a single JSON arguments object".into()),
            };

            let result = app.dispatch(tool, arguments).await?;
            tracing::debug!(stats = ?app.stats().snapshot(), "Attempt statistics");
            (serde_json::to_value(&result)?, result.succeeded)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
