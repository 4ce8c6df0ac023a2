use std::env;
use std::error::Error;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Human-readable by default, bunyan JSON when `JSON_LOG=true`. `RUST_LOG`
/// wins over `default_level`. Logs go to stderr, stdout carries command output.
pub fn init(default_level: &str) -> Result<Option<WorkerGuard>, Box<dyn Error>> {
    use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
    use tracing_log::LogTracer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    if !json_log_enabled() {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter(default_level))
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| -> Box<dyn Error> { e })?;
        return Ok(None);
    }

    // Redirect the logs from log library to tracing's subscribers.
    LogTracer::init()?;

    let app_name = concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION")).to_string();

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let bunyan_formatting_layer = BunyanFormattingLayer::new(app_name, non_blocking_writer);
    let subscriber = Registry::default()
        .with(env_filter(default_level))
        .with(JsonStorageLayer)
        .with(bunyan_formatting_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(Some(guard))
}

fn json_log_enabled() -> bool {
    env::var("JSON_LOG").map_or(false, |s| s.parse().unwrap_or_default())
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let first = init("info");
        assert!(first.is_ok());
        assert!(init("debug").is_err());
    }
}
