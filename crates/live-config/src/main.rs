//! live-config binary entry point.
//!
//! Usage: live-config [--redis-url <url>] [--namespace <ns>] <get|set|dump|watch>

use anyhow::Context;
use clap::{Parser, Subcommand};
use live_config::config::{timeout_from_millis, DEFAULT_REDIS_URL};
use live_config::{LiveConfig, LiveConfigOptions, MirrorEvent, Namespace};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

/// Inspect and update a live config set.
#[derive(Parser, Debug)]
#[command(name = "live-config")]
#[command(about = "Inspect and update a live config set shared through Redis")]
struct Args {
    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    redis_url: String,

    /// Namespace (production or test).
    #[arg(long, env = "LIVE_CONFIG_NAMESPACE", default_value = "production")]
    namespace: String,

    /// Store operation timeout in milliseconds (0 disables).
    #[arg(long, env = "LIVE_CONFIG_TIMEOUT_MS", default_value = "5000")]
    timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read one persisted value.
    Get { key: String },
    /// Persist a value and broadcast it to every mirror.
    ///
    /// The value is parsed as JSON when possible, otherwise used as a string.
    Set { key: String, value: String },
    /// Print the whole persisted config as JSON.
    Dump,
    /// Keep a mirror running and log every change until Ctrl-C.
    Watch,
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "live-config".into(),
        default_level: args.log_level.clone(),
        json: args.json_logs,
    });

    let namespace: Namespace = args.namespace.parse()?;
    let options = LiveConfigOptions::new(args.redis_url.clone())
        .with_namespace(namespace)
        .with_operation_timeout(timeout_from_millis(args.timeout_ms));

    info!(
        namespace = %namespace,
        record = %options.record_key(),
        topic = %options.topic(),
        timeout_ms = args.timeout_ms,
        "Configuration loaded"
    );

    let live = LiveConfig::new(options).context("invalid Redis URL")?;

    match args.command {
        Command::Get { key } => {
            live.start(None).await.context("failed to start live config")?;
            match live.get(&key).await? {
                Some(entry) => println!("{}", entry.value),
                None => {
                    warn!(key = %key, "Key not found");
                    std::process::exit(1);
                }
            }
        }
        Command::Set { key, value } => {
            live.start(None).await.context("failed to start live config")?;
            let entry = live.set(&key, parse_value(&value)).await?;
            live.close().await;
            info!(key = %entry.key, value = %entry.value, "Value set");
        }
        Command::Dump => {
            let config = live.start(None).await.context("failed to start live config")?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Watch => watch(&live).await?,
    }

    Ok(())
}

async fn watch(live: &LiveConfig) -> anyhow::Result<()> {
    let mut events = live.subscribe();
    let config = live.start(None).await.context("failed to start live config")?;
    info!(keys = config.len(), "Watching for changes");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(MirrorEvent::Updated { key, value, origin }) => {
                    info!(key = %key, value = %value, origin = ?origin, "Config changed");
                }
                Ok(MirrorEvent::Error(message)) => {
                    error!(error = %message, "Live config error");
                    anyhow::bail!(message);
                }
                Ok(MirrorEvent::Started(_)) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, exiting...");
                break;
            }
        }
    }

    live.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("5"), serde_json::json!(5));
        assert_eq!(parse_value("true"), serde_json::json!(true));
        assert_eq!(parse_value("http://some-host"), serde_json::json!("http://some-host"));
        assert_eq!(parse_value(r#""quoted""#), serde_json::json!("quoted"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["live-config", "--namespace", "test", "set", "host", "h"])
            .unwrap();
        assert_eq!(args.namespace, "test");
        assert!(matches!(args.command, Command::Set { ref key, .. } if key == "host"));
    }
}
