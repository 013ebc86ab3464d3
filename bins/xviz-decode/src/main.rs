use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::{Value, json};

use xviz_api::DecodeError;
use xviz_config_hcl::HclParser;
use xviz_engine::config::{ConfiguredPanels, EngineConfig, TomlParser};
use xviz_engine::{DecodePool, Delivery, EngineError};

#[derive(Parser)]
#[command(name = "xviz-decode", about = "Decode XVIZ log messages off-thread")]
struct Cli {
    /// Path to a TOML or HCL configuration file. Defaults apply when absent.
    #[arg(long, global = true, env = "XVIZ_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decode each file as one message and print a JSON summary per file.
    Decode {
        #[arg(required = true)]
        files: Vec<String>,

        /// Pretty-print the summaries.
        #[arg(long)]
        pretty: bool,
    },
    /// Validate the configuration and exit.
    CheckConfig,
    /// Print the UI metadata composed from the configured panels.
    Metadata,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Command::CheckConfig => {
            tracing::info!(
                encoding = ?config.parser.encoding,
                legacy_shapes = ?config.parser.legacy_shapes,
                max_in_flight = config.pool.max_in_flight,
                panels = config.ui.len(),
                "configuration is valid"
            );
            0
        }
        Command::Metadata => {
            let pool = build_pool(config);
            print_json(&pool.metadata(), true);
            0
        }
        Command::Decode { files, pretty } => {
            let pool = build_pool(config);
            match decode_files(&pool, &files, pretty).await {
                Ok(failed) if failed == 0 => 0,
                Ok(failed) => {
                    tracing::warn!(failed, total = files.len(), "some files failed to decode");
                    2
                }
                Err(e) => {
                    tracing::error!(error = %e, "decode aborted");
                    1
                }
            }
        }
    };

    std::process::exit(code);
}

fn load_config(path: Option<&str>) -> Result<EngineConfig, EngineError> {
    match path {
        Some(path) => {
            tracing::info!(config = %path, "loading configuration");
            EngineConfig::load_with(path, &[&TomlParser, &HclParser])
        }
        None => {
            tracing::debug!("no configuration file, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

fn build_pool(config: EngineConfig) -> DecodePool {
    let panels = Arc::new(ConfiguredPanels::new(config.ui.clone()));
    DecodePool::new(config.parser_handle(), &config.pool).with_provider(panels)
}

/// Returns the number of files that failed.
async fn decode_files(pool: &DecodePool, files: &[String], pretty: bool) -> Result<usize, EngineError> {
    let mut payloads = Vec::with_capacity(files.len());
    for file in files {
        let bytes = std::fs::read(file).map_err(|e| {
            EngineError::Io(std::io::Error::new(e.kind(), format!("{file}: {e}")))
        })?;
        tracing::debug!(file = %file, bytes = bytes.len(), "read message");
        payloads.push(bytes);
    }

    let results = pool.decode_all(payloads).await?;

    let mut failed = 0;
    for (file, result) in files.iter().zip(results) {
        if result.is_err() {
            failed += 1;
        }
        print_json(&summarize(file, result), pretty);
    }
    Ok(failed)
}

fn summarize(file: &str, result: Result<Delivery, DecodeError>) -> Value {
    match result {
        Ok(delivery) => {
            let points: usize = delivery
                .records
                .iter()
                .filter_map(|r| r.point_cloud.as_ref())
                .map(|c| c.point_count())
                .sum();
            let (first, last) = match (delivery.records.first(), delivery.records.last()) {
                (Some(f), Some(l)) => (json!(f.time), json!(l.time)),
                _ => (Value::Null, Value::Null),
            };
            json!({
                "file": file,
                "ok": true,
                "records": delivery.records.len(),
                "first_time": first,
                "last_time": last,
                "points": points,
                "blocks": delivery.manifest.len(),
                "bytes": delivery.manifest.byte_len(),
            })
        }
        Err(e) => json!({
            "file": file,
            "ok": false,
            "error": { "kind": e.kind().to_string(), "message": e.message },
        }),
    }
}

fn print_json(value: &Value, pretty: bool) {
    let out = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match out {
        Ok(s) => println!("{s}"),
        Err(e) => tracing::error!(error = %e, "failed to render output"),
    }
}
