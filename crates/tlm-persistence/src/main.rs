// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry writer CLI
//!
//! Consumes JSON-line messages through an in-process bus into SQLite and
//! serves read queries back out.
//!
//! # Usage
//!
//! ```bash
//! # Ingest SenML payloads from a file
//! tlm-writer --db tlm.db run --config filters.toml --input messages.jsonl
//!
//! # Ingest flattened JSON from stdin
//! cat messages.jsonl | tlm-writer run --content-type application/json
//!
//! # Page through a channel, newest first
//! tlm-writer --db tlm.db read chan-1 --limit 20 --filter subtopic=engine
//! ```
//!
//! Each input line is a message object:
//! `{"channel": "...", "subtopic": "...", "publisher": "...", "protocol": "...",
//! "created": <ns>, "payload": "<base64>"}`

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tlm_persistence::{ChannelBus, Config, Consumer, Context, MessageReader, SqliteStore};
use tlm_transformers::{content_type, RawMessage, RecordKind};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "tlm-writer")]
#[command(about = "Telemetry writer - transform bus messages and persist them", long_about = None)]
struct Args {
    /// Database path (SQLite file, ":memory:" allowed)
    #[arg(short, long, default_value = "tlm_messages.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Consume messages into the database
    Run {
        /// Filter file (TOML with [subjects] and [keys])
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Payload content type
        #[arg(long, default_value = content_type::SENML_JSON)]
        content_type: String,

        /// JSON-lines input file (default: stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Publish every message on this subject instead of its channel subject
        #[arg(short, long)]
        subject: Option<String>,

        /// Deadline of each save in milliseconds (0 = none)
        #[arg(long, default_value_t = 0)]
        write_timeout_ms: u64,
    },
    /// Print a page of SenML records of a channel as JSON
    Read {
        channel: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long, default_value_t = 10)]
        limit: u64,

        /// Equality filter, repeatable (subtopic, publisher, name, protocol)
        #[arg(short, long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
    /// Show record counts
    Stats,
}

fn parse_filter(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let store = Arc::new(
        SqliteStore::new(&args.db).with_context(|| format!("opening database {}", args.db))?,
    );

    match args.command {
        Commands::Run {
            config,
            content_type,
            input,
            subject,
            write_timeout_ms,
        } => {
            let mut builder = Config::builder()
                .content_type(content_type)
                .write_timeout_ms(write_timeout_ms);
            if let Some(path) = config {
                builder = builder.filter_config_path(path);
            }

            tracing::info!("Telemetry writer starting...");
            tracing::info!("  Database: {}", args.db);
            run(store, builder.build(), input, subject).await
        }
        Commands::Read {
            channel,
            offset,
            limit,
            filters,
        } => {
            let query: HashMap<String, String> = filters.into_iter().collect();
            let page = store.read_all(&Context::background(), &channel, offset, limit, &query)?;
            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(())
        }
        Commands::Stats => {
            println!("SenML records stored: {}", store.count(RecordKind::Senml)?);
            println!("JSON records stored: {}", store.count(RecordKind::Json)?);
            Ok(())
        }
    }
}

async fn run(
    store: Arc<SqliteStore>,
    config: Config,
    input: Option<PathBuf>,
    subject: Option<String>,
) -> Result<()> {
    tracing::info!("  Content type: {}", config.content_type);

    let (bus, sender) = ChannelBus::new(config.bus_capacity);
    let bus = Arc::new(bus);
    let consumer = Consumer::start(bus.as_ref(), store, &config)?;

    let shutdown = CancellationToken::new();
    let delivery = {
        let bus = Arc::clone(&bus);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bus.run(shutdown).await })
    };

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => Box::new(BufReader::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let feed = async move {
        let mut lines = reader.lines();
        let mut published = 0u64;
        let mut skipped = 0u64;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let message: RawMessage = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(e) => {
                    skipped += 1;
                    tracing::warn!("Skipping malformed input line: {}", e);
                    continue;
                }
            };

            match &subject {
                Some(subject) => sender.publish_to(subject.clone(), message).await?,
                None => sender.publish(message).await?,
            }
            published += 1;
        }

        // Dropping the sender lets the bus drain and stop
        anyhow::Ok((published, skipped))
    };

    tokio::select! {
        result = feed => {
            let (published, skipped) = result?;
            tracing::info!("Input done: {} published, {} skipped", published, skipped);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            consumer.shutdown();
            shutdown.cancel();
        }
    }

    let bus_stats = delivery.await?;
    let stats = consumer.stats();
    tracing::info!(
        "Delivered {} messages ({} unmatched, {} failed)",
        bus_stats.received,
        bus_stats.unmatched,
        bus_stats.handler_errors
    );
    tracing::info!(
        "Stored {} records; {} transform, {} conversion, {} storage failures",
        stats.records_stored,
        stats.transform_failures,
        stats.conversion_failures,
        stats.storage_failures
    );

    Ok(())
}
