//! Flowstream Pump
//!
//! Pipes a byte source through a flow-controlled stream into one or more
//! sinks: stdout and any number of `--tee` files.
//!
//! # Usage
//!
//! ```bash
//! # stdin to stdout in 16 KiB chunks
//! flowstream-pump < input.bin
//!
//! # Read a file, copy to stdout and two files, base64-encoded in 1 KiB chunks
//! flowstream-pump --input data.bin --tee a.txt --tee b.txt \
//!     --encoding base64 --high-water-mark 1024
//!
//! # With verbose logging
//! RUST_LOG=debug flowstream-pump < input.bin
//! ```
//!
//! # Configuration
//!
//! Stream options are resolved in order: `--config <file>`, then
//! `$XDG_CONFIG_HOME/flowstream/stream.toml` if present, then the
//! `FLOWSTREAM_*` environment variables. `--high-water-mark` and `--encoding`
//! override whichever source was used.

mod pump;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncRead;
use tracing::{info, warn};

use flowstream_core::{
    default_config_path, load_config_from_path, ChannelSink, Encoding, StreamConfig, StreamCore,
};

use crate::pump::Pump;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "flowstream-pump", version, about)]
struct Args {
    /// Read from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Also write every chunk to this file (repeatable)
    #[arg(short, long)]
    tee: Vec<PathBuf>,

    /// Do not write to stdout
    #[arg(long)]
    no_stdout: bool,

    /// Stream options file (TOML)
    #[arg(short, long, env = "FLOWSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Override the chunk size limit in bytes
    #[arg(long)]
    high_water_mark: Option<usize>,

    /// Override the payload encoding
    #[arg(long)]
    encoding: Option<String>,

    /// Chunks queued per sink before the pump pauses
    #[arg(long, default_value_t = 16)]
    sink_capacity: usize,
}

/// Resolve stream configuration from file, environment and flags
fn resolve_config(args: &Args) -> Result<StreamConfig> {
    let mut config = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                info!(path = ?path, "Using default config file");
                load_config_from_path(&path)?
            }
            None => StreamConfig::from_env(),
        },
    };

    if let Some(hwm) = args.high_water_mark {
        config = config.with_high_water_mark(hwm);
    }
    if let Some(name) = &args.encoding {
        let encoding = Encoding::from_name_lossy(name);
        if encoding.name() != name.as_str() {
            warn!(requested = %name, using = %encoding, "Encoding name normalized");
        }
        config = config.with_encoding(encoding);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for data
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("flowstream_pump=info".parse()?)
                .add_directive("flowstream_core=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    info!(
        high_water_mark = config.high_water_mark,
        encoding = %config.encoding,
        "Starting pump"
    );

    let stream = StreamCore::new(config).context("Invalid stream configuration")?;

    let mut sinks = Vec::new();
    let mut writers = Vec::new();

    if !args.no_stdout {
        let (sink, handle) =
            ChannelSink::spawn_writer("stdout", args.sink_capacity, tokio::io::stdout());
        sinks.push(sink);
        writers.push(handle);
    }
    for path in &args.tee {
        let file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create tee file {path:?}"))?;
        let (sink, handle) =
            ChannelSink::spawn_writer(path.display().to_string(), args.sink_capacity, file);
        sinks.push(sink);
        writers.push(handle);
    }

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {path:?}"))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let mut pump = Pump::new(stream, sinks)?;
    let summary = pump.run(reader).await?;

    // Dropping the sinks lets each writer task drain and flush
    drop(pump.into_sinks());
    for handle in writers {
        match handle.await {
            Ok(Ok(bytes)) => info!(bytes = bytes, "Sink drained"),
            Ok(Err(e)) => warn!(error = %e, "Sink writer failed"),
            Err(e) => warn!(error = %e, "Sink writer task panicked"),
        }
    }

    info!(
        chunks = summary.chunks,
        bytes = summary.bytes_read,
        "Done"
    );
    Ok(())
}
