//! Command-line interface for bulkload
//!
//! # Usage Examples
//!
//! ```bash
//! # List configured destinations
//! bulkload --config file://bulkload.yaml destinations
//!
//! # Load an ND-JSON file into a table, committing every batch_size rows
//! bulkload --config bulkload.yaml load \
//!   --destination analytics --table events events.ndjson
//!
//! # Replace one partition, merging rows on the primary key
//! BULKLOAD_CONFIG_SOURCE=bulkload.yaml bulkload load \
//!   --destination analytics --table events \
//!   --mode replace_partition --partition-id 2024-01-01 \
//!   --primary-key id --merge-rows events-2024-01-01.ndjson
//! ```

use std::path::PathBuf;

use anyhow::Context;
use bulkload::{
    BulkMode, BulkerStream, ConfigurationSource, Record, Registry, State, Status, StreamOptions,
    YamlConfigurationSource,
};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "bulkload")]
#[command(about = "Stream ND-JSON records into SQL tables and object storage")]
#[command(long_about = None)]
struct Cli {
    /// Configuration source: `file://<path>` or a plain path to a YAML file
    #[arg(long = "config", env = "BULKLOAD_CONFIG_SOURCE")]
    config_source: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an ND-JSON file into a destination table
    Load {
        /// Destination id from the configuration
        #[arg(long)]
        destination: String,

        /// Target table
        #[arg(long)]
        table: String,

        /// Bulk mode: autocommit, transactional, replace_table, replace_partition
        #[arg(long, default_value = "transactional")]
        mode: BulkMode,

        /// Partition replaced in replace_partition mode
        #[arg(long)]
        partition_id: Option<String>,

        /// Primary key column (repeatable)
        #[arg(long = "primary-key", value_name = "COLUMN")]
        primary_key: Vec<String>,

        /// Upsert on the primary key; the last record with a key wins
        #[arg(long)]
        merge_rows: bool,

        /// Stop at the first record that fails instead of skipping it
        #[arg(long)]
        fail_fast: bool,

        /// ND-JSON input file
        file: PathBuf,
    },

    /// List configured destinations
    Destinations,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bulkload=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let source = YamlConfigurationSource::from_uri(&cli.config_source)?;

    match cli.command {
        Commands::Destinations => {
            for destination in source.destination_configs() {
                println!(
                    "{}\t{}\t{}\tbatch_size={}",
                    destination.config.id,
                    destination.id(),
                    destination.config.bulker_type,
                    destination.batch_size
                );
            }
            Ok(())
        }
        Commands::Load {
            destination,
            table,
            mode,
            partition_id,
            primary_key,
            merge_rows,
            fail_fast,
            file,
        } => {
            let mut options = StreamOptions::new().with_primary_key(primary_key);
            if merge_rows {
                options = options.with_merge_rows();
            }
            if let Some(partition_id) = partition_id {
                options = options.with_partition(partition_id);
            }
            let args = LoadArgs {
                destination,
                table,
                mode,
                options,
                fail_fast,
                file,
            };
            let state = run_load(&source, args).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
    }
}

struct LoadArgs {
    destination: String,
    table: String,
    mode: BulkMode,
    options: StreamOptions,
    fail_fast: bool,
    file: PathBuf,
}

/// Stream `args.file` into the destination. AutoCommit and Transactional
/// loads commit every `batch_size` rows; replace modes commit once, since
/// each commit replaces the previous one.
async fn run_load(source: &dyn ConfigurationSource, args: LoadArgs) -> anyhow::Result<State> {
    let destination = source
        .destination_config(&args.destination)
        .with_context(|| format!("Unknown destination: {}", args.destination))?;
    let bulker = Registry::with_defaults()
        .create(destination.config.clone())
        .await
        .with_context(|| format!("Failed to connect destination {}", args.destination))?;

    let batch_size = match args.mode {
        BulkMode::AutoCommit | BulkMode::Transactional => destination.batch_size.max(1),
        BulkMode::ReplaceTable | BulkMode::ReplacePartition => usize::MAX,
    };

    let input = tokio::fs::File::open(&args.file)
        .await
        .with_context(|| format!("Failed to open input file: {}", args.file.display()))?;
    let mut lines = BufReader::new(input).lines();

    tracing::info!(
        "Loading {} into {}.{} ({} mode)",
        args.file.display(),
        args.destination,
        args.table,
        args.mode
    );

    let mut total = State::new();
    let mut batch_no = 0usize;
    let mut stream: Option<Box<dyn BulkerStream>> = None;
    let mut in_batch = 0usize;
    let mut line_no = 0usize;

    let result: anyhow::Result<()> = async {
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            if stream.is_none() {
                batch_no += 1;
                let id = format!("{}_{}_{batch_no}", args.destination, args.table);
                stream = Some(bulker.create_stream(
                    id,
                    args.table.clone(),
                    args.mode,
                    args.options.clone(),
                )?);
            }
            let current = stream.as_mut().context("no open stream")?;

            let consumed = match Record::from_json_str(&line) {
                Ok(record) => current.consume(record).await,
                Err(err) => {
                    // Never reached the stream, so count it here
                    total.processed_rows += 1;
                    Err(err)
                }
            };
            if let Err(err) = consumed {
                if args.fail_fast {
                    return Err(err).with_context(|| format!("line {line_no}"));
                }
                tracing::warn!("Skipping line {line_no}: {err}");
                total.last_error = Some(format!("line {line_no}: {err}"));
                continue;
            }

            in_batch += 1;
            if in_batch >= batch_size {
                if let Some(mut full) = stream.take() {
                    accumulate(&mut total, full.complete().await?);
                }
                in_batch = 0;
            }
        }
        if let Some(mut last) = stream.take() {
            accumulate(&mut total, last.complete().await?);
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        if let Some(mut open) = stream.take() {
            if let Err(abort_err) = open.abort().await {
                tracing::warn!("Failed to abort stream: {abort_err}");
            }
        }
        bulker.close().await.ok();
        return Err(err);
    }

    bulker.close().await?;
    total.status = Status::Completed;
    tracing::info!(
        "Loaded {} of {} rows into {}",
        total.successful_rows,
        total.processed_rows,
        args.table
    );
    Ok(total)
}

fn accumulate(total: &mut State, state: State) {
    total.processed_rows += state.processed_rows;
    total.successful_rows += state.successful_rows;
    if state.last_error.is_some() {
        total.last_error = state.last_error;
    }
}
