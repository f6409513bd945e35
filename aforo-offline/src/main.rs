use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use aforo_core::queries;
use aforo_offline::{normalize_into, run_dataset_dir, DirRepository};
use aforo_types::DatasetId;

/// Offline runner for the aforo traffic-count pipeline.
#[derive(Parser)]
#[command(name = "aforo-offline", version, about)]
struct Cli {
    /// Root directory holding one subdirectory per dataset.
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalize a raw detection JSON dump into the dataset directory.
    Normalize {
        dataset: String,
        /// Path to the raw detection blob.
        input: PathBuf,
    },
    /// Track, classify, filter and aggregate one dataset.
    Run { dataset: String },
    /// Print the 15-minute interval volumes of a dataset.
    Report { dataset: String },
    /// List dataset directories under the data root.
    List,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> aforo_offline::Result<()> {
    match cli.command {
        Command::Normalize { dataset, input } => {
            let dataset = DatasetId::new(dataset);
            let metadata = normalize_into(&cli.data_dir, &dataset, &input)?;
            println!(
                "normalized {dataset}: {}x{} @ {} fps",
                metadata.width, metadata.height, metadata.fps
            );
        }
        Command::Run { dataset } => {
            let dataset = DatasetId::new(dataset);
            let summary = run_dataset_dir(&cli.data_dir, &dataset)?;
            if summary.cancelled {
                println!("{dataset}: cancelled");
            } else {
                println!(
                    "{dataset}: {} tracks, {} events ({} counted)",
                    summary.stats.total_tracks_raw,
                    summary.events_total,
                    summary.stats.events_emitted
                );
            }
        }
        Command::Report { dataset } => {
            let dataset = DatasetId::new(dataset);
            let repo = DirRepository::new(&cli.data_dir);
            let intervals = queries::get_intervals(&repo, &dataset)?;
            if intervals.is_empty() {
                println!("{dataset}: no interval counts");
            }
            for interval in intervals {
                if let Some(data) = queries::get_interval_data(&repo, &dataset, interval)? {
                    println!("{}", interval.to_rfc3339());
                    for ((code, class), count) in &data.counts_by_key {
                        println!("  {code:>5}  {class:<12} {count}");
                    }
                }
            }
        }
        Command::List => {
            let repo = DirRepository::new(&cli.data_dir);
            for dataset in repo.list_datasets()? {
                println!("{dataset}");
            }
        }
    }
    Ok(())
}
