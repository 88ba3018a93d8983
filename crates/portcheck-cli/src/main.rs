use std::path::PathBuf;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use portcheck_adapters::load_table;
use portcheck_audit::{AuditConfig, AuditPipeline};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "portcheck")]
#[command(about = "Flags duplicated NAP port assignments for manual review")]
struct Cli {
    /// Configuration file; defaults apply when it does not exist.
    #[arg(long, default_value = "portcheck.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the audit pipeline end to end (the default).
    Run {
        /// Source table; overrides the configured input.
        #[arg(long)]
        input: Option<PathBuf>,
        /// Report directory; overrides the configured location.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Cutoff date (YYYY-MM-DD); overrides the configured value.
        #[arg(long)]
        cutoff: Option<NaiveDate>,
        /// Comma-separated client groups to skip; overrides the configured list.
        #[arg(long, value_delimiter = ',')]
        ignored_client_groups: Option<Vec<String>>,
    },
    /// Check that the input table carries every bound column, then exit.
    Validate {
        /// Source table; overrides the configured input.
        #[arg(long)]
        input: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = if cli.config.exists() {
        AuditConfig::from_file(&cli.config)?
    } else {
        AuditConfig::default()
    };
    tracing::debug!(config = ?config, "resolved configuration");

    match cli.command.unwrap_or(Commands::Run {
        input: None,
        output_dir: None,
        cutoff: None,
        ignored_client_groups: None,
    }) {
        Commands::Run {
            input,
            output_dir,
            cutoff,
            ignored_client_groups,
        } => {
            if let Some(input) = input {
                config.input = input;
            }
            if let Some(output_dir) = output_dir {
                config.output_dir = output_dir;
            }
            if let Some(cutoff) = cutoff {
                config.cutoff = cutoff;
            }
            if let Some(ignored) = ignored_client_groups {
                config.ignored_client_groups = ignored;
            }
            let summary = AuditPipeline::new(config).run()?;
            println!(
                "audit complete: run_id={} input_rows={} flagged_groups={} selected_rows={} artifact={}",
                summary.run_id,
                summary.input_rows,
                summary.flagged_groups,
                summary.selected_rows,
                summary.artifact.path.display()
            );
        }
        Commands::Validate { input } => {
            if let Some(input) = input {
                config.input = input;
            }
            let table = load_table(&config.input, &config.columns)?;
            println!(
                "columns ok: {} data rows, {} columns in {}",
                table.records.len(),
                table.header.len(),
                config.input.display()
            );
        }
    }

    Ok(())
}
