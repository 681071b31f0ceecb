//! NOTAM Ingest - offline notice parser

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use notam_common::logging::{init_logging, LogConfig, LogLevel};
use notam_ingest::NoticeParser;
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "notam-ingest")]
#[command(author, version, about = "Parse NOTAM payloads into canonical records")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Parse payload files and print one JSON result per file
    Parse {
        /// XML or tagged-text payload files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Warn
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("notam-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Parse { files, pretty } => parse_files(&files, pretty),
    }
}

fn parse_files(files: &[PathBuf], pretty: bool) -> Result<()> {
    let parser = NoticeParser::new();
    let mut failures = 0usize;

    for path in files {
        let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let result = match parser.try_parse(&raw) {
            Ok(notice) => json!({ "file": path, "notice": notice }),
            Err(failure) => {
                failures += 1;
                json!({
                    "file": path,
                    "category": failure.category(),
                    "error": failure.to_string(),
                })
            },
        };

        let line = if pretty {
            serde_json::to_string_pretty(&result)?
        } else {
            serde_json::to_string(&result)?
        };
        println!("{line}");
    }

    info!(total = files.len(), failures, "Parsing complete");
    Ok(())
}
