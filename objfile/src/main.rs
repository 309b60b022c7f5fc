//! # objaddr - Main Entry Point
//!
//! Supports two modes:
//! - **Process** (`--pid <PID>`): mappings come from `/proc/<pid>/maps`
//! - **Explicit** (`--binary <PATH> --start <ADDR> --limit <ADDR>`): a single
//!   mapping given on the command line

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;

use objfile::cli::{Args, OutputFormat};
use objfile::domain::Pid;
use objfile::objectfile::{Loader, ObjectFilePool};
use objfile::symbolization::{AddressTranslator, MemoryMapping, Translation};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(true) => EXIT_SUCCESS,
        Ok(false) => EXIT_ERROR,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Result for one requested address, as printed in JSON mode.
#[derive(Serialize)]
#[serde(untagged)]
enum Outcome {
    Translated(Translation),
    Failed { address: u64, error: String },
}

/// Build the translator for the mode selected on the command line.
fn build_translator(args: &Args, pool: Arc<ObjectFilePool>) -> Result<AddressTranslator> {
    if let Some(pid) = args.pid {
        return AddressTranslator::for_process(Pid(pid), pool)
            .with_context(|| format!("Failed to read mappings of process {pid}"));
    }

    if let (Some(path), Some(start), Some(limit)) = (&args.binary, args.start, args.limit) {
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve path: {}", path.display()))?;
        let mapping =
            MemoryMapping { start, end: limit, offset: args.offset, perms: String::new(), path };
        return Ok(AddressTranslator::new(None, vec![mapping], pool));
    }

    anyhow::bail!(
        "Missing required argument: --pid or --binary\n\n\
         Usage:\n  \
         objaddr --pid 1234 ADDRESS...\n  \
         objaddr --binary ./app --start ADDR --limit ADDR [--offset ADDR] ADDRESS...\n\n\
         Run 'objaddr --help' for more options"
    )
}

/// Translate every requested address. Returns whether all of them succeeded.
fn run() -> Result<bool> {
    let args = Args::parse();
    let pool = Arc::new(ObjectFilePool::new(Loader::default(), args.cache_size));
    let translator = build_translator(&args, Arc::clone(&pool))?;

    let outcomes: Vec<Outcome> = args
        .addresses
        .iter()
        .map(|&addr| match translator.translate(addr) {
            Ok(translation) => Outcome::Translated(translation),
            Err(err) => Outcome::Failed { address: addr, error: err.to_string() },
        })
        .collect();

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    match args.format {
        OutputFormat::Text => {
            for outcome in &outcomes {
                match outcome {
                    Outcome::Translated(t) => writeln!(out, "{t}")?,
                    Outcome::Failed { address, error } => {
                        writeln!(out, "{address:#x} error: {}", error.replace('\n', "; "))?;
                    }
                }
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &outcomes).context("Failed to write JSON")?;
            writeln!(out)?;
        }
    }
    out.flush()?;

    let failed = outcomes.iter().filter(|o| matches!(o, Outcome::Failed { .. })).count();
    if !args.quiet {
        info!(
            "Translated {}/{} addresses ({} object files open)",
            outcomes.len() - failed,
            outcomes.len(),
            pool.len()
        );
    }
    Ok(failed == 0)
}
