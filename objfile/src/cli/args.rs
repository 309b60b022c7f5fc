//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "objaddr",
    about = "Translate runtime addresses into ELF file addresses",
    after_help = "\
EXAMPLES:
    objaddr --pid 1234 0x55d0c0a03a10             Translate against a live process
    objaddr --binary ./app --start 0x400000 \\
            --limit 0x401000 0x400123             Translate against an explicit mapping"
)]
pub struct Args {
    /// Runtime addresses to translate (hex with or without 0x, or decimal)
    #[arg(value_name = "ADDRESS", required = true, value_parser = parse_address)]
    pub addresses: Vec<u64>,

    /// Process ID whose /proc/<pid>/maps describes the mappings
    #[arg(short, long, conflicts_with = "binary")]
    pub pid: Option<i32>,

    /// Object file backing an explicit mapping
    #[arg(short, long, requires_all = ["start", "limit"])]
    pub binary: Option<PathBuf>,

    /// Start of the explicit mapping
    #[arg(long, value_parser = parse_address)]
    pub start: Option<u64>,

    /// End (exclusive) of the explicit mapping
    #[arg(long, value_parser = parse_address)]
    pub limit: Option<u64>,

    /// File offset the explicit mapping starts at
    #[arg(long, default_value = "0", value_parser = parse_address)]
    pub offset: u64,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Maximum number of open object files (0 = unlimited)
    #[arg(long, default_value = "64")]
    pub cache_size: usize,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Parse an address given as `0x`-prefixed hex, bare hex, or decimal.
///
/// Digit-only strings are read as decimal.
///
/// # Errors
/// Returns a message if `s` is not a valid address.
pub fn parse_address(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse()
    } else {
        u64::from_str_radix(s, 16)
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}
