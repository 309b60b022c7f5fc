//! Memory mapping utilities for process address space analysis
//!
//! Parses `/proc/<pid>/maps` into the file-backed mappings of a process. Each
//! entry carries the file offset it was mapped from, which is what the base
//! computation needs alongside the runtime range.

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use crate::domain::Pid;

/// One file-backed mapping from `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub perms: String,
    pub path: PathBuf,
}

impl MemoryMapping {
    /// Check if an address falls within this mapping
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.perms.contains('x')
    }
}

/// Parse one maps line: `start-end perms offset dev inode [pathname]`.
///
/// Returns `None` for anonymous and pseudo mappings (`[heap]`, `[stack]`,
/// `[vdso]`, ...) and for malformed lines.
fn parse_line(line: &str) -> Option<MemoryMapping> {
    let mut fields = line.split_whitespace();
    let range = fields.next()?;
    let perms = fields.next()?;
    let offset = fields.next()?;
    let _dev = fields.next()?;
    let _inode = fields.next()?;

    // Paths may contain spaces; keep everything after the inode.
    let path = fields.collect::<Vec<_>>().join(" ");
    if !path.starts_with('/') {
        return None;
    }

    let (start, end) = range.split_once('-')?;
    Some(MemoryMapping {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
        perms: perms.to_string(),
        path: PathBuf::from(path),
    })
}

/// Parse the contents of a maps file, keeping file-backed mappings in order.
#[must_use]
pub fn parse_maps(content: &str) -> Vec<MemoryMapping> {
    content.lines().filter_map(parse_line).collect()
}

/// Read and parse `/proc/<pid>/maps`.
///
/// # Errors
/// Returns an error if the maps file cannot be read.
pub fn parse_memory_maps(pid: Pid) -> Result<Vec<MemoryMapping>> {
    let maps_path = format!("/proc/{}/maps", pid.0);
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;
    let mappings = parse_maps(&maps);
    debug!("{pid}: {} file-backed mappings", mappings.len());
    Ok(mappings)
}

/// The mapping containing `addr`, if any.
#[must_use]
pub fn find(mappings: &[MemoryMapping], addr: u64) -> Option<&MemoryMapping> {
    mappings.iter().find(|m| m.contains(addr))
}
