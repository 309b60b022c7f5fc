//! Runtime address to object file address translation for a whole process.

use anyhow::Result;
use log::debug;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::memory_maps::{self, MemoryMapping};
use crate::domain::{BuildId, Pid, TranslateError};
use crate::objectfile::{MappingKey, ObjectFilePool};

/// A runtime address resolved to the object file it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Translation {
    pub address: u64,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "BuildId::is_empty")]
    pub build_id: BuildId,
    /// Address in the ELF virtual address space of `path`.
    pub file_address: u64,
    /// Whether the address lies in a non-executable segment.
    pub is_data: bool,
}

impl fmt::Display for Translation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} {}+{:#x}", self.address, self.path.display(), self.file_address)?;
        if !self.build_id.is_empty() {
            write!(f, " [{}]", self.build_id)?;
        }
        Ok(())
    }
}

/// Translates addresses against a fixed set of file-backed mappings, opening
/// each mapped file once through the shared pool.
pub struct AddressTranslator {
    pid: Option<Pid>,
    mappings: Vec<MemoryMapping>,
    pool: Arc<ObjectFilePool>,
}

impl AddressTranslator {
    #[must_use]
    pub fn new(pid: Option<Pid>, mappings: Vec<MemoryMapping>, pool: Arc<ObjectFilePool>) -> Self {
        Self { pid, mappings, pool }
    }

    /// Translator for the current mappings of process `pid`.
    ///
    /// # Errors
    /// Returns an error if the process's maps cannot be read.
    pub fn for_process(pid: Pid, pool: Arc<ObjectFilePool>) -> Result<Self> {
        let mappings = memory_maps::parse_memory_maps(pid)?;
        Ok(Self::new(Some(pid), mappings, pool))
    }

    #[must_use]
    pub fn mappings(&self) -> &[MemoryMapping] {
        &self.mappings
    }

    /// Translate one runtime address.
    ///
    /// # Errors
    /// Returns an error if no file-backed mapping contains `addr`, the mapped
    /// file cannot be loaded, or its base cannot be computed.
    pub fn translate(&self, addr: u64) -> Result<Translation, TranslateError> {
        let mapping = memory_maps::find(&self.mappings, addr).ok_or(TranslateError::Unmapped(addr))?;
        let key = MappingKey {
            pid: self.pid,
            path: mapping.path.clone(),
            start: mapping.start,
            limit: mapping.end,
            offset: mapping.offset,
        };

        let file = self.pool.get(&key).map_err(TranslateError::Open)?;
        let file_address = file.translate(addr)?;
        debug!("{addr:#x} -> {}+{file_address:#x}", mapping.path.display());

        Ok(Translation {
            address: addr,
            path: mapping.path.clone(),
            build_id: file.build_id().clone(),
            file_address,
            is_data: file.is_data().unwrap_or(false),
        })
    }
}
