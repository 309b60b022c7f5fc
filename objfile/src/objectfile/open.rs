//! Opening object files for a mapping.

use log::debug;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use super::mapping::{kernel_relocation_symbol, Mapping};
use super::source::{check_format, rewind, ObjectSource};
use super::ObjectFile;
use crate::domain::{BuildId, DecodeError, ObjectFileError};
use crate::elf::exec::{self, PAGE_SIZE};
use crate::elf::{buildid, ElfDecoder, ObjectDecoder};

/// Kernel relocation symbol looked up when the mapping name names none.
pub const DEFAULT_RELOCATION_SYMBOL: &str = "_stext";

/// Opens object files, decoding them with the injected [`ElfDecoder`].
#[derive(Clone)]
pub struct Loader {
    decoder: Arc<dyn ElfDecoder>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::new(Arc::new(ObjectDecoder))
    }
}

impl Loader {
    #[must_use]
    pub fn new(decoder: Arc<dyn ElfDecoder>) -> Self {
        Self { decoder }
    }

    /// Open the file at `path` for the mapping `[start, limit)` at file `offset`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or read, is not ELF, its
    /// symbols cannot be read when they are needed, or no base can be computed
    /// for the mapping.
    pub fn open(
        &self,
        path: impl AsRef<Path>,
        start: u64,
        limit: u64,
        offset: u64,
    ) -> Result<ObjectFile, ObjectFileError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|source| ObjectFileError::Open { path: path.to_path_buf(), source })?;
        self.open_source(path, Box::new(file), start, limit, offset)
    }

    /// Like [`Loader::open`], reading from an already opened source. `path`
    /// names the source in errors and selects the kernel handling.
    ///
    /// # Errors
    /// See [`Loader::open`].
    pub fn open_source(
        &self,
        path: &Path,
        mut source: Box<dyn ObjectSource>,
        start: u64,
        limit: u64,
        offset: u64,
    ) -> Result<ObjectFile, ObjectFileError> {
        if !check_format(source.as_mut(), path)? {
            return Err(ObjectFileError::Format(path.to_path_buf()));
        }

        let name = path.to_string_lossy();
        let relocation_symbol = kernel_relocation_symbol(&name);

        let inspected = self.inspect(source.as_mut(), path, relocation_symbol, start, limit, offset);
        let (build_id, kernel_offset) = rewind(source.as_mut(), path, inspected)?;

        debug!(
            "Opened {} (build id: {:?}, mapping 0x{start:x}-0x{limit:x} @ 0x{offset:x}, kernel offset: {kernel_offset:x?})",
            path.display(),
            build_id.as_str()
        );

        Ok(ObjectFile::new(
            path.to_path_buf(),
            build_id,
            source,
            Mapping::new(start, limit, offset, kernel_offset),
            Arc::clone(&self.decoder),
        ))
    }

    /// Decode the object, extract its build id and kernel relocation offset,
    /// and check that a base is computable.
    fn inspect(
        &self,
        source: &mut dyn ObjectSource,
        path: &Path,
        relocation_symbol: &str,
        start: u64,
        limit: u64,
        offset: u64,
    ) -> Result<(BuildId, Option<u64>), ObjectFileError> {
        let image = self
            .decoder
            .decode(source)
            .map_err(|source| ObjectFileError::Decode { path: path.to_path_buf(), source })?;

        let build_id = buildid::build_id(&image).unwrap_or_else(|err| {
            debug!("No build id for {}: {err}", path.display());
            BuildId::default()
        });

        let kernel_offset = if needs_symbol_scan(path, start, limit, offset) {
            self.find_relocation_symbol(source, path, relocation_symbol)?
        } else {
            None
        };

        // Only a feasibility check: the segment a mapping belongs to is known
        // once there is a sample address to translate.
        let text = kernel_offset.and_then(|_| exec::find_text_program_header(&image));
        exec::get_base(&image.header, text, kernel_offset, start, limit, offset)
            .map_err(|source| ObjectFileError::Base { path: path.to_path_buf(), source })?;

        Ok((build_id, kernel_offset))
    }

    fn find_relocation_symbol(
        &self,
        source: &mut dyn ObjectSource,
        path: &Path,
        candidate: &str,
    ) -> Result<Option<u64>, ObjectFileError> {
        let symbols = match self.decoder.symbols(source) {
            Ok(symbols) => symbols,
            Err(DecodeError::NoSymbols) => {
                debug!("No symbol table in {}", path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(ObjectFileError::SymbolLookup { path: path.to_path_buf(), source });
            }
        };

        let name = if candidate.is_empty() { DEFAULT_RELOCATION_SYMBOL } else { candidate };
        let kernel_offset = symbols.iter().find(|s| s.name == name).map(|s| s.value);
        if kernel_offset.is_none() {
            debug!("Relocation symbol {name} not found in {}", path.display());
        }
        Ok(kernel_offset)
    }
}

/// Whether the symbol table has to be read to find the kernel relocation
/// symbol.
///
/// Reading all symbols is expensive. Page-aligned mappings of a file not
/// named like a kernel image are treated as userspace. This goes wrong only
/// for a kernel path without "vmlinux" whose `_stext` is page aligned but not
/// at the segment's virtual address.
#[must_use]
pub fn needs_symbol_scan(path: &Path, start: u64, limit: u64, offset: u64) -> bool {
    let page_aligned = |addr: u64| addr % PAGE_SIZE == 0;
    path.to_string_lossy().contains("vmlinux")
        || !page_aligned(start)
        || !page_aligned(limit)
        || !page_aligned(offset)
}
