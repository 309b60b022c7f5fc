//! Runtime memory mapping of an object file and program segment selection.

use crate::domain::BaseError;
use crate::elf::exec::{self, KERNEL_HALF};
use crate::elf::{ElfImage, ProgramHeader};

/// One runtime mapping of a file: `[start, limit)` backed by the file from
/// `offset` onwards.
///
/// Immutable once built; owned by the handle it was loaded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    start: u64,
    limit: u64,
    offset: u64,
    /// Address of the kernel relocation symbol (`_stext`/`_text`). Only set
    /// for kernel images.
    kernel_offset: Option<u64>,
}

impl Mapping {
    #[must_use]
    pub fn new(start: u64, limit: u64, offset: u64, kernel_offset: Option<u64>) -> Self {
        Self { start, limit, offset, kernel_offset }
    }

    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn kernel_offset(&self) -> Option<u64> {
        self.kernel_offset
    }

    /// Check if an address falls within this mapping
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.limit
    }

    /// Kernel and `.ko` module mappings cannot be told apart by start address
    /// alone: remapped kernels live in the lower half too.
    #[must_use]
    pub fn is_kernel_like(&self) -> bool {
        self.kernel_offset.is_some() || self.start >= self.limit || self.limit >= KERNEL_HALF
    }

    /// Find the program segment this mapping and `addr` correspond to.
    ///
    /// `Ok(None)` is a valid answer for objects without loadable segments
    /// (kernel modules) and for kernel images without a `.text` segment.
    ///
    /// # Errors
    /// Returns an error when no segment, or no unique segment, matches.
    pub fn find_program_header<'a>(
        &self,
        image: &'a ElfImage,
        addr: u64,
    ) -> Result<Option<&'a ProgramHeader>, BaseError> {
        if self.is_kernel_like() {
            return Ok(exec::find_text_program_header(image));
        }

        let loadable: Vec<&ProgramHeader> = image.loadable_segments().collect();
        if loadable.is_empty() {
            return Ok(None);
        }

        let headers =
            exec::program_headers_for_mapping(&loadable, self.offset, self.limit - self.start);
        match headers.as_slice() {
            [] => Err(BaseError::NoMatchingProgramHeader),
            [only] => Ok(Some(*only)),
            // Several segments mapped contiguously: narrow down with the
            // file offset of the address.
            _ => {
                let file_offset = addr.wrapping_sub(self.start).wrapping_add(self.offset);
                exec::header_for_file_offset(&headers, file_offset).map(Some)
            }
        }
    }
}

/// Kernel relocation symbol encoded in a `perf` kernel mapping name.
///
/// `[kernel.kallsyms]_text` yields `_text`; names without the prefix yield an
/// empty string.
#[must_use]
pub fn kernel_relocation_symbol(mapping_name: &str) -> &str {
    mapping_name.strip_prefix("[kernel.kallsyms]").unwrap_or("")
}
