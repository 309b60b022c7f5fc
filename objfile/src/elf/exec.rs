//! Relocation base computation and program header lookups.
//!
//! A runtime address `x` inside a mapping `[start, limit)` backed by file
//! offset `offset` sits at file offset `x - start + offset`. A loadable
//! segment places file offset `f` at virtual address
//! `f - segment.offset + segment.vaddr`. The base returned here is what has to
//! be subtracted from `x` to land on the ELF virtual address:
//!
//! ```text
//! base = start - offset + segment.offset - segment.vaddr
//! ```
//!
//! Kernel images do not follow the userspace rules and get their own
//! heuristics keyed on the `_stext`/`_text` relocation symbol.

use super::{ElfImage, FileHeader, FileType, ProgramHeader};
use crate::domain::BaseError;

/// Page size used by the loader on every architecture we care about.
pub const PAGE_SIZE: u64 = 4096;

/// `PAGE_OFFSET` of PowerPC64 kernels.
const PAGE_OFFSET_PPC64: u64 = 0xc000_0000_0000_0000;

/// First address of the upper (kernel) half of a 64-bit address space.
pub const KERNEL_HALF: u64 = 1 << 63;

/// Compute the relocation base for a mapping.
///
/// `load_segment` is the program header that the mapping corresponds to, if
/// one could be identified. `kernel_offset` is the address of the kernel
/// relocation symbol, only known for kernel images.
///
/// # Errors
/// Returns an error when the file type or mapping layout is not understood.
pub fn get_base(
    header: &FileHeader,
    load_segment: Option<&ProgramHeader>,
    kernel_offset: Option<u64>,
    start: u64,
    limit: u64,
    offset: u64,
) -> Result<u64, BaseError> {
    if start == 0 && offset == 0 && (limit == u64::MAX || limit == 0) {
        // Fake mapping spanning the whole address space: addresses are
        // already adjusted.
        return Ok(0);
    }

    match header.file_type {
        FileType::Executable => {
            let Some(segment) = load_segment else {
                // Fixed-address executable.
                return Ok(0);
            };
            if kernel_offset.is_none() && start > 0 && start < KERNEL_HALF {
                // Regular user-mode executable. The kernel offset may be unset
                // for a kernel image too when the symbol scan was skipped,
                // hence the address-space half check.
                return Ok(userspace_base(segment, start, offset));
            }
            if let Some(base) = kernel_base(segment, kernel_offset, start, limit, offset) {
                return Ok(base);
            }
            if start == 0 && limit != 0 && kernel_offset.is_none() {
                // Kernel remapped to 0 with no relocation symbol (ChromeOS).
                return Ok(start.wrapping_sub(segment.vaddr));
            }
            Err(BaseError::UnsupportedKernelMapping { vaddr: segment.vaddr, start, limit, offset })
        }
        FileType::Relocatable => {
            if offset != 0 {
                return Err(BaseError::RelocatableOffset(offset));
            }
            Ok(start)
        }
        FileType::Dynamic => Ok(match load_segment {
            // Kernel modules are ET_DYN without program headers.
            None => start.wrapping_sub(offset),
            Some(segment) => userspace_base(segment, start, offset),
        }),
        other => Err(BaseError::UnsupportedFileType(other.raw())),
    }
}

fn userspace_base(segment: &ProgramHeader, start: u64, offset: u64) -> u64 {
    start.wrapping_sub(offset).wrapping_add(segment.offset).wrapping_sub(segment.vaddr)
}

fn kernel_base(
    segment: &ProgramHeader,
    kernel_offset: Option<u64>,
    start: u64,
    limit: u64,
    offset: u64,
) -> Option<u64> {
    if segment.vaddr == start.wrapping_sub(offset) {
        return Some(offset);
    }
    if let Some(stext) = kernel_offset {
        if start == 0 && limit != 0 {
            // Kernel remapped to 0 (ChromeOS).
            return Some(start.wrapping_sub(stext));
        }
    }
    if start >= KERNEL_HALF
        && limit > start
        && (offset == 0 || offset == PAGE_OFFSET_PPC64 || offset == start)
    {
        // perf reports the address of _stext as the start. Tools that
        // already adjusted for it leave a different page residue.
        if let Some(stext) = kernel_offset {
            if start % PAGE_SIZE == stext % PAGE_SIZE {
                return Some(start.wrapping_sub(stext));
            }
        }
        return Some(start.wrapping_sub(segment.vaddr));
    }
    if let Some(stext) = kernel_offset {
        if start % PAGE_SIZE != 0 && stext % PAGE_SIZE == start % PAGE_SIZE {
            // Kernel remapped to 0 + start % PAGE_SIZE (ChromeOS).
            return Some(start.wrapping_sub(stext));
        }
    }
    None
}

/// The executable loadable segment containing the `.text` section.
#[must_use]
pub fn find_text_program_header(image: &ElfImage) -> Option<&ProgramHeader> {
    let text = image.section(".text")?;
    image.loadable_segments().find(|ph| {
        ph.is_executable()
            && text.addr >= ph.vaddr
            && text.addr < ph.vaddr.wrapping_add(ph.mem_size)
    })
}

/// Loadable segments whose file range overlaps the mapping window
/// `[map_offset, map_offset + map_size)`.
#[must_use]
pub fn program_headers_for_mapping<'a>(
    headers: &[&'a ProgramHeader],
    map_offset: u64,
    map_size: u64,
) -> Vec<&'a ProgramHeader> {
    const PAGE_OFFSET_MASK: u64 = PAGE_SIZE - 1;

    let map_limit = map_offset.wrapping_add(map_size);
    headers
        .iter()
        .copied()
        .filter(|ph| {
            // Zero file size segments can carry arbitrary file offsets.
            if ph.file_size == 0 || !ph.is_load() {
                return false;
            }
            let seg_limit = ph.offset.wrapping_add(ph.mem_size);
            if map_offset >= seg_limit || ph.offset >= map_limit {
                return false;
            }
            // A mapping starting before the page-aligned segment offset
            // belongs to another segment.
            let aligned_seg_offset = ph.offset.saturating_sub(ph.vaddr & PAGE_OFFSET_MASK);
            if map_offset < aligned_seg_offset {
                return false;
            }
            // Starting inside the segment, covering less than a page of it and
            // extending at least a page past it: another segment's mapping.
            !(map_offset > ph.offset
                && seg_limit < map_offset.wrapping_add(PAGE_SIZE)
                && map_limit >= seg_limit.wrapping_add(PAGE_SIZE))
        })
        .collect()
}

/// The unique candidate whose file range contains `file_offset`.
///
/// # Errors
/// Returns an error when no candidate, or more than one, contains the offset.
pub fn header_for_file_offset<'a>(
    headers: &[&'a ProgramHeader],
    file_offset: u64,
) -> Result<&'a ProgramHeader, BaseError> {
    let mut found: Option<&'a ProgramHeader> = None;
    for &ph in headers {
        if file_offset >= ph.offset && file_offset < ph.offset.wrapping_add(ph.mem_size) {
            if let Some(first) = found {
                return Err(BaseError::AmbiguousFileOffset {
                    file_offset,
                    first: first.offset,
                    second: ph.offset,
                });
            }
            found = Some(ph);
        }
    }
    found.ok_or(BaseError::NoHeaderForFileOffset(file_offset))
}
