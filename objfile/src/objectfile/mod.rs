//! # Object Files and Address Translation
//!
//! An [`ObjectFile`] is an opened ELF executable, shared library or kernel
//! image together with the runtime [`Mapping`] it was observed at. It turns
//! runtime addresses from stack samples into ELF virtual addresses that a
//! symbolizer can look up.
//!
//! ## Lifecycle
//!
//! ```text
//! Loader::open(path, start, limit, offset)
//!   │  check ELF magic, decode, extract build id,
//!   │  maybe scan symbols for _stext/_text,
//!   │  check that *a* base is computable
//!   ▼
//! ObjectFile (base unresolved)
//!   │  first translate(addr): re-decode, pick the program segment for
//!   │  addr, compute the base; success or failure is stored for good
//!   ▼
//! ObjectFile (resolved | failed) ── translate(addr) = addr - base
//!   │
//!   ▼
//! release() / Drop: close the file and the companion debug-info file
//! ```
//!
//! The base is resolved once per handle. A binary with several loadable
//! segments uses the segment of the first translated address for every later
//! address in the same mapping.

mod mapping;
mod open;
mod pool;
mod source;

pub use mapping::{kernel_relocation_symbol, Mapping};
pub use open::{needs_symbol_scan, Loader, DEFAULT_RELOCATION_SYMBOL};
pub use pool::{MappingKey, ObjectFilePool};
pub use source::{check_format, is_elf, rewind, ObjectSource};

use log::{debug, warn};
use std::fmt;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::SystemTime;

use crate::domain::{BaseError, BuildId, ObjectFileError, Pid};
use crate::elf::{exec, ElfDecoder, ElfImage};

/// Metadata of a separate debug-info file, filled in by whoever located it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuginfoFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Base {
    base: u64,
    is_data: bool,
}

/// An opened object file bound to one runtime mapping.
pub struct ObjectFile {
    pid: Option<Pid>,
    path: PathBuf,
    build_id: BuildId,
    file: Mutex<Option<Box<dyn ObjectSource>>>,
    debuginfo: Option<DebuginfoFile>,
    debuginfo_file: Mutex<Option<Box<dyn ObjectSource>>>,
    mapping: Mapping,
    decoder: Arc<dyn ElfDecoder>,
    base: OnceLock<Result<Base, BaseError>>,
}

impl ObjectFile {
    /// Open `path` with the default decoder. See [`Loader::open`].
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not ELF, or no base can
    /// be computed for the mapping.
    pub fn open(
        path: impl AsRef<Path>,
        start: u64,
        limit: u64,
        offset: u64,
    ) -> Result<Self, ObjectFileError> {
        Loader::default().open(path, start, limit, offset)
    }

    fn new(
        path: PathBuf,
        build_id: BuildId,
        file: Box<dyn ObjectSource>,
        mapping: Mapping,
        decoder: Arc<dyn ElfDecoder>,
    ) -> Self {
        Self {
            pid: None,
            path,
            build_id,
            file: Mutex::new(Some(file)),
            debuginfo: None,
            debuginfo_file: Mutex::new(None),
            mapping,
            decoder,
            base: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn with_pid(mut self, pid: Pid) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attach a companion debug-info file. It is only closed on release.
    #[must_use]
    pub fn with_debuginfo(mut self, info: DebuginfoFile, file: Box<dyn ObjectSource>) -> Self {
        self.debuginfo = Some(info);
        *self.debuginfo_file.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(file);
        self
    }

    #[must_use]
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build identifier, empty when none could be extracted.
    #[must_use]
    pub fn build_id(&self) -> &BuildId {
        &self.build_id
    }

    #[must_use]
    pub fn mapping(&self) -> &Mapping {
        &self.mapping
    }

    #[must_use]
    pub fn debuginfo(&self) -> Option<&DebuginfoFile> {
        self.debuginfo.as_ref()
    }

    /// Whether the resolved segment is a data (non-executable) segment.
    ///
    /// `None` until the base has been resolved successfully.
    #[must_use]
    pub fn is_data(&self) -> Option<bool> {
        self.base.get()?.as_ref().ok().map(|b| b.is_data)
    }

    /// Translate a runtime address into an ELF virtual address.
    ///
    /// The first call resolves the relocation base using `addr`; every later
    /// call reuses that outcome, success or failure.
    ///
    /// # Errors
    /// Returns the (memoized) base computation error.
    pub fn translate(&self, addr: u64) -> Result<u64, BaseError> {
        let base = self.resolve_base(addr)?;
        Ok(addr.wrapping_sub(base))
    }

    /// Relocation base of this mapping, resolving it on first use.
    ///
    /// Concurrent first callers block until a single resolution finishes and
    /// all observe its outcome.
    ///
    /// # Errors
    /// Returns the (memoized) base computation error.
    pub fn resolve_base(&self, addr: u64) -> Result<u64, BaseError> {
        match self.base.get_or_init(|| self.compute_base(addr)) {
            Ok(base) => Ok(base.base),
            Err(err) => Err(err.clone()),
        }
    }

    fn compute_base(&self, addr: u64) -> Result<Base, BaseError> {
        let m = &self.mapping;
        if !m.contains(addr) {
            return Err(BaseError::OutOfRange {
                addr,
                start: m.start(),
                limit: m.limit(),
                path: self.path.clone(),
            });
        }

        let image = self.reread()?;

        let segment = m.find_program_header(&image, addr).map_err(|source| {
            BaseError::ProgramHeader { path: self.path.clone(), addr, source: Box::new(source) }
        })?;

        let base =
            exec::get_base(&image.header, segment, m.kernel_offset(), m.start(), m.limit(), m.offset())?;
        let is_data = segment.is_some_and(|ph| !ph.is_executable());

        debug!(
            "Resolved base 0x{base:x} for {} (mapping 0x{:x}-0x{:x}, data: {is_data})",
            self.path.display(),
            m.start(),
            m.limit()
        );
        Ok(Base { base, is_data })
    }

    /// Decode the file again and rewind it, keeping both failures if any.
    fn reread(&self) -> Result<ElfImage, BaseError> {
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = guard.as_mut() else {
            return Err(BaseError::Released(self.path.clone()));
        };

        let decoded = self
            .decoder
            .decode(&mut **file)
            .map_err(|source| BaseError::Reread { path: self.path.clone(), source: Arc::new(source) });

        match file.seek(SeekFrom::Start(0)) {
            Ok(_) => decoded,
            Err(err) => {
                let rewind_err = BaseError::Rewind { path: self.path.clone(), source: Arc::new(err) };
                Err(match decoded {
                    Ok(_) => rewind_err,
                    Err(first) => first.joined(rewind_err),
                })
            }
        }
    }

    /// Close the object file and the debug-info file, if any.
    ///
    /// Both closes are attempted even if the first fails. Calling it again,
    /// or on a handle without open files, is a no-op.
    ///
    /// # Errors
    /// Returns every close failure, joined.
    pub fn release(&mut self) -> Result<(), ObjectFileError> {
        let file = self.file.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        let debuginfo_file =
            self.debuginfo_file.get_mut().unwrap_or_else(PoisonError::into_inner).take();

        let mut err: Option<ObjectFileError> = None;
        if let Some(file) = file {
            if let Err(source) = file.close() {
                err = Some(join(err, ObjectFileError::Close { path: self.path.clone(), source }));
            }
        }
        if let Some(file) = debuginfo_file {
            if let Err(source) = file.close() {
                let path = self.debuginfo.as_ref().map_or_else(|| self.path.clone(), |d| d.path.clone());
                err = Some(join(err, ObjectFileError::Close { path, source }));
            }
        }

        err.map_or(Ok(()), Err)
    }
}

fn join(acc: Option<ObjectFileError>, next: ObjectFileError) -> ObjectFileError {
    match acc {
        Some(first) => first.joined(next),
        None => next,
    }
}

impl Drop for ObjectFile {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("Failed to release {}: {err}", self.path.display());
        }
    }
}

impl fmt::Debug for ObjectFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectFile")
            .field("pid", &self.pid)
            .field("path", &self.path)
            .field("build_id", &self.build_id)
            .field("debuginfo", &self.debuginfo)
            .field("mapping", &self.mapping)
            .field("base", &self.base.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DecodeError;
    use crate::elf::{FileHeader, FileType, ProgramHeader, SectionHeader, Symbol};
    use object::elf::{PF_R, PF_W, PF_X, PT_LOAD};
    use std::io::{self, Cursor, Read, SeekFrom};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Decoder returning a fixed image and counting decode calls.
    struct FakeDecoder {
        image: ElfImage,
        symbols: Vec<Symbol>,
        decodes: AtomicUsize,
    }

    impl FakeDecoder {
        fn new(image: ElfImage) -> Self {
            Self { image, symbols: Vec::new(), decodes: AtomicUsize::new(0) }
        }
    }

    impl ElfDecoder for FakeDecoder {
        fn decode(&self, source: &mut dyn ObjectSource) -> Result<ElfImage, DecodeError> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            // Move the position like a real decoder would.
            source.seek(SeekFrom::End(0))?;
            Ok(self.image.clone())
        }

        fn symbols(&self, _source: &mut dyn ObjectSource) -> Result<Vec<Symbol>, DecodeError> {
            if self.symbols.is_empty() {
                Err(DecodeError::NoSymbols)
            } else {
                Ok(self.symbols.clone())
            }
        }
    }

    /// Source whose close always fails.
    struct FailingClose(Cursor<Vec<u8>>, &'static str);

    impl Read for FailingClose {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Seek for FailingClose {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    impl ObjectSource for FailingClose {
        fn close(self: Box<Self>) -> io::Result<()> {
            Err(io::Error::other(self.1))
        }
    }

    fn segment(offset: u64, vaddr: u64, size: u64, flags: u32) -> ProgramHeader {
        ProgramHeader { kind: PT_LOAD, flags, offset, vaddr, file_size: size, mem_size: size }
    }

    /// Text and data segments that share a single page-sized mapping.
    fn two_segment_image() -> ElfImage {
        ElfImage {
            header: FileHeader { file_type: FileType::Dynamic, entry: 0 },
            program_headers: vec![
                segment(0, 0, 0x800, PF_R | PF_X),
                segment(0x800, 0x1800, 0x400, PF_R | PF_W),
            ],
            sections: vec![SectionHeader { name: ".text".to_string(), addr: 0x100, size: 0x100 }],
            notes: Vec::new(),
        }
    }

    fn elf_source() -> Box<dyn ObjectSource> {
        Box::new(Cursor::new(b"\x7fELF-fake-object".to_vec()))
    }

    fn open_with(decoder: Arc<FakeDecoder>, start: u64, limit: u64, offset: u64) -> ObjectFile {
        Loader::new(decoder)
            .open_source(Path::new("/usr/lib/libfake.so"), elf_source(), start, limit, offset)
            .unwrap()
    }

    #[test]
    fn test_translate_resolves_once() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let obj = open_with(Arc::clone(&decoder), 0x4000_0000, 0x4000_1000, 0);
        assert_eq!(decoder.decodes.load(Ordering::SeqCst), 1);
        assert_eq!(obj.is_data(), None);

        // First address lands in the text segment: base = start.
        assert_eq!(obj.translate(0x4000_0100).unwrap(), 0x100);
        assert_eq!(obj.is_data(), Some(false));

        // An address in the data segment would get base start - 0x1000 if
        // resolved on its own; the stored base is reused instead.
        assert_eq!(obj.translate(0x4000_0900).unwrap(), 0x900);
        assert_eq!(decoder.decodes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_first_resolution_picks_data_segment() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let obj = open_with(decoder, 0x4000_0000, 0x4000_1000, 0);

        // Data segment: file 0x800 at vaddr 0x1800.
        assert_eq!(obj.translate(0x4000_0900).unwrap(), 0x1900);
        assert_eq!(obj.is_data(), Some(true));
        assert_eq!(obj.translate(0x4000_0100).unwrap(), 0x1100);
    }

    #[test]
    fn test_out_of_range_failure_is_permanent() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let obj = open_with(Arc::clone(&decoder), 0x4000_0000, 0x4000_1000, 0);

        let err = obj.translate(0x4000_1000).unwrap_err();
        assert!(matches!(err, BaseError::OutOfRange { addr: 0x4000_1000, .. }));

        let err = obj.translate(0x4000_0100).unwrap_err();
        assert!(matches!(err, BaseError::OutOfRange { addr: 0x4000_1000, .. }));
        assert_eq!(decoder.decodes.load(Ordering::SeqCst), 1);
        assert_eq!(obj.is_data(), None);
    }

    #[test]
    fn test_address_below_start_is_out_of_range() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let obj = open_with(decoder, 0x4000_0000, 0x4000_1000, 0);
        assert!(matches!(obj.translate(0x3fff_ffff), Err(BaseError::OutOfRange { .. })));
    }

    #[test]
    fn test_unmatched_segment_error_is_cached() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let obj = open_with(decoder, 0x4000_0000, 0x4000_1000, 0);

        // Inside the mapping but past the end of both segments.
        let first = obj.translate(0x4000_0f00).unwrap_err();
        assert!(matches!(first, BaseError::ProgramHeader { addr: 0x4000_0f00, .. }));
        let second = obj.translate(0x4000_0100).unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
    }

    #[test]
    fn test_file_rewound_after_open_and_resolution() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let obj = open_with(decoder, 0x4000_0000, 0x4000_1000, 0);
        obj.translate(0x4000_0100).unwrap();

        let mut guard = obj.file.lock().unwrap();
        let file = guard.as_mut().unwrap();
        assert_eq!(file.stream_position().unwrap(), 0);
    }

    #[test]
    fn test_kernel_offset_from_symbol_scan() {
        let mut decoder = FakeDecoder::new(ElfImage {
            header: FileHeader { file_type: FileType::Executable, entry: 0 },
            program_headers: vec![segment(0x20_0000, 0xffff_ffff_8100_0000, 0x100_0000, PF_R | PF_X)],
            sections: vec![SectionHeader {
                name: ".text".to_string(),
                addr: 0xffff_ffff_8100_0000,
                size: 0x10_0000,
            }],
            notes: Vec::new(),
        });
        decoder.symbols = vec![
            Symbol { name: "_text".to_string(), value: 0xffff_ffff_8100_0000 },
            Symbol { name: "_stext".to_string(), value: 0xffff_ffff_8100_0198 },
        ];
        let decoder = Arc::new(decoder);

        let start = 0xffff_ffff_9f00_0198;
        let obj = Loader::new(decoder)
            .open_source(Path::new("/boot/vmlinux-6.1"), elf_source(), start, 0xffff_ffff_a000_0000, 0)
            .unwrap();

        assert_eq!(obj.mapping().kernel_offset(), Some(0xffff_ffff_8100_0198));
        assert_eq!(obj.translate(start + 0x10).unwrap(), 0xffff_ffff_8100_01a8);
        assert_eq!(obj.is_data(), Some(false));
    }

    fn kernel_decoder() -> Arc<FakeDecoder> {
        let mut decoder = FakeDecoder::new(ElfImage {
            header: FileHeader { file_type: FileType::Executable, entry: 0 },
            program_headers: vec![segment(0x20_0000, 0xffff_ffff_8100_0000, 0x100_0000, PF_R | PF_X)],
            sections: vec![SectionHeader {
                name: ".text".to_string(),
                addr: 0xffff_ffff_8100_0000,
                size: 0x10_0000,
            }],
            notes: Vec::new(),
        });
        decoder.symbols = vec![
            Symbol { name: "_text".to_string(), value: 0xffff_ffff_8100_0000 },
            Symbol { name: "_stext".to_string(), value: 0xffff_ffff_8100_0198 },
        ];
        Arc::new(decoder)
    }

    #[test]
    fn test_kallsyms_name_selects_relocation_symbol() {
        let start = 0xffff_ffff_9f00_0198;
        let limit = 0xffff_ffff_a000_0000;

        let obj = Loader::new(kernel_decoder())
            .open_source(Path::new("[kernel.kallsyms]_text"), elf_source(), start, limit, 0)
            .unwrap();
        assert_eq!(obj.mapping().kernel_offset(), Some(0xffff_ffff_8100_0000));
        // _text is page aligned while start is not, so the base falls back to
        // the text segment's vaddr.
        assert_eq!(obj.translate(start + 0x10).unwrap(), 0xffff_ffff_8100_0010);

        // Without a suffix the default symbol is used.
        let obj = Loader::new(kernel_decoder())
            .open_source(Path::new("[kernel.kallsyms]"), elf_source(), start, limit, 0)
            .unwrap();
        assert_eq!(obj.mapping().kernel_offset(), Some(0xffff_ffff_8100_0198));
        assert_eq!(obj.translate(start + 0x10).unwrap(), 0xffff_ffff_8100_01a8);
    }

    #[test]
    fn test_aligned_userspace_mapping_skips_symbol_scan() {
        let mut decoder = FakeDecoder::new(two_segment_image());
        decoder.symbols = vec![Symbol { name: "_stext".to_string(), value: 0x100 }];
        let obj = open_with(Arc::new(decoder), 0x4000_0000, 0x4000_1000, 0);
        assert_eq!(obj.mapping().kernel_offset(), None);
    }

    #[test]
    fn test_non_elf_source_rejected() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let err = Loader::new(Arc::clone(&decoder) as Arc<dyn ElfDecoder>)
            .open_source(
                Path::new("/tmp/script.sh"),
                Box::new(Cursor::new(b"#!/bin/sh\n".to_vec())),
                0x1000,
                0x2000,
                0,
            )
            .unwrap_err();
        assert!(matches!(err, ObjectFileError::Format(_)));
        assert_eq!(decoder.decodes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_attempts_both_closes() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let info = DebuginfoFile {
            path: PathBuf::from("/usr/lib/debug/libfake.so.debug"),
            size: 42,
            modified: SystemTime::UNIX_EPOCH,
        };
        let mut obj = Loader::new(decoder)
            .open_source(
                Path::new("/usr/lib/libfake.so"),
                Box::new(FailingClose(Cursor::new(b"\x7fELF".to_vec()), "primary close failed")),
                0x4000_0000,
                0x4000_1000,
                0,
            )
            .unwrap()
            .with_debuginfo(
                info,
                Box::new(FailingClose(Cursor::new(Vec::new()), "debuginfo close failed")),
            );

        let err = obj.release().unwrap_err();
        assert_eq!(err.causes().len(), 2);
        let msg = err.to_string();
        assert!(msg.contains("primary close failed"));
        assert!(msg.contains("debuginfo close failed"));
        assert!(msg.contains("/usr/lib/debug/libfake.so.debug"));

        // Nothing left to close.
        assert!(obj.release().is_ok());
    }

    #[test]
    fn test_release_without_debuginfo() {
        let decoder = Arc::new(FakeDecoder::new(two_segment_image()));
        let mut obj = open_with(decoder, 0x4000_0000, 0x4000_1000, 0);
        assert!(obj.release().is_ok());

        let err = obj.translate(0x4000_0100).unwrap_err();
        assert!(matches!(err, BaseError::Released(_)));
    }
}
