//! Structured error types for objfile
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Cleanup steps (rewinding a file, closing both resources of a handle) never
//! drop an earlier failure: errors are folded into a `Multiple` list instead.

use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while opening or releasing an [`ObjectFile`](crate::objectfile::ObjectFile).
#[derive(Error, Debug)]
pub enum ObjectFileError {
    #[error("error opening {}: {source}", .path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("error reading magic number from {}: {source}", .path.display())]
    ReadMagic { path: PathBuf, source: io::Error },

    #[error("unrecognized binary format: {}", .0.display())]
    Format(PathBuf),

    #[error("error reading ELF file {}: {source}", .path.display())]
    Decode { path: PathBuf, source: DecodeError },

    #[error("failed to read symbols of {}: {source}", .path.display())]
    SymbolLookup { path: PathBuf, source: DecodeError },

    #[error("could not identify base for {}: {source}", .path.display())]
    Base { path: PathBuf, source: BaseError },

    #[error("failed to seek to the beginning of the file {}: {source}", .path.display())]
    Rewind { path: PathBuf, source: io::Error },

    #[error("failed to close {}: {source}", .path.display())]
    Close { path: PathBuf, source: io::Error },

    #[error("{}", join_messages(.0))]
    Multiple(Vec<ObjectFileError>),
}

impl ObjectFileError {
    /// Combine two failures into one error, keeping both causes.
    #[must_use]
    pub fn joined(self, other: Self) -> Self {
        match self {
            Self::Multiple(mut errors) => {
                errors.push(other);
                Self::Multiple(errors)
            }
            first => Self::Multiple(vec![first, other]),
        }
    }

    /// Flatten the error into its individual causes.
    #[must_use]
    pub fn causes(&self) -> Vec<&ObjectFileError> {
        match self {
            Self::Multiple(errors) => errors.iter().flat_map(ObjectFileError::causes).collect(),
            single => vec![single],
        }
    }
}

/// Failures computing the relocation base of a mapping.
///
/// These are memoized by the handle and handed out again on every later
/// translation, hence `Clone` and the `Arc`-wrapped I/O causes.
#[derive(Error, Debug, Clone)]
pub enum BaseError {
    #[error(
        "specified address {addr:#x} is outside the mapping range [{start:#x}, {limit:#x}) for {}",
        .path.display()
    )]
    OutOfRange { addr: u64, start: u64, limit: u64, path: PathBuf },

    #[error("no program header matches mapping info")]
    NoMatchingProgramHeader,

    #[error("no program header matches file offset {0:#x}")]
    NoHeaderForFileOffset(u64),

    #[error(
        "found second program header (offset {second:#x}) that matches file offset \
         {file_offset:#x}, first program header has offset {first:#x}. Is this a stripped \
         binary, or does the first program segment contain uninitialized data?"
    )]
    AmbiguousFileOffset { file_offset: u64, first: u64, second: u64 },

    #[error("failed to find program header for {}, address {addr:#x}: {source}", .path.display())]
    ProgramHeader { path: PathBuf, addr: u64, source: Box<BaseError> },

    #[error("don't know how to handle mapping offset {0:#x} for a relocatable object")]
    RelocatableOffset(u64),

    #[error(
        "don't know how to handle EXEC segment: vaddr={vaddr:#x} start={start:#x} limit={limit:#x} offset={offset:#x}"
    )]
    UnsupportedKernelMapping { vaddr: u64, start: u64, limit: u64, offset: u64 },

    #[error("don't know how to handle ELF file type {0:#x}")]
    UnsupportedFileType(u16),

    #[error("failed to re-read {}: {source}", .path.display())]
    Reread { path: PathBuf, source: Arc<DecodeError> },

    #[error("failed to seek to the beginning of the file {}: {source}", .path.display())]
    Rewind { path: PathBuf, source: Arc<io::Error> },

    #[error("object file {} has already been released", .0.display())]
    Released(PathBuf),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<BaseError>),
}

impl BaseError {
    /// Combine two failures into one error, keeping both causes.
    #[must_use]
    pub fn joined(self, other: Self) -> Self {
        match self {
            Self::Multiple(mut errors) => {
                errors.push(other);
                Self::Multiple(errors)
            }
            first => Self::Multiple(vec![first, other]),
        }
    }
}

/// Errors from the ELF structural decoder.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed object: {0}")]
    Parse(#[from] object::Error),

    #[error("unsupported object format {0:?}")]
    UnsupportedFormat(object::FileKind),

    #[error("no symbol section")]
    NoSymbols,
}

/// Build identifier extraction failures. Never fatal to loading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildIdError {
    #[error("no build id note found")]
    NotFound,

    #[error("Go build id is not valid UTF-8")]
    InvalidGoBuildId,
}

/// Failures translating a single runtime address of a process.
#[derive(Error, Debug, Clone)]
pub enum TranslateError {
    #[error("address {0:#x} is not in any file-backed mapping")]
    Unmapped(u64),

    #[error(transparent)]
    Open(Arc<ObjectFileError>),

    #[error(transparent)]
    Base(#[from] BaseError),
}

fn join_messages<E: Display>(errors: &[E]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n")
}
