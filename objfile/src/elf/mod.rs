//! # ELF Structure Model
//!
//! Owned, read-only view of the parts of an ELF object that address
//! translation needs: the file header type, program headers, section
//! headers and notes. Symbols are fetched through a separate, more expensive
//! decoder call because only kernel images need them.
//!
//! The [`ElfDecoder`] trait is the seam between the loader and the actual
//! parser. [`ObjectDecoder`] implements it on top of the `object` crate;
//! tests inject their own implementations.
//!
//! ## Module Structure
//!
//! - **`decoder`**: `object`-backed [`ElfDecoder`]
//! - **`exec`**: relocation base arithmetic and program header lookups
//! - **`buildid`**: build identifier extraction from notes

pub mod buildid;
pub mod decoder;
pub mod exec;

pub use decoder::ObjectDecoder;

use crate::domain::DecodeError;
use crate::objectfile::ObjectSource;

/// The four bytes every ELF file starts with.
pub const ELF_MAGIC: [u8; 4] = *b"\x7fELF";

/// `e_type` of an ELF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Relocatable,
    Executable,
    Dynamic,
    Core,
    Other(u16),
}

impl From<u16> for FileType {
    fn from(e_type: u16) -> Self {
        match e_type {
            object::elf::ET_REL => Self::Relocatable,
            object::elf::ET_EXEC => Self::Executable,
            object::elf::ET_DYN => Self::Dynamic,
            object::elf::ET_CORE => Self::Core,
            other => Self::Other(other),
        }
    }
}

impl FileType {
    /// Raw `e_type` value.
    #[must_use]
    pub fn raw(self) -> u16 {
        match self {
            Self::Relocatable => object::elf::ET_REL,
            Self::Executable => object::elf::ET_EXEC,
            Self::Dynamic => object::elf::ET_DYN,
            Self::Core => object::elf::ET_CORE,
            Self::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub file_type: FileType,
    pub entry: u64,
}

/// A program header (segment) entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// `p_type`
    pub kind: u32,
    /// `p_flags`
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
}

impl ProgramHeader {
    #[must_use]
    pub fn is_load(&self) -> bool {
        self.kind == object::elf::PT_LOAD
    }

    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.flags & object::elf::PF_X != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    pub name: String,
    pub addr: u64,
    pub size: u64,
}

/// An ELF note record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    /// Owner name without the trailing NUL.
    pub name: Vec<u8>,
    pub kind: u32,
    pub desc: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub value: u64,
}

/// Decoded structure of an ELF object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElfImage {
    pub header: FileHeader,
    pub program_headers: Vec<ProgramHeader>,
    pub sections: Vec<SectionHeader>,
    pub notes: Vec<Note>,
}

impl ElfImage {
    /// All `PT_LOAD` segments, in file order.
    pub fn loadable_segments(&self) -> impl Iterator<Item = &ProgramHeader> {
        self.program_headers.iter().filter(|ph| ph.is_load())
    }

    #[must_use]
    pub fn section(&self, name: &str) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.name == name)
    }
}

/// Decodes a byte source into an [`ElfImage`].
///
/// Implementations may move the read position of `source` freely; callers
/// rewind it afterwards.
pub trait ElfDecoder: Send + Sync {
    /// Decode headers, sections and notes.
    ///
    /// # Errors
    /// Returns an error if the source cannot be read or is not a valid ELF object.
    fn decode(&self, source: &mut dyn ObjectSource) -> Result<ElfImage, DecodeError>;

    /// Read the full symbol table.
    ///
    /// # Errors
    /// Returns [`DecodeError::NoSymbols`] when the object has no symbol table,
    /// or another error if it cannot be read.
    fn symbols(&self, source: &mut dyn ObjectSource) -> Result<Vec<Symbol>, DecodeError>;
}
