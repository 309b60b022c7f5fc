//! `object`-backed ELF decoder.

use log::debug;
use object::read::elf::{
    ElfFile, FileHeader as ElfFileHeader, NoteIterator, ProgramHeader as ElfProgramHeader,
    SectionHeader as ElfSectionHeader,
};
use object::{Endianness, FileKind, Object, ObjectSection, ObjectSymbol, ObjectSymbolTable};
use std::io::SeekFrom;

use super::{ElfDecoder, ElfImage, FileHeader, Note, ProgramHeader, SectionHeader, Symbol};
use crate::domain::DecodeError;
use crate::objectfile::ObjectSource;

/// Decoder reading the whole source into memory and parsing it with `object`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectDecoder;

impl ElfDecoder for ObjectDecoder {
    fn decode(&self, source: &mut dyn ObjectSource) -> Result<ElfImage, DecodeError> {
        let data = read_all(source)?;
        match FileKind::parse(&*data)? {
            FileKind::Elf32 => decode_elf::<object::elf::FileHeader32<Endianness>>(&data),
            FileKind::Elf64 => decode_elf::<object::elf::FileHeader64<Endianness>>(&data),
            kind => Err(DecodeError::UnsupportedFormat(kind)),
        }
    }

    fn symbols(&self, source: &mut dyn ObjectSource) -> Result<Vec<Symbol>, DecodeError> {
        let data = read_all(source)?;
        match FileKind::parse(&*data)? {
            FileKind::Elf32 => elf_symbols::<object::elf::FileHeader32<Endianness>>(&data),
            FileKind::Elf64 => elf_symbols::<object::elf::FileHeader64<Endianness>>(&data),
            kind => Err(DecodeError::UnsupportedFormat(kind)),
        }
    }
}

fn read_all(source: &mut dyn ObjectSource) -> Result<Vec<u8>, DecodeError> {
    source.seek(SeekFrom::Start(0))?;
    let mut data = Vec::new();
    source.read_to_end(&mut data)?;
    Ok(data)
}

fn decode_elf<Elf>(data: &[u8]) -> Result<ElfImage, DecodeError>
where
    Elf: ElfFileHeader<Endian = Endianness>,
{
    let file = ElfFile::<Elf>::parse(data)?;
    let endian = file.endian();
    let elf_header = file.elf_header();

    let header = FileHeader {
        file_type: elf_header.e_type(endian).into(),
        entry: elf_header.e_entry(endian).into(),
    };

    let program_headers = file
        .elf_program_headers()
        .iter()
        .map(|ph| ProgramHeader {
            kind: ph.p_type(endian),
            flags: ph.p_flags(endian),
            offset: ph.p_offset(endian).into(),
            vaddr: ph.p_vaddr(endian).into(),
            file_size: ph.p_filesz(endian).into(),
            mem_size: ph.p_memsz(endian).into(),
        })
        .collect();

    let sections = file
        .sections()
        .map(|section| SectionHeader {
            name: section.name().unwrap_or_default().to_string(),
            addr: section.address(),
            size: section.size(),
        })
        .collect();

    Ok(ElfImage { header, program_headers, sections, notes: elf_notes(&file, data) })
}

/// Notes from note sections, or from `PT_NOTE` segments when the section
/// headers have been stripped. A malformed note ends the walk of its
/// section or segment and is otherwise ignored.
fn elf_notes<Elf>(file: &ElfFile<'_, Elf>, data: &[u8]) -> Vec<Note>
where
    Elf: ElfFileHeader<Endian = Endianness>,
{
    let endian = file.endian();
    let mut notes = Vec::new();

    for section in file.elf_section_table().iter() {
        if let Err(err) = collect_notes(section.notes(endian, data), endian, &mut notes) {
            debug!("Skipping malformed note section: {err}");
        }
    }
    if !notes.is_empty() {
        return notes;
    }

    for segment in file.elf_program_headers() {
        if let Err(err) = collect_notes(segment.notes(endian, data), endian, &mut notes) {
            debug!("Skipping malformed note segment: {err}");
        }
    }
    notes
}

fn collect_notes<Elf: ElfFileHeader>(
    iter: object::read::Result<Option<NoteIterator<'_, Elf>>>,
    endian: Elf::Endian,
    notes: &mut Vec<Note>,
) -> object::read::Result<()> {
    let Some(mut iter) = iter? else {
        return Ok(());
    };
    while let Some(note) = iter.next()? {
        notes.push(Note { name: note.name().to_vec(), kind: note.n_type(endian), desc: note.desc().to_vec() });
    }
    Ok(())
}

fn elf_symbols<Elf>(data: &[u8]) -> Result<Vec<Symbol>, DecodeError>
where
    Elf: ElfFileHeader<Endian = Endianness>,
{
    let file = ElfFile::<Elf>::parse(data)?;
    let Some(table) = file.symbol_table() else {
        return Err(DecodeError::NoSymbols);
    };

    Ok(table
        .symbols()
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            Some(Symbol { name: name.to_string(), value: symbol.address() })
        })
        .collect())
}
