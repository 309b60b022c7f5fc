//! Minimal little-endian ELF64 image writer for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: usize = 24;

const PT_LOAD: u32 = 1;
const SHT_PROGBITS: u32 = 1;
const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_NOTE: u32 = 7;
const SHF_ALLOC: u64 = 2;
const SHF_EXECINSTR: u64 = 4;
const SHN_ABS: u16 = 0xfff1;

#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub offset: u64,
    pub vaddr: u64,
    pub size: u64,
    pub flags: u32,
}

impl Segment {
    pub fn new(offset: u64, vaddr: u64, size: u64, flags: u32) -> Self {
        Self { offset, vaddr, size, flags }
    }
}

/// Description of the image to write.
#[derive(Debug, Clone)]
pub struct ElfLayout {
    pub file_type: u16,
    pub segments: Vec<Segment>,
    /// `.text` section as `(addr, offset, size)`.
    pub text: Option<(u64, u64, u64)>,
    pub symbols: Vec<(String, u64)>,
    pub build_id: Option<Vec<u8>>,
}

impl ElfLayout {
    pub fn new(file_type: u16, segments: Vec<Segment>) -> Self {
        Self { file_type, segments, text: None, symbols: Vec::new(), build_id: None }
    }

    pub fn with_text(mut self, addr: u64, offset: u64, size: u64) -> Self {
        self.text = Some((addr, offset, size));
        self
    }

    pub fn with_symbol(mut self, name: &str, value: u64) -> Self {
        self.symbols.push((name.to_string(), value));
        self
    }

    pub fn with_build_id(mut self, id: &[u8]) -> Self {
        self.build_id = Some(id.to_vec());
        self
    }

    /// Serialize the image. Segment contents are zero filled.
    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0u8; EHDR_SIZE + PHDR_SIZE * self.segments.len()];
        let body_end = self.segments.iter().map(|s| s.offset + s.size).max().unwrap_or(0);
        if (body_end as usize) > out.len() {
            out.resize(body_end as usize, 0);
        }

        let mut shstrtab = vec![0u8];
        let mut sections: Vec<SectionEntry> = vec![SectionEntry::default()];

        if let Some((addr, offset, size)) = self.text {
            sections.push(SectionEntry {
                name: add_name(&mut shstrtab, ".text"),
                kind: SHT_PROGBITS,
                flags: SHF_ALLOC | SHF_EXECINSTR,
                addr,
                offset,
                size,
                align: 16,
                ..SectionEntry::default()
            });
        }

        if let Some(id) = &self.build_id {
            align(&mut out, 8);
            let offset = out.len() as u64;
            out.extend_from_slice(&4u32.to_le_bytes());
            out.extend_from_slice(&(id.len() as u32).to_le_bytes());
            out.extend_from_slice(&3u32.to_le_bytes());
            out.extend_from_slice(b"GNU\0");
            out.extend_from_slice(id);
            align(&mut out, 4);
            sections.push(SectionEntry {
                name: add_name(&mut shstrtab, ".note.gnu.build-id"),
                kind: SHT_NOTE,
                flags: SHF_ALLOC,
                offset,
                size: out.len() as u64 - offset,
                align: 4,
                ..SectionEntry::default()
            });
        }

        if !self.symbols.is_empty() {
            let mut strtab = vec![0u8];
            let mut symtab = vec![0u8; SYM_SIZE];
            for (name, value) in &self.symbols {
                let name_off = strtab.len() as u32;
                strtab.extend_from_slice(name.as_bytes());
                strtab.push(0);

                symtab.extend_from_slice(&name_off.to_le_bytes());
                symtab.push(0x12); // STB_GLOBAL, STT_FUNC
                symtab.push(0);
                symtab.extend_from_slice(&SHN_ABS.to_le_bytes());
                symtab.extend_from_slice(&value.to_le_bytes());
                symtab.extend_from_slice(&0u64.to_le_bytes());
            }

            align(&mut out, 8);
            let symtab_offset = out.len() as u64;
            out.extend_from_slice(&symtab);
            let strtab_offset = out.len() as u64;
            out.extend_from_slice(&strtab);

            let symtab_index = sections.len();
            sections.push(SectionEntry {
                name: add_name(&mut shstrtab, ".symtab"),
                kind: SHT_SYMTAB,
                offset: symtab_offset,
                size: symtab.len() as u64,
                link: symtab_index as u32 + 1,
                info: 1,
                align: 8,
                entsize: SYM_SIZE as u64,
                ..SectionEntry::default()
            });
            sections.push(SectionEntry {
                name: add_name(&mut shstrtab, ".strtab"),
                kind: SHT_STRTAB,
                offset: strtab_offset,
                size: strtab.len() as u64,
                align: 1,
                ..SectionEntry::default()
            });
        }

        let shstrtab_name = add_name(&mut shstrtab, ".shstrtab");
        let shstrtab_offset = out.len() as u64;
        out.extend_from_slice(&shstrtab);
        let shstrndx = sections.len() as u16;
        sections.push(SectionEntry {
            name: shstrtab_name,
            kind: SHT_STRTAB,
            offset: shstrtab_offset,
            size: shstrtab.len() as u64,
            align: 1,
            ..SectionEntry::default()
        });

        align(&mut out, 8);
        let shoff = out.len() as u64;
        for section in &sections {
            section.write(&mut out);
        }

        self.write_header(&mut out, shoff, sections.len() as u16, shstrndx);
        self.write_program_headers(&mut out);
        out
    }

    /// Write the image to `dir/name` and return its path.
    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, self.build()).expect("Failed to write ELF image");
        path
    }

    fn write_header(&self, out: &mut [u8], shoff: u64, shnum: u16, shstrndx: u16) {
        let mut h = Vec::with_capacity(EHDR_SIZE);
        h.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        h.extend_from_slice(&[0u8; 8]);
        h.extend_from_slice(&self.file_type.to_le_bytes());
        h.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        h.extend_from_slice(&1u32.to_le_bytes());
        let entry = self.text.map_or(0, |(addr, _, _)| addr);
        h.extend_from_slice(&entry.to_le_bytes());
        h.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        h.extend_from_slice(&shoff.to_le_bytes());
        h.extend_from_slice(&0u32.to_le_bytes());
        h.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        h.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        h.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        h.extend_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        h.extend_from_slice(&shnum.to_le_bytes());
        h.extend_from_slice(&shstrndx.to_le_bytes());
        out[..EHDR_SIZE].copy_from_slice(&h);
    }

    fn write_program_headers(&self, out: &mut [u8]) {
        for (i, s) in self.segments.iter().enumerate() {
            let mut p = Vec::with_capacity(PHDR_SIZE);
            p.extend_from_slice(&PT_LOAD.to_le_bytes());
            p.extend_from_slice(&s.flags.to_le_bytes());
            p.extend_from_slice(&s.offset.to_le_bytes());
            p.extend_from_slice(&s.vaddr.to_le_bytes());
            p.extend_from_slice(&s.vaddr.to_le_bytes());
            p.extend_from_slice(&s.size.to_le_bytes());
            p.extend_from_slice(&s.size.to_le_bytes());
            p.extend_from_slice(&0x1000u64.to_le_bytes());
            let at = EHDR_SIZE + i * PHDR_SIZE;
            out[at..at + PHDR_SIZE].copy_from_slice(&p);
        }
    }
}

#[derive(Debug, Default)]
struct SectionEntry {
    name: u32,
    kind: u32,
    flags: u64,
    addr: u64,
    offset: u64,
    size: u64,
    link: u32,
    info: u32,
    align: u64,
    entsize: u64,
}

impl SectionEntry {
    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name.to_le_bytes());
        out.extend_from_slice(&self.kind.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.addr.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.link.to_le_bytes());
        out.extend_from_slice(&self.info.to_le_bytes());
        out.extend_from_slice(&self.align.to_le_bytes());
        out.extend_from_slice(&self.entsize.to_le_bytes());
    }
}

fn add_name(table: &mut Vec<u8>, name: &str) -> u32 {
    let offset = table.len() as u32;
    table.extend_from_slice(name.as_bytes());
    table.push(0);
    offset
}

fn align(out: &mut Vec<u8>, to: usize) {
    let padded = out.len().div_ceil(to) * to;
    out.resize(padded, 0);
}

/// Position-independent shared object laid out like a typical linker output:
/// read-only headers, text, then data at a higher virtual address.
///
/// | segment | offset | vaddr  | size   | flags |
/// |---------|--------|--------|--------|-------|
/// | rodata  | 0x0    | 0x0    | 0x1000 | R     |
/// | text    | 0x1000 | 0x1000 | 0x1000 | R X   |
/// | data    | 0x2000 | 0x3000 | 0x1000 | R W   |
pub fn shared_object() -> ElfLayout {
    ElfLayout::new(
        ET_DYN,
        vec![
            Segment::new(0, 0, 0x1000, PF_R),
            Segment::new(0x1000, 0x1000, 0x1000, PF_R | PF_X),
            Segment::new(0x2000, 0x3000, 0x1000, PF_R | PF_W),
        ],
    )
    .with_text(0x1000, 0x1000, 0x100)
    .with_build_id(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02])
}
