//! # objfile - Runtime Address Translation for ELF Objects
//!
//! Profilers sample **runtime addresses**: where an instruction or datum sits
//! in a process's memory. Symbol tables and debug info are keyed by the
//! **ELF virtual address** recorded in the file. This crate bridges the two
//! for userspace executables, shared libraries, and kernel images.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 /proc/<pid>/maps  or explicit mapping           │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ (path, start, limit, offset)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       objfile (This Crate)                      │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │symbolization │──▶│ObjectFilePool│──▶│    Loader    │         │
//! │  │ (translator) │   │ (load once)  │   │ (open+check) │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                                               │                 │
//! │                                               ▼                 │
//! │                     ┌──────────────┐   ┌──────────────┐         │
//! │                     │  ObjectFile  │◀──│     elf      │         │
//! │                     │ (base, once) │   │(decode, base)│         │
//! │                     └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`objectfile`]: object handles, loading, segment selection, pooling
//! - [`elf`]: ELF decoding behind the [`elf::ElfDecoder`] seam, build ids,
//!   base computation and program header lookups
//! - [`symbolization`]: `/proc/<pid>/maps` parsing and per-process translation
//! - [`cache`]: loading cache that coalesces concurrent misses
//! - [`cli`]: command-line arguments of `objaddr`
//! - [`domain`]: core types (`Pid`, `BuildId`) and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Translate addresses sampled from a running process
//! objaddr --pid <PID> 0x55d0c0a03a10 0x7f2a3c62a1b0
//!
//! # Translate against an explicit mapping, as JSON
//! objaddr --binary ./app --start 0x400000 --limit 0x401000 --format json 0x400123
//! ```
//!
//! ## Key Concepts
//!
//! - **Base**: `runtime address - ELF address`, fixed per mapping
//! - **PIE/ASLR**: position-independent objects are loaded at random bases
//! - **Kernel relocation symbol**: `_stext`/`_text`, used to relocate kernel
//!   images whose mappings do not line up with their segments

pub mod cache;
pub mod cli;
pub mod domain;
pub mod elf;
pub mod objectfile;
pub mod symbolization;
