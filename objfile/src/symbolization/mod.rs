//! # Address Translation for Running Processes
//!
//! Samples taken from a live process carry **runtime addresses** such as
//! `0x55f3a2b4c780`. Symbol tables and debug info describe the **ELF virtual
//! address space** of the file instead. With ASLR and shared libraries the
//! two differ by a per-mapping relocation base:
//!
//! ```text
//! Runtime Address = Base + ELF Address
//! ELF Address     = Runtime Address - Base
//! ```
//!
//! ## Translation Flow
//!
//! ```text
//! 1. Read /proc/<pid>/maps
//!    55d0c0a02000-55d0c0a07000 r-xp 00002000 fd:01 1049105 /usr/bin/cat
//!
//! 2. Find the file-backed mapping containing the address
//!
//! 3. Open the mapped file once per mapping (ObjectFilePool)
//!
//! 4. Resolve the base from the ELF program headers on first use
//!    and subtract it
//! ```
//!
//! ## Module Structure
//!
//! - **`memory_maps`**: `/proc/<pid>/maps` parsing
//! - **`translator`**: [`AddressTranslator`] combining the maps with the pool
//!
//! ## References
//!
//! - [Linux `/proc/pid/maps` format](https://man7.org/linux/man-pages/man5/proc.5.html)

pub mod memory_maps;
pub mod translator;

pub use memory_maps::{parse_memory_maps, MemoryMapping};
pub use translator::{AddressTranslator, Translation};
