//! Byte sources backing an object file handle.
//!
//! Every reader in this crate reads from the start of the source, and every
//! read is followed by a rewind, so a source handed back to a caller is
//! always positioned at offset 0.

#![allow(unsafe_code)] // close(2) on a released descriptor requires unsafe

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::os::fd::IntoRawFd;
use std::path::Path;

use crate::domain::ObjectFileError;
use crate::elf::ELF_MAGIC;

/// A readable, seekable resource that can be closed with error reporting.
pub trait ObjectSource: Read + Seek + Send {
    /// Close the resource.
    ///
    /// # Errors
    /// Returns the error reported by the underlying close.
    fn close(self: Box<Self>) -> io::Result<()>;
}

impl ObjectSource for File {
    fn close(self: Box<Self>) -> io::Result<()> {
        let fd = (*self).into_raw_fd();
        // SAFETY: `into_raw_fd` released ownership of `fd`; nothing else closes it.
        if unsafe { libc::close(fd) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

impl<T: AsRef<[u8]> + Send> ObjectSource for Cursor<T> {
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

/// Check whether the source starts with the ELF magic.
///
/// Reads exactly four bytes and leaves the position after them; the caller
/// rewinds. A mismatch is `Ok(false)`, not an error.
///
/// # Errors
/// Returns an error if four bytes cannot be read.
pub fn is_elf(source: &mut dyn ObjectSource) -> io::Result<bool> {
    let mut magic = [0u8; 4];
    source.read_exact(&mut magic)?;
    Ok(magic == ELF_MAGIC)
}

/// [`is_elf`] followed by an unconditional rewind.
///
/// # Errors
/// Returns the read error, the rewind error, or both joined.
pub fn check_format(source: &mut dyn ObjectSource, path: &Path) -> Result<bool, ObjectFileError> {
    let result = is_elf(source)
        .map_err(|source| ObjectFileError::ReadMagic { path: path.to_path_buf(), source });
    rewind(source, path, result)
}

/// Seek back to the start of `source`, folding a seek failure into `result`.
///
/// # Errors
/// Returns the error already in `result`, the rewind error, or both joined.
pub fn rewind<T>(
    source: &mut dyn ObjectSource,
    path: &Path,
    result: Result<T, ObjectFileError>,
) -> Result<T, ObjectFileError> {
    match source.seek(SeekFrom::Start(0)) {
        Ok(_) => result,
        Err(err) => {
            let rewind_err = ObjectFileError::Rewind { path: path.to_path_buf(), source: err };
            Err(match result {
                Ok(_) => rewind_err,
                Err(first) => first.joined(rewind_err),
            })
        }
    }
}
