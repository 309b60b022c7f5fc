//! Build identifier extraction.
//!
//! The GNU build-id note is preferred; Go binaries built without it still
//! carry their own build id note.

use std::fmt::Write as _;

use super::ElfImage;
use crate::domain::{BuildId, BuildIdError};

const NT_GNU_BUILD_ID: u32 = 3;
const NT_GO_BUILD_ID: u32 = 4;

/// Extract the build identifier of a decoded object.
///
/// # Errors
/// Returns [`BuildIdError::NotFound`] when the object carries no build id note.
pub fn build_id(image: &ElfImage) -> Result<BuildId, BuildIdError> {
    if let Some(note) =
        image.notes.iter().find(|n| n.name == b"GNU" && n.kind == NT_GNU_BUILD_ID && !n.desc.is_empty())
    {
        return Ok(BuildId(to_hex(&note.desc)));
    }

    if let Some(note) = image.notes.iter().find(|n| n.name == b"Go" && n.kind == NT_GO_BUILD_ID) {
        let id = std::str::from_utf8(&note.desc).map_err(|_| BuildIdError::InvalidGoBuildId)?;
        return Ok(BuildId(id.trim_end_matches('\0').to_string()));
    }

    Err(BuildIdError::NotFound)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
