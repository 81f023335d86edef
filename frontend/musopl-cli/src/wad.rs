//! Minimal WAD lump reader, just enough to pull a single named lump (a MUS
//! score, typically `D_*`) out of an IWAD/PWAD without depending on a full
//! WAD library. Format grounded directly on the reference `wadextract` tool:
//! a 12-byte header (`identification[4]`, `i32 num_lumps`, `i32
//! info_table_offset`) followed by `num_lumps` 16-byte directory entries
//! (`i32 file_pos`, `i32 size`, `char name[8]`).

use std::fmt;

#[derive(Debug)]
pub enum WadError {
    TooShort,
    BadMagic,
    TruncatedDirectory,
    LumpNotFound(String),
}

impl fmt::Display for WadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WadError::TooShort => write!(f, "wad file too short to contain a header"),
            WadError::BadMagic => write!(f, "missing IWAD/PWAD magic"),
            WadError::TruncatedDirectory => write!(f, "wad lump directory extends past end of file"),
            WadError::LumpNotFound(name) => write!(f, "lump {name:?} not found in wad"),
        }
    }
}

impl std::error::Error for WadError {}

const HEADER_LEN: usize = 12;
const ENTRY_LEN: usize = 16;

/// Extracts the bytes of the lump named `lump_name` (case-insensitive, matched the way the
/// original tool compares the fixed 8-byte name field) from a WAD file's raw bytes.
pub fn extract_lump(wad_bytes: &[u8], lump_name: &str) -> Result<Vec<u8>, WadError> {
    if wad_bytes.len() < HEADER_LEN {
        return Err(WadError::TooShort);
    }
    let magic = &wad_bytes[0..4];
    if magic != b"IWAD" && magic != b"PWAD" {
        return Err(WadError::BadMagic);
    }
    let num_lumps = i32::from_le_bytes(wad_bytes[4..8].try_into().unwrap()) as usize;
    let info_table_offset = i32::from_le_bytes(wad_bytes[8..12].try_into().unwrap()) as usize;

    let dir_end = info_table_offset + num_lumps * ENTRY_LEN;
    if dir_end > wad_bytes.len() {
        return Err(WadError::TruncatedDirectory);
    }

    for i in 0..num_lumps {
        let entry = &wad_bytes[info_table_offset + i * ENTRY_LEN..info_table_offset + (i + 1) * ENTRY_LEN];
        let file_pos = i32::from_le_bytes(entry[0..4].try_into().unwrap()) as usize;
        let size = i32::from_le_bytes(entry[4..8].try_into().unwrap()) as usize;
        let name_bytes = &entry[8..16];
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(name_bytes.len());
        let name = String::from_utf8_lossy(&name_bytes[..name_len]);

        if name.eq_ignore_ascii_case(lump_name) {
            let end = file_pos + size;
            if end > wad_bytes.len() {
                return Err(WadError::TruncatedDirectory);
            }
            return Ok(wad_bytes[file_pos..end].to_vec());
        }
    }

    Err(WadError::LumpNotFound(lump_name.to_string()))
}
