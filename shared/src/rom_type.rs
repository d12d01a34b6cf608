//! Game file type detection
//!
//! Classifies a game file into the extension a core would register for it,
//! by looking at magic bytes first and the file name last. Classification is
//! a pure function of the name, the size and the leading bytes of the file.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Bytes of a file needed to classify it (64 KiB plus a copier header).
pub const SNIFF_LEN: usize = 0x10000 + SMC_HEADER_LEN;

/// Size of the copier header that prefixes `.smc`/`.swc`/`.fig` dumps.
pub const SMC_HEADER_LEN: usize = 512;

const LO_ROM_HEADER: usize = 0x7fc0;
const HI_ROM_SHIFT: usize = 0x8000;
const SNES_HEADER_LEN: usize = 0x40;
const SNES_TITLE_LEN: usize = 0x15;
const SNES_MAP_TYPE: usize = 0x15;
const SNES_COMPLEMENT: usize = 0x1c;
const SNES_CHECKSUM: usize = 0x1e;

#[derive(Debug, thiserror::Error)]
pub enum FileTypeError {
    #[error("file too small ({size} bytes), corrupt?")]
    TooSmall { size: u64 },

    #[error("file has no extension")]
    NoExtension,

    #[error("unable to read: {0}")]
    Io(#[from] io::Error),
}

/// Lowercase extension of `file_name`, if any.
pub fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Classify a game file.
///
/// `head` holds the first bytes of the file (up to [`SNIFF_LEN`]), and
/// `file_size` the full size on disk.
pub fn classify(file_name: &str, file_size: u64, head: &[u8]) -> Result<String, FileTypeError> {
    if file_size < 4 {
        return Err(FileTypeError::TooSmall { size: file_size });
    }

    let ext = extension_of(file_name);

    if ext.as_deref() == Some("a26") && file_size == 4096 {
        return Ok("a26".to_string());
    }
    if is_nes(head) {
        return Ok("nes".to_string());
    }
    if is_unif(head) {
        return Ok("unif".to_string());
    }
    if is_fds(head) {
        return Ok("fds".to_string());
    }
    if file_size % 1024 == 0 && is_super_nes(head, file_size, 0) {
        return Ok("sfc".to_string());
    }
    if file_size % 1024 == SMC_HEADER_LEN as u64 && is_super_nes(head, file_size, SMC_HEADER_LEN) {
        return Ok("smc".to_string());
    }

    let Some(ext) = ext else {
        return Err(FileTypeError::NoExtension);
    };
    match ext.as_str() {
        "nes" | "sfc" | "smc" => {
            tracing::warn!("{}: {} file but magic not recognized", file_name, ext);
            Ok(ext)
        }
        "unf" | "unif" => {
            tracing::warn!("{}: unif file but magic not recognized", file_name);
            Ok("unif".to_string())
        }
        _ => {
            tracing::warn!("{}: no magic detected, trying extension {}", file_name, ext);
            Ok(ext)
        }
    }
}

/// Read the head of `path` and classify it.
pub fn sniff_file(path: &Path) -> Result<String, FileTypeError> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut head = Vec::with_capacity(SNIFF_LEN.min(file_size as usize));
    file.take(SNIFF_LEN as u64).read_to_end(&mut head)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    classify(&file_name, file_size, &head)
}

fn is_nes(head: &[u8]) -> bool {
    head.len() >= 16 && head.starts_with(b"NES\x1a")
}

fn is_unif(head: &[u8]) -> bool {
    head.len() >= 16 && head.starts_with(b"UNIF") && all_zero(head, 8, 32)
}

fn is_fds(head: &[u8]) -> bool {
    head.len() >= 16 && head.starts_with(b"FDS\x1a") && all_zero(head, 5, 16)
}

/// True if every byte of `head[start..end]` that exists is zero.
fn all_zero(head: &[u8], start: usize, end: usize) -> bool {
    head.iter()
        .take(end)
        .skip(start)
        .all(|&b| b == 0)
}

fn is_super_nes(head: &[u8], file_size: u64, copier: usize) -> bool {
    if copier != 0 {
        if head.len() < copier {
            return false;
        }
        if u64::from(head[0]) != (file_size / 8192) & 0xff {
            return false;
        }
        if u64::from(head[1]) != (file_size >> 8) & 0xff {
            return false;
        }
        if !all_zero(head, 3, copier) {
            return false;
        }
    }
    is_super_nes_header(head, false, copier) || is_super_nes_header(head, true, copier)
}

/// Check for an internal Super NES header assuming lo-ROM or hi-ROM mapping.
///
/// `copier` is the size of any copier header in front of the image. The
/// header must have a map type matching the mapping, a printable title and a
/// checksum whose complement is stored next to it.
pub fn is_super_nes_header(rom: &[u8], hi_rom: bool, copier: usize) -> bool {
    let mut ofs = copier + LO_ROM_HEADER;
    if hi_rom {
        ofs += HI_ROM_SHIFT;
    }
    let Some(header) = rom.get(ofs..ofs + SNES_HEADER_LEN) else {
        return false;
    };

    let map_type = header[SNES_MAP_TYPE];
    let known = if hi_rom {
        matches!(map_type, 0x21 | 0x23 | 0x31 | 0x35)
    } else {
        matches!(map_type, 0x20 | 0x30 | 0x32)
    };
    if !known || (map_type & 1 == 1) != hi_rom {
        return false;
    }

    if !header[..SNES_TITLE_LEN].iter().all(|b| (0x20..=0x7e).contains(b)) {
        return false;
    }

    let complement = u16::from_le_bytes([header[SNES_COMPLEMENT], header[SNES_COMPLEMENT + 1]]);
    let checksum = u16::from_le_bytes([header[SNES_CHECKSUM], header[SNES_CHECKSUM + 1]]);
    complement ^ checksum == 0xffff
}
