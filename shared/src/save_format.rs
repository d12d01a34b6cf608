//! Save-state file format
//!
//! A save is a fixed header followed by the opaque bytes produced by a core's
//! serializer. Header integers are always stored little-endian, so files
//! written on a little-endian host are byte-identical regardless of which
//! build wrote them.
//!
//! ```text
//! offset  size      field
//! 0       4         magic "VOLC"
//! 4       4         data_len (u32)
//! 8       8         flags (u64, see SaveFlags)
//! 16      256       game name, NUL padded
//! 272     4         game type, NUL padded
//! 276     data_len  core state
//! ...     4         zero trailer
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

pub const SAVE_MAGIC: [u8; 4] = *b"VOLC";

/// Size of the game name field, including room for a terminating NUL.
pub const GAME_NAME_LEN: usize = 256;
/// Size of the game type field. A 4-character type fills it completely.
pub const GAME_TYPE_LEN: usize = 4;

/// Offset of the core state within a save file.
pub const HEADER_LEN: usize = 4 + 4 + 8 + GAME_NAME_LEN + GAME_TYPE_LEN;
/// Padding written after the core state (keeps the record 8-byte aligned).
pub const TRAILER_LEN: usize = 4;

/// Largest core state accepted in either direction (256 MiB).
pub const MAX_SAVE_DATA_LEN: usize = 256 * 1024 * 1024;
/// Smallest core state a valid save can carry.
pub const MIN_SAVE_DATA_LEN: usize = 4;

bitflags::bitflags! {
    /// Header flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SaveFlags: u64 {
        /// The host that wrote the save was little-endian.
        const LITTLE_ENDIAN = 1 << 4;
        /// Core state depends on host byte order.
        const ENDIAN_DEPENDENT = 1 << 5;
        /// Core state depends on the host platform (not loadable).
        const PLATFORM_DEPENDENT = 1 << 6;
        /// Always set in a valid save.
        const ALWAYS = 1 << 10;
    }
}

impl SaveFlags {
    /// Byte-order bit for the running host.
    pub fn host() -> Self {
        if cfg!(target_endian = "little") {
            SaveFlags::LITTLE_ENDIAN
        } else {
            SaveFlags::empty()
        }
    }
}

/// Total file size of a save carrying `data_len` bytes of core state.
pub const fn saved_size(data_len: usize) -> usize {
    HEADER_LEN + data_len + TRAILER_LEN
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaveFormatError {
    #[error("save truncated: {len} bytes is shorter than the header")]
    Truncated { len: usize },

    #[error("bad save magic: got {found:?}, want \"VOLC\"")]
    BadMagic { found: [u8; 4] },

    #[error(
        "save data length {len} outside {min}..={max}",
        min = MIN_SAVE_DATA_LEN,
        max = MAX_SAVE_DATA_LEN
    )]
    BadLength { len: usize },

    #[error("save declares {declared} data bytes but the file holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("save flags {flags:#x} missing the always-set bit")]
    MissingAlwaysFlag { flags: u64 },

    #[error("save is byte-order dependent and was written on a {written} host")]
    EndianMismatch { written: &'static str },

    #[error("save is platform dependent; loading it is not supported")]
    PlatformDependent,

    #[error("core state of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("failed to write save: {0}")]
    Write(String),
}

/// Identifying fields of a save, read without touching the core state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveHeader {
    pub data_len: usize,
    pub flags: SaveFlags,
    pub game_name: String,
    pub game_type: String,
}

/// A decoded save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveState {
    pub flags: SaveFlags,
    pub game_name: String,
    pub game_type: String,
    pub data: Vec<u8>,
}

impl SaveState {
    /// A save of `data` with `flags` and no game identity filled in yet.
    pub fn new(flags: SaveFlags, data: Vec<u8>) -> Self {
        Self {
            flags: flags | SaveFlags::ALWAYS,
            game_name: String::new(),
            game_type: String::new(),
            data,
        }
    }
}

/// Serialize a save to its file representation.
///
/// The game name is cut to 255 bytes and the type to 4 bytes, both on a
/// character boundary.
pub fn encode(state: &SaveState) -> Result<Vec<u8>, SaveFormatError> {
    if state.data.len() > MAX_SAVE_DATA_LEN {
        return Err(SaveFormatError::TooLarge {
            size: state.data.len(),
            max: MAX_SAVE_DATA_LEN,
        });
    }

    let mut out = Vec::with_capacity(saved_size(state.data.len()));
    write_record(&mut out, state).map_err(|e| SaveFormatError::Write(e.to_string()))?;
    Ok(out)
}

fn write_record(out: &mut Vec<u8>, state: &SaveState) -> std::io::Result<()> {
    out.write_all(&SAVE_MAGIC)?;
    out.write_u32::<LittleEndian>(state.data.len() as u32)?;
    out.write_u64::<LittleEndian>((state.flags | SaveFlags::ALWAYS).bits())?;
    out.write_all(&padded::<GAME_NAME_LEN>(&state.game_name, GAME_NAME_LEN - 1))?;
    out.write_all(&padded::<GAME_TYPE_LEN>(&state.game_type, GAME_TYPE_LEN))?;
    out.write_all(&state.data)?;
    out.write_all(&[0u8; TRAILER_LEN])?;
    Ok(())
}

/// Read the header fields of a save without validating its body.
pub fn peek_header(bytes: &[u8]) -> Result<SaveHeader, SaveFormatError> {
    if bytes.len() < HEADER_LEN {
        return Err(SaveFormatError::Truncated { len: bytes.len() });
    }
    let (magic, header) = read_header(&bytes[..HEADER_LEN])
        .map_err(|_| SaveFormatError::Truncated { len: bytes.len() })?;
    if magic != SAVE_MAGIC {
        return Err(SaveFormatError::BadMagic { found: magic });
    }
    Ok(header)
}

fn read_header(bytes: &[u8]) -> std::io::Result<([u8; 4], SaveHeader)> {
    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    let data_len = cursor.read_u32::<LittleEndian>()? as usize;
    let flags = SaveFlags::from_bits_retain(cursor.read_u64::<LittleEndian>()?);
    let mut name = [0u8; GAME_NAME_LEN];
    cursor.read_exact(&mut name)?;
    let mut game_type = [0u8; GAME_TYPE_LEN];
    cursor.read_exact(&mut game_type)?;

    Ok((
        magic,
        SaveHeader {
            data_len,
            flags,
            game_name: unpadded(&name),
            game_type: unpadded(&game_type),
        },
    ))
}

/// Parse and validate a save.
///
/// Checks run in a fixed order and each failure is a distinct error; the
/// core state is only sliced once the declared length matches the buffer.
pub fn decode(bytes: &[u8]) -> Result<SaveState, SaveFormatError> {
    let header = peek_header(bytes)?;

    if header.data_len < MIN_SAVE_DATA_LEN || header.data_len > MAX_SAVE_DATA_LEN {
        return Err(SaveFormatError::BadLength {
            len: header.data_len,
        });
    }
    if saved_size(header.data_len) != bytes.len() {
        return Err(SaveFormatError::LengthMismatch {
            declared: header.data_len,
            actual: bytes.len().saturating_sub(HEADER_LEN + TRAILER_LEN),
        });
    }
    if !header.flags.contains(SaveFlags::ALWAYS) {
        return Err(SaveFormatError::MissingAlwaysFlag {
            flags: header.flags.bits(),
        });
    }
    if header.flags.contains(SaveFlags::ENDIAN_DEPENDENT)
        && header.flags.contains(SaveFlags::LITTLE_ENDIAN)
            != SaveFlags::host().contains(SaveFlags::LITTLE_ENDIAN)
    {
        let written = if header.flags.contains(SaveFlags::LITTLE_ENDIAN) {
            "little-endian"
        } else {
            "big-endian"
        };
        return Err(SaveFormatError::EndianMismatch { written });
    }
    if header.flags.contains(SaveFlags::PLATFORM_DEPENDENT) {
        return Err(SaveFormatError::PlatformDependent);
    }

    Ok(SaveState {
        flags: header.flags,
        game_name: header.game_name,
        game_type: header.game_type,
        data: bytes[HEADER_LEN..HEADER_LEN + header.data_len].to_vec(),
    })
}

fn padded<const N: usize>(s: &str, max: usize) -> [u8; N] {
    let mut end = s.len().min(max);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = [0u8; N];
    out[..end].copy_from_slice(&s.as_bytes()[..end]);
    out
}

fn unpadded(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SaveState {
        let mut state = SaveState::new(SaveFlags::host(), vec![1, 2, 3, 4, 5, 6]);
        state.game_name = "Zelda.sfc".to_string();
        state.game_type = "sfc".to_string();
        state
    }

    // =============================================================
    // Layout
    // =============================================================

    #[test]
    fn test_header_layout() {
        assert_eq!(HEADER_LEN, 276);
        assert_eq!(saved_size(0), 280);

        let bytes = encode(&sample()).unwrap();
        assert_eq!(bytes.len(), saved_size(6));
        assert_eq!(&bytes[0..4], b"VOLC");
        assert_eq!(&bytes[4..8], &6u32.to_le_bytes());
        assert_eq!(&bytes[16..25], b"Zelda.sfc");
        assert_eq!(bytes[25], 0);
        assert_eq!(&bytes[272..275], b"sfc");
        assert_eq!(&bytes[276..282], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(&bytes[282..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_always_flag_is_written() {
        let mut state = sample();
        state.flags = SaveFlags::empty();
        let bytes = encode(&state).unwrap();
        let flags = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        assert_ne!(flags & SaveFlags::ALWAYS.bits(), 0);
    }

    #[test]
    fn test_decode_restores_fields() {
        let bytes = encode(&sample()).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.game_name, "Zelda.sfc");
        assert_eq!(decoded.game_type, "sfc");
        assert_eq!(decoded.data, vec![1, 2, 3, 4, 5, 6]);
        assert!(decoded.flags.contains(SaveFlags::ALWAYS));
    }

    #[test]
    fn test_four_char_type_fills_field() {
        let mut state = sample();
        state.game_type = "unif".to_string();
        let decoded = decode(&encode(&state).unwrap()).unwrap();
        assert_eq!(decoded.game_type, "unif");
    }

    #[test]
    fn test_long_name_is_cut() {
        let mut state = sample();
        state.game_name = "x".repeat(400);
        let decoded = decode(&encode(&state).unwrap()).unwrap();
        assert_eq!(decoded.game_name.len(), GAME_NAME_LEN - 1);
    }

    // =============================================================
    // Rejection
    // =============================================================

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            decode(&bytes),
            Err(SaveFormatError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = encode(&sample()).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(SaveFormatError::LengthMismatch { .. })
        ));
        assert!(matches!(
            decode(&bytes[..100]),
            Err(SaveFormatError::Truncated { len: 100 })
        ));
    }

    #[test]
    fn test_declared_length_larger_than_file_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[4..8].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(SaveFormatError::LengthMismatch { declared: 1000, .. })
        ));
    }

    #[test]
    fn test_tiny_payload_rejected() {
        let state = SaveState::new(SaveFlags::host(), vec![1, 2]);
        let bytes = encode(&state).unwrap();
        assert_eq!(decode(&bytes), Err(SaveFormatError::BadLength { len: 2 }));
    }

    #[test]
    fn test_missing_always_flag_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        let flags = SaveFlags::host().bits();
        bytes[8..16].copy_from_slice(&flags.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(SaveFormatError::MissingAlwaysFlag { .. })
        ));
    }

    #[test]
    fn test_endian_dependent_foreign_host_rejected() {
        let mut state = sample();
        // Flip the byte-order bit relative to this host.
        state.flags = (SaveFlags::ENDIAN_DEPENDENT | SaveFlags::ALWAYS)
            | (SaveFlags::LITTLE_ENDIAN - SaveFlags::host());
        let bytes = encode(&state).unwrap();
        assert!(matches!(
            decode(&bytes),
            Err(SaveFormatError::EndianMismatch { .. })
        ));
    }

    #[test]
    fn test_endian_independent_loads_anywhere() {
        let mut state = sample();
        state.flags = SaveFlags::ALWAYS | (SaveFlags::LITTLE_ENDIAN - SaveFlags::host());
        assert!(decode(&encode(&state).unwrap()).is_ok());
    }

    #[test]
    fn test_platform_dependent_rejected() {
        let mut state = sample();
        state.flags |= SaveFlags::PLATFORM_DEPENDENT;
        assert_eq!(
            decode(&encode(&state).unwrap()),
            Err(SaveFormatError::PlatformDependent)
        );
    }

    #[test]
    fn test_peek_header_ignores_body() {
        let bytes = encode(&sample()).unwrap();
        let header = peek_header(&bytes[..HEADER_LEN]).unwrap();
        assert_eq!(header.game_name, "Zelda.sfc");
        assert_eq!(header.data_len, 6);
    }
}
