//! File formats shared by the retrohost crates.
//!
//! - [`save_format`] - versioned save-state records with portability flags
//! - [`rom_type`] - game file classification by magic bytes

pub mod rom_type;
pub mod save_format;

pub use rom_type::{FileTypeError, classify, sniff_file};
pub use save_format::{
    MAX_SAVE_DATA_LEN, SaveFlags, SaveFormatError, SaveHeader, SaveState, saved_size,
};
