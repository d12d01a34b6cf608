//! Retrohost Core - libretro core hosting
//!
//! This crate loads libretro cores, runs games on them and keeps the local
//! cache of cores, games and saves up to date.
//!
//! # Architecture
//!
//! - [`RetroCore`] - A loaded core and the host state its callbacks see
//! - [`RetroUi`] - Trait the front end implements to receive video, audio and messages
//! - [`RetroApp`] - A game (or game-less core) ready to launch
//! - [`RetroWeb`] - Index of the cache directories, plus core downloads
//! - [`RetroHttp`] - Poll-driven HTTP GET client used by the sync

pub mod app;
pub mod capture;
pub mod ffi;
pub mod http;
pub mod library;
pub mod loader;
pub mod retro_core;
pub mod sync;
#[cfg(test)]
pub(crate) mod test_utils;
pub mod ui;

// Re-export the main types
pub use app::{AppError, Config, RetroApp};
pub use http::{HttpError, HttpOptions, PollStatus, RetroHttp};
pub use library::{
    BuildbotTarget, CacheError, CacheLayout, LoadSaveOutcome, RetroWeb, SaveFileError,
};
pub use loader::CoreApi;
pub use retro_core::{
    CoreDirs, CoreError, CoreOptions, LoadStateError, RetroCore, SaveStateError, is_core_active,
};
pub use sync::{SyncError, SyncPhase};
pub use ui::{OwnedFrame, PixelFormat, RetroUi, VideoFrame};

// Re-export capture types
pub use capture::save_screenshot;
