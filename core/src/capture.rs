//! Screenshots of the game's video output.
//!
//! Frames are converted to RGBA and written as PNG files named
//! `<game>_screenshot_<timestamp>.png`.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::path::{Path, PathBuf};

use crate::ui::VideoFrame;

/// Sanitize a game name for use in filenames.
///
/// Lowercases, replaces everything but letters and digits with underscores,
/// and collapses runs of underscores.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Generate a timestamped filename with game name prefix.
pub fn timestamped_filename(game_name: &str, suffix: &str, extension: &str) -> String {
    let now = chrono::Local::now();
    format!(
        "{}_{}_{}.{}",
        sanitize_filename(game_name),
        suffix,
        now.format("%Y-%m-%d_%H-%M-%S"),
        extension
    )
}

/// Write `frame` as a PNG in `dir` right away.
pub fn save_screenshot(frame: &VideoFrame<'_>, dir: &Path, game_name: &str) -> Result<PathBuf> {
    save_rgba_png(frame.to_rgba8(), frame.width, frame.height, dir, game_name)
}

fn save_rgba_png(
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    dir: &Path,
    game_name: &str,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).context("Failed to create screenshots directory")?;
    let path = dir.join(timestamped_filename(game_name, "screenshot", "png"));

    let image = RgbaImage::from_raw(width, height, pixels)
        .context("Frame buffer does not match its size")?;
    image
        .save_with_format(&path, image::ImageFormat::Png)
        .context("Failed to write PNG")?;

    tracing::info!("Screenshot saved: {}", path.display());
    Ok(path)
}
