//! Front-end interface driven by a running core
//!
//! A [`RetroUi`] receives everything a core produces during a frame: video,
//! audio, on-screen messages and performance hints.

use crate::ffi::{
    RETRO_PIXEL_FORMAT_0RGB1555, RETRO_PIXEL_FORMAT_RGB565, RETRO_PIXEL_FORMAT_XRGB8888,
};

/// Pixel layouts a core can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 16 bits per pixel, 5 bits each of red, green and blue. The libretro default.
    #[default]
    Rgb1555,
    /// 32 bits per pixel, top byte ignored.
    Xrgb8888,
    /// 16 bits per pixel, 6 bits of green.
    Rgb565,
}

impl PixelFormat {
    /// Map a `retro_pixel_format` value. Unknown values yield `None`.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            RETRO_PIXEL_FORMAT_0RGB1555 => Some(Self::Rgb1555),
            RETRO_PIXEL_FORMAT_XRGB8888 => Some(Self::Xrgb8888),
            RETRO_PIXEL_FORMAT_RGB565 => Some(Self::Rgb565),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgb1555 | Self::Rgb565 => 2,
            Self::Xrgb8888 => 4,
        }
    }

    fn pixel_to_rgba(self, px: &[u8]) -> [u8; 4] {
        let expand5 = |v: u16| ((v << 3) | (v >> 2)) as u8;
        match self {
            Self::Rgb1555 => {
                let v = u16::from_ne_bytes([px[0], px[1]]);
                [expand5((v >> 10) & 0x1f), expand5((v >> 5) & 0x1f), expand5(v & 0x1f), 0xff]
            }
            Self::Rgb565 => {
                let v = u16::from_ne_bytes([px[0], px[1]]);
                let g = (v >> 5) & 0x3f;
                [expand5((v >> 11) & 0x1f), ((g << 2) | (g >> 4)) as u8, expand5(v & 0x1f), 0xff]
            }
            Self::Xrgb8888 => {
                let v = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                [(v >> 16) as u8, (v >> 8) as u8, v as u8, 0xff]
            }
        }
    }
}

/// One frame of video as handed over by the core.
///
/// Rows are `pitch` bytes apart; only the first `width` pixels of each row
/// are visible.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    pub format: PixelFormat,
}

impl VideoFrame<'_> {
    /// Number of bytes a frame of these dimensions spans.
    pub fn required_len(width: u32, height: u32, pitch: usize, format: PixelFormat) -> usize {
        if width == 0 || height == 0 {
            return 0;
        }
        pitch * (height as usize - 1) + width as usize * format.bytes_per_pixel()
    }

    /// Convert to tightly packed RGBA8.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let bpp = self.format.bytes_per_pixel();
        let width = self.width as usize;
        let mut out = Vec::with_capacity(width * self.height as usize * 4);
        for row in 0..self.height as usize {
            let start = row * self.pitch;
            let Some(line) = self.data.get(start..start + width * bpp) else {
                break;
            };
            for px in line.chunks_exact(bpp) {
                out.extend_from_slice(&self.format.pixel_to_rgba(px));
            }
        }
        out
    }

    /// Copy the frame so it can outlive the core's buffer.
    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            data: self.data.to_vec(),
            width: self.width,
            height: self.height,
            pitch: self.pitch,
            format: self.format,
        }
    }
}

/// A [`VideoFrame`] that owns its pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    pub format: PixelFormat,
}

impl OwnedFrame {
    pub fn as_frame(&self) -> VideoFrame<'_> {
        VideoFrame {
            data: &self.data,
            width: self.width,
            height: self.height,
            pitch: self.pitch,
            format: self.format,
        }
    }
}

/// Callbacks a front end provides while a core runs a frame.
pub trait RetroUi {
    /// A new frame, or `None` when the core asks to repeat the previous one.
    fn video_refresh(&mut self, frame: Option<VideoFrame<'_>>);

    /// Interleaved stereo samples. Returns how many frames were consumed.
    fn audio_batch(&mut self, samples: &[i16], frames: usize, sample_rate: u32) -> usize;

    /// Show `message` for `frames` frames.
    fn show_message(&mut self, message: &str, frames: u32);

    /// The core's estimate of how demanding it is.
    fn set_perf_level(&mut self, level: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_raw() {
        assert_eq!(PixelFormat::from_raw(0), Some(PixelFormat::Rgb1555));
        assert_eq!(PixelFormat::from_raw(1), Some(PixelFormat::Xrgb8888));
        assert_eq!(PixelFormat::from_raw(2), Some(PixelFormat::Rgb565));
        assert_eq!(PixelFormat::from_raw(3), None);
    }

    #[test]
    fn test_xrgb8888_to_rgba() {
        let px = 0x00_11_22_33u32.to_ne_bytes();
        let frame =
            VideoFrame { data: &px, width: 1, height: 1, pitch: 4, format: PixelFormat::Xrgb8888 };
        assert_eq!(frame.to_rgba8(), vec![0x11, 0x22, 0x33, 0xff]);
    }

    #[test]
    fn test_rgb565_white_and_black() {
        let mut data = Vec::new();
        data.extend_from_slice(&0xffffu16.to_ne_bytes());
        data.extend_from_slice(&0x0000u16.to_ne_bytes());
        let frame =
            VideoFrame { data: &data, width: 2, height: 1, pitch: 4, format: PixelFormat::Rgb565 };
        assert_eq!(frame.to_rgba8(), vec![255, 255, 255, 255, 0, 0, 0, 255]);
    }

    #[test]
    fn test_rgb1555_pure_red() {
        let data = (0x1fu16 << 10).to_ne_bytes();
        let frame =
            VideoFrame { data: &data, width: 1, height: 1, pitch: 2, format: PixelFormat::Rgb1555 };
        assert_eq!(frame.to_rgba8(), vec![255, 0, 0, 255]);
    }

    #[test]
    fn test_pitch_padding_is_skipped() {
        // 1 pixel wide, 2 rows, 8 byte pitch
        let mut data = vec![0u8; 12];
        data[0..4].copy_from_slice(&0x00ff0000u32.to_ne_bytes());
        data[8..12].copy_from_slice(&0x000000ffu32.to_ne_bytes());
        let frame = VideoFrame {
            data: &data,
            width: 1,
            height: 2,
            pitch: 8,
            format: PixelFormat::Xrgb8888,
        };
        assert_eq!(VideoFrame::required_len(1, 2, 8, PixelFormat::Xrgb8888), 12);
        assert_eq!(frame.to_rgba8(), vec![255, 0, 0, 255, 0, 0, 255, 255]);
    }
}
