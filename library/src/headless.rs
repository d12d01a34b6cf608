//! A front end with no window and no speakers
//!
//! [`HeadlessUi`] keeps what a core produced so it can be written to disk
//! afterwards: the last video frame, every audio sample and any messages.

use std::path::Path;

use anyhow::{Context, Result};
use retrohost_core::{OwnedFrame, RetroUi, VideoFrame};

/// Records a core's output in memory.
#[derive(Debug, Default)]
pub struct HeadlessUi {
    /// Last frame the core rendered
    pub last_frame: Option<OwnedFrame>,
    /// Frames seen, duplicates included
    pub frames: u64,
    /// Interleaved stereo samples
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub messages: Vec<String>,
    pub perf_level: Option<u32>,
}

impl RetroUi for HeadlessUi {
    fn video_refresh(&mut self, frame: Option<VideoFrame<'_>>) {
        self.frames += 1;
        if let Some(frame) = frame {
            self.last_frame = Some(frame.to_owned_frame());
        }
    }

    fn audio_batch(&mut self, samples: &[i16], frames: usize, sample_rate: u32) -> usize {
        self.samples.extend_from_slice(samples);
        self.sample_rate = sample_rate;
        frames
    }

    fn show_message(&mut self, message: &str, frames: u32) {
        tracing::info!("core message ({} frames): {}", frames, message);
        self.messages.push(message.to_string());
    }

    fn set_perf_level(&mut self, level: u32) {
        self.perf_level = Some(level);
    }
}

impl HeadlessUi {
    /// Write the recorded audio as a 16-bit stereo WAV file.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: self.sample_rate.max(1),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for &sample in &self.samples {
            writer.write_sample(sample).context("Failed to write sample")?;
        }
        writer.finalize().context("Failed to finish WAV file")?;
        Ok(())
    }
}
