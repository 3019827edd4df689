// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Sample loading and caching for sound rows.
//!
//! Samples are decoded entirely into memory before the engine starts, so the
//! render path only ever reads from shared buffers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hound::WavReader;
use tracing::{debug, info};

use super::click;
use crate::sample::{Sample, SampleBank};

/// Errors raised while loading a sample from disk.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unable to read sample {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("unable to decode sample {0}: {1}")]
    Wav(PathBuf, #[source] hound::Error),

    #[error("sample {0} contains no audio")]
    EmptySample(PathBuf),

    #[error("sample {0} has an unsupported format: {1}")]
    UnsupportedFormat(PathBuf, String),
}

/// Manages loading and caching of sample data.
pub struct SampleLoader {
    /// Cache of loaded samples by file path.
    cache: HashMap<PathBuf, Arc<Sample>>,
    /// Target sample rate for transcoding (matches audio output).
    target_sample_rate: u32,
}

impl SampleLoader {
    /// Creates a new sample loader.
    pub fn new(target_sample_rate: u32) -> Self {
        Self {
            cache: HashMap::new(),
            target_sample_rate,
        }
    }

    /// Loads a WAV file into memory, converted to the target sample rate.
    /// Returns a cached version if already loaded.
    pub fn load(&mut self, path: &Path) -> Result<Arc<Sample>, LoadError> {
        if let Some(sample) = self.cache.get(path) {
            debug!(path = ?path, "Using cached sample");
            return Ok(sample.clone());
        }

        info!(path = ?path, "Loading sample into memory");
        let (samples, channel_count, source_sample_rate) = read_wav(path)?;
        if samples.is_empty() {
            return Err(LoadError::EmptySample(path.to_path_buf()));
        }

        let samples = if source_sample_rate != self.target_sample_rate {
            info!(
                source_rate = source_sample_rate,
                target_rate = self.target_sample_rate,
                "Transcoding sample"
            );
            transcode_samples(
                &samples,
                channel_count,
                source_sample_rate,
                self.target_sample_rate,
            )
        } else {
            samples
        };

        let sample = Arc::new(Sample::new(
            samples,
            channel_count,
            self.target_sample_rate,
        ));
        if sample.is_empty() {
            return Err(LoadError::EmptySample(path.to_path_buf()));
        }

        let duration =
            Duration::from_secs_f64(sample.frames() as f64 / self.target_sample_rate as f64);
        info!(
            path = ?path,
            channels = channel_count,
            sample_rate = self.target_sample_rate,
            duration_ms = duration.as_millis(),
            memory_kb = sample.memory_size() / 1024,
            "Sample loaded"
        );

        self.cache.insert(path.to_path_buf(), sample.clone());
        Ok(sample)
    }

    /// Loads a bank with one sample per file, in sound order. Without a
    /// click file the built-in click is used.
    pub fn load_bank(
        &mut self,
        sounds: usize,
        files: &[PathBuf],
        click_file: Option<&Path>,
    ) -> Result<SampleBank, LoadError> {
        let mut bank = SampleBank::new(sounds);
        for (sound, file) in files.iter().enumerate().take(sounds) {
            bank.set_sound(sound, self.load(file)?);
        }
        let click = match click_file {
            Some(file) => self.load(file)?,
            None => Arc::new(click::generate(self.target_sample_rate)),
        };
        bank.set_click(click);
        Ok(bank)
    }

    /// Returns the total memory used by cached samples.
    pub fn total_memory_usage(&self) -> usize {
        self.cache.values().map(|s| s.memory_size()).sum()
    }
}

/// Reads every sample of a WAV file as interleaved floats.
fn read_wav(path: &Path) -> Result<(Vec<f32>, u16, u32), LoadError> {
    let reader = WavReader::open(path).map_err(|e| wav_error(path, e))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(LoadError::UnsupportedFormat(
            path.to_path_buf(),
            "zero channels".into(),
        ));
    }

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|e| wav_error(path, e))?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(LoadError::UnsupportedFormat(
                    path.to_path_buf(),
                    format!("{} bit integer samples", spec.bits_per_sample),
                ));
            }
            // i64 so 32 bit samples don't overflow the shift.
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 * scale))
                .collect::<Result<Vec<f32>, _>>()
                .map_err(|e| wav_error(path, e))?
        }
    };
    Ok((samples, spec.channels, spec.sample_rate))
}

fn wav_error(path: &Path, error: hound::Error) -> LoadError {
    match error {
        hound::Error::IoError(e) => LoadError::Io(path.to_path_buf(), e),
        hound::Error::Unsupported => {
            LoadError::UnsupportedFormat(path.to_path_buf(), "unsupported WAV encoding".into())
        }
        e => LoadError::Wav(path.to_path_buf(), e),
    }
}

/// Transcodes samples from one sample rate to another using linear interpolation,
/// which is sufficient for drum hits and one-shots.
fn transcode_samples(
    samples: &[f32],
    channel_count: u16,
    source_rate: u32,
    target_rate: u32,
) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let channels = channel_count as usize;
    let source_frames = samples.len() / channels;
    let target_frames = (source_frames as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames * channels);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        for channel in 0..channels {
            let s0 = samples
                .get(source_frame * channels + channel)
                .copied()
                .unwrap_or(0.0);
            let s1 = samples
                .get((source_frame + 1) * channels + channel)
                .copied()
                .unwrap_or(s0);
            output.push(s0 + (s1 - s0) * frac);
        }
    }
    output
}

impl std::fmt::Debug for SampleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleLoader")
            .field("cached_samples", &self.cache.len())
            .field("target_sample_rate", &self.target_sample_rate)
            .field("total_memory_kb", &(self.total_memory_usage() / 1024))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::SampleProvider;
    use crate::test::{write_float_wav, write_int_wav};

    #[test]
    fn test_load_float_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kick.wav");
        write_float_wav(&path, &[0.5, -0.5, 0.25, -0.25], 2, 44100);

        let mut loader = SampleLoader::new(44100);
        let sample = loader.load(&path).unwrap();
        assert_eq!(sample.channel_count(), 2);
        assert_eq!(sample.frames(), 2);
        assert_eq!(sample.data(), &[0.5, -0.5, 0.25, -0.25]);
        assert_eq!(sample.mono_frame(0), 0.0);
    }

    #[test]
    fn test_load_int_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snare.wav");
        write_int_wav(&path, &[16384, -16384, 0, i16::MIN], 1, 44100);

        let mut loader = SampleLoader::new(44100);
        let sample = loader.load(&path).unwrap();
        assert_eq!(sample.frames(), 4);
        assert_eq!(sample.data(), &[0.5, -0.5, 0.0, -1.0]);
    }

    #[test]
    fn test_load_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hat.wav");
        write_float_wav(&path, &[0.1; 64], 1, 44100);

        let mut loader = SampleLoader::new(44100);
        let first = loader.load(&path).unwrap();
        let second = loader.load(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.total_memory_usage(), 64 * 4);
    }

    #[test]
    fn test_load_transcodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tom.wav");
        write_float_wav(&path, &[0.5; 4410], 1, 44100);

        let mut loader = SampleLoader::new(48000);
        let sample = loader.load(&path).unwrap();
        assert_eq!(sample.sample_rate(), 48000);
        assert!((4800..=4801).contains(&sample.frames()));
        assert!(sample.data()[..4800].iter().all(|v| (*v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = SampleLoader::new(44100);

        assert!(matches!(
            loader.load(&dir.path().join("missing.wav")),
            Err(LoadError::Io(..))
        ));

        let garbage = dir.path().join("garbage.wav");
        std::fs::write(&garbage, b"definitely not a wav file").unwrap();
        assert!(matches!(
            loader.load(&garbage),
            Err(LoadError::Wav(..)) | Err(LoadError::UnsupportedFormat(..))
        ));

        let empty = dir.path().join("empty.wav");
        write_float_wav(&empty, &[], 1, 44100);
        assert!(matches!(
            loader.load(&empty),
            Err(LoadError::EmptySample(_))
        ));
    }

    #[test]
    fn test_load_bank() {
        let dir = tempfile::tempdir().unwrap();
        let kick = dir.path().join("kick.wav");
        write_float_wav(&kick, &[0.5; 32], 1, 44100);

        let mut loader = SampleLoader::new(44100);
        let bank = loader.load_bank(4, &[kick.clone()], None).unwrap();
        assert_eq!(bank.sound_count(), 4);
        assert!(bank.sample(0).is_some());
        assert!(bank.sample(1).is_none());
        assert!(bank.click().is_some());

        let bank = loader.load_bank(4, &[kick.clone()], Some(&kick)).unwrap();
        assert!(Arc::ptr_eq(&bank.click().unwrap(), &bank.sample(0).unwrap()));
    }

    #[test]
    fn test_transcode_stereo() {
        let source_samples = vec![1.0f32, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let result = transcode_samples(&source_samples, 2, 44100, 48000);
        assert_eq!(result.len() % 2, 0);
        assert!(result.len() >= 8);
        assert!((result[0] - 1.0).abs() < 0.1);
        assert!((result[1] + 1.0).abs() < 0.1);
    }
}
