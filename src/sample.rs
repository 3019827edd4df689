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

//! Immutable sample buffers and the provider interface that hands them to the core.

use std::sync::Arc;

/// A fixed-length, interleaved, multi-channel float buffer.
///
/// Samples are never mutated after creation and are shared between every
/// mixer channel that plays them, so triggering a sound only clones an `Arc`.
#[derive(Debug, PartialEq)]
pub struct Sample {
    /// Interleaved sample data.
    data: Box<[f32]>,
    /// Number of channels in the sample.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl Sample {
    /// Creates a new sample from interleaved data. Any trailing partial frame is dropped.
    pub fn new(mut data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Sample {
        let channel_count = channel_count.max(1);
        let frames = data.len() / channel_count as usize;
        data.truncate(frames * channel_count as usize);
        Sample {
            data: data.into_boxed_slice(),
            channel_count,
            sample_rate,
        }
    }

    /// Creates a new mono sample.
    pub fn mono(data: Vec<f32>, sample_rate: u32) -> Sample {
        Sample::new(data, 1, sample_rate)
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the length of the sample in frames.
    pub fn frames(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    /// Returns true if the sample has no frames.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the interleaved sample data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the frame at the given index downmixed to mono, or 0.0 past the end.
    #[inline]
    pub fn mono_frame(&self, frame: usize) -> f32 {
        let channels = self.channel_count as usize;
        let start = frame * channels;
        match self.data.get(start..start + channels) {
            Some([single]) => *single,
            Some(values) => values.iter().sum::<f32>() / channels as f32,
            None => 0.0,
        }
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

/// Supplies samples to the core by logical sound index.
///
/// Loading and synthesis happen entirely on the provider's side; the core
/// only ever receives fully formed, immutable buffers.
pub trait SampleProvider {
    /// Returns the sample for the given sound row.
    fn sample(&self, sound: usize) -> Option<Arc<Sample>>;

    /// Returns the metronome click sample.
    fn click(&self) -> Option<Arc<Sample>>;

    /// Returns the number of sound rows this provider knows about.
    fn sound_count(&self) -> usize;
}

/// An in-memory sample provider.
#[derive(Default)]
pub struct SampleBank {
    sounds: Vec<Option<Arc<Sample>>>,
    click: Option<Arc<Sample>>,
}

impl SampleBank {
    /// Creates an empty bank with the given number of sound rows.
    pub fn new(sound_count: usize) -> SampleBank {
        SampleBank {
            sounds: vec![None; sound_count],
            click: None,
        }
    }

    /// Sets the sample for a sound row, growing the bank if needed.
    pub fn set_sound(&mut self, sound: usize, sample: Arc<Sample>) {
        if sound >= self.sounds.len() {
            self.sounds.resize(sound + 1, None);
        }
        self.sounds[sound] = Some(sample);
    }

    /// Sets the click sample.
    pub fn set_click(&mut self, sample: Arc<Sample>) {
        self.click = Some(sample);
    }
}

impl SampleProvider for SampleBank {
    fn sample(&self, sound: usize) -> Option<Arc<Sample>> {
        self.sounds.get(sound).cloned().flatten()
    }

    fn click(&self) -> Option<Arc<Sample>> {
        self.click.clone()
    }

    fn sound_count(&self) -> usize {
        self.sounds.len()
    }
}

impl std::fmt::Debug for SampleBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleBank")
            .field("sounds", &self.sounds.iter().filter(|s| s.is_some()).count())
            .field("click", &self.click.is_some())
            .finish()
    }
}
