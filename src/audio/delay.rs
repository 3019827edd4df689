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

//! A single feedback delay line applied to the mixed output.

use std::time::Duration;

/// Settings for the delay effect, as carried by control commands and configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelaySettings {
    /// Delay time.
    pub time: Duration,
    /// Portion of the delayed signal fed back into the line, in [0, 1].
    pub feedback: f32,
    /// Level of the delayed signal added to the output, in [0, 1].
    pub gain: f32,
    /// Whether the effect is applied at all.
    pub enabled: bool,
}

impl Default for DelaySettings {
    fn default() -> Self {
        DelaySettings {
            time: Duration::from_millis(250),
            feedback: 0.3,
            gain: 0.5,
            enabled: false,
        }
    }
}

/// A circular feedback delay line over interleaved samples.
///
/// The ring buffer is allocated once at construction and the delay time is
/// always kept within its capacity.
pub struct DelayEffect {
    buffer: Vec<f32>,
    write_index: usize,
    /// Delay in interleaved samples (frames times channels).
    delay_in_samples: usize,
    sample_rate: u32,
    channels: usize,
    feedback: f32,
    gain: f32,
    active: bool,
}

impl DelayEffect {
    /// Creates a delay line able to hold `max_time` of audio at the given format.
    pub fn new(max_time: Duration, sample_rate: u32, channels: usize) -> DelayEffect {
        let channels = channels.max(1);
        let capacity_frames = ((max_time.as_secs_f64() * sample_rate as f64).ceil() as usize).max(1);
        let mut delay = DelayEffect {
            buffer: vec![0.0; capacity_frames * channels],
            write_index: 0,
            delay_in_samples: channels,
            sample_rate,
            channels,
            feedback: 0.0,
            gain: 0.0,
            active: false,
        };
        let defaults = DelaySettings::default();
        delay.set_delay_time(defaults.time);
        delay.set_feedback(defaults.feedback);
        delay.set_gain(defaults.gain);
        delay
    }

    /// Applies all settings at once.
    pub fn apply(&mut self, settings: DelaySettings) {
        self.set_delay_time(settings.time);
        self.set_feedback(settings.feedback);
        self.set_gain(settings.gain);
        self.set_active(settings.enabled);
    }

    /// Sets the delay time. Times beyond the line's capacity are clamped to it
    /// and times below one frame are raised to one frame.
    ///
    /// This runs on the audio thread and never logs. Callers report clamping.
    pub fn set_delay_time(&mut self, time: Duration) {
        let frames = (time.as_secs_f64() * self.sample_rate as f64).round() as usize;
        let capacity_frames = self.buffer.len() / self.channels;
        self.delay_in_samples = frames.clamp(1, capacity_frames) * self.channels;
    }

    /// Sets the feedback amount, clamped to [0, 1].
    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = clamp_unit(feedback, self.feedback);
    }

    /// Sets the wet gain, clamped to [0, 1].
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = clamp_unit(gain, self.gain);
    }

    /// Enables or disables the effect. A disabled delay leaves the buffer untouched.
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns the current delay in interleaved samples.
    pub fn delay_in_samples(&self) -> usize {
        self.delay_in_samples
    }

    /// Returns the delay line capacity in interleaved samples.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the delay line.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_index = 0;
    }

    /// Processes `frames` interleaved frames of `channels` channels in place.
    ///
    /// Every sample reads the line `delay_in_samples` behind the write
    /// position, stores the dry input plus feedback, and adds the delayed
    /// value scaled by the gain to the output.
    pub fn process(&mut self, buffer: &mut [f32], frames: usize, channels: usize) {
        if !self.active || channels != self.channels {
            return;
        }
        let size = self.buffer.len();
        let samples = (frames * channels).min(buffer.len());
        for value in buffer[..samples].iter_mut() {
            let read_index = (self.write_index + size - self.delay_in_samples) % size;
            let delayed = self.buffer[read_index];
            self.buffer[self.write_index] = *value + delayed * self.feedback;
            *value += delayed * self.gain;
            self.write_index = (self.write_index + 1) % size;
        }
    }
}

fn clamp_unit(value: f32, previous: f32) -> f32 {
    if value.is_nan() {
        return previous;
    }
    value.clamp(0.0, 1.0)
}

impl std::fmt::Debug for DelayEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayEffect")
            .field("capacity", &self.buffer.len())
            .field("delay_in_samples", &self.delay_in_samples)
            .field("feedback", &self.feedback)
            .field("gain", &self.gain)
            .field("active", &self.active)
            .finish()
    }
}
