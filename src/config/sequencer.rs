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
use serde::Deserialize;

const DEFAULT_BPM: f64 = 120.0;
const DEFAULT_BARS: usize = 1;
const DEFAULT_SOUNDS: usize = 8;
const DEFAULT_VOICES: usize = 16;
const DEFAULT_RESOLUTION: u32 = 16;
const DEFAULT_FADE_FRAMES: usize = 32;

/// A YAML representation of the sequencer configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Sequencer {
    /// Initial tempo in beats per minute (default: 120)
    bpm: Option<f64>,

    /// Number of bars in the initial pattern (default: 1)
    bars: Option<usize>,

    /// Steps per bar (default: 16)
    steps: Option<usize>,

    /// Number of sound rows (default: 8)
    sounds: Option<usize>,

    /// Size of the mixer's channel pool, including the metronome (default: 16)
    voices: Option<usize>,

    /// Grid used to place recorded hits (default: 16)
    record_resolution: Option<u32>,

    /// Grid used to generate and quantize steps (default: 16)
    play_resolution: Option<u32>,

    /// Length of the fades applied when voices start and stop (default: 32)
    fade_frames: Option<usize>,

    /// Master output volume (default: 1.0)
    master_volume: Option<f32>,
}

impl Sequencer {
    pub fn bpm(&self) -> f64 {
        self.bpm.unwrap_or(DEFAULT_BPM)
    }

    pub fn bars(&self) -> usize {
        self.bars.unwrap_or(DEFAULT_BARS)
    }

    pub fn steps(&self) -> usize {
        self.steps.unwrap_or(crate::pattern::DEFAULT_STEPS)
    }

    pub fn sounds(&self) -> usize {
        self.sounds.unwrap_or(DEFAULT_SOUNDS)
    }

    pub fn voices(&self) -> usize {
        self.voices.unwrap_or(DEFAULT_VOICES)
    }

    pub fn record_resolution(&self) -> u32 {
        self.record_resolution.unwrap_or(DEFAULT_RESOLUTION)
    }

    pub fn play_resolution(&self) -> u32 {
        self.play_resolution.unwrap_or(DEFAULT_RESOLUTION)
    }

    pub fn fade_frames(&self) -> usize {
        self.fade_frames.unwrap_or(DEFAULT_FADE_FRAMES)
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume.unwrap_or(1.0)
    }
}
