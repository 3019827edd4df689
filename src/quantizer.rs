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

//! Grid quantization of step timing.
//!
//! A measure is always four beats long and a bar of the pattern always spans
//! exactly one measure, whatever its step count. Triplet resolutions (3, 6,
//! 12, 24, 48) use plain grid rounding against the bar's steps rather than a
//! true ternary subdivision, so a triplet grid on a 16 step bar lands on the
//! nearest sixteenth.

use std::fmt;

use tracing::{debug, error, warn};

use crate::pattern::{Pattern, PatternError};

/// Beats per measure assumed by every measure calculation.
pub const BEATS_PER_MEASURE: f64 = 4.0;

/// The default record and play resolution (sixteenth notes).
pub const DEFAULT_RESOLUTION: Resolution = Resolution::Sixteenth;

/// Errors produced by quantization.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QuantizeError {
    #[error("unsupported quantization resolution {0}")]
    UnsupportedResolution(u32),

    #[error("cannot quantize: {0}")]
    Degenerate(&'static str),

    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// A grid denomination, expressed as the number of grid points per measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Whole,
    Half,
    HalfTriplet,
    Quarter,
    QuarterTriplet,
    Eighth,
    EighthTriplet,
    Sixteenth,
    SixteenthTriplet,
    ThirtySecond,
    ThirtySecondTriplet,
    SixtyFourth,
}

impl Resolution {
    /// Every supported resolution, coarsest first.
    pub const ALL: [Resolution; 12] = [
        Resolution::Whole,
        Resolution::Half,
        Resolution::HalfTriplet,
        Resolution::Quarter,
        Resolution::QuarterTriplet,
        Resolution::Eighth,
        Resolution::EighthTriplet,
        Resolution::Sixteenth,
        Resolution::SixteenthTriplet,
        Resolution::ThirtySecond,
        Resolution::ThirtySecondTriplet,
        Resolution::SixtyFourth,
    ];

    /// The denominator this resolution is known by.
    pub fn denominator(self) -> u32 {
        match self {
            Resolution::Whole => 1,
            Resolution::Half => 2,
            Resolution::HalfTriplet => 3,
            Resolution::Quarter => 4,
            Resolution::QuarterTriplet => 6,
            Resolution::Eighth => 8,
            Resolution::EighthTriplet => 12,
            Resolution::Sixteenth => 16,
            Resolution::SixteenthTriplet => 24,
            Resolution::ThirtySecond => 32,
            Resolution::ThirtySecondTriplet => 48,
            Resolution::SixtyFourth => 64,
        }
    }

    /// The proportion of a measure covered by one grid interval.
    pub fn proportion(self) -> f64 {
        match self {
            Resolution::Whole => 1.0,
            Resolution::Half => 0.5,
            Resolution::HalfTriplet => 1.0 / 3.0,
            Resolution::Quarter => 0.25,
            Resolution::QuarterTriplet => 1.0 / 6.0,
            Resolution::Eighth => 0.125,
            Resolution::EighthTriplet => 1.0 / 12.0,
            Resolution::Sixteenth => 0.0625,
            Resolution::SixteenthTriplet => 1.0 / 24.0,
            Resolution::ThirtySecond => 0.03125,
            Resolution::ThirtySecondTriplet => 1.0 / 48.0,
            Resolution::SixtyFourth => 0.015625,
        }
    }

    /// Returns true for the triplet denominations.
    pub fn is_triplet(self) -> bool {
        self.denominator() % 3 == 0
    }
}

impl TryFrom<u32> for Resolution {
    type Error = QuantizeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.denominator() == value)
            .ok_or(QuantizeError::UnsupportedResolution(value))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "1/{}", self.denominator())
    }
}

/// Maps event times and existing steps onto the musical grid.
#[derive(Debug, Clone)]
pub struct Quantizer {
    bpm: f64,
    record_resolution: Resolution,
    play_resolution: Resolution,
}

impl Quantizer {
    /// Creates a quantizer for the given tempo with sixteenth note resolutions.
    pub fn new(bpm: f64) -> Quantizer {
        Quantizer {
            bpm,
            record_resolution: DEFAULT_RESOLUTION,
            play_resolution: DEFAULT_RESOLUTION,
        }
    }

    /// Returns the tempo used for time calculations.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Updates the tempo used for time calculations.
    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm;
    }

    pub fn record_resolution(&self) -> Resolution {
        self.record_resolution
    }

    pub fn play_resolution(&self) -> Resolution {
        self.play_resolution
    }

    /// Sets the resolution used to place recorded hits. Unsupported values
    /// keep the previous resolution.
    pub fn set_record_resolution(&mut self, resolution: u32) -> Result<(), QuantizeError> {
        self.record_resolution = Self::parse_resolution(resolution, self.record_resolution)?;
        Ok(())
    }

    /// Sets the resolution used to generate and quantize pattern steps.
    /// Unsupported values keep the previous resolution.
    pub fn set_play_resolution(&mut self, resolution: u32) -> Result<(), QuantizeError> {
        self.play_resolution = Self::parse_resolution(resolution, self.play_resolution)?;
        Ok(())
    }

    fn parse_resolution(resolution: u32, previous: Resolution) -> Result<Resolution, QuantizeError> {
        Resolution::try_from(resolution).inspect_err(|_| {
            error!(
                resolution,
                keeping = previous.denominator(),
                "Unsupported quantization resolution"
            )
        })
    }

    /// The duration of one four beat measure in milliseconds, or 0 when the tempo is invalid.
    pub fn measure_duration_ms(&self) -> f64 {
        if !(self.bpm > 0.0) {
            warn!(bpm = self.bpm, "Tempo must be positive to compute a measure duration");
            return 0.0;
        }
        (60.0 / self.bpm) * 1000.0 * BEATS_PER_MEASURE
    }

    /// The grid interval for a raw resolution denominator in milliseconds.
    /// Returns 0 for unsupported resolutions, which callers treat as "cannot quantize".
    pub fn quantization_interval_ms(&self, resolution: u32) -> f64 {
        match Resolution::try_from(resolution) {
            Ok(resolution) => self.interval_ms(resolution),
            Err(_) => {
                error!(resolution, "Unsupported quantization resolution");
                0.0
            }
        }
    }

    /// The grid interval for a resolution in milliseconds.
    pub fn interval_ms(&self, resolution: Resolution) -> f64 {
        self.measure_duration_ms() * resolution.proportion()
    }

    /// The step of a `num_steps` grid closest to the given time within the measure.
    pub fn closest_grid_step(&self, time_ms: f64, num_steps: usize) -> usize {
        if num_steps == 0 {
            warn!("Cannot find a grid step in a bar without steps");
            return 0;
        }
        let measure = self.measure_duration_ms();
        if measure <= 0.0 {
            return 0;
        }
        let step_duration = measure / num_steps as f64;
        let step = (time_ms / step_duration).round();
        if step <= 0.0 {
            0
        } else {
            (step as usize).min(num_steps - 1)
        }
    }

    /// Corrects the timing of a key press against the record grid.
    ///
    /// `current_step` is the step that sounded at the last boundary,
    /// `last_update_ms` is when that boundary happened and `press_ms` is when
    /// the key was pressed, all on the same clock. Returns the step on the
    /// record grid closest to the press, or `current_step` when the grid is
    /// degenerate.
    pub fn quantize_recorded_step(
        &self,
        current_step: usize,
        press_ms: f64,
        last_update_ms: f64,
        num_steps: usize,
    ) -> usize {
        let measure = self.measure_duration_ms();
        let interval = self.interval_ms(self.record_resolution);
        if num_steps == 0 || measure <= 0.0 || interval <= 0.0 {
            warn!(current_step, "Cannot quantize recorded step, keeping it as is");
            return current_step;
        }

        let step_duration = measure / num_steps as f64;
        let elapsed = (press_ms - last_update_ms).max(0.0);
        let time = (current_step as f64 * step_duration + elapsed).rem_euclid(measure);
        snap_to_step(time, measure, interval, num_steps)
    }

    /// Replaces a sound's steps in a bar with one hit every play resolution interval.
    pub fn gen_steps_from_sound(
        &self,
        pattern: &mut Pattern,
        bar: usize,
        sound: usize,
    ) -> Result<(), QuantizeError> {
        let row = pattern.row_mut(bar, sound)?;
        let num_steps = row.len();
        let interval = ((num_steps as f64 * self.play_resolution.proportion()).round() as usize).max(1);

        row.fill(false);
        row.iter_mut().step_by(interval).for_each(|cell| *cell = true);

        debug!(bar, sound, interval, resolution = %self.play_resolution, "Generated steps");
        Ok(())
    }

    /// Moves every active step of a sound, across all bars, onto the play resolution grid.
    ///
    /// Steps that land on the same target collapse into one.
    pub fn quantize_steps_from_sound(
        &self,
        pattern: &mut Pattern,
        sound: usize,
    ) -> Result<(), QuantizeError> {
        if sound >= pattern.sounds() {
            return Err(PatternError::InvalidSound(sound, pattern.sounds()).into());
        }
        let measure = self.measure_duration_ms();
        let interval = self.interval_ms(self.play_resolution);
        if measure <= 0.0 || interval <= 0.0 {
            return Err(QuantizeError::Degenerate("zero measure or grid interval"));
        }

        for bar in 0..pattern.bars() {
            let row = pattern.row_mut(bar, sound)?;
            let num_steps = row.len();
            let step_duration = measure / num_steps as f64;

            let mut quantized = vec![false; num_steps];
            for step in row.iter().enumerate().filter(|(_, on)| **on).map(|(step, _)| step) {
                let time = step as f64 * step_duration;
                quantized[snap_to_step(time, measure, interval, num_steps)] = true;
            }
            row.copy_from_slice(&quantized);
        }

        debug!(sound, resolution = %self.play_resolution, "Quantized steps");
        Ok(())
    }

    /// Quantizes every sound in the pattern. A failure on one sound is logged
    /// and the remaining sounds are still processed.
    pub fn quantize_played_steps(&self, pattern: &mut Pattern) {
        for sound in 0..pattern.sounds() {
            if let Err(e) = self.quantize_steps_from_sound(pattern, sound) {
                error!(sound, err = %e, "Failed to quantize sound");
            }
        }
    }
}

/// Snaps a time within the measure to the nearest grid point and returns the
/// bar step closest to it. The wrap is done on whole grid slots, so a time
/// past the last slot lands on the downbeat.
fn snap_to_step(time_ms: f64, measure_ms: f64, interval_ms: f64, num_steps: usize) -> usize {
    let slots = (measure_ms / interval_ms).round().max(1.0);
    let slot = (time_ms / interval_ms).round().rem_euclid(slots);
    let step_duration = measure_ms / num_steps as f64;
    ((slot * interval_ms / step_duration).round() as usize) % num_steps
}
