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

//! The step clock: turns rendered frames into step boundaries and triggers.

use tracing::error;

use crate::pattern::Pattern;

/// Steps per beat. Each step is a sixteenth note.
pub const STEPS_PER_BEAT: f64 = 4.0;

/// The metronome clicks once every this many steps (on the beat).
pub const CLICK_INTERVAL: usize = 4;

/// Errors produced by the step clock.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClockError {
    #[error("tempo must be positive, got {0}")]
    InvalidTempo(f64),
}

/// A voice the clock wants started at a step boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The metronome click.
    Click,
    /// A pattern sound row.
    Sound(usize),
}

/// Returns the duration of one step in seconds for a valid tempo.
pub fn seconds_per_step(bpm: f64) -> f64 {
    (60.0 / bpm) / STEPS_PER_BEAT
}

/// Returns true if the tempo can drive the clock.
pub fn is_valid_bpm(bpm: f64) -> bool {
    bpm.is_finite() && bpm > 0.0
}

/// Decides, from the number of frames rendered, when a step boundary has been
/// crossed and what fires on it.
///
/// Step lengths are whole frames. The fractional part of the exact step
/// length is carried from step to step so the average tempo stays exact.
#[derive(Debug, Clone)]
pub struct SequencerClock {
    sample_rate: u32,
    bpm: f64,
    seconds_per_step: f64,
    running: bool,
    clicking: bool,
    /// The next step to play in the current bar.
    current_step: usize,
    current_bar: usize,
    /// The step that sounded at the last boundary.
    last_step: usize,
    click_step: usize,
    frames_since_step: usize,
    /// Length of the step in progress, in frames.
    step_length: usize,
    carry: f64,
}

impl SequencerClock {
    /// Creates a stopped clock.
    pub fn new(sample_rate: u32, bpm: f64) -> Result<SequencerClock, ClockError> {
        if !is_valid_bpm(bpm) {
            return Err(ClockError::InvalidTempo(bpm));
        }
        let mut clock = SequencerClock {
            sample_rate,
            bpm,
            seconds_per_step: seconds_per_step(bpm),
            running: false,
            clicking: false,
            current_step: 0,
            current_bar: 0,
            last_step: 0,
            click_step: 0,
            frames_since_step: 0,
            step_length: 1,
            carry: 0.0,
        };
        clock.reset_step_length();
        Ok(clock)
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn seconds_per_step(&self) -> f64 {
        self.seconds_per_step
    }

    /// The exact (fractional) number of frames in a step.
    pub fn samples_per_step(&self) -> f64 {
        self.sample_rate as f64 * self.seconds_per_step
    }

    /// The whole number of frames in the step currently in progress.
    pub fn step_length(&self) -> usize {
        self.step_length
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_clicking(&self) -> bool {
        self.clicking
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn current_bar(&self) -> usize {
        self.current_bar
    }

    /// The step that was triggered at the most recent boundary.
    pub fn last_step(&self) -> usize {
        self.last_step
    }

    /// Changes the tempo. Invalid tempos are rejected and the previous one kept.
    /// The new step length applies from the next boundary check.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), ClockError> {
        if !is_valid_bpm(bpm) {
            error!(bpm, previous = self.bpm, "Rejecting invalid tempo");
            return Err(ClockError::InvalidTempo(bpm));
        }
        self.bpm = bpm;
        self.seconds_per_step = seconds_per_step(bpm);
        self.reset_step_length();
        Ok(())
    }

    fn reset_step_length(&mut self) {
        let exact = self.samples_per_step();
        self.step_length = (exact.floor() as usize).max(1);
        self.carry = (exact - self.step_length as f64).max(0.0);
    }

    fn next_step_length(&mut self) {
        let exact = self.samples_per_step() + self.carry;
        self.step_length = (exact.floor() as usize).max(1);
        self.carry = (exact - self.step_length as f64).max(0.0);
    }

    /// Starts playback from the first step of the current bar.
    pub fn start(&mut self) {
        self.running = true;
        self.current_step = 0;
        self.last_step = 0;
        self.frames_since_step = 0;
        self.reset_step_length();
    }

    /// Stops playback. Stopping a stopped clock is a no-op.
    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.click_step = self.current_step % CLICK_INTERVAL;
        }
    }

    /// Turns the metronome on or off. When playback is stopped the metronome
    /// keeps its own time, starting from a fresh beat.
    pub fn set_clicking(&mut self, clicking: bool) {
        if clicking && !self.clicking && !self.running {
            self.click_step = 0;
            self.frames_since_step = 0;
            self.reset_step_length();
        }
        self.clicking = clicking;
    }

    /// Selects the bar to play, clamped to the pattern.
    pub fn select_bar(&mut self, bar: usize, pattern: &Pattern) {
        self.current_bar = bar;
        self.clamp_to(pattern);
    }

    /// Clamps the bar and step positions into the pattern's ranges.
    pub fn clamp_to(&mut self, pattern: &Pattern) {
        self.current_bar = pattern.clamp_bar(self.current_bar);
        let steps = pattern.steps_in_bar(self.current_bar).max(1);
        self.current_step = self.current_step.min(steps - 1);
        self.last_step = self.last_step.min(steps - 1);
    }

    /// Returns the number of frames until the next boundary, or `usize::MAX`
    /// if neither playback nor the metronome is running.
    pub fn frames_until_boundary(&self) -> usize {
        if !self.running && !self.clicking {
            return usize::MAX;
        }
        self.step_length.saturating_sub(self.frames_since_step)
    }

    /// Accounts for `frames` rendered frames. When a step boundary is reached
    /// the accumulator resets, the step advances, and each voice that should
    /// start is handed to `on_trigger`. Returns true if a boundary was crossed.
    pub fn tick<F>(&mut self, frames: usize, pattern: &Pattern, on_trigger: F) -> bool
    where
        F: FnMut(Trigger),
    {
        if !self.running && !self.clicking {
            return false;
        }
        self.frames_since_step = self.frames_since_step.saturating_add(frames);
        if self.frames_since_step < self.step_length {
            return false;
        }
        self.frames_since_step = 0;
        self.next_step_length();
        self.advance(pattern, on_trigger);
        true
    }

    fn advance<F>(&mut self, pattern: &Pattern, mut on_trigger: F)
    where
        F: FnMut(Trigger),
    {
        if self.running {
            let steps = pattern.steps_in_bar(self.current_bar);
            if steps == 0 {
                self.clamp_to(pattern);
                return;
            }
            let step = self.current_step.min(steps - 1);
            if self.clicking && step % CLICK_INTERVAL == 0 {
                on_trigger(Trigger::Click);
            }
            for sound in 0..pattern.sounds() {
                if pattern.is_set(self.current_bar, sound, step) {
                    on_trigger(Trigger::Sound(sound));
                }
            }
            self.last_step = step;
            self.current_step = (step + 1) % steps;
        } else if self.clicking {
            if self.click_step % CLICK_INTERVAL == 0 {
                on_trigger(Trigger::Click);
            }
            self.click_step = (self.click_step + 1) % CLICK_INTERVAL;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(clock: &mut SequencerClock, frames: usize, pattern: &Pattern) -> Vec<Trigger> {
        let mut triggers = Vec::new();
        clock.tick(frames, pattern, |t| triggers.push(t));
        triggers
    }

    #[test]
    fn test_seconds_per_step() {
        for bpm in 1..=300 {
            let clock = SequencerClock::new(44100, bpm as f64).unwrap();
            assert!((clock.seconds_per_step() - 15.0 / bpm as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invalid_tempo() {
        assert!(SequencerClock::new(44100, 0.0).is_err());
        let mut clock = SequencerClock::new(44100, 120.0).unwrap();
        assert_eq!(clock.set_bpm(0.0), Err(ClockError::InvalidTempo(0.0)));
        assert!(clock.set_bpm(-5.0).is_err());
        assert!(clock.set_bpm(f64::NAN).is_err());
        assert_eq!(clock.bpm(), 120.0);
        assert_eq!(clock.seconds_per_step(), 0.125);

        clock.set_bpm(60.0).unwrap();
        assert_eq!(clock.seconds_per_step(), 0.25);
        assert_eq!(clock.step_length(), 11025);
    }

    #[test]
    fn test_one_step_after_samples_per_step() {
        let mut pattern = Pattern::new(1, 3, 16).unwrap();
        pattern.set_note(0, 0, 0, true).unwrap();
        pattern.set_note(0, 2, 0, true).unwrap();
        pattern.set_note(0, 1, 1, true).unwrap();

        let mut clock = SequencerClock::new(44100, 120.0).unwrap();
        assert_eq!(clock.step_length(), 5512);
        clock.start();

        assert!(collect(&mut clock, 5511, &pattern).is_empty());
        assert_eq!(clock.current_step(), 0);

        let triggers = collect(&mut clock, 1, &pattern);
        assert_eq!(triggers, vec![Trigger::Sound(0), Trigger::Sound(2)]);
        assert_eq!(clock.current_step(), 1);
        assert_eq!(clock.last_step(), 0);
    }

    #[test]
    fn test_fractional_step_lengths_stay_in_phase() {
        let pattern = Pattern::new(1, 1, 16).unwrap();
        let mut clock = SequencerClock::new(44100, 120.0).unwrap();
        clock.start();

        let mut total = 0;
        for _ in 0..100 {
            let length = clock.frames_until_boundary();
            total += length;
            assert!(clock.tick(length, &pattern, |_| {}));
        }
        // 100 steps of 5512.5 frames.
        assert_eq!(total, 551250);
    }

    #[test]
    fn test_step_wraps_modulo_steps() {
        let pattern = Pattern::new(1, 1, 12).unwrap();
        let mut clock = SequencerClock::new(48000, 140.0).unwrap();
        clock.start();
        for n in 1..=40 {
            let length = clock.frames_until_boundary();
            clock.tick(length, &pattern, |_| {});
            assert_eq!(clock.current_step(), n % 12);
        }
    }

    #[test]
    fn test_click_while_running() {
        let pattern = Pattern::new(1, 1, 16).unwrap();
        let mut clock = SequencerClock::new(44100, 120.0).unwrap();
        clock.set_clicking(true);
        clock.start();

        let mut clicks = Vec::new();
        for step in 0..16 {
            let length = clock.frames_until_boundary();
            clock.tick(length, &pattern, |t| {
                if t == Trigger::Click {
                    clicks.push(step)
                }
            });
        }
        assert_eq!(clicks, vec![0, 4, 8, 12]);
    }

    #[test]
    fn test_click_keeps_time_when_stopped() {
        let mut pattern = Pattern::new(1, 1, 16).unwrap();
        pattern.set_note(0, 0, 0, true).unwrap();
        let mut clock = SequencerClock::new(44100, 120.0).unwrap();
        clock.set_clicking(true);

        let mut triggers = Vec::new();
        for _ in 0..8 {
            let length = clock.frames_until_boundary();
            clock.tick(length, &pattern, |t| triggers.push(t));
        }
        // Only clicks, on the beat, and the pattern position never moves.
        assert_eq!(triggers, vec![Trigger::Click, Trigger::Click]);
        assert_eq!(clock.current_step(), 0);
    }

    #[test]
    fn test_idle_clock_never_ticks() {
        let pattern = Pattern::new(1, 1, 16).unwrap();
        let mut clock = SequencerClock::new(44100, 120.0).unwrap();
        assert_eq!(clock.frames_until_boundary(), usize::MAX);
        assert!(!clock.tick(1_000_000, &pattern, |_| {}));

        clock.start();
        clock.stop();
        clock.stop();
        assert!(!clock.is_running());
        assert!(!clock.tick(1_000_000, &pattern, |_| {}));
    }

    #[test]
    fn test_tempo_change_applies_at_next_check() {
        let pattern = Pattern::new(1, 1, 16).unwrap();
        let mut clock = SequencerClock::new(44100, 60.0).unwrap();
        clock.start();
        assert!(!clock.tick(6000, &pattern, |_| {}));

        // The shorter step is already exceeded, so the next check crosses it.
        clock.set_bpm(120.0).unwrap();
        assert_eq!(clock.frames_until_boundary(), 0);
        assert!(clock.tick(0, &pattern, |_| {}));
        assert_eq!(clock.current_step(), 1);
    }

    #[test]
    fn test_clamps_to_smaller_pattern() {
        let big = Pattern::new(2, 1, 16).unwrap();
        let small = Pattern::new(1, 1, 8).unwrap();
        let mut clock = SequencerClock::new(44100, 120.0).unwrap();
        clock.select_bar(1, &big);
        assert_eq!(clock.current_bar(), 1);
        clock.start();
        for _ in 0..12 {
            let length = clock.frames_until_boundary();
            clock.tick(length, &big, |_| {});
        }
        assert_eq!(clock.current_step(), 12);

        clock.clamp_to(&small);
        assert_eq!(clock.current_bar(), 0);
        assert_eq!(clock.current_step(), 7);
        let length = clock.frames_until_boundary();
        clock.tick(length, &small, |_| {});
        assert_eq!(clock.current_step(), 0);
    }
}
