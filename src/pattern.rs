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

//! The step pattern: a boolean grid indexed by bar, sound and step.

use std::fmt;

/// Default number of steps in a bar (one bar of sixteenth notes).
pub const DEFAULT_STEPS: usize = 16;

/// Errors produced when addressing the pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("bar {0} out of range (bars: {1})")]
    InvalidBar(usize, usize),

    #[error("sound {0} out of range (sounds: {1})")]
    InvalidSound(usize, usize),

    #[error("step {0} out of range (steps: {1})")]
    InvalidStep(usize, usize),

    #[error("a bar must have at least one step")]
    ZeroSteps,

    #[error("the last bar of a pattern cannot be removed")]
    LastBar,
}

/// A single bar: `sounds` rows of `steps` cells, stored row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct Bar {
    steps: usize,
    cells: Vec<bool>,
}

impl Bar {
    fn new(sounds: usize, steps: usize) -> Bar {
        Bar {
            steps,
            cells: vec![false; sounds * steps],
        }
    }

    /// Returns the number of steps in this bar.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Returns the row of steps for the given sound.
    pub fn row(&self, sound: usize) -> Option<&[bool]> {
        let start = sound.checked_mul(self.steps)?;
        self.cells.get(start..start + self.steps)
    }

    fn row_mut(&mut self, sound: usize) -> Option<&mut [bool]> {
        let start = sound.checked_mul(self.steps)?;
        self.cells.get_mut(start..start + self.steps)
    }

    /// Returns whether the cell is set. Out of range cells read as unset.
    #[inline]
    pub fn is_set(&self, sound: usize, step: usize) -> bool {
        step < self.steps && self.cells.get(sound * self.steps + step).copied().unwrap_or(false)
    }
}

/// The full pattern. The number of sounds is fixed for the lifetime of the
/// pattern while each bar carries its own step count.
#[derive(Clone, PartialEq, Eq)]
pub struct Pattern {
    sounds: usize,
    bars: Vec<Bar>,
}

impl Pattern {
    /// Creates a pattern of `bars` empty bars with `steps` steps each.
    pub fn new(bars: usize, sounds: usize, steps: usize) -> Result<Pattern, PatternError> {
        if steps == 0 {
            return Err(PatternError::ZeroSteps);
        }
        Ok(Pattern {
            sounds,
            bars: (0..bars.max(1)).map(|_| Bar::new(sounds, steps)).collect(),
        })
    }

    /// Returns the number of sounds per bar.
    pub fn sounds(&self) -> usize {
        self.sounds
    }

    /// Returns the number of bars.
    pub fn bars(&self) -> usize {
        self.bars.len()
    }

    /// Returns the bar at the given index.
    pub fn bar(&self, bar: usize) -> Option<&Bar> {
        self.bars.get(bar)
    }

    /// Returns the number of steps in the given bar, or 0 if the bar doesn't exist.
    pub fn steps_in_bar(&self, bar: usize) -> usize {
        self.bars.get(bar).map_or(0, Bar::steps)
    }

    /// Reads a cell. Used by the sequencer clock on the render path, so it never fails.
    #[inline]
    pub fn is_set(&self, bar: usize, sound: usize, step: usize) -> bool {
        self.bars
            .get(bar)
            .is_some_and(|b| sound < self.sounds && b.is_set(sound, step))
    }

    /// Reads a cell, reporting out of range coordinates.
    pub fn note(&self, bar: usize, sound: usize, step: usize) -> Result<bool, PatternError> {
        self.check(bar, sound, step)?;
        Ok(self.bars[bar].is_set(sound, step))
    }

    /// Sets a cell to the given value.
    pub fn set_note(
        &mut self,
        bar: usize,
        sound: usize,
        step: usize,
        value: bool,
    ) -> Result<(), PatternError> {
        self.check(bar, sound, step)?;
        let b = &mut self.bars[bar];
        let steps = b.steps;
        b.cells[sound * steps + step] = value;
        Ok(())
    }

    /// Flips a cell and returns its new value.
    pub fn toggle(&mut self, bar: usize, sound: usize, step: usize) -> Result<bool, PatternError> {
        let value = !self.note(bar, sound, step)?;
        self.set_note(bar, sound, step, value)?;
        Ok(value)
    }

    /// Returns a mutable view of one sound's steps in one bar.
    pub fn row_mut(&mut self, bar: usize, sound: usize) -> Result<&mut [bool], PatternError> {
        let bars = self.bars.len();
        if sound >= self.sounds {
            return Err(PatternError::InvalidSound(sound, self.sounds));
        }
        self.bars
            .get_mut(bar)
            .ok_or(PatternError::InvalidBar(bar, bars))?
            .row_mut(sound)
            .ok_or(PatternError::InvalidSound(sound, self.sounds))
    }

    /// Appends an empty bar and returns its index.
    pub fn add_bar(&mut self, steps: usize) -> Result<usize, PatternError> {
        if steps == 0 {
            return Err(PatternError::ZeroSteps);
        }
        self.bars.push(Bar::new(self.sounds, steps));
        Ok(self.bars.len() - 1)
    }

    /// Removes a bar. A pattern always keeps at least one bar.
    pub fn remove_bar(&mut self, bar: usize) -> Result<(), PatternError> {
        if bar >= self.bars.len() {
            return Err(PatternError::InvalidBar(bar, self.bars.len()));
        }
        if self.bars.len() == 1 {
            return Err(PatternError::LastBar);
        }
        self.bars.remove(bar);
        Ok(())
    }

    /// Clears every cell in a bar.
    pub fn clear_bar(&mut self, bar: usize) -> Result<(), PatternError> {
        let bars = self.bars.len();
        self.bars
            .get_mut(bar)
            .ok_or(PatternError::InvalidBar(bar, bars))?
            .cells
            .fill(false);
        Ok(())
    }

    /// Clamps a bar index into the valid range.
    pub fn clamp_bar(&self, bar: usize) -> usize {
        bar.min(self.bars.len() - 1)
    }

    fn check(&self, bar: usize, sound: usize, step: usize) -> Result<(), PatternError> {
        let b = self
            .bars
            .get(bar)
            .ok_or(PatternError::InvalidBar(bar, self.bars.len()))?;
        if sound >= self.sounds {
            return Err(PatternError::InvalidSound(sound, self.sounds));
        }
        if step >= b.steps {
            return Err(PatternError::InvalidStep(step, b.steps));
        }
        Ok(())
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, bar) in self.bars.iter().enumerate() {
            writeln!(f, "Bar {} ({} steps):", index, bar.steps)?;
            for sound in 0..self.sounds {
                write!(f, "{:>3} ", sound)?;
                for (step, cell) in bar.row(sound).unwrap_or_default().iter().enumerate() {
                    if step > 0 && step % 4 == 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", if *cell { 'x' } else { '.' })?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("bars", &self.bars.len())
            .field("sounds", &self.sounds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_twice_restores() {
        let mut pattern = Pattern::new(2, 4, DEFAULT_STEPS).unwrap();
        let before = pattern.clone();
        assert!(pattern.toggle(1, 2, 7).unwrap());
        assert!(pattern.is_set(1, 2, 7));
        assert!(!pattern.toggle(1, 2, 7).unwrap());
        assert_eq!(before, pattern);
    }

    #[test]
    fn test_out_of_range() {
        let mut pattern = Pattern::new(1, 4, 16).unwrap();
        assert_eq!(
            pattern.set_note(1, 0, 0, true),
            Err(PatternError::InvalidBar(1, 1))
        );
        assert_eq!(
            pattern.set_note(0, 4, 0, true),
            Err(PatternError::InvalidSound(4, 4))
        );
        assert_eq!(
            pattern.toggle(0, 0, 16),
            Err(PatternError::InvalidStep(16, 16))
        );
        assert!(!pattern.is_set(5, 5, 50));
        assert_eq!(Pattern::new(1, 4, 0).unwrap_err(), PatternError::ZeroSteps);
    }

    #[test]
    fn test_bars_with_different_steps() {
        let mut pattern = Pattern::new(1, 2, 16).unwrap();
        let bar = pattern.add_bar(12).unwrap();
        assert_eq!(bar, 1);
        assert_eq!(pattern.steps_in_bar(1), 12);
        pattern.set_note(1, 1, 11, true).unwrap();
        assert!(pattern.set_note(1, 1, 12, true).is_err());
        assert_eq!(pattern.bar(1).unwrap().row(1).unwrap().len(), 12);

        pattern.clear_bar(1).unwrap();
        assert!(!pattern.is_set(1, 1, 11));

        pattern.remove_bar(0).unwrap();
        assert_eq!(pattern.steps_in_bar(0), 12);
        assert_eq!(pattern.remove_bar(0), Err(PatternError::LastBar));
        assert_eq!(pattern.clamp_bar(9), 0);
    }

    #[test]
    fn test_display() {
        let mut pattern = Pattern::new(1, 1, 8).unwrap();
        pattern.set_note(0, 0, 0, true).unwrap();
        pattern.set_note(0, 0, 4, true).unwrap();
        assert_eq!(pattern.to_string(), "Bar 0 (8 steps):\n  0 x... x...\n");
    }
}
