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
//! The built-in metronome click.

use std::f32::consts::PI;

use crate::sample::Sample;

const FREQUENCY: f32 = 1760.0;
const LENGTH_MS: usize = 30;
const DECAY: f32 = 200.0;
const AMPLITUDE: f32 = 0.8;

/// Generates a short exponentially decaying sine burst.
pub fn generate(sample_rate: u32) -> Sample {
    let rate = sample_rate.max(1) as f32;
    let frames = (sample_rate as usize * LENGTH_MS / 1000).max(1);
    let data = (0..frames)
        .map(|i| {
            let t = i as f32 / rate;
            AMPLITUDE * (-DECAY * t).exp() * (2.0 * PI * FREQUENCY * t).sin()
        })
        .collect();
    Sample::mono(data, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_decays() {
        let click = generate(44100);
        assert_eq!(click.frames(), 1323);
        assert_eq!(click.sample_rate(), 44100);

        let peak = |range: std::ops::Range<usize>| {
            range
                .map(|i| click.mono_frame(i).abs())
                .fold(0.0f32, f32::max)
        };
        assert!(peak(0..100) > 0.5);
        assert!(peak(0..100) <= AMPLITUDE);
        assert!(peak(1200..1323) < 0.05);
    }
}
