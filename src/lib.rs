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
//! The real-time audio core of a step-sequencer drum machine.
//!
//! A [`control::Controller`] owns the pattern and settings and forwards
//! every change to an [`audio::Renderer`] over a bounded queue. The renderer
//! runs on the output device's thread and turns the pattern and tempo into
//! mixed audio, one hardware buffer at a time.

pub mod audio;
pub mod config;
pub mod control;
pub mod frontend;
pub mod pattern;
pub mod quantizer;
pub mod sample;
pub mod samples;
#[cfg(test)]
mod test;
