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
//! User-facing front ends. Every front end drives the same controller.

use std::io;

use crate::control::Controller;

pub mod text;

/// A front end that turns user input into controller operations and shows
/// the pattern and transport state.
pub trait Frontend {
    /// Prepares the front end before the first command is read.
    fn init(&mut self) -> Result<(), io::Error>;

    /// Processes user input until the user quits or input ends.
    fn run(&mut self, controller: &mut Controller) -> Result<(), io::Error>;

    /// Releases the front end.
    fn close(&mut self) -> Result<(), io::Error>;

    /// Shows a one-line message.
    fn display_message(&mut self, message: &str) -> Result<(), io::Error>;

    /// Shows the selected bar of the pattern along with the transport state.
    fn display_grid(&mut self, controller: &Controller) -> Result<(), io::Error>;
}
