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
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::audio::delay::DelaySettings;

const DEFAULT_MAX_TIME: Duration = Duration::from_secs(2);

/// A YAML representation of the delay effect configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Delay {
    /// Delay time, e.g. "250ms" (default: 250ms)
    time: Option<String>,

    /// Longest delay time the line can hold, e.g. "2s" (default: 2s)
    max_time: Option<String>,

    /// Portion of the delayed signal fed back, in [0, 1] (default: 0.3)
    feedback: Option<f32>,

    /// Level of the delayed signal in the output, in [0, 1] (default: 0.5)
    gain: Option<f32>,

    /// Whether the effect starts enabled (default: false)
    enabled: Option<bool>,
}

impl Delay {
    /// Returns the initial delay settings.
    pub fn settings(&self) -> Result<DelaySettings, ConfigError> {
        let defaults = DelaySettings::default();
        Ok(DelaySettings {
            time: match &self.time {
                Some(time) => parse_duration("delay time", time)?,
                None => defaults.time,
            },
            feedback: self.feedback.unwrap_or(defaults.feedback),
            gain: self.gain.unwrap_or(defaults.gain),
            enabled: self.enabled.unwrap_or(defaults.enabled),
        })
    }

    /// Returns the capacity of the delay line (default: 2s)
    pub fn max_time(&self) -> Result<Duration, ConfigError> {
        match &self.max_time {
            Some(max_time) => parse_duration("delay max_time", max_time),
            None => Ok(DEFAULT_MAX_TIME),
        }
    }
}

fn parse_duration(name: &str, value: &str) -> Result<Duration, ConfigError> {
    DurationString::from_string(value.to_string())
        .map(Into::into)
        .map_err(|e| ConfigError::Invalid(format!("{} {:?}: {}", name, value, e)))
}
