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
use std::path::{Path, PathBuf};

use config::{Config, File};
use serde::Deserialize;
use tracing::debug;

use super::audio::Audio;
use super::delay::Delay;
use super::error::ConfigError;
use super::sequencer::Sequencer;
use crate::audio::clock::is_valid_bpm;
use crate::control::EngineSettings;
use crate::quantizer::Resolution;

/// A sound row's sample.
#[derive(Deserialize, Clone, Debug)]
pub struct Sound {
    /// The WAV file for this sound, relative to the session file.
    file: String,
}

impl Sound {
    pub fn new(file: &str) -> Sound {
        Sound {
            file: file.to_string(),
        }
    }

    pub fn file(&self) -> &str {
        &self.file
    }
}

/// A YAML representation of a drum machine session.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Session {
    #[serde(default)]
    audio: Audio,

    #[serde(default)]
    sequencer: Sequencer,

    #[serde(default)]
    delay: Delay,

    /// One entry per sound row, in row order.
    #[serde(default)]
    sounds: Vec<Sound>,

    /// The metronome click. The built-in click is used when unset.
    click: Option<String>,

    /// Directory relative sample paths are resolved against.
    #[serde(skip)]
    base_path: PathBuf,
}

impl Session {
    /// Parses and validates a session from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Session, ConfigError> {
        let mut session = Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Session>()?;
        session.base_path = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        session.validate()?;
        debug!(path = %path.display(), sounds = session.sounds.len(), "Loaded session");
        Ok(session)
    }

    /// Checks every value the engine can't recover from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sequencer = &self.sequencer;
        if !is_valid_bpm(sequencer.bpm()) {
            return Err(invalid(format!("bpm must be positive, got {}", sequencer.bpm())));
        }
        if sequencer.bars() == 0 {
            return Err(invalid("a session needs at least one bar".into()));
        }
        if sequencer.steps() == 0 {
            return Err(invalid("steps must be positive".into()));
        }
        if sequencer.sounds() == 0 {
            return Err(invalid("a session needs at least one sound".into()));
        }
        if sequencer.voices() <= sequencer.sounds() {
            return Err(invalid(format!(
                "{} voices can't hold {} sounds and the metronome",
                sequencer.voices(),
                sequencer.sounds()
            )));
        }
        if self.sounds.len() > sequencer.sounds() {
            return Err(invalid(format!(
                "{} sound files given for {} sounds",
                self.sounds.len(),
                sequencer.sounds()
            )));
        }
        for resolution in [sequencer.record_resolution(), sequencer.play_resolution()] {
            Resolution::try_from(resolution).map_err(|e| invalid(e.to_string()))?;
        }
        if self.audio.sample_rate() == 0 {
            return Err(invalid("sample_rate must be positive".into()));
        }
        if self.audio.channels() == 0 {
            return Err(invalid("at least one output channel is required".into()));
        }
        if self.audio.buffer_size() == 0 {
            return Err(invalid("buffer_size must be positive".into()));
        }
        let delay = self.delay.settings()?;
        if delay.time > self.delay.max_time()? {
            return Err(invalid(format!(
                "delay time {:?} exceeds max_time {:?}",
                delay.time,
                self.delay.max_time()?
            )));
        }
        Ok(())
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn delay(&self) -> &Delay {
        &self.delay
    }

    /// Returns the sample file for each configured sound row, resolved
    /// against the session's directory.
    pub fn sound_files(&self) -> Vec<PathBuf> {
        self.sounds
            .iter()
            .map(|sound| self.base_path.join(sound.file()))
            .collect()
    }

    /// Returns the click file, if one is configured.
    pub fn click_file(&self) -> Option<PathBuf> {
        self.click.as_ref().map(|click| self.base_path.join(click))
    }

    /// Builds the engine settings described by this session.
    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigError> {
        let sequencer = &self.sequencer;
        Ok(EngineSettings {
            sample_rate: self.audio.sample_rate(),
            output_channels: self.audio.channels() as usize,
            voices: sequencer.voices(),
            fade_frames: sequencer.fade_frames(),
            bpm: sequencer.bpm(),
            bars: sequencer.bars(),
            steps: sequencer.steps(),
            sounds: sequencer.sounds(),
            record_resolution: sequencer.record_resolution(),
            play_resolution: sequencer.play_resolution(),
            master_volume: sequencer.master_volume(),
            delay: self.delay.settings()?,
            max_delay_time: self.delay.max_time()?,
        })
    }
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Invalid(message)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> Session {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize::<Session>()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let session = parse("audio:\n  device: mock-device\n");
        session.validate().unwrap();
        assert_eq!(session.audio().device(), "mock-device");

        let settings = session.engine_settings().unwrap();
        assert_eq!(settings.sample_rate, 44100);
        assert_eq!(settings.output_channels, 2);
        assert_eq!(settings.bpm, 120.0);
        assert_eq!(settings.bars, 1);
        assert_eq!(settings.steps, 16);
        assert_eq!(settings.sounds, 8);
        assert_eq!(settings.voices, 16);
        assert_eq!(settings.record_resolution, 16);
        assert_eq!(settings.play_resolution, 16);
        assert_eq!(settings.fade_frames, 32);
        assert_eq!(settings.delay.time, Duration::from_millis(250));
        assert_eq!(settings.max_delay_time, Duration::from_secs(2));
        assert!(!settings.delay.enabled);
        assert_eq!(session.audio().buffer_size(), 512);
    }

    #[test]
    fn test_full_session() {
        let session = parse(
            r#"
            audio:
              device: mock
              sample_rate: 48000
              channels: 1
              buffer_size: 256
            sequencer:
              bpm: 96.5
              bars: 2
              steps: 32
              sounds: 4
              voices: 6
              record_resolution: 32
              play_resolution: 8
              fade_frames: 0
              master_volume: 0.5
            delay:
              time: 125ms
              max_time: 1s
              feedback: 0.6
              gain: 0.25
              enabled: true
            sounds:
              - file: kick.wav
              - file: snare.wav
            click: click.wav
            "#,
        );
        session.validate().unwrap();
        let settings = session.engine_settings().unwrap();
        assert_eq!(settings.sample_rate, 48000);
        assert_eq!(settings.output_channels, 1);
        assert_eq!(settings.bpm, 96.5);
        assert_eq!(settings.steps, 32);
        assert_eq!(settings.voices, 6);
        assert_eq!(settings.play_resolution, 8);
        assert_eq!(settings.fade_frames, 0);
        assert_eq!(settings.master_volume, 0.5);
        assert_eq!(settings.delay.time, Duration::from_millis(125));
        assert_eq!(settings.delay.feedback, 0.6);
        assert!(settings.delay.enabled);
        assert_eq!(settings.max_delay_time, Duration::from_secs(1));
        assert_eq!(
            session.sound_files(),
            vec![PathBuf::from("kick.wav"), PathBuf::from("snare.wav")]
        );
        assert_eq!(session.click_file(), Some(PathBuf::from("click.wav")));
    }

    #[test]
    fn test_validation() {
        let cases = [
            "sequencer:\n  bpm: 0\n",
            "sequencer:\n  steps: 0\n",
            "sequencer:\n  bars: 0\n",
            "sequencer:\n  sounds: 16\n  voices: 16\n",
            "sequencer:\n  record_resolution: 5\n",
            "sequencer:\n  play_resolution: 7\n",
            "audio:\n  channels: 0\n",
            "delay:\n  time: 3s\n",
            "delay:\n  time: soon\n",
            "sequencer:\n  sounds: 1\n  voices: 2\nsounds:\n  - file: a.wav\n  - file: b.wav\n",
        ];
        for yaml in cases {
            assert!(
                matches!(parse(yaml).validate(), Err(ConfigError::Invalid(_))),
                "expected {:?} to be rejected",
                yaml
            );
        }
    }

    #[test]
    fn test_deserialize_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.yaml");
        fs::write(
            &path,
            "audio:\n  device: mock\nsounds:\n  - file: kick.wav\nclick: sounds/click.wav\n",
        )
        .unwrap();

        let session = Session::deserialize(&path).unwrap();
        assert_eq!(session.sound_files(), vec![dir.path().join("kick.wav")]);
        assert_eq!(
            session.click_file(),
            Some(dir.path().join("sounds/click.wav"))
        );
    }

    #[test]
    fn test_deserialize_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Session::deserialize(&dir.path().join("missing.yaml")),
            Err(ConfigError::Load(_))
        ));
    }
}
