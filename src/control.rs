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

//! The control path: the command surface used by frontends.
//!
//! The controller keeps the authoritative copy of every setting and of the
//! pattern. Edits are validated here, applied locally, and forwarded to the
//! renderer through the command queue; pattern edits publish a fresh
//! immutable snapshot.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::audio::clock::{is_valid_bpm, ClockError, SequencerClock};
use crate::audio::delay::{DelayEffect, DelaySettings};
use crate::audio::mixer::ChannelMixer;
use crate::audio::render::{Command, Renderer, RendererParts, Retired, TransportStatus};
use crate::pattern::{Bar, Pattern, PatternError, DEFAULT_STEPS};
use crate::quantizer::{QuantizeError, Quantizer, Resolution};
use crate::sample::{Sample, SampleProvider};

/// Capacity of the control to render command queue.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the queue carrying released handles back from the renderer.
const RETIRE_QUEUE_CAPACITY: usize = 256;

/// Errors reported by control operations. None of them are fatal: the
/// previous state is always kept.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControlError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("{kind} {index} out of range (count: {count})")]
    InvalidIndex {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("command queue is full")]
    QueueFull,

    #[error("the renderer has shut down")]
    Disconnected,

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Quantize(#[from] QuantizeError),

    #[error(transparent)]
    Clock(#[from] ClockError),
}

/// Everything needed to assemble a controller and renderer pair.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub sample_rate: u32,
    pub output_channels: usize,
    /// Size of the mixer's channel pool. The last channel is reserved for the metronome.
    pub voices: usize,
    pub fade_frames: usize,
    pub bpm: f64,
    pub bars: usize,
    pub steps: usize,
    pub sounds: usize,
    pub record_resolution: u32,
    pub play_resolution: u32,
    pub master_volume: f32,
    pub delay: DelaySettings,
    pub max_delay_time: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            sample_rate: 44100,
            output_channels: 2,
            voices: 16,
            fade_frames: 32,
            bpm: 120.0,
            bars: 1,
            steps: DEFAULT_STEPS,
            sounds: 8,
            record_resolution: 16,
            play_resolution: 16,
            master_volume: 1.0,
            delay: DelaySettings::default(),
            max_delay_time: Duration::from_secs(2),
        }
    }
}

/// Per-channel mixer settings as last requested by the control path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            volume: 1.0,
            pan: 0.0,
            muted: false,
        }
    }
}

/// The control side of the engine.
pub struct Controller {
    commands: Sender<Command>,
    retired: Receiver<Retired>,
    status: Arc<TransportStatus>,
    pattern: Pattern,
    quantizer: Quantizer,
    playing: bool,
    clicking: bool,
    current_bar: usize,
    channels: Vec<ChannelSettings>,
    master_volume: f32,
    delay: DelaySettings,
    max_delay_time: Duration,
}

impl Controller {
    /// Builds a controller and the renderer it drives. Samples for every
    /// sound row and the click are taken from the provider up front.
    pub fn create(
        settings: &EngineSettings,
        provider: &dyn SampleProvider,
    ) -> Result<(Controller, Renderer), ControlError> {
        if settings.voices < settings.sounds + 1 {
            return Err(ControlError::InvalidParameter(format!(
                "{} voices can't hold {} sounds and the metronome",
                settings.voices, settings.sounds
            )));
        }
        if settings.output_channels == 0 {
            return Err(ControlError::InvalidParameter(
                "at least one output channel is required".into(),
            ));
        }
        if !is_valid_bpm(settings.bpm) {
            return Err(ClockError::InvalidTempo(settings.bpm).into());
        }

        let pattern = Pattern::new(settings.bars, settings.sounds, settings.steps)?;
        let mut quantizer = Quantizer::new(settings.bpm);
        quantizer.set_record_resolution(settings.record_resolution)?;
        quantizer.set_play_resolution(settings.play_resolution)?;

        let clock = SequencerClock::new(settings.sample_rate, settings.bpm)?;
        let click_channel = settings.voices - 1;
        let mut mixer = ChannelMixer::new(settings.voices, settings.fade_frames);
        mixer.reserve_channel(click_channel).map_err(|e| {
            ControlError::InvalidParameter(format!("unable to reserve metronome channel: {}", e))
        })?;
        mixer.set_master_volume(settings.master_volume);

        let delay_settings = clamp_delay_time(settings.delay, settings.max_delay_time);
        let mut delay = DelayEffect::new(
            settings.max_delay_time,
            settings.sample_rate,
            settings.output_channels,
        );
        delay.apply(delay_settings);

        let sounds: Vec<Option<Arc<Sample>>> = (0..settings.sounds)
            .map(|sound| {
                let sample = provider.sample(sound);
                if sample.is_none() {
                    warn!(sound, "No sample for sound, it will be silent");
                }
                sample
            })
            .collect();
        let click = provider.click();
        if click.is_none() {
            warn!("No click sample, the metronome will be silent");
        }

        let (command_tx, command_rx) = crossbeam_channel::bounded(COMMAND_QUEUE_CAPACITY);
        let (retired_tx, retired_rx) = crossbeam_channel::bounded(RETIRE_QUEUE_CAPACITY);
        let status = Arc::new(TransportStatus::new());

        let renderer = Renderer::new(RendererParts {
            commands: command_rx,
            retired: retired_tx,
            status: status.clone(),
            clock,
            mixer,
            delay,
            pattern: Arc::new(pattern.clone()),
            sounds,
            click,
            click_channel,
            sample_rate: settings.sample_rate,
            output_channels: settings.output_channels,
        });

        info!(
            bpm = settings.bpm,
            sounds = settings.sounds,
            voices = settings.voices,
            bars = settings.bars,
            steps = settings.steps,
            "Engine created"
        );

        let controller = Controller {
            commands: command_tx,
            retired: retired_rx,
            status,
            pattern,
            quantizer,
            playing: false,
            clicking: false,
            current_bar: 0,
            channels: vec![ChannelSettings::default(); settings.voices],
            master_volume: settings.master_volume.clamp(0.0, 1.0),
            delay: delay_settings,
            max_delay_time: settings.max_delay_time,
        };
        Ok((controller, renderer))
    }

    /// Sends a command to the renderer without blocking. Released handles
    /// waiting on the retire queue are dropped first.
    fn send(&self, command: Command) -> Result<(), ControlError> {
        while let Ok(retired) = self.retired.try_recv() {
            debug!(retired = ?retired, "Releasing retired handle");
        }
        let overflows = self.status.take_retire_overflows();
        if overflows > 0 {
            debug!(overflows, "Retire queue was full, handles were released on the audio thread");
        }
        self.commands.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => {
                warn!("Command queue full, dropping command");
                ControlError::QueueFull
            }
            TrySendError::Disconnected(_) => ControlError::Disconnected,
        })
    }

    fn publish_pattern(&self) -> Result<(), ControlError> {
        self.send(Command::SetPattern(Arc::new(self.pattern.clone())))
    }

    fn check_channel(&self, index: usize) -> Result<(), ControlError> {
        check_index("channel", index, self.channels.len())
    }

    /// Returns the shared transport status.
    pub fn status(&self) -> &Arc<TransportStatus> {
        &self.status
    }

    pub fn bpm(&self) -> f64 {
        self.quantizer.bpm()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_clicking(&self) -> bool {
        self.clicking
    }

    /// The next step the clock will play, as last published by the renderer.
    pub fn current_step(&self) -> usize {
        self.status.current_step()
    }

    pub fn current_bar(&self) -> usize {
        self.current_bar
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn delay_settings(&self) -> DelaySettings {
        self.delay
    }

    pub fn record_resolution(&self) -> Resolution {
        self.quantizer.record_resolution()
    }

    pub fn play_resolution(&self) -> Resolution {
        self.quantizer.play_resolution()
    }

    pub fn channel_settings(&self, index: usize) -> Option<ChannelSettings> {
        self.channels.get(index).copied()
    }

    /// Changes the tempo. Tempos that aren't positive are rejected.
    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), ControlError> {
        if !is_valid_bpm(bpm) {
            warn!(bpm, previous = self.bpm(), "Rejecting invalid tempo");
            return Err(ClockError::InvalidTempo(bpm).into());
        }
        self.send(Command::SetBpm(bpm))?;
        self.quantizer.set_bpm(bpm);
        debug!(bpm, "Tempo changed");
        Ok(())
    }

    /// Starts or stops playback and returns the new state.
    pub fn toggle_play(&mut self) -> Result<bool, ControlError> {
        self.send(Command::SetPlaying(!self.playing))?;
        self.playing = !self.playing;
        info!(playing = self.playing, "Toggled playback");
        Ok(self.playing)
    }

    /// Starts or stops the metronome and returns the new state.
    pub fn toggle_click(&mut self) -> Result<bool, ControlError> {
        self.send(Command::SetClicking(!self.clicking))?;
        self.clicking = !self.clicking;
        info!(clicking = self.clicking, "Toggled metronome");
        Ok(self.clicking)
    }

    /// Stops every sounding voice.
    pub fn stop_all_sounds(&mut self) -> Result<(), ControlError> {
        self.send(Command::StopAllSounds)
    }

    pub fn set_channel_volume(&mut self, index: usize, volume: f32) -> Result<(), ControlError> {
        self.check_channel(index)?;
        let volume = check_range("volume", volume, 0.0, 1.0)?;
        self.send(Command::SetChannelVolume(index, volume))?;
        self.channels[index].volume = volume;
        Ok(())
    }

    pub fn set_channel_pan(&mut self, index: usize, pan: f32) -> Result<(), ControlError> {
        self.check_channel(index)?;
        let pan = check_range("pan", pan, -1.0, 1.0)?;
        self.send(Command::SetChannelPan(index, pan))?;
        self.channels[index].pan = pan;
        Ok(())
    }

    pub fn set_channel_muted(&mut self, index: usize, muted: bool) -> Result<(), ControlError> {
        self.check_channel(index)?;
        self.send(Command::SetChannelMuted(index, muted))?;
        self.channels[index].muted = muted;
        Ok(())
    }

    /// Unmutes every channel.
    pub fn reset_mute(&mut self) -> Result<(), ControlError> {
        self.send(Command::ResetMute)?;
        self.channels.iter_mut().for_each(|c| c.muted = false);
        Ok(())
    }

    pub fn set_master_volume(&mut self, volume: f32) -> Result<(), ControlError> {
        let volume = check_range("master volume", volume, 0.0, 1.0)?;
        self.send(Command::SetMasterVolume(volume))?;
        self.master_volume = volume;
        Ok(())
    }

    /// Updates the delay effect. Feedback and gain are clamped to [0, 1] and
    /// the time to the delay line's capacity.
    pub fn set_delay(&mut self, settings: DelaySettings) -> Result<(), ControlError> {
        let settings = DelaySettings {
            feedback: check_range("delay feedback", settings.feedback, 0.0, 1.0)?,
            gain: check_range("delay gain", settings.gain, 0.0, 1.0)?,
            ..clamp_delay_time(settings, self.max_delay_time)
        };
        self.send(Command::SetDelay(settings))?;
        self.delay = settings;
        Ok(())
    }

    pub fn set_record_resolution(&mut self, resolution: u32) -> Result<(), ControlError> {
        Ok(self.quantizer.set_record_resolution(resolution)?)
    }

    pub fn set_play_resolution(&mut self, resolution: u32) -> Result<(), ControlError> {
        Ok(self.quantizer.set_play_resolution(resolution)?)
    }

    /// Returns the read-only pattern.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Returns one bar of the pattern.
    pub fn pattern_bar(&self, bar: usize) -> Option<&Bar> {
        self.pattern.bar(bar)
    }

    pub fn note(&self, bar: usize, sound: usize, step: usize) -> Result<bool, ControlError> {
        Ok(self.pattern.note(bar, sound, step)?)
    }

    /// Flips a cell and returns its new value.
    pub fn toggle_sound_step(
        &mut self,
        bar: usize,
        sound: usize,
        step: usize,
    ) -> Result<bool, ControlError> {
        let value = self.edit(|p| p.toggle(bar, sound, step))?;
        Ok(value)
    }

    pub fn set_note(
        &mut self,
        bar: usize,
        sound: usize,
        step: usize,
        value: bool,
    ) -> Result<(), ControlError> {
        self.edit(|p| p.set_note(bar, sound, step, value))
    }

    pub fn clear_note(&mut self, bar: usize, sound: usize, step: usize) -> Result<(), ControlError> {
        self.set_note(bar, sound, step, false)
    }

    /// Fills one sound of one bar with a hit every play resolution interval.
    pub fn gen_steps_from_sound(&mut self, bar: usize, sound: usize) -> Result<(), ControlError> {
        let quantizer = self.quantizer.clone();
        self.edit(|p| quantizer.gen_steps_from_sound(p, bar, sound))
    }

    /// Moves every hit of one sound onto the play resolution grid.
    pub fn quantize_steps_from_sound(&mut self, sound: usize) -> Result<(), ControlError> {
        let quantizer = self.quantizer.clone();
        self.edit(|p| quantizer.quantize_steps_from_sound(p, sound))
    }

    /// Quantizes every sound. Sounds that fail are logged and skipped.
    pub fn quantize_played_steps(&mut self) -> Result<(), ControlError> {
        let quantizer = self.quantizer.clone();
        self.edit(|p| {
            quantizer.quantize_played_steps(p);
            Ok::<(), ControlError>(())
        })
    }

    /// Selects the bar the clock plays.
    pub fn select_bar(&mut self, bar: usize) -> Result<(), ControlError> {
        check_index("bar", bar, self.pattern.bars())?;
        self.send(Command::SelectBar(bar))?;
        self.current_bar = bar;
        Ok(())
    }

    /// Appends an empty bar and returns its index.
    pub fn add_bar(&mut self, steps: usize) -> Result<usize, ControlError> {
        self.edit(|p| p.add_bar(steps))
    }

    /// Removes a bar. The selected bar is clamped into the remaining bars.
    pub fn remove_bar(&mut self, bar: usize) -> Result<(), ControlError> {
        self.edit(|p| p.remove_bar(bar))?;
        self.current_bar = self.pattern.clamp_bar(self.current_bar);
        Ok(())
    }

    pub fn clear_bar(&mut self, bar: usize) -> Result<(), ControlError> {
        self.edit(|p| p.clear_bar(bar))
    }

    /// Records a hit for a sound at the current time. See `record_hit_at`.
    pub fn record_hit(&mut self, sound: usize) -> Result<usize, ControlError> {
        let now = self.status.now_us();
        self.record_hit_at(sound, now)
    }

    /// Records a hit pressed at `press_us` (microseconds on the transport
    /// clock) into the selected bar and plays it. While playing, the press is
    /// placed on the record grid relative to the last step boundary; when
    /// stopped it lands on the current step. Returns the step written.
    ///
    /// The hit is auditioned before the note is written, so a failed call
    /// leaves the pattern unchanged.
    pub fn record_hit_at(&mut self, sound: usize, press_us: u64) -> Result<usize, ControlError> {
        check_index("sound", sound, self.pattern.sounds())?;
        let bar = self.current_bar;
        let steps = self.pattern.steps_in_bar(bar);

        let step = if self.playing {
            let (last_step, boundary_us) = self.status.last_boundary();
            self.quantizer.quantize_recorded_step(
                last_step,
                press_us as f64 / 1000.0,
                boundary_us as f64 / 1000.0,
                steps,
            )
        } else {
            self.status.current_step().min(steps.saturating_sub(1))
        };

        self.send(Command::Audition(sound))?;
        self.set_note(bar, sound, step, true)?;
        debug!(sound, bar, step, "Recorded hit");
        Ok(step)
    }

    /// Replaces the sample for a sound row.
    pub fn load_sound(&mut self, sound: usize, sample: Arc<Sample>) -> Result<(), ControlError> {
        check_index("sound", sound, self.pattern.sounds())?;
        self.send(Command::SetSound(sound, sample))
    }

    /// Replaces the metronome click sample.
    pub fn load_click(&mut self, sample: Arc<Sample>) -> Result<(), ControlError> {
        self.send(Command::SetClick(sample))
    }

    /// Applies an edit to a copy of the pattern and publishes it. The pattern
    /// is left unchanged if the edit or the publish fails.
    fn edit<T, E, F>(&mut self, edit: F) -> Result<T, ControlError>
    where
        F: FnOnce(&mut Pattern) -> Result<T, E>,
        ControlError: From<E>,
    {
        let mut pattern = self.pattern.clone();
        let value = edit(&mut pattern).map_err(|e| {
            let e = ControlError::from(e);
            warn!(err = %e, "Pattern edit rejected");
            e
        })?;
        let previous = std::mem::replace(&mut self.pattern, pattern);
        if let Err(e) = self.publish_pattern() {
            self.pattern = previous;
            return Err(e);
        }
        Ok(value)
    }
}

fn check_index(kind: &'static str, index: usize, count: usize) -> Result<(), ControlError> {
    if index >= count {
        warn!(kind, index, count, "Index out of range");
        return Err(ControlError::InvalidIndex { kind, index, count });
    }
    Ok(())
}

/// Keeps the delay time within the delay line's capacity.
fn clamp_delay_time(settings: DelaySettings, max_time: Duration) -> DelaySettings {
    if settings.time > max_time {
        warn!(
            requested_ms = settings.time.as_millis() as u64,
            max_ms = max_time.as_millis() as u64,
            "Delay time exceeds delay line capacity, clamping"
        );
        return DelaySettings {
            time: max_time,
            ..settings
        };
    }
    settings
}

/// Clamps a parameter into range. Only NaN is rejected outright.
fn check_range(name: &str, value: f32, min: f32, max: f32) -> Result<f32, ControlError> {
    if value.is_nan() {
        warn!(name, "Rejecting NaN parameter");
        return Err(ControlError::InvalidParameter(format!("{} is not a number", name)));
    }
    if value < min || value > max {
        warn!(name, value, min, max, "Clamping parameter into range");
    }
    Ok(value.clamp(min, max))
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("bpm", &self.bpm())
            .field("playing", &self.playing)
            .field("clicking", &self.clicking)
            .field("pattern", &self.pattern)
            .finish()
    }
}
