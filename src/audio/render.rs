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

//! The render entry point invoked once per hardware buffer.
//!
//! The renderer owns everything the real-time path touches. The control path
//! reaches it only through a bounded command queue, and shared handles that
//! the renderer lets go of are sent back on a second queue so they are never
//! freed on the audio thread.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use super::clock::{SequencerClock, Trigger};
use super::delay::{DelayEffect, DelaySettings};
use super::mixer::ChannelMixer;
use crate::pattern::Pattern;
use crate::sample::Sample;

/// Bits of the packed boundary word that hold the timestamp.
const BOUNDARY_TIME_BITS: u32 = 48;
const BOUNDARY_TIME_MASK: u64 = (1 << BOUNDARY_TIME_BITS) - 1;

/// A command from the control path, applied at the start of the next buffer.
#[derive(Debug)]
pub enum Command {
    SetBpm(f64),
    SetPlaying(bool),
    SetClicking(bool),
    StopAllSounds,
    SetChannelVolume(usize, f32),
    SetChannelPan(usize, f32),
    SetChannelMuted(usize, bool),
    ResetMute,
    SetMasterVolume(f32),
    SetDelay(DelaySettings),
    SelectBar(usize),
    SetPattern(Arc<Pattern>),
    SetSound(usize, Arc<Sample>),
    SetClick(Arc<Sample>),
    /// Plays a sound immediately, outside the pattern.
    Audition(usize),
}

/// A shared handle released by the renderer, to be dropped on the control path.
#[derive(Debug)]
pub enum Retired {
    Pattern(Arc<Pattern>),
    Sample(Arc<Sample>),
}

/// Transport state published by the renderer after every buffer.
#[derive(Debug)]
pub struct TransportStatus {
    epoch: Instant,
    running: AtomicBool,
    clicking: AtomicBool,
    current_step: AtomicUsize,
    current_bar: AtomicUsize,
    /// The last triggered step and the time of its boundary, packed so both
    /// are always read together.
    boundary: AtomicU64,
    buffers_rendered: AtomicU64,
    /// Handles dropped on the audio thread because the retire queue was full.
    retire_overflows: AtomicU64,
}

impl TransportStatus {
    pub fn new() -> TransportStatus {
        TransportStatus {
            epoch: Instant::now(),
            running: AtomicBool::new(false),
            clicking: AtomicBool::new(false),
            current_step: AtomicUsize::new(0),
            current_bar: AtomicUsize::new(0),
            boundary: AtomicU64::new(0),
            buffers_rendered: AtomicU64::new(0),
            retire_overflows: AtomicU64::new(0),
        }
    }

    /// Microseconds elapsed since the status was created.
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_clicking(&self) -> bool {
        self.clicking.load(Ordering::Acquire)
    }

    /// The next step the clock will play.
    pub fn current_step(&self) -> usize {
        self.current_step.load(Ordering::Acquire)
    }

    pub fn current_bar(&self) -> usize {
        self.current_bar.load(Ordering::Acquire)
    }

    /// The last triggered step and the time of its boundary in microseconds.
    pub fn last_boundary(&self) -> (usize, u64) {
        let packed = self.boundary.load(Ordering::Acquire);
        (
            (packed >> BOUNDARY_TIME_BITS) as usize,
            packed & BOUNDARY_TIME_MASK,
        )
    }

    pub(crate) fn mark_boundary(&self, step: usize, time_us: u64) {
        let packed = ((step as u64) << BOUNDARY_TIME_BITS) | (time_us & BOUNDARY_TIME_MASK);
        self.boundary.store(packed, Ordering::Release);
    }

    /// Number of buffers rendered so far.
    pub fn buffers_rendered(&self) -> u64 {
        self.buffers_rendered.load(Ordering::Acquire)
    }

    /// Returns how many handles were released on the audio thread since the
    /// last call, and resets the count.
    pub fn take_retire_overflows(&self) -> u64 {
        self.retire_overflows.swap(0, Ordering::AcqRel)
    }
}

impl Default for TransportStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the real-time state and produces the mixed output.
pub struct Renderer {
    commands: Receiver<Command>,
    retired: Sender<Retired>,
    status: Arc<TransportStatus>,
    clock: SequencerClock,
    mixer: ChannelMixer,
    delay: DelayEffect,
    pattern: Arc<Pattern>,
    sounds: Vec<Option<Arc<Sample>>>,
    click: Option<Arc<Sample>>,
    click_channel: usize,
    sample_rate: u32,
    output_channels: usize,
}

/// The pieces a renderer is assembled from.
pub(crate) struct RendererParts {
    pub commands: Receiver<Command>,
    pub retired: Sender<Retired>,
    pub status: Arc<TransportStatus>,
    pub clock: SequencerClock,
    pub mixer: ChannelMixer,
    pub delay: DelayEffect,
    pub pattern: Arc<Pattern>,
    pub sounds: Vec<Option<Arc<Sample>>>,
    pub click: Option<Arc<Sample>>,
    pub click_channel: usize,
    pub sample_rate: u32,
    pub output_channels: usize,
}

impl Renderer {
    pub(crate) fn new(parts: RendererParts) -> Renderer {
        Renderer {
            commands: parts.commands,
            retired: parts.retired,
            status: parts.status,
            clock: parts.clock,
            mixer: parts.mixer,
            delay: parts.delay,
            pattern: parts.pattern,
            sounds: parts.sounds,
            click: parts.click,
            click_channel: parts.click_channel,
            sample_rate: parts.sample_rate,
            output_channels: parts.output_channels.max(1),
        }
    }

    /// The number of interleaved output channels the renderer produces.
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn clock(&self) -> &SequencerClock {
        &self.clock
    }

    pub fn mixer(&self) -> &ChannelMixer {
        &self.mixer
    }

    pub fn delay(&self) -> &DelayEffect {
        &self.delay
    }

    /// Fills `output` with the next block of interleaved audio.
    ///
    /// Pending commands are applied first. The buffer is then cut at every
    /// step boundary it contains: each piece is mixed, the clock is advanced
    /// past it, and voices triggered at the boundary start sounding in the
    /// following piece. The delay runs over the whole mixed buffer and the
    /// result is hard-clipped. Any trailing partial frame is zeroed.
    pub fn render(&mut self, output: &mut [f32]) {
        self.drain_commands();

        let channels = self.output_channels;
        let frames = output.len() / channels;
        let start_us = self.status.now_us();

        let mut position = 0;
        while position < frames {
            let until = self.clock.frames_until_boundary();
            if until == 0 {
                self.tick(0, position, start_us);
                continue;
            }
            let chunk = (frames - position).min(until);
            self.mixer.mix(
                &mut output[position * channels..(position + chunk) * channels],
                chunk,
                channels,
            );
            position += chunk;
            self.tick(chunk, position, start_us);
        }

        let (mixed, rest) = output.split_at_mut(frames * channels);
        rest.fill(0.0);
        self.delay.process(mixed, frames, channels);
        for value in mixed.iter_mut() {
            *value = value.clamp(-1.0, 1.0);
        }

        self.publish();
    }

    fn tick(&mut self, frames: usize, position: usize, start_us: u64) {
        let mixer = &mut self.mixer;
        let sounds = &self.sounds;
        let click = &self.click;
        let click_channel = self.click_channel;
        let retirement = Retirement {
            queue: &self.retired,
            status: &self.status,
        };
        let crossed = self.clock.tick(frames, &self.pattern, |trigger| {
            start_voice(mixer, sounds, click, click_channel, &retirement, trigger)
        });
        if crossed && self.clock.is_running() {
            let offset_us = position as u64 * 1_000_000 / self.sample_rate.max(1) as u64;
            self.status
                .mark_boundary(self.clock.last_step(), start_us + offset_us);
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    fn retirement(&self) -> Retirement<'_> {
        Retirement {
            queue: &self.retired,
            status: &self.status,
        }
    }

    fn apply(&mut self, command: Command) {
        // Indices and values are checked by the controller before queuing.
        match command {
            Command::SetBpm(bpm) => {
                let _ = self.clock.set_bpm(bpm);
            }
            Command::SetPlaying(true) => self.clock.start(),
            Command::SetPlaying(false) => self.clock.stop(),
            Command::SetClicking(clicking) => self.clock.set_clicking(clicking),
            Command::StopAllSounds => self.mixer.stop_all(),
            Command::SetChannelVolume(index, volume) => {
                let _ = self.mixer.set_channel_volume(index, volume);
            }
            Command::SetChannelPan(index, pan) => {
                let _ = self.mixer.set_channel_pan(index, pan);
            }
            Command::SetChannelMuted(index, muted) => {
                let _ = self.mixer.set_channel_muted(index, muted);
            }
            Command::ResetMute => self.mixer.reset_mute(),
            Command::SetMasterVolume(volume) => self.mixer.set_master_volume(volume),
            Command::SetDelay(settings) => self.delay.apply(settings),
            Command::SelectBar(bar) => self.clock.select_bar(bar, &self.pattern),
            Command::SetPattern(pattern) => {
                let previous = mem::replace(&mut self.pattern, pattern);
                self.clock.clamp_to(&self.pattern);
                self.retirement().retire(Retired::Pattern(previous));
            }
            Command::SetSound(sound, sample) => {
                let displaced = match self.sounds.get_mut(sound) {
                    Some(slot) => slot.replace(sample),
                    None => Some(sample),
                };
                if let Some(displaced) = displaced {
                    self.retirement().retire(Retired::Sample(displaced));
                }
            }
            Command::SetClick(sample) => {
                if let Some(previous) = self.click.replace(sample) {
                    self.retirement().retire(Retired::Sample(previous));
                }
            }
            Command::Audition(sound) => {
                let retirement = Retirement {
                    queue: &self.retired,
                    status: &self.status,
                };
                start_voice(
                    &mut self.mixer,
                    &self.sounds,
                    &self.click,
                    self.click_channel,
                    &retirement,
                    Trigger::Sound(sound),
                )
            }
        }
    }

    fn publish(&self) {
        self.status
            .running
            .store(self.clock.is_running(), Ordering::Release);
        self.status
            .clicking
            .store(self.clock.is_clicking(), Ordering::Release);
        self.status
            .current_step
            .store(self.clock.current_step(), Ordering::Release);
        self.status
            .current_bar
            .store(self.clock.current_bar(), Ordering::Release);
        self.status.buffers_rendered.fetch_add(1, Ordering::AcqRel);
    }
}

/// Starts the voice for a trigger. Sound rows play on the channel with the
/// same index; the click plays on its reserved channel.
fn start_voice(
    mixer: &mut ChannelMixer,
    sounds: &[Option<Arc<Sample>>],
    click: &Option<Arc<Sample>>,
    click_channel: usize,
    retirement: &Retirement<'_>,
    trigger: Trigger,
) {
    let started = match trigger {
        Trigger::Click => match click {
            Some(sample) => mixer.play_reserved(click_channel, sample.clone()),
            None => return,
        },
        Trigger::Sound(sound) => match sounds.get(sound) {
            Some(Some(sample)) => mixer.play(sound, sample.clone()),
            _ => return,
        },
    };
    if let Ok(Some(previous)) = started {
        retirement.retire(Retired::Sample(previous));
    }
}

/// The way back to the control path for handles the renderer lets go of.
struct Retirement<'a> {
    queue: &'a Sender<Retired>,
    status: &'a TransportStatus,
}

impl Retirement<'_> {
    /// Hands a displaced handle to the control path, whoever else still holds
    /// it. If the queue is full the handle is dropped here and counted.
    fn retire(&self, item: Retired) {
        if self.queue.try_send(item).is_err() {
            self.status.retire_overflows.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("clock", &self.clock)
            .field("mixer", &self.mixer)
            .field("delay", &self.delay)
            .field("output_channels", &self.output_channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::control::{Controller, EngineSettings};
    use crate::sample::SampleBank;

    const BUFFER_FRAMES: usize = 512;

    fn engine(sample: Sample) -> (Controller, Renderer) {
        let settings = EngineSettings::default();
        let mut bank = SampleBank::new(settings.sounds);
        bank.set_sound(0, Arc::new(sample));
        Controller::create(&settings, &bank).unwrap()
    }

    fn frame(buffer: &[f32], frame: usize) -> (f32, f32) {
        (buffer[frame * 2], buffer[frame * 2 + 1])
    }

    #[test]
    fn test_stopped_engine_renders_silence() {
        let (_controller, mut renderer) = engine(Sample::mono(vec![0.5; 4096], 44100));
        let mut buffer = vec![1.0; BUFFER_FRAMES * 2];
        renderer.render(&mut buffer);
        assert!(buffer.iter().all(|v| *v == 0.0));
        assert_eq!(renderer.clock().current_step(), 0);
    }

    #[test]
    fn test_first_step_sounds_at_the_first_boundary() {
        let (mut controller, mut renderer) = engine(Sample::mono(vec![0.5; 8192], 44100));
        controller.set_note(0, 0, 0, true).unwrap();
        controller.toggle_play().unwrap();

        // The first boundary is 5512 frames in, inside the eleventh buffer.
        let mut buffer = vec![0.0; BUFFER_FRAMES * 2];
        for _ in 0..10 {
            renderer.render(&mut buffer);
            assert!(buffer.iter().all(|v| *v == 0.0));
        }
        renderer.render(&mut buffer);

        let boundary = 5512 - 10 * BUFFER_FRAMES;
        assert_eq!(frame(&buffer, boundary - 1), (0.0, 0.0));
        let (left, right) = frame(&buffer, BUFFER_FRAMES - 1);
        let expected = 0.5 * std::f32::consts::FRAC_1_SQRT_2 * 0.8;
        assert!((left - expected).abs() < 1e-4, "{}", left);
        assert!((right - expected).abs() < 1e-4, "{}", right);

        assert_eq!(renderer.clock().current_step(), 1);
        assert_eq!(controller.status().current_step(), 1);
        assert!(controller.status().is_running());
        assert!(renderer.mixer().channel(0).unwrap().is_active());
    }

    #[test]
    fn test_buffer_spanning_several_boundaries() {
        // 240 bpm at 800Hz gives steps of exactly 50 frames.
        let settings = EngineSettings {
            sample_rate: 800,
            bpm: 240.0,
            fade_frames: 0,
            ..Default::default()
        };
        let mut bank = SampleBank::new(settings.sounds);
        bank.set_sound(0, Arc::new(Sample::mono(vec![0.5; 20], 800)));
        let (mut controller, mut renderer) = Controller::create(&settings, &bank).unwrap();
        assert_eq!(renderer.clock().step_length(), 50);

        controller.set_note(0, 0, 0, true).unwrap();
        controller.set_note(0, 0, 3, true).unwrap();
        controller.set_note(0, 0, 8, true).unwrap();
        controller.toggle_play().unwrap();

        let mut buffer = vec![0.0; BUFFER_FRAMES * 2];
        renderer.render(&mut buffer);

        let boundaries = BUFFER_FRAMES / 50;
        assert_eq!(renderer.clock().current_step(), boundaries % 16);
        assert_eq!(controller.status().last_boundary().0, boundaries - 1);

        // Step n sounds from the boundary that ends it, at frame 50 * (n + 1).
        for step in [0, 3, 8] {
            let start = 50 * (step + 1);
            assert_eq!(frame(&buffer, start - 1), (0.0, 0.0), "step {}", step);
            assert!(frame(&buffer, start).0 > 0.0, "step {}", step);
            assert!(frame(&buffer, start + 19).0 > 0.0, "step {}", step);
            assert_eq!(frame(&buffer, start + 20), (0.0, 0.0), "step {}", step);
        }
        assert!(buffer[..50 * 2].iter().all(|v| *v == 0.0));

        // The next buffer carries on in phase: 1024 frames hold 20 boundaries.
        renderer.render(&mut buffer);
        assert_eq!(renderer.clock().current_step(), (2 * BUFFER_FRAMES / 50) % 16);
    }

    #[test]
    fn test_commands_apply_before_mixing() {
        let (mut controller, mut renderer) = engine(Sample::mono(vec![0.5; 4096], 44100));
        controller.set_channel_muted(0, true).unwrap();
        controller.record_hit(0).unwrap();

        let mut buffer = vec![0.0; BUFFER_FRAMES * 2];
        renderer.render(&mut buffer);
        assert!(buffer.iter().all(|v| *v == 0.0));

        // The muted voice still advances.
        let channel = renderer.mixer().channel(0).unwrap();
        assert!(channel.is_active());
        assert_eq!(channel.cursor().1, BUFFER_FRAMES);

        controller.reset_mute().unwrap();
        renderer.render(&mut buffer);
        assert!(buffer.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_partial_frame_is_zeroed() {
        let (mut controller, mut renderer) = engine(Sample::mono(vec![0.5; 4096], 44100));
        controller.record_hit(0).unwrap();
        let mut buffer = vec![1.0; 65];
        renderer.render(&mut buffer);
        assert_eq!(buffer[64], 0.0);
        assert!(buffer[62] != 0.0);
    }

    #[test]
    fn test_delay_follows_the_mix() {
        let (mut controller, mut renderer) = engine(Sample::mono(vec![0.5; 100], 44100));
        controller
            .set_delay(DelaySettings {
                time: Duration::from_millis(10),
                feedback: 0.0,
                gain: 1.0,
                enabled: true,
            })
            .unwrap();
        controller.record_hit(0).unwrap();

        let mut buffer = vec![0.0; 1024 * 2];
        renderer.render(&mut buffer);

        assert!(frame(&buffer, 50).0 > 0.0);
        assert_eq!(frame(&buffer, 200), (0.0, 0.0));
        assert_eq!(frame(&buffer, 440), (0.0, 0.0));
        let (dry_left, _) = frame(&buffer, 50);
        let (wet_left, _) = frame(&buffer, 441 + 50);
        assert!((dry_left - wet_left).abs() < 1e-6);
        assert_eq!(frame(&buffer, 600), (0.0, 0.0));
    }

    #[test]
    fn test_pattern_swap_clamps_the_clock() {
        let (mut controller, mut renderer) = engine(Sample::mono(vec![0.5; 4096], 44100));
        let bar = controller.add_bar(8).unwrap();
        controller.select_bar(bar).unwrap();
        let mut buffer = vec![0.0; BUFFER_FRAMES * 2];
        renderer.render(&mut buffer);
        assert_eq!(renderer.clock().current_bar(), 1);

        controller.remove_bar(bar).unwrap();
        assert_eq!(controller.current_bar(), 0);
        renderer.render(&mut buffer);
        assert_eq!(renderer.clock().current_bar(), 0);
        assert_eq!(controller.status().current_bar(), 0);
    }

    #[test]
    fn test_boundary_is_published() {
        let (mut controller, mut renderer) = engine(Sample::mono(vec![0.5; 4096], 44100));
        controller.toggle_play().unwrap();
        let mut buffer = vec![0.0; BUFFER_FRAMES * 2];
        for _ in 0..22 {
            renderer.render(&mut buffer);
        }
        // 22 buffers cover two boundaries.
        let (step, _) = controller.status().last_boundary();
        assert_eq!(step, 1);
        assert_eq!(controller.status().current_step(), 2);
        assert_eq!(controller.status().buffers_rendered(), 22);
    }
}
