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
// Channel mixing logic shared by the render path and its tests.
use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;

use tracing::{debug, error};

use crate::sample::Sample;

/// Gain applied to the summed mix before clipping.
pub const OUTPUT_GAIN: f32 = 0.8;

/// Frames rendered per voice per pass. Bounds the preallocated scratch buffer.
const SCRATCH_FRAMES: usize = 256;

/// Errors produced when addressing mixer channels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MixerError {
    #[error("channel {0} out of range (channels: {1})")]
    InvalidIndex(usize, usize),

    #[error("channel {0} is reserved")]
    Reserved(usize),

    #[error("channel {0} is not reserved")]
    NotReserved(usize),
}

/// Ramps a mono block up from silence. `offset` is the number of frames of
/// the fade already applied by earlier blocks.
pub fn fade_in_linear(block: &mut [f32], offset: usize, length: usize) {
    if length == 0 {
        return;
    }
    for (i, value) in block.iter_mut().enumerate() {
        let position = offset + i;
        if position >= length {
            break;
        }
        *value *= position as f32 / length as f32;
    }
}

/// Ramps a mono block down to silence. Frames past the end of the fade are silenced.
pub fn fade_out_linear(block: &mut [f32], offset: usize, length: usize) {
    for (i, value) in block.iter_mut().enumerate() {
        let position = offset + i;
        *value *= if position >= length {
            0.0
        } else {
            1.0 - position as f32 / length as f32
        };
    }
}

/// Equal-power gains for a pan position in [-1, 1].
fn pan_gains(pan: f32) -> (f32, f32) {
    let angle = (pan + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Envelope {
    Steady,
    FadeIn { position: usize },
    FadeOut { position: usize },
}

/// One playback slot of the mixer.
pub struct Channel {
    active: bool,
    reserved: bool,
    muted: bool,
    volume: f32,
    pan: f32,
    /// Cached (left, right) gains for the current pan.
    gains: (f32, f32),
    sample: Option<Arc<Sample>>,
    /// Read cursor into the sample, in frames.
    start: usize,
    current: usize,
    end: usize,
    envelope: Envelope,
}

impl Channel {
    fn new() -> Channel {
        Channel {
            active: false,
            reserved: false,
            muted: false,
            volume: 1.0,
            pan: 0.0,
            gains: pan_gains(0.0),
            sample: None,
            start: 0,
            current: 0,
            end: 0,
            envelope: Envelope::Steady,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Returns the read cursor as (start, current, end) frames.
    pub fn cursor(&self) -> (usize, usize, usize) {
        (self.start, self.current, self.end)
    }

    /// Starts the sample from its first frame, cutting any voice already playing.
    fn start(&mut self, sample: Arc<Sample>, fade_frames: usize) -> Option<Arc<Sample>> {
        self.start = 0;
        self.current = 0;
        self.end = sample.frames();
        self.active = self.end > 0;
        self.envelope = if fade_frames > 0 {
            Envelope::FadeIn { position: 0 }
        } else {
            Envelope::Steady
        };
        self.sample.replace(sample)
    }

    fn stop(&mut self, fade_frames: usize) {
        if !self.active {
            return;
        }
        match self.envelope {
            Envelope::FadeOut { .. } => {}
            _ if fade_frames > 0 => self.envelope = Envelope::FadeOut { position: 0 },
            _ => self.active = false,
        }
    }

    /// Reads the next frames of the voice into `block` as mono, with the
    /// envelope applied. Returns the number of frames written; fewer than
    /// requested means the voice ended.
    fn render(&mut self, block: &mut [f32], fade_frames: usize) -> usize {
        let Some(sample) = self.sample.as_deref() else {
            self.active = false;
            return 0;
        };

        let mut frames = block.len().min(self.end.saturating_sub(self.current));
        if let Envelope::FadeOut { position } = self.envelope {
            frames = frames.min(fade_frames.saturating_sub(position));
        }

        for (offset, value) in block[..frames].iter_mut().enumerate() {
            *value = sample.mono_frame(self.current + offset);
        }
        self.current += frames;

        match self.envelope {
            Envelope::Steady => {}
            Envelope::FadeIn { position } => {
                fade_in_linear(&mut block[..frames], position, fade_frames);
                self.envelope = if position + frames >= fade_frames {
                    Envelope::Steady
                } else {
                    Envelope::FadeIn {
                        position: position + frames,
                    }
                };
            }
            Envelope::FadeOut { position } => {
                fade_out_linear(&mut block[..frames], position, fade_frames);
                if position + frames >= fade_frames {
                    self.active = false;
                }
                self.envelope = Envelope::FadeOut {
                    position: position + frames,
                };
            }
        }

        if self.current >= self.end {
            self.active = false;
        }
        frames
    }
}

/// A fixed pool of playback channels summed into the output buffer.
pub struct ChannelMixer {
    channels: Vec<Channel>,
    master_volume: f32,
    /// Length of the start/stop fades in frames.
    fade_frames: usize,
    scratch: Vec<f32>,
}

impl ChannelMixer {
    /// Creates a mixer with a fixed number of channels. All allocation happens here.
    pub fn new(channel_count: usize, fade_frames: usize) -> ChannelMixer {
        ChannelMixer {
            channels: (0..channel_count).map(|_| Channel::new()).collect(),
            master_volume: 1.0,
            fade_frames,
            scratch: vec![0.0; SCRATCH_FRAMES],
        }
    }

    /// Returns the number of channels in the pool.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Returns the channel at the given index.
    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    /// Returns the number of channels currently sounding.
    pub fn active_count(&self) -> usize {
        self.channels.iter().filter(|c| c.active).count()
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    fn channel_mut(&mut self, index: usize) -> Result<&mut Channel, MixerError> {
        let count = self.channels.len();
        self.channels.get_mut(index).ok_or_else(|| {
            error!(channel = index, channels = count, "Invalid channel index");
            MixerError::InvalidIndex(index, count)
        })
    }

    /// Dedicates a channel to a single owner, such as the metronome. Reserved
    /// channels can only be started through `play_reserved`.
    pub fn reserve_channel(&mut self, index: usize) -> Result<(), MixerError> {
        self.channel_mut(index)?.reserved = true;
        debug!(channel = index, "Reserved channel");
        Ok(())
    }

    /// Starts a sample on an unreserved channel. Returns the sample handle the
    /// channel held before, so the caller decides where it gets released.
    pub fn play(
        &mut self,
        index: usize,
        sample: Arc<Sample>,
    ) -> Result<Option<Arc<Sample>>, MixerError> {
        let fade_frames = self.fade_frames;
        let channel = self.channel_mut(index)?;
        if channel.reserved {
            error!(channel = index, "Refusing to play on a reserved channel");
            return Err(MixerError::Reserved(index));
        }
        Ok(channel.start(sample, fade_frames))
    }

    /// Starts a sample on a reserved channel.
    pub fn play_reserved(
        &mut self,
        index: usize,
        sample: Arc<Sample>,
    ) -> Result<Option<Arc<Sample>>, MixerError> {
        let fade_frames = self.fade_frames;
        let channel = self.channel_mut(index)?;
        if !channel.reserved {
            error!(channel = index, "Channel is not reserved");
            return Err(MixerError::NotReserved(index));
        }
        Ok(channel.start(sample, fade_frames))
    }

    /// Stops a channel, fading it out if fades are enabled. Stopping a silent channel is a no-op.
    pub fn stop(&mut self, index: usize) -> Result<(), MixerError> {
        let fade_frames = self.fade_frames;
        self.channel_mut(index)?.stop(fade_frames);
        Ok(())
    }

    /// Stops every channel.
    pub fn stop_all(&mut self) {
        let fade_frames = self.fade_frames;
        self.channels.iter_mut().for_each(|c| c.stop(fade_frames));
    }

    pub fn set_channel_muted(&mut self, index: usize, muted: bool) -> Result<(), MixerError> {
        self.channel_mut(index)?.muted = muted;
        Ok(())
    }

    /// Sets the channel volume, clamped to [0, 1].
    pub fn set_channel_volume(&mut self, index: usize, volume: f32) -> Result<(), MixerError> {
        let channel = self.channel_mut(index)?;
        channel.volume = clamp_or(volume, 0.0, 1.0, channel.volume);
        Ok(())
    }

    /// Sets the channel pan, clamped to [-1, 1].
    pub fn set_channel_pan(&mut self, index: usize, pan: f32) -> Result<(), MixerError> {
        let channel = self.channel_mut(index)?;
        channel.pan = clamp_or(pan, -1.0, 1.0, channel.pan);
        channel.gains = pan_gains(channel.pan);
        Ok(())
    }

    /// Unmutes every channel.
    pub fn reset_mute(&mut self) {
        self.channels.iter_mut().for_each(|c| c.muted = false);
    }

    /// Sets the master volume, clamped to [0, 1].
    pub fn set_master_volume(&mut self, volume: f32) {
        self.master_volume = clamp_or(volume, 0.0, 1.0, self.master_volume);
    }

    /// Mixes every active channel into `output`, which holds `frames`
    /// interleaved frames of `output_channels` channels. The buffer is
    /// overwritten, so silent channels produce silence.
    ///
    /// Each voice is downmixed to mono and spread with an equal-power pan
    /// law: even output channels take the left gain and odd ones the right.
    /// A mono output ignores pan.
    pub fn mix(&mut self, output: &mut [f32], frames: usize, output_channels: usize) {
        if output_channels == 0 {
            return;
        }
        let frames = frames.min(output.len() / output_channels);
        let output = &mut output[..frames * output_channels];
        output.fill(0.0);

        let fade_frames = self.fade_frames;
        let scratch = &mut self.scratch;
        for channel in self.channels.iter_mut().filter(|c| c.active) {
            let mut done = 0;
            while done < frames && channel.active {
                let block = (frames - done).min(scratch.len());
                let rendered = channel.render(&mut scratch[..block], fade_frames);
                if !channel.muted {
                    let (left, right) = if output_channels == 1 {
                        (1.0, 1.0)
                    } else {
                        channel.gains
                    };
                    let (left, right) = (left * channel.volume, right * channel.volume);
                    let destination = &mut output[done * output_channels..];
                    for (value, frame) in scratch[..rendered]
                        .iter()
                        .zip(destination.chunks_exact_mut(output_channels))
                    {
                        for (index, out) in frame.iter_mut().enumerate() {
                            *out += value * if index % 2 == 0 { left } else { right };
                        }
                    }
                }
                done += rendered;
                if rendered < block {
                    break;
                }
            }
        }

        let gain = self.master_volume * OUTPUT_GAIN;
        for value in output.iter_mut() {
            *value = (*value * gain).clamp(-1.0, 1.0);
        }
    }
}

/// Clamps a parameter, keeping the previous value for NaN.
fn clamp_or(value: f32, min: f32, max: f32, previous: f32) -> f32 {
    if value.is_nan() {
        error!("Ignoring NaN parameter");
        return previous;
    }
    value.clamp(min, max)
}

impl std::fmt::Debug for ChannelMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelMixer")
            .field("channels", &self.channels.len())
            .field("active", &self.active_count())
            .field("master_volume", &self.master_volume)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(values: Vec<f32>) -> Arc<Sample> {
        Arc::new(Sample::mono(values, 44100))
    }

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-5,
            "expected {} got {}",
            expected,
            actual
        );
    }

    #[test]
    fn test_silent_pool_yields_zeros() {
        let mut mixer = ChannelMixer::new(8, 0);
        let mut output = vec![0.7f32; 512 * 2];
        mixer.mix(&mut output, 512, 2);
        assert_eq!(output.len(), 1024);
        assert!(output.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_basic_mixing() {
        let mut mixer = ChannelMixer::new(4, 0);
        mixer.play(0, sample(vec![0.5, 0.25])).unwrap();

        let mut output = vec![0.0f32; 4 * 2];
        mixer.mix(&mut output, 4, 2);

        let center = FRAC_PI_4.cos() * OUTPUT_GAIN;
        assert_close(output[0], 0.5 * center);
        assert_close(output[1], 0.5 * center);
        assert_close(output[2], 0.25 * center);
        assert_close(output[3], 0.25 * center);
        // Sample ran out after two frames.
        assert!(output[4..].iter().all(|v| *v == 0.0));
        assert!(!mixer.channel(0).unwrap().is_active());
    }

    #[test]
    fn test_multiple_channels_sum() {
        let mut mixer = ChannelMixer::new(4, 0);
        mixer.play(0, sample(vec![0.5])).unwrap();
        mixer.play(1, sample(vec![0.2])).unwrap();

        let mut output = vec![0.0f32; 1];
        mixer.mix(&mut output, 1, 1);
        assert_close(output[0], 0.7 * OUTPUT_GAIN);
    }

    #[test]
    fn test_pan_law() {
        let mut mixer = ChannelMixer::new(2, 0);
        mixer.set_channel_pan(0, -1.0).unwrap();
        mixer.play(0, sample(vec![1.0])).unwrap();

        let mut output = vec![0.0f32; 4];
        mixer.mix(&mut output, 1, 4);
        assert_close(output[0], OUTPUT_GAIN);
        assert_close(output[1], 0.0);
        assert_close(output[2], OUTPUT_GAIN);
        assert_close(output[3], 0.0);

        mixer.set_channel_pan(0, 5.0).unwrap();
        assert_eq!(mixer.channel(0).unwrap().pan(), 1.0);
        mixer.play(0, sample(vec![1.0])).unwrap();
        mixer.mix(&mut output, 1, 2);
        assert_close(output[0], 0.0);
        assert_close(output[1], OUTPUT_GAIN);
    }

    #[test]
    fn test_stereo_sample_downmix() {
        let mut mixer = ChannelMixer::new(1, 0);
        let stereo = Arc::new(Sample::new(vec![0.6, 0.2], 2, 44100));
        mixer.play(0, stereo).unwrap();

        let mut output = vec![0.0f32; 1];
        mixer.mix(&mut output, 1, 1);
        assert_close(output[0], 0.4 * OUTPUT_GAIN);
    }

    #[test]
    fn test_muted_channel_contributes_nothing() {
        let mut mixer = ChannelMixer::new(2, 0);
        mixer.set_channel_volume(0, 1.0).unwrap();
        mixer.set_channel_pan(0, 0.3).unwrap();
        mixer.set_channel_muted(0, true).unwrap();
        mixer.play(0, sample(vec![1.0; 64])).unwrap();

        let mut output = vec![0.0f32; 32 * 2];
        mixer.mix(&mut output, 32, 2);
        assert!(output.iter().all(|v| *v == 0.0));
        // The voice keeps running silently.
        assert_eq!(mixer.channel(0).unwrap().cursor(), (0, 32, 64));

        mixer.reset_mute();
        mixer.mix(&mut output, 32, 2);
        assert!(output.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_volume_and_master() {
        let mut mixer = ChannelMixer::new(1, 0);
        mixer.set_channel_volume(0, 0.5).unwrap();
        mixer.set_master_volume(0.5);
        mixer.play(0, sample(vec![1.0])).unwrap();

        let mut output = vec![0.0f32; 1];
        mixer.mix(&mut output, 1, 1);
        assert_close(output[0], 0.25 * OUTPUT_GAIN);

        mixer.set_channel_volume(0, -3.0).unwrap();
        assert_eq!(mixer.channel(0).unwrap().volume(), 0.0);
        mixer.set_channel_volume(0, f32::NAN).unwrap();
        assert_eq!(mixer.channel(0).unwrap().volume(), 0.0);
        mixer.set_master_volume(2.0);
        assert_eq!(mixer.master_volume(), 1.0);
    }

    #[test]
    fn test_hard_clip() {
        let mut mixer = ChannelMixer::new(4, 0);
        for index in 0..4 {
            mixer.play(index, sample(vec![1.0])).unwrap();
        }
        let mut output = vec![0.0f32; 1];
        mixer.mix(&mut output, 1, 1);
        assert_eq!(output[0], 1.0);
    }

    #[test]
    fn test_invalid_index_is_rejected() {
        let mut mixer = ChannelMixer::new(2, 0);
        assert_eq!(
            mixer.set_channel_volume(2, 0.5),
            Err(MixerError::InvalidIndex(2, 2))
        );
        assert_eq!(mixer.stop(9), Err(MixerError::InvalidIndex(9, 2)));
        assert!(mixer.play(5, sample(vec![1.0])).is_err());
        assert_eq!(mixer.active_count(), 0);
    }

    #[test]
    fn test_reserved_channel() {
        let mut mixer = ChannelMixer::new(2, 0);
        mixer.reserve_channel(1).unwrap();
        assert!(mixer.channel(1).unwrap().is_reserved());
        assert_eq!(
            mixer.play(1, sample(vec![1.0])),
            Err(MixerError::Reserved(1))
        );
        assert_eq!(
            mixer.play_reserved(0, sample(vec![1.0])),
            Err(MixerError::NotReserved(0))
        );
        mixer.play_reserved(1, sample(vec![1.0])).unwrap();
        assert!(mixer.channel(1).unwrap().is_active());
    }

    #[test]
    fn test_retrigger_cuts_and_returns_previous() {
        let mut mixer = ChannelMixer::new(1, 0);
        let first = sample(vec![1.0; 100]);
        assert!(mixer.play(0, first.clone()).unwrap().is_none());

        let mut output = vec![0.0f32; 10];
        mixer.mix(&mut output, 10, 1);
        assert_eq!(mixer.channel(0).unwrap().cursor(), (0, 10, 100));

        let previous = mixer.play(0, sample(vec![0.5; 4])).unwrap().unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert_eq!(mixer.channel(0).unwrap().cursor(), (0, 0, 4));
    }

    #[test]
    fn test_long_buffers_span_scratch() {
        let mut mixer = ChannelMixer::new(1, 0);
        mixer.play(0, sample(vec![0.5; 1000])).unwrap();
        let mut output = vec![0.0f32; 1200];
        mixer.mix(&mut output, 1200, 1);
        assert!(output[..1000].iter().all(|v| (*v - 0.5 * OUTPUT_GAIN).abs() < 1e-6));
        assert!(output[1000..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_fades() {
        let mut block = vec![1.0f32; 4];
        fade_in_linear(&mut block, 0, 4);
        assert_eq!(block, vec![0.0, 0.25, 0.5, 0.75]);

        let mut block = vec![1.0f32; 4];
        fade_in_linear(&mut block, 2, 4);
        assert_eq!(block, vec![0.5, 0.75, 1.0, 1.0]);

        let mut block = vec![1.0f32; 6];
        fade_out_linear(&mut block, 0, 4);
        assert_eq!(block, vec![1.0, 0.75, 0.5, 0.25, 0.0, 0.0]);
    }

    #[test]
    fn test_voice_fades_at_start_and_stop() {
        let mut mixer = ChannelMixer::new(1, 4);
        mixer.play(0, sample(vec![1.0; 100])).unwrap();

        let mut output = vec![0.0f32; 6];
        mixer.mix(&mut output, 6, 1);
        let expected = [0.0, 0.25, 0.5, 0.75, 1.0, 1.0];
        for (actual, expected) in output.iter().zip(expected) {
            assert_close(*actual, expected * OUTPUT_GAIN);
        }

        mixer.stop(0).unwrap();
        mixer.stop(0).unwrap();
        assert!(mixer.channel(0).unwrap().is_active());
        mixer.mix(&mut output, 6, 1);
        let expected = [1.0, 0.75, 0.5, 0.25, 0.0, 0.0];
        for (actual, expected) in output.iter().zip(expected) {
            assert_close(*actual, expected * OUTPUT_GAIN);
        }
        assert!(!mixer.channel(0).unwrap().is_active());

        // Stopping a silent channel is a no-op.
        mixer.stop(0).unwrap();
        assert!(!mixer.channel(0).unwrap().is_active());
    }
}
