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
use std::{
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use tracing::{error, info, span, Level};

use super::thread_priority::AudioThreadPriority;
use super::{Output, OutputHandle, Renderer};
use crate::config;

/// A small wrapper around a cpal::Device with the stream settings from the
/// session.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
    /// The sample format the stream is opened with.
    sample_format: cpal::SampleFormat,
    /// Audio configuration for the stream.
    audio_config: config::Audio,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// f32 callback: render straight into the cpal buffer.
fn create_f32_callback(
    renderer: Arc<Mutex<Renderer>>,
    mut priority: AudioThreadPriority,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        priority.apply_once();
        renderer.lock().render(data);
    }
}

/// Integer callback: render into a float scratch buffer and convert.
fn create_int_callback<T: cpal::Sample + cpal::FromSample<f32>>(
    renderer: Arc<Mutex<Renderer>>,
    mut priority: AudioThreadPriority,
    buffer_samples: usize,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut scratch = vec![0.0f32; buffer_samples];
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        priority.apply_once();
        if scratch.len() < data.len() {
            // Only reached if the backend ignores the fixed buffer size.
            scratch.resize(data.len(), 0.0);
        }
        let scratch = &mut scratch[..data.len()];
        renderer.lock().render(scratch);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

impl Device {
    /// Lists cpal devices and produces the Output trait.
    pub fn list() -> Result<Vec<Box<dyn Output>>, Box<dyn Error>> {
        Ok(Device::list_cpal_devices()?
            .into_iter()
            .map(|device| {
                let device: Box<dyn Output> = Box::new(device);
                device
            })
            .collect())
    }

    /// Lists cpal devices with at least one output channel.
    fn list_cpal_devices() -> Result<Vec<Device>, Box<dyn Error>> {
        // Suppress noisy output here.
        let _shh_stdout = shh::stdout()?;
        let _shh_stderr = shh::stderr()?;

        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let Ok(output_configs) = device.supported_output_configs() else {
                    continue;
                };
                let max_channels = output_configs
                    .map(|config| config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device::new(device, host_id, max_channels, config::Audio::default())?);
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    fn new(
        device: cpal::Device,
        host_id: cpal::HostId,
        max_channels: u16,
        audio_config: config::Audio,
    ) -> Result<Device, Box<dyn Error>> {
        let sample_format = match device.default_output_config() {
            Ok(config) => config.sample_format(),
            Err(_) => cpal::SampleFormat::F32,
        };
        Ok(Device {
            name: device.name()?,
            max_channels,
            host_id,
            device,
            sample_format,
            audio_config,
        })
    }

    /// Gets the configured cpal device. The name "default" selects the
    /// default host's default output.
    pub fn get(config: &config::Audio) -> Result<Device, Box<dyn Error>> {
        let name = config.device();
        let mut device = if name == "default" {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or("no default output device")?;
            let max_channels = device
                .supported_output_configs()?
                .map(|config| config.channels())
                .max()
                .unwrap_or(0);
            Device::new(device, host.id(), max_channels, config.clone())?
        } else {
            Device::list_cpal_devices()?
                .into_iter()
                .find(|device| device.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name))?
        };

        if device.max_channels < config.channels() {
            return Err(format!(
                "{} channels requested, audio device {} only has {}",
                config.channels(),
                device.name,
                device.max_channels
            )
            .into());
        }
        device.audio_config = config.clone();
        Ok(device)
    }
}

impl Output for Device {
    fn start(&self, renderer: Renderer) -> Result<OutputHandle, Box<dyn Error>> {
        let channels = self.audio_config.channels();
        if renderer.output_channels() != channels as usize {
            return Err(format!(
                "renderer produces {} channels, device is configured for {}",
                renderer.output_channels(),
                channels
            )
            .into());
        }

        let stream_config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(self.audio_config.sample_rate()),
            buffer_size: cpal::BufferSize::Fixed(self.audio_config.buffer_size() as u32),
        };
        let buffer_samples = self.audio_config.buffer_size() * channels as usize;
        let renderer = Arc::new(Mutex::new(renderer));
        let stop = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = crossbeam_channel::bounded::<Result<(), String>>(1);

        let device = self.device.clone();
        let sample_format = self.sample_format;
        let name = self.name.clone();
        let join_handle = {
            let renderer = renderer.clone();
            let stop = stop.clone();
            // The stream is created and kept on its own thread.
            thread::Builder::new()
                .name("drumgrid-cpal-output".into())
                .spawn(move || {
                    let span = span!(Level::INFO, "output stream (cpal)", device = name);
                    let _enter = span.enter();
                    let priority = AudioThreadPriority::from_env();
                    let on_error = |err| error!("CPAL output stream error: {}", err);

                    let stream = match sample_format {
                        cpal::SampleFormat::I16 => device.build_output_stream(
                            &stream_config,
                            create_int_callback::<i16>(renderer, priority, buffer_samples),
                            on_error,
                            None,
                        ),
                        cpal::SampleFormat::I32 => device.build_output_stream(
                            &stream_config,
                            create_int_callback::<i32>(renderer, priority, buffer_samples),
                            on_error,
                            None,
                        ),
                        _ => device.build_output_stream(
                            &stream_config,
                            create_f32_callback(renderer, priority),
                            on_error,
                            None,
                        ),
                    };

                    let stream = match stream {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = started_tx.send(Err(format!("failed to create stream: {}", e)));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = started_tx.send(Err(format!("failed to start stream: {}", e)));
                        return;
                    }
                    info!(?sample_format, "CPAL output stream started");
                    let _ = started_tx.send(Ok(()));

                    // Keep the stream alive until stopped.
                    while !stop.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(100));
                    }
                    drop(stream);
                })?
        };

        match started_rx.recv() {
            Ok(Ok(())) => Ok(OutputHandle::new(renderer, stop, join_handle)),
            Ok(Err(e)) => {
                let _ = join_handle.join();
                Err(e.into())
            }
            Err(_) => {
                let _ = join_handle.join();
                Err("audio output thread exited before starting".into())
            }
        }
    }
}
