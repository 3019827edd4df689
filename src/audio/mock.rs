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
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{info, span, Level};

use super::{Output, OutputHandle, Renderer};
use crate::config;

/// A mock device. Renders at the hardware buffer cadence and discards the audio.
#[derive(Clone)]
pub struct Device {
    name: String,
    sample_rate: u32,
    buffer_size: usize,
}

impl Device {
    /// Gets the given mock device.
    pub fn get(config: &config::Audio) -> Device {
        Device {
            name: config.device().to_string(),
            sample_rate: config.sample_rate().max(1),
            buffer_size: config.buffer_size().max(1),
        }
    }

    /// Returns the time covered by one buffer.
    pub fn buffer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.buffer_size as f64 / self.sample_rate as f64)
    }
}

impl Output for Device {
    fn start(&self, renderer: Renderer) -> Result<OutputHandle, Box<dyn Error>> {
        let channels = renderer.output_channels();
        let renderer = Arc::new(Mutex::new(renderer));
        let stop = Arc::new(AtomicBool::new(false));
        let period = self.buffer_duration();
        let buffer_size = self.buffer_size;
        let name = self.name.clone();

        let join_handle = {
            let renderer = renderer.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("drumgrid-mock-audio".into())
                .spawn(move || {
                    let span = span!(Level::INFO, "render (mock)", device = name);
                    let _enter = span.enter();
                    info!(buffer_size, channels, "Mock output started");

                    let mut buffer = vec![0.0f32; buffer_size * channels];
                    let mut deadline = Instant::now();
                    while !stop.load(Ordering::Acquire) {
                        renderer.lock().render(&mut buffer);

                        deadline += period;
                        let now = Instant::now();
                        if deadline > now {
                            spin_sleep::sleep(deadline - now);
                        } else {
                            deadline = now;
                        }
                    }
                })?
        };

        Ok(OutputHandle::new(renderer, stop, join_handle))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Controller, EngineSettings};
    use crate::sample::SampleBank;
    use crate::test::eventually;

    #[test]
    fn test_mock_renders_until_stopped() {
        let settings = EngineSettings::default();
        let (mut controller, renderer) =
            Controller::create(&settings, &SampleBank::new(settings.sounds)).unwrap();
        let device = Device::get(&config::Audio::new("mock-device"));
        assert_eq!(device.to_string(), "mock-device (Mock)");

        let handle = device.start(renderer).unwrap();
        assert!(handle.is_running());

        let status = controller.status().clone();
        eventually(|| status.buffers_rendered() > 3, "Mock device never rendered");

        controller.toggle_play().unwrap();
        eventually(|| status.is_running(), "Transport never started");
        eventually(|| status.current_step() > 0, "Clock never advanced");

        handle.stop();
        let rendered = status.buffers_rendered();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(status.buffers_rendered(), rendered);
    }
}
