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
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::config;

pub mod clock;
pub mod cpal;
pub mod delay;
pub mod mixer;
pub mod mock;
pub mod render;
pub mod thread_priority;

pub use render::Renderer;

/// An audio output that drives a renderer.
pub trait Output: fmt::Display + Send + Sync {
    /// Starts calling the renderer once per hardware buffer. Rendering stops
    /// when the returned handle is stopped or dropped.
    fn start(&self, renderer: Renderer) -> Result<OutputHandle, Box<dyn Error>>;
}

/// A running output. Owns the renderer for as long as the output runs.
pub struct OutputHandle {
    renderer: Arc<Mutex<Renderer>>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl OutputHandle {
    pub(crate) fn new(
        renderer: Arc<Mutex<Renderer>>,
        stop: Arc<AtomicBool>,
        thread: thread::JoinHandle<()>,
    ) -> OutputHandle {
        OutputHandle {
            renderer,
            stop,
            thread: Some(thread),
        }
    }

    /// Returns the shared renderer.
    pub fn renderer(&self) -> &Arc<Mutex<Renderer>> {
        &self.renderer
    }

    /// Returns true while the output thread is alive.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the output and waits for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio output thread panicked");
            } else {
                info!("Audio output stopped");
            }
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<Box<dyn Output>>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets the output named in the configuration. Names starting with "mock"
/// select the mock device.
pub fn get_device(config: &config::Audio) -> Result<Arc<dyn Output>, Box<dyn Error>> {
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Arc::new(mock::Device::get(config)));
    };

    Ok(Arc::new(cpal::Device::get(config)?))
}
