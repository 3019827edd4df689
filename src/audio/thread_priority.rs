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
use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the audio callback thread when DRUMGRID_THREAD_PRIORITY is unset.
const DEFAULT_CALLBACK_THREAD_PRIORITY: u8 = 70;

const PRIORITY_VAR: &str = "DRUMGRID_THREAD_PRIORITY";
const DISABLE_RT_VAR: &str = "DRUMGRID_DISABLE_RT_AUDIO";

/// Raises the priority of whichever thread first renders audio.
///
/// The environment is read when the output starts so the callback never
/// touches it.
#[derive(Debug)]
pub struct AudioThreadPriority {
    priority: Option<ThreadPriorityValue>,
    rt_audio: bool,
    applied: bool,
}

impl AudioThreadPriority {
    /// Reads DRUMGRID_THREAD_PRIORITY (0-99) and DRUMGRID_DISABLE_RT_AUDIO.
    pub fn from_env() -> AudioThreadPriority {
        let priority = std::env::var(PRIORITY_VAR).ok();
        let disable_rt = std::env::var(DISABLE_RT_VAR).ok();
        AudioThreadPriority {
            priority: parse_priority(priority.as_deref()),
            rt_audio: !disable_rt.as_deref().is_some_and(parse_flag),
            applied: false,
        }
    }

    /// Applies the priority to the current thread. Only the first call does anything.
    pub fn apply_once(&mut self) {
        if self.applied {
            return;
        }
        self.applied = true;

        let Some(priority) = self.priority else {
            warn!("No valid audio thread priority, leaving scheduling unchanged");
            return;
        };
        let tp = ThreadPriority::Crossplatform(priority);
        if let Err(e) = set_current_thread_priority(tp) {
            warn!(error = ?e, "Failed to raise audio thread priority");
        }

        #[cfg(unix)]
        if self.rt_audio {
            use thread_priority::unix::{
                set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
                ThreadSchedulePolicy,
            };
            match set_thread_priority_and_policy(
                thread_native_id(),
                tp,
                ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
            ) {
                Ok(()) => info!("Enabled RT SCHED_FIFO for audio thread"),
                Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for audio thread"),
            }
        }
    }
}

fn parse_priority(value: Option<&str>) -> Option<ThreadPriorityValue> {
    let priority = value
        .and_then(|v| v.trim().parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_CALLBACK_THREAD_PRIORITY);
    ThreadPriorityValue::try_from(priority).ok()
}

fn parse_flag(value: &str) -> bool {
    let value = value.trim();
    value == "1"
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("on")
}
