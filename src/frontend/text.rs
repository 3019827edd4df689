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
use std::io;
use std::str::FromStr;

use duration_string::DurationString;
use tracing::{info, span, warn, Level};

use super::Frontend;
use crate::control::{ControlError, Controller};

const PLAY: &str = "play";
const CLICK: &str = "click";
const STOP: &str = "stop";
const BPM: &str = "bpm";
const TOGGLE: &str = "toggle";
const HIT: &str = "hit";
const GEN: &str = "gen";
const QUANTIZE: &str = "quantize";
const RES: &str = "res";
const VOL: &str = "vol";
const PAN: &str = "pan";
const MUTE: &str = "mute";
const UNMUTE: &str = "unmute";
const MASTER: &str = "master";
const DELAY: &str = "delay";
const BAR: &str = "bar";
const ADD_BAR: &str = "addbar";
const REMOVE_BAR: &str = "rmbar";
const CLEAR: &str = "clear";
const SHOW: &str = "show";
const HELP: &str = "help";
const QUIT: &str = "quit";

const USAGE: &str = "\
play | click | stop | bpm N | toggle BAR SOUND STEP | hit SOUND | gen BAR SOUND
quantize [SOUND] | res rec|play N | vol CH V | pan CH P | mute CH | unmute
master V | delay on|off|time T|feedback F|gain G | bar B | addbar [STEPS]
rmbar B | clear B | show | help | quit";

/// A line-oriented front end over any reader and writer.
pub struct TextFrontend<R, W> {
    reader: R,
    writer: W,
}

/// What to do after a command line.
#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Quit,
}

/// Input that couldn't be turned into a command.
#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unable to parse {0:?}")]
    Parse(String),

    #[error("unknown command {0:?}, try help")]
    Unknown(String),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TextFrontend<io::StdinLock<'static>, io::Stdout> {
    /// A front end on the process's standard input and output.
    pub fn stdio() -> Self {
        TextFrontend::new(io::stdin().lock(), io::stdout())
    }
}

impl<R, W> TextFrontend<R, W>
where
    R: io::BufRead,
    W: io::Write,
{
    pub fn new(reader: R, writer: W) -> Self {
        TextFrontend { reader, writer }
    }

    /// Consumes the front end, returning the writer.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn handle(&mut self, controller: &mut Controller, line: &str) -> Result<Flow, CommandError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((command, args)) = words.split_first() else {
            return Ok(Flow::Continue);
        };

        match command.to_lowercase().as_str() {
            PLAY => {
                let playing = controller.toggle_play()?;
                self.display_message(if playing { "Playing" } else { "Stopped" })?;
            }
            CLICK => {
                let clicking = controller.toggle_click()?;
                self.display_message(if clicking { "Metronome on" } else { "Metronome off" })?;
            }
            STOP => controller.stop_all_sounds()?,
            BPM => {
                let [bpm] = args else {
                    return Err(CommandError::Usage("bpm N"));
                };
                controller.set_bpm(parse(bpm)?)?;
            }
            TOGGLE => {
                let [bar, sound, step] = args else {
                    return Err(CommandError::Usage("toggle BAR SOUND STEP"));
                };
                controller.toggle_sound_step(parse(bar)?, parse(sound)?, parse(step)?)?;
                self.display_grid(controller)?;
            }
            HIT => {
                let [sound] = args else {
                    return Err(CommandError::Usage("hit SOUND"));
                };
                let step = controller.record_hit(parse(sound)?)?;
                self.display_message(&format!("Recorded step {}", step))?;
            }
            GEN => {
                let [bar, sound] = args else {
                    return Err(CommandError::Usage("gen BAR SOUND"));
                };
                controller.gen_steps_from_sound(parse(bar)?, parse(sound)?)?;
                self.display_grid(controller)?;
            }
            QUANTIZE => {
                match args {
                    [] => controller.quantize_played_steps()?,
                    [sound] => controller.quantize_steps_from_sound(parse(sound)?)?,
                    _ => return Err(CommandError::Usage("quantize [SOUND]")),
                }
                self.display_grid(controller)?;
            }
            RES => match args {
                ["rec", resolution] => controller.set_record_resolution(parse(resolution)?)?,
                ["play", resolution] => controller.set_play_resolution(parse(resolution)?)?,
                _ => return Err(CommandError::Usage("res rec|play N")),
            },
            VOL => {
                let [channel, volume] = args else {
                    return Err(CommandError::Usage("vol CH V"));
                };
                controller.set_channel_volume(parse(channel)?, parse(volume)?)?;
            }
            PAN => {
                let [channel, pan] = args else {
                    return Err(CommandError::Usage("pan CH P"));
                };
                controller.set_channel_pan(parse(channel)?, parse(pan)?)?;
            }
            MUTE => {
                let [channel] = args else {
                    return Err(CommandError::Usage("mute CH"));
                };
                controller.set_channel_muted(parse(channel)?, true)?;
            }
            UNMUTE => controller.reset_mute()?,
            MASTER => {
                let [volume] = args else {
                    return Err(CommandError::Usage("master V"));
                };
                controller.set_master_volume(parse(volume)?)?;
            }
            DELAY => {
                let mut settings = controller.delay_settings();
                match args {
                    ["on"] => settings.enabled = true,
                    ["off"] => settings.enabled = false,
                    ["time", time] => {
                        settings.time = DurationString::from_string(time.to_string())
                            .map_err(|_| CommandError::Parse(time.to_string()))?
                            .into()
                    }
                    ["feedback", feedback] => settings.feedback = parse(feedback)?,
                    ["gain", gain] => settings.gain = parse(gain)?,
                    _ => return Err(CommandError::Usage("delay on|off|time T|feedback F|gain G")),
                }
                controller.set_delay(settings)?;
            }
            BAR => {
                let [bar] = args else {
                    return Err(CommandError::Usage("bar B"));
                };
                controller.select_bar(parse(bar)?)?;
                self.display_grid(controller)?;
            }
            ADD_BAR => {
                let steps = match args {
                    [] => controller.pattern().steps_in_bar(controller.current_bar()),
                    [steps] => parse(steps)?,
                    _ => return Err(CommandError::Usage("addbar [STEPS]")),
                };
                let bar = controller.add_bar(steps)?;
                self.display_message(&format!("Added bar {}", bar))?;
            }
            REMOVE_BAR => {
                let [bar] = args else {
                    return Err(CommandError::Usage("rmbar B"));
                };
                controller.remove_bar(parse(bar)?)?;
            }
            CLEAR => {
                let [bar] = args else {
                    return Err(CommandError::Usage("clear B"));
                };
                controller.clear_bar(parse(bar)?)?;
            }
            SHOW => self.display_grid(controller)?,
            HELP => self.display_message(USAGE)?,
            QUIT => return Ok(Flow::Quit),
            other => return Err(CommandError::Unknown(other.to_string())),
        }
        Ok(Flow::Continue)
    }
}

fn parse<T: FromStr>(value: &str) -> Result<T, CommandError> {
    value
        .parse()
        .map_err(|_| CommandError::Parse(value.to_string()))
}

impl<R, W> Frontend for TextFrontend<R, W>
where
    R: io::BufRead,
    W: io::Write,
{
    fn init(&mut self) -> Result<(), io::Error> {
        writeln!(self.writer, "drumgrid. Commands:\n{}", USAGE)?;
        self.writer.flush()
    }

    fn run(&mut self, controller: &mut Controller) -> Result<(), io::Error> {
        let span = span!(Level::INFO, "text frontend");
        let _enter = span.enter();
        info!("Text frontend started.");

        let mut input = String::new();
        loop {
            write!(self.writer, "> ")?;
            self.writer.flush()?;

            input.clear();
            if self.reader.read_line(&mut input)? == 0 {
                return Ok(());
            }

            match self.handle(controller, input.trim()) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => return Ok(()),
                Err(CommandError::Io(e)) => return Err(e),
                Err(e) => {
                    warn!(input = input.trim(), err = %e, "Command failed");
                    self.display_message(&format!("error: {}", e))?;
                }
            }
        }
    }

    fn close(&mut self) -> Result<(), io::Error> {
        writeln!(self.writer, "Bye.")?;
        self.writer.flush()
    }

    fn display_message(&mut self, message: &str) -> Result<(), io::Error> {
        writeln!(self.writer, "{}", message)
    }

    fn display_grid(&mut self, controller: &Controller) -> Result<(), io::Error> {
        let bar_index = controller.current_bar();
        writeln!(
            self.writer,
            "bpm {:.1} | {} | click {} | bar {}/{} | step {}",
            controller.bpm(),
            if controller.is_playing() { "playing" } else { "stopped" },
            if controller.is_clicking() { "on" } else { "off" },
            bar_index,
            controller.pattern().bars(),
            controller.current_step(),
        )?;
        let Some(bar) = controller.pattern_bar(bar_index) else {
            return Ok(());
        };
        for sound in 0..controller.pattern().sounds() {
            let row: String = bar
                .row(sound)
                .unwrap_or_default()
                .iter()
                .enumerate()
                .map(|(step, on)| {
                    let cell = if *on { 'x' } else { '.' };
                    if step > 0 && step % 4 == 0 {
                        format!(" {}", cell)
                    } else {
                        cell.to_string()
                    }
                })
                .collect();
            writeln!(self.writer, "{:>3} {}", sound, row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;

    use super::*;
    use crate::control::EngineSettings;
    use crate::quantizer::Resolution;
    use crate::sample::SampleBank;

    fn run(input: &str) -> (Controller, String) {
        let settings = EngineSettings::default();
        let (mut controller, renderer) =
            Controller::create(&settings, &SampleBank::new(settings.sounds)).unwrap();
        // Keep the renderer alive so commands can be queued.
        let _renderer = renderer;

        let mut frontend = TextFrontend::new(BufReader::new(input.as_bytes()), Vec::new());
        frontend.init().unwrap();
        frontend.run(&mut controller).unwrap();
        frontend.close().unwrap();
        let output = String::from_utf8(frontend.into_writer()).unwrap();
        (controller, output)
    }

    #[test]
    fn test_commands() {
        let (controller, output) = run(
            "toggle 0 1 2\nbpm 90\nplay\nclick\nres play 8\nres rec 32\n\
             vol 1 0.5\npan 1 -1\nmute 2\nmaster 0.7\ndelay on\ndelay time 125ms\n",
        );
        assert!(controller.note(0, 1, 2).unwrap());
        assert_eq!(controller.bpm(), 90.0);
        assert!(controller.is_playing());
        assert!(controller.is_clicking());
        assert_eq!(controller.play_resolution(), Resolution::Eighth);
        assert_eq!(controller.record_resolution(), Resolution::ThirtySecond);
        assert_eq!(controller.channel_settings(1).unwrap().volume, 0.5);
        assert_eq!(controller.channel_settings(1).unwrap().pan, -1.0);
        assert!(controller.channel_settings(2).unwrap().muted);
        assert_eq!(controller.master_volume(), 0.7);
        assert!(controller.delay_settings().enabled);
        assert_eq!(
            controller.delay_settings().time,
            std::time::Duration::from_millis(125)
        );
        assert!(output.contains("Playing"));
        assert!(output.contains("Metronome on"));
        assert!(output.contains("  1 ..x. .... .... ...."));
    }

    #[test]
    fn test_bars_and_generation() {
        let (controller, output) = run("addbar 8\nbar 1\ngen 1 0\nshow\nquit\nplay\n");
        assert_eq!(controller.current_bar(), 1);
        assert!(controller.note(1, 0, 0).unwrap());
        assert!(controller.note(1, 0, 1).unwrap());
        assert!(output.contains("Added bar 1"));
        assert!(output.contains("bar 1/2"));
        assert!(output.contains("  0 xxxx xxxx"));
        // Nothing after quit runs.
        assert!(!controller.is_playing());
    }

    #[test]
    fn test_errors_are_reported() {
        let (controller, output) = run("bogus\nbpm\nbpm fast\nbpm 0\ntoggle 0 99 0\nres rec 5\n");
        assert_eq!(controller.bpm(), 120.0);
        assert!(output.contains("unknown command \"bogus\""));
        assert!(output.contains("usage: bpm N"));
        assert!(output.contains("unable to parse \"fast\""));
        assert!(output.contains("error: sound 99 out of range"));
        assert_eq!(output.matches("error:").count(), 6);
    }
}
