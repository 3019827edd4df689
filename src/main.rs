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
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use drumgrid::audio;
use drumgrid::config::Session;
use drumgrid::control::Controller;
use drumgrid::frontend::text::TextFrontend;
use drumgrid::frontend::Frontend;
use drumgrid::samples::SampleLoader;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A step-sequencer drum machine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Starts a session and reads commands from standard input.
    Start {
        /// The path to the session file.
        session: String,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    // Logs go to stderr so they don't interleave with the text frontend.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Start { session } => {
            let session = Session::deserialize(&PathBuf::from(&session))?;
            let settings = session.engine_settings()?;

            let mut loader = SampleLoader::new(settings.sample_rate);
            let bank = loader.load_bank(
                settings.sounds,
                &session.sound_files(),
                session.click_file().as_deref(),
            )?;
            info!(loader = ?loader, "Samples loaded");

            let (mut controller, renderer) = Controller::create(&settings, &bank)?;
            let device = audio::get_device(session.audio())?;
            info!(device = %device, "Starting output");
            let output = device.start(renderer)?;

            let mut frontend = TextFrontend::stdio();
            frontend.init()?;
            let result = frontend.run(&mut controller);
            frontend.close()?;
            output.stop();
            result?;
        }
    }

    Ok(())
}
