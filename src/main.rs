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
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use tickseq::config;
use tickseq::controller::Controller;
use tickseq::notes::NoteRequest;
use tickseq::sequencer::Sequencer;
use tickseq::sink;
use tracing::{error, info};

const SYSTEMD_SERVICE: &str = r#"
[Unit]
Description=tempo synchronized note sequencer

[Service]
Type=simple
Restart=on-failure
EnvironmentFile=-/etc/default/tickseq
ExecStart=/usr/local/bin/tickseq start "$TICKSEQ_CONFIG"
ExecReload=/bin/kill -HUP $MAINPID

[Install]
WantedBy=multi-user.target
Alias=tickseq.service
"#;

/// The output the demo sequence plays on unless told otherwise.
const DEMO_OUTPUT: &str = "demo";

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A tempo synchronized looping note sequencer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start will start the sequencer and its controller.
    Start {
        /// The path to the sequencer config.
        config_path: String,
    },
    /// Loops a short demo sequence through the configured endpoints.
    Demo {
        /// The path to the sequencer config.
        config_path: String,
        /// The output to play the demo sequence on.
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Lists the available MIDI output devices.
    MidiDevices {},
    /// Prints a systemd service definition to stdout.
    Systemd {},
}

/// A short arpeggio as (tone, amplitude, sustain time, reserved time).
fn demo_sequence() -> Vec<NoteRequest> {
    [
        (440.0, 0.5, 0.4, 1.0),
        (1240.0, 1.0, 0.4, 0.8),
        (650.0, 0.25, 0.3, 1.0),
        (650.0, 0.25, 1.0, 1.0),
    ]
    .into_iter()
    .map(|(tone, amplitude, sustain, reserved)| {
        NoteRequest::new(tone, amplitude, sustain, reserved)
    })
    .collect()
}

/// Loads the configuration and starts a sequencer wired to its sinks.
fn start_sequencer(config: &config::Sequencer) -> Result<Arc<Sequencer>, Box<dyn Error>> {
    let sink = sink::from_config(config)?;
    let sequencer = Arc::new(Sequencer::new(
        config.bpm()?,
        config.tick_interval()?,
        sink,
    )?);
    sequencer.start()?;
    Ok(sequencer)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config_path } => {
            let config = config::Sequencer::load(&PathBuf::from(config_path))?;
            let sequencer = start_sequencer(&config)?;

            match config.controller() {
                Some(controller_config) => {
                    let mut controller =
                        Controller::from_config(controller_config, sequencer.clone())?;
                    tokio::select! {
                        result = controller.join() => {
                            if let Err(e) = result {
                                error!(err = e.to_string(), "Controller failed.");
                            }
                        }
                        result = tokio::signal::ctrl_c() => result?,
                    }
                }
                None => {
                    info!("No controller configured, running until interrupted.");
                    tokio::signal::ctrl_c().await?;
                }
            }

            sequencer.stop().await;
        }
        Commands::Demo {
            config_path,
            output,
        } => {
            let config = config::Sequencer::load(&PathBuf::from(config_path))?;
            let sequencer = start_sequencer(&config)?;

            let output = output.unwrap_or(DEMO_OUTPUT.to_string());
            info!(output, "Looping the demo sequence, interrupt to stop.");
            sequencer.queue(&output, demo_sequence())?;

            tokio::signal::ctrl_c().await?;
            sequencer.hard_stop()?;
            sequencer.stop().await;
        }
        Commands::MidiDevices {} => {
            let devices = sink::list_midi_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Systemd {} => {
            println!("{}", SYSTEMD_SERVICE)
        }
    }

    Ok(())
}
