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
use serde::Deserialize;

const DEFAULT_OSC_PORT: u16 = 14441;
const DEFAULT_QUEUE_ADDRESS: &str = "/tickseq/queue";
const DEFAULT_BPM_ADDRESS: &str = "/tickseq/bpm";
const DEFAULT_RESET_ADDRESS: &str = "/tickseq/reset";
const DEFAULT_STOP_ADDRESS: &str = "/tickseq/stop";

/// Allows users to specify how the sequencer is controlled.
#[derive(Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Controller {
    Osc(OscController),
}

/// The configuration of the OSC control surface.
#[derive(Deserialize, Clone, Default)]
pub struct OscController {
    /// The UDP port to listen on.
    port: Option<u16>,
    /// The OSC address that queues notes for an output.
    queue: Option<String>,
    /// The OSC address that sets the tempo.
    bpm: Option<String>,
    /// The OSC address that restarts every loop.
    reset: Option<String>,
    /// The OSC address that clears every output.
    stop: Option<String>,
}

impl OscController {
    /// Creates an OSC controller configuration with every value defaulted.
    pub fn new() -> OscController {
        OscController::default()
    }

    /// Gets the port.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_OSC_PORT)
    }

    /// Gets the queue address.
    pub fn queue(&self) -> String {
        self.queue
            .clone()
            .unwrap_or(DEFAULT_QUEUE_ADDRESS.to_string())
    }

    /// Gets the tempo address.
    pub fn bpm(&self) -> String {
        self.bpm.clone().unwrap_or(DEFAULT_BPM_ADDRESS.to_string())
    }

    /// Gets the reset address.
    pub fn reset(&self) -> String {
        self.reset
            .clone()
            .unwrap_or(DEFAULT_RESET_ADDRESS.to_string())
    }

    /// Gets the stop address.
    pub fn stop(&self) -> String {
        self.stop.clone().unwrap_or(DEFAULT_STOP_ADDRESS.to_string())
    }
}
