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
use std::collections::HashMap;

use midly::num::u4;
use serde::Deserialize;

use super::ConfigError;

const DEFAULT_MIDI_CHANNEL: u8 = 1;

/// A YAML representation of the MIDI output configuration.
#[derive(Deserialize, Clone)]
pub struct Midi {
    /// The MIDI output device.
    device: String,

    /// The channel (1-16) notes are sent on unless the output has its own.
    channel: Option<u8>,

    /// Whether sync pulses are sent as MIDI timing clock.
    clock: Option<bool>,

    /// Per-output channel overrides.
    channels: Option<HashMap<String, u8>>,
}

impl Midi {
    /// New will create a new MIDI configuration.
    pub fn new(device: &str, channel: Option<u8>, clock: bool) -> Midi {
        Midi {
            device: device.to_string(),
            channel,
            clock: Some(clock),
            channels: None,
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Returns the default channel.
    pub fn channel(&self) -> Result<u4, ConfigError> {
        to_channel(self.channel.unwrap_or(DEFAULT_MIDI_CHANNEL))
    }

    /// Returns true if timing clock should be sent.
    pub fn clock(&self) -> bool {
        self.clock.unwrap_or(false)
    }

    /// Returns the per-output channels.
    pub fn channels(&self) -> Result<HashMap<String, u4>, ConfigError> {
        self.channels
            .iter()
            .flatten()
            .map(|(output, channel)| Ok((output.clone(), to_channel(*channel)?)))
            .collect::<Result<HashMap<String, u4>, ConfigError>>()
    }
}

/// Converts a one-based channel number to a MIDI channel.
fn to_channel(channel: u8) -> Result<u4, ConfigError> {
    if !(1..=16).contains(&channel) {
        return Err(ConfigError::InvalidMidiChannel(channel));
    }
    Ok(u4::from(channel - 1))
}
