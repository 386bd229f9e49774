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
use std::net::AddrParseError;

/// Errors raised while loading or validating the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("Invalid duration: {0}")]
    Duration(#[from] duration_string::Error),
    #[error("Tempo must be a positive number of beats per minute, got {0}")]
    InvalidTempo(u32),
    #[error("Tick interval must be greater than zero")]
    InvalidTickInterval,
    #[error("Invalid socket address '{address}': {source}")]
    InvalidAddress {
        address: String,
        source: AddrParseError,
    },
    #[error("MIDI channel must be between 1 and 16, got {0}")]
    InvalidMidiChannel(u8),
}
