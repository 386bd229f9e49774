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
use std::{collections::HashMap, net::SocketAddr};

use serde::Deserialize;

use super::ConfigError;

/// The address of a SuperCollider server on the default port.
const DEFAULT_SYNTH_ADDRESS: &str = "127.0.0.1:57110";

/// A YAML representation of the synthesis engine configuration.
#[derive(Deserialize, Clone, Default)]
pub struct Synth {
    /// The UDP address of the synthesis engine.
    address: Option<String>,

    /// Maps output names to synth definition names. Outputs without an entry use their own name.
    instruments: Option<HashMap<String, String>>,
}

impl Synth {
    /// Creates a synth configuration pointing at the given address.
    pub fn new(address: &str) -> Synth {
        Synth {
            address: Some(address.to_string()),
            instruments: None,
        }
    }

    /// Gets the address of the synthesis engine.
    pub fn address(&self) -> Result<SocketAddr, ConfigError> {
        let address = self
            .address
            .clone()
            .unwrap_or(DEFAULT_SYNTH_ADDRESS.to_string());
        address
            .parse()
            .map_err(|source| ConfigError::InvalidAddress { address, source })
    }

    /// Gets the output to synth definition mapping.
    pub fn instruments(&self) -> HashMap<String, String> {
        self.instruments.clone().unwrap_or_default()
    }
}
