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
use std::{collections::HashMap, path::Path, time::Duration};

use duration_string::DurationString;
use serde::Deserialize;

use super::{controller::Controller, midi::Midi, synth::Synth, ConfigError};

/// The default tempo.
pub const DEFAULT_BPM: u32 = 60;

/// The default interval between scheduler ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Environment variables with this prefix override file values, e.g. TICKSEQ_BPM=120.
const ENVIRONMENT_PREFIX: &str = "TICKSEQ";

/// Where the notes of an output are delivered.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Synth,
    Midi,
    Log,
}

/// The configuration for the sequencer.
#[derive(Deserialize, Clone, Default)]
pub struct Sequencer {
    /// The starting tempo.
    bpm: Option<u32>,
    /// The interval between scheduler ticks.
    tick_interval: Option<String>,
    /// The controller configuration.
    controller: Option<Controller>,
    /// The synthesis engine.
    synth: Option<Synth>,
    /// The MIDI output.
    midi: Option<Midi>,
    /// Maps output names to targets.
    #[serde(default)]
    routes: HashMap<String, Target>,
    /// The target for outputs without a route.
    default_target: Option<Target>,
}

impl Sequencer {
    /// Loads the configuration from a YAML file, applying environment overrides.
    pub fn load(path: &Path) -> Result<Sequencer, ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .add_source(
                ::config::Environment::with_prefix(ENVIRONMENT_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Creates a configuration with the given endpoints and every other value defaulted.
    pub fn new(synth: Option<Synth>, midi: Option<Midi>) -> Sequencer {
        Sequencer {
            synth,
            midi,
            ..Default::default()
        }
    }

    /// Gets the starting tempo.
    pub fn bpm(&self) -> Result<u32, ConfigError> {
        match self.bpm {
            Some(0) => Err(ConfigError::InvalidTempo(0)),
            Some(bpm) => Ok(bpm),
            None => Ok(DEFAULT_BPM),
        }
    }

    /// Gets the tick interval.
    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        let interval = match &self.tick_interval {
            Some(interval) => DurationString::from_string(interval.clone())?.into(),
            None => DEFAULT_TICK_INTERVAL,
        };
        if interval.is_zero() {
            return Err(ConfigError::InvalidTickInterval);
        }
        Ok(interval)
    }

    /// Gets the controller configuration.
    pub fn controller(&self) -> Option<&Controller> {
        self.controller.as_ref()
    }

    /// Gets the synthesis engine configuration.
    pub fn synth(&self) -> Option<&Synth> {
        self.synth.as_ref()
    }

    /// Gets the MIDI configuration.
    pub fn midi(&self) -> Option<&Midi> {
        self.midi.as_ref()
    }

    /// Gets the output routes.
    pub fn routes(&self) -> &HashMap<String, Target> {
        &self.routes
    }

    /// Gets the target for unrouted outputs. Prefers the synth, then MIDI, then logging.
    pub fn default_target(&self) -> Target {
        match self.default_target {
            Some(target) => target,
            None if self.synth.is_some() => Target::Synth,
            None if self.midi.is_some() => Target::Midi,
            None => Target::Log,
        }
    }
}
