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
use std::{error::Error, fmt};

use tracing::{debug, info, trace};

use crate::notes::ScheduledNote;

/// Writes emitted notes to the log. Used when no endpoint is configured.
pub struct Sink {}

impl Sink {
    pub fn new() -> Sink {
        Sink {}
    }
}

impl super::Sink for Sink {
    fn emit(&self, output: &str, notes: &[ScheduledNote]) -> Result<(), Box<dyn Error>> {
        for note in notes {
            info!(
                output,
                tone = note.tone(),
                amplitude = note.amplitude(),
                sustain = note.sustain(),
                beat = note.start_beat(),
                "Note."
            );
        }
        Ok(())
    }

    fn sync_pulse(&self) -> Result<(), Box<dyn Error>> {
        trace!("Sync pulse.");
        Ok(())
    }

    fn loop_start(&self, output: &str, bpm: u32) -> Result<(), Box<dyn Error>> {
        debug!(output, bpm, "Loop started.");
        Ok(())
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Log")
    }
}
