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
use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt,
    time::Instant,
};

use parking_lot::Mutex;

use crate::notes::ScheduledNote;

/// A mock sink. Records everything it is handed.
pub struct Sink {
    name: String,
    emitted: Mutex<HashMap<String, Vec<(Instant, ScheduledNote)>>>,
    sync_pulses: Mutex<Vec<Instant>>,
    loop_starts: Mutex<HashMap<String, Vec<u32>>>,
    failing: Mutex<HashSet<String>>,
}

impl Sink {
    pub fn new(name: &str) -> Sink {
        Sink {
            name: name.to_string(),
            emitted: Mutex::new(HashMap::new()),
            sync_pulses: Mutex::new(Vec::new()),
            loop_starts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Makes every emit for the given output fail.
    pub fn fail_output(&self, output: &str) {
        self.failing.lock().insert(output.to_string());
    }

    /// Gets the notes emitted for the given output, in emission order.
    pub fn emitted(&self, output: &str) -> Vec<ScheduledNote> {
        self.emitted_at(output)
            .into_iter()
            .map(|(_, note)| note)
            .collect()
    }

    /// Gets the notes emitted for the given output along with when they arrived.
    pub fn emitted_at(&self, output: &str) -> Vec<(Instant, ScheduledNote)> {
        self.emitted.lock().get(output).cloned().unwrap_or_default()
    }

    /// Gets the number of sync pulses received.
    pub fn sync_pulses(&self) -> usize {
        self.sync_pulses.lock().len()
    }

    /// Gets the tempo of every loop start signaled for the given output.
    pub fn loop_starts(&self, output: &str) -> Vec<u32> {
        self.loop_starts.lock().get(output).cloned().unwrap_or_default()
    }
}

impl super::Sink for Sink {
    fn emit(&self, output: &str, notes: &[ScheduledNote]) -> Result<(), Box<dyn Error>> {
        if self.failing.lock().contains(output) {
            return Err(format!("mock failure for {}", output).into());
        }

        let now = Instant::now();
        self.emitted
            .lock()
            .entry(output.to_string())
            .or_default()
            .extend(notes.iter().map(|note| (now, *note)));
        Ok(())
    }

    fn sync_pulse(&self) -> Result<(), Box<dyn Error>> {
        self.sync_pulses.lock().push(Instant::now());
        Ok(())
    }

    fn loop_start(&self, output: &str, bpm: u32) -> Result<(), Box<dyn Error>> {
        self.loop_starts
            .lock()
            .entry(output.to_string())
            .or_default()
            .push(bpm);
        Ok(())
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
