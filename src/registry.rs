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
use std::{collections::HashMap, time::Instant};

use tracing::{info, warn};

use crate::{
    notes::{NoteRequest, ScheduledNote},
    player::OutputPlayer,
};

/// The notes due on a single tick, keyed by output name. Outputs with nothing due are absent.
pub type DueNotes = HashMap<String, Vec<ScheduledNote>>;

/// Everything a single registry tick produced.
#[derive(Debug, Default)]
pub struct Tick {
    /// The notes that became due.
    pub due: DueNotes,
    /// The sorted names of the outputs whose loop restarted on this tick.
    pub loop_starts: Vec<String>,
    /// The sorted names of the outputs that had more than one note due on this tick.
    pub overflows: Vec<String>,
}

impl Tick {
    /// Returns true if the tick produced nothing to deliver.
    pub fn is_empty(&self) -> bool {
        self.due.is_empty() && self.loop_starts.is_empty()
    }
}

/// Keeps one player per output. Players are created the first time an output is queued and are
/// never removed.
#[derive(Default)]
pub struct PlayerRegistry {
    players: HashMap<String, OutputPlayer>,
}

impl PlayerRegistry {
    /// Creates an empty registry.
    pub fn new() -> PlayerRegistry {
        PlayerRegistry {
            players: HashMap::new(),
        }
    }

    /// Replaces the pending notes of the given output, creating its player if needed.
    pub fn queue(&mut self, output: &str, notes: Vec<NoteRequest>) {
        if !self.players.contains_key(output) {
            info!(output, "Creating player for new output.");
        }

        self.players
            .entry(output.to_string())
            .or_insert_with(|| OutputPlayer::new(output))
            .queue(notes);
    }

    /// Collects the due notes and loop restarts of every player.
    pub fn tick(&mut self, now: Instant, bpm: u32) -> Tick {
        let mut tick = Tick::default();
        for (name, player) in self.players.iter_mut() {
            let loop_count = player.loop_count();
            let due = player.due_notes(now, bpm);
            if player.loop_count() != loop_count {
                tick.loop_starts.push(name.clone());
            }
            if due.is_empty() {
                continue;
            }
            if due.len() > 1 {
                warn!(
                    output = name,
                    count = due.len(),
                    bpm,
                    "Note overflow: more than one note due in a single tick."
                );
                tick.overflows.push(name.clone());
            }
            tick.due.insert(name.clone(), due);
        }
        tick.loop_starts.sort();
        tick.overflows.sort();
        tick
    }

    /// Restarts every player's loop from its pending set on the next tick.
    pub fn reset(&mut self) {
        self.players.values_mut().for_each(OutputPlayer::reset);
    }

    /// Clears the pending and active sets of every player.
    pub fn hard_stop(&mut self) {
        self.players.values_mut().for_each(OutputPlayer::clear);
    }

    /// Gets the player for the given output.
    pub fn get(&self, output: &str) -> Option<&OutputPlayer> {
        self.players.get(output)
    }

    /// Returns the sorted names of all known outputs.
    pub fn outputs(&self) -> Vec<String> {
        let mut outputs: Vec<String> = self.players.keys().cloned().collect();
        outputs.sort();
        outputs
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
