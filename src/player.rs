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
use std::{mem, time::Instant};

use tracing::debug;

use crate::notes::{beats_to_duration, NoteRequest, ScheduledNote};

/// Plays back one output's note set in a loop.
///
/// The player holds two sets of notes: the pending set, which is whatever was last queued, and the
/// active set, which is the loop iteration currently being played. Due notes are drained from the
/// active set. Once the active set is empty, the pending set is promoted into a new active set and
/// the loop starts over. The same pending set is used over and over until it is replaced.
pub struct OutputPlayer {
    /// The name of the output this player feeds.
    name: String,
    /// The notes to promote on the next loop restart.
    pending: Vec<NoteRequest>,
    /// The notes of the current loop iteration that have not yet been reported, in promotion order.
    active: Vec<ScheduledNote>,
    /// The wall-clock anchor of the current loop iteration.
    loop_start: Option<Instant>,
    /// The reserved time of the last note of the previous iteration. The next iteration starts
    /// this many beats after it is promoted so the last note gets to finish.
    tail_offset: f64,
    /// The number of loop iterations promoted so far.
    loop_count: u64,
}

impl OutputPlayer {
    /// Creates a new, empty player.
    pub fn new(name: &str) -> OutputPlayer {
        OutputPlayer {
            name: name.to_string(),
            pending: Vec::new(),
            active: Vec::new(),
            loop_start: None,
            tail_offset: 0.0,
            loop_count: 0,
        }
    }

    /// Replaces the pending set. The active set keeps playing until it drains.
    pub fn queue(&mut self, notes: Vec<NoteRequest>) {
        self.pending = notes;
    }

    /// Returns the notes that are due at the given time, removing them from the active set. If the
    /// active set is empty, the pending set is promoted first with the loop anchored at `now`. A
    /// note whose due time can't be represented is never due.
    pub fn due_notes(&mut self, now: Instant, bpm: u32) -> Vec<ScheduledNote> {
        if self.active.is_empty() {
            self.promote(now);
        }

        let loop_start = match self.loop_start {
            Some(loop_start) => loop_start,
            None => return Vec::new(),
        };

        let (due, remaining): (Vec<ScheduledNote>, Vec<ScheduledNote>) =
            mem::take(&mut self.active)
                .into_iter()
                .partition(|note| {
                    beats_to_duration(note.start_beat(), bpm)
                        .and_then(|offset| loop_start.checked_add(offset))
                        .is_some_and(|due| due <= now)
                });
        self.active = remaining;

        due
    }

    /// Copies the pending set into the active set, assigning beat offsets.
    fn promote(&mut self, now: Instant) {
        self.loop_start = Some(now);

        let last = match self.pending.last() {
            Some(last) => last.reserved_time(),
            None => return,
        };

        let mut beat = self.tail_offset;
        self.active = self
            .pending
            .iter()
            .map(|note| {
                let scheduled = ScheduledNote::from_request(note, beat);
                beat += note.reserved_time();
                scheduled
            })
            .collect();
        self.tail_offset = last;
        self.loop_count += 1;

        debug!(
            output = self.name,
            notes = self.active.len(),
            loop_count = self.loop_count,
            "Promoted pending notes."
        );
    }

    /// Drops the active set so that the next due query restarts the loop from beat zero.
    pub fn reset(&mut self) {
        self.active.clear();
        self.tail_offset = 0.0;
    }

    /// Drops both the pending and active sets.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.reset();
    }

    /// Gets the name of the output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the pending set.
    pub fn pending(&self) -> &[NoteRequest] {
        &self.pending
    }

    /// Gets the undelivered notes of the current iteration.
    pub fn active(&self) -> &[ScheduledNote] {
        &self.active
    }

    /// Gets the anchor of the current iteration, if a promotion has been attempted.
    pub fn loop_start(&self) -> Option<Instant> {
        self.loop_start
    }

    /// Gets the beat offset the next iteration will start at.
    pub fn tail_offset(&self) -> f64 {
        self.tail_offset
    }

    /// Gets the number of iterations promoted so far.
    pub fn loop_count(&self) -> u64 {
        self.loop_count
    }
}
