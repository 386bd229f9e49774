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
use std::time::Instant;

use crate::notes::duration_to_beats;

/// Sync pulses per beat, matching MIDI clock.
pub const PULSES_PER_BEAT: u32 = 24;

/// Tracks elapsed beats between ticks and decides when a sync pulse is due.
pub struct SyncClock {
    last_tick: Instant,
    beat_accumulator: f64,
}

impl SyncClock {
    pub fn new(now: Instant) -> SyncClock {
        SyncClock {
            last_tick: now,
            beat_accumulator: 0.0,
        }
    }

    /// Accumulates the beats elapsed since the last tick at the given tempo. Returns true when a
    /// sync pulse is due, in which case the accumulator starts over from zero.
    pub fn advance(&mut self, now: Instant, bpm: u32) -> bool {
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.beat_accumulator += duration_to_beats(elapsed, bpm);

        if self.beat_accumulator >= 1.0 / f64::from(PULSES_PER_BEAT) {
            self.beat_accumulator = 0.0;
            return true;
        }
        false
    }

    pub fn beat_accumulator(&self) -> f64 {
        self.beat_accumulator
    }
}
