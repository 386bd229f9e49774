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
use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Seconds in a minute, used for all beat/time conversions.
const SECONDS_PER_MINUTE: f64 = 60.0;

/// The longest a note may ring, in seconds.
pub const MAX_SUSTAIN_TIME: f64 = 3600.0;

/// The most beats a single note set may reserve in total.
pub const MAX_SET_BEATS: f64 = 65536.0;

/// Errors raised when a note request fails validation.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum NoteError {
    #[error("note {index}: tone must be a positive frequency, got {tone}")]
    InvalidTone { index: usize, tone: f64 },
    #[error("note {index}: amplitude must be between 0.0 and 1.0, got {amplitude}")]
    InvalidAmplitude { index: usize, amplitude: f64 },
    #[error(
        "note {index}: sustain time must be between 0 and {} seconds, got {sustain_time}",
        MAX_SUSTAIN_TIME
    )]
    InvalidSustainTime { index: usize, sustain_time: f64 },
    #[error("note {index}: reserved time must be a non-negative number, got {reserved_time}")]
    InvalidReservedTime { index: usize, reserved_time: f64 },
    #[error("note set reserves {beats} beats, more than the {} allowed", MAX_SET_BEATS)]
    SetTooLong { beats: f64 },
}

/// A note as submitted by a producer. Reserved time is the number of beats that must pass
/// before the next note in the same set may start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteRequest {
    /// The frequency of the note in Hz.
    tone: f64,
    /// The gain of the note, 0.0 to 1.0.
    amplitude: f64,
    /// How long the note should ring.
    sustain_time: f64,
    /// Beats reserved before the next note may start.
    reserved_time: f64,
}

impl NoteRequest {
    /// Creates a new note request. The request is not validated until it is queued.
    pub fn new(tone: f64, amplitude: f64, sustain_time: f64, reserved_time: f64) -> NoteRequest {
        NoteRequest {
            tone,
            amplitude,
            sustain_time,
            reserved_time,
        }
    }

    pub fn tone(&self) -> f64 {
        self.tone
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn sustain_time(&self) -> f64 {
        self.sustain_time
    }

    pub fn reserved_time(&self) -> f64 {
        self.reserved_time
    }

    /// Checks the note's values. The index is only used for error reporting.
    pub fn validate(&self, index: usize) -> Result<(), NoteError> {
        if !self.tone.is_finite() || self.tone <= 0.0 {
            return Err(NoteError::InvalidTone {
                index,
                tone: self.tone,
            });
        }
        if !(0.0..=1.0).contains(&self.amplitude) {
            return Err(NoteError::InvalidAmplitude {
                index,
                amplitude: self.amplitude,
            });
        }
        if !(0.0..=MAX_SUSTAIN_TIME).contains(&self.sustain_time) {
            return Err(NoteError::InvalidSustainTime {
                index,
                sustain_time: self.sustain_time,
            });
        }
        if !self.reserved_time.is_finite() || self.reserved_time < 0.0 {
            return Err(NoteError::InvalidReservedTime {
                index,
                reserved_time: self.reserved_time,
            });
        }

        Ok(())
    }
}

/// Validates every note in the given set, failing on the first invalid one. The reserved times of
/// the set must add up to no more than [MAX_SET_BEATS].
pub fn validate_notes(notes: &[NoteRequest]) -> Result<(), NoteError> {
    notes
        .iter()
        .enumerate()
        .try_for_each(|(index, note)| note.validate(index))?;

    let beats: f64 = notes.iter().map(NoteRequest::reserved_time).sum();
    if beats > MAX_SET_BEATS {
        return Err(NoteError::SetTooLong { beats });
    }

    Ok(())
}

/// A note that has been placed on a loop's beat timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledNote {
    tone: f64,
    amplitude: f64,
    sustain: f64,
    start_beat: f64,
}

impl ScheduledNote {
    /// Places the given request at the given beat.
    pub(crate) fn from_request(request: &NoteRequest, start_beat: f64) -> ScheduledNote {
        ScheduledNote {
            tone: request.tone,
            amplitude: request.amplitude,
            sustain: request.sustain_time,
            start_beat,
        }
    }

    pub fn tone(&self) -> f64 {
        self.tone
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn sustain(&self) -> f64 {
        self.sustain
    }

    /// The offset in beats from the start of the loop iteration this note belongs to.
    pub fn start_beat(&self) -> f64 {
        self.start_beat
    }
}

impl fmt::Display for ScheduledNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2}Hz (amp {:.2}, sus {:.2}) @ beat {:.3}",
            self.tone, self.amplitude, self.sustain, self.start_beat
        )
    }
}

/// Converts beats to wall-clock time at the given tempo. Returns None if the result can't be
/// represented as a duration.
pub fn beats_to_duration(beats: f64, bpm: u32) -> Option<Duration> {
    Duration::try_from_secs_f64((beats * SECONDS_PER_MINUTE / f64::from(bpm)).max(0.0)).ok()
}

/// Converts wall-clock time to beats at the given tempo.
pub fn duration_to_beats(duration: Duration, bpm: u32) -> f64 {
    duration.as_secs_f64() * f64::from(bpm) / SECONDS_PER_MINUTE
}
