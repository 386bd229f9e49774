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
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    error::Error,
    fmt,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use midir::{MidiOutput, MidiOutputConnection, MidiOutputPort};
use midly::{
    live::{LiveEvent, SystemRealtime},
    num::{u4, u7},
    MidiMessage,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, Level};

use crate::notes::ScheduledNote;

/// Concert A.
const A4_FREQUENCY: f64 = 440.0;
const A4_KEY: f64 = 69.0;

/// Anything raw MIDI bytes can be written to.
pub(super) trait Connection: Send {
    fn send(&mut self, message: &[u8]) -> Result<(), Box<dyn Error>>;
}

impl Connection for MidiOutputConnection {
    fn send(&mut self, message: &[u8]) -> Result<(), Box<dyn Error>> {
        Ok(MidiOutputConnection::send(self, message)?)
    }
}

type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

/// A note that needs to be released.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct NoteOff {
    at: Instant,
    channel: u8,
    key: u8,
}

/// Plays notes on a MIDI output device.
pub struct Sink {
    name: String,
    connection: SharedConnection,
    channel: u4,
    channels: HashMap<String, u4>,
    clock: bool,
    note_offs: Sender<NoteOff>,
}

impl Sink {
    pub(super) fn new(
        name: &str,
        connection: Box<dyn Connection>,
        channel: u4,
        channels: HashMap<String, u4>,
        clock: bool,
    ) -> Result<Sink, Box<dyn Error>> {
        let connection: SharedConnection = Arc::new(Mutex::new(connection));
        let (note_offs, receiver) = crossbeam_channel::unbounded();
        {
            let connection = connection.clone();
            thread::Builder::new()
                .name("tickseq-note-off".to_string())
                .spawn(move || release_notes(connection, receiver))?;
        }

        Ok(Sink {
            name: name.to_string(),
            connection,
            channel,
            channels,
            clock,
            note_offs,
        })
    }

    fn send(&self, event: LiveEvent) -> Result<(), Box<dyn Error>> {
        let mut buf: Vec<u8> = Vec::with_capacity(8);
        event.write(&mut buf)?;
        self.connection.lock().send(&buf)
    }
}

impl super::Sink for Sink {
    fn emit(&self, output: &str, notes: &[ScheduledNote]) -> Result<(), Box<dyn Error>> {
        let channel = self.channels.get(output).copied().unwrap_or(self.channel);
        for note in notes {
            let key = tone_to_key(note.tone());
            let vel = amplitude_to_velocity(note.amplitude());
            let off_at = Duration::try_from_secs_f64(note.sustain().max(0.0))
                .ok()
                .and_then(|sustain| Instant::now().checked_add(sustain))
                .ok_or_else(|| format!("sustain time {} is out of range", note.sustain()))?;
            debug!(
                device = self.name,
                output,
                key = key.as_int(),
                vel = vel.as_int(),
                "Note on."
            );

            self.send(LiveEvent::Midi {
                channel,
                message: MidiMessage::NoteOn { key, vel },
            })?;
            self.note_offs.send(NoteOff {
                at: off_at,
                channel: channel.as_int(),
                key: key.as_int(),
            })?;
        }
        Ok(())
    }

    fn sync_pulse(&self) -> Result<(), Box<dyn Error>> {
        if self.clock {
            self.send(LiveEvent::Realtime(SystemRealtime::TimingClock))?;
        }
        Ok(())
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MIDI ({})", self.name)
    }
}

/// Sends note offs as they come due. Once the sink is gone, everything still sounding is released.
fn release_notes(connection: SharedConnection, receiver: Receiver<NoteOff>) {
    let span = span!(Level::INFO, "note off (midir)");
    let _enter = span.enter();

    let mut pending: BinaryHeap<Reverse<NoteOff>> = BinaryHeap::new();
    loop {
        let received = match pending.peek() {
            Some(Reverse(next)) => receiver.recv_deadline(next.at),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(note_off) => pending.push(Reverse(note_off)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                for Reverse(note_off) in pending.drain() {
                    note_off_now(&connection, &note_off);
                }
                info!("Note off thread stopped.");
                return;
            }
        }

        let now = Instant::now();
        while let Some(Reverse(next)) = pending.peek() {
            if next.at > now {
                break;
            }
            if let Some(Reverse(note_off)) = pending.pop() {
                note_off_now(&connection, &note_off);
            }
        }
    }
}

fn note_off_now(connection: &SharedConnection, note_off: &NoteOff) {
    let event = LiveEvent::Midi {
        channel: u4::from(note_off.channel),
        message: MidiMessage::NoteOff {
            key: u7::from(note_off.key),
            vel: u7::from(0),
        },
    };

    let mut buf: Vec<u8> = Vec::with_capacity(8);
    let result = event
        .write(&mut buf)
        .map_err(|e| -> Box<dyn Error> { e.into() })
        .and_then(|_| connection.lock().send(&buf));
    if let Err(e) = result {
        error!(err = e.as_ref(), key = note_off.key, "Error sending note off.");
    }
}

/// Converts a frequency to the nearest equal-tempered MIDI key.
pub(super) fn tone_to_key(tone: f64) -> u7 {
    let key = A4_KEY + 12.0 * (tone / A4_FREQUENCY).log2();
    if !key.is_finite() {
        return u7::from(0);
    }
    u7::from(key.round().clamp(0.0, 127.0) as u8)
}

/// Converts an amplitude to a note on velocity. Zero velocity would read as a note off, so the
/// quietest note is 1.
pub(super) fn amplitude_to_velocity(amplitude: f64) -> u7 {
    u7::from((amplitude * 127.0).round().clamp(1.0, 127.0) as u8)
}

/// Lists the names of the available MIDI output ports.
pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
    let output = MidiOutput::new("tickseq output listing")?;
    let mut names = output
        .ports()
        .iter()
        .map(|port| output.port_name(port))
        .collect::<Result<Vec<String>, _>>()?;
    names.sort();
    Ok(names)
}

/// Opens the MIDI output whose name contains the given name.
pub fn get(
    name: &str,
    channel: u4,
    channels: HashMap<String, u4>,
    clock: bool,
) -> Result<Sink, Box<dyn Error>> {
    let output = MidiOutput::new("tickseq output")?;
    let mut matches = output
        .ports()
        .into_iter()
        .map(|port| -> Result<(String, MidiOutputPort), Box<dyn Error>> {
            Ok((output.port_name(&port)?, port))
        })
        .collect::<Result<Vec<(String, MidiOutputPort)>, Box<dyn Error>>>()?
        .into_iter()
        .filter(|(port_name, _)| port_name.contains(name))
        .collect::<Vec<(String, MidiOutputPort)>>();

    if matches.is_empty() {
        return Err(format!("no device found with name {}", name).into());
    }
    if matches.len() > 1 {
        return Err(format!(
            "found too many devices that match ({}), use a less ambiguous device name",
            matches
                .iter()
                .map(|(port_name, _)| port_name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }

    let (port_name, port) = matches.swap_remove(0);
    let connection = output.connect(&port, "tickseq")?;
    info!(device = port_name, clock, "Opened MIDI output.");
    Sink::new(&port_name, Box::new(connection), channel, channels, clock)
}
