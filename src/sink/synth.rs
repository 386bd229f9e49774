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
    collections::HashMap,
    error::Error,
    fmt, io,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
};

use rosc::{OscMessage, OscPacket, OscType};
use tracing::debug;

use crate::notes::ScheduledNote;

/// The server command that creates a new synth node.
const NEW_SYNTH: &str = "/s_new";

/// Node ID -1 asks the server to pick one.
const AUTO_NODE_ID: i32 = -1;

/// Add the node to the head of the target group.
const ADD_TO_HEAD: i32 = 0;

/// The default group.
const DEFAULT_GROUP: i32 = 0;

/// Starts synth nodes on a SuperCollider style synthesis server over OSC.
pub struct Sink {
    socket: UdpSocket,
    address: SocketAddr,
    instruments: HashMap<String, String>,
}

impl Sink {
    /// Creates a synth sink sending to the given address. Outputs are mapped to synth
    /// definitions through the instruments map, or use their own name.
    pub fn new(address: SocketAddr, instruments: HashMap<String, String>) -> Result<Sink, io::Error> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)))?;
        Ok(Sink {
            socket,
            address,
            instruments,
        })
    }

    fn instrument<'a>(&'a self, output: &'a str) -> &'a str {
        self.instruments
            .get(output)
            .map(String::as_str)
            .unwrap_or(output)
    }
}

/// Builds the message that plays a single note.
pub(super) fn new_synth_message(instrument: &str, note: &ScheduledNote) -> OscMessage {
    OscMessage {
        addr: NEW_SYNTH.to_string(),
        args: vec![
            OscType::String(instrument.to_string()),
            OscType::Int(AUTO_NODE_ID),
            OscType::Int(ADD_TO_HEAD),
            OscType::Int(DEFAULT_GROUP),
            OscType::String("freq".to_string()),
            OscType::Float(note.tone() as f32),
            OscType::String("amp".to_string()),
            OscType::Float(note.amplitude() as f32),
            OscType::String("sus".to_string()),
            OscType::Float(note.sustain() as f32),
        ],
    }
}

impl super::Sink for Sink {
    fn emit(&self, output: &str, notes: &[ScheduledNote]) -> Result<(), Box<dyn Error>> {
        let instrument = self.instrument(output);
        for note in notes {
            debug!(output, instrument, note = note.to_string(), "Starting synth.");
            let buf = rosc::encoder::encode(&OscPacket::Message(new_synth_message(
                instrument, note,
            )))?;
            self.socket.send_to(&buf, self.address)?;
        }
        Ok(())
    }

    fn sync_pulse(&self) -> Result<(), Box<dyn Error>> {
        // The synthesis server has no notion of tempo.
        Ok(())
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Synth ({})", self.address)
    }
}
