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
    error::Error,
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
};

use rosc::{
    address::{Matcher, OscAddress},
    OscMessage, OscPacket, OscType,
};
use tokio::{net::UdpSocket, sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, warn, Level};

use crate::{config, notes::NoteRequest};

use super::Event;

/// Numeric notes are sent as groups of tone, amplitude, sustain time and reserved time.
const NOTE_FIELDS: usize = 4;

/// A controller that drives the sequencer using OSC.
pub struct Driver {
    /// The socket address to host the OSC server on.
    addr: SocketAddr,
    /// OSC events.
    osc_events: Arc<OscEvents>,
}

pub(super) struct OscEvents {
    /// The OSC address to look for to queue notes for an output.
    queue: Matcher,
    /// The OSC address to look for to change the tempo.
    bpm: Matcher,
    /// The OSC address to look for to restart every loop.
    reset: Matcher,
    /// The OSC address to look for to silence every output.
    stop: Matcher,
}

impl Driver {
    pub fn new(config: &config::OscController) -> Result<Arc<Self>, Box<dyn Error>> {
        let addr: SocketAddr =
            SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port()));

        Ok(Arc::new(Driver {
            addr,
            osc_events: Arc::new(OscEvents {
                queue: Matcher::new(config.queue().as_str())?,
                bpm: Matcher::new(config.bpm().as_str())?,
                reset: Matcher::new(config.reset().as_str())?,
                stop: Matcher::new(config.stop().as_str())?,
            }),
        }))
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        let addr = self.addr;
        let osc_events = self.osc_events.clone();

        tokio::spawn(async move {
            let span = span!(Level::INFO, "OSC Driver");
            let _enter = span.enter();

            let socket = UdpSocket::bind(addr).await?;
            info!(addr = addr.to_string(), "OSC driver started.");

            let mut buf = [0u8; rosc::decoder::MTU];
            loop {
                let (size, sender_addr) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!(err = e.to_string(), "Error receiving UDP.");
                        continue;
                    }
                };

                let packet = match rosc::decoder::decode_udp(&buf[..size]) {
                    Ok((_, packet)) => packet,
                    Err(e) => {
                        error!(
                            err = e.to_string(),
                            sender = sender_addr.to_string(),
                            "Error decoding OSC message"
                        );
                        continue;
                    }
                };

                for event in Driver::handle_packet(&osc_events, &packet) {
                    if events_tx.send(event).await.is_err() {
                        info!("Controller has gone away, stopping OSC driver.");
                        return Ok(());
                    }
                }
            }
        })
    }
}

impl Driver {
    /// Turns an OSC packet into sequencer events. Bundles are flattened in order.
    pub(super) fn handle_packet(osc_events: &OscEvents, packet: &OscPacket) -> Vec<Event> {
        match packet {
            OscPacket::Message(osc_message) => {
                match Driver::handle_message(osc_events, osc_message) {
                    Ok(Some(event)) => vec![event],
                    Ok(None) => {
                        warn!(addr = osc_message.addr, "Unrecognized OSC address.");
                        vec![]
                    }
                    Err(e) => {
                        error!(
                            err = e.as_ref(),
                            addr = osc_message.addr,
                            "Malformed OSC message."
                        );
                        vec![]
                    }
                }
            }
            OscPacket::Bundle(osc_bundle) => osc_bundle
                .content
                .iter()
                .flat_map(|packet| Driver::handle_packet(osc_events, packet))
                .collect(),
        }
    }

    /// Handles individual OSC messages.
    pub(super) fn handle_message(
        osc_events: &OscEvents,
        msg: &OscMessage,
    ) -> Result<Option<Event>, Box<dyn Error>> {
        let address = OscAddress::new(msg.addr.clone())?;
        if osc_events.queue.match_address(&address) {
            Ok(Some(parse_queue(&msg.args)?))
        } else if osc_events.bpm.match_address(&address) {
            Ok(Some(Event::SetTempo(parse_bpm(&msg.args)?)))
        } else if osc_events.reset.match_address(&address) {
            Ok(Some(Event::Reset))
        } else if osc_events.stop.match_address(&address) {
            Ok(Some(Event::HardStop))
        } else {
            Ok(None)
        }
    }
}

/// Parses `[output, json]` or `[output, tone, amplitude, sustain, reserved, ...]`.
fn parse_queue(args: &[OscType]) -> Result<Event, Box<dyn Error>> {
    let (output, rest) = match args.split_first() {
        Some((OscType::String(output), rest)) => (output.clone(), rest),
        _ => return Err("expected the output name as the first argument".into()),
    };

    let notes = match rest {
        [OscType::String(json)] => serde_json::from_str::<Vec<NoteRequest>>(json)?,
        _ => {
            if rest.len() % NOTE_FIELDS != 0 {
                return Err(format!(
                    "expected groups of {} numbers, got {} arguments",
                    NOTE_FIELDS,
                    rest.len()
                )
                .into());
            }
            let values = rest
                .iter()
                .map(to_f64)
                .collect::<Result<Vec<f64>, Box<dyn Error>>>()?;
            values
                .chunks_exact(NOTE_FIELDS)
                .map(|note| NoteRequest::new(note[0], note[1], note[2], note[3]))
                .collect()
        }
    };

    Ok(Event::Queue { output, notes })
}

/// Parses a single numeric tempo.
fn parse_bpm(args: &[OscType]) -> Result<u32, Box<dyn Error>> {
    let bpm = match args {
        [arg] => to_f64(arg)?,
        _ => return Err(format!("expected a single tempo, got {} arguments", args.len()).into()),
    };
    if !bpm.is_finite() || bpm < 0.0 || bpm > f64::from(u32::MAX) {
        return Err(format!("tempo {} is out of range", bpm).into());
    }
    Ok(bpm.round() as u32)
}

fn to_f64(arg: &OscType) -> Result<f64, Box<dyn Error>> {
    match arg {
        OscType::Int(value) => Ok(f64::from(*value)),
        OscType::Long(value) => Ok(*value as f64),
        OscType::Float(value) => Ok(f64::from(*value)),
        OscType::Double(value) => Ok(*value),
        other => Err(format!("expected a number, got {:?}", other).into()),
    }
}
