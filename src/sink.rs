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
use std::{collections::HashMap, error::Error, fmt, io, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender};
use tracing::{error, info, span, Level};

use crate::{
    config::{self, Target},
    notes::ScheduledNote,
    registry::DueNotes,
};

mod log;
mod midir;
#[cfg(test)]
pub(crate) mod mock;
mod router;
mod synth;

/// A destination for due notes and sync pulses. Delivery semantics (protocol, endpoint, retries)
/// belong entirely to the sink.
pub trait Sink: fmt::Display + Send + Sync {
    /// Delivers the notes that just became due for the given output.
    fn emit(&self, output: &str, notes: &[ScheduledNote]) -> Result<(), Box<dyn Error>>;

    /// Delivers a tempo sync pulse. Sent 24 times per beat.
    fn sync_pulse(&self) -> Result<(), Box<dyn Error>>;

    /// Signals that the given output's loop has just restarted at the given tempo. Sent before
    /// any of the new iteration's notes.
    fn loop_start(&self, _output: &str, _bpm: u32) -> Result<(), Box<dyn Error>> {
        Ok(())
    }
}

/// Lists the names of the MIDI output ports known to midir.
pub fn list_midi_devices() -> Result<Vec<String>, Box<dyn Error>> {
    midir::list()
}

/// Builds the sink described by the configuration. Every configured endpoint is opened, and
/// outputs are routed to them by name.
pub fn from_config(config: &config::Sequencer) -> Result<Arc<dyn Sink>, Box<dyn Error>> {
    let mut sinks: HashMap<Target, Arc<dyn Sink>> = HashMap::new();
    sinks.insert(Target::Log, Arc::new(log::Sink::new()));

    if let Some(synth) = config.synth() {
        sinks.insert(
            Target::Synth,
            Arc::new(synth::Sink::new(synth.address()?, synth.instruments())?),
        );
    }
    if let Some(midi) = config.midi() {
        sinks.insert(
            Target::Midi,
            Arc::new(midir::get(
                midi.device(),
                midi.channel()?,
                midi.channels()?,
                midi.clock(),
            )?),
        );
    }

    let lookup = |target: Target| -> Result<Arc<dyn Sink>, Box<dyn Error>> {
        sinks
            .get(&target)
            .cloned()
            .ok_or_else(|| format!("no {:?} endpoint is configured", target).into())
    };

    let default = lookup(config.default_target())?;
    let routes = config
        .routes()
        .iter()
        .map(|(output, target)| -> Result<(String, Arc<dyn Sink>), Box<dyn Error>> {
            Ok((output.clone(), lookup(*target)?))
        })
        .collect::<Result<HashMap<String, Arc<dyn Sink>>, Box<dyn Error>>>()?;

    Ok(Arc::new(router::Sink::new(routes, default)))
}

/// Something the tick loop wants delivered.
enum Emission {
    Notes(DueNotes),
    SyncPulse,
    LoopStart { output: String, bpm: u32 },
}

/// Hands emissions from the tick loop to a dedicated thread so that slow or failing endpoints
/// never hold up scheduling.
pub struct Dispatcher {
    sender: Sender<Emission>,
    join: thread::JoinHandle<()>,
}

impl Dispatcher {
    /// Starts the delivery thread for the given sink.
    pub fn spawn(sink: Arc<dyn Sink>) -> Result<Dispatcher, io::Error> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let join = thread::Builder::new()
            .name("tickseq-emitter".to_string())
            .spawn(move || Dispatcher::deliver(sink, receiver))?;

        Ok(Dispatcher { sender, join })
    }

    /// Queues due notes for delivery.
    pub fn notes(&self, due: DueNotes) {
        if self.sender.send(Emission::Notes(due)).is_err() {
            error!("Emitter thread has stopped, dropping notes.");
        }
    }

    /// Queues a sync pulse for delivery.
    pub fn sync_pulse(&self) {
        if self.sender.send(Emission::SyncPulse).is_err() {
            error!("Emitter thread has stopped, dropping sync pulse.");
        }
    }

    /// Queues a loop restart notification for delivery.
    pub fn loop_start(&self, output: String, bpm: u32) {
        if self.sender.send(Emission::LoopStart { output, bpm }).is_err() {
            error!("Emitter thread has stopped, dropping loop start.");
        }
    }

    /// Delivers everything already queued and stops the delivery thread.
    pub fn close(self) {
        let Dispatcher { sender, join } = self;
        drop(sender);
        if join.join().is_err() {
            error!("Error waiting for the emitter thread to stop.");
        }
    }

    fn deliver(sink: Arc<dyn Sink>, receiver: Receiver<Emission>) {
        let span = span!(Level::INFO, "emitter");
        let _enter = span.enter();

        info!(sink = sink.to_string(), "Emitter started.");
        for emission in receiver.iter() {
            match emission {
                Emission::Notes(due) => {
                    for (output, notes) in due.iter() {
                        if let Err(e) = sink.emit(output, notes) {
                            error!(err = e.as_ref(), output, "Error emitting notes.");
                        }
                    }
                }
                Emission::SyncPulse => {
                    if let Err(e) = sink.sync_pulse() {
                        error!(err = e.as_ref(), "Error emitting sync pulse.");
                    }
                }
                Emission::LoopStart { output, bpm } => {
                    if let Err(e) = sink.loop_start(&output, bpm) {
                        error!(err = e.as_ref(), output, "Error emitting loop start.");
                    }
                }
            }
        }
        info!("Emitter stopped.");
    }
}
