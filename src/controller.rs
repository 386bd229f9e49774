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
use std::error::Error;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{error, info, span, Level};

use crate::{config, notes::NoteRequest, sequencer::Sequencer};

pub mod osc;

/// Controller events that drive the sequencer.
#[derive(Debug)]
pub enum Event {
    /// Replaces the pending sequence of an output.
    Queue {
        output: String,
        notes: Vec<NoteRequest>,
    },

    /// Changes the tempo.
    SetTempo(u32),

    /// Restarts every output from its pending sequence.
    Reset,

    /// Silences every output.
    HardStop,
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Feeds events from a driver into the sequencer.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(sequencer: Arc<Sequencer>, driver: Arc<dyn Driver>) -> Controller {
        Controller {
            handle: tokio::spawn(async move { Controller::trigger_events(sequencer, driver).await }),
        }
    }

    /// Creates the controller described by the configuration.
    pub fn from_config(
        config: &config::Controller,
        sequencer: Arc<Sequencer>,
    ) -> Result<Controller, Box<dyn Error>> {
        let driver: Arc<dyn Driver> = match config {
            config::Controller::Osc(config) => osc::Driver::new(config)?,
        };
        Ok(Controller::new(sequencer, driver))
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Applies events from the driver until it stops sending them.
    async fn trigger_events(sequencer: Arc<Sequencer>, driver: Arc<dyn Driver>) {
        let span = span!(Level::INFO, "controller");
        let _enter = span.enter();

        let (events_tx, mut events_rx) = mpsc::channel(16);
        let join_handle = driver.monitor_events(events_tx);

        info!(bpm = sequencer.tempo(), "Controller started.");

        while let Some(event) = events_rx.recv().await {
            info!(event = format!("{:?}", event), "Received event.");

            if let Err(e) = match event {
                Event::Queue { output, notes } => sequencer.queue(&output, notes),
                Event::SetTempo(bpm) => sequencer.set_tempo(bpm),
                Event::Reset => sequencer.reset(),
                Event::HardStop => sequencer.hard_stop(),
            } {
                error!("Error talking to sequencer: {}", e);
            }
        }

        info!("Controller closing.");
        match join_handle.await {
            Ok(Err(e)) => error!("Event monitor failed: {}", e),
            Err(e) => error!("Error waiting for event monitor to stop: {}", e),
            Ok(Ok(())) => {}
        }
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, io, sync::Arc, time::Duration};

    use parking_lot::Mutex;
    use tokio::{
        sync::mpsc::{self, Receiver, Sender},
        task::JoinHandle,
    };

    use crate::{notes::NoteRequest, sequencer::Sequencer, sink::mock, testutil::eventually_async};

    use super::{Controller, Driver, Event};

    /// Forwards whatever the test sends into the controller.
    struct TestDriver {
        events: Mutex<Option<Receiver<Event>>>,
    }

    impl Driver for TestDriver {
        fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
            let events = self.events.lock().take();
            tokio::spawn(async move {
                if let Some(mut events) = events {
                    while let Some(event) = events.recv().await {
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(())
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_controller() -> Result<(), Box<dyn Error>> {
        let sink = Arc::new(mock::Sink::new("mock"));
        let sequencer = Arc::new(Sequencer::new(60, Duration::from_millis(10), sink.clone())?);
        sequencer.start()?;

        let (tx, rx) = mpsc::channel(10);
        let driver = Arc::new(TestDriver {
            events: Mutex::new(Some(rx)),
        });
        let mut controller = Controller::new(sequencer.clone(), driver);

        tx.send(Event::SetTempo(6000)).await?;
        eventually_async(
            || async { sequencer.tempo() == 6000 },
            "Tempo never changed",
        )
        .await;

        // Invalid events are logged and ignored.
        tx.send(Event::SetTempo(0)).await?;
        tx.send(Event::Queue {
            output: "".to_string(),
            notes: vec![NoteRequest::new(440.0, 0.5, 0.1, 1.0)],
        })
        .await?;

        tx.send(Event::Queue {
            output: "lead".to_string(),
            notes: vec![NoteRequest::new(440.0, 0.5, 0.1, 1.0)],
        })
        .await?;
        eventually_async(
            || async { sink.emitted("lead").len() >= 2 },
            "Queued notes were never emitted",
        )
        .await;
        assert_eq!(sequencer.tempo(), 6000);

        tx.send(Event::HardStop).await?;
        tx.send(Event::Reset).await?;

        drop(tx);
        controller.join().await?;
        sequencer.stop().await;
        Ok(())
    }
}
