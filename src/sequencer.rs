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
    io,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    select,
    sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, span, Instrument, Level, Span};

use crate::{
    notes::{validate_notes, NoteError, NoteRequest},
    playsync::CancelHandle,
    registry::PlayerRegistry,
    sink::{Dispatcher, Sink},
};

mod clock;

pub use clock::{SyncClock, PULSES_PER_BEAT};

/// Errors reported synchronously to callers of the sequencer.
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("tempo must be at least 1 bpm, got {0}")]
    InvalidTempo(u32),
    #[error("tick interval must be greater than zero")]
    InvalidTickInterval,
    #[error("the sequencer must be started from within a tokio runtime")]
    NoRuntime,
    #[error("the sequencer has been stopped")]
    Stopped,
    #[error("output name must not be empty")]
    EmptyOutputName,
    #[error("invalid note: {0}")]
    InvalidNote(#[from] NoteError),
    #[error("unable to start the emitter: {0}")]
    Emitter(#[from] io::Error),
}

/// Mutations applied by the tick loop between ticks.
#[derive(Debug)]
enum Command {
    Queue {
        output: String,
        notes: Vec<NoteRequest>,
    },
    Reset,
    HardStop,
}

struct RunHandles {
    join: JoinHandle<()>,
    cancel: CancelHandle,
}

/// Drives every output's loop from a fixed-interval tick and hands due notes to a sink.
pub struct Sequencer {
    /// The current tempo in beats per minute.
    tempo: Arc<AtomicU32>,
    /// The interval between ticks.
    tick_interval: Duration,
    /// Sends commands to the tick loop.
    commands: UnboundedSender<Command>,
    /// The command receiver, until the tick loop takes it.
    command_receiver: Mutex<Option<UnboundedReceiver<Command>>>,
    /// Where due notes and sync pulses go.
    sink: Arc<dyn Sink>,
    /// Present while the tick loop is running.
    handles: Mutex<Option<RunHandles>>,
    /// Set once the sequencer has been stopped.
    stopped: AtomicBool,
    /// The logging span.
    span: Span,
}

impl Sequencer {
    /// Creates an idle sequencer.
    pub fn new(
        bpm: u32,
        tick_interval: Duration,
        sink: Arc<dyn Sink>,
    ) -> Result<Sequencer, SequencerError> {
        if bpm == 0 {
            return Err(SequencerError::InvalidTempo(bpm));
        }
        if tick_interval.is_zero() {
            return Err(SequencerError::InvalidTickInterval);
        }

        let (commands, command_receiver) = mpsc::unbounded_channel();
        Ok(Sequencer {
            tempo: Arc::new(AtomicU32::new(bpm)),
            tick_interval,
            commands,
            command_receiver: Mutex::new(Some(command_receiver)),
            sink,
            handles: Mutex::new(None),
            stopped: AtomicBool::new(false),
            span: span!(Level::INFO, "sequencer"),
        })
    }

    /// Starts the tick loop on the current tokio runtime. Starting a running sequencer does
    /// nothing.
    pub fn start(&self) -> Result<(), SequencerError> {
        let _enter = self.span.enter();

        let runtime = Handle::try_current().map_err(|_| SequencerError::NoRuntime)?;
        let mut handles = self.handles.lock();
        if self.stopped.load(Ordering::Acquire) {
            return Err(SequencerError::Stopped);
        }
        if handles.is_some() {
            info!("Sequencer is already running.");
            return Ok(());
        }

        let dispatcher = Dispatcher::spawn(self.sink.clone())?;
        let commands = match self.command_receiver.lock().take() {
            Some(commands) => commands,
            None => {
                dispatcher.close();
                return Err(SequencerError::Stopped);
            }
        };

        let cancel = CancelHandle::new();
        let join = runtime.spawn(
            Sequencer::run(
                self.tempo.clone(),
                self.tick_interval,
                commands,
                dispatcher,
                cancel.clone(),
            )
            .instrument(span!(Level::INFO, "tick loop")),
        );
        *handles = Some(RunHandles { join, cancel });

        info!(
            bpm = self.tempo(),
            tick_interval = ?self.tick_interval,
            sink = self.sink.to_string(),
            "Sequencer started."
        );
        Ok(())
    }

    /// Replaces the pending sequence of the given output. The output's current loop finishes
    /// first.
    pub fn queue(&self, output: &str, notes: Vec<NoteRequest>) -> Result<(), SequencerError> {
        if output.is_empty() {
            return Err(SequencerError::EmptyOutputName);
        }
        validate_notes(&notes)?;
        self.send(Command::Queue {
            output: output.to_string(),
            notes,
        })
    }

    /// Sets the tempo used from the next tick on.
    pub fn set_tempo(&self, bpm: u32) -> Result<(), SequencerError> {
        if bpm == 0 {
            return Err(SequencerError::InvalidTempo(bpm));
        }
        let previous = self.tempo.swap(bpm, Ordering::AcqRel);
        if previous != bpm {
            info!(parent: &self.span, previous, bpm, "Tempo changed.");
        }
        Ok(())
    }

    /// Gets the current tempo.
    pub fn tempo(&self) -> u32 {
        self.tempo.load(Ordering::Acquire)
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Restarts every output from its pending sequence on the next tick.
    pub fn reset(&self) -> Result<(), SequencerError> {
        self.send(Command::Reset)
    }

    /// Silences every output by dropping both its pending and active sequences.
    pub fn hard_stop(&self) -> Result<(), SequencerError> {
        self.send(Command::HardStop)
    }

    /// Returns true while the tick loop is running.
    pub fn is_running(&self) -> bool {
        self.handles
            .lock()
            .as_ref()
            .is_some_and(|handles| !handles.join.is_finished())
    }

    /// Stops the tick loop once the current tick is done and waits for every emission to be
    /// delivered. A stopped sequencer can't be started again.
    pub async fn stop(&self) {
        let handles = {
            let mut handles = self.handles.lock();
            self.stopped.store(true, Ordering::Release);
            handles.take()
        };
        self.command_receiver.lock().take();

        let handles = match handles {
            Some(handles) => handles,
            None => {
                info!(parent: &self.span, "Sequencer is not running, nothing to stop.");
                return;
            }
        };

        info!(parent: &self.span, "Stopping sequencer.");
        handles.cancel.cancel();
        if let Err(e) = handles.join.await {
            error!(parent: &self.span, err = e.to_string(), "Error waiting for the tick loop.");
        }
        info!(parent: &self.span, "Sequencer stopped.");
    }

    fn send(&self, command: Command) -> Result<(), SequencerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SequencerError::Stopped);
        }
        self.commands
            .send(command)
            .map_err(|_| SequencerError::Stopped)
    }

    async fn run(
        tempo: Arc<AtomicU32>,
        tick_interval: Duration,
        mut commands: UnboundedReceiver<Command>,
        dispatcher: Dispatcher,
        cancel: CancelHandle,
    ) {
        info!("Tick loop started.");

        let mut registry = PlayerRegistry::new();
        let mut clock: Option<SyncClock> = None;
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => {
                    Sequencer::apply_pending(&mut registry, &mut commands);
                    break;
                }
                _ = interval.tick() => {}
            }

            let now = Instant::now();
            Sequencer::apply_pending(&mut registry, &mut commands);

            let bpm = tempo.load(Ordering::Acquire);
            if clock
                .get_or_insert_with(|| SyncClock::new(now))
                .advance(now, bpm)
            {
                dispatcher.sync_pulse();
            }

            let tick = registry.tick(now, bpm);
            for output in tick.loop_starts {
                dispatcher.loop_start(output, bpm);
            }
            if !tick.due.is_empty() {
                dispatcher.notes(tick.due);
            }
        }

        if tokio::task::spawn_blocking(move || dispatcher.close())
            .await
            .is_err()
        {
            error!("Error closing the emitter.");
        }
        info!("Tick loop stopped.");
    }

    /// Applies every command received so far, returning how many there were.
    fn apply_pending(
        registry: &mut PlayerRegistry,
        commands: &mut UnboundedReceiver<Command>,
    ) -> usize {
        let mut applied = 0;
        loop {
            match commands.try_recv() {
                Ok(command) => {
                    Sequencer::apply(registry, command);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return applied,
            }
        }
    }

    fn apply(registry: &mut PlayerRegistry, command: Command) {
        debug!(command = ?command, "Applying command.");
        match command {
            Command::Queue { output, notes } => registry.queue(&output, notes),
            Command::Reset => registry.reset(),
            Command::HardStop => registry.hard_stop(),
        }
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        if let Some(handles) = self.handles.lock().as_ref() {
            handles.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, sync::Arc, time::Duration};

    use tokio::sync::mpsc;

    use crate::{
        notes::{NoteError, NoteRequest, MAX_SET_BEATS},
        registry::PlayerRegistry,
        sink::mock,
        testutil::eventually_async,
    };

    use super::{Command, Sequencer, SequencerError};

    fn sequencer(bpm: u32) -> (Arc<Sequencer>, Arc<mock::Sink>) {
        let sink = Arc::new(mock::Sink::new("mock"));
        let sequencer = Sequencer::new(bpm, Duration::from_millis(10), sink.clone())
            .expect("failed to create sequencer");
        (Arc::new(sequencer), sink)
    }

    fn tones(sink: &mock::Sink, output: &str) -> Vec<f64> {
        sink.emitted(output).iter().map(|note| note.tone()).collect()
    }

    #[test]
    fn test_start_requires_runtime() {
        let (sequencer, _) = sequencer(60);
        assert!(matches!(sequencer.start(), Err(SequencerError::NoRuntime)));
        assert!(!sequencer.is_running());
    }

    #[test]
    fn test_new_validates() {
        let sink = Arc::new(mock::Sink::new("mock"));
        assert!(matches!(
            Sequencer::new(0, Duration::from_millis(10), sink.clone()),
            Err(SequencerError::InvalidTempo(0))
        ));
        assert!(matches!(
            Sequencer::new(60, Duration::ZERO, sink),
            Err(SequencerError::InvalidTickInterval)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_is_idempotent() -> Result<(), Box<dyn Error>> {
        let (sequencer, _) = sequencer(60);
        assert!(!sequencer.is_running());

        sequencer.start()?;
        sequencer.start()?;
        assert!(sequencer.is_running());

        sequencer.stop().await;
        assert!(!sequencer.is_running());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejects_invalid_input() -> Result<(), Box<dyn Error>> {
        let (sequencer, sink) = sequencer(60);
        sequencer.start()?;

        assert!(matches!(
            sequencer.set_tempo(0),
            Err(SequencerError::InvalidTempo(0))
        ));
        assert_eq!(sequencer.tempo(), 60);

        assert!(matches!(
            sequencer.queue("", vec![NoteRequest::new(440.0, 0.5, 0.4, 1.0)]),
            Err(SequencerError::EmptyOutputName)
        ));
        assert!(matches!(
            sequencer.queue(
                "lead",
                vec![
                    NoteRequest::new(440.0, 0.5, 0.4, 1.0),
                    NoteRequest::new(-1.0, 0.5, 0.4, 1.0),
                ]
            ),
            Err(SequencerError::InvalidNote(NoteError::InvalidTone { index: 1, .. }))
        ));

        sequencer.stop().await;
        assert!(sink.emitted("lead").is_empty());
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_loops_queued_notes() -> Result<(), Box<dyn Error>> {
        // One beat lasts 100ms.
        let (sequencer, sink) = sequencer(600);
        sequencer.queue(
            "lead",
            vec![
                NoteRequest::new(440.0, 0.5, 0.05, 1.0),
                NoteRequest::new(650.0, 0.25, 0.05, 0.25),
            ],
        )?;
        sequencer.start()?;

        eventually_async(
            || async { sink.emitted("lead").len() >= 5 },
            "Queued notes never looped",
        )
        .await;
        sequencer.stop().await;

        let tones = tones(&sink, "lead");
        assert_eq!(tones[..5], [440.0, 650.0, 440.0, 650.0, 440.0]);

        let beats = sink
            .emitted("lead")
            .iter()
            .map(|note| note.start_beat())
            .collect::<Vec<f64>>();
        assert_eq!(beats[..4], [0.0, 1.0, 0.25, 1.25]);

        // Three iterations were started by the time the fifth note went out.
        assert_eq!(sink.loop_starts("lead")[..3], [600, 600, 600]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rejected_queue_keeps_active_loop() -> Result<(), Box<dyn Error>> {
        let (sequencer, sink) = sequencer(600);
        sequencer.queue(
            "lead",
            vec![
                NoteRequest::new(440.0, 0.5, 0.05, 1.0),
                NoteRequest::new(650.0, 0.25, 0.05, 0.25),
            ],
        )?;
        sequencer.start()?;
        eventually_async(
            || async { sink.emitted("lead").len() >= 2 },
            "Queued notes were never emitted",
        )
        .await;

        assert!(matches!(
            sequencer.queue(
                "lead",
                vec![
                    NoteRequest::new(880.0, 0.5, 0.05, 0.5),
                    NoteRequest::new(990.0, 1.5, 0.05, 0.5),
                ]
            ),
            Err(SequencerError::InvalidNote(NoteError::InvalidAmplitude { index: 1, .. }))
        ));

        eventually_async(
            || async { sink.emitted("lead").len() >= 6 },
            "The loop stopped after a rejected queue",
        )
        .await;
        sequencer.stop().await;

        let tones = tones(&sink, "lead");
        assert_eq!(tones[..6], [440.0, 650.0, 440.0, 650.0, 440.0, 650.0]);
        let beats = sink
            .emitted("lead")
            .iter()
            .map(|note| note.start_beat())
            .collect::<Vec<f64>>();
        assert_eq!(beats[..6], [0.0, 1.0, 0.25, 1.25, 0.25, 1.25]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_oversized_sets_leave_loop_running() -> Result<(), Box<dyn Error>> {
        let (sequencer, sink) = sequencer(6000);
        sequencer.queue("bass", vec![NoteRequest::new(110.0, 0.5, 0.01, 1.0)])?;
        sequencer.start()?;

        assert!(matches!(
            sequencer.queue(
                "lead",
                vec![
                    NoteRequest::new(440.0, 0.5, 0.4, 1e20),
                    NoteRequest::new(550.0, 0.5, 0.4, 1.0),
                ]
            ),
            Err(SequencerError::InvalidNote(NoteError::SetTooLong { .. }))
        ));
        assert!(matches!(
            sequencer.queue("lead", vec![NoteRequest::new(440.0, 0.5, 1e20, 1.0)]),
            Err(SequencerError::InvalidNote(NoteError::InvalidSustainTime { .. }))
        ));

        // The longest set allowed is accepted and simply waits for its second note.
        sequencer.queue(
            "lead",
            vec![
                NoteRequest::new(440.0, 0.5, 0.4, MAX_SET_BEATS / 2.0),
                NoteRequest::new(550.0, 0.5, 0.4, MAX_SET_BEATS / 2.0),
            ],
        )?;

        let emitted = sink.emitted("bass").len();
        eventually_async(
            || async { sink.emitted("bass").len() >= emitted + 5 },
            "The tick loop stopped",
        )
        .await;
        assert!(sequencer.is_running());
        assert_eq!(tones(&sink, "lead"), vec![440.0]);

        sequencer.stop().await;
        Ok(())
    }
    #[tokio::test(flavor = "multi_thread")]
    async fn test_sync_pulses() -> Result<(), Box<dyn Error>> {
        let (sequencer, sink) = sequencer(600);
        sequencer.start()?;
        eventually_async(
            || async { sink.sync_pulses() >= 3 },
            "Sync pulses were never sent",
        )
        .await;
        sequencer.stop().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_set_tempo() -> Result<(), Box<dyn Error>> {
        let (sequencer, _) = sequencer(60);
        sequencer.set_tempo(120)?;
        assert_eq!(sequencer.tempo(), 120);
        sequencer.start()?;
        sequencer.set_tempo(90)?;
        assert_eq!(sequencer.tempo(), 90);
        sequencer.stop().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_hard_stop_silences_outputs() -> Result<(), Box<dyn Error>> {
        // One beat per tick, so the output emits on every tick until it's stopped.
        let (sequencer, sink) = sequencer(6000);
        sequencer.start()?;
        sequencer.queue("lead", vec![NoteRequest::new(440.0, 0.5, 0.01, 1.0)])?;
        eventually_async(
            || async { sink.emitted("lead").len() >= 3 },
            "Notes were never emitted",
        )
        .await;

        sequencer.hard_stop()?;
        tokio::time::sleep(Duration::from_millis(100)).await;
        let emitted = sink.emitted("lead").len();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.emitted("lead").len(), emitted);

        sequencer.stop().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop() -> Result<(), Box<dyn Error>> {
        let (sequencer, sink) = sequencer(6000);
        sequencer.queue("lead", vec![NoteRequest::new(440.0, 0.5, 0.01, 1.0)])?;
        sequencer.start()?;
        eventually_async(
            || async { !sink.emitted("lead").is_empty() },
            "Notes were never emitted",
        )
        .await;

        sequencer.stop().await;
        assert!(!sequencer.is_running());
        let emitted = sink.emitted("lead").len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.emitted("lead").len(), emitted);

        assert!(matches!(sequencer.start(), Err(SequencerError::Stopped)));
        assert!(matches!(
            sequencer.queue("lead", vec![]),
            Err(SequencerError::Stopped)
        ));
        assert!(matches!(sequencer.reset(), Err(SequencerError::Stopped)));

        // Stopping again is harmless.
        sequencer.stop().await;
        Ok(())
    }

    #[test]
    fn test_apply_pending() {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut registry = PlayerRegistry::new();

        sender
            .send(Command::Queue {
                output: "lead".to_string(),
                notes: vec![NoteRequest::new(440.0, 0.5, 0.4, 1.0)],
            })
            .expect("failed to send queue");
        sender.send(Command::HardStop).expect("failed to send hard stop");

        assert_eq!(Sequencer::apply_pending(&mut registry, &mut receiver), 2);
        let lead = registry.get("lead").expect("lead should exist");
        assert!(lead.pending().is_empty());

        // Commands still waiting when the channel closes are applied too.
        sender
            .send(Command::Queue {
                output: "bass".to_string(),
                notes: vec![NoteRequest::new(110.0, 0.5, 0.4, 1.0)],
            })
            .expect("failed to send queue");
        drop(sender);
        assert_eq!(Sequencer::apply_pending(&mut registry, &mut receiver), 1);
        assert_eq!(registry.outputs(), vec!["bass", "lead"]);
        assert_eq!(Sequencer::apply_pending(&mut registry, &mut receiver), 0);
    }
}
