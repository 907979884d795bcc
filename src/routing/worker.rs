use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Result, RoutingError};

use super::batch::{BatchRouter, BatchState, CancellationToken, ProgressMessage};
use super::registry::RacewayRecord;
use super::types::{CableRecord, RoutingConfig};

/// Batches are numbered per `start`; messages carry the number of the batch that sent them.
type Generation = u64;

enum WorkerCommand {
    Start {
        generation: Generation,
        raceways: Vec<RacewayRecord>,
        cables: Vec<CableRecord>,
        config: RoutingConfig,
    },
    Resume,
    Shutdown,
}

/// Runs batches on a background thread.
///
/// Commands go in through the handle, progress comes back as
/// [`ProgressMessage`]s in the order the batch emits them. Messages from a
/// batch superseded by a later `start` are never delivered.
pub struct BatchWorker {
    commands: Sender<WorkerCommand>,
    events: Receiver<(Generation, ProgressMessage)>,
    generation: AtomicU64,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl BatchWorker {
    pub fn spawn() -> Result<Self> {
        let (commands, command_rx) = mpsc::channel();
        let (event_tx, events) = mpsc::channel();
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let handle = thread::Builder::new()
            .name("cableroute-batch".to_string())
            .spawn(move || worker_loop(command_rx, event_tx, worker_token))?;

        Ok(BatchWorker {
            commands,
            events,
            generation: AtomicU64::new(0),
            token,
            handle: Some(handle),
        })
    }

    /// Starts a new batch. A batch that is still running is cancelled first.
    pub fn start(&self, raceways: Vec<RacewayRecord>, cables: Vec<CableRecord>, config: RoutingConfig) -> Result<()> {
        self.token.cancel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(WorkerCommand::Start {
            generation,
            raceways,
            cables,
            config,
        })
    }

    /// Requests the running batch to stop before its next cable.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn resume(&self) -> Result<()> {
        self.send(WorkerCommand::Resume)
    }

    /// Blocks until the next progress message of the current batch.
    pub fn recv(&self) -> Result<ProgressMessage> {
        loop {
            let (generation, message) = self.events.recv().map_err(|_| RoutingError::WorkerDisconnected)?;
            if self.is_current(generation) {
                return Ok(message);
            }
        }
    }

    /// Like [`BatchWorker::recv`], returning `None` once `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<ProgressMessage>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok((generation, message)) if self.is_current(generation) => return Ok(Some(message)),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(RoutingError::WorkerDisconnected),
            }
        }
    }

    fn is_current(&self, generation: Generation) -> bool {
        let current = self.generation.load(Ordering::SeqCst);
        if generation != current {
            debug!(generation, current, "dropping message from superseded batch");
        }
        generation == current
    }

    /// Cancels any running batch and joins the worker thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RoutingError::WorkerDisconnected)
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.token.cancel();
        // The thread may already be gone, which is what we want anyway.
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if handle.join().is_err() {
            warn!("routing worker panicked");
        }
    }
}

impl Drop for BatchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    commands: Receiver<WorkerCommand>,
    events: Sender<(Generation, ProgressMessage)>,
    token: CancellationToken,
) {
    let mut generation: Generation = 0;
    let mut current: Option<BatchRouter> = None;

    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Start {
                generation: next,
                raceways,
                cables,
                config,
            } => {
                generation = next;
                let mut router = BatchRouter::with_token(config, token.clone());
                match router.start_from_records(raceways, cables) {
                    Ok(()) => {
                        router.run(emitter(&events, generation));
                        current = Some(router);
                    }
                    Err(error) => {
                        warn!(%error, "rejected routing batch");
                        emitter(&events, generation)(ProgressMessage::Error {
                            message: error.to_string(),
                        });
                        current = None;
                    }
                }
            }
            WorkerCommand::Resume => match current.as_mut() {
                Some(router) if router.state() == BatchState::Cancelled => {
                    router.resume(emitter(&events, generation));
                }
                _ => emitter(&events, generation)(ProgressMessage::Error {
                    message: "no cancelled batch to resume".to_string(),
                }),
            },
            WorkerCommand::Shutdown => break,
        }
    }
    debug!("routing worker stopped");
}

fn emitter(
    events: &Sender<(Generation, ProgressMessage)>,
    generation: Generation,
) -> impl FnMut(ProgressMessage) + '_ {
    move |message| {
        if events.send((generation, message)).is_err() {
            debug!("progress receiver dropped");
        }
    }
}
