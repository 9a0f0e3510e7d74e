//! Background tracker service.
//!
//! One task owns the event loop: sensor events and lifecycle commands arrive
//! on a single channel and are applied to the state machine in order, while a
//! periodic tick refreshes live metrics and writes checkpoints. Display code
//! reads [`TrackerHandle::snapshot`] and follows state through
//! [`TrackerHandle::subscribe`].

use crate::recording::tracker::{save_completed, ActivityStateMachine};
use crate::recording::types::{
    ActivityRecord, LiveMetrics, StateChange, StateObserver, TrackerError, TrackerState,
};
use crate::sensors::types::SensorEvent;
use crate::storage::store::ActivityStore;
use futures::{Stream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Store shared between the service and blocking persistence tasks.
pub type SharedStore = Arc<Mutex<dyn ActivityStore>>;

/// Capacity of the event channel.
const CHANNEL_CAPACITY: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, TrackerError>>;

enum Command {
    Event(SensorEvent),
    Start(Reply<Uuid>),
    Pause(Reply<()>),
    Resume(Reply<()>),
    Stop(Reply<ActivityRecord>),
    Save(Reply<()>),
    Shutdown,
}

/// Forwards state changes into a watch channel.
pub struct WatchObserver {
    tx: watch::Sender<TrackerState>,
}

impl WatchObserver {
    pub fn new(initial: TrackerState) -> (Self, watch::Receiver<TrackerState>) {
        let (tx, rx) = watch::channel(initial);
        (Self { tx }, rx)
    }
}

impl StateObserver for WatchObserver {
    fn on_state_change(&self, change: &StateChange) {
        self.tx.send_replace(change.to);
    }
}

/// Cloneable sender for sensor sources.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Command>,
}

impl EventSender {
    /// Queue an event, waiting for channel capacity.
    pub async fn send(&self, event: SensorEvent) -> Result<(), TrackerError> {
        self.tx
            .send(Command::Event(event))
            .await
            .map_err(|_| TrackerError::ServiceStopped)
    }

    /// Queue an event without waiting. Full channel drops the event.
    pub fn try_send(&self, event: SensorEvent) -> Result<(), TrackerError> {
        match self.tx.try_send(Command::Event(event)) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Event channel full, dropping event");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TrackerError::ServiceStopped),
        }
    }
}

/// Spawns the tracker event loop.
pub struct TrackerService;

impl TrackerService {
    /// Start the event loop on the current tokio runtime.
    ///
    /// With a store, checkpoints are written while tracking and the activity
    /// is saved when stopped.
    pub fn spawn(mut machine: ActivityStateMachine, store: Option<SharedStore>) -> TrackerHandle {
        let (observer, state_rx) = WatchObserver::new(machine.state());
        machine.add_observer(Arc::new(observer));

        let tick = Duration::from_millis(machine.config().tick_interval_ms.max(1));
        let checkpoint_every = checkpoint_ticks(
            machine.config().checkpoint_interval_secs,
            machine.config().tick_interval_ms,
        );

        let machine = Arc::new(Mutex::new(machine));
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let worker = EventLoop {
            machine: Arc::clone(&machine),
            store,
            checkpoint_every,
            pending_checkpoint: None,
        };
        let task = tokio::spawn(worker.run(rx, tick));

        TrackerHandle {
            machine,
            tx,
            state_rx,
            task: Some(task),
        }
    }
}

/// Number of ticks between checkpoints, `None` when disabled.
fn checkpoint_ticks(interval_secs: u32, tick_ms: u64) -> Option<u64> {
    if interval_secs == 0 {
        return None;
    }
    Some((interval_secs as u64 * 1000 / tick_ms.max(1)).max(1))
}

fn lock(machine: &Mutex<ActivityStateMachine>) -> MutexGuard<'_, ActivityStateMachine> {
    machine
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct EventLoop {
    machine: Arc<Mutex<ActivityStateMachine>>,
    store: Option<SharedStore>,
    checkpoint_every: Option<u64>,
    /// Latest checkpoint write; each write waits for the one before it
    pending_checkpoint: Option<JoinHandle<()>>,
}

impl EventLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>, tick: Duration) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        tracing::debug!("Tracker service started");

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle(command).await,
                    }
                }
                _ = ticker.tick() => {
                    let tracking = lock(&self.machine).tick();
                    if tracking {
                        ticks += 1;
                        if self.checkpoint_every.is_some_and(|every| ticks % every == 0) {
                            self.checkpoint();
                        }
                    }
                }
            }
        }

        self.flush_checkpoint().await;
        tracing::debug!("Tracker service stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Event(event) => self.apply_event(event),
            Command::Start(reply) => {
                let result = lock(&self.machine).start().map(|record| record.id);
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = lock(&self.machine).pause();
                if result.is_ok() {
                    self.checkpoint();
                }
                let _ = reply.send(result);
            }
            Command::Resume(reply) => {
                let _ = reply.send(lock(&self.machine).resume());
            }
            Command::Stop(reply) => {
                let stopped = lock(&self.machine).stop();
                let result = match stopped {
                    Ok(record) => self.save().await.map(|_| record),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Command::Save(reply) => {
                let _ = reply.send(self.save().await);
            }
            Command::Shutdown => {}
        }
    }

    fn apply_event(&self, event: SensorEvent) {
        let mut machine = lock(&self.machine);
        let result = match event {
            SensorEvent::Reading(reading) => machine.accept_reading(reading).map(|_| ()),
            SensorEvent::Fix(fix) => machine.accept_fix(fix),
        };

        match result {
            Ok(()) => {}
            Err(TrackerError::NotTracking) => {
                tracing::debug!("Dropped sensor event while {}", machine.state());
            }
            Err(e) => tracing::warn!("Rejected sensor event: {}", e),
        }
    }

    /// Write a checkpoint without blocking the event loop.
    ///
    /// Writes land in the order they were taken.
    fn checkpoint(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let Some(checkpoint) = lock(&self.machine).checkpoint_payload() else {
            return;
        };
        let previous = self.pending_checkpoint.take();

        self.pending_checkpoint = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            let written = tokio::task::spawn_blocking(move || {
                let mut store = store
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                store.save_checkpoint(&checkpoint).map(|_| checkpoint)
            })
            .await;
            match written {
                Ok(Ok(checkpoint)) => tracing::debug!(
                    "Checkpointed activity {} with {} readings",
                    checkpoint.record.id,
                    checkpoint.readings.len()
                ),
                Ok(Err(e)) => tracing::warn!("Checkpoint failed: {}", e),
                Err(e) => tracing::warn!("Checkpoint task failed: {}", e),
            }
        }));
    }

    /// Wait until every queued checkpoint write has landed.
    async fn flush_checkpoint(&mut self) {
        if let Some(pending) = self.pending_checkpoint.take() {
            if let Err(e) = pending.await {
                tracing::warn!("Checkpoint task ended abnormally: {}", e);
            }
        }
    }

    /// Persist the completed activity, if a store is configured.
    ///
    /// Queued checkpoints land first so none can outlive the saved activity.
    /// The machine lock is held only while copying the record out.
    async fn save(&mut self) -> Result<(), TrackerError> {
        let Some(store) = self.store.clone() else {
            return Ok(());
        };
        self.flush_checkpoint().await;
        let (record, readings) = lock(&self.machine).completed_payload()?;

        tokio::task::spawn_blocking(move || {
            let mut store = store
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            save_completed(&mut *store, &record, &readings)
        })
        .await
        .map_err(|e| TrackerError::PersistenceFailure(e.to_string()))?
    }
}

/// Handle to a running tracker service.
pub struct TrackerHandle {
    machine: Arc<Mutex<ActivityStateMachine>>,
    tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<TrackerState>,
    task: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    /// Sender for pushing sensor events.
    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Forward every event of a sensor stream into the tracker.
    ///
    /// The forwarding task ends when the stream ends or the service stops.
    pub fn attach_stream<S>(&self, stream: S) -> JoinHandle<()>
    where
        S: Stream<Item = SensorEvent> + Send + 'static,
    {
        let sender = self.sender();
        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                if sender.send(event).await.is_err() {
                    break;
                }
            }
        })
    }

    /// Start a new activity. Returns its id.
    pub async fn start(&self) -> Result<Uuid, TrackerError> {
        self.request(Command::Start).await
    }

    pub async fn pause(&self) -> Result<(), TrackerError> {
        self.request(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<(), TrackerError> {
        self.request(Command::Resume).await
    }

    /// Stop the activity and save it to the store.
    ///
    /// A save failure is returned as `PersistenceFailure`; the completed
    /// activity stays in the tracker and [`save`](Self::save) can retry.
    pub async fn stop(&self) -> Result<ActivityRecord, TrackerError> {
        self.request(Command::Stop).await
    }

    /// Retry saving the completed activity.
    pub async fn save(&self) -> Result<(), TrackerError> {
        self.request(Command::Save).await
    }

    /// Live metrics for display.
    pub fn snapshot(&self) -> LiveMetrics {
        lock(&self.machine).snapshot()
    }

    /// Receiver that follows tracker state changes.
    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.state_rx.clone()
    }

    pub fn state(&self) -> TrackerState {
        *self.state_rx.borrow()
    }

    /// Run a closure against the state machine, e.g. to rename the activity.
    pub fn with_machine<R>(&self, f: impl FnOnce(&mut ActivityStateMachine) -> R) -> R {
        f(&mut lock(&self.machine))
    }

    /// Stop the event loop and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.tx.send(Command::Shutdown).await;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Tracker task ended abnormally: {}", e);
            }
        }
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, TrackerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| TrackerError::ServiceStopped)?;
        reply_rx.await.map_err(|_| TrackerError::ServiceStopped)?
    }
}
