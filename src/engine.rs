// src/engine.rs
//! Single-threaded event dispatcher driving the recording state machine

use crate::{
    activity::Activity,
    config::RecorderConfig,
    error::{RecorderError, Result},
    gps::{LocationFix, SourceEvent, Subscription},
    recording::{
        ActivityFinalizer, FixFilter, Phase, RecordingStateMachine, RecordingView,
        SnapshotPersister, SportType,
    },
    store::{ActivityHistory, FileStore, QueuedStore, SharedStore, WriterHandle},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    time::MissedTickBehavior,
};

/// Period of the duration counter
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// User-initiated commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(SportType),
    Pause,
    Resume,
    Stop,
    Finalize(String),
    Discard,
    View,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Start(_) => "start",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::Finalize(_) => "finalize",
            Command::Discard => "discard",
            Command::View => "view",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Updated(RecordingView),
    Finalized(Activity),
}

/// Everything the dispatcher reacts to
#[derive(Debug)]
pub enum EngineEvent {
    Fix(LocationFix),
    SourceError(String),
    Tick,
    Command {
        command: Command,
        reply: oneshot::Sender<Result<CommandOutcome>>,
    },
    Shutdown,
}

/// Explicit recording engine instance. Construct once, call [`init`],
/// then either drive it synchronously with [`execute`]/[`dispatch`] or hand
/// it to [`run`] on a tokio runtime.
///
/// [`init`]: RecordingEngine::init
/// [`execute`]: RecordingEngine::execute
/// [`dispatch`]: RecordingEngine::dispatch
/// [`run`]: RecordingEngine::run
pub struct RecordingEngine {
    machine: RecordingStateMachine,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    writer: Option<WriterHandle>,
    tick_period: Duration,
}

impl RecordingEngine {
    /// Open the engine over the on-disk data directory. Snapshot writes go
    /// through a background write queue; history writes are synchronous.
    /// Must be called from within a tokio runtime.
    pub fn open(config: &RecorderConfig) -> Result<Self> {
        let filter = config.filter()?;
        let store: SharedStore = Arc::new(FileStore::new(config.data_dir()?)?);
        let (queued, writer) = QueuedStore::spawn(store.clone());
        Ok(Self::with_stores(
            filter,
            &config.user_id,
            Arc::new(queued),
            store,
            Some(writer),
        ))
    }

    pub fn with_stores(
        filter: FixFilter,
        user_id: &str,
        snapshot_store: SharedStore,
        history_store: SharedStore,
        writer: Option<WriterHandle>,
    ) -> Self {
        let persister = SnapshotPersister::new(snapshot_store);
        let finalizer =
            ActivityFinalizer::new(ActivityHistory::new(history_store), persister.clone());
        let machine = RecordingStateMachine::new(filter, persister, finalizer, user_id);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            machine,
            events_tx,
            events_rx,
            writer,
            tick_period: TICK_PERIOD,
        }
    }

    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    /// Recover any interrupted recording
    pub fn init(&mut self) -> Phase {
        self.machine.init()
    }

    /// Cloneable handle for issuing commands to a running engine
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            tx: self.events_tx.clone(),
        }
    }

    pub fn view(&self) -> RecordingView {
        self.machine.view()
    }

    pub fn machine(&self) -> &RecordingStateMachine {
        &self.machine
    }

    /// Apply one user command
    pub fn execute(&mut self, command: Command) -> Result<CommandOutcome> {
        tracing::debug!(command = command.name(), phase = %self.machine.phase(), "Command");
        let machine = &mut self.machine;
        match command {
            Command::Start(sport) => machine.start(sport)?,
            Command::Pause => machine.pause()?,
            Command::Resume => machine.resume()?,
            Command::Stop => machine.stop()?,
            Command::Finalize(name) => {
                return machine.finalize(&name).map(CommandOutcome::Finalized);
            }
            Command::Discard => machine.discard()?,
            Command::View => {}
        }
        Ok(CommandOutcome::Updated(machine.view()))
    }

    /// Handle one event to completion. Returns `false` on shutdown.
    pub fn dispatch(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Fix(fix) => {
                self.machine.ingest_fix(&fix);
            }
            EngineEvent::SourceError(message) => self.machine.source_error(&message),
            EngineEvent::Tick => {
                self.machine.tick();
            }
            EngineEvent::Command { command, reply } => {
                let result = self.execute(command);
                if let Err(e) = &result {
                    tracing::info!(error = %e, "Command rejected");
                }
                // Caller may have given up waiting
                let _ = reply.send(result);
            }
            EngineEvent::Shutdown => return false,
        }
        true
    }

    /// Run the event loop until shutdown. Fixes from `subscription`, ticks
    /// and commands are serialized through one dispatcher; pending snapshot
    /// writes are flushed before returning.
    pub async fn run(mut self, mut subscription: Option<Subscription>) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick completes immediately

        let mut source_open = subscription.is_some();
        tracing::info!(phase = %self.machine.phase(), "Recording engine running");

        loop {
            let event = tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => event,
                    None => EngineEvent::Shutdown,
                },
                source_event = next_source_event(&mut subscription), if source_open => {
                    match source_event {
                        Some(SourceEvent::Fix(fix)) => EngineEvent::Fix(fix),
                        Some(SourceEvent::Error(message)) => EngineEvent::SourceError(message),
                        None => {
                            source_open = false;
                            EngineEvent::SourceError("location source closed".to_string())
                        }
                    }
                }
                _ = ticker.tick() => EngineEvent::Tick,
            };

            let was_recording = self.machine.phase() == Phase::Recording;
            if !self.dispatch(event) {
                break;
            }
            // Elapsed time counts whole seconds from start or resume
            if !was_recording && self.machine.phase() == Phase::Recording {
                ticker.reset();
            }
        }

        if let Some(subscription) = subscription.as_mut() {
            subscription.unsubscribe();
        }
        self.shutdown().await
    }

    /// Release the engine and wait for queued snapshot writes
    pub async fn shutdown(self) -> Result<()> {
        let RecordingEngine {
            machine, writer, ..
        } = self;
        let phase = machine.phase();
        drop(machine);

        if let Some(writer) = writer {
            let failures = writer.flush().await?;
            if failures > 0 {
                tracing::warn!(failures, "Some snapshot writes failed");
            }
        }
        tracing::info!(%phase, "Recording engine stopped");
        Ok(())
    }
}

async fn next_source_event(subscription: &mut Option<Subscription>) -> Option<SourceEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

/// Sends events to a running [`RecordingEngine`]
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub async fn start(&self, sport_type: SportType) -> Result<RecordingView> {
        self.update(Command::Start(sport_type)).await
    }

    pub async fn pause(&self) -> Result<RecordingView> {
        self.update(Command::Pause).await
    }

    pub async fn resume(&self) -> Result<RecordingView> {
        self.update(Command::Resume).await
    }

    pub async fn stop(&self) -> Result<RecordingView> {
        self.update(Command::Stop).await
    }

    pub async fn discard(&self) -> Result<RecordingView> {
        self.update(Command::Discard).await
    }

    pub async fn view(&self) -> Result<RecordingView> {
        self.update(Command::View).await
    }

    pub async fn finalize(&self, name: &str) -> Result<Activity> {
        match self.request(Command::Finalize(name.to_string())).await? {
            CommandOutcome::Finalized(activity) => Ok(activity),
            CommandOutcome::Updated(_) => Err(RecorderError::Other(
                "finalize returned no activity".to_string(),
            )),
        }
    }

    /// Inject a fix as if it came from the subscribed source
    pub fn push_fix(&self, fix: LocationFix) -> Result<()> {
        self.send(EngineEvent::Fix(fix))
    }

    pub fn push_source_error(&self, message: &str) -> Result<()> {
        self.send(EngineEvent::SourceError(message.to_string()))
    }

    pub fn tick(&self) -> Result<()> {
        self.send(EngineEvent::Tick)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(EngineEvent::Shutdown)
    }

    async fn update(&self, command: Command) -> Result<RecordingView> {
        match self.request(command).await? {
            CommandOutcome::Updated(view) => Ok(view),
            CommandOutcome::Finalized(_) => Err(RecorderError::Other(
                "unexpected activity in reply".to_string(),
            )),
        }
    }

    async fn request(&self, command: Command) -> Result<CommandOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command { command, reply })?;
        rx.await
            .map_err(|_| RecorderError::Other("recording engine stopped".to_string()))?
    }

    fn send(&self, event: EngineEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| RecorderError::Other("recording engine stopped".to_string()))
    }
}
