use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::state::{SessionState, StateCell};
use super::stats::{SessionCounters, SessionStats};
use crate::agent::{AgentTransport, Connection, ServerEvent};
use crate::audio::{CaptureEngine, EncodedChunk, Microphone, OutputDevice, PlaybackScheduler};
use crate::error::{SessionError, StartError};

/// Drives one live interview voice session at a time
///
/// `start()` acquires the microphone, opens the output device and connects
/// to the agent; capture begins once the agent reports `Opened`. Every way a
/// session can end (explicit `stop()`, the agent closing, any fault) goes
/// through the same teardown: stop capture, flush playback, close the
/// connection, release the output device.
pub struct SessionController {
    config: SessionConfig,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn OutputDevice>,
    transport: Arc<dyn AgentTransport>,
    state: Arc<StateCell>,
    counters: Arc<SessionCounters>,
    running: Mutex<Option<RunningSession>>,
}

/// Handle on the task that owns a session's resources
struct RunningSession {
    session_id: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        microphone: Arc<dyn Microphone>,
        output: Arc<dyn OutputDevice>,
        transport: Arc<dyn AgentTransport>,
    ) -> Self {
        info!(
            "Session controller ready (mic: {}, output: {}, transport: {})",
            microphone.name(),
            output.name(),
            transport.name()
        );

        Self {
            config,
            microphone,
            output,
            transport,
            state: Arc::new(StateCell::new()),
            counters: Arc::new(SessionCounters::default()),
            running: Mutex::new(None),
        }
    }

    /// Start a session and wait until it is active
    pub async fn start(&self) -> Result<(), StartError> {
        let (started_tx, started_rx) = oneshot::channel();

        {
            let mut running = self.running.lock().await;

            if self.state.get().is_running() {
                warn!("Session already running");
                return Err(StartError::AlreadyActive);
            }

            // Reap the previous session's task (already finished)
            if let Some(previous) = running.take() {
                if let Err(e) = previous.task.await {
                    error!("Session {} task failed: {}", previous.session_id, e);
                }
            }

            let session_id = format!("interview-{}", uuid::Uuid::new_v4());
            info!("Starting voice session: {}", session_id);

            self.counters.reset();
            self.state.set(SessionState::Connecting);

            let (cancel_tx, cancel_rx) = watch::channel(false);
            let driver = SessionDriver {
                session_id: session_id.clone(),
                config: self.config.clone(),
                microphone: Arc::clone(&self.microphone),
                output: Arc::clone(&self.output),
                transport: Arc::clone(&self.transport),
                state: Arc::clone(&self.state),
                counters: Arc::clone(&self.counters),
                cancel: cancel_rx,
                started: Some(started_tx),
            };

            let state = Arc::clone(&self.state);
            let task = tokio::spawn(async move {
                // Resources held by a panicking driver are dropped while
                // unwinding; the controller must still leave `Active`
                if let Err(panic) = AssertUnwindSafe(driver.run()).catch_unwind().await {
                    let reason = panic_message(panic.as_ref());
                    error!("Session task panicked: {}", reason);
                    state.set(SessionState::Failed(SessionError::DeviceUnavailable(
                        format!("session task panicked: {}", reason),
                    )));
                }
            });

            *running = Some(RunningSession {
                session_id,
                cancel: cancel_tx,
                task,
            });
        }

        match started_rx.await {
            Ok(result) => result,
            // The driver went away without reporting; its final state says why
            Err(_) => {
                let mut status = self.state.watch();
                let finished = status.wait_for(|s| !s.is_running()).await.map(|s| s.clone());
                match finished {
                    Ok(SessionState::Failed(e)) => Err(StartError::Failed(e)),
                    _ => Err(StartError::Cancelled),
                }
            }
        }
    }

    /// Stop the session, if any, and wait for teardown to finish
    ///
    /// Safe from any state; a no-op when nothing is running. Concurrent
    /// callers all return only after teardown has completed.
    pub async fn stop(&self) {
        // Held until the task is joined so a second caller waits for teardown
        let mut running = self.running.lock().await;

        let Some(session) = running.take() else {
            debug!("Stop requested with no session");
            return;
        };

        info!("Stopping voice session: {}", session.session_id);
        let _ = session.cancel.send(true);

        if let Err(e) = session.task.await {
            error!("Session {} task failed: {}", session.session_id, e);
            self.fail_if_running(format!("session task failed: {}", e));
        }
    }

    /// Current session state
    pub fn status(&self) -> SessionState {
        self.state.get()
    }

    /// Every state transition from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Latest state, for callers that only care about the current value
    pub fn watch_status(&self) -> watch::Receiver<SessionState> {
        self.state.watch()
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    fn fail_if_running(&self, reason: String) {
        if self.state.get().is_running() {
            self.state
                .set(SessionState::Failed(SessionError::DeviceUnavailable(reason)));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// How a session ended
#[derive(Debug)]
enum SessionEnd {
    /// `stop()` (or the controller was dropped)
    Stopped,
    /// The agent closed the session
    Closed,
    Failed(SessionError),
}

impl From<SessionError> for SessionEnd {
    fn from(e: SessionError) -> Self {
        SessionEnd::Failed(e)
    }
}

/// Everything a session holds; released only by `teardown`
#[derive(Default)]
struct SessionResources {
    capture: Option<CaptureEngine>,
    scheduler: Option<PlaybackScheduler>,
    connection: Option<Connection>,
}

impl SessionResources {
    /// Release in order: mic, pending playback, connection, output device
    ///
    /// Every step runs regardless of how the previous one went.
    async fn teardown(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop().await;
        }

        if let Some(scheduler) = self.scheduler.as_mut() {
            let cancelled = scheduler.flush();
            if cancelled > 0 {
                info!("Flushed {} pending playback frame(s)", cancelled);
            }
        }

        if let Some(connection) = self.connection.take() {
            connection.close();
        }

        if let Some(mut scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.close() {
                warn!("Failed to close output device: {}", e);
            }
        }
    }
}

/// Resolve when `stop()` is requested or the controller goes away
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|stop| *stop).await;
}

/// The single task that owns a session's devices and connection
struct SessionDriver {
    session_id: String,
    config: SessionConfig,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn OutputDevice>,
    transport: Arc<dyn AgentTransport>,
    state: Arc<StateCell>,
    counters: Arc<SessionCounters>,
    cancel: watch::Receiver<bool>,
    started: Option<oneshot::Sender<Result<(), StartError>>>,
}

impl SessionDriver {
    async fn run(mut self) {
        let mut resources = SessionResources::default();

        let end = match self.establish(&mut resources).await {
            Ok(()) => self.pump(&mut resources).await,
            Err(end) => end,
        };

        resources.teardown().await;
        self.counters.mark_ended();

        let final_state = match &end {
            SessionEnd::Stopped | SessionEnd::Closed => SessionState::Ended,
            SessionEnd::Failed(e) => SessionState::Failed(e.clone()),
        };

        match &end {
            SessionEnd::Failed(e) => error!("Session {} failed: {}", self.session_id, e),
            other => info!("Session {} ended ({:?})", self.session_id, other),
        }

        self.state.set(final_state);

        // Only reached if the session never became active
        if let Some(started) = self.started.take() {
            let result = match end {
                SessionEnd::Stopped => StartError::Cancelled,
                SessionEnd::Closed => StartError::Failed(SessionError::ConnectionError(
                    "agent closed the connection".to_string(),
                )),
                SessionEnd::Failed(e) => StartError::Failed(e),
            };
            let _ = started.send(Err(result));
        }
    }

    /// Idle -> Connecting -> Active
    async fn establish(&mut self, resources: &mut SessionResources) -> Result<(), SessionEnd> {
        // Microphone first: a failed connect must never leave an open mic
        // without a consumer, and a refused mic must never hit the network.
        let mic = tokio::select! {
            _ = cancelled(&mut self.cancel) => return Err(SessionEnd::Stopped),
            mic = self.microphone.acquire() => mic?,
        };
        info!("Microphone acquired: {}", self.microphone.name());
        let capture = resources
            .capture
            .insert(CaptureEngine::new(mic, self.config.capture.clone()));

        // An unusable microphone must fail before anything else is opened
        capture.check_format()?;

        let output = tokio::select! {
            _ = cancelled(&mut self.cancel) => return Err(SessionEnd::Stopped),
            output = self.output.open(self.config.playback.sample_rate) => output?,
        };
        resources.scheduler = Some(PlaybackScheduler::new(output, self.config.playback.clone()));

        let deadline = Instant::now() + self.config.connect_timeout;

        let connection = tokio::select! {
            _ = cancelled(&mut self.cancel) => return Err(SessionEnd::Stopped),
            result = tokio::time::timeout_at(deadline, self.transport.connect(&self.config.agent)) => {
                match result {
                    Err(_) => return Err(SessionError::Timeout.into()),
                    Ok(connection) => connection?,
                }
            }
        };
        let connection = resources.connection.insert(connection);

        loop {
            let event = tokio::select! {
                _ = cancelled(&mut self.cancel) => return Err(SessionEnd::Stopped),
                result = tokio::time::timeout_at(deadline, connection.next_event()) => {
                    match result {
                        Err(_) => return Err(SessionError::Timeout.into()),
                        Ok(event) => event,
                    }
                }
            };

            match event {
                Some(ServerEvent::Opened) => break,
                Some(ServerEvent::AudioChunk { .. }) => {
                    warn!("Dropping agent audio received before the session opened");
                }
                Some(ServerEvent::Interrupted) => {
                    debug!("Ignoring interruption before the session opened");
                }
                Some(ServerEvent::Error(reason)) => {
                    return Err(SessionError::TransportError(reason).into());
                }
                Some(ServerEvent::Closed) | None => {
                    return Err(SessionError::ConnectionError(
                        "agent closed the connection before it was ready".to_string(),
                    )
                    .into());
                }
            }
        }

        self.state.set(SessionState::Active);
        self.counters.mark_started();

        // Capture only starts once the agent is ready for audio
        let sink = self.chunk_sink(connection);
        if let Some(capture) = resources.capture.as_mut() {
            capture.start(sink)?;
        }

        info!("Session {} is live", self.session_id);
        if let Some(started) = self.started.take() {
            let _ = started.send(Ok(()));
        }

        Ok(())
    }

    /// Gate outbound audio on the session being active
    fn chunk_sink(&self, connection: &Connection) -> impl FnMut(EncodedChunk) + Send + 'static {
        let sender = connection.sender();
        let gate = self.state.watch();
        let counters = Arc::clone(&self.counters);

        move |chunk: EncodedChunk| {
            let active = matches!(*gate.borrow(), SessionState::Active);
            if active && sender.send(chunk) {
                SessionCounters::bump(&counters.chunks_sent);
            } else {
                SessionCounters::bump(&counters.chunks_dropped);
            }
        }
    }

    /// Active: route agent events to playback until something ends the session
    async fn pump(&mut self, resources: &mut SessionResources) -> SessionEnd {
        let (Some(capture), Some(scheduler), Some(connection)) = (
            resources.capture.as_mut(),
            resources.scheduler.as_mut(),
            resources.connection.as_mut(),
        ) else {
            return SessionEnd::Failed(SessionError::DeviceUnavailable(
                "session resources missing".to_string(),
            ));
        };

        loop {
            tokio::select! {
                _ = cancelled(&mut self.cancel) => return SessionEnd::Stopped,

                fault = capture.fault() => return SessionEnd::Failed(fault),

                event = connection.next_event() => match event {
                    Some(ServerEvent::AudioChunk { payload, .. }) => {
                        match scheduler.schedule_chunk(&payload) {
                            Ok(Some(_)) => SessionCounters::bump(&self.counters.frames_scheduled),
                            Ok(None) => SessionCounters::bump(&self.counters.frames_dropped),
                            Err(e) => return SessionEnd::Failed(e),
                        }
                    }
                    Some(ServerEvent::Interrupted) => {
                        scheduler.interrupt();
                        SessionCounters::bump(&self.counters.interruptions);
                    }
                    Some(ServerEvent::Opened) => debug!("Ignoring duplicate Opened"),
                    Some(ServerEvent::Error(reason)) => {
                        return SessionEnd::Failed(SessionError::TransportError(reason));
                    }
                    Some(ServerEvent::Closed) | None => return SessionEnd::Closed,
                },
            }
        }
    }
}
