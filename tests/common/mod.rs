// Shared test doubles for the session engine
//
// Every mock hands the test a cheap, cloneable probe so assertions can be
// made after the controller has taken ownership of the device.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use interview_voice::agent::{AgentConfig, AgentTransport, CloseSignal, Connection, ConnectionIo};
use interview_voice::audio::{AudioFrame, MicHandle, Microphone, OutputDevice, OutputHandle};
use interview_voice::SessionError;
use tokio::sync::mpsc;

/// Poll `condition` until it holds, failing after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    for _ in 0..200 {
        if condition() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err(anyhow!("condition not reached within 2s"))
}

/// Await `fut` for at most two seconds
pub async fn within<T>(fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .map_err(|_| anyhow!("timed out after 2s"))
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

#[derive(Default)]
struct LogState {
    events: Vec<&'static str>,
    connections: Vec<(CloseSignal, bool)>,
}

impl LogState {
    /// Record connections closed since the last event, in sequence
    fn sync_connections(&mut self) {
        for (signal, seen) in self.connections.iter_mut() {
            if !*seen && signal.is_closed() {
                *seen = true;
                self.events.push("connection.close");
            }
        }
    }
}

/// Ordered log of device and connection calls shared by the mocks
///
/// A connection close is noticed at the next recorded call (or read), so
/// it lands between the device calls it happened between.
#[derive(Clone, Default)]
pub struct EventLog {
    state: Arc<Mutex<LogState>>,
}

impl EventLog {
    pub fn record(&self, event: &'static str) {
        let mut state = self.state.lock().unwrap();
        state.sync_connections();
        state.events.push(event);
    }

    pub fn watch_connection(&self, signal: CloseSignal) {
        self.state.lock().unwrap().connections.push((signal, false));
    }

    pub fn events(&self) -> Vec<&'static str> {
        let mut state = self.state.lock().unwrap();
        state.sync_connections();
        state.events.clone()
    }
}

// ---------------------------------------------------------------------------
// Microphone
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MicState {
    acquires: AtomicUsize,
    releases: AtomicUsize,
    stream_opened: AtomicBool,
    blocks: Mutex<Option<mpsc::Sender<Vec<f32>>>>,
}

/// Test view of a `MockMicrophone`
#[derive(Clone, Default)]
pub struct MicProbe {
    state: Arc<MicState>,
    log: EventLog,
}

impl MicProbe {
    pub fn acquires(&self) -> usize {
        self.state.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    pub fn stream_opened(&self) -> bool {
        self.state.stream_opened.load(Ordering::SeqCst)
    }

    /// Push a block as the device callback would; false if nobody listens
    pub fn send_block(&self, block: Vec<f32>) -> bool {
        match self.state.blocks.lock().unwrap().as_ref() {
            Some(tx) => tx.try_send(block).is_ok(),
            None => false,
        }
    }

    /// Simulate the device disappearing mid-stream
    pub fn disconnect(&self) {
        self.state.blocks.lock().unwrap().take();
    }
}

pub struct MockMicrophone {
    probe: MicProbe,
    sample_rate: u32,
    deny: bool,
}

impl MockMicrophone {
    pub fn new() -> (Self, MicProbe) {
        Self::with_rate(16000)
    }

    pub fn with_rate(sample_rate: u32) -> (Self, MicProbe) {
        Self::build(sample_rate, EventLog::default())
    }

    /// A microphone recording its release into a shared log
    pub fn logged(log: EventLog) -> (Self, MicProbe) {
        Self::build(16000, log)
    }

    fn build(sample_rate: u32, log: EventLog) -> (Self, MicProbe) {
        let probe = MicProbe {
            state: Arc::default(),
            log,
        };
        let mic = Self {
            probe: probe.clone(),
            sample_rate,
            deny: false,
        };
        (mic, probe)
    }

    /// A microphone whose access is always refused
    pub fn denied() -> (Self, MicProbe) {
        let (mut mic, probe) = Self::new();
        mic.deny = true;
        (mic, probe)
    }
}

#[async_trait]
impl Microphone for MockMicrophone {
    async fn acquire(&self) -> Result<Box<dyn MicHandle>, SessionError> {
        if self.deny {
            return Err(SessionError::PermissionDenied("denied by test".to_string()));
        }
        self.probe.state.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockMicHandle {
            probe: self.probe.clone(),
            sample_rate: self.sample_rate,
        }))
    }

    fn name(&self) -> &str {
        "mock microphone"
    }
}

struct MockMicHandle {
    probe: MicProbe,
    sample_rate: u32,
}

impl MicHandle for MockMicHandle {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open_stream(&mut self, queue_depth: usize) -> Result<mpsc::Receiver<Vec<f32>>, SessionError> {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        *self.probe.state.blocks.lock().unwrap() = Some(tx);
        self.probe.state.stream_opened.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    fn release(&mut self) {
        self.probe.state.blocks.lock().unwrap().take();
        self.probe.state.releases.fetch_add(1, Ordering::SeqCst);
        self.probe.log.record("mic.release");
    }
}

// ---------------------------------------------------------------------------
// Output device
// ---------------------------------------------------------------------------

/// One `schedule_frame` call as seen by the device
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCall {
    pub start_at: f64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl ScheduledCall {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Default)]
struct OutputState {
    now: Mutex<f64>,
    scheduled: Mutex<Vec<ScheduledCall>>,
    opens: AtomicUsize,
    cancels: AtomicUsize,
    closes: AtomicUsize,
    fail_open: AtomicBool,
    fail_schedule: AtomicBool,
    panic_schedule: AtomicBool,
}

/// Test view of a `MockOutput`: a hand-driven device clock plus call log
#[derive(Clone, Default)]
pub struct OutputProbe {
    state: Arc<OutputState>,
    log: EventLog,
}

impl OutputProbe {
    pub fn set_now(&self, now: f64) {
        *self.state.now.lock().unwrap() = now;
    }

    pub fn now(&self) -> f64 {
        *self.state.now.lock().unwrap()
    }

    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        self.state.scheduled.lock().unwrap().clone()
    }

    pub fn scheduled_count(&self) -> usize {
        self.state.scheduled.lock().unwrap().len()
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.state.cancels.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn fail_open(&self) {
        self.state.fail_open.store(true, Ordering::SeqCst);
    }

    pub fn fail_schedule(&self) {
        self.state.fail_schedule.store(true, Ordering::SeqCst);
    }

    /// Make `schedule_frame` panic, like a crashing device driver
    pub fn panic_on_schedule(&self) {
        self.state.panic_schedule.store(true, Ordering::SeqCst);
    }
}

pub struct MockOutput {
    probe: OutputProbe,
}

impl MockOutput {
    pub fn new() -> (Self, OutputProbe) {
        Self::logged(EventLog::default())
    }

    /// An output device recording its calls into a shared log
    pub fn logged(log: EventLog) -> (Self, OutputProbe) {
        let probe = OutputProbe {
            state: Arc::default(),
            log,
        };
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }

    /// Open a handle directly, for scheduler tests without a controller
    pub async fn handle() -> Result<(Box<dyn OutputHandle>, OutputProbe)> {
        let (output, probe) = Self::new();
        let handle = output.open(24000).await?;
        Ok((handle, probe))
    }
}

#[async_trait]
impl OutputDevice for MockOutput {
    async fn open(&self, _sample_rate: u32) -> Result<Box<dyn OutputHandle>, SessionError> {
        if self.probe.state.fail_open.load(Ordering::SeqCst) {
            return Err(SessionError::DeviceUnavailable("no output device".to_string()));
        }
        self.probe.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockOutputHandle {
            probe: self.probe.clone(),
        }))
    }

    fn name(&self) -> &str {
        "mock output"
    }
}

struct MockOutputHandle {
    probe: OutputProbe,
}

impl OutputHandle for MockOutputHandle {
    fn now(&self) -> f64 {
        self.probe.now()
    }

    fn schedule_frame(&mut self, frame: AudioFrame, start_at: f64) -> Result<(), SessionError> {
        if self.probe.state.panic_schedule.load(Ordering::SeqCst) {
            panic!("output driver crashed");
        }
        if self.probe.state.fail_schedule.load(Ordering::SeqCst) {
            return Err(SessionError::DeviceUnavailable("output device lost".to_string()));
        }
        self.probe.state.scheduled.lock().unwrap().push(ScheduledCall {
            start_at,
            samples: frame.samples,
            sample_rate: frame.sample_rate,
        });
        Ok(())
    }

    fn cancel_all(&mut self) {
        self.probe.state.cancels.fetch_add(1, Ordering::SeqCst);
        self.probe.log.record("output.cancel_all");
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.probe.state.closes.fetch_add(1, Ordering::SeqCst);
        self.probe.log.record("output.close");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum ConnectMode {
    Accept,
    Refuse(String),
    Hang,
}

/// Test side of a `MockTransport`: receives the I/O end of every connection
pub struct TransportProbe {
    connects: Arc<AtomicUsize>,
    connections: mpsc::UnboundedReceiver<ConnectionIo>,
}

impl TransportProbe {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The agent side of the next connection the controller opens
    pub async fn next_connection(&mut self) -> Result<ConnectionIo> {
        within(self.connections.recv())
            .await?
            .ok_or_else(|| anyhow!("transport dropped"))
    }
}

pub struct MockTransport {
    mode: ConnectMode,
    connects: Arc<AtomicUsize>,
    connections: mpsc::UnboundedSender<ConnectionIo>,
    log: EventLog,
}

impl MockTransport {
    fn with_mode(mode: ConnectMode) -> (Self, TransportProbe) {
        Self::build(mode, EventLog::default())
    }

    /// Accepts connections and records when each one is closed
    pub fn logged(log: EventLog) -> (Self, TransportProbe) {
        Self::build(ConnectMode::Accept, log)
    }

    fn build(mode: ConnectMode, log: EventLog) -> (Self, TransportProbe) {
        let connects = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                mode,
                connects: Arc::clone(&connects),
                connections: tx,
                log,
            },
            TransportProbe {
                connects,
                connections: rx,
            },
        )
    }

    pub fn accepting() -> (Self, TransportProbe) {
        Self::with_mode(ConnectMode::Accept)
    }

    pub fn refusing(reason: &str) -> (Self, TransportProbe) {
        Self::with_mode(ConnectMode::Refuse(reason.to_string()))
    }

    /// Connect never completes
    pub fn hanging() -> (Self, TransportProbe) {
        Self::with_mode(ConnectMode::Hang)
    }
}

#[async_trait]
impl AgentTransport for MockTransport {
    async fn connect(&self, config: &AgentConfig) -> Result<Connection, SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        match &self.mode {
            ConnectMode::Accept => {
                let (connection, io) = Connection::pair(config.outbound_queue_depth);
                self.log.watch_connection(io.close.clone());
                self.connections
                    .send(io)
                    .map_err(|_| SessionError::ConnectionError("test finished".to_string()))?;
                Ok(connection)
            }
            ConnectMode::Refuse(reason) => Err(SessionError::ConnectionError(reason.clone())),
            ConnectMode::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "mock transport"
    }
}
