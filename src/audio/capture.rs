// Microphone capture engine
//
// The device pushes raw sample blocks of whatever size it likes through a
// bounded channel. A single task owns the accumulation buffer, cuts it into
// fixed-size frames and hands each encoded frame to the sink. The sink is
// called synchronously and must not block; frames that were still being
// accumulated when capture stops are discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{AudioFrame, EncodedChunk, MicHandle, INPUT_FRAME_SAMPLES, INPUT_SAMPLE_RATE};
use crate::error::SessionError;

/// Capture configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Expected microphone rate (default: 16kHz)
    pub sample_rate: u32,
    /// Samples per encoded frame (default: 4096)
    pub frame_samples: usize,
    /// Depth of the device -> engine block queue (default: 32)
    pub queue_depth: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: INPUT_SAMPLE_RATE,
            frame_samples: INPUT_FRAME_SAMPLES,
            queue_depth: 32,
        }
    }
}

/// Owns the microphone and turns its stream into encoded frames
pub struct CaptureEngine {
    config: CaptureConfig,
    handle: Option<Box<dyn MicHandle>>,
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
    fault_rx: Option<oneshot::Receiver<SessionError>>,
}

impl CaptureEngine {
    /// Take ownership of an acquired microphone; capture does not start yet
    pub fn new(handle: Box<dyn MicHandle>, config: CaptureConfig) -> Self {
        Self {
            config,
            handle: Some(handle),
            running: Arc::new(AtomicBool::new(false)),
            task: None,
            fault_rx: None,
        }
    }

    /// Check if capture is currently running
    pub fn is_capturing(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Check the microphone delivers the configured rate
    pub fn check_format(&self) -> Result<(), SessionError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| SessionError::DeviceUnavailable("microphone was released".to_string()))?;

        if handle.sample_rate() != self.config.sample_rate {
            return Err(SessionError::DeviceUnavailable(format!(
                "microphone delivers {}Hz, expected {}Hz",
                handle.sample_rate(),
                self.config.sample_rate
            )));
        }
        Ok(())
    }

    /// Start capturing; every completed frame is encoded and passed to `sink`
    pub fn start<F>(&mut self, mut sink: F) -> Result<(), SessionError>
    where
        F: FnMut(EncodedChunk) + Send + 'static,
    {
        if self.task.is_some() {
            warn!("Capture already started");
            return Ok(());
        }

        self.check_format()?;

        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| SessionError::DeviceUnavailable("microphone was released".to_string()))?;

        let mut blocks = handle.open_stream(self.config.queue_depth)?;

        let (fault_tx, fault_rx) = oneshot::channel();
        self.fault_rx = Some(fault_rx);
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let frame_samples = self.config.frame_samples.max(1);
        let sample_rate = self.config.sample_rate;

        info!(
            "Capture started ({}Hz, {} samples per frame)",
            sample_rate, frame_samples
        );

        let task = tokio::spawn(async move {
            let mut accum: Vec<f32> = Vec::with_capacity(frame_samples * 2);
            let mut frames_sent: u64 = 0;

            while let Some(block) = blocks.recv().await {
                if !running.load(Ordering::SeqCst) {
                    return;
                }

                accum.extend_from_slice(&block);

                while accum.len() >= frame_samples {
                    let frame = AudioFrame::new(accum.drain(..frame_samples).collect(), sample_rate);
                    sink(EncodedChunk::from_frame(&frame));
                    frames_sent += 1;
                }
            }

            if running.swap(false, Ordering::SeqCst) {
                error!("Microphone stream ended after {} frame(s)", frames_sent);
                let _ = fault_tx.send(SessionError::DeviceUnavailable(
                    "microphone stream ended unexpectedly".to_string(),
                ));
            } else {
                debug!("Capture task finished after {} frame(s)", frames_sent);
            }
        });

        self.task = Some(task);
        Ok(())
    }

    /// Resolve when the microphone fails mid-session
    ///
    /// Pending forever if capture is not running or stops cleanly.
    pub async fn fault(&mut self) -> SessionError {
        if let Some(rx) = self.fault_rx.as_mut() {
            let result = rx.await;
            self.fault_rx = None;
            if let Ok(fault) = result {
                return fault;
            }
        }
        std::future::pending().await
    }

    /// Stop capturing and release the microphone
    ///
    /// Once this returns the sink will not be called again.
    pub async fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(task) = self.task.take() {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!("Capture task panicked: {}", e);
                }
            }
            info!("Capture stopped");
        }

        self.fault_rx = None;

        if let Some(mut handle) = self.handle.take() {
            handle.release();
            info!("Microphone released");
        }
    }
}

/// Bounded-queue helper for device callbacks: never blocks, drops on overflow
pub(crate) fn push_block(tx: &mpsc::Sender<Vec<f32>>, block: Vec<f32>) -> bool {
    match tx.try_send(block) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Capture queue full, dropping microphone block");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
