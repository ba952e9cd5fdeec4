// Live audio devices through cpal
//
// cpal streams are not `Send`, so each stream lives on its own thread for as
// long as the handle holds it. The input callback downmixes and resamples to
// 16kHz before pushing blocks into the capture queue; the output callback
// pulls from a shared `Timeline` running at the device rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{AudioFrame, MicHandle, Microphone, OutputDevice, OutputHandle, INPUT_SAMPLE_RATE};
use super::capture::push_block;
use super::resample::{downmix_to_mono, resample_linear};
use super::timeline::Timeline;
use crate::error::SessionError;

/// How often stream threads check for a stop request or a device error
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Keeps a stream thread alive until stopped
struct StreamThread {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio stream thread panicked");
            }
        }
    }
}

/// Park the current thread until stopped or the stream reports an error
fn park_stream(stream: cpal::Stream, stop_rx: std_mpsc::Receiver<()>, failed: Arc<AtomicBool>) {
    loop {
        match stop_rx.recv_timeout(POLL_INTERVAL) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                if failed.load(Ordering::SeqCst) {
                    break;
                }
            }
        }
    }
    drop(stream);
}

/// Default system input device
pub struct CpalMicrophone {
    name: String,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self {
            name: "default input device".to_string(),
        }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&self) -> Result<Box<dyn MicHandle>, SessionError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            SessionError::PermissionDenied("no input device available".to_string())
        })?;

        // Probing the config is where access problems show up
        let config = device
            .default_input_config()
            .map_err(|e| SessionError::PermissionDenied(e.to_string()))?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Acquired input device: {} ({:?})", device_name, config);

        Ok(Box::new(CpalMicHandle { stream: None }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct CpalMicHandle {
    stream: Option<StreamThread>,
}

fn build_input_stream(
    tx: mpsc::Sender<Vec<f32>>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, String> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| "input device disappeared".to_string())?;
    let config = device.default_input_config().map_err(|e| e.to_string())?;

    let channels = config.channels() as usize;
    let device_rate = config.sample_rate().0;
    let err_flag = Arc::clone(&failed);
    let on_error = move |err: cpal::StreamError| {
        error!("Input stream error: {}", err);
        err_flag.store(true, Ordering::SeqCst);
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix_to_mono(data, channels);
                let block = resample_linear(&mono, device_rate, INPUT_SAMPLE_RATE);
                if !push_block(&tx, block) {
                    failed.store(true, Ordering::SeqCst);
                }
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config.into(),
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let floats: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                let mono = downmix_to_mono(&floats, channels);
                let block = resample_linear(&mono, device_rate, INPUT_SAMPLE_RATE);
                if !push_block(&tx, block) {
                    failed.store(true, Ordering::SeqCst);
                }
            },
            on_error,
            None,
        ),
        format => return Err(format!("Unsupported input format: {:?}", format)),
    }
    .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok(stream)
}

impl MicHandle for CpalMicHandle {
    fn sample_rate(&self) -> u32 {
        INPUT_SAMPLE_RATE
    }

    fn open_stream(&mut self, queue_depth: usize) -> Result<mpsc::Receiver<Vec<f32>>, SessionError> {
        if self.stream.is_some() {
            return Err(SessionError::DeviceUnavailable(
                "input stream already open".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();

        let thread = thread::spawn(move || {
            let failed = Arc::new(AtomicBool::new(false));
            match build_input_stream(tx, Arc::clone(&failed)) {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    park_stream(stream, stop_rx, failed);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err("input stream thread exited".to_string()));
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(SessionError::DeviceUnavailable(e));
        }

        info!("Input stream started");
        self.stream = Some(StreamThread {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        });
        Ok(rx)
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Input stream stopped");
        }
    }
}

impl Drop for CpalMicHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Default system output device
pub struct CpalOutput {
    name: String,
}

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            name: "default output device".to_string(),
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_timeline(timeline: &Mutex<Timeline>) -> std::sync::MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn build_output_stream(
    failed: Arc<AtomicBool>,
) -> Result<(cpal::Stream, Arc<Mutex<Timeline>>), String> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| "no output device available".to_string())?;
    let config = device.default_output_config().map_err(|e| e.to_string())?;

    let channels = config.channels() as usize;
    let timeline = Arc::new(Mutex::new(Timeline::new(config.sample_rate().0)));
    let shared = Arc::clone(&timeline);

    let on_error = move |err: cpal::StreamError| {
        error!("Output stream error: {}", err);
        failed.store(true, Ordering::SeqCst);
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &config.into(),
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mut mono = vec![0.0f32; data.len() / channels.max(1)];
                lock_timeline(&shared).render(&mut mono);
                for (frame, value) in data.chunks_mut(channels.max(1)).zip(mono) {
                    frame.fill(value);
                }
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &config.into(),
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mut mono = vec![0.0f32; data.len() / channels.max(1)];
                lock_timeline(&shared).render(&mut mono);
                for (frame, value) in data.chunks_mut(channels.max(1)).zip(mono) {
                    frame.fill((value * i16::MAX as f32) as i16);
                }
            },
            on_error,
            None,
        ),
        format => return Err(format!("Unsupported output format: {:?}", format)),
    }
    .map_err(|e| e.to_string())?;

    stream.play().map_err(|e| e.to_string())?;
    Ok((stream, timeline))
}

#[async_trait]
impl OutputDevice for CpalOutput {
    async fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputHandle>, SessionError> {
        let (stop_tx, stop_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let failed = Arc::new(AtomicBool::new(false));
        let thread_failed = Arc::clone(&failed);

        let thread = thread::spawn(move || {
            match build_output_stream(Arc::clone(&thread_failed)) {
                Ok((stream, timeline)) => {
                    let _ = ready_tx.send(Ok(timeline));
                    park_stream(stream, stop_rx, thread_failed);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        });

        let timeline = ready_rx
            .await
            .unwrap_or_else(|_| Err("output stream thread exited".to_string()))
            .map_err(SessionError::DeviceUnavailable)?;

        let device_rate = lock_timeline(&timeline).sample_rate();
        info!(
            "Output stream started ({}Hz device, {}Hz source)",
            device_rate, sample_rate
        );

        Ok(Box::new(CpalOutputHandle {
            timeline,
            failed,
            stream: StreamThread {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            },
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct CpalOutputHandle {
    timeline: Arc<Mutex<Timeline>>,
    failed: Arc<AtomicBool>,
    stream: StreamThread,
}

impl OutputHandle for CpalOutputHandle {
    fn now(&self) -> f64 {
        lock_timeline(&self.timeline).now()
    }

    fn schedule_frame(&mut self, frame: AudioFrame, start_at: f64) -> Result<(), SessionError> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(SessionError::DeviceUnavailable(
                "output stream failed".to_string(),
            ));
        }

        let mut timeline = lock_timeline(&self.timeline);
        let samples = resample_linear(&frame.samples, frame.sample_rate, timeline.sample_rate());
        timeline.schedule(samples, start_at);
        Ok(())
    }

    fn cancel_all(&mut self) {
        let dropped = lock_timeline(&self.timeline).cancel_all();
        if dropped > 0 {
            info!("Cancelled {} scheduled segment(s)", dropped);
        }
    }

    fn close(&mut self) -> Result<(), SessionError> {
        self.stream.stop();
        if self.failed.load(Ordering::SeqCst) {
            warn!("Output stream had failed before close");
        }
        Ok(())
    }
}

impl Drop for CpalOutputHandle {
    fn drop(&mut self) {
        self.stream.stop();
    }
}
