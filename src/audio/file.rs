// WAV file devices
//
// `WavMicrophone` plays a recorded answer into the session as if it were a
// live microphone, paced in real time. `WavOutput` is a virtual speaker
// whose clock is wall time since it was opened; everything the scheduler
// plays on it is rendered into a WAV file.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, MicHandle, Microphone, OutputDevice, OutputHandle, INPUT_SAMPLE_RATE};
use super::capture::push_block;
use super::resample::resample_linear;
use super::timeline::Timeline;
use crate::error::SessionError;

/// Samples per block pushed by the WAV microphone (64ms at 16kHz)
const MIC_BLOCK_SAMPLES: usize = 1024;

/// Read a mono WAV file as f32 samples
pub fn read_wav_mono(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32)> {
    let path = path.as_ref();
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;

    let spec = reader.spec();
    if spec.channels != 1 {
        anyhow::bail!("Expected mono audio, got {} channels", spec.channels);
    }

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?
        }
    };

    Ok((samples, spec.sample_rate))
}

/// A microphone backed by a 16kHz mono WAV file
pub struct WavMicrophone {
    path: PathBuf,
    loop_input: bool,
    name: String,
}

impl WavMicrophone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("WAV file {}", path.display());
        Self {
            path,
            loop_input: false,
            name,
        }
    }

    /// Restart the file at EOF instead of going silent
    pub fn looped(mut self, loop_input: bool) -> Self {
        self.loop_input = loop_input;
        self
    }
}

#[async_trait]
impl Microphone for WavMicrophone {
    async fn acquire(&self) -> Result<Box<dyn MicHandle>, SessionError> {
        let (samples, sample_rate) = read_wav_mono(&self.path).map_err(|e| {
            if self.path.exists() {
                SessionError::DeviceUnavailable(format!("{:#}", e))
            } else {
                SessionError::PermissionDenied(format!("{:#}", e))
            }
        })?;

        if sample_rate != INPUT_SAMPLE_RATE {
            return Err(SessionError::DeviceUnavailable(format!(
                "{} is {}Hz, expected {}Hz",
                self.path.display(),
                sample_rate,
                INPUT_SAMPLE_RATE
            )));
        }

        info!(
            "Acquired {} ({:.1}s of audio)",
            self.name,
            samples.len() as f64 / sample_rate as f64
        );

        Ok(Box::new(WavMicHandle {
            samples,
            sample_rate,
            loop_input: self.loop_input,
            task: None,
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct WavMicHandle {
    samples: Vec<f32>,
    sample_rate: u32,
    loop_input: bool,
    task: Option<JoinHandle<()>>,
}

impl MicHandle for WavMicHandle {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn open_stream(&mut self, queue_depth: usize) -> Result<mpsc::Receiver<Vec<f32>>, SessionError> {
        if self.task.is_some() {
            return Err(SessionError::DeviceUnavailable(
                "WAV microphone stream already open".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        let samples = std::mem::take(&mut self.samples);
        let loop_input = self.loop_input;
        let period = Duration::from_secs_f64(MIC_BLOCK_SAMPLES as f64 / self.sample_rate as f64);

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut offset = 0usize;

            loop {
                ticker.tick().await;

                let block = if offset < samples.len() {
                    let end = (offset + MIC_BLOCK_SAMPLES).min(samples.len());
                    let mut block = samples[offset..end].to_vec();
                    block.resize(MIC_BLOCK_SAMPLES, 0.0);
                    offset = end;
                    if offset >= samples.len() && loop_input {
                        offset = 0;
                    }
                    block
                } else {
                    vec![0.0; MIC_BLOCK_SAMPLES]
                };

                if !push_block(&tx, block) {
                    debug!("WAV microphone consumer went away");
                    break;
                }
            }
        }));

        Ok(rx)
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for WavMicHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// A virtual speaker that renders scheduled audio into a WAV file
pub struct WavOutput {
    path: PathBuf,
    name: String,
}

impl WavOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("WAV file {}", path.display());
        Self { path, name }
    }
}

#[async_trait]
impl OutputDevice for WavOutput {
    async fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputHandle>, SessionError> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };

        let writer = WavWriter::create(&self.path, spec)
            .with_context(|| format!("Failed to create {}", self.path.display()))
            .map_err(|e| SessionError::DeviceUnavailable(format!("{:#}", e)))?;

        info!("Opened {} for playback ({}Hz)", self.name, sample_rate);

        Ok(Box::new(WavOutputHandle {
            writer: Some(writer),
            timeline: Timeline::new(sample_rate),
            opened_at: Instant::now(),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct WavOutputHandle {
    writer: Option<WavWriter<BufWriter<File>>>,
    timeline: Timeline,
    opened_at: Instant,
}

impl WavOutputHandle {
    /// Render (and write) everything up to sample position `target`
    fn render_to(&mut self, target: u64) -> Result<(), SessionError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SessionError::DeviceUnavailable("output file is closed".to_string()))?;

        let mut result = Ok(());
        self.timeline.render_until(target, |block| {
            if result.is_err() {
                return;
            }
            for &sample in block {
                let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                if let Err(e) = writer.write_sample(value) {
                    result = Err(SessionError::DeviceUnavailable(format!(
                        "Failed to write output file: {}",
                        e
                    )));
                    return;
                }
            }
        });
        result
    }

    fn wall_clock_samples(&self) -> u64 {
        self.timeline.to_samples(self.opened_at.elapsed().as_secs_f64())
    }
}

impl OutputHandle for WavOutputHandle {
    fn now(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    fn schedule_frame(&mut self, frame: AudioFrame, start_at: f64) -> Result<(), SessionError> {
        let samples = if frame.sample_rate == self.timeline.sample_rate() {
            frame.samples
        } else {
            resample_linear(&frame.samples, frame.sample_rate, self.timeline.sample_rate())
        };

        // Flush what has certainly played, but never past the new frame
        let target = self.wall_clock_samples().min(self.timeline.to_samples(start_at));
        self.render_to(target)?;

        self.timeline.schedule(samples, start_at);
        Ok(())
    }

    fn cancel_all(&mut self) {
        let played = self.wall_clock_samples();
        if let Err(e) = self.render_to(played) {
            warn!("Failed to flush output before cancel: {}", e);
        }
        let dropped = self.timeline.cancel_all();
        debug!("Cancelled {} scheduled segment(s)", dropped);
    }

    fn close(&mut self) -> Result<(), SessionError> {
        if self.writer.is_none() {
            return Ok(());
        }

        // Let everything already scheduled play out into the file
        let end = self.timeline.position() + self.timeline.remaining();
        self.render_to(end)?;

        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| SessionError::DeviceUnavailable(format!("Failed to finalize output file: {}", e)))?;
        }

        info!(
            "Output file closed ({:.1}s rendered)",
            self.timeline.now()
        );
        Ok(())
    }
}
