// Playback scheduler for agent speech
//
// Agent audio arrives as a stream of short PCM chunks. Each chunk is placed
// on the output device's clock right after the previous one so the
// utterance plays back-to-back, without gaps or overlaps:
//
//   start_at        = max(next_start_time, device_now)
//   next_start_time = start_at + duration
//
// An interruption (barge-in) cancels everything scheduled and restarts the
// timeline from "now".

use std::collections::VecDeque;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::backend::{AudioFrame, OutputHandle, OUTPUT_SAMPLE_RATE};
use super::codec;
use crate::error::SessionError;

/// Configuration for the playback scheduler
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Rate at which agent audio is interpreted (default: 24kHz)
    pub sample_rate: u32,
    /// Frames that would start further ahead than this are dropped
    /// (default: 60 seconds)
    pub max_backlog_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: OUTPUT_SAMPLE_RATE,
            max_backlog_ms: 60_000,
        }
    }
}

impl PlaybackConfig {
    pub fn max_backlog(&self) -> Duration {
        Duration::from_millis(self.max_backlog_ms)
    }
}

/// Where a frame landed on the device clock
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFrame {
    pub start_at: f64,
    pub end_at: f64,
    pub samples: usize,
}

/// Schedules decoded agent audio on an output device
///
/// Owns the playback cursor (`next_start_time`); nothing else reads or
/// writes it.
pub struct PlaybackScheduler {
    config: PlaybackConfig,
    output: Option<Box<dyn OutputHandle>>,
    /// Device time at which the next frame should begin
    next_start_time: f64,
    /// Frames handed to the device that may still be playing
    in_flight: VecDeque<ScheduledFrame>,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputHandle>, config: PlaybackConfig) -> Self {
        let next_start_time = output.now();

        info!(
            "Playback scheduler initialized ({}Hz, max backlog {}ms)",
            config.sample_rate, config.max_backlog_ms
        );

        Self {
            config,
            output: Some(output),
            next_start_time,
            in_flight: VecDeque::new(),
        }
    }

    /// Current playback cursor
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Decode a base64 PCM16 payload and schedule it
    ///
    /// Returns `Ok(None)` if the chunk was skipped (undecodable, empty, or
    /// over the backlog limit). Only output device failures are errors.
    pub fn schedule_chunk(&mut self, payload: &str) -> Result<Option<ScheduledFrame>, SessionError> {
        let samples = match codec::decode(payload) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping undecodable audio chunk: {:#}", e);
                return Ok(None);
            }
        };

        self.schedule(AudioFrame::new(samples, self.config.sample_rate))
    }

    /// Schedule a decoded frame directly after the previous one
    pub fn schedule(&mut self, frame: AudioFrame) -> Result<Option<ScheduledFrame>, SessionError> {
        let output = self
            .output
            .as_mut()
            .ok_or_else(|| SessionError::DeviceUnavailable("output device is closed".to_string()))?;

        if frame.is_empty() {
            debug!("Skipping empty audio frame");
            return Ok(None);
        }

        let now = output.now();
        let start_at = self.next_start_time.max(now);

        let backlog = start_at - now;
        if backlog > self.config.max_backlog().as_secs_f64() {
            warn!(
                "Playback backlog {:.1}s exceeds limit, dropping {} samples",
                backlog,
                frame.len()
            );
            return Ok(None);
        }

        let scheduled = ScheduledFrame {
            start_at,
            end_at: start_at + frame.duration_secs(),
            samples: frame.len(),
        };

        output.schedule_frame(frame, start_at)?;
        self.next_start_time = scheduled.end_at;

        self.in_flight.retain(|f| f.end_at > now);
        self.in_flight.push_back(scheduled);

        debug!(
            "Scheduled {} samples at {:.3}s (cursor {:.3}s)",
            scheduled.samples, scheduled.start_at, self.next_start_time
        );

        Ok(Some(scheduled))
    }

    /// Frames scheduled on the device that have not finished playing
    pub fn pending_frames(&mut self) -> usize {
        let Some(output) = self.output.as_ref() else {
            return 0;
        };
        let now = output.now();
        self.in_flight.retain(|f| f.end_at > now);
        self.in_flight.len()
    }

    /// Handle a server interruption: cancel queued audio, restart at "now"
    ///
    /// Returns how many frames were still pending.
    pub fn interrupt(&mut self) -> usize {
        let cancelled = self.flush();
        info!("Playback interrupted, cancelled {} pending frame(s)", cancelled);
        cancelled
    }

    /// Cancel everything scheduled and reset the cursor to the device clock
    pub fn flush(&mut self) -> usize {
        let pending = self.pending_frames();

        if let Some(output) = self.output.as_mut() {
            output.cancel_all();
            self.next_start_time = output.now();
        }
        self.in_flight.clear();

        pending
    }

    /// Release the output device. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), SessionError> {
        self.in_flight.clear();
        match self.output.take() {
            Some(mut output) => {
                info!("Closing output device");
                output.close()
            }
            None => Ok(()),
        }
    }
}
