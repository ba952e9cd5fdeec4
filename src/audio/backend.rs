use async_trait::async_trait;
use tokio::sync::mpsc;

use super::codec;
use crate::error::SessionError;

/// Microphone capture rate expected by the agent
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Rate of the synthesized speech the agent sends back
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per captured frame (256ms at 16kHz)
pub const INPUT_FRAME_SAMPLES: usize = 4096;

/// A block of mono f32 samples at a known rate
///
/// Frames are produced once and then moved to their consumer
/// (capture -> transport, transport -> scheduler).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// A captured frame ready for the wire: base64 PCM16 plus its MIME descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    /// Base64-encoded PCM16 LE bytes
    pub data: String,
    /// e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl EncodedChunk {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        Self {
            data: codec::encode(&frame.samples),
            mime_type: codec::pcm_mime_type(frame.sample_rate),
        }
    }
}

/// Microphone capability
///
/// Implementations:
/// - `WavMicrophone`: streams a WAV file in real time (testing/rehearsal)
/// - `CpalMicrophone`: default input device (`cpal` feature)
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Acquire the device
    ///
    /// Fails with `PermissionDenied` when access is refused or there is
    /// no device to open.
    async fn acquire(&self) -> Result<Box<dyn MicHandle>, SessionError>;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// An acquired microphone
pub trait MicHandle: Send {
    /// Native sample rate of the blocks this handle produces
    fn sample_rate(&self) -> u32;

    /// Start delivering raw sample blocks (any length, mono)
    ///
    /// The device side never blocks: blocks that do not fit in the
    /// `queue_depth`-bounded channel are dropped. The channel closing while
    /// the handle is still held means the device went away.
    fn open_stream(&mut self, queue_depth: usize) -> Result<mpsc::Receiver<Vec<f32>>, SessionError>;

    /// Release the device. Safe to call more than once.
    fn release(&mut self);
}

/// Output device capability
#[async_trait]
pub trait OutputDevice: Send + Sync {
    /// Open the device for playback of mono audio at `sample_rate`
    async fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputHandle>, SessionError>;

    /// Get device name for logging
    fn name(&self) -> &str;
}

/// An opened output device with its own clock
pub trait OutputHandle: Send {
    /// Device clock in seconds
    fn now(&self) -> f64;

    /// Schedule `frame` to start playing at device time `start_at`
    fn schedule_frame(&mut self, frame: AudioFrame, start_at: f64) -> Result<(), SessionError>;

    /// Stop and discard everything scheduled that has not finished playing
    fn cancel_all(&mut self);

    /// Release the device
    fn close(&mut self) -> Result<(), SessionError>;
}
