pub mod backend;
pub mod capture;
pub mod codec;
pub mod file;
pub mod playback;
pub mod resample;
pub mod timeline;

#[cfg(feature = "cpal")]
pub mod live;

pub use backend::{
    AudioFrame, EncodedChunk, MicHandle, Microphone, OutputDevice, OutputHandle,
    INPUT_FRAME_SAMPLES, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use capture::{CaptureConfig, CaptureEngine};
pub use file::{WavMicrophone, WavOutput};
pub use playback::{PlaybackConfig, PlaybackScheduler, ScheduledFrame};
pub use timeline::Timeline;

#[cfg(feature = "cpal")]
pub use live::{CpalMicrophone, CpalOutput};
