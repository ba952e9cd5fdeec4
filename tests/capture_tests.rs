// Tests for the microphone capture engine

mod common;

use anyhow::Result;
use common::{within, MockMicrophone};
use interview_voice::audio::{codec, CaptureConfig, CaptureEngine, EncodedChunk, Microphone};
use interview_voice::SessionError;
use tokio::sync::mpsc;

fn collecting_sink() -> (
    impl FnMut(EncodedChunk) + Send + 'static,
    mpsc::UnboundedReceiver<EncodedChunk>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = move |chunk: EncodedChunk| {
        let _ = tx.send(chunk);
    };
    (sink, rx)
}

/// Samples that survive PCM16 quantization exactly
fn ramp(range: std::ops::Range<usize>) -> Vec<f32> {
    range.map(|i| (i % 1000) as f32 / 32768.0).collect()
}

#[tokio::test]
async fn test_irregular_blocks_become_fixed_frames_in_order() -> Result<()> {
    let (mic, probe) = MockMicrophone::new();
    let handle = mic.acquire().await?;
    let mut engine = CaptureEngine::new(handle, CaptureConfig::default());

    let (sink, mut chunks) = collecting_sink();
    engine.start(sink)?;
    assert!(engine.is_capturing());

    // 9 blocks of 1000 samples: two full frames plus 808 leftover
    for i in 0..9 {
        assert!(probe.send_block(ramp(i * 1000..(i + 1) * 1000)));
    }

    let first = within(chunks.recv()).await?.expect("first frame");
    let second = within(chunks.recv()).await?.expect("second frame");

    assert_eq!(first.mime_type, "audio/pcm;rate=16000");
    assert_eq!(codec::decode(&first.data)?, ramp(0..4096));
    assert_eq!(codec::decode(&second.data)?, ramp(4096..8192));

    engine.stop().await;
    assert!(chunks.try_recv().is_err(), "partial frame is not sent");
    Ok(())
}

#[tokio::test]
async fn test_custom_frame_size() -> Result<()> {
    let (mic, probe) = MockMicrophone::new();
    let config = CaptureConfig {
        frame_samples: 160,
        ..CaptureConfig::default()
    };
    let mut engine = CaptureEngine::new(mic.acquire().await?, config);

    let (sink, mut chunks) = collecting_sink();
    engine.start(sink)?;
    probe.send_block(vec![0.0; 480]);

    for _ in 0..3 {
        let chunk = within(chunks.recv()).await?.expect("frame");
        assert_eq!(codec::decode(&chunk.data)?.len(), 160);
    }

    engine.stop().await;
    Ok(())
}

#[tokio::test]
async fn test_stop_releases_microphone_and_silences_sink() -> Result<()> {
    let (mic, probe) = MockMicrophone::new();
    let mut engine = CaptureEngine::new(mic.acquire().await?, CaptureConfig::default());

    let (sink, mut chunks) = collecting_sink();
    engine.start(sink)?;

    engine.stop().await;
    engine.stop().await;

    assert!(!engine.is_capturing());
    assert_eq!(probe.releases(), 1, "released exactly once");
    assert!(!probe.send_block(vec![0.0; 4096]), "device stream closed");
    assert!(chunks.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn test_stop_without_start_releases_microphone() -> Result<()> {
    let (mic, probe) = MockMicrophone::new();
    let mut engine = CaptureEngine::new(mic.acquire().await?, CaptureConfig::default());

    engine.stop().await;

    assert_eq!(probe.releases(), 1);
    assert!(!probe.stream_opened());
    Ok(())
}

#[tokio::test]
async fn test_wrong_sample_rate_is_device_unavailable() -> Result<()> {
    let (mic, probe) = MockMicrophone::with_rate(44100);
    let mut engine = CaptureEngine::new(mic.acquire().await?, CaptureConfig::default());

    let (sink, _chunks) = collecting_sink();
    let result = engine.start(sink);

    assert!(matches!(result, Err(SessionError::DeviceUnavailable(_))));
    assert!(!probe.stream_opened());
    Ok(())
}

#[tokio::test]
async fn test_device_disappearing_raises_fault() -> Result<()> {
    let (mic, probe) = MockMicrophone::new();
    let mut engine = CaptureEngine::new(mic.acquire().await?, CaptureConfig::default());

    let (sink, _chunks) = collecting_sink();
    engine.start(sink)?;

    probe.disconnect();
    let fault = within(engine.fault()).await?;

    assert!(matches!(fault, SessionError::DeviceUnavailable(_)));
    assert!(!engine.is_capturing());

    engine.stop().await;
    assert_eq!(probe.releases(), 1);
    Ok(())
}

#[tokio::test]
async fn test_clean_stop_raises_no_fault() -> Result<()> {
    let (mic, _probe) = MockMicrophone::new();
    let mut engine = CaptureEngine::new(mic.acquire().await?, CaptureConfig::default());

    let (sink, _chunks) = collecting_sink();
    engine.start(sink)?;
    engine.stop().await;

    let fault = tokio::time::timeout(std::time::Duration::from_millis(50), engine.fault()).await;
    assert!(fault.is_err(), "no fault after a clean stop");
    Ok(())
}

#[tokio::test]
async fn test_check_format_before_start() -> Result<()> {
    let (mic, _probe) = MockMicrophone::new();
    let mut engine = CaptureEngine::new(mic.acquire().await?, CaptureConfig::default());
    assert!(engine.check_format().is_ok());

    engine.stop().await;
    assert!(matches!(
        engine.check_format(),
        Err(SessionError::DeviceUnavailable(_))
    ));

    let (mic, probe) = MockMicrophone::with_rate(48000);
    let engine = CaptureEngine::new(mic.acquire().await?, CaptureConfig::default());
    assert!(matches!(
        engine.check_format(),
        Err(SessionError::DeviceUnavailable(_))
    ));
    assert!(!probe.stream_opened());
    Ok(())
}
