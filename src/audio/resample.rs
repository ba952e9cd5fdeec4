// Sample-rate and channel conversion for device I/O
//
// Devices rarely run at the rates the agent speaks (16kHz in, 24kHz out),
// so live devices convert at the edge. Linear interpolation is plenty for
// speech.

/// Average interleaved channels down to mono
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample mono audio with linear interpolation
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - idx as f64) as f32;
            samples[idx] + (samples[next] - samples[idx]) * frac
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix_to_mono(&[0.5, 0.1, -0.2, 0.2], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!(mono[1].abs() < 1e-6);
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        assert_eq!(downmix_to_mono(&[0.1, 0.2], 1), vec![0.1, 0.2]);
    }

    #[test]
    fn test_resample_same_rate() {
        assert_eq!(resample_linear(&[0.1, 0.2, 0.3], 16000, 16000), vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_resample_down_by_three() {
        let input: Vec<f32> = (0..4800).map(|i| i as f32 / 4800.0).collect();
        let output = resample_linear(&input, 48000, 16000);
        assert_eq!(output.len(), 1600);
        assert!((output[1] - input[3]).abs() < 1e-6);
    }

    #[test]
    fn test_resample_up_doubles_length() {
        let output = resample_linear(&[0.0, 1.0], 24000, 48000);
        assert_eq!(output.len(), 4);
        assert_eq!(output[0], 0.0);
        assert!((output[1] - 0.5).abs() < 1e-6);
    }
}
