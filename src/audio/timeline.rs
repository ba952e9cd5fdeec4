// Sample-accurate playback timeline
//
// Output devices that do not have a native "play this buffer at time T"
// primitive keep one of these. Segments are placed at absolute sample
// positions and `render` pulls them out in device order, filling any gap
// with silence.

use std::collections::VecDeque;

#[derive(Debug)]
struct Segment {
    start: u64,
    samples: Vec<f32>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Scheduled mono audio on an absolute sample clock
#[derive(Debug)]
pub struct Timeline {
    sample_rate: u32,
    /// Samples already rendered; the device clock
    position: u64,
    segments: VecDeque<Segment>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: 0,
            segments: VecDeque::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples rendered so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Device clock in seconds
    pub fn now(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Convert device seconds to the nearest sample position
    pub fn to_samples(&self, secs: f64) -> u64 {
        (secs.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Place `samples` at device time `start_at`
    ///
    /// Any part that falls before the current position has already been
    /// missed and is discarded.
    pub fn schedule(&mut self, samples: Vec<f32>, start_at: f64) {
        let mut start = self.to_samples(start_at);
        let mut samples = samples;

        if start < self.position {
            let late = (self.position - start) as usize;
            if late >= samples.len() {
                return;
            }
            samples.drain(..late);
            start = self.position;
        }

        let index = self
            .segments
            .iter()
            .position(|s| s.start > start)
            .unwrap_or(self.segments.len());
        self.segments.insert(index, Segment { start, samples });
    }

    /// Drop every segment that has not finished; returns how many were dropped
    pub fn cancel_all(&mut self) -> usize {
        let dropped = self.segments.len();
        self.segments.clear();
        dropped
    }

    /// Number of segments still pending
    pub fn pending(&self) -> usize {
        self.segments.len()
    }

    /// Samples between the current position and the end of the last segment
    pub fn remaining(&self) -> u64 {
        self.segments
            .iter()
            .map(Segment::end)
            .max()
            .map(|end| end.saturating_sub(self.position))
            .unwrap_or(0)
    }

    /// Render the next `out.len()` samples and advance the clock
    ///
    /// Overlapping segments are summed and clipped.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        let window_start = self.position;
        let window_end = window_start + out.len() as u64;

        for segment in &self.segments {
            if segment.start >= window_end {
                break;
            }
            let from = segment.start.max(window_start);
            let to = segment.end().min(window_end);
            for t in from..to {
                let value = segment.samples[(t - segment.start) as usize];
                let slot = &mut out[(t - window_start) as usize];
                *slot = (*slot + value).clamp(-1.0, 1.0);
            }
        }

        self.position = window_end;
        self.segments.retain(|s| s.end() > window_end);
    }

    /// Render up to `target` samples, handing each rendered block to `sink`
    pub fn render_until(&mut self, target: u64, mut sink: impl FnMut(&[f32])) {
        let mut block = [0.0f32; 1024];
        while self.position < target {
            let n = ((target - self.position) as usize).min(block.len());
            self.render(&mut block[..n]);
            sink(&block[..n]);
        }
    }
}
