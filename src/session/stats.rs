use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// When the session became active
    pub started_at: Option<DateTime<Utc>>,

    /// Active duration in seconds (up to now, or to the end of the session)
    pub duration_secs: f64,

    /// Microphone chunks handed to the transport
    pub chunks_sent: u64,

    /// Microphone chunks dropped (queue full or session not active)
    pub chunks_dropped: u64,

    /// Agent frames scheduled for playback
    pub frames_scheduled: u64,

    /// Agent frames skipped (undecodable, empty, or over the backlog limit)
    pub frames_dropped: u64,

    /// Number of barge-in interruptions
    pub interruptions: u64,
}

/// Live counters shared between the controller and its session task
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub chunks_sent: AtomicU64,
    pub chunks_dropped: AtomicU64,
    pub frames_scheduled: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub interruptions: AtomicU64,
    window: Mutex<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)>,
}

impl SessionCounters {
    pub fn reset(&self) {
        for counter in [
            &self.chunks_sent,
            &self.chunks_dropped,
            &self.frames_scheduled,
            &self.frames_dropped,
            &self.interruptions,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        *self.window.lock().unwrap_or_else(|p| p.into_inner()) = (None, None);
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_started(&self) {
        self.window.lock().unwrap_or_else(|p| p.into_inner()).0 = Some(Utc::now());
    }

    pub fn mark_ended(&self) {
        let mut window = self.window.lock().unwrap_or_else(|p| p.into_inner());
        if window.0.is_some() && window.1.is_none() {
            window.1 = Some(Utc::now());
        }
    }

    pub fn snapshot(&self) -> SessionStats {
        let (started_at, ended_at) = *self.window.lock().unwrap_or_else(|p| p.into_inner());
        let duration_secs = started_at
            .map(|start| {
                let end = ended_at.unwrap_or_else(Utc::now);
                end.signed_duration_since(start).num_milliseconds() as f64 / 1000.0
            })
            .unwrap_or(0.0);

        SessionStats {
            started_at,
            duration_secs,
            chunks_sent: self.chunks_sent.load(Ordering::SeqCst),
            chunks_dropped: self.chunks_dropped.load(Ordering::SeqCst),
            frames_scheduled: self.frames_scheduled.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
            interruptions: self.interruptions.load(Ordering::SeqCst),
        }
    }
}
