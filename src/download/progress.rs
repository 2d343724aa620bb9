// Echo Downloader - download, merge and tag pipeline for Echo extensions
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Download progress tracking and reporting
//!
//! # Progress Events
//! - `Initialized(total?)` - transfer opened, total size if known
//! - `InProgress(received, speed?)` - bytes so far (or elapsed ms for remux
//!   downloads) and the last throughput sample
//! - `Paused(received)`
//! - `Completed(size, file)`, `Failed(error)`, `Cancelled` - terminal
//!
//! # Ordering
//! [`ProgressSender`] lets exactly one terminal event through per task run and
//! drops anything sent after it, so a receiver never sees `InProgress` after
//! `Completed`.

use crate::error::EchoError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Minimum time between throughput samples
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(1000);

/// Lifecycle of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    /// Created but never started
    Idle,
    /// Transfer or remux in flight
    Running,
    /// Stopped by the user, resumable
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadState::Idle => "idle",
            DownloadState::Running => "running",
            DownloadState::Paused => "paused",
            DownloadState::Completed => "completed",
            DownloadState::Failed => "failed",
            DownloadState::Cancelled => "cancelled",
        }
    }
}

/// Progress event for one task run
#[derive(Debug, Clone)]
pub enum Progress {
    Initialized { total: Option<u64> },
    InProgress { received: u64, speed: Option<u64> },
    Paused { received: u64 },
    Completed { size: u64, file: PathBuf },
    Failed { error: Arc<EchoError> },
    Cancelled,
}

impl Progress {
    pub fn failed(error: EchoError) -> Self {
        Progress::Failed {
            error: Arc::new(error),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Progress::Completed { .. } | Progress::Failed { .. } | Progress::Cancelled
        )
    }

    /// Format progress as display string
    pub fn display_string(&self) -> String {
        match self {
            Progress::Initialized { total: Some(total) } => {
                format!("Starting ({})", bytes_string(*total))
            }
            Progress::Initialized { total: None } => "Starting".to_string(),
            Progress::InProgress { received, speed } => match speed {
                Some(speed) => format!("{} - {}/s", bytes_string(*received), bytes_string(*speed)),
                None => bytes_string(*received),
            },
            Progress::Paused { received } => format!("Paused at {}", bytes_string(*received)),
            Progress::Completed { size, file } => {
                format!("Completed {} ({})", file.display(), bytes_string(*size))
            }
            Progress::Failed { error } => format!("Failed - {}", error),
            Progress::Cancelled => "Cancelled".to_string(),
        }
    }
}

/// Format bytes as human-readable string (e.g., "45.2 MB")
pub fn bytes_string(bytes: u64) -> String {
    let mb = bytes as f64 / 1_000_000.0;
    format!("{:.1} MB", mb)
}

/// Callback type for progress updates
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Sending half of a task's progress channel
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<Progress>,
    // Guards check-then-send so a terminal event cannot be overtaken
    finished: Arc<Mutex<bool>>,
    closed: Arc<AtomicBool>,
}

/// Receiving half of a task's progress channel
pub struct ProgressReceiver {
    rx: mpsc::UnboundedReceiver<Progress>,
}

/// Create a progress channel
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ProgressSender {
            tx,
            finished: Arc::new(Mutex::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        },
        ProgressReceiver { rx },
    )
}

impl ProgressSender {
    /// Send an event. Returns false if it was dropped because a terminal
    /// event was already sent.
    pub fn send(&self, progress: Progress) -> bool {
        let Ok(mut finished) = self.finished.lock() else {
            return false;
        };
        if *finished {
            return false;
        }
        if progress.is_terminal() {
            *finished = true;
            self.closed.store(true, Ordering::SeqCst);
        }
        // A dropped receiver is not an error for the sender
        let _ = self.tx.send(progress);
        true
    }

    pub fn is_finished(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ProgressReceiver {
    pub async fn recv(&mut self) -> Option<Progress> {
        self.rx.recv().await
    }

    /// Forward events to `on_event` until the terminal one, which is returned.
    /// `None` means every sender went away without finishing.
    pub async fn wait_terminal<F>(mut self, mut on_event: F) -> Option<Progress>
    where
        F: FnMut(&Progress),
    {
        while let Some(progress) = self.rx.recv().await {
            on_event(&progress);
            if progress.is_terminal() {
                return Some(progress);
            }
        }
        None
    }
}

/// Throughput sampling at fixed intervals
///
/// The speed reported is the number of bytes received since the previous
/// sample, taken no more often than [`SAMPLE_INTERVAL`].
#[derive(Debug)]
pub struct ThroughputSampler {
    interval: Duration,
    last_sample: Instant,
    last_bytes: u64,
}

impl ThroughputSampler {
    pub fn new(start_bytes: u64) -> Self {
        Self::with_interval(start_bytes, SAMPLE_INTERVAL)
    }

    pub fn with_interval(start_bytes: u64, interval: Duration) -> Self {
        Self {
            interval,
            last_sample: Instant::now(),
            last_bytes: start_bytes,
        }
    }

    /// Bytes received in the elapsed interval, once the interval has passed
    pub fn sample(&mut self, received: u64) -> Option<u64> {
        let now = Instant::now();
        if now.duration_since(self.last_sample) < self.interval {
            return None;
        }
        let speed = received.saturating_sub(self.last_bytes);
        self.last_sample = now;
        self.last_bytes = received;
        Some(speed)
    }
}

/// Fixed-length step counter for the merge and tag stages. Steps running
/// concurrently may each advance through a shared reference.
pub struct StepProgress {
    total: u64,
    done: AtomicU64,
    callback: Option<ProgressCallback>,
}

impl StepProgress {
    pub fn new(total: u64, callback: Option<ProgressCallback>) -> Self {
        let steps = Self {
            total,
            done: AtomicU64::new(0),
            callback,
        };
        steps.emit(Progress::Initialized { total: Some(total) });
        steps
    }

    pub fn advance(&self) {
        let total = self.total;
        let done = match self
            .done
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| Some((d + 1).min(total)))
        {
            Ok(previous) | Err(previous) => (previous + 1).min(total),
        };
        self.emit(Progress::InProgress {
            received: done,
            speed: None,
        });
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::SeqCst)
    }

    fn emit(&self, progress: Progress) {
        if let Some(callback) = &self.callback {
            callback(progress);
        }
    }
}
