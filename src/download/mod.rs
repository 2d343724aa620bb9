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


//! Downloading sources into work files
//!
//! - `stream` - byte transfer with range resume, the [`Fetcher`] seam
//! - `progress` - progress events and the terminal-once channel
//! - `task` - per-source state machine (start, pause, resume, cancel)
//! - `manager` - per-track pipelines with bounded concurrency

pub mod manager;
pub mod progress;
pub mod stream;
pub mod task;

// Re-export commonly used types
pub use manager::{DownloadManager, PipelineCallback, PipelineEvent, PipelineStage, TrackOutcome};
pub use progress::{DownloadState, Progress, ProgressCallback, ProgressReceiver, ProgressSender};
pub use stream::{download_http, transfer, FetchResponse, Fetcher, HttpFetcher, TransferControl, TransferOutcome};
pub use task::{DownloadTask, TaskCapabilities};
