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


//! Echo Downloader - download, merge and tag pipeline for Echo music extensions
//!
//! Given a track picked from an extension, the pipeline selects a server and
//! source for the configured quality tier, downloads it (byte copy with range
//! resume, or an ffmpeg remux for manifest sources), renames it after its
//! probed container, writes tags, cover and lyrics, and moves the result into
//! the user's destination folder.
//!
//! # Module Organization
//! - `client` - [`DownloadClient`], every stage as its own call
//! - `download` - transfer engine, task state machine, batch manager
//! - `audio` - ffmpeg/ffprobe wrapper, container probe, tag writers
//! - `pipeline` - merge and tag stages, album cache, lyrics policy
//! - `file` - sanitizing, unique names, relocation
//! - `extension` - capabilities an extension may offer
//! - `models`, `settings`, `quality`, `error`

pub mod audio;
pub mod client;
pub mod download;
pub mod error;
pub mod extension;
pub mod file;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod settings;

pub use client::{ClientConfig, DownloadClient};
pub use download::{DownloadManager, PipelineEvent, PipelineStage, Progress, TrackOutcome};
pub use error::{EchoError, Result};
pub use extension::{ExtensionRegistry, MusicExtension};
pub use models::{DownloadContext, MediaItem, Source, Track};
pub use settings::{MapSettings, Settings};
