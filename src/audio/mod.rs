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


//! Media tooling: ffmpeg execution, container probing and metadata writing
//!
//! # Module Organization
//!
//! ## ffmpeg
//! - `Remuxer` - runs ffmpeg with structured arguments, log and stat callbacks
//! - `FfmpegCommand` - argument list builder
//! - `DurationScanner`, `parse_duration`, `format_duration`
//!
//! ## decoder
//! - `ContainerKind` - m4a / flac / mp3
//! - `Remuxer::probe_container` - ffprobe based detection
//!
//! ## metadata
//! - `TagFields` - values written into the file
//! - `TagLibrary` / `LoftyTagLibrary` - structured tags in place
//! - `Remuxer::inject_metadata` - ffmpeg based tagging for everything else
//!
//! # FFmpeg Integration
//!
//! FFmpeg and FFprobe are located on PATH (see `ToolPaths::discover`) unless
//! explicit paths are configured:
//! - macOS: `brew install ffmpeg`
//! - Linux: `apt-get install ffmpeg` or `yum install ffmpeg`

pub mod decoder;
pub mod ffmpeg;
pub mod metadata;

pub use decoder::ContainerKind;
pub use ffmpeg::{format_duration, parse_duration, DurationScanner, FfmpegCommand, Remuxer, StatTick};
pub use metadata::{has_mp4_video_track, injection_command, LoftyTagLibrary, TagFields, TagLibrary};
