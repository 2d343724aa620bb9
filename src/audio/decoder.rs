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


//! Container detection
//!
//! The downloaded file's name says nothing reliable about its content, so the
//! container is probed with ffprobe:
//!
//! ```text
//! ffprobe -v error -show_entries format=format_name \
//!         -of default=noprint_wrappers=1:nokey=1 <file>
//! ```
//!
//! The first comma-separated token of the format name decides the kind.
//! Probe failures never fail the pipeline; they degrade to `mp3`.

use crate::audio::ffmpeg::{spawn_error, Remuxer};
use crate::error::{EchoError, Result};
use log::{debug, warn};
use std::path::Path;
use tokio::process::Command;

/// Container kinds the tag stage distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    M4a,
    Flac,
    Mp3,
}

impl ContainerKind {
    /// Map an ffprobe `format_name` (e.g. `mov,mp4,m4a,3gp,3g2,mj2`)
    pub fn from_format_name(format_name: &str) -> Self {
        let first = format_name
            .trim()
            .split(',')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match first.as_str() {
            "mov" | "mp4" | "m4a" => ContainerKind::M4a,
            "flac" => ContainerKind::Flac,
            _ => ContainerKind::Mp3,
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        Self::from_format_name(ext)
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::M4a => "m4a",
            ContainerKind::Flac => "flac",
            ContainerKind::Mp3 => "mp3",
        }
    }

    /// Kinds the structured tag writer handles (when no video is present)
    pub fn supports_structured_tags(&self) -> bool {
        matches!(self, ContainerKind::Mp3 | ContainerKind::M4a)
    }
}

impl Remuxer {
    /// Probe the container kind of `file`, falling back to `mp3`
    pub async fn probe_container(&self, file: &Path) -> ContainerKind {
        match self.probe_format_name(file).await {
            Ok(name) => {
                let kind = ContainerKind::from_format_name(&name);
                debug!("probed {} as {} ({})", file.display(), kind.extension(), name);
                kind
            }
            Err(e) => {
                warn!("probe failed for {}, assuming mp3: {}", file.display(), e);
                ContainerKind::Mp3
            }
        }
    }

    /// Raw `format_name` reported by ffprobe
    pub async fn probe_format_name(&self, file: &Path) -> Result<String> {
        let output = Command::new(&self.tools().ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=format_name",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(file.as_os_str())
            .output()
            .await
            .map_err(|e| spawn_error("ffprobe", e))?;

        if !output.status.success() {
            return Err(EchoError::ffmpeg(
                format!("ffprobe exited with {}", output.status),
                String::from_utf8_lossy(&output.stderr),
            ));
        }

        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if name.is_empty() {
            return Err(EchoError::ffmpeg("ffprobe reported no format", ""));
        }
        Ok(name)
    }
}
