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


//! Merge stage
//!
//! Turns downloaded parts into one file named after the track. Only the first
//! part is used; extensions handing over several parts get a warning and the
//! rest are left for the caller to clean up.
//!
//! # Steps
//! 1. Take the first part
//! 2. Probe its container
//! 3. Compute the base name (sanitized title, optionally `<position>_` first)
//! 4. Move it to a unique `base.ext` in the same directory

use crate::audio::{ContainerKind, Remuxer};
use crate::download::progress::{ProgressCallback, StepProgress};
use crate::error::{EchoError, Result};
use crate::file::paths::{sanitize, unique_file};
use crate::models::DownloadContext;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Result of the merge stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedFile {
    pub path: PathBuf,
    /// Probed container, which decides the tagging strategy later on
    pub kind: ContainerKind,
}

/// File name (without extension) for a track
pub fn base_name(context: &DownloadContext, track_number_in_title: bool) -> String {
    let title = sanitize(&context.track.title);
    match context.sort_order {
        Some(position) if track_number_in_title => format!("{}_{}", position, title),
        _ => title,
    }
}

pub async fn merge(
    remuxer: &Remuxer,
    parts: &[PathBuf],
    context: &DownloadContext,
    track_number_in_title: bool,
    progress: Option<ProgressCallback>,
) -> Result<MergedFile> {
    let steps = StepProgress::new(4, progress);

    let (file, rest) = parts
        .split_first()
        .ok_or_else(|| EchoError::InvalidState("nothing to merge".to_string()))?;
    if !rest.is_empty() {
        warn!(
            "{} extra parts for {} ignored, only the first part is kept",
            rest.len(),
            context.track.id
        );
    }
    steps.advance();

    let kind = remuxer.probe_container(file).await;
    steps.advance();

    let base = base_name(context, track_number_in_title);
    steps.advance();

    let directory = file
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| EchoError::InvalidPath(file.display().to_string()))?;
    let path = unique_file(&directory, &base, kind.extension(), file).await?;
    steps.advance();

    info!("merged {} as {}", context.track.id, path.display());
    Ok(MergedFile { path, kind })
}
