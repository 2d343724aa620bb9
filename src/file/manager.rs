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


//! Destination handling and cleanup
//!
//! # Key Operations
//! - Destination folder: `<root>/<prefix><sanitized container title>`, or
//!   `<root>/Echo` for tracks without a named container
//! - Relocation: copy into the destination under a free name, then delete the
//!   working copy (source and destination may live on different volumes)
//! - Best-effort removal of work files
//!
//! Copy and delete are retried up to 3 times, 100ms apart.

use crate::error::{EchoError, Result};
use crate::file::paths::{copy_unique, sanitize};
use crate::settings::{DestinationRoots, FolderKind};
use log::{debug, info, warn};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;

/// Maximum retry attempts for file operations
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Delay between retry attempts
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Folder used when a track has no named container
pub const DEFAULT_FOLDER: &str = "Echo";

/// Places finished files into the user's destination folders
#[derive(Debug, Clone)]
pub struct FileManager {
    roots: DestinationRoots,
}

impl FileManager {
    pub fn new(roots: DestinationRoots) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &DestinationRoots {
        &self.roots
    }

    /// Directory a track should end up in
    pub fn destination_dir(
        &self,
        kind: FolderKind,
        prefix: &str,
        container_title: Option<&str>,
    ) -> PathBuf {
        let sanitized = container_title.map(sanitize).unwrap_or_default();
        let folder = if sanitized.trim().is_empty() {
            DEFAULT_FOLDER.to_string()
        } else {
            format!("{}{}", prefix, sanitized)
        };

        let mut dir = self.roots.root_for(kind).to_path_buf();
        for part in folder.split('/') {
            // Only plain names; never climb out of the root
            if matches!(Path::new(part).components().next(), Some(Component::Normal(_))) {
                dir.push(part);
            }
        }
        dir
    }

    /// Copy `file` into `directory` under a free name and delete `file`
    pub async fn relocate(&self, file: &Path, directory: &Path) -> Result<PathBuf> {
        ensure_directory_exists(directory).await?;

        let mut attempts = 0;
        let target = loop {
            attempts += 1;
            match copy_unique(file, directory).await {
                Ok(target) => break target,
                Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                    return Err(EchoError::FileIoError(format!(
                        "Failed to copy file after {} attempts: {} -> {}: {}",
                        MAX_RETRY_ATTEMPTS,
                        file.display(),
                        directory.display(),
                        e
                    )));
                }
                Err(e) => {
                    debug!("copy attempt {} failed: {}", attempts, e);
                    sleep(RETRY_DELAY).await;
                }
            }
        };

        safe_delete(file).await?;
        info!("saved {}", target.display());
        Ok(target)
    }
}

/// Ensure directory exists, creating parent directories as needed
pub async fn ensure_directory_exists(path: &Path) -> Result<()> {
    fs::create_dir_all(path).await.map_err(|e| {
        EchoError::FileIoError(format!(
            "Failed to create directory {}: {}",
            path.display(),
            e
        ))
    })
}

/// Delete a file with retry. A missing file is not an error.
pub async fn safe_delete(path: &Path) -> Result<()> {
    let mut attempts = 0;

    loop {
        attempts += 1;

        match fs::remove_file(path).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempts >= MAX_RETRY_ATTEMPTS => {
                return Err(EchoError::FileIoError(format!(
                    "Failed to delete file after {} attempts: {}: {}",
                    MAX_RETRY_ATTEMPTS,
                    path.display(),
                    e
                )));
            }
            Err(_) => sleep(RETRY_DELAY).await,
        }
    }
}

/// Delete a work file, logging instead of failing
pub async fn remove_quietly(path: &Path) {
    if let Err(e) = safe_delete(path).await {
        warn!("could not remove {}: {}", path.display(), e);
    }
}

/// Delete a per-track work directory and everything left in it
pub async fn remove_dir_quietly(path: &Path) {
    match fs::remove_dir_all(path).await {
        Ok(()) => debug!("removed work directory {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove {}: {}", path.display(), e),
    }
}
