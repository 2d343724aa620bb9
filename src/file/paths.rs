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


//! File naming
//!
//! # Sanitizing
//! Characters in `[/\:*?"<>|]` are replaced by `_`; nothing else changes, so
//! `Rock/Pop: Best?` becomes `Rock_Pop_ Best_`.
//!
//! # Unique Names
//! [`unique_file`] moves a file to `base.ext`, then `base (1).ext`,
//! `base (2).ext`, ... The move itself is the existence check: each attempt
//! creates the target with no-replace semantics (hard link, or an exclusive
//! create plus copy where links are unavailable), so an existing file is never
//! overwritten and there is no window between "check" and "move".

use crate::error::{EchoError, Result};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};

/// Attempts before the unique-name search gives up
const MAX_NAME_ATTEMPTS: u32 = 10_000;

lazy_static! {
    static ref ILLEGAL_CHARS: Regex = Regex::new(r#"[/\\:*?"<>|]"#).unwrap();
}

/// Replace characters that are illegal in file names with `_`
pub fn sanitize(name: &str) -> String {
    ILLEGAL_CHARS.replace_all(name, "_").into_owned()
}

/// `base.ext` for attempt 0, `base (n).ext` after that
pub fn candidate_name(base: &str, extension: &str, attempt: u32) -> String {
    let stem = if attempt == 0 {
        base.to_string()
    } else {
        format!("{} ({})", base, attempt)
    };
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}

/// Clear the read-only flag of `path`. Returns false if the file stays
/// read-only.
pub async fn make_writable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path).await else {
        return false;
    };
    let mut permissions = meta.permissions();
    if !permissions.readonly() {
        return true;
    }
    permissions.set_readonly(false);
    fs::set_permissions(path, permissions).await.is_ok()
}

/// Move `source` into `directory` under the first free name of the
/// `base (n).ext` sequence and return the new path.
pub async fn unique_file(
    directory: &Path,
    base: &str,
    extension: &str,
    source: &Path,
) -> Result<PathBuf> {
    if !fs::try_exists(source).await? {
        return Err(EchoError::FileNotFound(source.display().to_string()));
    }

    let source = if make_writable(source).await {
        source.to_path_buf()
    } else {
        let copy = directory.join(format!("{}-{}.{}", base, path_digest(source), extension));
        fs::copy(source, &copy).await.map_err(|e| {
            EchoError::FileIoError(format!("copy: {} - {}", source.display(), e))
        })?;
        fs::remove_file(source).await.map_err(|e| {
            EchoError::FileIoError(format!("remove: {} - {}", source.display(), e))
        })?;
        copy
    };

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = directory.join(candidate_name(base, extension, attempt));
        if candidate == source {
            return Ok(candidate);
        }
        if claim(&source, &candidate).await? {
            fs::remove_file(&source).await.map_err(|e| {
                EchoError::FileIoError(format!("remove: {} - {}", source.display(), e))
            })?;
            debug!("{} -> {}", source.display(), candidate.display());
            return Ok(candidate);
        }
    }

    Err(EchoError::FileIoError(format!(
        "no free name for {} in {}",
        base,
        directory.display()
    )))
}

/// Copy `source` into `directory`, keeping its name when free and adding a
/// ` (n)` suffix otherwise. The source is left in place.
pub async fn copy_unique(source: &Path, directory: &Path) -> Result<PathBuf> {
    let base = source
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| EchoError::InvalidPath(source.display().to_string()))?;
    let extension = source.extension().and_then(|s| s.to_str()).unwrap_or_default();

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = directory.join(candidate_name(base, extension, attempt));
        if copy_new(source, &candidate).await? {
            return Ok(candidate);
        }
    }

    Err(EchoError::FileIoError(format!(
        "no free name for {} in {}",
        base,
        directory.display()
    )))
}

/// Create `target` as a copy of `source` without replacing anything.
/// Returns false when `target` already exists.
async fn claim(source: &Path, target: &Path) -> Result<bool> {
    match fs::hard_link(source, target).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        // Filesystems without hard links
        Err(_) => copy_new(source, target).await,
    }
}

async fn copy_new(source: &Path, target: &Path) -> Result<bool> {
    let mut output = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => {
            return Err(EchoError::FileIoError(format!(
                "create: {} - {}",
                target.display(),
                e
            )))
        }
    };

    let copied = async {
        let mut input = fs::File::open(source).await?;
        tokio::io::copy(&mut input, &mut output).await?;
        output.sync_all().await
    }
    .await;

    if let Err(e) = copied {
        drop(output);
        let _ = fs::remove_file(target).await;
        return Err(EchoError::FileIoError(format!(
            "copy: {} -> {} - {}",
            source.display(),
            target.display(),
            e
        )));
    }
    Ok(true)
}

fn path_digest(path: &Path) -> String {
    let digest = hex::encode(Sha256::digest(path.to_string_lossy().as_bytes()));
    digest[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("Rock/Pop: Best?"), "Rock_Pop_ Best_");
        assert_eq!(sanitize(r#"a\b*c"d<e>f|g"#), "a_b_c_d_e_f_g");
        assert_eq!(sanitize("Plain title (Live)"), "Plain title (Live)");
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_name("X", "mp3", 0), "X.mp3");
        assert_eq!(candidate_name("X", "mp3", 2), "X (2).mp3");
        assert_eq!(candidate_name("X", "", 1), "X (1)");
    }

    #[tokio::test]
    async fn test_unique_file_sequence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("X.mp3"), b"existing").await.unwrap();

        let first = dir.path().join("part1");
        fs::write(&first, b"one").await.unwrap();
        let named = unique_file(dir.path(), "X", "mp3", &first).await.unwrap();
        assert_eq!(named, dir.path().join("X (1).mp3"));
        assert!(!first.exists());

        let second = dir.path().join("part2");
        fs::write(&second, b"two").await.unwrap();
        let named = unique_file(dir.path(), "X", "mp3", &second).await.unwrap();
        assert_eq!(named, dir.path().join("X (2).mp3"));

        assert_eq!(fs::read(dir.path().join("X.mp3")).await.unwrap(), b"existing");
        assert_eq!(fs::read(dir.path().join("X (1).mp3")).await.unwrap(), b"one");
        assert_eq!(fs::read(dir.path().join("X (2).mp3")).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_unique_file_keeps_own_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Song.m4a");
        fs::write(&file, b"data").await.unwrap();

        let named = unique_file(dir.path(), "Song", "m4a", &file).await.unwrap();
        assert_eq!(named, file);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn test_unique_file_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = unique_file(dir.path(), "X", "mp3", &dir.path().join("gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, EchoError::FileNotFound(_)));
    }

    #[tokio::test]
    async fn test_copy_unique_leaves_source() {
        let src_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        let source = src_dir.path().join("Song.mp3");
        fs::write(&source, b"new").await.unwrap();
        fs::write(dest_dir.path().join("Song.mp3"), b"old").await.unwrap();

        let copied = copy_unique(&source, dest_dir.path()).await.unwrap();
        assert_eq!(copied, dest_dir.path().join("Song (1).mp3"));
        assert_eq!(fs::read(&copied).await.unwrap(), b"new");
        assert_eq!(fs::read(dest_dir.path().join("Song.mp3")).await.unwrap(), b"old");
        assert!(source.exists());
    }
}
