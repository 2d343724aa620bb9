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


//! Downloader settings
//!
//! The host owns settings storage and exposes typed getters through the
//! [`Settings`] trait. [`DownloaderSettings`] layers key names, defaults and
//! range checks on top. [`MapSettings`] is an in-memory store that can be
//! persisted as JSON, used by the CLI and by tests.
//!
//! # Keys
//! - `download_num` - concurrent downloads (default 2, clamped to 1..=10)
//! - `quality` - quality tier (default `"1"`)
//! - `mfolder` - destination folder kind (default `"download"`)
//! - `sfolder` - destination subfolder prefix (default `"Echo/"`)
//! - `tracknum` - prefix file names with the track position (default false)
//! - `download_lyrics` - embed lyrics (default true)
//! - `synced_lyrics` - prefer timed lyrics (default true)
//! - `fallback_lyrics_ext` - fallback lyrics extension id (default empty)

use crate::error::{EchoError, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const KEY_DOWNLOAD_NUM: &str = "download_num";
pub const KEY_QUALITY: &str = "quality";
pub const KEY_FOLDER: &str = "mfolder";
pub const KEY_SUBFOLDER: &str = "sfolder";
pub const KEY_TRACK_NUMBER: &str = "tracknum";
pub const KEY_DOWNLOAD_LYRICS: &str = "download_lyrics";
pub const KEY_SYNCED_LYRICS: &str = "synced_lyrics";
pub const KEY_FALLBACK_LYRICS_EXT: &str = "fallback_lyrics_ext";

const DEFAULT_CONCURRENT_DOWNLOADS: i64 = 2;
const MIN_CONCURRENT_DOWNLOADS: i64 = 1;
const MAX_CONCURRENT_DOWNLOADS: i64 = 10;
const DEFAULT_QUALITY: &str = "1";
const DEFAULT_FOLDER: &str = "download";
const DEFAULT_SUBFOLDER: &str = "Echo/";

/// Typed getters exposed by the host's settings storage
pub trait Settings: Send + Sync {
    fn get_int(&self, key: &str) -> Option<i64>;
    fn get_bool(&self, key: &str) -> Option<bool>;
    fn get_string(&self, key: &str) -> Option<String>;
}

/// Destination root selected by the `mfolder` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Download,
    Music,
    Podcasts,
}

impl FolderKind {
    /// Unknown values map to `Download`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "music" => FolderKind::Music,
            "podcasts" => FolderKind::Podcasts,
            _ => FolderKind::Download,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FolderKind::Download => "download",
            FolderKind::Music => "music",
            FolderKind::Podcasts => "podcasts",
        }
    }
}

/// Settings view with the downloader's keys and defaults
#[derive(Clone, Copy)]
pub struct DownloaderSettings<'a> {
    settings: &'a dyn Settings,
}

impl<'a> DownloaderSettings<'a> {
    pub fn new(settings: &'a dyn Settings) -> Self {
        Self { settings }
    }

    pub fn concurrent_downloads(&self) -> usize {
        let value = self
            .settings
            .get_int(KEY_DOWNLOAD_NUM)
            .unwrap_or(DEFAULT_CONCURRENT_DOWNLOADS);
        value.clamp(MIN_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS) as usize
    }

    pub fn quality(&self) -> String {
        self.settings
            .get_string(KEY_QUALITY)
            .unwrap_or_else(|| DEFAULT_QUALITY.to_string())
    }

    pub fn folder_kind(&self) -> FolderKind {
        self.settings
            .get_string(KEY_FOLDER)
            .map(|v| FolderKind::parse(&v))
            .unwrap_or_else(|| FolderKind::parse(DEFAULT_FOLDER))
    }

    pub fn subfolder_prefix(&self) -> String {
        self.settings
            .get_string(KEY_SUBFOLDER)
            .unwrap_or_else(|| DEFAULT_SUBFOLDER.to_string())
    }

    pub fn track_number_in_title(&self) -> bool {
        self.settings.get_bool(KEY_TRACK_NUMBER).unwrap_or(false)
    }

    pub fn download_lyrics(&self) -> bool {
        self.settings.get_bool(KEY_DOWNLOAD_LYRICS).unwrap_or(true)
    }

    pub fn synced_lyrics(&self) -> bool {
        self.settings.get_bool(KEY_SYNCED_LYRICS).unwrap_or(true)
    }

    /// Configured fallback lyrics extension, `None` when blank
    pub fn fallback_lyrics_extension(&self) -> Option<String> {
        self.settings
            .get_string(KEY_FALLBACK_LYRICS_EXT)
            .filter(|id| !id.trim().is_empty())
    }
}

/// In-memory settings backed by a JSON object
#[derive(Debug, Default)]
pub struct MapSettings {
    values: RwLock<Map<String, Value>>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        match serde_json::from_str::<Value>(json)? {
            Value::Object(values) => Ok(Self {
                values: RwLock::new(values),
            }),
            other => Err(EchoError::InvalidSetting {
                key: "<root>".to_string(),
                value: other.to_string(),
            }),
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            EchoError::FileIoError(format!("read: {} - {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = {
            let values = self
                .values
                .read()
                .map_err(|_| EchoError::Internal("settings lock poisoned".to_string()))?;
            serde_json::to_string_pretty(&*values)?
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await.map_err(|e| {
            EchoError::FileIoError(format!("write: {} - {}", path.display(), e))
        })
    }

    pub fn set(&self, key: &str, value: impl Into<Value>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.into());
        }
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }
}

impl Settings for MapSettings {
    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(b),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Root directories for each folder kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRoots {
    pub download: PathBuf,
    pub music: PathBuf,
    pub podcasts: PathBuf,
}

impl DestinationRoots {
    /// Resolve roots from the platform's user directories
    pub fn from_system() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| EchoError::InvalidPath("home directory not available".to_string()))?;
        Ok(Self {
            download: dirs::download_dir().unwrap_or_else(|| home.join("Downloads")),
            music: dirs::audio_dir().unwrap_or_else(|| home.join("Music")),
            podcasts: home.join("Podcasts"),
        })
    }

    /// All three kinds under one base directory (`Download`, `Music`, `Podcasts`)
    pub fn under(base: &Path) -> Self {
        Self {
            download: base.join("Download"),
            music: base.join("Music"),
            podcasts: base.join("Podcasts"),
        }
    }

    pub fn root_for(&self, kind: FolderKind) -> &Path {
        match kind {
            FolderKind::Download => &self.download,
            FolderKind::Music => &self.music,
            FolderKind::Podcasts => &self.podcasts,
        }
    }
}

/// Locations of the external media tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Search PATH, falling back to bare names so spawn errors surface as `FfmpegNotFound`
    pub fn discover() -> Self {
        Self {
            ffmpeg: which::which("ffmpeg").unwrap_or_else(|_| PathBuf::from("ffmpeg")),
            ffprobe: which::which("ffprobe").unwrap_or_else(|_| PathBuf::from("ffprobe")),
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::discover()
    }
}

/// Default working directory for part, cover and remux temp files
pub fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("echo-downloader")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let store = MapSettings::new();
        let settings = DownloaderSettings::new(&store);
        assert_eq!(settings.concurrent_downloads(), 2);
        assert_eq!(settings.quality(), "1");
        assert_eq!(settings.folder_kind(), FolderKind::Download);
        assert_eq!(settings.subfolder_prefix(), "Echo/");
        assert!(!settings.track_number_in_title());
        assert!(settings.download_lyrics());
        assert!(settings.synced_lyrics());
        assert_eq!(settings.fallback_lyrics_extension(), None);
    }

    #[test]
    fn test_concurrent_downloads_clamped() {
        let store = MapSettings::new();
        store.set(KEY_DOWNLOAD_NUM, 50);
        assert_eq!(DownloaderSettings::new(&store).concurrent_downloads(), 10);
        store.set(KEY_DOWNLOAD_NUM, 0);
        assert_eq!(DownloaderSettings::new(&store).concurrent_downloads(), 1);
    }

    #[test]
    fn test_from_json_and_typed_getters() {
        let store = MapSettings::from_json(
            r#"{"quality": "0", "mfolder": "music", "tracknum": true, "fallback_lyrics_ext": "  "}"#,
        )
        .unwrap();
        let settings = DownloaderSettings::new(&store);
        assert_eq!(settings.quality(), "0");
        assert_eq!(settings.folder_kind(), FolderKind::Music);
        assert!(settings.track_number_in_title());
        assert_eq!(settings.fallback_lyrics_extension(), None);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(MapSettings::from_json("[1, 2]").is_err());
    }

    #[test]
    fn test_folder_kind_parse() {
        assert_eq!(FolderKind::parse("Podcasts"), FolderKind::Podcasts);
        assert_eq!(FolderKind::parse("elsewhere"), FolderKind::Download);
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = MapSettings::new();
        store.set(KEY_SUBFOLDER, "Library/");
        store.save(&path).await.unwrap();

        let loaded = MapSettings::load(&path).await.unwrap();
        assert_eq!(loaded.get_string(KEY_SUBFOLDER).as_deref(), Some("Library/"));
    }
}
