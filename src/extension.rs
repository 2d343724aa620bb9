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


//! Extension capabilities
//!
//! Music extensions are loaded by the host. The downloader only sees them
//! through [`MusicExtension`], which answers "do you offer capability X" with
//! an optional client. A missing capability is an ordinary condition: callers
//! fall back or skip, and the `require_*` helpers turn it into
//! [`EchoError::NotSupported`] where a caller cannot continue without it.

use crate::error::{EchoError, Result};
use crate::models::{Album, Lyrics, MediaServer, Playlist, Radio, Streamable, Track};
use async_trait::async_trait;
use std::sync::Arc;

/// Resolves server references into concrete sources
#[async_trait]
pub trait TrackClient: Send + Sync {
    async fn load_server(&self, track: &Track, streamable: &Streamable) -> Result<MediaServer>;
}

#[async_trait]
pub trait AlbumClient: Send + Sync {
    /// Load the full album behind a (possibly partial) reference
    async fn load_album(&self, album: &Album) -> Result<Album>;

    async fn load_tracks(&self, album: &Album) -> Result<Vec<Track>>;
}

#[async_trait]
pub trait PlaylistClient: Send + Sync {
    async fn load_playlist(&self, playlist: &Playlist) -> Result<Playlist>;

    async fn load_tracks(&self, playlist: &Playlist) -> Result<Vec<Track>>;
}

#[async_trait]
pub trait RadioClient: Send + Sync {
    async fn load_tracks(&self, radio: &Radio) -> Result<Vec<Track>>;
}

#[async_trait]
pub trait LyricsClient: Send + Sync {
    /// Candidate lyrics for a track, best match first
    async fn search_track_lyrics(&self, client_id: &str, track: &Track) -> Result<Vec<Lyrics>>;

    /// Fill in the body of a search result
    async fn load_lyrics(&self, lyrics: Lyrics) -> Result<Lyrics>;
}

/// A loaded extension and the capabilities it offers
pub trait MusicExtension: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn track_client(&self) -> Option<&dyn TrackClient> {
        None
    }

    fn album_client(&self) -> Option<&dyn AlbumClient> {
        None
    }

    fn playlist_client(&self) -> Option<&dyn PlaylistClient> {
        None
    }

    fn radio_client(&self) -> Option<&dyn RadioClient> {
        None
    }

    fn lyrics_client(&self) -> Option<&dyn LyricsClient> {
        None
    }
}

/// Capability lookup that fails with `NotSupported` when absent
pub fn require_track_client(ext: &dyn MusicExtension) -> Result<&dyn TrackClient> {
    ext.track_client()
        .ok_or_else(|| EchoError::not_supported(ext.name(), "TrackClient"))
}

pub fn require_album_client(ext: &dyn MusicExtension) -> Result<&dyn AlbumClient> {
    ext.album_client()
        .ok_or_else(|| EchoError::not_supported(ext.name(), "AlbumClient"))
}

pub fn require_playlist_client(ext: &dyn MusicExtension) -> Result<&dyn PlaylistClient> {
    ext.playlist_client()
        .ok_or_else(|| EchoError::not_supported(ext.name(), "PlaylistClient"))
}

pub fn require_radio_client(ext: &dyn MusicExtension) -> Result<&dyn RadioClient> {
    ext.radio_client()
        .ok_or_else(|| EchoError::not_supported(ext.name(), "RadioClient"))
}

pub fn require_lyrics_client(ext: &dyn MusicExtension) -> Result<&dyn LyricsClient> {
    ext.lyrics_client()
        .ok_or_else(|| EchoError::not_supported(ext.name(), "LyricsClient"))
}

/// Extensions currently available to the downloader
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    music: Vec<Arc<dyn MusicExtension>>,
    lyrics: Vec<Arc<dyn MusicExtension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_music(mut self, ext: Arc<dyn MusicExtension>) -> Self {
        self.music.push(ext);
        self
    }

    pub fn with_lyrics(mut self, ext: Arc<dyn MusicExtension>) -> Self {
        self.lyrics.push(ext);
        self
    }

    pub fn music(&self, id: &str) -> Option<Arc<dyn MusicExtension>> {
        self.music.iter().find(|e| e.id() == id).cloned()
    }

    pub fn lyrics(&self, id: &str) -> Option<Arc<dyn MusicExtension>> {
        self.lyrics.iter().find(|e| e.id() == id).cloned()
    }

    pub fn require_music(&self, id: &str) -> Result<Arc<dyn MusicExtension>> {
        self.music(id)
            .ok_or_else(|| EchoError::ExtensionNotFound(id.to_string()))
    }

    pub fn has_lyrics_extensions(&self) -> bool {
        !self.lyrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    impl MusicExtension for Bare {
        fn id(&self) -> &str {
            "bare"
        }

        fn name(&self) -> &str {
            "Bare"
        }
    }

    #[test]
    fn test_missing_capability_is_not_supported() {
        let ext = Bare;
        let err = require_album_client(&ext).err().unwrap();
        assert!(matches!(err, EchoError::NotSupported { .. }));
        assert!(err.to_string().contains("AlbumClient"));
        assert!(require_lyrics_client(&ext).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ExtensionRegistry::new().with_music(Arc::new(Bare));
        assert!(registry.music("bare").is_some());
        assert!(registry.lyrics("bare").is_none());
        assert!(matches!(
            registry.require_music("other"),
            Err(EchoError::ExtensionNotFound(_))
        ));
        assert!(!registry.has_lyrics_extensions());
    }
}
