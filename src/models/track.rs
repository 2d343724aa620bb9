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


//! Track, album and container descriptors
//!
//! These mirror what a music extension hands to the downloader. They are
//! plain data: the pipeline reads them and never mutates them in place.

use crate::models::streamable::Streamable;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// HTTP request descriptor (URL plus headers)
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Request {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Headers as CRLF-joined `key: value` pairs, the form ffmpeg's `-headers` expects
    pub fn header_block(&self) -> Option<String> {
        if self.headers.is_empty() {
            return None;
        }
        Some(
            self.headers
                .iter()
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\r\n"),
        )
    }

    /// Stable hex digest of the URL, used for work file names
    pub fn hash(&self) -> String {
        short_digest(&[self.url.as_str()])
    }
}

/// Where a piece of artwork comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageHolder {
    /// Fetchable over HTTP
    Url {
        request: Request,
        #[serde(default)]
        crop: bool,
    },
    /// Content URI only the host can resolve
    Uri { uri: String },
    /// Bundled host resource
    Resource { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

impl Artist {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub cover: Option<ImageHolder>,
    #[serde(default)]
    pub track_count: Option<u32>,
}

impl Album {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists: Vec::new(),
            release_year: None,
            cover: None,
            track_count: None,
        }
    }

    /// Album artists joined for a single tag value
    pub fn artist_names(&self) -> String {
        join_names(&self.artists)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub cover: Option<ImageHolder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Radio {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: Option<Album>,
    #[serde(default)]
    pub cover: Option<ImageHolder>,
    #[serde(default)]
    pub release_year: Option<i32>,
    /// Server references the extension can resolve into sources
    #[serde(default)]
    pub servers: Vec<Streamable>,
}

impl Track {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artists: Vec::new(),
            album: None,
            cover: None,
            release_year: None,
            servers: Vec::new(),
        }
    }

    /// Track artists joined for a single tag value
    pub fn artist_names(&self) -> String {
        join_names(&self.artists)
    }

    /// Digest of the track identity, used to name per-track temporary files
    pub fn identity_hash(&self) -> String {
        let album = self.album.as_ref().map(|a| a.id.as_str()).unwrap_or_default();
        short_digest(&[self.id.as_str(), self.title.as_str(), album])
    }
}

/// Anything a user can ask to download
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaItem {
    Track(Track),
    Album(Album),
    Playlist(Playlist),
    Radio(Radio),
    Artist(Artist),
}

impl MediaItem {
    pub fn title(&self) -> &str {
        match self {
            MediaItem::Track(t) => &t.title,
            MediaItem::Album(a) => &a.title,
            MediaItem::Playlist(p) => &p.title,
            MediaItem::Radio(r) => &r.title,
            MediaItem::Artist(a) => &a.name,
        }
    }
}

/// One unit of pipeline work: a track plus the list it was picked from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadContext {
    pub extension_id: String,
    pub track: Track,
    /// Position inside `context`, when the track came from a list
    #[serde(default)]
    pub sort_order: Option<u32>,
    #[serde(default)]
    pub context: Option<MediaItem>,
}

impl DownloadContext {
    pub fn new(extension_id: impl Into<String>, track: Track) -> Self {
        Self {
            extension_id: extension_id.into(),
            track,
            sort_order: None,
            context: None,
        }
    }

    pub fn with_parent(mut self, parent: MediaItem, sort_order: u32) -> Self {
        self.context = Some(parent);
        self.sort_order = Some(sort_order);
        self
    }

    /// Title of the parent container, used for the destination subfolder
    pub fn container_title(&self) -> Option<&str> {
        self.context.as_ref().map(MediaItem::title)
    }
}

fn join_names(artists: &[Artist]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_block_is_crlf_joined() {
        let request = Request::new("https://cdn.example.com/a.m3u8")
            .with_header("Authorization", "Bearer x")
            .with_header("Referer", "https://example.com");
        assert_eq!(
            request.header_block().as_deref(),
            Some("Authorization: Bearer x\r\nReferer: https://example.com")
        );
        assert!(Request::new("u").header_block().is_none());
    }

    #[test]
    fn test_identity_hash_is_stable_and_distinct() {
        let a = Track::new("1", "Song");
        let b = Track::new("2", "Song");
        assert_eq!(a.identity_hash(), Track::new("1", "Song").identity_hash());
        assert_ne!(a.identity_hash(), b.identity_hash());
        assert_eq!(a.identity_hash().len(), 16);
    }

    #[test]
    fn test_artist_names_joined() {
        let mut track = Track::new("1", "Song");
        track.artists = vec![Artist::new("a", "Alice"), Artist::new("b", "Bob")];
        assert_eq!(track.artist_names(), "Alice, Bob");
    }

    #[test]
    fn test_container_title() {
        let track = Track::new("1", "Song");
        let ctx = DownloadContext::new("ext", track.clone());
        assert_eq!(ctx.container_title(), None);

        let ctx = ctx.with_parent(MediaItem::Album(Album::new("al", "Greatest")), 3);
        assert_eq!(ctx.container_title(), Some("Greatest"));
        assert_eq!(ctx.sort_order, Some(3));
    }

    #[test]
    fn test_media_item_json_tagging() {
        let item = MediaItem::Radio(Radio {
            id: "r1".into(),
            title: "Mix".into(),
        });
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"type\":\"radio\""));
    }
}
