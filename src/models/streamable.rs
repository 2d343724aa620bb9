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


//! Servers and sources
//!
//! A track lists [`Streamable`] server references. The owning extension turns
//! the chosen one into a [`MediaServer`], whose [`Source`]s are what actually
//! gets downloaded.

use crate::models::track::Request;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::AsyncRead;

/// Server reference attached to a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streamable {
    pub id: String,
    pub quality: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub extras: BTreeMap<String, String>,
}

impl Streamable {
    pub fn new(id: impl Into<String>, quality: i64) -> Self {
        Self {
            id: id.into(),
            quality,
            title: None,
            extras: BTreeMap::new(),
        }
    }
}

/// How an HTTP source is laid out on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// One file, fetchable with byte ranges
    Progressive,
    /// HLS playlist
    Hls,
    /// DASH manifest
    Dash,
}

impl SourceType {
    pub fn is_progressive(self) -> bool {
        matches!(self, SourceType::Progressive)
    }
}

/// Decryption a source would need before it is playable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Decryption {
    Widevine {
        license_url: String,
        #[serde(default)]
        is_base64_request: bool,
    },
}

/// Raw readable stream handed over by an extension
pub struct ByteStream(pub Box<dyn AsyncRead + Send + Unpin>);

impl ByteStream {
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self(Box::new(reader))
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ByteStream(..)")
    }
}

/// Concrete fetchable representation of a track
#[derive(Debug)]
pub enum Source {
    ByteStream {
        quality: i64,
        title: Option<String>,
        stream: ByteStream,
        total_bytes: u64,
    },
    Http {
        quality: i64,
        title: Option<String>,
        request: Request,
        source_type: SourceType,
        decryption: Option<Decryption>,
    },
}

impl Source {
    /// Progressive HTTP source without decryption
    pub fn progressive(request: Request, quality: i64) -> Self {
        Source::Http {
            quality,
            title: None,
            request,
            source_type: SourceType::Progressive,
            decryption: None,
        }
    }

    pub fn quality(&self) -> i64 {
        match self {
            Source::ByteStream { quality, .. } | Source::Http { quality, .. } => *quality,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            Source::ByteStream { title, .. } | Source::Http { title, .. } => title.as_deref(),
        }
    }
}

/// Resolved server: the sources behind one [`Streamable`]
#[derive(Debug, Default)]
pub struct MediaServer {
    pub sources: Vec<Source>,
    /// Whether the extension expects the sources to be merged into one file
    pub merged: bool,
}

impl MediaServer {
    pub fn new(sources: Vec<Source>) -> Self {
        Self {
            sources,
            merged: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_quality_accessor() {
        let http = Source::progressive(Request::new("https://a/b.mp3"), 320);
        assert_eq!(http.quality(), 320);

        let stream = Source::ByteStream {
            quality: 128,
            title: Some("low".into()),
            stream: ByteStream::new(std::io::Cursor::new(vec![0u8; 4])),
            total_bytes: 4,
        };
        assert_eq!(stream.quality(), 128);
        assert_eq!(stream.title(), Some("low"));
    }

    #[test]
    fn test_source_type_progressive() {
        assert!(SourceType::Progressive.is_progressive());
        assert!(!SourceType::Hls.is_progressive());
        assert!(!SourceType::Dash.is_progressive());
    }
}
