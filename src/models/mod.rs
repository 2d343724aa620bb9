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


//! Data model shared by every pipeline stage
//!
//! # Module Organization
//!
//! ## track
//! Media descriptors handed over by extensions:
//! - `Track`, `Album`, `Artist`, `Playlist`, `Radio`
//! - `MediaItem` - anything a user can ask to download
//! - `DownloadContext` - one unit of pipeline work
//! - `Request`, `ImageHolder`
//!
//! ## streamable
//! - `Streamable` - server reference on a track
//! - `MediaServer` - resolved server with its sources
//! - `Source` - byte stream or HTTP source
//!
//! ## lyrics
//! - `Lyrics`, `LyricsBody` (timed or simple), `LyricsItem`
//! - gap filling and tag rendering

pub mod lyrics;
pub mod streamable;
pub mod track;

pub use lyrics::{render_lyrics, Lyrics, LyricsBody, LyricsItem};
pub use streamable::{ByteStream, Decryption, MediaServer, Source, SourceType, Streamable};
pub use track::{
    Album, Artist, DownloadContext, ImageHolder, MediaItem, Playlist, Radio, Request, Track,
};
