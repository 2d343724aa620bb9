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


//! Post-download stages
//!
//! - `merge` - first part renamed to `<title>.<probed ext>`
//! - `tag` - album, cover and lyrics gathered, tags written, file relocated
//! - `album` - shared album cache
//! - `lyrics` - lyrics resolution policy

pub mod album;
pub mod lyrics;
pub mod merge;
pub mod tag;

pub use album::{resolve_album, AlbumCache, ALBUM_CACHE_CAPACITY};
pub use lyrics::{get_lyrics, resolve_lyrics, LyricsPolicy};
pub use merge::{base_name, merge, MergedFile};
pub use tag::{TagOptions, Tagger};
