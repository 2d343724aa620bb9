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


//! Lyrics model, gap filling and tag rendering

use serde::{Deserialize, Serialize};

/// One timed line. Times are milliseconds from the start of the track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LyricsItem {
    pub text: String,
    pub start_time: u64,
    pub end_time: u64,
}

impl LyricsItem {
    pub fn new(text: impl Into<String>, start_time: u64, end_time: u64) -> Self {
        Self {
            text: text.into(),
            start_time,
            end_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LyricsBody {
    Timed {
        items: Vec<LyricsItem>,
        #[serde(default = "default_true")]
        fill_time_gaps: bool,
    },
    Simple { text: String },
}

fn default_true() -> bool {
    true
}

impl LyricsBody {
    pub fn is_timed(&self) -> bool {
        matches!(self, LyricsBody::Timed { .. })
    }

    /// Insert empty items so the timeline has no holes.
    ///
    /// The walk starts at time zero, so a first line that starts late gets a
    /// leading filler as well. Bodies without the gap flag, and simple lyrics,
    /// are returned unchanged.
    pub fn fill_gaps(self) -> Self {
        match self {
            LyricsBody::Timed {
                items,
                fill_time_gaps: true,
            } => {
                let mut filled = Vec::with_capacity(items.len() * 2);
                let mut last = 0u64;
                for item in items {
                    if item.start_time > last {
                        filled.push(LyricsItem::new("", last, item.start_time));
                    }
                    last = item.end_time;
                    filled.push(item);
                }
                LyricsBody::Timed {
                    items: filled,
                    fill_time_gaps: true,
                }
            }
            other => other,
        }
    }

    /// Text written into the lyrics tag.
    ///
    /// Timed lines render as `[mm:ss.cc]text`, centiseconds truncated.
    pub fn render(&self) -> String {
        match self {
            LyricsBody::Timed { items, .. } => items
                .iter()
                .map(|item| format!("{}{}", format_lrc_timestamp(item.start_time), item.text))
                .collect::<Vec<_>>()
                .join("\n"),
            LyricsBody::Simple { text } => text.clone(),
        }
    }
}

/// `[mm:ss.cc]` for a millisecond offset
pub fn format_lrc_timestamp(ms: u64) -> String {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let centis = (ms % 1000) / 10;
    format!("[{:02}:{:02}.{:02}]", minutes, seconds, centis)
}

/// Lyrics as returned by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lyrics {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    /// Absent until the provider has loaded the full lyrics
    #[serde(default)]
    pub body: Option<LyricsBody>,
}

impl Lyrics {
    pub fn with_body(id: impl Into<String>, title: impl Into<String>, body: LyricsBody) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            subtitle: None,
            body: Some(body),
        }
    }

    pub fn is_timed(&self) -> bool {
        self.body.as_ref().map(LyricsBody::is_timed).unwrap_or(false)
    }

    pub fn fill_gaps(mut self) -> Self {
        self.body = self.body.map(LyricsBody::fill_gaps);
        self
    }
}

/// Flattened tag text for optional lyrics; absent lyrics render empty
pub fn render_lyrics(lyrics: Option<&Lyrics>) -> String {
    lyrics
        .and_then(|l| l.body.as_ref())
        .map(LyricsBody::render)
        .unwrap_or_default()
}
