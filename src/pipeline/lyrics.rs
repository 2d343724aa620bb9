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


//! Lyrics resolution
//!
//! # Policy
//! 1. Lyrics disabled: none
//! 2. Ask the track's own extension
//! 3. Its result is used as-is when it has a body and either synced lyrics
//!    are not wanted or no fallback lyrics extension can be resolved
//! 4. Otherwise ask the fallback lyrics extension and prefer its result when
//!    it is timed
//! 5. Otherwise keep the track extension's result, which may be none
//!
//! Every result passes through gap filling. Provider errors and missing
//! capabilities never fail the pipeline; they count as "no lyrics".

use crate::extension::{ExtensionRegistry, MusicExtension};
use crate::models::{DownloadContext, Lyrics, Track};
use crate::settings::DownloaderSettings;
use log::{debug, warn};

/// Lyrics preferences of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricsPolicy {
    pub enabled: bool,
    pub synced: bool,
    pub fallback_extension: Option<String>,
}

impl LyricsPolicy {
    pub fn from_settings(settings: &DownloaderSettings<'_>) -> Self {
        Self {
            enabled: settings.download_lyrics(),
            synced: settings.synced_lyrics(),
            fallback_extension: settings.fallback_lyrics_extension(),
        }
    }
}

/// First search result of `extension`'s lyrics client, fully loaded and gap
/// filled
pub async fn get_lyrics(
    extension: &dyn MusicExtension,
    client_id: &str,
    track: &Track,
) -> Option<Lyrics> {
    let client = extension.lyrics_client()?;

    let found = match client.search_track_lyrics(client_id, track).await {
        Ok(found) => found,
        Err(e) => {
            warn!("lyrics search failed on {}: {}", extension.name(), e);
            return None;
        }
    };
    let first = found.into_iter().next()?;

    match client.load_lyrics(first).await {
        Ok(lyrics) => Some(lyrics.fill_gaps()),
        Err(e) => {
            warn!("lyrics load failed on {}: {}", extension.name(), e);
            None
        }
    }
}

/// Lyrics to embed for `context`
pub async fn resolve_lyrics(
    registry: &ExtensionRegistry,
    policy: &LyricsPolicy,
    context: &DownloadContext,
) -> Option<Lyrics> {
    if !policy.enabled {
        return None;
    }
    let client_id = context.extension_id.as_str();

    let own = match registry.music(client_id) {
        Some(extension) => get_lyrics(extension.as_ref(), client_id, &context.track).await,
        None => None,
    };

    let fallback = policy
        .fallback_extension
        .as_deref()
        .and_then(|id| registry.lyrics(id));

    let own_usable = own.as_ref().map(|l| l.body.is_some()).unwrap_or(false);
    if own_usable && (!policy.synced || fallback.is_none()) {
        return own;
    }

    if let Some(fallback) = fallback {
        debug!("asking {} for synced lyrics", fallback.name());
        let other = get_lyrics(fallback.as_ref(), client_id, &context.track).await;
        if other.as_ref().map(Lyrics::is_timed).unwrap_or(false) {
            return other;
        }
    }

    own
}
