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


//! Album resolution with a shared LRU cache
//!
//! Keys are `<extension id>:<album id>`. Concurrent tag stages may race to
//! fill the same key; both load from the provider and the last write wins.

use crate::extension::ExtensionRegistry;
use crate::models::{Album, DownloadContext};
use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Albums kept by default
pub const ALBUM_CACHE_CAPACITY: usize = 50;

/// Capacity-bounded album cache, least recently used entry evicted first
#[derive(Debug)]
pub struct AlbumCache {
    capacity: usize,
    state: Mutex<LruState>,
}

#[derive(Debug, Default)]
struct LruState {
    entries: HashMap<String, Album>,
    // Front is least recently used
    order: VecDeque<String>,
}

impl LruState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(pos) {
                self.order.push_back(k);
            }
        }
    }
}

impl Default for AlbumCache {
    fn default() -> Self {
        Self::new(ALBUM_CACHE_CAPACITY)
    }
}

impl AlbumCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState::default()),
        }
    }

    pub fn key(extension_id: &str, album_id: &str) -> String {
        format!("{}:{}", extension_id, album_id)
    }

    pub async fn get(&self, key: &str) -> Option<Album> {
        let mut state = self.state.lock().await;
        let album = state.entries.get(key).cloned()?;
        state.touch(key);
        Some(album)
    }

    pub async fn put(&self, key: String, album: Album) {
        let mut state = self.state.lock().await;
        if state.entries.insert(key.clone(), album).is_some() {
            state.touch(&key);
            return;
        }
        state.order.push_back(key);
        while state.order.len() > self.capacity {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Full album for the context's track.
///
/// Served from the cache when possible, otherwise loaded through the owning
/// extension's album client. Load failures and missing capabilities fall back
/// to the album reference carried by the track.
pub async fn resolve_album(
    registry: &ExtensionRegistry,
    cache: &AlbumCache,
    context: &DownloadContext,
) -> Option<Album> {
    let embedded = context.track.album.as_ref()?;
    let key = AlbumCache::key(&context.extension_id, &embedded.id);

    if let Some(album) = cache.get(&key).await {
        debug!("album cache hit: {}", key);
        return Some(album);
    }
    debug!("album cache miss: {}", key);

    let Some(extension) = registry.music(&context.extension_id) else {
        warn!("extension {} not loaded, using embedded album", context.extension_id);
        return Some(embedded.clone());
    };
    let Some(client) = extension.album_client() else {
        return Some(embedded.clone());
    };

    match client.load_album(embedded).await {
        Ok(album) => {
            cache.put(key, album.clone()).await;
            Some(album)
        }
        Err(e) => {
            warn!("album load failed for {}: {}", key, e);
            Some(embedded.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EchoError, Result};
    use crate::extension::{AlbumClient, MusicExtension};
    use crate::models::{Artist, Track};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Albums {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AlbumClient for Albums {
        async fn load_album(&self, album: &Album) -> Result<Album> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EchoError::ProviderFailed("offline".to_string()));
            }
            let mut full = album.clone();
            full.title = format!("{} (Deluxe)", album.title);
            full.artists = vec![Artist::new("a1", "Band")];
            Ok(full)
        }

        async fn load_tracks(&self, _album: &Album) -> Result<Vec<Track>> {
            Ok(Vec::new())
        }
    }

    impl MusicExtension for Albums {
        fn id(&self) -> &str {
            "ext"
        }

        fn name(&self) -> &str {
            "Ext"
        }

        fn album_client(&self) -> Option<&dyn AlbumClient> {
            Some(self)
        }
    }

    fn context() -> DownloadContext {
        let mut track = Track::new("t1", "Song");
        track.album = Some(Album::new("al1", "Record"));
        DownloadContext::new("ext", track)
    }

    fn registry(fail: bool) -> (ExtensionRegistry, Arc<Albums>) {
        let albums = Arc::new(Albums {
            calls: AtomicUsize::new(0),
            fail,
        });
        (ExtensionRegistry::new().with_music(albums.clone()), albums)
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = AlbumCache::new(2);
        cache.put("a".into(), Album::new("a", "A")).await;
        cache.put("b".into(), Album::new("b", "B")).await;
        assert!(cache.get("a").await.is_some());
        cache.put("c".into(), Album::new("c", "C")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("b").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_resolve_caches_loaded_album() {
        let (registry, albums) = registry(false);
        let cache = AlbumCache::default();

        let first = resolve_album(&registry, &cache, &context()).await.unwrap();
        let second = resolve_album(&registry, &cache, &context()).await.unwrap();
        assert_eq!(first.title, "Record (Deluxe)");
        assert_eq!(first, second);
        assert_eq!(albums.calls.load(Ordering::SeqCst), 1);
        assert!(cache.get("ext:al1").await.is_some());
    }

    #[tokio::test]
    async fn test_resolve_falls_back_to_embedded_album() {
        let (registry, _) = registry(true);
        let cache = AlbumCache::default();

        let album = resolve_album(&registry, &cache, &context()).await.unwrap();
        assert_eq!(album.title, "Record");
        assert!(cache.is_empty().await);

        let unknown = ExtensionRegistry::new();
        let album = resolve_album(&unknown, &cache, &context()).await.unwrap();
        assert_eq!(album.title, "Record");
    }

    #[tokio::test]
    async fn test_resolve_without_album() {
        let (registry, albums) = registry(false);
        let cache = AlbumCache::default();
        let ctx = DownloadContext::new("ext", Track::new("t1", "Single"));
        assert!(resolve_album(&registry, &cache, &ctx).await.is_none());
        assert_eq!(albums.calls.load(Ordering::SeqCst), 0);
    }
}
