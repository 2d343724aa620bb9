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


//! Downloader facade
//!
//! [`DownloadClient`] owns the collaborators every stage needs (extension
//! registry, settings, ffmpeg, the fetcher, the tag library, destination
//! roots and the album cache) and exposes each stage on its own:
//!
//! ```text
//! select_server -> load_server -> select_sources -> download -> merge -> tag
//! ```
//!
//! A host can drive the stages itself, or hand contexts to
//! [`DownloadManager`](crate::download::DownloadManager) which runs the whole
//! chain per track.
//!
//! # Example
//! ```rust,no_run
//! use echo_downloader::client::{ClientConfig, DownloadClient};
//! use echo_downloader::extension::ExtensionRegistry;
//! use echo_downloader::settings::MapSettings;
//! use std::sync::Arc;
//!
//! # fn example() -> echo_downloader::error::Result<()> {
//! let client = DownloadClient::new(
//!     Arc::new(MapSettings::new()),
//!     ExtensionRegistry::new(),
//!     ClientConfig::builder().build()?,
//! )?;
//! # Ok(())
//! # }
//! ```

use crate::audio::{LoftyTagLibrary, Remuxer, TagLibrary};
use crate::download::progress::{Progress, ProgressCallback};
use crate::download::stream::{Fetcher, HttpFetcher};
use crate::download::task::DownloadTask;
use crate::error::{EchoError, Result};
use crate::extension::{
    require_album_client, require_playlist_client, require_radio_client, require_track_client,
    ExtensionRegistry,
};
use crate::file::manager::{ensure_directory_exists, remove_quietly, FileManager};
use crate::models::{DownloadContext, MediaItem, MediaServer, Source, Streamable, Track};
use crate::pipeline::{merge, AlbumCache, LyricsPolicy, MergedFile, TagOptions, Tagger};
use crate::quality;
use crate::settings::{default_work_dir, DestinationRoots, DownloaderSettings, Settings, ToolPaths};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where files go and which tools are used
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub roots: DestinationRoots,
    pub tools: ToolPaths,
    /// Part files, covers and remux temp files
    pub work_dir: PathBuf,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for [`ClientConfig`]; unset values come from the system
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    roots: Option<DestinationRoots>,
    tools: Option<ToolPaths>,
    work_dir: Option<PathBuf>,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn roots(mut self, roots: DestinationRoots) -> Self {
        self.roots = Some(roots);
        self
    }

    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Fails only when destination roots were not given and the platform
    /// has no home directory
    pub fn build(self) -> Result<ClientConfig> {
        let roots = match self.roots {
            Some(roots) => roots,
            None => DestinationRoots::from_system()?,
        };
        Ok(ClientConfig {
            roots,
            tools: self.tools.unwrap_or_else(ToolPaths::discover),
            work_dir: self.work_dir.unwrap_or_else(default_work_dir),
        })
    }
}

pub struct DownloadClient {
    settings: Arc<dyn Settings>,
    registry: ExtensionRegistry,
    remuxer: Remuxer,
    fetcher: Arc<dyn Fetcher>,
    tags: Arc<dyn TagLibrary>,
    files: FileManager,
    albums: AlbumCache,
    work_dir: PathBuf,
}

impl DownloadClient {
    /// Client with the reqwest fetcher and the lofty tag writer
    pub fn new(
        settings: Arc<dyn Settings>,
        registry: ExtensionRegistry,
        config: ClientConfig,
    ) -> Result<Self> {
        Ok(Self::with_collaborators(
            settings,
            registry,
            config,
            Arc::new(HttpFetcher::new()?),
            Arc::new(LoftyTagLibrary),
        ))
    }

    pub fn with_collaborators(
        settings: Arc<dyn Settings>,
        registry: ExtensionRegistry,
        config: ClientConfig,
        fetcher: Arc<dyn Fetcher>,
        tags: Arc<dyn TagLibrary>,
    ) -> Self {
        Self {
            settings,
            registry,
            remuxer: Remuxer::new(config.tools),
            fetcher,
            tags,
            files: FileManager::new(config.roots),
            albums: AlbumCache::default(),
            work_dir: config.work_dir,
        }
    }

    pub fn settings(&self) -> DownloaderSettings<'_> {
        DownloaderSettings::new(self.settings.as_ref())
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn remuxer(&self) -> &Remuxer {
        &self.remuxer
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Pick the server for the configured quality tier
    pub fn select_server<'t>(&self, track: &'t Track) -> Result<&'t Streamable> {
        let tier = self.settings().quality();
        quality::select(&track.servers, &tier, |s| s.quality)
            .ok_or_else(|| EchoError::NoCandidates(format!("servers for {}", track.id)))
    }

    /// Resolve `streamable` into concrete sources through the track's extension
    pub async fn load_server(
        &self,
        context: &DownloadContext,
        streamable: &Streamable,
    ) -> Result<MediaServer> {
        let extension = self.registry.require_music(&context.extension_id)?;
        let client = require_track_client(extension.as_ref())?;
        client.load_server(&context.track, streamable).await
    }

    /// Pick exactly one source for the configured quality tier
    pub fn select_sources(&self, server: MediaServer) -> Result<Vec<Source>> {
        let tier = self.settings().quality();
        let mut sources = server.sources;
        let index = quality::select_index(&sources, &tier, Source::quality)
            .ok_or_else(|| EchoError::NoCandidates("sources".to_string()))?;
        Ok(vec![sources.swap_remove(index)])
    }

    /// Download `source` into the work directory
    pub async fn download(
        &self,
        context: &DownloadContext,
        source: Source,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf> {
        self.download_into(&self.work_dir, context, source, cancel, progress)
            .await
    }

    /// Download `source` into `directory`. The part file is removed unless
    /// the download completes.
    pub async fn download_into(
        &self,
        directory: &Path,
        context: &DownloadContext,
        source: Source,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf> {
        ensure_directory_exists(directory).await?;
        let destination = directory.join(part_file_name(&context.track, &source));
        debug!("downloading {} to {}", context.track.id, destination.display());

        let (task, receiver) = DownloadTask::new(
            source,
            destination.clone(),
            self.fetcher.clone(),
            self.remuxer.clone(),
        );
        if let Err(e) = task.start().await {
            remove_quietly(&destination).await;
            return Err(e);
        }

        let result = task
            .wait(receiver, cancel, |event: &Progress| {
                if let Some(callback) = &progress {
                    callback(event.clone());
                }
            })
            .await;

        if result.is_err() {
            remove_quietly(&destination).await;
        }
        result
    }

    /// Merge downloaded parts into one uniquely named file
    pub async fn merge(
        &self,
        context: &DownloadContext,
        parts: &[PathBuf],
        progress: Option<ProgressCallback>,
    ) -> Result<MergedFile> {
        let track_number_in_title = self.settings().track_number_in_title();
        merge(&self.remuxer, parts, context, track_number_in_title, progress).await
    }

    /// Tag a merged file and move it to its destination folder
    pub async fn tag(
        &self,
        context: &DownloadContext,
        merged: &MergedFile,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf> {
        let options = self.tag_options();
        self.tagger()
            .tag_as(&merged.path, merged.kind, context, &options, cancel, progress)
            .await
    }

    /// Probe and tag a file that did not go through [`merge`](Self::merge)
    pub async fn tag_file(
        &self,
        context: &DownloadContext,
        file: &Path,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf> {
        let options = self.tag_options();
        self.tagger()
            .tag(file, context, &options, cancel, progress)
            .await
    }

    /// Expand a user selection into one context per track
    pub async fn download_contexts(
        &self,
        extension_id: &str,
        item: MediaItem,
    ) -> Result<Vec<DownloadContext>> {
        let extension = self.registry.require_music(extension_id)?;

        let tracks = match &item {
            MediaItem::Track(track) => {
                return Ok(vec![DownloadContext::new(extension_id, track.clone())]);
            }
            MediaItem::Album(album) => {
                require_album_client(extension.as_ref())?
                    .load_tracks(album)
                    .await?
            }
            MediaItem::Playlist(playlist) => {
                require_playlist_client(extension.as_ref())?
                    .load_tracks(playlist)
                    .await?
            }
            MediaItem::Radio(radio) => {
                require_radio_client(extension.as_ref())?
                    .load_tracks(radio)
                    .await?
            }
            MediaItem::Artist(artist) => {
                info!("artist {} is not downloadable as a list", artist.id);
                return Ok(Vec::new());
            }
        };

        info!("{} tracks from {}", tracks.len(), item.title());
        Ok(tracks
            .into_iter()
            .enumerate()
            .map(|(index, track)| {
                DownloadContext::new(extension_id, track).with_parent(item.clone(), index as u32)
            })
            .collect())
    }

    fn tag_options(&self) -> TagOptions {
        let settings = self.settings();
        TagOptions {
            lyrics: LyricsPolicy::from_settings(&settings),
            folder_kind: settings.folder_kind(),
            subfolder_prefix: settings.subfolder_prefix(),
        }
    }

    fn tagger(&self) -> Tagger<'_> {
        Tagger {
            registry: &self.registry,
            albums: &self.albums,
            remuxer: &self.remuxer,
            tags: self.tags.as_ref(),
            fetcher: self.fetcher.as_ref(),
            files: &self.files,
        }
    }
}

/// `<hash>-<random>.mp3` for streams, `.mp4` for HTTP sources so ffmpeg
/// picks an mp4 muxer for remuxed downloads
fn part_file_name(track: &Track, source: &Source) -> String {
    let extension = match source {
        Source::ByteStream { .. } => "mp3",
        Source::Http { .. } => "mp4",
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}.{}", track.identity_hash(), &suffix[..8], extension)
}
