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


//! Tag stage
//!
//! # Steps
//! 1. Album resolution (cache, then provider, then the track's own album)
//! 2. Cover fetch into `cover_temp_<hash>.jpeg` beside the file
//! 3. Lyrics resolution
//! 4. Write tags and relocate
//!
//! Steps 1-3 are independent reads and run concurrently; each advances the
//! progress counter as soon as it finishes.
//!
//! # Strategy
//! - mp3, m4a: structured tags through [`TagLibrary`]
//! - anything else: ffmpeg metadata injection
//! - structured path refusing a file as video: one retry through ffmpeg with
//!   the video flag; an m4a is first renamed to `.mp4` so the extension
//!   matches its content
//!
//! The temporary cover is removed whatever the outcome.

use crate::audio::{ContainerKind, Remuxer, TagFields, TagLibrary};
use crate::download::progress::{ProgressCallback, StepProgress};
use crate::download::stream::{download_http, Fetcher, TransferControl, TransferOutcome};
use crate::error::{EchoError, Result};
use crate::extension::ExtensionRegistry;
use crate::file::manager::{remove_quietly, FileManager};
use crate::file::paths::unique_file;
use crate::models::{render_lyrics, DownloadContext, ImageHolder, Track};
use crate::pipeline::album::{resolve_album, AlbumCache};
use crate::pipeline::lyrics::{resolve_lyrics, LyricsPolicy};
use crate::settings::FolderKind;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Destination and lyrics preferences for one tag run
#[derive(Debug, Clone)]
pub struct TagOptions {
    pub lyrics: LyricsPolicy,
    pub folder_kind: FolderKind,
    pub subfolder_prefix: String,
}

/// Collaborators of the tag stage
pub struct Tagger<'a> {
    pub registry: &'a ExtensionRegistry,
    pub albums: &'a AlbumCache,
    pub remuxer: &'a Remuxer,
    pub tags: &'a dyn TagLibrary,
    pub fetcher: &'a dyn Fetcher,
    pub files: &'a FileManager,
}

impl<'a> Tagger<'a> {
    /// Probe `file` and tag it. Returns the relocated file.
    pub async fn tag(
        &self,
        file: &Path,
        context: &DownloadContext,
        options: &TagOptions,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf> {
        let kind = self.remuxer.probe_container(file).await;
        self.tag_as(file, kind, context, options, cancel, progress).await
    }

    /// Tag `file` whose container is already known to be `kind`
    pub async fn tag_as(
        &self,
        file: &Path,
        kind: ContainerKind,
        context: &DownloadContext,
        options: &TagOptions,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback>,
    ) -> Result<PathBuf> {
        let steps = StepProgress::new(4, progress);

        let (album, cover, lyrics) = tokio::join!(
            async {
                let album = resolve_album(self.registry, self.albums, context).await;
                steps.advance();
                album
            },
            async {
                let cover = self.fetch_cover(file, &context.track, cancel).await;
                steps.advance();
                cover
            },
            async {
                let lyrics = resolve_lyrics(self.registry, &options.lyrics, context).await;
                steps.advance();
                lyrics
            },
        );

        if cancel.is_cancelled() {
            if let Some(cover) = &cover {
                remove_quietly(cover).await;
            }
            return Err(EchoError::Cancelled);
        }

        let fields = TagFields::for_context(context, album.as_ref(), render_lyrics(lyrics.as_ref()));
        let written = self
            .write_tags(file, kind, &fields, cover.as_deref(), cancel)
            .await;
        if let Some(cover) = &cover {
            remove_quietly(cover).await;
        }
        let tagged = written?;

        let directory = self.files.destination_dir(
            options.folder_kind,
            &options.subfolder_prefix,
            context.container_title(),
        );
        let placed = self.files.relocate(&tagged, &directory).await?;
        steps.advance();

        info!("tagged {} -> {}", context.track.id, placed.display());
        Ok(placed)
    }

    async fn write_tags(
        &self,
        file: &Path,
        kind: ContainerKind,
        fields: &TagFields,
        cover: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if !kind.supports_structured_tags() {
            return self.remux_tags(file, kind, fields, cover, false, cancel).await;
        }

        match self.tags.write(file, fields, cover).await {
            Ok(()) => Ok(file.to_path_buf()),
            Err(e) if e.is_video_content() => {
                warn!("{} carries video, retagging through ffmpeg", file.display());
                self.remux_tags(file, kind, fields, cover, true, cancel).await
            }
            Err(e) => Err(e),
        }
    }

    async fn remux_tags(
        &self,
        file: &Path,
        kind: ContainerKind,
        fields: &TagFields,
        cover: Option<&Path>,
        video: bool,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let target = if kind == ContainerKind::M4a && video {
            let directory = file
                .parent()
                .ok_or_else(|| EchoError::InvalidPath(file.display().to_string()))?;
            let stem = file
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| EchoError::InvalidPath(file.display().to_string()))?;
            unique_file(directory, stem, "mp4", file).await?
        } else {
            file.to_path_buf()
        };

        self.remuxer
            .inject_metadata(&target, fields, cover, video, cancel)
            .await?;
        Ok(target)
    }

    /// Download the track's cover beside `file`. Failures are logged and
    /// yield no cover.
    async fn fetch_cover(
        &self,
        file: &Path,
        track: &Track,
        cancel: &CancellationToken,
    ) -> Option<PathBuf> {
        let request = match &track.cover {
            Some(ImageHolder::Url { request, .. }) => request,
            Some(other) => {
                warn!("cover of {} is not fetchable: {:?}", track.id, other);
                return None;
            }
            None => {
                debug!("track {} has no cover", track.id);
                return None;
            }
        };

        let directory = file.parent()?;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let cover = directory.join(format!(
            "cover_temp_{}-{}.jpeg",
            track.identity_hash(),
            &suffix[..8]
        ));

        let control = TransferControl::new(cancel.child_token());
        match download_http(self.fetcher, request, &cover, false, &control).await {
            Ok(TransferOutcome::Finished(path)) => Some(path),
            Ok(TransferOutcome::Interrupted) => {
                remove_quietly(&cover).await;
                None
            }
            Err(e) => {
                warn!("cover fetch failed for {}: {}", track.id, e);
                remove_quietly(&cover).await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::stream::FetchResponse;
    use crate::models::{Album, MediaItem, Request};
    use crate::settings::{DestinationRoots, ToolPaths};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTags {
        written: Mutex<Vec<(PathBuf, TagFields, bool)>>,
        refuse_as_video: bool,
    }

    #[async_trait]
    impl TagLibrary for RecordingTags {
        async fn write(&self, file: &Path, fields: &TagFields, cover: Option<&Path>) -> Result<()> {
            if self.refuse_as_video {
                return Err(EchoError::VideoContent(file.display().to_string()));
            }
            if let Some(cover) = cover {
                assert!(cover.exists());
            }
            self.written
                .lock()
                .unwrap()
                .push((file.to_path_buf(), fields.clone(), cover.is_some()));
            Ok(())
        }
    }

    struct CoverFetcher;

    #[async_trait]
    impl Fetcher for CoverFetcher {
        async fn fetch(&self, request: &Request, _offset: u64) -> Result<FetchResponse> {
            if request.url.contains("missing") {
                return Err(EchoError::UnexpectedStatus {
                    status: 404,
                    url: request.url.clone(),
                });
            }
            Ok(FetchResponse {
                content_length: Some(4),
                body: Box::new(std::io::Cursor::new(b"\xFF\xD8\xFF\xD9".to_vec())),
            })
        }
    }

    fn options() -> TagOptions {
        TagOptions {
            lyrics: LyricsPolicy {
                enabled: false,
                synced: false,
                fallback_extension: None,
            },
            folder_kind: FolderKind::Music,
            subfolder_prefix: "Echo/".to_string(),
        }
    }

    fn context(cover_url: &str) -> DownloadContext {
        let mut track = Track::new("t1", "Song");
        track.cover = Some(ImageHolder::Url {
            request: Request::new(cover_url),
            crop: false,
        });
        let album = Album::new("al", "Best: Of");
        track.album = Some(album.clone());
        DownloadContext::new("ext", track).with_parent(MediaItem::Album(album), 0)
    }

    struct Fixture {
        registry: ExtensionRegistry,
        albums: AlbumCache,
        remuxer: Remuxer,
        files: FileManager,
    }

    impl Fixture {
        fn new(base: &Path) -> Self {
            Self {
                registry: ExtensionRegistry::new(),
                albums: AlbumCache::default(),
                remuxer: Remuxer::new(ToolPaths::new(
                    "/nonexistent/echo-ffmpeg",
                    "/nonexistent/echo-ffprobe",
                )),
                files: FileManager::new(DestinationRoots::under(base)),
            }
        }

        fn tagger<'a>(&'a self, tags: &'a dyn TagLibrary) -> Tagger<'a> {
            Tagger {
                registry: &self.registry,
                albums: &self.albums,
                remuxer: &self.remuxer,
                tags,
                fetcher: &CoverFetcher,
                files: &self.files,
            }
        }
    }

    #[tokio::test]
    async fn test_structured_path_and_relocation() {
        let work = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(base.path());
        let tags = RecordingTags::default();

        let file = work.path().join("Song.mp3");
        tokio::fs::write(&file, b"audio").await.unwrap();

        let placed = fixture
            .tagger(&tags)
            .tag_as(
                &file,
                ContainerKind::Mp3,
                &context("https://img.example/cover.jpg"),
                &options(),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(placed, base.path().join("Music/Echo/Best_ Of/Song.mp3"));
        let written = tags.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].1.album, "Best_ Of");
        assert!(written[0].2);

        // Work directory holds neither the file nor the cover
        let mut leftovers = std::fs::read_dir(work.path()).unwrap();
        assert!(leftovers.next().is_none());
    }

    /// Serves the cover only once the test opens the gate
    struct GatedCover {
        gate: tokio::sync::Semaphore,
    }

    #[async_trait]
    impl Fetcher for GatedCover {
        async fn fetch(&self, request: &Request, offset: u64) -> Result<FetchResponse> {
            let _open = self.gate.acquire().await;
            CoverFetcher.fetch(request, offset).await
        }
    }

    #[tokio::test]
    async fn test_progress_advances_as_reads_finish() {
        let work = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(base.path());
        let tags = RecordingTags::default();
        let fetcher = GatedCover {
            gate: tokio::sync::Semaphore::new(0),
        };
        let tagger = Tagger {
            fetcher: &fetcher,
            ..fixture.tagger(&tags)
        };

        let file = work.path().join("Song.mp3");
        tokio::fs::write(&file, b"audio").await.unwrap();

        let steps = std::sync::Arc::new(Mutex::new(Vec::new()));
        let sink = steps.clone();
        let callback: ProgressCallback = std::sync::Arc::new(move |p| {
            if let crate::download::Progress::InProgress { received, .. } = p {
                sink.lock().unwrap().push(received);
            }
        });

        let context = context("https://img.example/cover.jpg");
        let token = CancellationToken::new();
        let opts = options();
        let (placed, _) = tokio::join!(
            tagger.tag_as(&file, ContainerKind::Mp3, &context, &opts, &token, Some(callback)),
            async {
                for _ in 0..100 {
                    if steps.lock().unwrap().len() == 2 {
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                // Album and lyrics are done while the cover is still pending
                assert_eq!(*steps.lock().unwrap(), vec![1, 2]);
                fetcher.gate.add_permits(1);
            }
        );

        placed.unwrap();
        assert_eq!(*steps.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_cover_failure_is_not_fatal() {
        let work = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(base.path());
        let tags = RecordingTags::default();

        let file = work.path().join("Song.mp3");
        tokio::fs::write(&file, b"audio").await.unwrap();

        fixture
            .tagger(&tags)
            .tag_as(
                &file,
                ContainerKind::Mp3,
                &context("https://img.example/missing.jpg"),
                &options(),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert!(!tags.written.lock().unwrap()[0].2);
    }

    #[tokio::test]
    async fn test_video_retry_goes_through_ffmpeg() {
        let work = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        let fixture = Fixture::new(base.path());
        let tags = RecordingTags {
            refuse_as_video: true,
            ..Default::default()
        };

        let file = work.path().join("Clip.m4a");
        tokio::fs::write(&file, b"video").await.unwrap();

        // The retry needs ffmpeg, which is absent here
        let err = fixture
            .tagger(&tags)
            .tag_as(
                &file,
                ContainerKind::M4a,
                &context("https://img.example/cover.jpg"),
                &options(),
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EchoError::FfmpegNotFound));

        // Renamed to .mp4 before the remux, cover cleaned up
        assert!(work.path().join("Clip.mp4").exists());
        assert!(!file.exists());
        let names: Vec<String> = std::fs::read_dir(work.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Clip.mp4".to_string()]);
    }
}
