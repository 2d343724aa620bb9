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


//! Batch download manager
//!
//! Every track of a batch runs its whole pipeline as one tokio task:
//!
//! ```text
//! select server -> load server -> select source -> download -> merge -> tag
//! ```
//!
//! # Scheduling
//! - At most `download_num` units hold a permit at a time
//! - Each unit has its own `CancellationToken`, a child of the manager's
//!   root token, so one track or the whole batch can be cancelled. Units are
//!   tracked by their own id; cancelling a track id cancels all of its units.
//! - A unit works inside its own directory under the work dir, which is
//!   removed however the unit ends
//! - One unit failing never touches its siblings
//!
//! # Events
//! Stage progress is forwarded as [`PipelineEvent`]s. The download task's
//! own terminal event is not forwarded; instead every unit ends with exactly
//! one terminal event for the stage it reached.

use crate::client::DownloadClient;
use crate::download::progress::{Progress, ProgressCallback};
use crate::error::{EchoError, Result};
use crate::file::manager::remove_dir_quietly;
use crate::models::DownloadContext;
use log::{error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Pipeline stage a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Download,
    Merge,
    Tag,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Download => "download",
            PipelineStage::Merge => "merge",
            PipelineStage::Tag => "tag",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineEvent {
    pub track_id: String,
    pub stage: PipelineStage,
    pub progress: Progress,
}

/// Callback type for pipeline events
pub type PipelineCallback = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

/// How one track of a batch ended
#[derive(Debug)]
pub struct TrackOutcome {
    pub track_id: String,
    /// Final file in its destination folder
    pub result: Result<PathBuf>,
}

/// Runs batches of track pipelines with bounded concurrency
pub struct DownloadManager {
    client: Arc<DownloadClient>,
    semaphore: Arc<Semaphore>,
    root: Mutex<CancellationToken>,
    /// Running units by unit id. A batch may hold the same track twice.
    units: Arc<Mutex<HashMap<Uuid, RunningUnit>>>,
    callback: Option<PipelineCallback>,
}

struct RunningUnit {
    track_id: String,
    cancel: CancellationToken,
}

impl DownloadManager {
    /// Manager sized by the client's `download_num` setting
    pub fn new(client: Arc<DownloadClient>) -> Self {
        let permits = client.settings().concurrent_downloads();
        info!("download manager with {} concurrent downloads", permits);
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(permits)),
            root: Mutex::new(CancellationToken::new()),
            units: Arc::new(Mutex::new(HashMap::new())),
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: PipelineCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn client(&self) -> &Arc<DownloadClient> {
        &self.client
    }

    /// Number of units started and not yet finished
    pub fn active_count(&self) -> usize {
        lock(&self.units).len()
    }

    /// Run every context's pipeline. Returns one outcome per context, in
    /// input order.
    pub async fn run_batch(&self, contexts: Vec<DownloadContext>) -> Vec<TrackOutcome> {
        let root = lock(&self.root).clone();
        let mut handles = Vec::with_capacity(contexts.len());

        for context in contexts {
            let track_id = context.track.id.clone();
            let id = Uuid::new_v4();
            let token = root.child_token();
            lock(&self.units).insert(
                id,
                RunningUnit {
                    track_id: track_id.clone(),
                    cancel: token.clone(),
                },
            );

            let unit = PipelineUnit {
                id,
                client: self.client.clone(),
                callback: self.callback.clone(),
                context,
                cancel: token,
            };
            let semaphore = self.semaphore.clone();
            let units = self.units.clone();

            let handle = tokio::spawn(async move {
                let result = unit.run_with_permit(&semaphore).await;
                lock(&units).remove(&unit.id);
                result
            });
            handles.push((track_id, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (track_id, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!("pipeline for {} panicked: {}", track_id, e);
                    Err(EchoError::Internal(format!("pipeline task failed: {}", e)))
                }
            };
            outcomes.push(TrackOutcome { track_id, result });
        }
        outcomes
    }

    /// Cancel every running unit of a track. Returns false if there is none.
    pub fn cancel(&self, track_id: &str) -> bool {
        let units = lock(&self.units);
        let mut found = false;
        for unit in units.values().filter(|u| u.track_id == track_id) {
            unit.cancel.cancel();
            found = true;
        }
        if found {
            info!("cancelling {}", track_id);
        }
        found
    }

    /// Cancel every running unit. Later batches start fresh.
    pub fn cancel_all(&self) {
        let mut root = lock(&self.root);
        info!("cancelling all downloads");
        root.cancel();
        *root = CancellationToken::new();
    }
}

/// One track's pipeline
struct PipelineUnit {
    id: Uuid,
    client: Arc<DownloadClient>,
    callback: Option<PipelineCallback>,
    context: DownloadContext,
    cancel: CancellationToken,
}

impl PipelineUnit {
    async fn run_with_permit(&self, semaphore: &Semaphore) -> Result<PathBuf> {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = semaphore.acquire() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.emit(PipelineStage::Download, Progress::Cancelled);
            return Err(EchoError::Cancelled);
        };

        let suffix = self.id.simple().to_string();
        let directory = self.client.work_dir().join(format!(
            "{}-{}",
            self.context.track.identity_hash(),
            &suffix[..8]
        ));

        let mut stage = PipelineStage::Download;
        let result = self.run(&directory, &mut stage).await;
        remove_dir_quietly(&directory).await;

        match &result {
            Ok(file) => {
                let size = tokio::fs::metadata(file).await.map(|m| m.len()).unwrap_or(0);
                info!("{} done: {}", self.context.track.id, file.display());
                self.emit(
                    stage,
                    Progress::Completed {
                        size,
                        file: file.clone(),
                    },
                );
            }
            Err(e) if e.is_cancelled() => {
                info!("{} cancelled during {}", self.context.track.id, stage);
                self.emit(stage, Progress::Cancelled);
            }
            Err(e) => {
                error!("{} failed during {}: {}", self.context.track.id, stage, e);
                self.emit(
                    stage,
                    Progress::failed(EchoError::DownloadFailed(format!("{} stage: {}", stage, e))),
                );
            }
        }
        result
    }

    async fn run(&self, directory: &Path, stage: &mut PipelineStage) -> Result<PathBuf> {
        let client = self.client.as_ref();
        let context = &self.context;

        let streamable = client.select_server(&context.track)?.clone();
        let server = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(EchoError::Cancelled),
            server = client.load_server(context, &streamable) => server?,
        };
        let source = client
            .select_sources(server)?
            .into_iter()
            .next()
            .ok_or_else(|| EchoError::NoCandidates("sources".to_string()))?;

        info!("{}: downloading", context.track.id);
        let part = client
            .download_into(
                directory,
                context,
                source,
                &self.cancel,
                self.stage_callback(PipelineStage::Download),
            )
            .await?;

        *stage = PipelineStage::Merge;
        self.check_cancelled()?;
        info!("{}: merging", context.track.id);
        let merged = client
            .merge(context, &[part], self.stage_callback(PipelineStage::Merge))
            .await?;

        *stage = PipelineStage::Tag;
        self.check_cancelled()?;
        info!("{}: tagging", context.track.id);
        client
            .tag(context, &merged, &self.cancel, self.stage_callback(PipelineStage::Tag))
            .await
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EchoError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Forward a stage's non-terminal progress as pipeline events
    fn stage_callback(&self, stage: PipelineStage) -> Option<ProgressCallback> {
        let callback = self.callback.clone()?;
        let track_id = self.context.track.id.clone();
        Some(Arc::new(move |progress: Progress| {
            if progress.is_terminal() {
                return;
            }
            callback(PipelineEvent {
                track_id: track_id.clone(),
                stage,
                progress,
            });
        }))
    }

    fn emit(&self, stage: PipelineStage, progress: Progress) {
        if let Some(callback) = &self.callback {
            callback(PipelineEvent {
                track_id: self.context.track.id.clone(),
                stage,
                progress,
            });
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("download manager lock poisoned");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{TagFields, TagLibrary};
    use crate::client::ClientConfig;
    use crate::download::stream::{FetchResponse, Fetcher};
    use crate::extension::{ExtensionRegistry, MusicExtension, TrackClient};
    use crate::models::{Album, ByteStream, MediaItem, MediaServer, Request, Source, Streamable, Track};
    use crate::settings::{DestinationRoots, MapSettings, ToolPaths, KEY_FOLDER};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    /// Serves 64 bytes per track; tracks named "stall" never finish
    #[derive(Default)]
    struct StubMusic {
        writers: Mutex<Vec<DuplexStream>>,
    }

    #[async_trait]
    impl TrackClient for StubMusic {
        async fn load_server(&self, track: &Track, _streamable: &Streamable) -> Result<MediaServer> {
            let stream = if track.title == "stall" {
                let (reader, writer) = tokio::io::duplex(64);
                self.writers.lock().unwrap().push(writer);
                ByteStream::new(reader)
            } else {
                ByteStream::new(std::io::Cursor::new(vec![1u8; 64]))
            };
            Ok(MediaServer::new(vec![Source::ByteStream {
                quality: 1,
                title: None,
                stream,
                total_bytes: 64,
            }]))
        }
    }

    impl MusicExtension for StubMusic {
        fn id(&self) -> &str {
            "stub"
        }

        fn name(&self) -> &str {
            "Stub"
        }

        fn track_client(&self) -> Option<&dyn TrackClient> {
            Some(self)
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl TagLibrary for AcceptAll {
        async fn write(&self, _file: &Path, _fields: &TagFields, _cover: Option<&Path>) -> Result<()> {
            Ok(())
        }
    }

    struct NoFetch;

    #[async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, request: &Request, _offset: u64) -> Result<FetchResponse> {
            Err(EchoError::UnexpectedStatus {
                status: 404,
                url: request.url.clone(),
            })
        }
    }

    fn manager(base: &Path, events: Arc<Mutex<Vec<PipelineEvent>>>) -> DownloadManager {
        let settings = MapSettings::new();
        settings.set(KEY_FOLDER, "music");
        let config = ClientConfig::builder()
            .roots(DestinationRoots::under(base))
            .tools(ToolPaths::new("/nonexistent/echo-ffmpeg", "/nonexistent/echo-ffprobe"))
            .work_dir(base.join("work"))
            .build()
            .unwrap();
        let client = DownloadClient::with_collaborators(
            Arc::new(settings),
            ExtensionRegistry::new().with_music(Arc::new(StubMusic::default())),
            config,
            Arc::new(NoFetch),
            Arc::new(AcceptAll),
        );
        DownloadManager::new(Arc::new(client)).with_callback(Arc::new(move |event: PipelineEvent| {
            events.lock().unwrap().push(event);
        }))
    }

    fn context(id: &str, title: &str, servers: bool) -> DownloadContext {
        let mut track = Track::new(id, title);
        if servers {
            track.servers = vec![Streamable::new("s", 1)];
        }
        let album = Album::new("al", "Mix");
        DownloadContext::new("stub", track).with_parent(MediaItem::Album(album), 0)
    }

    async fn work_files(base: &Path) -> usize {
        let Ok(mut entries) = tokio::fs::read_dir(base.join("work")).await else {
            return 0;
        };
        let mut count = 0;
        while let Ok(Some(_)) = entries.next_entry().await {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let manager = manager(dir.path(), events.clone());

        let outcomes = manager
            .run_batch(vec![
                context("t1", "First", true),
                context("t2", "Broken", false),
                context("t3", "Third", true),
            ])
            .await;

        assert_eq!(outcomes.len(), 3);
        let first = outcomes[0].result.as_ref().unwrap();
        assert_eq!(first, &dir.path().join("Music/Echo/Mix/First.mp3"));
        assert!(matches!(outcomes[1].result, Err(EchoError::NoCandidates(_))));
        assert!(outcomes[2].result.is_ok());
        assert_eq!(work_files(dir.path()).await, 0);
        assert_eq!(manager.active_count(), 0);

        let events = events.lock().unwrap();
        for id in ["t1", "t2", "t3"] {
            let terminal = events
                .iter()
                .filter(|e| e.track_id == id && e.progress.is_terminal())
                .count();
            assert_eq!(terminal, 1, "{}", id);
        }
        assert!(events
            .iter()
            .any(|e| e.track_id == "t1" && e.stage == PipelineStage::Merge));
    }

    #[tokio::test]
    async fn test_cancel_one_track() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let manager = manager(dir.path(), events.clone());

        let (outcomes, cancelled) = tokio::join!(
            manager.run_batch(vec![context("t1", "stall", true), context("t2", "Fine", true)]),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                manager.cancel("t1")
            }
        );

        assert!(cancelled);
        assert!(matches!(outcomes[0].result, Err(EchoError::Cancelled)));
        assert!(outcomes[1].result.is_ok());
        assert_eq!(work_files(dir.path()).await, 0);
        assert!(!manager.cancel("t1"));

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| e.track_id == "t1"
            && e.stage == PipelineStage::Download
            && matches!(e.progress, Progress::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_duplicate_track_after_sibling_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), Arc::new(Mutex::new(Vec::new())));

        let (outcomes, cancelled) = tokio::join!(
            manager.run_batch(vec![context("t1", "Fine", true), context("t1", "stall", true)]),
            async {
                for _ in 0..100 {
                    if manager.active_count() == 1 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                manager.cancel("t1")
            }
        );

        assert!(cancelled);
        assert!(outcomes[0].result.is_ok());
        assert!(matches!(outcomes[1].result, Err(EchoError::Cancelled)));
        assert_eq!(manager.active_count(), 0);
        assert_eq!(work_files(dir.path()).await, 0);
    }

    #[tokio::test]
    async fn test_cancel_all_then_new_batch() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), Arc::new(Mutex::new(Vec::new())));

        let (outcomes, _) = tokio::join!(
            manager.run_batch(vec![context("t1", "stall", true)]),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                manager.cancel_all()
            }
        );
        assert!(matches!(outcomes[0].result, Err(EchoError::Cancelled)));

        let outcomes = manager.run_batch(vec![context("t2", "Again", true)]).await;
        assert!(outcomes[0].result.is_ok());
    }
}
