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


//! Download task state machine
//!
//! ```text
//! Idle -> Running -> Completed | Failed | Cancelled
//!            |  ^
//!            v  | resume
//!          Paused
//! ```
//!
//! # Paths
//! - Byte streams and progressive HTTP sources are copied by the transfer
//!   engine. These support pause and resume: HTTP resumes with a byte range
//!   from the current file length, streams keep reading the same reader.
//! - Manifest sources (HLS, DASH) are remuxed by ffmpeg. The tool cannot pick
//!   up at a byte offset, so pause and resume are absent from their
//!   [`TaskCapabilities`].
//! - Encrypted sources fail with `UnsupportedSource` before any file exists.
//!
//! # Terminal Events
//! A run reports `Completed` or `Failed` only while the task is still
//! `Running`; `pause` and `cancel` move the state first, so a run they stop
//! stays silent. Failures and cancellation delete the partial file.
//!
//! # Restarts
//! Once a task has been paused, or a stream has been read from, `start`
//! appends to the existing file. A stream cannot be rewound, so truncating
//! would drop the bytes already consumed.

use crate::audio::{DurationScanner, FfmpegCommand, Remuxer};
use crate::download::progress::{self, DownloadState, Progress, ProgressReceiver, ProgressSender};
use crate::download::stream::{download_http, transfer, Fetcher, TransferControl, TransferOutcome};
use crate::error::{EchoError, Result};
use crate::file::manager::remove_quietly;
use crate::models::{ByteStream, Decryption, Request, Source, SourceType};
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Operations a task supports beyond start and cancel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskCapabilities {
    pub pause: bool,
    pub resume: bool,
}

enum TaskInput {
    Stream {
        reader: tokio::sync::Mutex<Option<ByteStream>>,
        total_bytes: u64,
    },
    Http {
        request: Request,
        source_type: SourceType,
        decryption: Option<Decryption>,
    },
}

struct RunHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// One source being downloaded into one file
pub struct DownloadTask {
    input: Arc<TaskInput>,
    destination: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    remuxer: Remuxer,
    progress: ProgressSender,
    state: Arc<Mutex<DownloadState>>,
    received: Arc<AtomicU64>,
    append: AtomicBool,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

/// Everything a spawned run needs
#[derive(Clone)]
struct RunContext {
    input: Arc<TaskInput>,
    destination: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    remuxer: Remuxer,
    progress: ProgressSender,
    state: Arc<Mutex<DownloadState>>,
    received: Arc<AtomicU64>,
}

impl DownloadTask {
    /// Create a task for `source` writing to `destination`, together with the
    /// receiving end of its progress events
    pub fn new(
        source: Source,
        destination: PathBuf,
        fetcher: Arc<dyn Fetcher>,
        remuxer: Remuxer,
    ) -> (Self, ProgressReceiver) {
        let input = match source {
            Source::ByteStream {
                stream,
                total_bytes,
                ..
            } => TaskInput::Stream {
                reader: tokio::sync::Mutex::new(Some(stream)),
                total_bytes,
            },
            Source::Http {
                request,
                source_type,
                decryption,
                ..
            } => TaskInput::Http {
                request,
                source_type,
                decryption,
            },
        };

        let (tx, rx) = progress::channel();
        let task = Self {
            input: Arc::new(input),
            destination,
            fetcher,
            remuxer,
            progress: tx,
            state: Arc::new(Mutex::new(DownloadState::Idle)),
            received: Arc::new(AtomicU64::new(0)),
            append: AtomicBool::new(false),
            run: tokio::sync::Mutex::new(None),
        };
        (task, rx)
    }

    pub fn capabilities(&self) -> TaskCapabilities {
        let transfer = match self.input.as_ref() {
            TaskInput::Stream { .. } => true,
            TaskInput::Http { source_type, .. } => source_type.is_progressive(),
        };
        TaskCapabilities {
            pause: transfer,
            resume: transfer,
        }
    }

    pub fn state(&self) -> DownloadState {
        read_state(&self.state)
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Bytes in the destination (transfer path) or media milliseconds
    /// processed (remux path)
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    /// Start the transfer, replacing any run in flight. Starts from scratch
    /// unless earlier bytes can't be fetched again (see the module docs).
    pub async fn start(&self) -> Result<()> {
        if self.state().is_terminal() {
            return Err(EchoError::InvalidState(format!(
                "cannot start a {} task",
                self.state().as_str()
            )));
        }

        if let TaskInput::Http {
            decryption: Some(decryption),
            ..
        } = self.input.as_ref()
        {
            let detail = format!("{:?}", decryption);
            error!("{}: encrypted source {}", self.destination.display(), detail);
            write_state(&self.state, DownloadState::Failed);
            self.progress
                .send(Progress::failed(EchoError::UnsupportedSource(detail.clone())));
            return Err(EchoError::UnsupportedSource(detail));
        }

        self.launch(self.append.load(Ordering::SeqCst)).await;
        Ok(())
    }

    /// Stop the transfer and keep what was received
    pub async fn pause(&self) -> Result<()> {
        if !self.capabilities().pause {
            return Err(EchoError::Unsupported("pause on a remux download".to_string()));
        }
        {
            let mut state = lock_state(&self.state);
            if *state != DownloadState::Running {
                return Err(EchoError::InvalidState(format!(
                    "cannot pause a {} task",
                    state.as_str()
                )));
            }
            *state = DownloadState::Paused;
        }
        self.append.store(true, Ordering::SeqCst);

        self.stop_run().await;
        let received = self.received();
        debug!("paused {} at {}", self.destination.display(), received);
        self.progress.send(Progress::Paused { received });
        Ok(())
    }

    /// Continue a paused transfer from where it stopped
    pub async fn resume(&self) -> Result<()> {
        if !self.capabilities().resume {
            return Err(EchoError::Unsupported("resume on a remux download".to_string()));
        }
        let state = self.state();
        if state != DownloadState::Paused {
            return Err(EchoError::InvalidState(format!(
                "cannot resume a {} task",
                state.as_str()
            )));
        }

        self.launch(true).await;
        Ok(())
    }

    /// Stop the task for good and delete the partial file. Cancelling a
    /// finished task does nothing.
    pub async fn cancel(&self) {
        {
            let mut state = lock_state(&self.state);
            if state.is_terminal() {
                return;
            }
            *state = DownloadState::Cancelled;
        }

        self.stop_run().await;
        remove_quietly(&self.destination).await;
        info!("cancelled {}", self.destination.display());
        self.progress.send(Progress::Cancelled);
    }

    /// Forward progress to `on_event` until the task ends, cancelling it when
    /// `cancel` fires. Returns the completed file.
    pub async fn wait<F>(
        &self,
        receiver: ProgressReceiver,
        cancel: &CancellationToken,
        on_event: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(&Progress),
    {
        let terminal = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.cancel().await;
                return Err(EchoError::Cancelled);
            }
            terminal = receiver.wait_terminal(on_event) => terminal,
        };

        match terminal {
            Some(Progress::Completed { file, .. }) => Ok(file),
            Some(Progress::Failed { error }) => Err(Arc::try_unwrap(error)
                .unwrap_or_else(|shared| EchoError::DownloadFailed(shared.to_string()))),
            Some(_) => Err(EchoError::Cancelled),
            None => Err(EchoError::Internal("progress channel closed".to_string())),
        }
    }

    async fn launch(&self, append: bool) {
        let mut run = self.run.lock().await;
        if let Some(previous) = run.take() {
            previous.cancel.cancel();
            let _ = previous.handle.await;
        }

        write_state(&self.state, DownloadState::Running);
        if matches!(self.input.as_ref(), TaskInput::Stream { .. }) {
            self.append.store(true, Ordering::SeqCst);
        }

        let cancel = CancellationToken::new();
        let context = RunContext {
            input: self.input.clone(),
            destination: self.destination.clone(),
            fetcher: self.fetcher.clone(),
            remuxer: self.remuxer.clone(),
            progress: self.progress.clone(),
            state: self.state.clone(),
            received: self.received.clone(),
        };
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let result = context.execute(append, &token).await;
            context.finish(result).await;
        });

        *run = Some(RunHandle { cancel, handle });
    }

    async fn stop_run(&self) {
        let previous = self.run.lock().await.take();
        if let Some(previous) = previous {
            previous.cancel.cancel();
            let _ = previous.handle.await;
        }
    }
}

impl RunContext {
    async fn execute(&self, append: bool, cancel: &CancellationToken) -> Result<TransferOutcome> {
        let control = TransferControl::new(cancel.clone())
            .with_progress(self.progress.clone())
            .with_counter(self.received.clone());

        match self.input.as_ref() {
            TaskInput::Stream {
                reader,
                total_bytes,
            } => {
                let mut guard = reader.lock().await;
                let stream = guard
                    .as_mut()
                    .ok_or_else(|| EchoError::InvalidState("stream already consumed".to_string()))?;
                let total = Some(*total_bytes).filter(|t| *t > 0);
                let outcome = transfer(&self.destination, &mut stream.0, total, append, &control).await?;
                if let TransferOutcome::Finished(path) = &outcome {
                    guard.take();
                    if let Some(total) = total {
                        let written = tokio::fs::metadata(path).await?.len();
                        if written < total {
                            return Err(EchoError::DownloadFailed(format!(
                                "Stream ended early: {}/{} bytes",
                                written, total
                            )));
                        }
                    }
                }
                Ok(outcome)
            }
            TaskInput::Http {
                request,
                source_type,
                ..
            } if source_type.is_progressive() => {
                download_http(self.fetcher.as_ref(), request, &self.destination, append, &control)
                    .await
            }
            TaskInput::Http { request, .. } => self.remux(request, cancel).await,
        }
    }

    /// Download a manifest source with ffmpeg stream copy
    async fn remux(&self, request: &Request, cancel: &CancellationToken) -> Result<TransferOutcome> {
        // ffmpeg refuses to overwrite without -y
        match tokio::fs::remove_file(&self.destination).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EchoError::FileIoError(format!(
                    "remove: {} - {}",
                    self.destination.display(),
                    e
                )))
            }
        }

        let mut cmd = FfmpegCommand::new();
        if let Some(headers) = request.header_block() {
            cmd = cmd.arg("-headers").arg(format!("{}\r\n", headers));
        }
        let cmd = cmd
            .input(&request.url)
            .args(["-c", "copy"])
            .output(&self.destination);

        self.progress.send(Progress::Initialized { total: None });
        let mut scanner = DurationScanner::default();
        let progress = &self.progress;
        let received = &self.received;

        let result = self
            .remuxer
            .run(
                &cmd,
                cancel,
                |line| {
                    if let Some(duration) = scanner.feed(line) {
                        progress.send(Progress::Initialized {
                            total: Some(duration),
                        });
                    }
                },
                |tick| {
                    received.store(tick.time_ms, Ordering::SeqCst);
                    progress.send(Progress::InProgress {
                        received: tick.time_ms,
                        // kbit/s to bytes/s
                        speed: tick.bitrate_kbps.map(|kbps| (kbps * 125.0) as u64),
                    });
                },
            )
            .await;

        match result {
            Ok(()) => Ok(TransferOutcome::Finished(self.destination.clone())),
            Err(e) if e.is_cancelled() => Ok(TransferOutcome::Interrupted),
            Err(e) => Err(e),
        }
    }

    async fn finish(&self, result: Result<TransferOutcome>) {
        match result {
            Ok(TransferOutcome::Finished(file)) => {
                let size = match tokio::fs::metadata(&file).await {
                    Ok(meta) => meta.len(),
                    Err(e) => {
                        self.fail(EchoError::FileIoError(format!(
                            "stat: {} - {}",
                            file.display(),
                            e
                        )))
                        .await;
                        return;
                    }
                };

                let mut state = lock_state(&self.state);
                if *state == DownloadState::Running {
                    *state = DownloadState::Completed;
                    self.progress.send(Progress::Completed { size, file });
                }
            }
            // Stopped by pause, cancel or a restart; they report for themselves
            Ok(TransferOutcome::Interrupted) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => self.fail(e).await,
        }
    }

    async fn fail(&self, err: EchoError) {
        {
            let mut state = lock_state(&self.state);
            if *state != DownloadState::Running {
                return;
            }
            *state = DownloadState::Failed;
        }
        error!("download to {} failed: {}", self.destination.display(), err);
        remove_quietly(&self.destination).await;
        self.progress.send(Progress::failed(err));
    }
}

fn lock_state(state: &Mutex<DownloadState>) -> std::sync::MutexGuard<'_, DownloadState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_state(state: &Mutex<DownloadState>) -> DownloadState {
    *lock_state(state)
}

fn write_state(state: &Mutex<DownloadState>, value: DownloadState) {
    *lock_state(state) = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::stream::FetchResponse;
    use crate::settings::ToolPaths;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    struct NoFetch;

    #[async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, request: &Request, _offset: u64) -> Result<FetchResponse> {
            Err(EchoError::UnexpectedStatus {
                status: 500,
                url: request.url.clone(),
            })
        }
    }

    fn no_tools() -> Remuxer {
        Remuxer::new(ToolPaths::new(
            "/nonexistent/echo-ffmpeg",
            "/nonexistent/echo-ffprobe",
        ))
    }

    fn stream_task(
        reader: tokio::io::DuplexStream,
        dest: PathBuf,
        total: u64,
    ) -> (DownloadTask, ProgressReceiver) {
        let source = Source::ByteStream {
            quality: 0,
            title: None,
            stream: ByteStream::new(reader),
            total_bytes: total,
        };
        DownloadTask::new(source, dest, Arc::new(NoFetch), no_tools())
    }

    async fn wait_for_bytes(task: &DownloadTask, bytes: u64) {
        for _ in 0..200 {
            if task.received() >= bytes {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transfer stalled at {}", task.received());
    }

    #[tokio::test]
    async fn test_stream_pause_resume_complete() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.mp3");
        let (reader, mut writer) = tokio::io::duplex(1024);
        let (task, rx) = stream_task(reader, dest.clone(), 8);

        assert_eq!(task.capabilities(), TaskCapabilities { pause: true, resume: true });
        task.start().await.unwrap();
        assert_eq!(task.state(), DownloadState::Running);

        writer.write_all(b"abcd").await.unwrap();
        wait_for_bytes(&task, 4).await;
        task.pause().await.unwrap();
        assert_eq!(task.state(), DownloadState::Paused);

        writer.write_all(b"efgh").await.unwrap();
        drop(writer);
        task.resume().await.unwrap();

        let mut events = Vec::new();
        let file = task
            .wait(rx, &CancellationToken::new(), |p| events.push(p.clone()))
            .await
            .unwrap();

        assert_eq!(file, dest);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"abcdefgh");
        assert_eq!(task.state(), DownloadState::Completed);
        assert!(events.iter().any(|p| matches!(p, Progress::Paused { received: 4 })));
        assert!(matches!(events.last(), Some(Progress::Completed { size: 8, .. })));
        assert_eq!(events.iter().filter(|p| p.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn test_start_after_pause_keeps_stream_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.mp3");
        let (reader, mut writer) = tokio::io::duplex(1024);
        let (task, rx) = stream_task(reader, dest.clone(), 8);

        task.start().await.unwrap();
        writer.write_all(b"abcd").await.unwrap();
        wait_for_bytes(&task, 4).await;
        task.pause().await.unwrap();

        writer.write_all(b"efgh").await.unwrap();
        drop(writer);
        task.start().await.unwrap();

        let mut events = Vec::new();
        task.wait(rx, &CancellationToken::new(), |p| events.push(p.clone()))
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"abcdefgh");
        assert!(matches!(events.last(), Some(Progress::Completed { size: 8, .. })));
    }

    #[tokio::test]
    async fn test_short_stream_fails() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.mp3");
        let (reader, mut writer) = tokio::io::duplex(1024);
        let (task, rx) = stream_task(reader, dest.clone(), 8);

        task.start().await.unwrap();
        writer.write_all(b"abc").await.unwrap();
        drop(writer);

        let err = task.wait(rx, &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, EchoError::DownloadFailed(_)));
        assert_eq!(task.state(), DownloadState::Failed);
        assert!(!dest.exists());
    }

    /// First fetch hangs on a test-controlled pipe, later fetches serve the rest
    struct PausableFetch {
        pipe: std::sync::Mutex<Option<tokio::io::DuplexStream>>,
        offsets: std::sync::Mutex<Vec<u64>>,
        body: &'static [u8],
    }

    #[async_trait]
    impl Fetcher for PausableFetch {
        async fn fetch(&self, _request: &Request, offset: u64) -> Result<FetchResponse> {
            self.offsets.lock().unwrap().push(offset);
            let remaining = self.body.len() as u64 - offset;
            let body: Box<dyn tokio::io::AsyncRead + Send + Unpin> =
                match self.pipe.lock().unwrap().take() {
                    Some(pipe) => Box::new(pipe),
                    None => Box::new(std::io::Cursor::new(self.body[offset as usize..].to_vec())),
                };
            Ok(FetchResponse {
                content_length: Some(remaining),
                body,
            })
        }
    }

    #[tokio::test]
    async fn test_http_pause_resume_requests_range() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.mp4");
        let (reader, mut writer) = tokio::io::duplex(1024);
        let fetcher = Arc::new(PausableFetch {
            pipe: std::sync::Mutex::new(Some(reader)),
            offsets: std::sync::Mutex::new(Vec::new()),
            body: b"abcdefgh",
        });
        let source = Source::progressive(Request::new("https://cdn.example/a.mp4"), 1);
        let (task, rx) = DownloadTask::new(source, dest.clone(), fetcher.clone(), no_tools());

        assert_eq!(task.capabilities(), TaskCapabilities { pause: true, resume: true });
        task.start().await.unwrap();
        writer.write_all(b"abcd").await.unwrap();
        wait_for_bytes(&task, 4).await;
        task.pause().await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"abcd");

        task.resume().await.unwrap();
        let file = task.wait(rx, &CancellationToken::new(), |_| {}).await.unwrap();

        assert_eq!(tokio::fs::read(&file).await.unwrap(), b"abcdefgh");
        assert_eq!(*fetcher.offsets.lock().unwrap(), vec![0, 4]);
        drop(writer);
    }

    #[tokio::test]
    async fn test_cancel_deletes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.mp3");
        let (reader, mut writer) = tokio::io::duplex(1024);
        let (task, rx) = stream_task(reader, dest.clone(), 0);

        task.start().await.unwrap();
        writer.write_all(b"abcd").await.unwrap();
        wait_for_bytes(&task, 4).await;

        task.cancel().await;
        assert_eq!(task.state(), DownloadState::Cancelled);
        assert!(!dest.exists());

        // Terminal states refuse further work
        assert!(matches!(task.start().await, Err(EchoError::InvalidState(_))));
        assert!(matches!(task.resume().await, Err(EchoError::InvalidState(_))));
        task.cancel().await;

        let terminal = rx.wait_terminal(|_| {}).await;
        assert!(matches!(terminal, Some(Progress::Cancelled)));
    }

    #[tokio::test]
    async fn test_http_failure_reports_failed() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.mp4");
        let source = Source::progressive(Request::new("https://cdn.example/a.mp4"), 1);
        let (task, rx) = DownloadTask::new(source, dest.clone(), Arc::new(NoFetch), no_tools());

        task.start().await.unwrap();
        let err = task.wait(rx, &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, EchoError::UnexpectedStatus { status: 500, .. }));
        assert_eq!(task.state(), DownloadState::Failed);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_encrypted_source_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.mp4");
        let source = Source::Http {
            quality: 1,
            title: None,
            request: Request::new("https://cdn.example/a.mpd"),
            source_type: SourceType::Dash,
            decryption: Some(Decryption::Widevine {
                license_url: "https://license.example".to_string(),
                is_base64_request: false,
            }),
        };
        let (task, rx) = DownloadTask::new(source, dest.clone(), Arc::new(NoFetch), no_tools());

        let err = task.start().await.unwrap_err();
        assert!(matches!(err, EchoError::UnsupportedSource(_)));
        assert!(!dest.exists());
        assert!(matches!(
            rx.wait_terminal(|_| {}).await,
            Some(Progress::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_remux_task_has_no_pause() {
        let dir = tempfile::tempdir().unwrap();
        let source = Source::Http {
            quality: 1,
            title: None,
            request: Request::new("https://cdn.example/a.m3u8").with_header("Cookie", "a=b"),
            source_type: SourceType::Hls,
            decryption: None,
        };
        let (task, rx) = DownloadTask::new(
            source,
            dir.path().join("part.mp4"),
            Arc::new(NoFetch),
            no_tools(),
        );

        assert_eq!(task.capabilities(), TaskCapabilities { pause: false, resume: false });
        assert!(matches!(task.pause().await, Err(EchoError::Unsupported(_))));

        // Without ffmpeg the run fails
        task.start().await.unwrap();
        let err = task.wait(rx, &CancellationToken::new(), |_| {}).await.unwrap_err();
        assert!(matches!(err, EchoError::FfmpegNotFound));
    }

    #[tokio::test]
    async fn test_wait_cancels_on_token() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("part.mp3");
        let (reader, _writer) = tokio::io::duplex(1024);
        let (task, rx) = stream_task(reader, dest.clone(), 0);
        task.start().await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = task.wait(rx, &token, |_| {}).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(task.state(), DownloadState::Cancelled);
        assert!(!dest.exists());
    }
}
