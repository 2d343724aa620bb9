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


//! Byte transfer with resume support
//!
//! # Key Features
//! - Copies any `AsyncRead` into a file, appending or truncating
//! - 256 KiB chunks
//! - Throughput samples at most once per second
//! - Cooperative cancellation between chunks (reads are cancel safe, so no
//!   byte is read without being written)
//! - Idle timeout so a stalled connection fails instead of hanging
//!
//! # Resume Mechanism
//! 1. Read the destination's current length L
//! 2. Send `Range: bytes=L-` with the original request headers
//! 3. Total size = L + response content length
//! 4. Append the response body to the destination
//!
//! Pausing is just stopping the copy; bytes `[0, L)` are never fetched again.

use crate::download::progress::{Progress, ProgressSender, ThroughputSampler};
use crate::error::{EchoError, Result};
use crate::models::Request;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::debug;
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

/// Copy buffer size
pub const TRANSFER_BUFFER_SIZE: usize = 256 * 1024;

/// Default time a read may stall before the transfer fails
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How a transfer ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Source exhausted; the file is complete
    Finished(PathBuf),
    /// Stopped by cancellation; the file holds what was received so far
    Interrupted,
}

/// Cancellation, progress and byte counter shared with the owner of a transfer
#[derive(Clone)]
pub struct TransferControl {
    pub cancel: CancellationToken,
    pub progress: Option<ProgressSender>,
    /// Cumulative bytes in the destination, including bytes from earlier runs
    pub received: Arc<AtomicU64>,
    pub idle_timeout: Option<Duration>,
}

impl TransferControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            progress: None,
            received: Arc::new(AtomicU64::new(0)),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSender) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_counter(mut self, received: Arc<AtomicU64>) -> Self {
        self.received = received;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn emit(&self, progress: Progress) {
        if let Some(sender) = &self.progress {
            sender.send(progress);
        }
    }
}

/// Copy `source` into `destination`.
///
/// Emits `Initialized` and periodic `InProgress` events but never a terminal
/// one; the caller decides how the run ends. I/O errors propagate and the
/// caller owns cleanup of the partial file.
pub async fn transfer<R>(
    destination: &Path,
    source: &mut R,
    total_bytes: Option<u64>,
    append: bool,
    control: &TransferControl,
) -> Result<TransferOutcome>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut file = if append {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(destination)
            .await
    } else {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(destination)
            .await
    }
    .map_err(|e| EchoError::FileIoError(format!("open: {} - {}", destination.display(), e)))?;

    let start = if append { file.metadata().await?.len() } else { 0 };
    control.received.store(start, Ordering::SeqCst);
    control.emit(Progress::Initialized { total: total_bytes });

    let mut sampler = ThroughputSampler::new(start);
    let mut buffer = vec![0u8; TRANSFER_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            biased;
            _ = control.cancel.cancelled() => {
                file.flush().await?;
                return Ok(TransferOutcome::Interrupted);
            }
            read = read_chunk(source, &mut buffer, control.idle_timeout) => read?,
        };

        if read == 0 {
            break;
        }

        file.write_all(&buffer[..read]).await.map_err(|e| {
            EchoError::FileIoError(format!("write: {} - {}", destination.display(), e))
        })?;

        let received = control.received.fetch_add(read as u64, Ordering::SeqCst) + read as u64;
        if let Some(speed) = sampler.sample(received) {
            control.emit(Progress::InProgress {
                received,
                speed: Some(speed),
            });
        }
    }

    file.flush().await?;
    Ok(TransferOutcome::Finished(destination.to_path_buf()))
}

async fn read_chunk<R>(source: &mut R, buffer: &mut [u8], idle: Option<Duration>) -> Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match idle {
        Some(limit) => match tokio::time::timeout(limit, source.read(buffer)).await {
            Ok(read) => Ok(read?),
            Err(_) => Err(EchoError::network_error(
                format!("no data received for {}s", limit.as_secs()),
                true,
            )),
        },
        None => Ok(source.read(buffer).await?),
    }
}

/// Response of a fetch: body plus its length when the server declared one
pub struct FetchResponse {
    pub content_length: Option<u64>,
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

/// Fetch primitive: GET with headers starting at a byte offset
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request, offset: u64) -> Result<FetchResponse>;
}

/// reqwest-backed [`Fetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request, offset: u64) -> Result<FetchResponse> {
        let url = url::Url::parse(&request.url)
            .map_err(|e| EchoError::DownloadFailed(format!("invalid URL {}: {}", request.url, e)))?;

        let mut builder = self.client.get(url);
        for (key, value) in &request.headers {
            if !key.eq_ignore_ascii_case("range") {
                builder = builder.header(key.as_str(), value.as_str());
            }
        }
        builder = builder.header(RANGE, format!("bytes={}-", offset));

        let response = builder.send().await.map_err(|e| {
            EchoError::network_error(
                format!("request to {} failed: {}", request.url, e),
                e.is_timeout() || e.is_connect(),
            )
        })?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::OK if offset == 0 => {}
            StatusCode::OK => {
                return Err(EchoError::DownloadFailed(
                    "Server does not support range requests".to_string(),
                ));
            }
            // Nothing left past the offset: the previous run already got everything
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                return Ok(FetchResponse {
                    content_length: Some(0),
                    body: Box::new(tokio::io::empty()),
                });
            }
            status => {
                return Err(EchoError::UnexpectedStatus {
                    status: status.as_u16(),
                    url: request.url.clone(),
                });
            }
        }

        let content_length = response.content_length();
        let stream = Box::pin(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );
        Ok(FetchResponse {
            content_length,
            body: Box::new(StreamReader::new(stream)),
        })
    }
}

/// Download `request` into `destination`, continuing from its current length
/// when `append` is set.
pub async fn download_http(
    fetcher: &dyn Fetcher,
    request: &Request,
    destination: &Path,
    append: bool,
    control: &TransferControl,
) -> Result<TransferOutcome> {
    let existing = if append {
        match tokio::fs::metadata(destination).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        }
    } else {
        0
    };

    debug!("fetching {} from byte {}", request.url, existing);
    let mut response = tokio::select! {
        biased;
        _ = control.cancel.cancelled() => return Ok(TransferOutcome::Interrupted),
        response = fetcher.fetch(request, existing) => response?,
    };
    let total = response.content_length.map(|len| existing + len);

    let outcome = transfer(destination, &mut response.body, total, append, control).await?;

    if let (TransferOutcome::Finished(path), Some(total)) = (&outcome, total) {
        let written = tokio::fs::metadata(path).await?.len();
        if written < total {
            return Err(EchoError::DownloadFailed(format!(
                "Download incomplete: {}/{} bytes",
                written, total
            )));
        }
    }

    Ok(outcome)
}
