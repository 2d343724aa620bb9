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


//! Error types for Echo Downloader
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by the pipeline stage that raises them (download, remux
//! tool, tagging, files, extensions, configuration).
//!
//! ## Recovery Rules
//!
//! Not every error ends a pipeline run. The stages recover locally from:
//! - Probe failures (the container kind degrades to `mp3`)
//! - Album, lyrics and cover provider failures (fall back to embedded or absent data)
//! - `VideoContent` from the structured tag path (retried once through the remux path)
//! - Name collisions while renaming (a counter suffix is tried instead)
//!
//! Everything else is surfaced as the track's `Failed` terminal event.

use thiserror::Error;

/// Result type alias using our EchoError type
pub type Result<T> = std::result::Result<T, EchoError>;

/// Main error type for Echo Downloader
#[derive(Error, Debug)]
pub enum EchoError {
    // ===== Download Errors =====

    /// Generic download failure
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// Network failure while talking to a media host
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        /// Whether retrying later may succeed
        is_transient: bool,
    },

    /// Server answered with a status the transfer cannot use
    #[error("Unexpected HTTP status {status} for {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Source needs decryption, which this crate does not implement
    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    /// Nothing to choose from when selecting a server or source
    #[error("No candidates available: {0}")]
    NoCandidates(String),

    // ===== Remux Tool Errors =====

    /// FFmpeg/FFprobe executable could not be started
    #[error("FFmpeg not found. Please install FFmpeg or configure its path")]
    FfmpegNotFound,

    /// FFmpeg exited with a non-success status
    #[error("FFmpeg failed: {message}")]
    FfmpegError {
        message: String,
        /// Captured tool output for diagnostics
        output: String,
    },

    // ===== Tagging Errors =====

    /// The structured tag writer refused the file because it carries video
    #[error("Video file detected: {0}")]
    VideoContent(String),

    /// Writing tags failed for a reason other than video content
    #[error("Failed to write tags: {0}")]
    TagWriteFailed(String),

    // ===== File Errors =====

    /// File not found at expected path
    #[error("File not found: {0}")]
    FileNotFound(String),

    /// File I/O error with context
    #[error("File I/O error: {0}")]
    FileIoError(String),

    /// Invalid file path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // ===== Extension Errors =====

    /// No extension registered under the given id
    #[error("Extension not found: {0}")]
    ExtensionNotFound(String),

    /// Extension exists but lacks the requested capability
    #[error("{extension} Extension does not support {capability}")]
    NotSupported {
        extension: String,
        capability: String,
    },

    /// A provider call returned an error
    #[error("Provider failed: {0}")]
    ProviderFailed(String),

    // ===== Configuration Errors =====

    /// A setting has a value outside its allowed range or format
    #[error("Invalid setting {key}: {value}")]
    InvalidSetting { key: String, value: String },

    // ===== General Errors =====

    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Operation not offered by this task (see its capability descriptor)
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// Internal error that should not happen
    #[error("Internal error: {0}")]
    Internal(String),

    // ===== External Error Conversions =====

    /// HTTP client error
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EchoError {
    /// Create a network error
    pub fn network_error(message: impl Into<String>, is_transient: bool) -> Self {
        Self::NetworkError {
            message: message.into(),
            is_transient,
        }
    }

    /// Create a capability mismatch error
    pub fn not_supported(extension: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::NotSupported {
            extension: extension.into(),
            capability: capability.into(),
        }
    }

    /// Create an ffmpeg failure carrying the captured output
    pub fn ffmpeg(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FfmpegError {
            message: message.into(),
            output: output.into(),
        }
    }

    /// Check if this error might succeed on retry
    pub fn is_retryable(&self) -> bool {
        match self {
            EchoError::NetworkError { is_transient, .. } => *is_transient,
            EchoError::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            EchoError::Http(e) => e.is_timeout() || e.is_connect(),
            EchoError::DownloadFailed(_) => true,
            _ => false,
        }
    }

    /// Check if this is a file system error
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            EchoError::FileNotFound(_)
                | EchoError::FileIoError(_)
                | EchoError::InvalidPath(_)
                | EchoError::Io(_)
        )
    }

    /// Check if this error represents a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EchoError::Cancelled)
    }

    /// Check if the structured tag path rejected the file as video
    pub fn is_video_content(&self) -> bool {
        matches!(self, EchoError::VideoContent(_))
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            EchoError::FfmpegNotFound => {
                "FFmpeg is required but not found. Please install FFmpeg and ensure it's in your PATH.".to_string()
            }
            EchoError::UnsupportedSource(_) => {
                "This track is protected and cannot be downloaded.".to_string()
            }
            EchoError::NoCandidates(what) => {
                format!("No {} available for this track.", what)
            }
            EchoError::NotSupported { extension, capability } => {
                format!("{} does not support {}.", extension, capability)
            }
            EchoError::Cancelled => "Download was cancelled.".to_string(),
            EchoError::FfmpegError { message, .. } => {
                format!("Media processing failed: {}", message)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EchoError::network_error("reset", true).is_retryable());
        assert!(!EchoError::network_error("dns", false).is_retryable());
        assert!(EchoError::UnexpectedStatus { status: 503, url: "u".into() }.is_retryable());
        assert!(!EchoError::UnexpectedStatus { status: 404, url: "u".into() }.is_retryable());
        assert!(!EchoError::UnsupportedSource("widevine".into()).is_retryable());
    }

    #[test]
    fn test_video_content_message() {
        let err = EchoError::VideoContent("clip.m4a".into());
        assert!(err.is_video_content());
        assert!(err.to_string().contains("Video file"));
    }

    #[test]
    fn test_not_supported_message() {
        let err = EchoError::not_supported("Spotify", "AlbumClient");
        assert_eq!(err.to_string(), "Spotify Extension does not support AlbumClient");
    }

    #[test]
    fn test_file_error_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(EchoError::from(io).is_file_error());
        assert!(!EchoError::Cancelled.is_file_error());
    }
}
