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


//! FFmpeg process execution
//!
//! # Command Construction
//! Commands are argument lists built with [`FfmpegCommand`], never shell
//! strings, so titles and lyrics need no quoting.
//!
//! # Output Parsing
//! FFmpeg runs with `-progress pipe:2`, so stderr carries both the normal log
//! and newline-terminated `key=value` progress blocks:
//! - Log lines go to the log callback and are kept for error reports
//! - `out_time_us` / `bitrate` blocks become [`StatTick`]s
//! - `Duration: HH:MM:SS.ff` is picked up by [`DurationScanner`]
//!
//! # Cancellation
//! Cancelling the token kills the child process; the run returns
//! `EchoError::Cancelled`.

use crate::error::{EchoError, Result};
use crate::settings::ToolPaths;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Captured output kept for failure reports
const MAX_CAPTURED_OUTPUT: usize = 32 * 1024;

lazy_static! {
    static ref DURATION_REGEX: Regex = Regex::new(r"(\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap();
}

/// Keys written by `-progress`
const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

/// Argument list for one ffmpeg invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FfmpegCommand {
    args: Vec<OsString>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `-i <path>`
    pub fn input(self, path: impl AsRef<OsStr>) -> Self {
        self.arg("-i").arg(path.as_ref())
    }

    /// `-metadata key=value`
    pub fn metadata(self, key: &str, value: impl AsRef<str>) -> Self {
        self.arg("-metadata")
            .arg(format!("{}={}", key, value.as_ref()))
    }

    /// `-metadata:<stream> key=value`
    pub fn stream_metadata(self, stream: &str, key: &str, value: impl AsRef<str>) -> Self {
        self.arg(format!("-metadata:{}", stream))
            .arg(format!("{}={}", key, value.as_ref()))
    }

    /// `-y`, overwrite the output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    pub fn output(self, path: impl AsRef<OsStr>) -> Self {
        self.arg(path.as_ref())
    }

    pub fn as_args(&self) -> &[OsString] {
        &self.args
    }

    /// Arguments as lossy strings, for logs and assertions
    pub fn to_strings(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }
}

/// Periodic statistics from a running ffmpeg
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatTick {
    /// Media time processed so far
    pub time_ms: u64,
    /// Current output bitrate, when ffmpeg knows it
    pub bitrate_kbps: Option<f64>,
}

/// Wrapper around the ffmpeg and ffprobe executables
#[derive(Debug, Clone)]
pub struct Remuxer {
    tools: ToolPaths,
}

impl Remuxer {
    pub fn new(tools: ToolPaths) -> Self {
        Self { tools }
    }

    /// Locate ffmpeg/ffprobe on PATH
    pub fn discover() -> Self {
        Self::new(ToolPaths::discover())
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    /// Run a command to completion, ignoring its output
    pub async fn run_quiet(&self, command: &FfmpegCommand, cancel: &CancellationToken) -> Result<()> {
        self.run(command, cancel, |_| {}, |_| {}).await
    }

    /// Run ffmpeg with `command`.
    ///
    /// Every log line is passed to `on_log`; progress blocks are turned into
    /// stat ticks for `on_stat`. A non-success exit becomes
    /// `EchoError::FfmpegError` carrying the captured log.
    pub async fn run<L, S>(
        &self,
        command: &FfmpegCommand,
        cancel: &CancellationToken,
        mut on_log: L,
        mut on_stat: S,
    ) -> Result<()>
    where
        L: FnMut(&str) + Send,
        S: FnMut(StatTick) + Send,
    {
        debug!("ffmpeg {}", command.to_strings().join(" "));

        let mut child = Command::new(&self.tools.ffmpeg)
            .args(["-hide_banner", "-nostdin", "-nostats", "-progress", "pipe:2"])
            .args(command.as_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error("ffmpeg", e))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EchoError::ffmpeg("Failed to capture ffmpeg stderr", ""))?;
        let mut segments = BufReader::new(stderr).split(b'\n');

        let mut captured = CapturedOutput::default();
        let mut stats = StatParser::default();

        loop {
            let segment = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(EchoError::Cancelled);
                }
                segment = segments.next_segment() => segment?,
            };

            let Some(bytes) = segment else {
                break;
            };
            let text = String::from_utf8_lossy(&bytes);
            let line = text.trim_end_matches('\r');

            if StatParser::is_progress_line(line) {
                if let Some(tick) = stats.feed(line) {
                    on_stat(tick);
                }
            } else {
                captured.push(line);
                on_log(line);
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(EchoError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if !status.success() {
            return Err(EchoError::ffmpeg(
                format!("ffmpeg exited with {}", status),
                captured.into_string(),
            ));
        }

        Ok(())
    }
}

pub(crate) fn spawn_error(tool: &str, e: std::io::Error) -> EchoError {
    if e.kind() == std::io::ErrorKind::NotFound {
        EchoError::FfmpegNotFound
    } else {
        EchoError::ffmpeg(format!("Failed to execute {}: {}", tool, e), "")
    }
}

/// Tail of the tool's log, bounded in size
#[derive(Default)]
struct CapturedOutput {
    text: String,
}

impl CapturedOutput {
    fn push(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');
        if self.text.len() > MAX_CAPTURED_OUTPUT {
            let mut cut = self.text.len() - MAX_CAPTURED_OUTPUT;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }

    fn into_string(self) -> String {
        self.text
    }
}

/// Accumulates `-progress` key/value blocks
#[derive(Debug, Default)]
struct StatParser {
    time_ms: Option<u64>,
    bitrate_kbps: Option<f64>,
}

impl StatParser {
    fn is_progress_line(line: &str) -> bool {
        line.split_once('=')
            .map(|(key, _)| PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"))
            .unwrap_or(false)
    }

    /// Feed one progress line; a `progress=` line closes the block
    fn feed(&mut self, line: &str) -> Option<StatTick> {
        let (key, value) = line.split_once('=')?;
        let value = value.trim();
        match key {
            // Both keys are microseconds
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.time_ms = Some(us / 1000);
                }
                None
            }
            "bitrate" => {
                self.bitrate_kbps = value.trim_end_matches("kbits/s").trim().parse().ok();
                None
            }
            "progress" => Some(StatTick {
                time_ms: self.time_ms.take()?,
                bitrate_kbps: self.bitrate_kbps.take(),
            }),
            _ => None,
        }
    }
}

/// Finds the media duration in ffmpeg's log.
///
/// The value is read from the text after the `Duration:` marker, or from the
/// next line when the marker stands alone.
#[derive(Debug, Default)]
pub struct DurationScanner {
    armed: bool,
}

impl DurationScanner {
    pub fn feed(&mut self, line: &str) -> Option<u64> {
        if self.armed {
            self.armed = false;
            if let Some(ms) = parse_duration(line) {
                return Some(ms);
            }
        }
        if let Some(index) = line.find("Duration:") {
            let rest = &line[index + "Duration:".len()..];
            match parse_duration(rest) {
                Some(ms) => return Some(ms),
                None => self.armed = true,
            }
        }
        None
    }
}

/// Parse the first `HH:MM:SS.ff` in `text` into milliseconds
pub fn parse_duration(text: &str) -> Option<u64> {
    let caps = DURATION_REGEX.captures(text)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    let hours = field(1)?;
    let minutes = field(2)?;
    let seconds = field(3)?;
    let hundredths = field(4)?;
    Some((hours * 3600 + minutes * 60 + seconds) * 1000 + hundredths * 10)
}

/// Format milliseconds as `HH:MM:SS.ff`, hundredths truncated
pub fn format_duration(ms: u64) -> String {
    let total_seconds = ms / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let hundredths = (ms % 1000) / 10;
    format!("{:02}:{:02}:{:02}.{:02}", hours, minutes, seconds, hundredths)
}
