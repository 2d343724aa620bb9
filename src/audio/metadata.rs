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


//! Metadata writing
//!
//! # Tag Fields
//! - Track number (position in the parent list, 0 if unknown)
//! - Title and album, sanitized
//! - Artist and album artist, comma-joined
//! - Year, flattened lyrics text
//! - Front cover from a temporary image file
//!
//! # Strategies
//! - [`TagLibrary`]: structured tags written in place (mp3, audio-only m4a).
//!   Refuses MP4 files carrying a video track with `EchoError::VideoContent`.
//! - [`Remuxer::inject_metadata`]: ffmpeg stream copy with `-metadata` pairs
//!   and the cover attached as an extra MJPEG stream, written to a temporary
//!   file that then replaces the original.

use crate::audio::ffmpeg::{FfmpegCommand, Remuxer};
use crate::error::{EchoError, Result};
use crate::file::paths::sanitize;
use crate::models::{Album, DownloadContext};
use async_trait::async_trait;
use lofty::config::WriteOptions;
use lofty::picture::{Picture, PictureType};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::Tag;
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Values written into a media file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFields {
    pub track_number: u32,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    pub year: Option<i32>,
    /// Flattened lyrics, empty when there are none
    pub lyrics: String,
}

impl TagFields {
    /// Build the fields for a track. `album` is the resolved album, when one
    /// could be loaded.
    pub fn for_context(context: &DownloadContext, album: Option<&Album>, lyrics: String) -> Self {
        let track = &context.track;
        let album_title = album
            .map(|a| a.title.as_str())
            .or_else(|| track.album.as_ref().map(|a| a.title.as_str()))
            .unwrap_or_default();

        Self {
            track_number: context.sort_order.unwrap_or(0),
            title: sanitize(&track.title),
            artist: track.artist_names(),
            album: sanitize(album_title),
            album_artist: album.map(Album::artist_names).unwrap_or_default(),
            year: track.release_year.or_else(|| album.and_then(|a| a.release_year)),
            lyrics,
        }
    }
}

/// Structured tag writer
#[async_trait]
pub trait TagLibrary: Send + Sync {
    /// Write `fields` into `file` in place, replacing any embedded artwork
    /// with `cover` when one is given.
    async fn write(&self, file: &Path, fields: &TagFields, cover: Option<&Path>) -> Result<()>;
}

/// [`TagLibrary`] backed by lofty
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyTagLibrary;

#[async_trait]
impl TagLibrary for LoftyTagLibrary {
    async fn write(&self, file: &Path, fields: &TagFields, cover: Option<&Path>) -> Result<()> {
        let file = file.to_path_buf();
        let fields = fields.clone();
        let cover = cover.map(Path::to_path_buf);

        tokio::task::spawn_blocking(move || write_tags_blocking(&file, &fields, cover.as_deref()))
            .await
            .map_err(|e| EchoError::Internal(format!("Tag writer task failed: {}", e)))?
    }
}

fn write_tags_blocking(path: &Path, fields: &TagFields, cover: Option<&Path>) -> Result<()> {
    if has_mp4_video_track(path)? {
        return Err(EchoError::VideoContent(path.display().to_string()));
    }

    let mut tagged_file = Probe::open(path)
        .map_err(|e| tag_error(path, e))?
        .guess_file_type()
        .map_err(|e| tag_error(path, e))?
        .read()
        .map_err(|e| tag_error(path, e))?;

    if tagged_file.primary_tag_mut().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged_file
        .primary_tag_mut()
        .ok_or_else(|| EchoError::TagWriteFailed(format!("no writable tag: {}", path.display())))?;

    tag.set_track(fields.track_number);
    tag.set_title(fields.title.clone());
    tag.set_artist(fields.artist.clone());
    tag.set_album(fields.album.clone());
    tag.insert_text(ItemKey::AlbumArtist, fields.album_artist.clone());
    if let Some(year) = fields.year.and_then(|y| u32::try_from(y).ok()) {
        tag.set_year(year);
    }
    tag.insert_text(ItemKey::Lyrics, fields.lyrics.clone());

    if let Some(cover) = cover {
        let mut reader = BufReader::new(File::open(cover).map_err(|e| {
            EchoError::FileIoError(format!("open cover: {} - {}", cover.display(), e))
        })?);
        let mut picture = Picture::from_reader(&mut reader).map_err(|e| tag_error(cover, e))?;
        picture.set_pic_type(PictureType::CoverFront);

        while !tag.pictures().is_empty() {
            tag.remove_picture(0);
        }
        tag.push_picture(picture);
    }

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| tag_error(path, e))?;

    debug!("tags written to {}", path.display());
    Ok(())
}

fn tag_error(path: &Path, e: impl std::fmt::Display) -> EchoError {
    EchoError::TagWriteFailed(format!("{} - {}", path.display(), e))
}

/// ISO BMFF containers that may hold a `hdlr` box
const MP4_CONTAINER_BOXES: &[&[u8; 4]] = &[b"moov", b"trak", b"mdia"];

/// True when `path` is an MP4-family file with a video handler track.
/// Anything that is not ISO BMFF reports false.
pub fn has_mp4_video_track(path: &Path) -> Result<bool> {
    let mut file = File::open(path)
        .map_err(|e| EchoError::FileIoError(format!("open: {} - {}", path.display(), e)))?;
    let len = file.metadata()?.len();

    match read_box_header(&mut file, 0, len)? {
        Some((kind, _, _)) if &kind == b"ftyp" => {}
        _ => return Ok(false),
    }
    Ok(scan_boxes(&mut file, 0, len, 0)?)
}

fn scan_boxes<R: Read + Seek>(reader: &mut R, start: u64, end: u64, depth: usize) -> std::io::Result<bool> {
    let mut offset = start;
    while offset < end {
        let Some((kind, header_len, box_len)) = read_box_header(reader, offset, end)? else {
            return Ok(false);
        };

        if &kind == b"hdlr" && box_len >= header_len + 12 {
            // version/flags (4) + pre_defined (4) + handler_type (4)
            reader.seek(SeekFrom::Start(offset + header_len + 8))?;
            let mut handler = [0u8; 4];
            reader.read_exact(&mut handler)?;
            if &handler == b"vide" {
                return Ok(true);
            }
        } else if depth < 4 && MP4_CONTAINER_BOXES.contains(&&kind) {
            if scan_boxes(reader, offset + header_len, offset + box_len, depth + 1)? {
                return Ok(true);
            }
        }

        offset += box_len;
    }
    Ok(false)
}

/// Returns (type, header length, total box length) of the box at `offset`
fn read_box_header<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    end: u64,
) -> std::io::Result<Option<([u8; 4], u64, u64)>> {
    if end.saturating_sub(offset) < 8 {
        return Ok(None);
    }
    reader.seek(SeekFrom::Start(offset))?;
    let mut header = [0u8; 8];
    reader.read_exact(&mut header)?;

    let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
    let kind = [header[4], header[5], header[6], header[7]];

    let (header_len, box_len) = match size {
        0 => (8, end - offset),
        1 => {
            let mut large = [0u8; 8];
            reader.read_exact(&mut large)?;
            (16, u64::from_be_bytes(large))
        }
        n => (8, n),
    };

    let fits = offset.checked_add(box_len).map_or(false, |box_end| box_end <= end);
    if box_len < header_len || !fits {
        return Ok(None);
    }
    Ok(Some((kind, header_len, box_len)))
}

/// Build the ffmpeg argument list for metadata injection.
///
/// Video outputs map every input stream and re-encode only the cover stream
/// (`v:1`); audio outputs get the cover as an `attached_pic`.
pub fn injection_command(
    media: &Path,
    cover: Option<&Path>,
    fields: &TagFields,
    video: bool,
    output: &Path,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new().input(media);
    if let Some(cover) = cover {
        cmd = cmd.input(cover);
    }

    cmd = match (cover.is_some(), video) {
        (true, true) => cmd
            .args(["-map", "0", "-map", "1", "-c", "copy", "-c:v:1", "mjpeg"]),
        (true, false) => cmd.args(["-c", "copy", "-c:v", "mjpeg"]),
        (false, _) => cmd.args(["-map", "0", "-c", "copy"]),
    };

    cmd = cmd
        .metadata("track", fields.track_number.to_string())
        .metadata("title", &fields.title)
        .metadata("artist", &fields.artist)
        .metadata("album", &fields.album)
        .metadata(
            "year",
            fields.year.map(|y| y.to_string()).unwrap_or_default(),
        )
        .metadata("albumartist", &fields.album_artist)
        .metadata("lyrics", fields.lyrics.replace('"', "'"));

    if cover.is_some() {
        let stream = if video { "s:v:1" } else { "s:v" };
        cmd = cmd
            .stream_metadata(stream, "title", "Album cover")
            .stream_metadata(stream, "comment", "Cover (front)");
        cmd = if video {
            cmd.args(["-f", "mp4"])
        } else {
            cmd.args(["-disposition:v", "attached_pic"])
        };
    } else if video {
        cmd = cmd.args(["-f", "mp4"]);
    }

    cmd.overwrite().output(output)
}

/// `temp_<name>` beside `file`
pub fn injection_temp_path(file: &Path) -> Result<PathBuf> {
    let name = file
        .file_name()
        .ok_or_else(|| EchoError::InvalidPath(file.display().to_string()))?;
    let mut temp_name = std::ffi::OsString::from("temp_");
    temp_name.push(name);
    Ok(file.with_file_name(temp_name))
}

impl Remuxer {
    /// Rewrite `file` with `fields` and `cover` through ffmpeg, replacing it
    /// in place.
    pub async fn inject_metadata(
        &self,
        file: &Path,
        fields: &TagFields,
        cover: Option<&Path>,
        video: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let temp = injection_temp_path(file)?;
        let cmd = injection_command(file, cover, fields, video, &temp);

        if let Err(e) = self.run_quiet(&cmd, cancel).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }

        tokio::fs::remove_file(file)
            .await
            .map_err(|e| EchoError::FileIoError(format!("remove: {} - {}", file.display(), e)))?;
        tokio::fs::rename(&temp, file).await.map_err(|e| {
            EchoError::FileIoError(format!("rename: {} - {}", temp.display(), e))
        })?;

        info!("metadata injected into {}", file.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Artist, MediaItem, Track};

    fn fields() -> TagFields {
        TagFields {
            track_number: 3,
            title: "Song".to_string(),
            artist: "A, B".to_string(),
            album: "Album".to_string(),
            album_artist: "A".to_string(),
            year: Some(2020),
            lyrics: "say \"hi\"".to_string(),
        }
    }

    fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    fn mp4_with_handler(handler: &[u8; 4]) -> Vec<u8> {
        let mut hdlr = vec![0u8; 8];
        hdlr.extend_from_slice(handler);
        hdlr.extend_from_slice(&[0u8; 13]);
        let mdia = mp4_box(b"mdia", &mp4_box(b"hdlr", &hdlr));
        let trak = mp4_box(b"trak", &mdia);
        let moov = mp4_box(b"moov", &trak);

        let mut file = mp4_box(b"ftyp", b"isom\0\0\0\0");
        file.extend(moov);
        file
    }

    #[test]
    fn test_fields_for_context() {
        let mut track = Track::new("t1", "Rock/Pop: Best?");
        track.artists = vec![Artist::new("a", "One"), Artist::new("b", "Two")];
        track.album = Some(Album::new("al", "Stub"));

        let mut album = Album::new("al", "Full: Album");
        album.artists = vec![Artist::new("a", "One")];
        album.release_year = Some(1999);

        let context = DownloadContext::new("ext", track)
            .with_parent(MediaItem::Album(album.clone()), 4);
        let fields = TagFields::for_context(&context, Some(&album), String::new());

        assert_eq!(fields.track_number, 4);
        assert_eq!(fields.title, "Rock_Pop_ Best_");
        assert_eq!(fields.artist, "One, Two");
        assert_eq!(fields.album, "Full_ Album");
        assert_eq!(fields.album_artist, "One");
        assert_eq!(fields.year, Some(1999));
    }

    #[test]
    fn test_fields_without_album() {
        let context = DownloadContext::new("ext", Track::new("t1", "Song"));
        let fields = TagFields::for_context(&context, None, "la".to_string());
        assert_eq!(fields.track_number, 0);
        assert_eq!(fields.album, "");
        assert_eq!(fields.album_artist, "");
        assert_eq!(fields.lyrics, "la");
    }

    #[test]
    fn test_audio_injection_command() {
        let args = injection_command(
            Path::new("/w/a.m4a"),
            Some(Path::new("/w/cover.jpeg")),
            &fields(),
            false,
            Path::new("/w/temp_a.m4a"),
        )
        .to_strings();

        assert_eq!(
            args,
            vec![
                "-i", "/w/a.m4a", "-i", "/w/cover.jpeg", "-c", "copy", "-c:v", "mjpeg",
                "-metadata", "track=3", "-metadata", "title=Song", "-metadata", "artist=A, B",
                "-metadata", "album=Album", "-metadata", "year=2020",
                "-metadata", "albumartist=A", "-metadata", "lyrics=say 'hi'",
                "-metadata:s:v", "title=Album cover", "-metadata:s:v", "comment=Cover (front)",
                "-disposition:v", "attached_pic", "-y", "/w/temp_a.m4a",
            ]
        );
    }

    #[test]
    fn test_video_injection_command_maps_cover_stream() {
        let args = injection_command(
            Path::new("/w/a.mp4"),
            Some(Path::new("/w/cover.jpeg")),
            &fields(),
            true,
            Path::new("/w/temp_a.mp4"),
        )
        .to_strings();

        assert_eq!(&args[4..12], &["-map", "0", "-map", "1", "-c", "copy", "-c:v:1", "mjpeg"]);
        assert!(args.windows(2).any(|w| w == ["-metadata:s:v:1", "title=Album cover"]));
        assert!(args.windows(2).any(|w| w == ["-f", "mp4"]));
        assert!(!args.iter().any(|a| a == "attached_pic"));
    }

    #[test]
    fn test_injection_without_cover_has_single_input() {
        let args = injection_command(
            Path::new("/w/a.flac"),
            None,
            &fields(),
            false,
            Path::new("/w/temp_a.flac"),
        )
        .to_strings();
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert!(!args.iter().any(|a| a.starts_with("-metadata:s:v")));
    }

    #[test]
    fn test_injection_temp_path() {
        assert_eq!(
            injection_temp_path(Path::new("/w/Song.flac")).unwrap(),
            PathBuf::from("/w/temp_Song.flac")
        );
    }

    #[test]
    fn test_video_track_detection() {
        let dir = tempfile::tempdir().unwrap();

        let video = dir.path().join("video.m4a");
        std::fs::write(&video, mp4_with_handler(b"vide")).unwrap();
        assert!(has_mp4_video_track(&video).unwrap());

        let audio = dir.path().join("audio.m4a");
        std::fs::write(&audio, mp4_with_handler(b"soun")).unwrap();
        assert!(!has_mp4_video_track(&audio).unwrap());

        let mp3 = dir.path().join("song.mp3");
        std::fs::write(&mp3, b"ID3\x04\0\0\0\0\0\0").unwrap();
        assert!(!has_mp4_video_track(&mp3).unwrap());
    }

    #[test]
    fn test_oversized_box_stops_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.m4a");

        let mut data = mp4_box(b"ftyp", b"isom\0\0\0\0");
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&(u64::MAX - 8).to_be_bytes());
        data.extend_from_slice(&[0u8; 16]);
        std::fs::write(&path, data).unwrap();

        assert!(!has_mp4_video_track(&path).unwrap());
    }

    #[tokio::test]
    async fn test_lofty_rejects_video() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("video.m4a");
        std::fs::write(&video, mp4_with_handler(b"vide")).unwrap();

        let err = LoftyTagLibrary.write(&video, &fields(), None).await.unwrap_err();
        assert!(err.is_video_content());
    }
}
