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


use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use echo_downloader::audio::Remuxer;
use echo_downloader::client::{ClientConfig, DownloadClient};
use echo_downloader::download::{DownloadManager, PipelineEvent};
use echo_downloader::extension::{ExtensionRegistry, MusicExtension, TrackClient};
use echo_downloader::models::{
    render_lyrics, Album, Artist, DownloadContext, Lyrics, MediaItem, MediaServer, Request, Source,
    SourceType, Streamable, Track,
};
use echo_downloader::settings::{DestinationRoots, MapSettings, KEY_FOLDER, KEY_QUALITY};
use std::path::PathBuf;
use std::sync::Arc;

const CLI_EXTENSION_ID: &str = "echo-dl";

#[derive(Parser)]
#[command(name = "echo-dl")]
#[command(about = "Echo Downloader CLI - Desktop testing tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download, tag and file a single URL
    Fetch {
        /// Media URL
        url: String,
        #[arg(short, long)]
        title: String,
        /// Artist names, repeatable
        #[arg(short, long)]
        artist: Vec<String>,
        /// Album title; also names the destination subfolder
        #[arg(long)]
        album: Option<String>,
        /// Treat the URL as an HLS manifest (remuxed with ffmpeg)
        #[arg(long)]
        manifest: bool,
        /// Quality tier: 0 high, 1 medium, 2 low
        #[arg(short, long, default_value = "1")]
        quality: String,
        /// Destination folder kind: download, music or podcasts
        #[arg(short, long, default_value = "music")]
        folder: String,
        /// Base directory for the destination folders (default: user folders)
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },
    /// Print the probed container kind of a file
    Probe {
        file: PathBuf,
    },
    /// Print lyrics from a JSON document the way they are embedded in tags
    LyricsPreview {
        file: PathBuf,
    },
}

/// Extension serving exactly one URL
struct UrlExtension {
    url: String,
    manifest: bool,
}

#[async_trait]
impl TrackClient for UrlExtension {
    async fn load_server(
        &self,
        _track: &Track,
        streamable: &Streamable,
    ) -> echo_downloader::Result<MediaServer> {
        let source_type = if self.manifest {
            SourceType::Hls
        } else {
            SourceType::Progressive
        };
        Ok(MediaServer::new(vec![Source::Http {
            quality: streamable.quality,
            title: None,
            request: Request::new(&self.url),
            source_type,
            decryption: None,
        }]))
    }
}

impl MusicExtension for UrlExtension {
    fn id(&self) -> &str {
        CLI_EXTENSION_ID
    }

    fn name(&self) -> &str {
        "Command line"
    }

    fn track_client(&self) -> Option<&dyn TrackClient> {
        Some(self)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            url,
            title,
            artist,
            album,
            manifest,
            quality,
            folder,
            dest,
        } => {
            let settings = MapSettings::new();
            settings.set(KEY_QUALITY, quality);
            settings.set(KEY_FOLDER, folder);

            let mut config = ClientConfig::builder();
            if let Some(dest) = dest {
                config = config.roots(DestinationRoots::under(&dest));
            }
            let registry = ExtensionRegistry::new()
                .with_music(Arc::new(UrlExtension { url, manifest }));
            let client = DownloadClient::new(Arc::new(settings), registry, config.build()?)?;

            let mut track = Track::new("cli-track", title);
            track.artists = artist
                .iter()
                .enumerate()
                .map(|(i, name)| Artist::new(format!("cli-artist-{}", i), name))
                .collect();
            track.servers = vec![Streamable::new("url", 0)];

            let mut context = DownloadContext::new(CLI_EXTENSION_ID, track.clone());
            if let Some(album) = album {
                let album = Album::new("cli-album", album);
                track.album = Some(album.clone());
                context = DownloadContext::new(CLI_EXTENSION_ID, track)
                    .with_parent(MediaItem::Album(album), 0);
            }

            let manager = DownloadManager::new(Arc::new(client)).with_callback(Arc::new(
                |event: PipelineEvent| {
                    println!("[{}] {}", event.stage, event.progress.display_string());
                },
            ));

            let outcome = manager
                .run_batch(vec![context])
                .await
                .into_iter()
                .next()
                .context("no outcome for the track")?;
            let file = outcome.result?;
            println!("Saved to {}", file.display());
        }
        Commands::Probe { file } => {
            if !file.exists() {
                bail!("{} does not exist", file.display());
            }
            let remuxer = Remuxer::discover();
            let kind = remuxer.probe_container(&file).await;
            println!("{}", kind.extension());
        }
        Commands::LyricsPreview { file } => {
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let lyrics: Lyrics = serde_json::from_str(&json).context("parsing lyrics JSON")?;
            println!("{}", render_lyrics(Some(&lyrics.fill_gaps())));
        }
    }

    Ok(())
}
