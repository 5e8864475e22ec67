//! Room relay node
//!
//! Joins one room as hub or spoke using a static peer list, streams the
//! local microphone and camera, and plays back and logs what arrives.
//! Lines typed on stdin are sent as chat; `/file <path>`, `/mute`,
//! `/unmute`, `/camera on|off`, `/stats` and `/quit` are commands.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use room_relay::{
    audio::{default_microphone, default_output, list_devices},
    config::AppConfig,
    directory::{PeerEndpoint, StaticDirectory},
    session::{RoomKind, SessionConfig, SessionEvent, StreamSession},
    video::{default_camera, list_cameras, SharedCamera},
};

/// One node's view of the room, loaded from TOML
#[derive(Debug, Deserialize)]
struct NodeConfig {
    local_id: String,
    room_id: String,
    hub_id: String,
    #[serde(default)]
    kind: RoomKind,
    /// Where received files are written
    #[serde(default = "default_download_dir")]
    download_dir: PathBuf,
    #[serde(default)]
    app: AppConfig,
    peers: Vec<PeerEndpoint>,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("received")
}

impl NodeConfig {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: NodeConfig = toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.app.validate()?;
        if !config.peers.iter().any(|p| p.user_id == config.local_id) {
            bail!("{} is not listed in peers", config.local_id);
        }
        Ok(config)
    }
}

fn print_devices() {
    println!("\n=== Audio Devices ===");
    for device in list_devices() {
        let direction = if device.is_input { "Input" } else { "Output" };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, direction, default_marker);
    }
    println!("\n=== Cameras ===");
    for camera in list_cameras() {
        println!("  [{}] {}", camera.index, camera.name);
    }
    println!();
}

async fn handle_event(event: SessionEvent, download_dir: &Path) {
    match event {
        SessionEvent::VideoFrame {
            sender_id,
            timestamp_ms,
            image,
        } => {
            tracing::trace!("Frame from {} at {} ({}x{})", sender_id, timestamp_ms, image.width(), image.height());
        }
        SessionEvent::LocalPreview { .. } => {}
        SessionEvent::ChatText { sender_id, text } => {
            println!("<{}> {}", sender_id, text);
        }
        SessionEvent::FileReceived {
            sender_id,
            file_name,
            data,
        } => {
            // Never trust a remote path
            let Some(name) = Path::new(&file_name).file_name() else {
                tracing::warn!("Rejected file with unusable name {:?} from {}", file_name, sender_id);
                return;
            };
            let path = download_dir.join(name);
            let written = async {
                tokio::fs::create_dir_all(download_dir).await?;
                tokio::fs::write(&path, &data).await
            };
            match written.await {
                Ok(()) => println!("* {} sent {} ({} bytes) -> {}", sender_id, file_name, data.len(), path.display()),
                Err(e) => tracing::error!("Failed to save {}: {}", path.display(), e),
            }
        }
        SessionEvent::HubDeparted { hub_id } => {
            tracing::warn!("Hub {} left the room; nothing will be relayed until it returns", hub_id);
        }
    }
}

/// Returns false when the node should exit
async fn handle_command(session: &StreamSession, line: &str) -> Result<bool> {
    let line = line.trim();
    match line.split_once(' ').unwrap_or((line, "")) {
        ("", _) => {}
        ("/quit", _) => return Ok(false),
        ("/mute", _) => session.set_microphone_mute(true),
        ("/unmute", _) => session.set_microphone_mute(false),
        ("/camera", arg) => {
            let active = session.set_camera_active(arg.trim() != "off").await;
            println!("* camera {}", if active { "on" } else { "off" });
        }
        ("/stats", _) => println!("{}", serde_json::to_string_pretty(&session.stats())?),
        ("/file", path) => {
            let path = Path::new(path.trim());
            let data = tokio::fs::read(path).await.with_context(|| format!("reading {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "file".to_string());
            let messages = session.send_file(&name, &data).await?;
            println!("* sent {} in {} messages", name, messages);
        }
        _ => {
            session.send_chat_text(line).await?;
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: relay-node <node.toml>");
    };
    let node = NodeConfig::load(Path::new(&path))?;
    tracing::info!("Starting room relay node {} in room {}", node.local_id, node.room_id);

    print_devices();

    let directory = Arc::new(StaticDirectory::with_room(&node.room_id, node.peers.clone()));
    let camera = SharedCamera::new(default_camera(), node.app.video.clone(), node.app.session.stop_timeout());
    let session = StreamSession::builder(
        SessionConfig::new(node.local_id.clone(), node.room_id.clone(), node.hub_id.clone(), node.kind),
        directory,
    )
    .app_config(node.app.clone())
    .microphone(default_microphone())
    .camera(camera)
    .audio_output(default_output())
    .build();

    let (tx, mut events) = mpsc::channel(node.app.session.event_capacity);
    session.start(None, tx).await?;
    tracing::info!("Joined as {:?}, press Ctrl+C or type /quit to leave", session.role());

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stats_ticker = tokio::time::interval(Duration::from_secs(30));
    stats_ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = events.recv() => handle_event(event, &node.download_dir).await,
            line = stdin.next_line() => match line? {
                Some(line) => match handle_command(&session, &line).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => tracing::warn!("{:#}", e),
                },
                None => break,
            },
            _ = stats_ticker.tick() => {
                tracing::info!("Stats: {}", serde_json::to_string(&session.stats())?);
            }
        }
    }

    tracing::info!("Leaving room {}", node.room_id);
    session.stop().await;
    Ok(())
}
