//! Engine-side endpoint for Unix socket communication with viewers.
//!
//! This module runs in the `serve` process and handles:
//! - Broadcasting the focused document's state to connected viewers
//! - Forwarding visibility commands from viewers to the workspace

use std::{fs, path::PathBuf};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
    sync::{broadcast, mpsc, watch},
};
use tracing::{debug, error, info, warn};

use super::protocol::{Command, Message};

/// Unix socket server that broadcasts messages to viewers.
/// Immutable after creation - all state is in channels.
pub struct SocketServer {
    msg_sender: broadcast::Sender<Message>,
    /// Replayed to viewers that connect after it was broadcast.
    latest: watch::Sender<Option<Message>>,
}

impl Default for SocketServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketServer {
    pub fn new() -> Self {
        let (msg_sender, _) = broadcast::channel(16);
        let (latest, _) = watch::channel(None);
        Self { msg_sender, latest }
    }

    /// Start listening at `path`.
    /// Returns a receiver for commands from viewers.
    pub fn start_listener(&self, path: PathBuf) -> mpsc::Receiver<Command> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(16);
        let msg_sender = self.msg_sender.clone();
        let latest = self.latest.clone();

        tokio::spawn(async move {
            run_listener(path, msg_sender, latest, cmd_tx).await;
        });

        cmd_rx
    }

    /// Broadcast a message to all connected viewers. Errors are not replayed
    /// to viewers that connect later.
    pub fn send(&self, msg: Message) {
        if !matches!(msg, Message::Error { .. }) {
            self.latest.send_replace(Some(msg.clone()));
        }
        if self.msg_sender.send(msg).is_err() {
            debug!("No viewers connected to receive broadcast");
        }
    }
}

async fn run_listener(
    path: PathBuf,
    msg_sender: broadcast::Sender<Message>,
    latest: watch::Sender<Option<Message>>,
    cmd_tx: mpsc::Sender<Command>,
) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }

    // A previous engine may have left its socket behind.
    if path.exists() {
        let _ = fs::remove_file(&path);
    }

    let listener = match UnixListener::bind(&path) {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind socket at {}: {e}", path.display());
            return;
        }
    };

    info!("Listening on {}", path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let msg_rx = msg_sender.subscribe();
                let replay = latest.borrow().clone();
                tokio::spawn(handle_client(stream, msg_rx, replay, cmd_tx.clone()));
            }
            Err(e) => error!("Accept error: {e}"),
        }
    }
}

async fn write_message(
    writer: &mut (impl AsyncWriteExt + Unpin),
    msg: &Message,
) -> Result<(), ()> {
    let json = match serde_json::to_string(msg) {
        Ok(j) => j,
        Err(e) => {
            warn!("Failed to serialize message: {e}");
            return Ok(());
        }
    };
    writer
        .write_all(format!("{json}\n").as_bytes())
        .await
        .map_err(|_| ())
}

async fn handle_client(
    stream: UnixStream,
    mut msg_rx: broadcast::Receiver<Message>,
    replay: Option<Message>,
    cmd_tx: mpsc::Sender<Command>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    if write_message(&mut writer, &Message::Connected).await.is_err() {
        return;
    }
    if let Some(msg) = replay {
        if write_message(&mut writer, &msg).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg_result = msg_rx.recv() => {
                let msg = match msg_result {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Viewer lagged behind by {n} messages");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if write_message(&mut writer, &msg).await.is_err() {
                    break;
                }
            }
            line_result = lines.next_line() => {
                match line_result {
                    Ok(Some(line)) => match serde_json::from_str::<Command>(&line) {
                        Ok(cmd) => {
                            if cmd_tx.send(cmd).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring viewer command {line:?}: {e}"),
                    },
                    Ok(None) | Err(_) => break,
                }
            }
        }
    }
}
