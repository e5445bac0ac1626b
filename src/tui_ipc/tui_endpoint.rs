//! Viewer side of the engine socket.
//!
//! The engine may start after the viewer, restart, or go away for good; the
//! link keeps dialing and tells the viewer each time the engine is lost so
//! stale goals are not left on screen.

use std::{path::PathBuf, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{unix::OwnedWriteHalf, UnixStream},
    sync::mpsc,
    time::sleep,
};
use tracing::debug;

use super::protocol::{Command, Message};
use crate::error::Result;

const REDIAL_DELAY: Duration = Duration::from_secs(1);

/// What the viewer hears from the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message(Message),
    /// The engine closed the socket; the link is dialing again.
    EngineLost,
}

/// Both directions of the viewer's connection to the engine.
pub struct EngineLink {
    pub incoming: mpsc::Receiver<Incoming>,
    pub commands: mpsc::Sender<Command>,
}

/// Why one connection ended.
enum Hangup {
    Engine,
    Viewer,
}

/// Dial the engine socket at `path` in the background.
pub fn connect_to_engine(path: PathBuf) -> EngineLink {
    let (incoming_tx, incoming) = mpsc::channel(16);
    let (commands, commands_rx) = mpsc::channel(16);
    tokio::spawn(keep_dialing(path, incoming_tx, commands_rx));
    EngineLink { incoming, commands }
}

async fn keep_dialing(
    path: PathBuf,
    incoming: mpsc::Sender<Incoming>,
    mut commands: mpsc::Receiver<Command>,
) {
    loop {
        let Ok(stream) = UnixStream::connect(&path).await else {
            sleep(REDIAL_DELAY).await;
            continue;
        };
        debug!("Connected to engine at {}", path.display());
        match relay(stream, &incoming, &mut commands).await {
            Hangup::Viewer => return,
            Hangup::Engine => {
                if incoming.send(Incoming::EngineLost).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn relay(
    stream: UnixStream,
    incoming: &mpsc::Sender<Incoming>,
    commands: &mut mpsc::Receiver<Command>,
) -> Hangup {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else {
                    return Hangup::Engine;
                };
                match serde_json::from_str::<Message>(&line) {
                    Ok(msg) => {
                        if incoming.send(Incoming::Message(msg)).await.is_err() {
                            return Hangup::Viewer;
                        }
                    }
                    Err(e) => debug!("Ignoring engine line {line:?}: {e}"),
                }
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    return Hangup::Viewer;
                };
                if write_command(&mut writer, command).await.is_err() {
                    return Hangup::Engine;
                }
            }
        }
    }
}

async fn write_command(writer: &mut OwnedWriteHalf, command: Command) -> Result<()> {
    let mut line = serde_json::to_string(&command)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}
