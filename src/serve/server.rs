use std::{future, time::Duration};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{
    protocol::{EditorCommand, EngineEvent},
    workspace::{Flow, Workspace},
};
use crate::{
    coqtop::Transport,
    error::Result,
    tui_ipc::{Command, Message, SocketServer},
};

/// Broadcast side of the viewer socket.
pub struct Viewers {
    pub server: SocketServer,
    pub commands: mpsc::Receiver<Command>,
}

async fn next_viewer_command(viewers: &mut Option<Viewers>) -> Option<Command> {
    match viewers {
        Some(viewers) => viewers.commands.recv().await,
        None => future::pending().await,
    }
}

fn handle_line<T: Transport>(workspace: &mut Workspace<T>, line: &str) -> Flow {
    if line.trim().is_empty() {
        return Flow::Continue;
    }
    match serde_json::from_str::<EditorCommand>(line) {
        Ok(command) => {
            debug!("Editor command: {command:?}");
            workspace.handle(command)
        }
        Err(e) => {
            warn!("Malformed editor command {line:?}: {e}");
            workspace.report_malformed(&e.to_string());
            Flow::Continue
        }
    }
}

async fn write_events<W: AsyncWrite + Unpin>(output: &mut W, events: Vec<EngineEvent>) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    for event in events {
        let json = serde_json::to_string(&event)?;
        output.write_all(format!("{json}\n").as_bytes()).await?;
    }
    output.flush().await?;
    Ok(())
}

/// Send the changed viewer state, then any command failures.
fn publish_to_viewers<T: Transport>(
    viewers: &Viewers,
    workspace: &mut Workspace<T>,
    events: &[EngineEvent],
) {
    if let Some(message) = workspace.take_viewer_update() {
        viewers.server.send(message);
    }
    for event in events {
        if let EngineEvent::Error { message } = event {
            viewers.server.send(Message::Error {
                error: message.clone(),
            });
        }
    }
}

/// Read editor commands from `input` until it closes or asks to shut down,
/// polling every session each `poll` interval.
pub async fn serve<R, W, T>(
    input: R,
    mut output: W,
    workspace: &mut Workspace<T>,
    mut viewers: Option<Viewers>,
    poll: Duration,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    T: Transport,
{
    let mut lines = input.lines();
    let mut ticker = interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let flow = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => handle_line(workspace, &line),
                None => {
                    info!("Editor closed the connection");
                    workspace.shutdown();
                    Flow::Shutdown
                }
            },
            Some(command) = next_viewer_command(&mut viewers) => {
                debug!("Viewer command: {command:?}");
                workspace.handle_viewer(command);
                Flow::Continue
            }
            _ = ticker.tick() => {
                workspace.process_feedbacks();
                Flow::Continue
            }
        };

        let events = workspace.take_events();
        if let Some(viewers) = &viewers {
            publish_to_viewers(viewers, workspace, &events);
        }
        write_events(&mut output, events).await?;
        if flow == Flow::Shutdown {
            info!("Shutting down");
            return Ok(());
        }
    }
}
