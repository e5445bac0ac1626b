//! Coqtop child process and the tasks pumping its standard streams.

use std::{
    fs::{self, File, OpenOptions},
    io,
    process::Stdio,
    result::Result as StdResult,
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    process::{Child, Command},
    runtime::Handle,
    sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::{Call, CoqtopCodec, Inbound, Transport};
use crate::error::{EngineError, Result};

/// How long coqtop gets to honor `Quit` before it is killed.
const QUIT_GRACE: Duration = Duration::from_secs(1);

type Delivery = StdResult<Inbound, EngineError>;

/// Connection to one coqtop process.
///
/// A writer task serializes calls onto the prover's stdin and a reader task
/// decodes its stdout into frames, so neither direction blocks the session.
pub struct ProverChannel {
    outgoing: Option<UnboundedSender<Call>>,
    incoming: UnboundedReceiver<Delivery>,
    reader: JoinHandle<()>,
    child: Option<Child>,
    closed: bool,
}

/// Open the file coqtop's stderr is appended to, if the cache dir is usable.
fn prover_log_file() -> Option<File> {
    let dir = dirs::cache_dir()?.join("coq-tui");
    fs::create_dir_all(&dir).ok()?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("coqtop.log"))
        .ok()
}

impl ProverChannel {
    /// Start `program` with `args` and connect to its standard streams.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let stderr = prover_log_file().map_or_else(Stdio::null, Stdio::from);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("Failed to capture coqtop stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("Failed to capture coqtop stdout"))?;

        info!("Spawned {program} {} (pid {:?})", args.join(" "), child.id());
        let mut channel = Self::from_io(stdout, stdin);
        channel.child = Some(child);
        Ok(channel)
    }

    /// Connect to an already running prover through any pair of byte streams.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (call_tx, call_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_calls(
            call_rx,
            FramedWrite::new(writer, CoqtopCodec),
            frame_tx.clone(),
        ));
        let reader = tokio::spawn(read_frames(FramedRead::new(reader, CoqtopCodec), frame_tx));

        Self {
            outgoing: Some(call_tx),
            incoming: frame_rx,
            reader,
            child: None,
            closed: false,
        }
    }
}

async fn write_calls<W>(
    mut calls: UnboundedReceiver<Call>,
    mut sink: FramedWrite<W, CoqtopCodec>,
    frames: UnboundedSender<Delivery>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(call) = calls.recv().await {
        if let Err(e) = sink.send(call).await {
            let e = EngineError::from(e);
            warn!("Failed to write to coqtop: {e}");
            let _ = frames.send(Err(e));
            return;
        }
    }
    debug!("Call queue closed, writer stopping");
}

async fn read_frames<R>(mut stream: FramedRead<R, CoqtopCodec>, frames: UnboundedSender<Delivery>)
where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(inbound) => {
                if frames.send(Ok(inbound)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let e = EngineError::from(e);
                warn!("Stopped reading from coqtop: {e}");
                let _ = frames.send(Err(e));
                return;
            }
        }
    }
    info!("coqtop closed its output");
    let _ = frames.send(Err(EngineError::ChannelClosed));
}

impl Transport for ProverChannel {
    fn send(&mut self, call: Call) -> StdResult<(), EngineError> {
        if self.closed {
            return Err(EngineError::ChannelClosed);
        }
        self.outgoing
            .as_ref()
            .ok_or(EngineError::ChannelClosed)?
            .send(call)
            .map_err(|_| EngineError::ChannelClosed)
    }

    fn try_recv(&mut self) -> StdResult<Option<Inbound>, EngineError> {
        if self.closed {
            return Err(EngineError::ChannelClosed);
        }
        match self.incoming.try_recv() {
            Ok(Ok(inbound)) => Ok(Some(inbound)),
            Ok(Err(e)) => {
                self.closed = true;
                Err(e)
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                Err(EngineError::ChannelClosed)
            }
        }
    }

    fn close(&mut self) {
        if self.closed && self.outgoing.is_none() {
            return;
        }
        self.closed = true;
        // Dropping the sender lets the writer flush what is queued, then stop.
        self.outgoing = None;
        self.reader.abort();

        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(handle) = Handle::try_current() {
            handle.spawn(async move {
                if timeout(QUIT_GRACE, child.wait()).await.is_err() {
                    debug!("coqtop ignored Quit, killing it");
                    let _ = child.kill().await;
                }
            });
        } else if let Err(e) = child.start_kill() {
            warn!("Failed to kill coqtop: {e}");
        }
    }
}

impl Drop for ProverChannel {
    fn drop(&mut self) {
        self.close();
    }
}
