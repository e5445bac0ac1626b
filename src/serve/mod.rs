//! The `serve` surface: editor commands on stdin, events on stdout, and the
//! focused document's state broadcast to viewers.

pub mod protocol;
mod server;
mod workspace;

use tokio::io::{stdin, stdout, BufReader};

pub use protocol::{EditRange, EditorCommand, EditorEvent, EngineEvent};
pub use server::{serve, Viewers};
pub use workspace::{Connector, Flow, Workspace};

use crate::{
    config::{ServeArgs, SessionConfig},
    coqtop::ProverChannel,
    error::Result,
    tui_ipc::{socket_path, SocketServer},
};

pub async fn run(args: ServeArgs) -> Result<()> {
    let connect: Connector<ProverChannel> = Box::new(|config: &SessionConfig| {
        ProverChannel::spawn(&config.coqtop, &config.coqtop_args)
    });
    let mut workspace = Workspace::new(args.session_config(), connect);

    let server = SocketServer::new();
    let commands = server.start_listener(socket_path());
    let viewers = Viewers { server, commands };

    serve(
        BufReader::new(stdin()),
        stdout(),
        &mut workspace,
        Some(viewers),
        args.poll_interval(),
    )
    .await
}
