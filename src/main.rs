use std::{
    fs::{self, OpenOptions},
    io,
    path::Path,
    process,
    sync::Mutex,
};

use clap::{Parser, Subcommand};
use coq_tui::{config::ServeArgs, serve, tui};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coq-tui")]
#[command(about = "Coq session engine for editors, with a TUI goal viewer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine, reading editor commands on stdin
    Serve(ServeArgs),
    /// Run the TUI viewer (connects to a running engine)
    View,
}

fn init_logging(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let log_file = OpenOptions::new().create(true).append(true).open(path)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coq_tui=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .with_target(false)
        .pretty()
        .init();
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Only the engine logs; the viewer owns the terminal.
    if let Commands::Serve(args) = &cli.command {
        if let Err(e) = init_logging(&args.log_file()) {
            eprintln!("Cannot open log file: {e}");
        }
    }

    let result = match cli.command {
        Commands::Serve(args) => serve::run(args).await,
        Commands::View => tui::run().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
