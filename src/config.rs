//! Command-line configuration of the engine.

use std::{path::PathBuf, time::Duration};

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};

/// What an axiom-dependent sentence means for forward progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AxiomPolicy {
    /// Highlight it and carry on.
    #[default]
    Annotate,
    /// Refuse to go past it, like an error.
    Block,
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub coqtop: String,
    pub coqtop_args: Vec<String>,
    /// How long a request may stay unanswered before a timeout is reported.
    pub timeout: Duration,
    pub axiom_policy: AxiomPolicy,
}

const DEFAULT_COQTOP_ARGS: [&str; 5] = ["-ideslave", "-main-channel", "stdfds", "-async-proofs", "on"];

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            coqtop: "coqtop".to_string(),
            coqtop_args: DEFAULT_COQTOP_ARGS.map(String::from).to_vec(),
            timeout: Duration::from_secs(10),
            axiom_policy: AxiomPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Prover executable
    #[arg(long, default_value = "coqtop")]
    pub coqtop: String,

    /// Argument passed to the prover (repeatable)
    #[arg(
        long = "coqtop-arg",
        allow_hyphen_values = true,
        default_values = DEFAULT_COQTOP_ARGS
    )]
    pub coqtop_args: Vec<String>,

    /// Milliseconds to wait for an answer before reporting a timeout
    #[arg(long, default_value_t = 10_000)]
    pub timeout_ms: u64,

    /// Milliseconds between feedback polls
    #[arg(long, default_value_t = 200)]
    pub poll_ms: u64,

    /// Whether axiom-dependent sentences block forward progress
    #[arg(long, value_enum, default_value_t)]
    pub axiom_policy: AxiomPolicy,

    /// Log file (defaults to the cache directory)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ServeArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            coqtop: self.coqtop.clone(),
            coqtop_args: self.coqtop_args.clone(),
            timeout: Duration::from_millis(self.timeout_ms),
            axiom_policy: self.axiom_policy,
        }
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_file.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("coq-tui/coq-tui.log")
        })
    }
}
