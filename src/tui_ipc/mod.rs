//! Inter-process communication between the engine and viewer clients.
//!
//! This module provides:
//! - `protocol`: Shared types for serialization over Unix socket
//! - `engine_endpoint`: Engine-side broadcast server
//! - `tui_endpoint`: Viewer-side link that redials the engine

mod engine_endpoint;
mod protocol;
mod tui_endpoint;

pub use engine_endpoint::SocketServer;
pub use protocol::{socket_path, Command, Message, ViewerState};
pub use tui_endpoint::{connect_to_engine, EngineLink, Incoming};
