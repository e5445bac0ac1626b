//! Drive Coq's XML IDE protocol on behalf of a text editor.
//!
//! The editor talks to [`serve`] over JSON lines; each document gets a
//! [`session::Session`] bound to its own coqtop. The [`tui`] viewer shows
//! the goals and messages of whichever document has focus.

pub mod config;
pub mod coqtop;
pub mod document;
pub mod error;
pub mod sentence;
pub mod serve;
pub mod session;
pub mod text;
pub mod tui;
pub mod tui_ipc;
