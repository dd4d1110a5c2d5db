//! # swpool - Session Pool for Network Switches
//!
//! `swpool` keeps a pool of interactive shell sessions to network switches and
//! runs commands on them. Switch shells offer no request/response framing: a
//! command goes in as typed text and comes back as whatever the terminal
//! would show, echo and prompt included. This crate turns that character
//! stream into discrete command→output transactions, across many devices at
//! once.
//!
//! ## Features
//!
//! - **Session Registry**: Creates, looks up (by identity or host pattern) and removes sessions
//! - **Per-Session Workers**: One task per session owns its shell, so commands never interleave
//! - **Batch Invocation**: Runs one command on many sessions concurrently and gathers per-session outcomes
//! - **Completion Detection**: Fixed delay, or prompt matching with pagination handling and a hard timeout
//! - **Maximum Compatibility**: Supports a wide range of SSH algorithms for compatibility with legacy devices
//! - **Session Recording**: Optional JSONL recording of lifecycle and command events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use swpool::session::{CompletionPolicy, SessionRegistry, Targets};
//! use swpool::transport::{Credentials, SshTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = SessionRegistry::new(SshTransport::default());
//!     let credentials = Credentials::new("admin", "password");
//!
//!     let report = registry.create(["10.0.0.1", "10.0.0.2"], &credentials).await;
//!     for failure in &report.failures {
//!         eprintln!("{}: {}", failure.host, failure.error);
//!     }
//!
//!     let result = registry
//!         .invoke(
//!             &Targets::names(["10.0.0.*"]),
//!             "show version",
//!             &CompletionPolicy::fixed_delay(Duration::from_secs(2)),
//!             true,
//!         )
//!         .await;
//!     for (id, outcome) in result.iter() {
//!         println!("{} {}: {:?}", id, result.host(id).unwrap_or("?"), outcome.lines());
//!     }
//!
//!     registry.remove_all().await;
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::SessionRegistry`] - Owns the live sessions and runs commands on them
//! - [`session::CompletionPolicy`] - Decides when a command's output is complete
//! - [`transport::Transport`] - Connection contract, implemented over SSH by [`transport::SshTransport`]
//! - [`templates`] - Built-in prompt profiles for common switch families
//! - [`error::ConnectError`] - Error types for connection and command failures
//! - [`config`] - SSH configuration constants and crate defaults

pub mod config;
pub mod device;
pub mod error;
pub mod mock;
pub mod session;
pub mod templates;
pub mod transport;
