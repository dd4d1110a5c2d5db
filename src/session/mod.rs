//! Session registry and interactive command channel.
//!
//! This module tracks live device sessions and turns the raw character stream
//! of each session into discrete command→output transactions.
//!
//! # Main Components
//!
//! - [`SessionRegistry`] - Creates, looks up and removes device sessions
//! - [`DeviceSession`] - One live session with a dedicated command worker
//! - [`CompletionPolicy`] - Decides when a command's output has fully arrived
//! - [`InvokeResult`] - Per-session outcomes of one batch invocation

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, trace, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, Sender};
use tokio::sync::{RwLock, oneshot};

use crate::config;
use crate::device::{IGNORE_START_LINE, PromptMatcher};
use crate::error::ConnectError;
use crate::transport::{Credentials, ShellStream, Transport};

pub use channel::{
    CommandOutcome, InvokeResult, Targets, Transaction, TransactionState, normalize_command,
    split_lines,
};
pub use policy::{CompletionPolicy, PromptMatch};
pub use recording::{
    NormalizeOptions, SessionEvent, SessionRecordEntry, SessionRecordLevel, SessionRecorder,
};
pub use registry::{CreateReport, HostFailure, HostMatcher, RegistryOptions, RemoveReport};

/// Process-unique session identity.
///
/// Assigned monotonically by a [`SessionRegistry`] and never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Connected, setup command not yet completed.
    Initializing,
    /// Registered and accepting commands.
    Ready,
    /// Removed from the registry; never reused.
    Closed,
}

/// A live session to one device.
///
/// The shell stream itself is owned by the session's worker task; the session
/// keeps the queue feeding that worker, so every read and write for this
/// device goes through one place, one transaction at a time.
pub struct DeviceSession<T: Transport> {
    id: SessionId,
    host: String,
    handle: T::Handle,
    sender: Sender<CmdJob>,
    state: Mutex<LifecycleState>,
}

/// A command queued for a session worker.
pub struct CmdJob {
    /// Newline-normalized command text.
    pub command: String,
    pub policy: CompletionPolicy,
    /// Log the literal text before sending it.
    pub show_echo: bool,
    /// Oneshot channel sender for returning the collected lines
    pub responder: oneshot::Sender<Result<Vec<String>, ConnectError>>,
}

/// Registry of live device sessions.
///
/// Owns the transport used to open and close sessions. The session map is
/// guarded by one lock; transport work always happens outside of it.
pub struct SessionRegistry<T: Transport> {
    transport: Arc<T>,
    options: RegistryOptions,
    sessions: RwLock<BTreeMap<SessionId, Arc<DeviceSession<T>>>>,
    next_id: AtomicU64,
}

mod channel;
mod policy;
mod recording;
mod registry;
