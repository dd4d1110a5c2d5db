use super::*;
use super::channel::spawn_worker;
use std::sync::{MutexGuard, PoisonError};

/// Settings applied to every session a registry creates.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Sent once per new session before it is registered, typically to
    /// disable pagination. `None` skips setup.
    pub setup_command: Option<String>,
    /// How the setup command's completion is detected. Under prompt matching
    /// a new shell must also print its first prompt before setup starts.
    pub setup_policy: CompletionPolicy,
    /// Records lifecycle and command events of every session.
    pub recorder: Option<SessionRecorder>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            setup_command: Some(config::DEFAULT_SETUP_COMMAND.to_string()),
            setup_policy: CompletionPolicy::default(),
            recorder: None,
        }
    }
}

impl RegistryOptions {
    /// Options that register sessions without running a setup command.
    pub fn without_setup() -> Self {
        Self {
            setup_command: None,
            ..Self::default()
        }
    }

    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

/// A host that could not be turned into a registered session.
#[derive(Debug)]
pub struct HostFailure {
    pub host: String,
    pub error: ConnectError,
}

/// Outcome of [`SessionRegistry::create`].
pub struct CreateReport<T: Transport> {
    /// Registered sessions, in the order their hosts were given.
    pub sessions: Vec<Arc<DeviceSession<T>>>,
    /// Hosts that failed, in the order they were given.
    pub failures: Vec<HostFailure>,
}

impl<T: Transport> CreateReport<T> {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Hosts to retry.
    pub fn failed_hosts(&self) -> Vec<String> {
        self.failures.iter().map(|f| f.host.clone()).collect()
    }
}

impl<T: Transport> fmt::Debug for CreateReport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateReport")
            .field("sessions", &self.sessions)
            .field("failures", &self.failures)
            .finish()
    }
}

/// Outcome of a removal.
#[derive(Debug, Default)]
pub struct RemoveReport {
    /// Sessions deleted from the registry, in identity order.
    pub removed: Vec<SessionId>,
    /// Sessions whose transport did not close cleanly. They are removed anyway.
    pub close_failures: Vec<(SessionId, ConnectError)>,
}

impl RemoveReport {
    pub fn is_clean(&self) -> bool {
        self.close_failures.is_empty()
    }
}

/// Host name matcher used by name lookups.
///
/// Compiles a glob pattern, falling back to literal matching on invalid
/// patterns. Globs ignore ASCII case, since host names do. Exact matchers
/// compare whole strings as given.
#[derive(Debug, Clone)]
pub enum HostMatcher {
    Glob(glob::Pattern),
    Exact(String),
}

impl HostMatcher {
    pub fn new(pattern: &str, exact: bool) -> Self {
        if exact {
            return HostMatcher::Exact(pattern.to_string());
        }
        let compiled = glob::Pattern::new(pattern)
            .or_else(|_| glob::Pattern::new(&glob::Pattern::escape(pattern)));
        match compiled {
            Ok(glob) => HostMatcher::Glob(glob),
            Err(_) => HostMatcher::Exact(pattern.to_string()),
        }
    }

    pub fn is_match(&self, host: &str) -> bool {
        match self {
            HostMatcher::Glob(pattern) => pattern.matches_with(host, GLOB_OPTIONS),
            HostMatcher::Exact(name) => name == host,
        }
    }
}

const GLOB_OPTIONS: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

fn lock_state(state: &Mutex<LifecycleState>) -> MutexGuard<'_, LifecycleState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> DeviceSession<T> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Host address exactly as it was given to [`SessionRegistry::create`].
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn handle(&self) -> &T::Handle {
        &self.handle
    }

    pub fn state(&self) -> LifecycleState {
        *lock_state(&self.state)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == LifecycleState::Ready
    }

    fn mark_ready(&self) -> bool {
        let mut state = lock_state(&self.state);
        if *state != LifecycleState::Initializing {
            return false;
        }
        *state = LifecycleState::Ready;
        true
    }

    /// Closed is final; returns false if the session was already closed.
    fn mark_closed(&self) -> bool {
        let mut state = lock_state(&self.state);
        if *state == LifecycleState::Closed {
            return false;
        }
        *state = LifecycleState::Closed;
        true
    }
}

impl<T: Transport> fmt::Debug for DeviceSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> SessionRegistry<T> {
    /// Creates an empty registry that runs the default setup command.
    pub fn new(transport: T) -> Self {
        Self::with_options(transport, RegistryOptions::default())
    }

    pub fn with_options(transport: T, options: RegistryOptions) -> Self {
        Self {
            transport: Arc::new(transport),
            options,
            sessions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// Opens one session per host and registers the ones that come up.
    ///
    /// Hosts are handled concurrently and independently: a host that fails to
    /// connect, open its shell or complete the setup command is reported in
    /// [`CreateReport::failures`] and never aborts the others. Identities are
    /// allocated in host order before any connection starts, so a failed host
    /// leaves a gap in the sequence.
    pub async fn create<I, S>(&self, hosts: I, credentials: &Credentials) -> CreateReport<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tasks = Vec::new();
        for host in hosts {
            let host = host.into();
            let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            let transport = self.transport.clone();
            let credentials = credentials.clone();
            let options = self.options.clone();
            let task_host = host.clone();
            let handle = tokio::spawn(async move {
                open_session(transport.as_ref(), id, task_host, &credentials, &options).await
            });
            tasks.push((host, handle));
        }

        let mut report = CreateReport {
            sessions: Vec::new(),
            failures: Vec::new(),
        };
        for (host, task) in tasks {
            let result = task.await.unwrap_or_else(|e| {
                Err(ConnectError::InternalServerError(format!(
                    "session task for {host} failed: {e}"
                )))
            });
            match result {
                Ok(session) => {
                    self.sessions
                        .write()
                        .await
                        .insert(session.id(), session.clone());
                    report.sessions.push(session);
                }
                Err(error) => {
                    warn!("Failed to create session for {host}: {error}");
                    if let Some(recorder) = &self.options.recorder {
                        let _ = recorder.record_event(SessionEvent::ConnectFailed {
                            host: host.clone(),
                            reason: error.to_string(),
                        });
                    }
                    report.failures.push(HostFailure { host, error });
                }
            }
        }

        info!(
            "Created {} session(s), {} host(s) failed",
            report.sessions.len(),
            report.failures.len()
        );
        report
    }

    /// Sessions with the given identities, in identity order.
    pub async fn lookup_by_ids<I>(&self, ids: I) -> Vec<Arc<DeviceSession<T>>>
    where
        I: IntoIterator<Item = SessionId>,
    {
        let wanted = ids.into_iter().collect::<HashSet<_>>();
        self.sessions
            .read()
            .await
            .iter()
            .filter(|(id, _)| wanted.contains(id))
            .map(|(_, session)| session.clone())
            .collect()
    }

    /// Sessions whose host matches, pattern by pattern.
    ///
    /// A session matched by several patterns appears once per pattern.
    pub async fn lookup_by_name<S: AsRef<str>>(
        &self,
        patterns: &[S],
        exact: bool,
    ) -> Vec<Arc<DeviceSession<T>>> {
        let sessions = self.sessions.read().await;
        let mut found = Vec::new();
        for pattern in patterns {
            let matcher = HostMatcher::new(pattern.as_ref(), exact);
            found.extend(
                sessions
                    .values()
                    .filter(|session| matcher.is_match(session.host()))
                    .cloned(),
            );
        }
        found
    }

    pub async fn get(&self, id: SessionId) -> Option<Arc<DeviceSession<T>>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Snapshot of every registered session, in identity order.
    pub async fn sessions(&self) -> Vec<Arc<DeviceSession<T>>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Removes the given sessions and closes their transports.
    ///
    /// Sessions that are not registered (unknown or already removed) are skipped.
    pub async fn remove(&self, sessions: &[Arc<DeviceSession<T>>]) -> RemoveReport {
        self.remove_ids(sessions.iter().map(|s| s.id())).await
    }

    /// Removes sessions by identity and closes their transports.
    ///
    /// Every matched session leaves the registry and becomes closed before
    /// its transport is touched; a failed close is reported, never retried.
    pub async fn remove_ids<I>(&self, ids: I) -> RemoveReport
    where
        I: IntoIterator<Item = SessionId>,
    {
        let detached = {
            let mut sessions = self.sessions.write().await;
            let mut detached = Vec::new();
            for id in ids {
                if let Some(session) = sessions.remove(&id) {
                    session.mark_closed();
                    detached.push(session);
                }
            }
            detached
        };

        let mut report = RemoveReport::default();
        for session in detached {
            let close = self.transport.close(session.handle()).await;
            if let Some(recorder) = &self.options.recorder {
                let _ = recorder.record_event(SessionEvent::SessionClosed {
                    session_id: session.id(),
                    host: session.host().to_string(),
                    close_error: close.as_ref().err().map(ToString::to_string),
                });
            }
            match close {
                Ok(()) => debug!("Closed session {} to {}", session.id(), session.host()),
                Err(err) => {
                    warn!(
                        "Closing session {} to {} failed: {err}",
                        session.id(),
                        session.host()
                    );
                    report.close_failures.push((session.id(), err));
                }
            }
            report.removed.push(session.id());
        }
        report.removed.sort();
        report
    }

    /// Removes and closes every registered session.
    pub async fn remove_all(&self) -> RemoveReport {
        let ids = self.sessions.read().await.keys().copied().collect::<Vec<_>>();
        self.remove_ids(ids).await
    }
}

/// Connects, opens the shell, waits for the login prompt, starts the worker
/// and runs the setup command.
///
/// On any failure after connecting, the transport is closed best-effort.
async fn open_session<T: Transport>(
    transport: &T,
    id: SessionId,
    host: String,
    credentials: &Credentials,
    options: &RegistryOptions,
) -> Result<Arc<DeviceSession<T>>, ConnectError> {
    debug!("Connecting to {host} as {}", credentials.username);
    let handle = transport.connect(&host, credentials).await?;

    let mut stream = match transport.open_interactive_channel(&handle).await {
        Ok(stream) => stream,
        Err(err) => {
            close_quietly(transport, &handle, &host).await;
            return Err(err);
        }
    };

    if let Err(err) = options.setup_policy.await_ready(&mut stream).await {
        warn!("{host} never showed a prompt after login: {err}");
        close_quietly(transport, &handle, &host).await;
        return Err(err);
    }
    if let Some(recorder) = &options.recorder {
        let _ = recorder.record_event(SessionEvent::SessionOpened {
            session_id: id,
            host: host.clone(),
        });
    }

    let sender = spawn_worker(id, host.clone(), stream, options.recorder.clone());
    let session = Arc::new(DeviceSession {
        id,
        host,
        handle,
        sender,
        state: Mutex::new(LifecycleState::Initializing),
    });

    if let Some(setup) = &options.setup_command {
        trace!("Running setup command {:?} on {}", setup, session.host);
        if let Err(err) = session.execute(setup, &options.setup_policy, false).await {
            session.mark_closed();
            let close = transport.close(&session.handle).await;
            if let Some(recorder) = &options.recorder {
                let _ = recorder.record_event(SessionEvent::SessionClosed {
                    session_id: id,
                    host: session.host.clone(),
                    close_error: close.as_ref().err().map(ToString::to_string),
                });
            }
            if let Err(close_err) = close {
                debug!("Ignoring close failure for {}: {close_err}", session.host);
            }
            return Err(err);
        }
    }

    session.mark_ready();
    debug!("Session {} to {} is ready", id, session.host);
    Ok(session)
}

async fn close_quietly<T: Transport>(transport: &T, handle: &T::Handle, host: &str) {
    if let Err(err) = transport.close(handle).await {
        debug!("Ignoring close failure for {host}: {err}");
    }
}
