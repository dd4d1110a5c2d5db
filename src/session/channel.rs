use super::*;
use tokio::sync::mpsc::error::TrySendError;

type JobReceiver = oneshot::Receiver<Result<Vec<String>, ConnectError>>;

/// Session selection for one invocation.
///
/// Every variant is resolved against the registry's membership at call time;
/// identities or names that resolve to nothing are dropped silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    /// Sessions by identity. Also what explicit session objects resolve to.
    Ids(Vec<SessionId>),
    /// Sessions whose host matches any pattern (glob, or plain equality when `exact`).
    Names { patterns: Vec<String>, exact: bool },
    /// Every registered session.
    All,
}

impl Targets {
    pub fn sessions<T: Transport>(sessions: &[Arc<DeviceSession<T>>]) -> Self {
        Targets::Ids(sessions.iter().map(|s| s.id()).collect())
    }

    pub fn names<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Targets::Names {
            patterns: patterns.into_iter().map(Into::into).collect(),
            exact: false,
        }
    }

    pub fn exact_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Targets::Names {
            patterns: names.into_iter().map(Into::into).collect(),
            exact: true,
        }
    }
}

impl From<Vec<SessionId>> for Targets {
    fn from(ids: Vec<SessionId>) -> Self {
        Targets::Ids(ids)
    }
}

/// Progress of one command against one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Pending,
    Sent,
    Collecting,
    Completed,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionState::Completed | TransactionState::Failed)
    }

    fn can_advance_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Failed)
                | (Sent, Collecting)
                | (Sent, Failed)
                | (Collecting, Completed)
                | (Collecting, Failed)
        )
    }
}

/// One command execution against one session, from write to completion.
#[derive(Debug, Clone)]
pub struct Transaction {
    session: SessionId,
    command: String,
    state: TransactionState,
}

impl Transaction {
    pub fn new(session: SessionId, command: impl Into<String>) -> Self {
        Self {
            session,
            command: command.into(),
            state: TransactionState::Pending,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Moves to `next` if the transition is legal. Terminal states are final.
    pub fn advance(&mut self, next: TransactionState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        trace!(
            "{} {:?}: {:?} -> {:?}",
            self.session,
            self.command.trim_end(),
            self.state,
            next
        );
        self.state = next;
        true
    }
}

/// Outcome of one transaction.
#[derive(Debug)]
pub enum CommandOutcome {
    /// Output split into lines, empty lines dropped.
    Completed(Vec<String>),
    Failed(ConnectError),
}

impl CommandOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CommandOutcome::Completed(_))
    }

    pub fn lines(&self) -> Option<&[String]> {
        match self {
            CommandOutcome::Completed(lines) => Some(lines),
            CommandOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ConnectError> {
        match self {
            CommandOutcome::Completed(_) => None,
            CommandOutcome::Failed(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<Vec<String>, ConnectError> {
        match self {
            CommandOutcome::Completed(lines) => Ok(lines),
            CommandOutcome::Failed(err) => Err(err),
        }
    }
}

impl From<Result<Vec<String>, ConnectError>> for CommandOutcome {
    fn from(result: Result<Vec<String>, ConnectError>) -> Self {
        match result {
            Ok(lines) => CommandOutcome::Completed(lines),
            Err(err) => CommandOutcome::Failed(err),
        }
    }
}

/// Per-session outcomes of one invocation, keyed by identity.
#[derive(Debug, Default)]
pub struct InvokeResult {
    outcomes: BTreeMap<SessionId, CommandOutcome>,
    hosts: BTreeMap<SessionId, String>,
}

impl InvokeResult {
    fn insert(&mut self, id: SessionId, host: String, outcome: CommandOutcome) {
        self.hosts.insert(id, host);
        self.outcomes.insert(id, outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, id: SessionId) -> Option<&CommandOutcome> {
        self.outcomes.get(&id)
    }

    /// Output lines of a completed session.
    pub fn lines(&self, id: SessionId) -> Option<&[String]> {
        self.outcomes.get(&id).and_then(CommandOutcome::lines)
    }

    pub fn host(&self, id: SessionId) -> Option<&str> {
        self.hosts.get(&id).map(String::as_str)
    }

    /// Outcomes in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (SessionId, &CommandOutcome)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }

    pub fn completed_ids(&self) -> Vec<SessionId> {
        self.iter()
            .filter(|(_, outcome)| outcome.is_completed())
            .map(|(id, _)| id)
            .collect()
    }

    /// Identities to retry: every session whose transaction failed.
    pub fn failed_ids(&self) -> Vec<SessionId> {
        self.iter()
            .filter(|(_, outcome)| !outcome.is_completed())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn into_outcomes(self) -> BTreeMap<SessionId, CommandOutcome> {
        self.outcomes
    }
}

/// Ensures the command ends in exactly one line terminator.
pub fn normalize_command(command: &str) -> String {
    let body = command.trim_end_matches(['\r', '\n']);
    format!("{body}\n")
}

/// Splits raw shell output on every CR/LF boundary and drops empty pieces.
///
/// Blank output lines cannot be told apart from framing artifacts of the
/// terminal stream, so they are dropped together with them.
pub fn split_lines(raw: &str) -> Vec<String> {
    raw.split(['\r', '\n'])
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl<T: Transport> DeviceSession<T> {
    fn job(
        &self,
        command: &str,
        policy: &CompletionPolicy,
        show_echo: bool,
    ) -> Result<(CmdJob, JobReceiver), ConnectError> {
        if self.state() == LifecycleState::Closed {
            return Err(ConnectError::ConnectClosedError);
        }
        let (responder, receiver) = oneshot::channel();
        let job = CmdJob {
            command: normalize_command(command),
            policy: policy.clone(),
            show_echo,
            responder,
        };
        Ok((job, receiver))
    }

    /// Queues a command on this session's worker.
    ///
    /// Jobs queued on one session run in submission order; the returned
    /// receiver resolves when this job reaches a terminal state.
    pub(super) async fn submit(
        &self,
        command: &str,
        policy: &CompletionPolicy,
        show_echo: bool,
    ) -> Result<JobReceiver, ConnectError> {
        let (job, receiver) = self.job(command, policy, show_echo)?;
        self.sender
            .send(job)
            .await
            .map_err(|_| ConnectError::ConnectClosedError)?;
        Ok(receiver)
    }

    /// Queues a command without waiting for room in the worker queue.
    ///
    /// When the queue is full the job is handed to a task that waits for room,
    /// so one backed-up session never holds up the rest of a batch.
    pub(super) fn enqueue(
        &self,
        command: &str,
        policy: &CompletionPolicy,
        show_echo: bool,
    ) -> Result<JobReceiver, ConnectError> {
        let (job, receiver) = self.job(command, policy, show_echo)?;
        match self.sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                trace!("{} {} queue is full, deferring {:?}", self.host, self.id, job.command);
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    // A job that cannot be delivered drops its responder.
                    let _ = sender.send(job).await;
                });
            }
            Err(TrySendError::Closed(_)) => return Err(ConnectError::ConnectClosedError),
        }
        Ok(receiver)
    }

    /// Runs one command on this session and returns its output lines.
    pub async fn execute(
        &self,
        command: &str,
        policy: &CompletionPolicy,
        show_echo: bool,
    ) -> Result<Vec<String>, ConnectError> {
        let receiver = self.submit(command, policy, show_echo).await?;
        receiver
            .await
            .map_err(|_| ConnectError::ChannelDisconnectError)?
    }
}

impl<T: Transport> SessionRegistry<T> {
    /// Resolves a target selection against current membership.
    ///
    /// Name patterns keep duplicate matches, like [`SessionRegistry::lookup_by_name`].
    pub async fn resolve(&self, targets: &Targets) -> Vec<Arc<DeviceSession<T>>> {
        match targets {
            Targets::Ids(ids) => self.lookup_by_ids(ids.iter().copied()).await,
            Targets::Names { patterns, exact } => {
                self.lookup_by_name(patterns.as_slice(), *exact).await
            }
            Targets::All => self.sessions().await,
        }
    }

    /// Runs `command` on every resolved target and gathers the outcomes.
    ///
    /// All jobs are queued before any result is awaited, and queueing never
    /// waits on a busy session, so sessions run concurrently and the batch
    /// takes as long as its slowest session. A
    /// session resolved more than once runs the command once. A failure on one
    /// session is recorded in its entry and does not affect the others.
    pub async fn invoke(
        &self,
        targets: &Targets,
        command: &str,
        policy: &CompletionPolicy,
        show_echo: bool,
    ) -> InvokeResult {
        let resolved = self.resolve(targets).await;
        if resolved.is_empty() {
            debug!("No sessions resolved for {:?}", targets);
        }

        let mut seen = HashSet::new();
        let mut pending = Vec::with_capacity(resolved.len());
        for session in resolved {
            if !seen.insert(session.id()) {
                continue;
            }
            let receiver = session.enqueue(command, policy, show_echo);
            pending.push((session.id(), session.host().to_string(), receiver));
        }

        let mut result = InvokeResult::default();
        for (id, host, receiver) in pending {
            let outcome = match receiver {
                Ok(receiver) => receiver
                    .await
                    .unwrap_or(Err(ConnectError::ChannelDisconnectError)),
                Err(err) => Err(err),
            };
            result.insert(id, host, outcome.into());
        }
        result
    }
}

/// Starts the worker that owns `stream` and runs queued jobs one at a time.
pub(super) fn spawn_worker<S: ShellStream>(
    id: SessionId,
    host: String,
    mut stream: S,
    recorder: Option<SessionRecorder>,
) -> Sender<CmdJob> {
    let (tx, mut rx) = mpsc::channel::<CmdJob>(config::WORKER_QUEUE_DEPTH);

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let res = run_transaction(id, &host, &mut stream, &job, recorder.as_ref()).await;
            if let Err(err) = &res {
                warn!("{host} {id} command {:?} failed: {err}", job.command.trim_end());
            }
            let _ = job.responder.send(res);
        }
        debug!("Command channel closed for {host} {id}, stopping worker.");
    });

    tx
}

async fn run_transaction<S: ShellStream>(
    id: SessionId,
    host: &str,
    stream: &mut S,
    job: &CmdJob,
    recorder: Option<&SessionRecorder>,
) -> Result<Vec<String>, ConnectError> {
    let mut tx = Transaction::new(id, job.command.as_str());
    let command = job.command.trim_end().to_string();

    let result: Result<String, ConnectError> = async {
        // Drop late output of earlier commands.
        let stale = stream.read_available()?;
        if !stale.is_empty() {
            trace!("{host} discarding {} stale bytes", stale.len());
        }

        if job.show_echo {
            info!("[{host}] {}", command);
        }
        stream.write(job.command.as_bytes()).await?;
        tx.advance(TransactionState::Sent);
        if let Some(recorder) = recorder {
            let _ = recorder.record_event(SessionEvent::CommandSent {
                session_id: id,
                command: command.clone(),
            });
        }

        tx.advance(TransactionState::Collecting);
        job.policy.collect(stream, &command).await
    }
    .await;

    match result {
        Ok(raw) => {
            tx.advance(TransactionState::Completed);
            if let Some(recorder) = recorder {
                let _ = recorder.record_raw_output(id, raw.clone());
            }
            let lines = split_lines(&raw);
            if let Some(recorder) = recorder {
                let _ = recorder.record_event(SessionEvent::CommandCompleted {
                    session_id: id,
                    command,
                    lines: lines.clone(),
                });
            }
            Ok(lines)
        }
        Err(err) => {
            tx.advance(TransactionState::Failed);
            if let Some(recorder) = recorder {
                let _ = recorder.record_event(SessionEvent::CommandFailed {
                    session_id: id,
                    command,
                    reason: err.to_string(),
                });
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_exactly_one_terminator() {
        assert_eq!(normalize_command("show version"), "show version\n");
        assert_eq!(normalize_command("show version\n"), "show version\n");
        assert_eq!(normalize_command("show version\r\n\n"), "show version\n");
    }

    #[test]
    fn split_lines_handles_every_line_ending_and_drops_empties() {
        let raw = "show version\r\nVersion 1.0\r\n\r\nUptime\n\rsw#";
        assert_eq!(
            split_lines(raw),
            vec!["show version", "Version 1.0", "Uptime", "sw#"]
        );
        assert!(split_lines("").is_empty());
        assert!(split_lines("\r\n\r\n").is_empty());
    }

    #[test]
    fn transaction_follows_the_happy_path() {
        let mut tx = Transaction::new(SessionId::new(1), "show version\n");
        assert_eq!(tx.state(), TransactionState::Pending);
        assert!(tx.advance(TransactionState::Sent));
        assert!(tx.advance(TransactionState::Collecting));
        assert!(tx.advance(TransactionState::Completed));
        assert!(tx.state().is_terminal());
    }

    #[test]
    fn transaction_never_leaves_a_terminal_state() {
        let mut tx = Transaction::new(SessionId::new(1), "show version\n");
        assert!(tx.advance(TransactionState::Failed));
        assert!(!tx.advance(TransactionState::Sent));
        assert!(!tx.advance(TransactionState::Completed));
        assert_eq!(tx.state(), TransactionState::Failed);
    }

    #[test]
    fn transaction_cannot_skip_collection() {
        let mut tx = Transaction::new(SessionId::new(1), "show version\n");
        assert!(!tx.advance(TransactionState::Completed));
        assert!(tx.advance(TransactionState::Sent));
        assert!(!tx.advance(TransactionState::Completed));
    }

    #[test]
    fn outcome_accessors() {
        let ok = CommandOutcome::from(Ok(vec!["a".to_string()]));
        assert!(ok.is_completed());
        assert_eq!(ok.lines(), Some(&["a".to_string()][..]));

        let failed = CommandOutcome::from(Err(ConnectError::ChannelDisconnectError));
        assert!(failed.lines().is_none());
        assert!(failed.error().is_some_and(ConnectError::is_transport));
    }

    #[test]
    fn targets_from_sessions_are_identities() {
        let targets = Targets::from(vec![SessionId::new(3), SessionId::new(5)]);
        assert_eq!(targets, Targets::Ids(vec![SessionId::new(3), SessionId::new(5)]));
        assert_eq!(
            Targets::exact_names(["SW-01"]),
            Targets::Names {
                patterns: vec!["SW-01".to_string()],
                exact: true
            }
        );
    }
}
