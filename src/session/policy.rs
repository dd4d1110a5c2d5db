use super::*;

/// Rule deciding when a command's output has fully arrived.
///
/// The shell stream carries no end-of-response marker, so completion is
/// either assumed after a fixed wait or detected by recognising the prompt the
/// device prints once it is ready for the next command.
#[derive(Debug, Clone)]
pub enum CompletionPolicy {
    /// Sleep for the duration, then take whatever has arrived.
    ///
    /// Cannot tell "still computing" from "done", so the duration has to cover
    /// the slowest device and command in the batch. Never times out.
    FixedDelay(Duration),
    /// Read until the trailing text is a prompt, or fail on timeout.
    PromptMatch(PromptMatch),
}

/// Settings of the prompt-match policy.
#[derive(Debug, Clone)]
pub struct PromptMatch {
    pub matcher: PromptMatcher,
    /// Hard upper bound for one transaction.
    pub timeout: Duration,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        CompletionPolicy::FixedDelay(config::DEFAULT_FIXED_WAIT)
    }
}

impl CompletionPolicy {
    pub fn fixed_delay(wait: Duration) -> Self {
        CompletionPolicy::FixedDelay(wait)
    }

    pub fn prompt_match(matcher: PromptMatcher, timeout: Duration) -> Self {
        CompletionPolicy::PromptMatch(PromptMatch { matcher, timeout })
    }

    /// Prompt matching with the generic prompt patterns and the default timeout.
    pub fn generic_prompt() -> Self {
        Self::prompt_match(PromptMatcher::generic(), config::DEFAULT_PROMPT_TIMEOUT)
    }

    /// Collects the output of `command`, which has just been written.
    ///
    /// `command` is the text without its line terminator. Prompt matching
    /// uses it to skip output that precedes the command's echo.
    pub(super) async fn collect<S: ShellStream>(
        &self,
        stream: &mut S,
        command: &str,
    ) -> Result<String, ConnectError> {
        match self {
            CompletionPolicy::FixedDelay(wait) => {
                tokio::time::sleep(*wait).await;
                let data = stream.read_available()?;
                Ok(String::from_utf8_lossy(&data).into_owned())
            }
            CompletionPolicy::PromptMatch(prompt) => prompt.collect(stream, command).await,
        }
    }

    /// Waits until a freshly opened shell has printed its first prompt.
    ///
    /// Everything before that prompt (banners, MOTD) is discarded. A fixed
    /// delay cannot recognise a prompt, so it returns at once and relies on
    /// the stale-output drain of the first transaction.
    pub(super) async fn await_ready<S: ShellStream>(
        &self,
        stream: &mut S,
    ) -> Result<(), ConnectError> {
        match self {
            CompletionPolicy::FixedDelay(_) => Ok(()),
            CompletionPolicy::PromptMatch(prompt) => prompt.await_ready(stream).await,
        }
    }
}

impl PromptMatch {
    async fn collect<S: ShellStream>(
        &self,
        stream: &mut S,
        command: &str,
    ) -> Result<String, ConnectError> {
        let mut output = String::new();
        // Bytes after the last newline; the prompt, once it arrives, lives here.
        let mut tail: Vec<u8> = Vec::new();
        // Output and prompts ahead of the echo belong to an earlier command.
        let mut echoed = command.is_empty();

        let result = tokio::time::timeout(self.timeout, async {
            loop {
                let Some(chunk) = stream.read_chunk().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                tail.extend_from_slice(&chunk);

                while let Some(pos) = tail.iter().position(|b| *b == b'\n') {
                    let line = tail.drain(..=pos).collect::<Vec<u8>>();
                    let line = String::from_utf8_lossy(&line);
                    let line = IGNORE_START_LINE.replace(&line, "");
                    if !echoed {
                        if !line.trim_end().ends_with(command) {
                            trace!("Skipping {:?} ahead of the echo of {:?}", line, command);
                            continue;
                        }
                        echoed = true;
                    }
                    output.push_str(&line);
                }

                if tail.is_empty() {
                    continue;
                }
                let pending = String::from_utf8_lossy(&tail).into_owned();
                if self.matcher.is_prompt(&pending) {
                    tail.clear();
                    if !echoed {
                        trace!("Ignoring stale prompt {:?}", pending);
                        continue;
                    }
                    output.push_str(&pending);
                    return Ok(());
                }
                if self.matcher.is_more(&pending) {
                    trace!("Pagination marker {:?}, requesting next page", pending);
                    tail.clear();
                    stream.write(b" ").await?;
                }
            }
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(output),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                if echoed {
                    output.push_str(&String::from_utf8_lossy(&tail));
                }
                Err(ConnectError::ExecTimeout(output))
            }
        }
    }

    async fn await_ready<S: ShellStream>(&self, stream: &mut S) -> Result<(), ConnectError> {
        let mut tail: Vec<u8> = Vec::new();
        let result = tokio::time::timeout(self.timeout, async {
            loop {
                let Some(chunk) = stream.read_chunk().await else {
                    return Err(ConnectError::ChannelDisconnectError);
                };
                tail.extend_from_slice(&chunk);
                if let Some(pos) = tail.iter().rposition(|b| *b == b'\n') {
                    tail.drain(..=pos);
                }
                if !tail.is_empty() && self.matcher.is_prompt(&String::from_utf8_lossy(&tail)) {
                    return Ok(());
                }
            }
        })
        .await;

        match result {
            Ok(res) => res,
            Err(_) => Err(ConnectError::ExecTimeout(
                String::from_utf8_lossy(&tail).into_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockTransport};

    async fn open(device: MockDevice) -> <MockTransport as Transport>::Stream {
        let transport = MockTransport::new().with_device("sw", device);
        let handle = transport
            .connect("sw", &Credentials::new("admin", "pw"))
            .await
            .expect("connect");
        let mut stream = transport
            .open_interactive_channel(&handle)
            .await
            .expect("open channel");
        // drop the login banner
        stream.read_available().expect("banner");
        stream
    }

    #[tokio::test]
    async fn fixed_delay_returns_whatever_arrived() {
        let device = MockDevice::new("sw#").respond("show clock", "10:00:00 UTC");
        let mut stream = open(device).await;
        stream.write(b"show clock\n").await.expect("write");

        let policy = CompletionPolicy::fixed_delay(Duration::ZERO);
        let output = policy.collect(&mut stream, "show clock").await.expect("collect");
        assert_eq!(split_lines(&output), vec!["show clock", "10:00:00 UTC", "sw#"]);
    }

    #[tokio::test]
    async fn fixed_delay_with_nothing_buffered_is_empty() {
        let mut stream = open(MockDevice::new("sw#")).await;

        let policy = CompletionPolicy::fixed_delay(Duration::ZERO);
        let output = policy.collect(&mut stream, "").await.expect("collect");
        assert!(output.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_delay_shorter_than_device_latency_truncates() {
        let device = MockDevice::new("sw#")
            .respond("show version", "Version 1.0")
            .latency(Duration::from_secs(2));
        let mut stream = open(device).await;
        stream.write(b"show version\n").await.expect("write");

        let early = CompletionPolicy::fixed_delay(Duration::from_secs(1))
            .collect(&mut stream, "show version")
            .await
            .expect("collect");
        assert!(early.is_empty());

        let late = CompletionPolicy::fixed_delay(Duration::from_secs(2))
            .collect(&mut stream, "show version")
            .await
            .expect("collect");
        assert!(late.contains("Version 1.0"));
    }

    #[tokio::test]
    async fn prompt_match_stops_at_prompt() {
        let device = MockDevice::new("sw#").respond("show vlan", "10 users\r\n20 voice");
        let mut stream = open(device).await;
        stream.write(b"show vlan\n").await.expect("write");

        let output = CompletionPolicy::generic_prompt()
            .collect(&mut stream, "show vlan")
            .await
            .expect("collect");
        assert_eq!(
            split_lines(&output),
            vec!["show vlan", "10 users", "20 voice", "sw#"]
        );
    }

    #[tokio::test]
    async fn prompt_match_answers_pagination() {
        let device = MockDevice::new("sw#").paged(
            "show running-config",
            vec!["hostname sw\r\nvlan 10", "vlan 20\r\nend"],
        );
        let mut stream = open(device).await;
        stream.write(b"show running-config\n").await.expect("write");

        let output = CompletionPolicy::generic_prompt()
            .collect(&mut stream, "show running-config")
            .await
            .expect("collect");
        let lines = split_lines(&output);
        assert!(lines.iter().all(|line| !line.contains("More")));
        assert!(lines.contains(&"vlan 10".to_string()));
        assert!(lines.contains(&"vlan 20".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("sw#"));
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_match_times_out_with_partial_output() {
        let mut stream = open(MockDevice::new("sw#").respond("reload", "Proceed?").silent()).await;
        stream.write(b"reload\n").await.expect("write");

        let policy =
            CompletionPolicy::prompt_match(PromptMatcher::generic(), Duration::from_secs(3));
        let err = policy.collect(&mut stream, "reload").await.unwrap_err();
        match err {
            ConnectError::ExecTimeout(partial) => assert!(partial.contains("Proceed?")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_match_skips_late_output_of_a_timed_out_command() {
        let device = MockDevice::new("sw#")
            .respond("show clock", "10:00:00")
            .respond("show vlan", "10 users")
            .latency(Duration::from_secs(2));
        let mut stream = open(device).await;

        stream.write(b"show clock\n").await.expect("write");
        let short =
            CompletionPolicy::prompt_match(PromptMatcher::generic(), Duration::from_secs(1));
        let err = short.collect(&mut stream, "show clock").await.unwrap_err();
        assert!(matches!(err, ConnectError::ExecTimeout(ref partial) if partial.is_empty()));

        // The clock reply and its prompt arrive while "show vlan" is collecting.
        stream.write(b"show vlan\n").await.expect("write");
        let long =
            CompletionPolicy::prompt_match(PromptMatcher::generic(), Duration::from_secs(10));
        let output = long.collect(&mut stream, "show vlan").await.expect("collect");
        assert_eq!(split_lines(&output), vec!["show vlan", "10 users", "sw#"]);
    }

    #[tokio::test(start_paused = true)]
    async fn await_ready_discards_a_late_banner() {
        let transport = MockTransport::new().with_device(
            "sw",
            MockDevice::new("sw#").login_delay(Duration::from_secs(4)),
        );
        let handle = transport
            .connect("sw", &Credentials::new("admin", "pw"))
            .await
            .expect("connect");
        let mut stream = transport
            .open_interactive_channel(&handle)
            .await
            .expect("open channel");

        CompletionPolicy::generic_prompt()
            .await_ready(&mut stream)
            .await
            .expect("ready");
        assert!(stream.read_available().expect("drained").is_empty());

        let silent = transport.clone().with_device(
            "slow",
            MockDevice::new("slow#").login_delay(Duration::from_secs(30)),
        );
        let handle = silent
            .connect("slow", &Credentials::new("admin", "pw"))
            .await
            .expect("connect");
        let mut stream = silent
            .open_interactive_channel(&handle)
            .await
            .expect("open channel");
        let policy =
            CompletionPolicy::prompt_match(PromptMatcher::generic(), Duration::from_secs(5));
        assert!(policy.await_ready(&mut stream).await.unwrap_err().is_timeout());
    }
}
