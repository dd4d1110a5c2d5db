use std::time::Duration;

use swpool::mock::{MockDevice, MockTransport};
use swpool::session::{
    CompletionPolicy, NormalizeOptions, RegistryOptions, SessionEvent, SessionId,
    SessionRecordLevel, SessionRecorder, SessionRegistry, Targets,
};
use swpool::transport::Credentials;

const BASIC_FIXTURE: &str = include_str!("fixtures/session_recording_basic.jsonl");

fn kind(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::SessionOpened { .. } => "session_opened",
        SessionEvent::ConnectFailed { .. } => "connect_failed",
        SessionEvent::SessionClosed { .. } => "session_closed",
        SessionEvent::CommandSent { .. } => "command_sent",
        SessionEvent::CommandCompleted { .. } => "command_completed",
        SessionEvent::CommandFailed { .. } => "command_failed",
        SessionEvent::RawOutput { .. } => "raw_output",
    }
}

fn kinds(recorder: &SessionRecorder) -> Vec<&'static str> {
    recorder
        .entries()
        .expect("entries")
        .iter()
        .map(|entry| kind(&entry.event))
        .collect()
}

#[test]
fn fixture_loads_every_event_kind() {
    let recorder = SessionRecorder::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    assert_eq!(
        kinds(&recorder),
        vec![
            "session_opened",
            "connect_failed",
            "command_sent",
            "raw_output",
            "command_completed",
            "command_sent",
            "command_failed",
            "session_closed",
        ]
    );
}

#[test]
fn fixture_normalizes_without_raw_output() {
    let normalized = SessionRecorder::normalize_jsonl(BASIC_FIXTURE, NormalizeOptions::default())
        .expect("normalize");
    assert!(!normalized.contains("raw_output"));
    let restored = SessionRecorder::from_jsonl(&normalized).expect("restore");
    assert_eq!(restored.entries().expect("entries").len(), 7);

    let again = SessionRecorder::normalize_jsonl(&normalized, NormalizeOptions::default())
        .expect("normalize twice");
    assert_eq!(again, normalized);
}

#[test]
fn fixture_session_events_skip_connect_failures() {
    let recorder = SessionRecorder::from_jsonl(BASIC_FIXTURE).expect("load fixture");
    let events = recorder.session_events(SessionId::new(1)).expect("events");
    assert_eq!(events.len(), 7);
    assert!(
        events
            .iter()
            .all(|event| !matches!(event, SessionEvent::ConnectFailed { .. }))
    );
}

#[tokio::test]
async fn live_registry_records_full_session() {
    let recorder = SessionRecorder::new(SessionRecordLevel::Full);
    let transport = MockTransport::new().with_device(
        "SW-01",
        MockDevice::new("SW-01#").respond("show version", "Cisco IOS 15.2"),
    );
    let registry = SessionRegistry::with_options(
        transport,
        RegistryOptions::without_setup().with_recorder(recorder.clone()),
    );

    registry.create(["SW-01", "SW-02"], &Credentials::new("admin", "secret")).await;
    registry
        .invoke(
            &Targets::All,
            "show version",
            &CompletionPolicy::fixed_delay(Duration::ZERO),
            false,
        )
        .await;
    registry.remove_all().await;

    assert_eq!(
        kinds(&recorder),
        vec![
            "session_opened",
            "connect_failed",
            "command_sent",
            "raw_output",
            "command_completed",
            "session_closed",
        ]
    );

    let jsonl = recorder.to_jsonl().expect("export");
    let restored = SessionRecorder::from_jsonl(&jsonl).expect("import");
    let completed = restored
        .entries()
        .expect("entries")
        .into_iter()
        .find_map(|entry| match entry.event {
            SessionEvent::CommandCompleted { lines, .. } => Some(lines),
            _ => None,
        })
        .expect("completed event");
    assert_eq!(completed, vec!["show version", "Cisco IOS 15.2", "SW-01#"]);
}
