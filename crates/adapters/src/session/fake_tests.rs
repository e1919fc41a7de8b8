// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionSink for RecordingSink {
    async fn ready(&self, session_id: &str, pid: Option<u32>) {
        self.seen
            .lock()
            .unwrap()
            .push(format!("ready {} {:?}", session_id, pid.is_some()));
    }

    async fn output(&self, session_id: &str, data: &[u8]) {
        self.seen.lock().unwrap().push(format!(
            "output {} {}",
            session_id,
            String::from_utf8_lossy(data)
        ));
    }

    async fn exit(&self, session_id: &str, code: Option<i32>) {
        self.seen
            .lock()
            .unwrap()
            .push(format!("exit {} {:?}", session_id, code));
    }

    async fn error(&self, session_id: &str, message: &str) {
        self.seen
            .lock()
            .unwrap()
            .push(format!("error {} {}", session_id, message));
    }
}

async fn create(provider: &FakeSessionProvider, sink: &Arc<RecordingSink>) {
    provider
        .create(
            "s1",
            TerminalSize::default(),
            Path::new("/tmp"),
            Arc::clone(sink) as Arc<dyn SessionSink>,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn create_reports_ready() {
    let provider = FakeSessionProvider::new();
    let sink = Arc::new(RecordingSink::default());
    create(&provider, &sink).await;

    assert_eq!(sink.seen(), vec!["ready s1 true"]);
    assert_eq!(provider.open_sessions(), vec!["s1"]);
    assert!(matches!(provider.calls()[0], SessionCall::Create { .. }));
}

#[tokio::test]
async fn stop_payload_exits_cooperatively() {
    let provider = FakeSessionProvider::new();
    let sink = Arc::new(RecordingSink::default());
    create(&provider, &sink).await;

    provider.write("s1", b"say hi\n").await.unwrap();
    provider.write("s1", b"stop\n").await.unwrap();

    assert_eq!(sink.seen().last().unwrap(), "exit s1 Some(0)");
    assert!(provider.open_sessions().is_empty());
    assert_eq!(provider.get_session("s1").unwrap().input, b"say hi\nstop\n");
}

#[tokio::test]
async fn ignored_stop_keeps_session_open_until_closed() {
    let provider = FakeSessionProvider::new();
    provider.set_ignore_stop();
    let sink = Arc::new(RecordingSink::default());
    create(&provider, &sink).await;

    provider.write("s1", &[INTERRUPT_BYTE]).await.unwrap();
    assert_eq!(provider.open_sessions(), vec!["s1"]);

    provider.close("s1").await.unwrap();
    assert_eq!(sink.seen().last().unwrap(), "exit s1 None");
    assert_eq!(provider.close_count("s1"), 1);
}

#[tokio::test]
async fn exit_is_reported_once() {
    let provider = FakeSessionProvider::new();
    let sink = Arc::new(RecordingSink::default());
    create(&provider, &sink).await;

    provider.emit_exit("s1", Some(1)).await;
    provider.close("s1").await.unwrap();

    let exits = sink.seen().iter().filter(|s| s.starts_with("exit")).count();
    assert_eq!(exits, 1);
}

#[tokio::test]
async fn write_to_closed_session_fails() {
    let provider = FakeSessionProvider::new();
    let sink = Arc::new(RecordingSink::default());
    create(&provider, &sink).await;
    provider.close("s1").await.unwrap();

    let err = provider.write("s1", b"x").await.unwrap_err();
    assert!(matches!(err, SessionError::NotFound(_)));
}

#[tokio::test]
async fn scripted_failures() {
    let provider = FakeSessionProvider::new();
    provider.set_create_error("no pty");
    let sink = Arc::new(RecordingSink::default());
    let err = provider
        .create(
            "s1",
            TerminalSize::default(),
            Path::new("/tmp"),
            Arc::clone(&sink) as Arc<dyn SessionSink>,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::SpawnFailed(_)));

    provider.reset_behavior();
    provider.set_ready_error("crashed");
    create(&provider, &sink).await;
    assert_eq!(sink.seen(), vec!["error s1 crashed"]);
}

#[tokio::test]
async fn output_is_forwarded() {
    let provider = FakeSessionProvider::new();
    let sink = Arc::new(RecordingSink::default());
    create(&provider, &sink).await;

    provider.emit_output("s1", b"Done (3.2s)!").await;
    assert_eq!(sink.seen()[1], "output s1 Done (3.2s)!");
}
