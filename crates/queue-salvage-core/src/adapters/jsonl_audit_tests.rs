//! Tests for the JSON lines audit writer.

use super::*;
use crate::audit::AuditActor;
use crate::staging::QueueMessage;
use crate::{Message, QueueName, UserId};
use bytes::Bytes;
use tempfile::TempDir;

fn replay_event(id: &str) -> ReplayAuditEvent {
    let message = QueueMessage {
        id: id.parse().unwrap(),
        user_id: UserId::new("alice".to_string()).unwrap(),
        queue: QueueName::new("orders-errors".to_string()).unwrap(),
        processing_endpoint: "orders".to_string(),
        originating_endpoint: "checkout".to_string(),
        body: "{}".to_string(),
        exception: "boom".to_string(),
        exception_type: "System.Exception".to_string(),
        original_message: Message::new(Bytes::from_static(b"{}")),
        is_read_only: false,
    };
    let actor = AuditActor::new(message.user_id.clone()).with_origin_ip("::1");
    ReplayAuditEvent::new(
        &message,
        &QueueName::new("orders".to_string()).unwrap(),
        &actor,
    )
}

/// Verify each event is appended as one parseable line
#[tokio::test]
async fn test_appends_one_line_per_event() {
    let temp_dir = TempDir::new().unwrap();
    let writer = JsonLinesAuditWriter::new(temp_dir.path().join("audit").join("replays.jsonl"))
        .await
        .unwrap();

    let first = replay_event("m-1");
    let second = replay_event("m-2");
    writer.write_event(&first).await.unwrap();
    writer.write_event(&second).await.unwrap();

    let contents = std::fs::read_to_string(writer.path()).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    let parsed: ReplayAuditEvent = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(parsed, second);
    assert_eq!(parsed.actor.origin_ip.as_deref(), Some("127.0.0.1"));
}

/// Verify an existing log is appended to, not truncated
#[tokio::test]
async fn test_existing_log_preserved() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("replays.jsonl");
    std::fs::write(&path, "{\"earlier\":true}\n").unwrap();

    let writer = JsonLinesAuditWriter::new(path.clone()).await.unwrap();
    writer.write_event(&replay_event("m-1")).await.unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("{\"earlier\":true}\n"));
    assert_eq!(contents.lines().count(), 2);
}
