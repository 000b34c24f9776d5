//! Tests for the expired session sweep.

use super::*;
use crate::adapters::InMemoryStagingStore;
use crate::audit::TracingAuditWriter;
use crate::broker::{BrokerClient, BrokerError, QueueInfo, QueueNameRules};
use crate::sessions::UserSessionStore;
use crate::staging::QueueMessage;
use crate::{Message, QueueName};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Broker recording every send, optionally refusing all of them
#[derive(Default)]
struct CountingBroker {
    sends: Mutex<Vec<(String, String)>>,
    refuse: AtomicBool,
}

impl CountingBroker {
    fn send_count(&self) -> usize {
        self.sends.lock().unwrap().len()
    }

    fn destination_of(&self, id: &str) -> Option<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .find(|(sent, _)| sent == id)
            .map(|(_, destination)| destination.clone())
    }
}

#[async_trait]
impl BrokerClient for CountingBroker {
    async fn list_error_queues(&self) -> Result<Vec<QueueInfo>, BrokerError> {
        Ok(Vec::new())
    }

    async fn get_queue_details(&self, queue_name: &str) -> Result<QueueInfo, BrokerError> {
        Ok(QueueInfo {
            name: queue_name.to_string(),
            message_count: 0,
        })
    }

    async fn peek(
        &self,
        _queue: &QueueName,
        _quantity: u64,
        _owner: &UserId,
    ) -> Result<Vec<QueueMessage>, BrokerError> {
        Ok(Vec::new())
    }

    async fn receive_and_ack(
        &self,
        _queue: &QueueName,
        _quantity: u64,
        _owner: &UserId,
    ) -> Result<Vec<QueueMessage>, BrokerError> {
        Ok(Vec::new())
    }

    async fn send(&self, message: &QueueMessage, destination: &QueueName) -> Result<(), BrokerError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(BrokerError::BrokerUnavailable {
                message: "namespace unreachable".to_string(),
            });
        }
        self.sends
            .lock()
            .unwrap()
            .push((message.id.to_string(), destination.to_string()));
        Ok(())
    }
}

struct Fixture {
    broker: Arc<CountingBroker>,
    store: InMemoryStagingStore,
    sweep: SessionSweep,
}

fn fixture(settings: SweepSettings) -> Fixture {
    let broker = Arc::new(CountingBroker::default());
    let store = InMemoryStagingStore::new();
    let sessions = UserSessionService::new(Arc::new(store.clone()), chrono::Duration::minutes(20));
    let messages = Arc::new(MessageService::new(
        broker.clone(),
        Arc::new(store.clone()),
        sessions.clone(),
        Arc::new(TracingAuditWriter),
        QueueNameRules::default(),
        settings.page_size,
    ));

    let sweep = SessionSweep::new(sessions, Arc::new(store.clone()), messages, settings);
    Fixture {
        broker,
        store,
        sweep,
    }
}

fn user(name: &str) -> UserId {
    UserId::new(name.to_string()).unwrap()
}

fn queue() -> QueueName {
    QueueName::new("orders-errors".to_string()).unwrap()
}

fn staged(id: &str, owner: &str) -> QueueMessage {
    QueueMessage {
        id: id.parse().unwrap(),
        user_id: user(owner),
        queue: queue(),
        processing_endpoint: "orders".to_string(),
        originating_endpoint: "checkout".to_string(),
        body: "{}".to_string(),
        exception: "failure".to_string(),
        exception_type: "System.Exception".to_string(),
        original_message: Message::new(Bytes::from_static(b"{}")),
        is_read_only: false,
    }
}

async fn expired_session(store: &InMemoryStagingStore, owner: &str) -> UserSession {
    let mut session = UserSession::new(user(owner), queue());
    session.last_activity_at = Timestamp::now().subtract_duration(chrono::Duration::hours(1));
    store.upsert_session(&session).await.unwrap();
    session
}

mod drain_tests {
    use super::*;

    /// Verify every staged message is aborted one page at a time before the session goes
    #[tokio::test]
    async fn test_drains_before_deleting() {
        let f = fixture(SweepSettings {
            page_size: 1,
            max_pages_per_session: 10,
        });
        expired_session(&f.store, "alice").await;
        for id in ["m-1", "m-2", "m-3"] {
            f.store.create_one(&staged(id, "alice")).await.unwrap();
        }

        let report = f.sweep.run_once().await.unwrap();

        assert_eq!(f.broker.send_count(), 3);
        assert_eq!(report.messages_aborted, 3);
        assert_eq!(report.sessions_deleted, 1);
        assert_eq!(f.store.count(&user("alice"), None).await.unwrap(), 0);
        assert!(f.store.get_session(&user("alice")).await.unwrap().is_none());
    }

    /// Verify an empty session is removed on the first pass without any sends
    #[tokio::test]
    async fn test_empty_session_deleted_immediately() {
        let f = fixture(SweepSettings::default());
        expired_session(&f.store, "alice").await;

        let report = f.sweep.run_once().await.unwrap();

        assert_eq!(f.broker.send_count(), 0);
        assert_eq!(report.sessions_examined, 1);
        assert_eq!(report.sessions_deleted, 1);
    }

    /// Verify each message goes back to the error queue it was staged from
    #[tokio::test]
    async fn test_aborts_to_source_queue() {
        let f = fixture(SweepSettings::default());
        expired_session(&f.store, "alice").await;
        let mut billing = staged("b-1", "alice");
        billing.queue = QueueName::new("billing-errors".to_string()).unwrap();
        f.store.create_one(&billing).await.unwrap();
        f.store.create_one(&staged("m-1", "alice")).await.unwrap();

        let report = f.sweep.run_once().await.unwrap();

        assert_eq!(report.sessions_deleted, 1);
        assert_eq!(f.broker.destination_of("b-1").as_deref(), Some("billing-errors"));
        assert_eq!(f.broker.destination_of("m-1").as_deref(), Some("orders-errors"));
    }

    /// Verify active sessions and their messages are left alone
    #[tokio::test]
    async fn test_active_sessions_untouched() {
        let f = fixture(SweepSettings::default());
        f.store
            .upsert_session(&UserSession::new(user("bob"), queue()))
            .await
            .unwrap();
        f.store.create_one(&staged("m-1", "bob")).await.unwrap();

        let report = f.sweep.run_once().await.unwrap();

        assert_eq!(report, SweepReport::default());
        assert!(f.store.get_session(&user("bob")).await.unwrap().is_some());
        assert_eq!(f.broker.send_count(), 0);
    }
}

mod failure_tests {
    use super::*;

    /// Verify a session whose messages cannot be aborted is skipped, not spun on
    #[tokio::test]
    async fn test_no_progress_skips_session() {
        let f = fixture(SweepSettings::default());
        let session = expired_session(&f.store, "alice").await;
        f.store.create_one(&staged("m-1", "alice")).await.unwrap();
        f.broker.refuse.store(true, Ordering::SeqCst);

        let report = f.sweep.run_once().await.unwrap();

        assert_eq!(report.sessions_deleted, 0);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].session_id, session.id);
        assert!(f.store.get_session(&user("alice")).await.unwrap().is_some());
        assert_eq!(f.store.count(&user("alice"), None).await.unwrap(), 1);
    }

    /// Verify one stuck session does not stop the others
    #[tokio::test]
    async fn test_continues_after_skipped_session() {
        let f = fixture(SweepSettings {
            page_size: 1,
            max_pages_per_session: 1,
        });
        expired_session(&f.store, "alice").await;
        expired_session(&f.store, "bob").await;
        for id in ["a-1", "a-2"] {
            f.store.create_one(&staged(id, "alice")).await.unwrap();
        }

        let report = f.sweep.run_once().await.unwrap();

        assert_eq!(report.sessions_examined, 2);
        assert_eq!(report.sessions_deleted, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].user_id, user("alice"));
        assert!(f.store.get_session(&user("bob")).await.unwrap().is_none());
    }

    /// Verify a later pass finishes what an earlier pass left behind
    #[tokio::test]
    async fn test_next_pass_resumes() {
        let f = fixture(SweepSettings {
            page_size: 1,
            max_pages_per_session: 2,
        });
        expired_session(&f.store, "alice").await;
        for id in ["m-1", "m-2", "m-3"] {
            f.store.create_one(&staged(id, "alice")).await.unwrap();
        }

        let first = f.sweep.run_once().await.unwrap();
        let second = f.sweep.run_once().await.unwrap();

        assert_eq!(first.messages_aborted, 2);
        assert_eq!(first.sessions_deleted, 0);
        assert_eq!(second.messages_aborted, 1);
        assert_eq!(second.sessions_deleted, 1);
        assert_eq!(f.broker.send_count(), 3);
    }
}
