//! Tests for the in-memory staging store.

use super::*;
use crate::{Message, QueueName, Timestamp};
use bytes::Bytes;

fn user(name: &str) -> UserId {
    UserId::new(name.to_string()).unwrap()
}

fn staged(id: &str, owner: &str, queue: &str) -> QueueMessage {
    QueueMessage {
        id: id.parse().unwrap(),
        user_id: user(owner),
        queue: QueueName::new(queue.to_string()).unwrap(),
        processing_endpoint: "orders".to_string(),
        originating_endpoint: "checkout".to_string(),
        body: format!("body of {}", id),
        exception: "failure".to_string(),
        exception_type: "System.Exception".to_string(),
        original_message: Message::new(Bytes::from(id.to_string())),
        is_read_only: false,
    }
}

fn ids(messages: &[QueueMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}

fn message_ids(values: &[&str]) -> Vec<MessageId> {
    values.iter().map(|v| v.parse().unwrap()).collect()
}

mod staging_tests {
    use super::*;

    /// Verify batches are stored in insertion order within the owner's partition
    #[tokio::test]
    async fn test_create_and_query_in_insertion_order() {
        let store = InMemoryStagingStore::new();
        let batch = vec![
            staged("c", "alice", "orders-errors"),
            staged("a", "alice", "orders-errors"),
        ];
        store.create_batch(&user("alice"), &batch).await.unwrap();
        store
            .create_one(&staged("b", "alice", "orders-errors"))
            .await
            .unwrap();

        let all = store
            .query(&user("alice"), &SearchProperties::default())
            .await
            .unwrap();
        assert_eq!(ids(&all), vec!["c", "a", "b"]);
    }

    /// Verify a batch with a conflicting id is rejected without partial writes
    #[tokio::test]
    async fn test_batch_conflict_is_all_or_nothing() {
        let store = InMemoryStagingStore::new();
        store
            .create_one(&staged("a", "alice", "orders-errors"))
            .await
            .unwrap();

        let batch = vec![
            staged("b", "alice", "orders-errors"),
            staged("a", "alice", "orders-errors"),
        ];
        let result = store.create_batch(&user("alice"), &batch).await;

        assert!(matches!(result, Err(StoreError::WriteFailed { .. })));
        assert_eq!(store.count(&user("alice"), None).await.unwrap(), 1);
    }

    /// Verify the same id may be staged by different users
    #[tokio::test]
    async fn test_partitions_are_independent() {
        let store = InMemoryStagingStore::new();
        store
            .create_one(&staged("a", "alice", "orders-errors"))
            .await
            .unwrap();
        store
            .create_one(&staged("a", "bob", "orders-errors"))
            .await
            .unwrap();

        store
            .delete_batch(&user("alice"), &message_ids(&["a"]))
            .await
            .unwrap();

        assert!(!store.has_active_session(&user("alice")).await.unwrap());
        assert!(store.has_active_session(&user("bob")).await.unwrap());
    }

    /// Verify deleting unknown ids is a no-op
    #[tokio::test]
    async fn test_delete_missing_ids_ignored() {
        let store = InMemoryStagingStore::new();
        store
            .create_one(&staged("a", "alice", "orders-errors"))
            .await
            .unwrap();

        store
            .delete_batch(&user("alice"), &message_ids(&["a", "ghost"]))
            .await
            .unwrap();
        store
            .delete_batch(&user("alice"), &message_ids(&["a"]))
            .await
            .unwrap();

        assert_eq!(store.count(&user("alice"), None).await.unwrap(), 0);
    }

    /// Verify id lookups return only known ids of the owner
    #[tokio::test]
    async fn test_query_by_ids() {
        let store = InMemoryStagingStore::new();
        let batch = vec![
            staged("a", "alice", "orders-errors"),
            staged("b", "alice", "orders-errors"),
        ];
        store.create_batch(&user("alice"), &batch).await.unwrap();

        let found = store
            .query_by_ids(&user("alice"), &message_ids(&["b", "zzz"]))
            .await
            .unwrap();
        assert_eq!(ids(&found), vec!["b"]);

        let foreign = store
            .query_by_ids(&user("bob"), &message_ids(&["a"]))
            .await
            .unwrap();
        assert!(foreign.is_empty());

        let single = store
            .get_message(&user("alice"), &"a".parse().unwrap())
            .await
            .unwrap();
        assert!(single.is_some());
    }

    /// Verify search counts ignore paging
    #[tokio::test]
    async fn test_count_with_search() {
        let store = InMemoryStagingStore::new();
        let batch = vec![
            staged("a", "alice", "orders-errors"),
            staged("b", "alice", "orders-errors"),
        ];
        store.create_batch(&user("alice"), &batch).await.unwrap();

        let search = SearchProperties::page(0, 1).with_search("body of a");
        assert_eq!(store.count(&user("alice"), Some(&search)).await.unwrap(), 1);
        assert_eq!(store.query(&user("alice"), &search).await.unwrap().len(), 1);
    }

    /// Verify an unknown sort field surfaces as an invalid query
    #[tokio::test]
    async fn test_invalid_sort_rejected() {
        let store = InMemoryStagingStore::new();
        let search = SearchProperties::default().with_sort("colour", "asc");

        let result = store.query(&user("alice"), &search).await;
        assert!(matches!(result, Err(StoreError::InvalidQuery(_))));
    }

    /// Verify messages under investigation are grouped by queue and user
    #[tokio::test]
    async fn test_count_by_queue() {
        let store = InMemoryStagingStore::new();
        store
            .create_batch(
                &user("alice"),
                &[
                    staged("a", "alice", "orders-errors"),
                    staged("b", "alice", "orders-errors"),
                ],
            )
            .await
            .unwrap();
        store
            .create_one(&staged("c", "bob", "billing-errors"))
            .await
            .unwrap();

        let counts = store.count_by_queue().await.unwrap();

        assert_eq!(
            counts,
            vec![
                InvestigationCount {
                    queue: "billing-errors".to_string(),
                    user_id: user("bob"),
                    message_count: 1
                },
                InvestigationCount {
                    queue: "orders-errors".to_string(),
                    user_id: user("alice"),
                    message_count: 2
                },
            ]
        );
    }
}

mod session_store_tests {
    use super::*;

    fn session(owner: &str, queue: &str) -> UserSession {
        UserSession::new(user(owner), QueueName::new(queue.to_string()).unwrap())
    }

    /// Verify one session is kept per user
    #[tokio::test]
    async fn test_upsert_replaces() {
        let store = InMemoryStagingStore::new();
        store
            .upsert_session(&session("alice", "orders-errors"))
            .await
            .unwrap();
        let replacement = session("alice", "billing-errors");
        store.upsert_session(&replacement).await.unwrap();

        let current = store.get_session(&user("alice")).await.unwrap().unwrap();
        assert_eq!(current, replacement);
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
    }

    /// Verify a stale session id does not delete a newer session
    #[tokio::test]
    async fn test_delete_requires_matching_id() {
        let store = InMemoryStagingStore::new();
        let old = session("alice", "orders-errors");
        store.upsert_session(&old).await.unwrap();
        let new = session("alice", "orders-errors");
        store.upsert_session(&new).await.unwrap();

        assert!(!store.delete_session(&user("alice"), &old.id).await.unwrap());
        assert!(store.delete_session(&user("alice"), &new.id).await.unwrap());
        assert!(store.get_session(&user("alice")).await.unwrap().is_none());
    }

    /// Verify inactive sessions are selected by cutoff
    #[tokio::test]
    async fn test_sessions_inactive_since() {
        let store = InMemoryStagingStore::new();
        let now = Timestamp::now();

        let mut idle = session("alice", "orders-errors");
        idle.last_activity_at = now.subtract_duration(chrono::Duration::minutes(30));
        store.upsert_session(&idle).await.unwrap();
        store
            .upsert_session(&session("bob", "orders-errors"))
            .await
            .unwrap();

        let cutoff = now.subtract_duration(chrono::Duration::minutes(20));
        let expired = store.sessions_inactive_since(cutoff).await.unwrap();

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].user_id, user("alice"));
    }

    /// Verify touching refreshes last activity and ignores unknown users
    #[tokio::test]
    async fn test_touch_session() {
        let store = InMemoryStagingStore::new();
        let mut idle = session("alice", "orders-errors");
        idle.last_activity_at = Timestamp::now().subtract_duration(chrono::Duration::hours(1));
        store.upsert_session(&idle).await.unwrap();

        let at = Timestamp::now();
        let touched = store.touch_session(&user("alice"), at).await.unwrap().unwrap();
        assert_eq!(touched.last_activity_at, at);

        assert!(store
            .touch_session(&user("nobody"), at)
            .await
            .unwrap()
            .is_none());
    }
}
