//! Tests for the in-memory queue provider.

use super::*;
use bytes::Bytes;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

fn provider_with(queues: &[&str]) -> InMemoryProvider {
    InMemoryProvider::new(InMemoryConfig {
        queues: queues.iter().map(|q| q.to_string()).collect(),
        ..Default::default()
    })
    .unwrap()
}

async fn seed(provider: &InMemoryProvider, queue: &QueueName, count: usize) {
    for i in 0..count {
        let message = Message::new(Bytes::from(format!("message {}", i)))
            .with_message_id(format!("m-{}", i).parse().unwrap());
        provider.send_message(queue, &message).await.unwrap();
    }
}

mod provider_tests {
    use super::*;

    /// Verify configured queues exist and report zero depth
    #[tokio::test]
    async fn test_configured_queues_listed() {
        let provider = provider_with(&["orders-errors", "billing-errors"]);

        let mut names: Vec<String> = provider
            .list_queues()
            .await
            .unwrap()
            .into_iter()
            .map(|q| q.name.to_string())
            .collect();
        names.sort();

        assert_eq!(names, vec!["billing-errors", "orders-errors"]);
    }

    /// Verify sending to an unknown queue fails like a real broker
    #[tokio::test]
    async fn test_send_to_unknown_queue() {
        let provider = InMemoryProvider::default();
        let result = provider
            .send_message(&queue("missing"), &Message::new(Bytes::from_static(b"x")))
            .await;

        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    }

    /// Verify capacity limit refuses further sends
    #[tokio::test]
    async fn test_queue_capacity_enforced() {
        let provider = InMemoryProvider::new(InMemoryConfig {
            max_queue_size: 2,
            queues: vec!["small".to_string()],
        })
        .unwrap();
        let q = queue("small");
        seed(&provider, &q, 2).await;

        let result = provider
            .send_message(&q, &Message::new(Bytes::from_static(b"x")))
            .await;

        match result {
            Err(QueueError::ProviderError { code, .. }) => assert_eq!(code, "QueueFull"),
            other => panic!("Expected QueueFull, got {:?}", other),
        }
    }

    /// Verify invalid configured queue names are rejected
    #[test]
    fn test_invalid_configured_queue_rejected() {
        let result = InMemoryProvider::new(InMemoryConfig {
            queues: vec!["-bad".to_string()],
            ..Default::default()
        });
        assert!(matches!(result, Err(QueueError::ValidationError(_))));
    }
}

mod peek_tests {
    use super::*;

    /// Verify successive peeks advance without removing messages
    #[tokio::test]
    async fn test_peek_advances_cursor_and_keeps_messages() {
        let provider = provider_with(&["orders-errors"]);
        let q = queue("orders-errors");
        seed(&provider, &q, 5).await;

        let receiver = provider
            .open_receiver(&q, ReceiveMode::PeekOnly, Duration::from_secs(1))
            .await
            .unwrap();

        let first = receiver.receive_messages(2).await.unwrap();
        let second = receiver.receive_messages(2).await.unwrap();
        let third = receiver.receive_messages(2).await.unwrap();
        let fourth = receiver.receive_messages(2).await.unwrap();
        receiver.close().await.unwrap();

        let ids: Vec<&str> = first
            .iter()
            .chain(second.iter())
            .chain(third.iter())
            .map(|m| m.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["m-0", "m-1", "m-2", "m-3", "m-4"]);
        assert!(fourth.is_empty());
        assert!(first.iter().all(|m| m.receipt_handle.is_none()));

        let info = provider.get_queue_info(&q).await.unwrap();
        assert_eq!(info.active_message_count, 5);
    }
}

mod receive_tests {
    use super::*;

    /// Verify completed messages are removed and the rest are released on close
    #[tokio::test]
    async fn test_complete_removes_and_close_releases() {
        let provider = provider_with(&["orders-errors"]);
        let q = queue("orders-errors");
        seed(&provider, &q, 3).await;

        let receiver = provider
            .open_receiver(&q, ReceiveMode::ReceiveAndComplete, Duration::from_secs(1))
            .await
            .unwrap();
        let batch = receiver.receive_messages(3).await.unwrap();
        assert_eq!(batch.len(), 3);

        let receipt = batch[1].receipt_handle.clone().unwrap();
        receiver.complete_message(&receipt).await.unwrap();
        receiver.close().await.unwrap();

        let info = provider.get_queue_info(&q).await.unwrap();
        assert_eq!(info.active_message_count, 2);

        let peeker = provider
            .open_receiver(&q, ReceiveMode::PeekOnly, Duration::from_secs(1))
            .await
            .unwrap();
        let remaining = peeker.receive_messages(10).await.unwrap();
        let ids: Vec<&str> = remaining.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m-0", "m-2"]);
        assert!(remaining.iter().all(|m| m.delivery_count == 1));
    }

    /// Verify locked messages are not handed to a second receiver
    #[tokio::test]
    async fn test_locked_messages_hidden_from_other_receivers() {
        let provider = provider_with(&["orders-errors"]);
        let q = queue("orders-errors");
        seed(&provider, &q, 2).await;

        let first = provider
            .open_receiver(&q, ReceiveMode::ReceiveAndComplete, Duration::from_secs(1))
            .await
            .unwrap();
        let second = provider
            .open_receiver(&q, ReceiveMode::ReceiveAndComplete, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(first.receive_messages(2).await.unwrap().len(), 2);
        assert!(second.receive_messages(2).await.unwrap().is_empty());
    }

    /// Verify completing twice reports a lost lock
    #[tokio::test]
    async fn test_double_complete_fails() {
        let provider = provider_with(&["orders-errors"]);
        let q = queue("orders-errors");
        seed(&provider, &q, 1).await;

        let receiver = provider
            .open_receiver(&q, ReceiveMode::ReceiveAndComplete, Duration::from_secs(1))
            .await
            .unwrap();
        let batch = receiver.receive_messages(1).await.unwrap();
        let receipt = batch[0].receipt_handle.clone().unwrap();

        receiver.complete_message(&receipt).await.unwrap();
        let again = receiver.complete_message(&receipt).await;
        assert!(matches!(again, Err(QueueError::MessageNotFound { .. })));
    }

    /// Verify oversized receive requests are refused
    #[tokio::test]
    async fn test_receive_batch_limit() {
        let provider = provider_with(&["orders-errors"]);
        let receiver = provider
            .open_receiver(
                &queue("orders-errors"),
                ReceiveMode::ReceiveAndComplete,
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let result = receiver.receive_messages(5000).await;
        assert!(matches!(result, Err(QueueError::BatchTooLarge { .. })));
    }

    /// Verify a closed receiver cannot be reused
    #[tokio::test]
    async fn test_closed_receiver_rejects_calls() {
        let provider = provider_with(&["orders-errors"]);
        let receiver = provider
            .open_receiver(
                &queue("orders-errors"),
                ReceiveMode::PeekOnly,
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        receiver.close().await.unwrap();
        assert!(receiver.receive_messages(1).await.is_err());
    }
}
