//! Tests for the queue-runtime library module.

use super::*;
use bytes::Bytes;

/// Verify a factory-built in-memory client serves the full receive cycle
#[tokio::test]
async fn test_factory_in_memory_client_cycle() {
    let client = QueueClientFactory::create_client(QueueConfig {
        provider: ProviderConfig::InMemory(InMemoryConfig {
            queues: vec!["orders-errors".to_string()],
            ..Default::default()
        }),
        ..Default::default()
    })
    .unwrap();
    let queue = QueueName::new("orders-errors".to_string()).unwrap();

    client
        .send_message(&queue, &Message::new(Bytes::from_static(b"one")))
        .await
        .unwrap();

    let receiver = client
        .open_receiver(&queue, ReceiveMode::ReceiveAndComplete)
        .await
        .unwrap();
    let batch = receiver.receive_messages(10).await.unwrap();
    for message in &batch {
        let receipt = message.receipt_handle.clone().unwrap();
        receiver.complete_message(&receipt).await.unwrap();
    }
    receiver.close().await.unwrap();

    assert_eq!(batch.len(), 1);
    assert_eq!(client.provider_type(), ProviderType::InMemory);
    assert_eq!(
        client.get_queue_info(&queue).await.unwrap().active_message_count,
        0
    );
}

/// Verify an Azure configuration without credentials is rejected by the factory
#[test]
fn test_factory_rejects_incomplete_azure_config() {
    let result = QueueClientFactory::create_client(QueueConfig {
        provider: ProviderConfig::AzureServiceBus(AzureServiceBusConfig::default()),
        ..Default::default()
    });

    assert!(matches!(result, Err(QueueError::ConfigurationError(_))));
}
