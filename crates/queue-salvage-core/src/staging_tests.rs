//! Tests for the staged message model and shared batch rules.

use super::*;
use bytes::Bytes;

fn user(name: &str) -> UserId {
    UserId::new(name.to_string()).unwrap()
}

fn staged(id: &str, owner: &str) -> QueueMessage {
    QueueMessage {
        id: id.parse().unwrap(),
        user_id: user(owner),
        queue: QueueName::new("orders-errors".to_string()).unwrap(),
        processing_endpoint: "orders".to_string(),
        originating_endpoint: "checkout".to_string(),
        body: "{\"orderId\":42}".to_string(),
        exception: "Timeout talking to inventory".to_string(),
        exception_type: "System.TimeoutException".to_string(),
        original_message: Message::new(Bytes::from_static(b"{\"orderId\":42}")),
        is_read_only: false,
    }
}

mod model_tests {
    use super::*;

    /// Verify staged messages serialize with camelCase field names
    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(staged("m-1", "alice")).unwrap();

        assert_eq!(json["id"], "m-1");
        assert_eq!(json["userId"], "alice");
        assert_eq!(json["processingEndpoint"], "orders");
        assert_eq!(json["exceptionType"], "System.TimeoutException");
        assert_eq!(json["isReadOnly"], false);
        assert!(json["originalMessage"].is_object());
    }

    /// Verify the searchable fields cover body, endpoints and exception details
    #[test]
    fn test_searchable_fields() {
        let message = staged("m-1", "alice");
        let fields = message.searchable_fields();

        assert!(fields.contains(&"orders"));
        assert!(fields.contains(&"checkout"));
        assert!(fields.contains(&"System.TimeoutException"));
        assert!(!fields.contains(&"orders-errors"));
    }
}

mod batch_rule_tests {
    use super::*;

    /// Verify a batch within the limit for one owner is accepted
    #[test]
    fn test_valid_batch_accepted() {
        let batch = vec![staged("m-1", "alice"), staged("m-2", "alice")];
        assert!(validate_create_batch(&user("alice"), &batch).is_ok());
    }

    /// Verify a batch mixing partitions is refused
    #[test]
    fn test_foreign_partition_rejected() {
        let batch = vec![staged("m-1", "alice"), staged("m-2", "bob")];
        let result = validate_create_batch(&user("alice"), &batch);
        assert!(matches!(result, Err(StoreError::WriteFailed { .. })));
    }

    /// Verify duplicate ids within one batch are refused
    #[test]
    fn test_duplicate_ids_rejected() {
        let batch = vec![staged("m-1", "alice"), staged("m-1", "alice")];
        assert!(validate_create_batch(&user("alice"), &batch).is_err());
    }

    /// Verify batches above the operation limit are refused
    #[test]
    fn test_oversized_batches_rejected() {
        let batch: Vec<QueueMessage> = (0..=MAX_BATCH_OPERATIONS)
            .map(|i| staged(&format!("m-{}", i), "alice"))
            .collect();
        assert!(validate_create_batch(&user("alice"), &batch).is_err());

        let ids: Vec<MessageId> = batch.iter().map(|m| m.id.clone()).collect();
        assert!(validate_delete_batch(&ids).is_err());
        assert!(validate_delete_batch(&ids[..MAX_BATCH_OPERATIONS]).is_ok());
    }

    /// Verify write and read failures are retryable but bad queries are not
    #[test]
    fn test_error_transience() {
        assert!(StoreError::write("create_batch", "disk full").is_transient());
        assert!(StoreError::ReadFailed {
            message: "io".to_string()
        }
        .is_transient());
        assert!(!StoreError::InvalidQuery(QueryError::UnknownSortOrder {
            order: "sideways".to_string()
        })
        .is_transient());
    }
}
