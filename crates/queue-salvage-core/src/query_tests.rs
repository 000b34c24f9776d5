//! Tests for staging-store query composition.

use super::*;
use crate::{Message, QueueName};
use bytes::Bytes;

fn user(name: &str) -> UserId {
    UserId::new(name.to_string()).unwrap()
}

fn staged(id: &str, owner: &str, body: &str, exception_type: &str) -> QueueMessage {
    QueueMessage {
        id: id.parse().unwrap(),
        user_id: user(owner),
        queue: QueueName::new("orders-errors".to_string()).unwrap(),
        processing_endpoint: "orders".to_string(),
        originating_endpoint: "checkout".to_string(),
        body: body.to_string(),
        exception: "failure".to_string(),
        exception_type: exception_type.to_string(),
        original_message: Message::new(Bytes::from(body.to_string())),
        is_read_only: false,
    }
}

fn partition() -> Vec<QueueMessage> {
    vec![
        staged("c", "alice", "third body", "System.TimeoutException"),
        staged("a", "alice", "first body", "System.ArgumentException"),
        staged("b", "alice", "second body", "System.TimeoutException"),
        staged("z", "bob", "other user", "System.TimeoutException"),
    ]
}

fn ids(messages: &[QueueMessage]) -> Vec<&str> {
    messages.iter().map(|m| m.id.as_str()).collect()
}

mod parse_tests {
    use super::*;

    /// Verify sort fields parse by their camelCase names, ignoring case
    #[test]
    fn test_sort_field_names() {
        assert_eq!("exceptionType".parse::<SortField>().unwrap(), SortField::ExceptionType);
        assert_eq!("BODY".parse::<SortField>().unwrap(), SortField::Body);
        assert_eq!(SortField::ProcessingEndpoint.to_string(), "processingEndpoint");
        assert!(matches!(
            "unknown".parse::<SortField>(),
            Err(QueryError::UnknownSortField { .. })
        ));
    }

    /// Verify sort orders accept short and long spellings
    #[test]
    fn test_sort_order_names() {
        assert_eq!("asc".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("Descending".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("up".parse::<SortOrder>().is_err());
    }

    /// Verify invalid sort values surface as errors when building a query
    #[test]
    fn test_from_search_rejects_unknown_values() {
        let search = SearchProperties::default().with_sort("colour", "asc");
        assert!(MessageQuery::from_search(user("alice"), &search).is_err());
    }
}

mod composition_tests {
    use super::*;

    /// Verify ordering requires both a field and a direction
    #[test]
    fn test_ordering_needs_both_parts() {
        let query = MessageQuery::for_owner(user("alice")).with_ordering(Some(SortField::Id), None);
        assert_eq!(query.ordering(), None);

        let result = query.execute(partition());
        assert_eq!(ids(&result), vec!["c", "a", "b"]);
    }

    /// Verify paging requires both an offset and a limit
    #[test]
    fn test_paging_needs_both_parts() {
        let query = MessageQuery::for_owner(user("alice")).with_paging(Some(1), None);
        assert_eq!(query.paging(), None);
        assert_eq!(query.execute(partition()).len(), 3);
    }

    /// Verify an empty search term is treated as no search
    #[test]
    fn test_empty_search_ignored() {
        let query = MessageQuery::for_owner(user("alice")).with_search(Some(""));
        assert_eq!(query.search(), None);
    }
}

mod execution_tests {
    use super::*;

    /// Verify results never leave the owner's partition
    #[test]
    fn test_owner_scope() {
        let query = MessageQuery::for_owner(user("bob"));
        assert_eq!(ids(&query.execute(partition())), vec!["z"]);
    }

    /// Verify search matches any searchable field, case-sensitively
    #[test]
    fn test_search_any_field() {
        let by_type = MessageQuery::for_owner(user("alice")).with_search(Some("Timeout"));
        assert_eq!(ids(&by_type.execute(partition())), vec!["c", "b"]);

        let by_body = MessageQuery::for_owner(user("alice")).with_search(Some("first"));
        assert_eq!(ids(&by_body.execute(partition())), vec!["a"]);

        let wrong_case = MessageQuery::for_owner(user("alice")).with_search(Some("timeout"));
        assert!(wrong_case.execute(partition()).is_empty());
    }

    /// Verify search, ordering and paging compose in that order
    #[test]
    fn test_search_sort_page() {
        let search = SearchProperties::default()
            .with_search("Timeout")
            .with_sort("id", "desc")
            .with_paging(1, 5);
        let query = MessageQuery::from_search(user("alice"), &search).unwrap();

        assert_eq!(ids(&query.execute(partition())), vec!["b"]);
    }

    /// Verify ascending ordering by a text field
    #[test]
    fn test_ascending_order() {
        let search = SearchProperties::default().with_sort("body", "asc");
        let query = MessageQuery::from_search(user("alice"), &search).unwrap();

        assert_eq!(ids(&query.execute(partition())), vec!["a", "b", "c"]);
    }

    /// Verify offsets past the end yield an empty page
    #[test]
    fn test_offset_past_end() {
        let query = MessageQuery::for_owner(user("alice")).with_paging(Some(10), Some(5));
        assert!(query.execute(partition()).is_empty());
    }

    /// Verify counting ignores ordering and paging
    #[test]
    fn test_count_ignores_paging() {
        let search = SearchProperties::page(0, 1).with_search("Timeout");
        let query = MessageQuery::for_count(user("alice"), Some(&search));
        let messages = partition();

        assert_eq!(query.count(&messages), 2);
        assert_eq!(MessageQuery::for_count(user("alice"), None).count(&messages), 3);
    }
}
