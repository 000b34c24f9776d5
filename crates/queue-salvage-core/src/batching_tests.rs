//! Tests for batching helpers.

use super::*;
use std::sync::{Arc, Mutex};

mod request_size_tests {
    use super::*;

    /// Verify request sizes step down to the remainder and then stop
    #[test]
    fn test_request_sizes() {
        assert_eq!(next_request_size(250, 0, 100), 100);
        assert_eq!(next_request_size(250, 200, 100), 50);
        assert_eq!(next_request_size(250, 250, 100), 0);
        assert_eq!(next_request_size(5, 0, 100), 5);
        assert_eq!(next_request_size(0, 0, 100), 0);
    }

    /// Verify a zero batch size still makes progress
    #[test]
    fn test_zero_batch_size() {
        assert_eq!(next_request_size(3, 0, 0), 1);
        assert_eq!(batch_count(3, 0), 3);
    }

    /// Verify batch counts round up
    #[test]
    fn test_batch_count() {
        assert_eq!(batch_count(0, 100), 0);
        assert_eq!(batch_count(100, 100), 1);
        assert_eq!(batch_count(101, 100), 2);
    }
}

mod execute_tests {
    use super::*;

    /// Verify items are split into consecutive batches in order
    #[tokio::test]
    async fn test_consecutive_batches() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let outcomes = execute((1..=7).collect::<Vec<u32>>(), 3, |batch| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(batch.clone());
                Ok::<usize, String>(batch.len())
            }
        })
        .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
        );
        assert_eq!(outcomes, vec![Ok(3), Ok(3), Ok(1)]);
    }

    /// Verify a failing batch does not stop later batches
    #[tokio::test]
    async fn test_failure_continues() {
        let outcomes = execute(vec!["a", "b", "c"], 1, |batch| async move {
            if batch[0] == "b" {
                Err(format!("{} failed", batch[0]))
            } else {
                Ok(batch[0])
            }
        })
        .await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1], Err("b failed".to_string()));
        assert!(outcomes[2].is_ok());
    }

    /// Verify no batches run for no items
    #[tokio::test]
    async fn test_empty_input() {
        let outcomes =
            execute(Vec::<u8>::new(), 10, |_| async { Ok::<(), String>(()) }).await;
        assert!(outcomes.is_empty());
    }
}

mod collect_tests {
    use super::*;

    /// Verify the number and size of fetches for a full source
    #[tokio::test]
    async fn test_fetch_sizes() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorder = requests.clone();

        let items = collect_in_batches(25, 10, |n| {
            let recorder = recorder.clone();
            async move {
                recorder.lock().unwrap().push(n);
                Ok::<Vec<u64>, String>((0..n).collect())
            }
        })
        .await
        .unwrap();

        assert_eq!(items.len(), 25);
        assert_eq!(*requests.lock().unwrap(), vec![10, 10, 5]);
    }

    /// Verify collection stops when the source runs dry
    #[tokio::test]
    async fn test_stops_on_empty_fetch() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();

        let items = collect_in_batches(100, 10, |_| {
            let counter = counter.clone();
            async move {
                let mut calls = counter.lock().unwrap();
                *calls += 1;
                if *calls == 1 {
                    Ok::<Vec<u8>, String>(vec![1, 2, 3])
                } else {
                    Ok(Vec::new())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    /// Verify a fetch error is returned to the caller
    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let result = collect_in_batches(10, 5, |_| async {
            Err::<Vec<u8>, String>("broker offline".to_string())
        })
        .await;

        assert_eq!(result, Err("broker offline".to_string()));
    }
}
