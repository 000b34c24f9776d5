//! Fixed-size batching of work.
//!
//! Two shapes of batching are used across the pipeline: splitting a list of
//! items into consecutive batches and running an action per batch, and
//! pulling a requested quantity from a source in bounded requests.

use std::fmt::Display;
use std::future::Future;
use tracing::debug;

/// Size of the next request when `received` of `quantity` items have arrived
///
/// Returns zero once the quantity has been reached.
pub fn next_request_size(quantity: u64, received: u64, batch_size: u64) -> u64 {
    quantity.saturating_sub(received).min(batch_size.max(1))
}

/// Number of batches `len` items split into
pub fn batch_count(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size.max(1))
}

/// Run `action` over consecutive batches of `items`, in order.
///
/// Every batch is attempted; a failed batch does not stop later ones. The
/// outcome of each batch is returned in batch order.
pub async fn execute<T, R, E, F, Fut>(
    items: Vec<T>,
    batch_size: usize,
    mut action: F,
) -> Vec<Result<R, E>>
where
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: Display,
{
    let batch_size = batch_size.max(1);
    let mut outcomes = Vec::with_capacity(batch_count(items.len(), batch_size));
    let mut remaining = items.into_iter().peekable();

    while remaining.peek().is_some() {
        let batch: Vec<T> = remaining.by_ref().take(batch_size).collect();
        let outcome = action(batch).await;

        if let Err(e) = &outcome {
            debug!(
                batch_index = outcomes.len(),
                error = %e,
                "Batch failed; continuing with remaining batches"
            );
        }
        outcomes.push(outcome);
    }

    outcomes
}

/// Pull up to `quantity` items from `fetch`, asking for at most `batch_size` per call.
///
/// Stops early when a call returns nothing. The first error aborts the loop.
pub async fn collect_in_batches<T, E, F, Fut>(
    quantity: u64,
    batch_size: u64,
    mut fetch: F,
) -> Result<Vec<T>, E>
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<Vec<T>, E>>,
{
    let mut collected = Vec::new();

    loop {
        let request = next_request_size(quantity, collected.len() as u64, batch_size);
        if request == 0 {
            break;
        }

        let batch = fetch(request).await?;
        if batch.is_empty() {
            break;
        }
        collected.extend(batch);
    }

    Ok(collected)
}

#[cfg(test)]
#[path = "batching_tests.rs"]
mod tests;
