//! Read models behind the triage views: the error-queue overview and the
//! per-user list of staged messages.

use crate::broker::{BrokerClient, QueueInfo};
use crate::query::SearchProperties;
use crate::staging::{InvestigationCount, QueueMessage, StagingStore};
use crate::{QueueName, SalvageError, UserId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// One page of a user's staged messages with the totals a pager needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListing {
    pub messages: Vec<QueueMessage>,
    /// Messages matching the search term, ignoring paging
    pub count: u64,
    /// Every message staged by the user
    pub unfiltered_count: u64,
}

/// An error queue with its broker depth and what operators currently hold from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOverview {
    pub name: String,
    pub message_count: u64,
    pub under_investigation: u64,
    pub investigations: Vec<InvestigationCount>,
}

/// Queries combining broker state with staging store state
pub struct TriageQueries {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn StagingStore>,
}

impl TriageQueries {
    pub fn new(broker: Arc<dyn BrokerClient>, store: Arc<dyn StagingStore>) -> Self {
        Self { broker, store }
    }

    /// Page of `owner`'s staged messages with filtered and unfiltered counts
    pub async fn list_messages(
        &self,
        owner: &UserId,
        search: &SearchProperties,
    ) -> Result<MessageListing, SalvageError> {
        let filter = SearchProperties {
            search: search.search.clone(),
            ..Default::default()
        };

        let (messages, count, unfiltered_count) = tokio::try_join!(
            self.store.query(owner, search),
            self.store.count(owner, Some(&filter)),
            self.store.count(owner, None),
        )?;

        debug!(
            user_id = %owner,
            returned = messages.len(),
            count,
            unfiltered_count,
            "Listed staged messages"
        );
        Ok(MessageListing {
            messages,
            count,
            unfiltered_count,
        })
    }

    /// Every error queue, ordered by name, with staged counts per user
    pub async fn queue_overview(&self) -> Result<Vec<QueueOverview>, SalvageError> {
        let queues = self.broker.list_error_queues().await?;
        let mut by_queue: BTreeMap<String, Vec<InvestigationCount>> = BTreeMap::new();
        for count in self.store.count_by_queue().await? {
            by_queue.entry(count.queue.clone()).or_default().push(count);
        }

        Ok(queues
            .into_iter()
            .map(|QueueInfo { name, message_count }| {
                let investigations = by_queue.remove(&name).unwrap_or_default();
                QueueOverview {
                    under_investigation: investigations.iter().map(|c| c.message_count).sum(),
                    name,
                    message_count,
                    investigations,
                }
            })
            .collect())
    }

    /// Read-only copies of the head of `queue`, leaving the broker untouched
    pub async fn peek_queue(
        &self,
        owner: &UserId,
        queue: &QueueName,
        quantity: u64,
    ) -> Result<Vec<QueueMessage>, SalvageError> {
        Ok(self.broker.peek(queue, quantity, owner).await?)
    }
}

#[cfg(test)]
#[path = "triage_tests.rs"]
mod tests;
