//! Structured queries over one user's staged messages.
//!
//! Queries are composed in a fixed order: owner scope, free-text search,
//! ordering, paging. Ordering applies only when both a field and a direction
//! are given, and paging only when both an offset and a limit are given.

use crate::staging::QueueMessage;
use crate::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Search Input
// ============================================================================

/// Raw search, sort and paging request as supplied by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchProperties {
    pub search: Option<String>,
    pub sort: Option<String>,
    pub order: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl SearchProperties {
    /// Plain page of a partition in native order
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_sort(mut self, sort: impl Into<String>, order: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self.order = Some(order.into());
        self
    }

    pub fn with_paging(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Ordering
// ============================================================================

/// Staged message field a query can sort by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Id,
    Queue,
    Body,
    OriginatingEndpoint,
    ProcessingEndpoint,
    Exception,
    ExceptionType,
}

impl SortField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Queue => "queue",
            Self::Body => "body",
            Self::OriginatingEndpoint => "originatingEndpoint",
            Self::ProcessingEndpoint => "processingEndpoint",
            Self::Exception => "exception",
            Self::ExceptionType => "exceptionType",
        }
    }

    /// Value of this field on a staged message
    pub fn value<'a>(&self, message: &'a QueueMessage) -> &'a str {
        match self {
            Self::Id => message.id.as_str(),
            Self::Queue => message.queue.as_str(),
            Self::Body => &message.body,
            Self::OriginatingEndpoint => &message.originating_endpoint,
            Self::ProcessingEndpoint => &message.processing_endpoint,
            Self::Exception => &message.exception,
            Self::ExceptionType => &message.exception_type,
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SortField {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let candidates = [
            Self::Id,
            Self::Queue,
            Self::Body,
            Self::OriginatingEndpoint,
            Self::ProcessingEndpoint,
            Self::Exception,
            Self::ExceptionType,
        ];

        candidates
            .into_iter()
            .find(|field| field.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QueryError::UnknownSortField {
                field: s.to_string(),
            })
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Asc),
            "desc" | "descending" => Ok(Self::Desc),
            _ => Err(QueryError::UnknownSortOrder {
                order: s.to_string(),
            }),
        }
    }
}

/// Errors raised while interpreting search properties
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Unknown sort field: '{field}'")]
    UnknownSortField { field: String },

    #[error("Unknown sort order: '{order}' (expected 'asc' or 'desc')")]
    UnknownSortOrder { order: String },
}

// ============================================================================
// Query
// ============================================================================

/// A composed query scoped to one owner's partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    owner: UserId,
    search: Option<String>,
    ordering: Option<(SortField, SortOrder)>,
    paging: Option<(usize, usize)>,
}

impl MessageQuery {
    /// Start a query over `owner`'s partition
    pub fn for_owner(owner: UserId) -> Self {
        Self {
            owner,
            search: None,
            ordering: None,
            paging: None,
        }
    }

    /// Restrict to messages whose searchable fields contain `term`
    pub fn with_search(mut self, term: Option<&str>) -> Self {
        self.search = term.filter(|t| !t.is_empty()).map(str::to_string);
        self
    }

    /// Order results; a no-op unless both parts are present
    pub fn with_ordering(mut self, field: Option<SortField>, order: Option<SortOrder>) -> Self {
        self.ordering = match (field, order) {
            (Some(field), Some(order)) => Some((field, order)),
            _ => None,
        };
        self
    }

    /// Page results; a no-op unless both parts are present
    pub fn with_paging(mut self, offset: Option<usize>, limit: Option<usize>) -> Self {
        self.paging = match (offset, limit) {
            (Some(offset), Some(limit)) => Some((offset, limit)),
            _ => None,
        };
        self
    }

    /// Build a full query from caller-supplied search properties
    pub fn from_search(owner: UserId, search: &SearchProperties) -> Result<Self, QueryError> {
        let field = search.sort.as_deref().map(str::parse).transpose()?;
        let order = search.order.as_deref().map(str::parse).transpose()?;

        Ok(Self::for_owner(owner)
            .with_search(search.search.as_deref())
            .with_ordering(field, order)
            .with_paging(search.offset, search.limit))
    }

    /// Build a counting query; only the search text is honoured
    pub fn for_count(owner: UserId, search: Option<&SearchProperties>) -> Self {
        Self::for_owner(owner).with_search(search.and_then(|s| s.search.as_deref()))
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn ordering(&self) -> Option<(SortField, SortOrder)> {
        self.ordering
    }

    pub fn paging(&self) -> Option<(usize, usize)> {
        self.paging
    }

    /// True when the message is in scope and matches the search text
    pub fn matches(&self, message: &QueueMessage) -> bool {
        if message.user_id != self.owner {
            return false;
        }

        match &self.search {
            None => true,
            Some(term) => message
                .searchable_fields()
                .iter()
                .any(|field| field.contains(term.as_str())),
        }
    }

    /// Apply the query to messages given in the store's native order
    pub fn execute<I>(&self, messages: I) -> Vec<QueueMessage>
    where
        I: IntoIterator<Item = QueueMessage>,
    {
        let mut selected: Vec<QueueMessage> =
            messages.into_iter().filter(|m| self.matches(m)).collect();

        if let Some((field, order)) = self.ordering {
            selected.sort_by(|a, b| {
                let ordering = field.value(a).cmp(field.value(b));
                match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
        }

        match self.paging {
            Some((offset, limit)) => selected.into_iter().skip(offset).take(limit).collect(),
            None => selected,
        }
    }

    /// Count matching messages, ignoring ordering and paging
    pub fn count<'a, I>(&self, messages: I) -> u64
    where
        I: IntoIterator<Item = &'a QueueMessage>,
    {
        messages.into_iter().filter(|m| self.matches(m)).count() as u64
    }
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
