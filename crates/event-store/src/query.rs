use chrono::{DateTime, Utc};

use crate::{EventCursor, EventRecord};

/// Default number of records fetched per page by streaming reads.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Query for reading every event of one type in storage order.
///
/// Used by projection rebuilds. A consumer that stops part-way can resume by
/// passing the cursor of the last record it processed to [`EventTypeQuery::after`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeQuery {
    /// The event type to read.
    pub event_type: String,

    /// Only events whose domain timestamp is strictly later than this.
    pub occurred_after: Option<DateTime<Utc>>,

    /// Resume strictly after this storage position.
    pub after: Option<EventCursor>,

    /// Number of records fetched per round trip.
    pub page_size: usize,
}

impl EventTypeQuery {
    /// Creates a query for all events of the given type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            occurred_after: None,
            after: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Filters to events that occurred after this timestamp (exclusive).
    pub fn occurred_after(mut self, timestamp: DateTime<Utc>) -> Self {
        self.occurred_after = Some(timestamp);
        self
    }

    /// Resumes after the given cursor.
    pub fn after(mut self, cursor: EventCursor) -> Self {
        self.after = Some(cursor);
        self
    }

    /// Sets the page size. Values below 1 are clamped to 1.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Returns true if the record satisfies the type and timestamp filters
    /// and lies after the cursor.
    pub fn matches(&self, record: &EventRecord) -> bool {
        if record.event_type != self.event_type {
            return false;
        }
        if let Some(after) = self.occurred_after
            && record.occurred_on <= after
        {
            return false;
        }
        if let Some(cursor) = self.after
            && record.cursor() <= cursor
        {
            return false;
        }
        true
    }
}
