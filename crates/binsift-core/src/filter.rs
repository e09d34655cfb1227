//! Route filter: pattern acceptance and worker partitioning
//!
//! Combines zero or more compiled range patterns with OR semantics and
//! assigns each accepted event to a worker so that events sharing a
//! partition key are processed in order.

use crate::event::RowChange;
use crate::pattern::{worker_id, PatternError, RangeMatcher};

/// Filter over `schema.table` plus partition-key derivation.
#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    matchers: Vec<RangeMatcher>,
}

impl RouteFilter {
    /// Compile a filter from pattern strings. An empty list accepts
    /// everything.
    pub fn new(patterns: &[String]) -> Result<Self, PatternError> {
        let matchers = patterns
            .iter()
            .map(|p| RangeMatcher::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { matchers })
    }

    /// Accept when no patterns are configured, or any pattern matches the
    /// qualified `schema.table` name.
    pub fn accept(&self, event: &RowChange) -> bool {
        if self.matchers.is_empty() {
            return true;
        }
        let qualified = event.qualified_table();
        self.matchers.iter().any(|m| m.matches(&qualified))
    }

    /// Partition key for an event: the stringified first after-image value,
    /// else the first before-image value, else empty. An approximation of
    /// the primary key that is stable for a given table.
    pub fn key_of(event: &RowChange) -> String {
        event
            .after
            .values()
            .next()
            .or_else(|| event.before.values().next())
            .map(|v| v.plain_string())
            .unwrap_or_default()
    }

    /// Worker index for an event, in `[0, workers)`.
    pub fn partition(&self, event: &RowChange, workers: usize) -> usize {
        worker_id(&event.table, &Self::key_of(event), workers)
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }
}
