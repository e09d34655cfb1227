//! SQL materialization: forward statements and rollback synthesis
//!
//! Builds INSERT/UPDATE/DELETE text from a row change, and inverts
//! changes for rollback: an insert rolls back as a delete, a delete as
//! an insert, an update with its images swapped.

use std::sync::Arc;
use std::time::Instant;

use crate::event::{Action, RowChange, RowImage};
use crate::monitor::Monitor;
use crate::value::quote_ident;

/// Stateless SQL generator with optional slow-operation tracking.
#[derive(Default)]
pub struct SqlGenerator {
    monitor: Option<Arc<Monitor>>,
}

impl SqlGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Forward SQL for a DML change; `None` for query events and
    /// suppressed statements.
    pub fn generate(&self, event: &RowChange) -> Option<String> {
        match event.action {
            Action::Insert => self.insert_sql(event),
            Action::Update => self.update_sql(event),
            Action::Delete => self.delete_sql(event),
            _ => None,
        }
    }

    pub fn insert_sql(&self, event: &RowChange) -> Option<String> {
        let start = Instant::now();
        if event.action != Action::Insert || event.after.is_empty() {
            return None;
        }

        let mut columns = Vec::with_capacity(event.after.len());
        let mut values = Vec::with_capacity(event.after.len());
        for (name, value) in &event.after {
            columns.push(quote_ident(name));
            values.push(value.sql_literal());
        }

        let sql = format!(
            "INSERT INTO {}.{} ({}) VALUES ({})",
            quote_ident(&event.database),
            quote_ident(&event.table),
            columns.join(", "),
            values.join(", "),
        );
        self.track("insert_sql", start, event);
        Some(sql)
    }

    pub fn update_sql(&self, event: &RowChange) -> Option<String> {
        let start = Instant::now();
        if event.action != Action::Update {
            return None;
        }

        // An empty SET suppresses the statement entirely.
        if event.after.is_empty() {
            return None;
        }

        let set: Vec<String> = event
            .after
            .iter()
            .map(|(name, value)| format!("{}={}", quote_ident(name), value.sql_literal()))
            .collect();

        let mut sql = format!(
            "UPDATE {}.{} SET {}",
            quote_ident(&event.database),
            quote_ident(&event.table),
            set.join(", "),
        );

        if !event.before.is_empty() {
            let predicate: Vec<String> = event
                .before
                .iter()
                .map(|(name, value)| format!("{}={}", quote_ident(name), value.sql_literal()))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&predicate.join(" AND "));
        }

        self.track("update_sql", start, event);
        Some(sql)
    }

    pub fn delete_sql(&self, event: &RowChange) -> Option<String> {
        let start = Instant::now();
        if event.action != Action::Delete || event.before.is_empty() {
            return None;
        }

        let predicate: Vec<String> = event
            .before
            .iter()
            .map(|(name, value)| format!("{}={}", quote_ident(name), value.sql_literal()))
            .collect();

        let sql = format!(
            "DELETE FROM {}.{} WHERE {}",
            quote_ident(&event.database),
            quote_ident(&event.table),
            predicate.join(" AND "),
        );
        self.track("delete_sql", start, event);
        Some(sql)
    }

    /// Rollback SQL: the forward SQL of the inverted change.
    pub fn rollback(&self, event: &RowChange) -> Option<String> {
        self.generate(&invert(event)?)
    }

    fn track(&self, name: &str, start: Instant, event: &RowChange) {
        if let Some(monitor) = &self.monitor {
            monitor.record_slow(name, start, &event.qualified_table());
        }
    }
}

/// Invert a DML change for rollback:
///
/// - Insert → Delete whose predicate is the inserted row
/// - Update → Update with `before` and `after` swapped
/// - Delete → Insert restoring the deleted row
///
/// Query and control events do not invert.
pub fn invert(event: &RowChange) -> Option<RowChange> {
    let (action, before, after) = match event.action {
        Action::Insert => (Action::Delete, event.after.clone(), RowImage::new()),
        Action::Update => (Action::Update, event.after.clone(), event.before.clone()),
        Action::Delete => (Action::Insert, RowImage::new(), event.before.clone()),
        _ => return None,
    };

    let mut inverted = event.clone();
    inverted.action = action;
    inverted.before = before;
    inverted.after = after;
    inverted.sql = None;
    Some(inverted)
}

/// A statement is well-formed enough when its trimmed, uppercased prefix
/// is a known DML/query keyword.
pub fn is_well_formed(sql: &str) -> bool {
    let upper = sql.trim().to_ascii_uppercase();
    ["INSERT", "UPDATE", "DELETE", "SELECT"]
        .iter()
        .any(|kw| upper.starts_with(kw))
}
