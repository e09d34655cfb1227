//! Row-change event representation
//!
//! One unified event shape for everything the decoder emits: row images
//! for INSERT/UPDATE/DELETE, and raw SQL text for query/DDL events.
//! Column maps preserve insertion order so a given row always renders its
//! columns the same way within a run.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::ColumnValue;

/// Ordered column-name → value map for a row image.
pub type RowImage = IndexMap<String, ColumnValue>;

/// The logical action an event represents.
///
/// Row events carry `Insert`/`Update`/`Delete`; query events derive their
/// action from the leading SQL keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Begin,
    Commit,
    Query,
    Other,
}

impl Action {
    /// Derive the action from the keyword prefix of a SQL statement.
    pub fn from_sql(sql: &str) -> Self {
        let upper = sql.trim_start().to_ascii_uppercase();
        for (prefix, action) in [
            ("INSERT", Action::Insert),
            ("UPDATE", Action::Update),
            ("DELETE", Action::Delete),
            ("CREATE", Action::Create),
            ("DROP", Action::Drop),
            ("ALTER", Action::Alter),
            ("BEGIN", Action::Begin),
            ("COMMIT", Action::Commit),
        ] {
            if upper.starts_with(prefix) {
                return action;
            }
        }
        Action::Query
    }

    /// Parse a user-supplied action name (for `--action` filters).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Some(Action::Insert),
            "UPDATE" => Some(Action::Update),
            "DELETE" => Some(Action::Delete),
            _ => None,
        }
    }

    /// True for row-modifying actions.
    pub fn is_dml(&self) -> bool {
        matches!(self, Action::Insert | Action::Update | Action::Delete)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Insert => "INSERT",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
            Action::Create => "CREATE",
            Action::Drop => "DROP",
            Action::Alter => "ALTER",
            Action::Begin => "BEGIN",
            Action::Commit => "COMMIT",
            Action::Query => "QUERY",
            Action::Other => "OTHER",
        };
        f.write_str(s)
    }
}

/// A reconstructed logical change from the replication log.
#[derive(Debug, Clone, Serialize)]
pub struct RowChange {
    /// Wall-clock timestamp from the event header (second resolution).
    pub timestamp: DateTime<Utc>,
    /// Raw replication event kind name (e.g. `WriteRowsV2`).
    pub event_type: String,
    /// Originating server identifier.
    pub server_id: u32,
    /// Byte offset of the event within the current log file.
    pub log_pos: u32,
    /// Name of the log file the event came from.
    pub log_file: String,
    pub database: String,
    pub table: String,
    pub action: Action,
    /// Raw SQL text for query/DDL events, or materialized SQL for row events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Row image before the change (UPDATE/DELETE).
    pub before: RowImage,
    /// Row image after the change (INSERT/UPDATE).
    pub after: RowImage,
    /// Raw event bytes, kept only for oversize detection.
    #[serde(skip)]
    pub raw: Bytes,
}

impl RowChange {
    pub fn new(action: Action, database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            event_type: String::new(),
            server_id: 0,
            log_pos: 0,
            log_file: String::new(),
            database: database.into(),
            table: table.into(),
            action,
            sql: None,
            before: RowImage::new(),
            after: RowImage::new(),
            raw: Bytes::new(),
        }
    }

    pub fn with_before(mut self, before: RowImage) -> Self {
        self.before = before;
        self
    }

    pub fn with_after(mut self, after: RowImage) -> Self {
        self.after = after;
        self
    }

    /// `database.table`, the route-filter input.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    pub fn is_dml(&self) -> bool {
        self.action.is_dml()
    }

    /// Size of the raw event payload in bytes.
    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_sql() {
        assert_eq!(Action::from_sql("INSERT INTO t VALUES (1)"), Action::Insert);
        assert_eq!(Action::from_sql("  update t set a=1"), Action::Update);
        assert_eq!(Action::from_sql("DELETE FROM t"), Action::Delete);
        assert_eq!(Action::from_sql("CREATE TABLE t (id INT)"), Action::Create);
        assert_eq!(Action::from_sql("DROP TABLE t"), Action::Drop);
        assert_eq!(Action::from_sql("alter table t add c int"), Action::Alter);
        assert_eq!(Action::from_sql("BEGIN"), Action::Begin);
        assert_eq!(Action::from_sql("COMMIT"), Action::Commit);
        assert_eq!(Action::from_sql("SELECT 1"), Action::Query);
        assert_eq!(Action::from_sql("FLUSH LOGS"), Action::Query);
    }

    #[test]
    fn test_action_parse() {
        assert_eq!(Action::parse("insert"), Some(Action::Insert));
        assert_eq!(Action::parse(" UPDATE "), Some(Action::Update));
        assert_eq!(Action::parse("DELETE"), Some(Action::Delete));
        assert_eq!(Action::parse("TRUNCATE"), None);
    }

    #[test]
    fn test_action_display() {
        assert_eq!(Action::Insert.to_string(), "INSERT");
        assert_eq!(Action::Query.to_string(), "QUERY");
    }

    #[test]
    fn test_row_change_invariants() {
        let mut after = RowImage::new();
        after.insert("col_0".to_string(), ColumnValue::SignedInt(1));

        let ev = RowChange::new(Action::Insert, "testdb", "users").with_after(after);
        assert!(ev.before.is_empty());
        assert!(!ev.after.is_empty());
        assert!(ev.is_dml());
        assert_eq!(ev.qualified_table(), "testdb.users");
    }

    #[test]
    fn test_row_image_preserves_insertion_order() {
        let mut image = RowImage::new();
        image.insert("col_0".to_string(), ColumnValue::SignedInt(1));
        image.insert("col_1".to_string(), ColumnValue::Text("John".into()));
        image.insert("col_2".to_string(), ColumnValue::Null);

        let keys: Vec<&String> = image.keys().collect();
        assert_eq!(keys, ["col_0", "col_1", "col_2"]);
    }

    #[test]
    fn test_serialize_skips_raw() {
        let ev = RowChange::new(Action::Query, "db", "");
        let json = serde_json::to_string(&ev).unwrap();
        assert!(!json.contains("raw"));
        assert!(json.contains("\"action\":\"QUERY\""));
    }
}
