//! Forward SQL emission

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::event::RowChange;
use crate::handler::{ActionFilter, Handler, SharedWriter};
use crate::sql::SqlGenerator;

/// Writes forward SQL, one `;`-terminated statement per line, preceded by
/// comment lines describing the event.
pub struct SqlHandler {
    generator: SqlGenerator,
    filter: ActionFilter,
    writer: SharedWriter,
    emitted: AtomicU64,
}

impl SqlHandler {
    pub fn new(writer: SharedWriter, filter: ActionFilter) -> Self {
        Self {
            generator: SqlGenerator::new(),
            filter,
            writer,
            emitted: AtomicU64::new(0),
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Handler for SqlHandler {
    fn name(&self) -> &'static str {
        "sql"
    }

    async fn accept(&self, event: &RowChange) -> Result<()> {
        if !event.is_dml() || !self.filter.wants(event.action) {
            return Ok(());
        }

        // Workers materialize forward SQL before dispatch; regenerate only
        // when running without the pipeline.
        let sql = match &event.sql {
            Some(sql) => sql.clone(),
            None => match self.generator.generate(event) {
                Some(sql) => sql,
                None => return Ok(()),
            },
        };

        let mut w = self.writer.lock();
        writeln!(
            w,
            "-- {} at {} (log_pos={})",
            event.action,
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            event.log_pos
        )
        .and_then(|_| {
            writeln!(
                w,
                "-- Database: {}, Table: {}",
                event.database, event.table
            )
        })
        .and_then(|_| writeln!(w, "{};", sql))
        .map_err(|e| Error::handler("sql", e.to_string()))?;

        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        self.writer
            .lock()
            .flush()
            .map_err(|e| Error::handler("sql", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Action, RowChange};
    use crate::handler::boxed_writer;
    use crate::value::ColumnValue;
    use std::sync::Arc;

    fn insert_event() -> RowChange {
        let mut ev = RowChange::new(Action::Insert, "testdb", "users");
        ev.after.insert("id".into(), ColumnValue::SignedInt(1));
        ev.log_pos = 4096;
        ev
    }

    struct Capture(Arc<parking_lot::Mutex<Vec<u8>>>);
    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture() -> (SharedWriter, Arc<parking_lot::Mutex<Vec<u8>>>) {
        let buf = Arc::new(parking_lot::Mutex::new(Vec::new()));
        (boxed_writer(Capture(buf.clone())), buf)
    }

    #[tokio::test]
    async fn test_emits_statement_with_comments() {
        let (writer, buf) = capture();
        let handler = SqlHandler::new(writer, ActionFilter::default());

        handler.accept(&insert_event()).await.unwrap();
        handler.finalize().await.unwrap();

        let out = String::from_utf8(buf.lock().clone()).unwrap();
        assert!(out.contains("-- INSERT at"));
        assert!(out.contains("log_pos=4096"));
        assert!(out.contains("-- Database: testdb, Table: users"));
        assert!(out.contains("INSERT INTO `testdb`.`users` (`id`) VALUES (1);"));
        assert_eq!(handler.emitted(), 1);
    }

    #[tokio::test]
    async fn test_prefers_pre_materialized_sql() {
        let (writer, buf) = capture();
        let handler = SqlHandler::new(writer, ActionFilter::default());

        let mut ev = insert_event();
        ev.sql = Some("INSERT INTO `x`.`y` (`z`) VALUES (9)".into());
        handler.accept(&ev).await.unwrap();

        let out = String::from_utf8(buf.lock().clone()).unwrap();
        assert!(out.contains("INSERT INTO `x`.`y` (`z`) VALUES (9);"));
    }

    #[tokio::test]
    async fn test_skips_query_events_and_filtered_actions() {
        let (writer, buf) = capture();
        let handler = SqlHandler::new(writer, ActionFilter::new(&[Action::Delete]));

        let mut query = RowChange::new(Action::Query, "db", "");
        query.sql = Some("SELECT 1".into());
        handler.accept(&query).await.unwrap();
        handler.accept(&insert_event()).await.unwrap(); // filtered out

        assert!(buf.lock().is_empty());
        assert_eq!(handler.emitted(), 0);
    }
}
