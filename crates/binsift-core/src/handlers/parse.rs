//! Streaming event display

use std::io::Write;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::event::RowChange;
use crate::handler::{ActionFilter, Handler, SharedWriter};

/// Prints each event as one JSON line.
pub struct ParseHandler {
    writer: SharedWriter,
    filter: ActionFilter,
}

impl ParseHandler {
    pub fn new(writer: SharedWriter, filter: ActionFilter) -> Self {
        Self { writer, filter }
    }
}

#[async_trait]
impl Handler for ParseHandler {
    fn name(&self) -> &'static str {
        "parse"
    }

    async fn accept(&self, event: &RowChange) -> Result<()> {
        if !self.filter.wants(event.action) {
            return Ok(());
        }

        let line = serde_json::to_string(event)?;
        writeln!(self.writer.lock(), "{}", line)
            .map_err(|e| Error::handler("parse", e.to_string()))
    }

    async fn finalize(&self) -> Result<()> {
        self.writer
            .lock()
            .flush()
            .map_err(|e| Error::handler("parse", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;
    use crate::handler::boxed_writer;
    use crate::value::ColumnValue;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Capture(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_json_lines() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handler = ParseHandler::new(
            boxed_writer(Capture(buf.clone())),
            ActionFilter::default(),
        );

        let mut ev = RowChange::new(Action::Insert, "db", "t");
        ev.after.insert("col_0".into(), ColumnValue::SignedInt(1));
        handler.accept(&ev).await.unwrap();
        handler.accept(&RowChange::new(Action::Delete, "db", "t")).await.unwrap();

        let out = String::from_utf8(buf.lock().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["action"], "INSERT");
        assert_eq!(parsed["after"]["col_0"], 1);
    }

    #[tokio::test]
    async fn test_action_filter_applies() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handler = ParseHandler::new(
            boxed_writer(Capture(buf.clone())),
            ActionFilter::new(&[Action::Delete]),
        );

        handler.accept(&RowChange::new(Action::Insert, "db", "t")).await.unwrap();
        assert!(buf.lock().is_empty());
    }
}
