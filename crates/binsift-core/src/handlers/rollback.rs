//! Rollback SQL emission

use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::RowChange;
use crate::handler::{ActionFilter, Handler, SharedWriter};
use crate::sql::SqlGenerator;

/// Emits rollback SQL per event, or buffers everything for a single bulk
/// flush at finalize.
pub struct RollbackHandler {
    generator: SqlGenerator,
    filter: ActionFilter,
    writer: SharedWriter,
    bulk: bool,
    buffer: Mutex<Vec<String>>,
}

impl RollbackHandler {
    pub fn new(writer: SharedWriter, filter: ActionFilter, bulk: bool) -> Self {
        Self {
            generator: SqlGenerator::new(),
            filter,
            writer,
            bulk,
            buffer: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Handler for RollbackHandler {
    fn name(&self) -> &'static str {
        "rollback-sql"
    }

    async fn accept(&self, event: &RowChange) -> Result<()> {
        if !event.is_dml() || !self.filter.wants(event.action) {
            return Ok(());
        }

        let Some(sql) = self.generator.rollback(event) else {
            return Ok(());
        };

        if self.bulk {
            self.buffer.lock().push(sql);
        } else {
            writeln!(self.writer.lock(), "{};", sql)
                .map_err(|e| Error::handler("rollback-sql", e.to_string()))?;
        }
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        let mut w = self.writer.lock();
        if self.bulk {
            let buffer = std::mem::take(&mut *self.buffer.lock());
            if !buffer.is_empty() {
                writeln!(w, "-- Bulk rollback: {} statements", buffer.len())
                    .map_err(|e| Error::handler("rollback-sql", e.to_string()))?;
                for sql in buffer {
                    writeln!(w, "{};", sql)
                        .map_err(|e| Error::handler("rollback-sql", e.to_string()))?;
                }
            }
        }
        w.flush()
            .map_err(|e| Error::handler("rollback-sql", e.to_string()))
    }
}
