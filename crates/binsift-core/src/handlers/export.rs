//! Tabular export: CSV and JSON lines

use std::io::Write;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::event::RowChange;
use crate::handler::{ActionFilter, Handler};

/// Supported export formats. Heavier sinks (SQLite, warehouses) are out
/// of scope; this covers the flat-file contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Jsonl,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "jsonl" | "json" => Some(Self::Jsonl),
            _ => None,
        }
    }
}

enum Sink {
    Csv(csv::Writer<Box<dyn std::io::Write + Send>>),
    Jsonl(Box<dyn std::io::Write + Send>),
}

/// Writes one record per event to a flat file.
pub struct ExportHandler {
    filter: ActionFilter,
    sink: Mutex<Sink>,
}

impl ExportHandler {
    pub fn new(
        format: ExportFormat,
        writer: Box<dyn std::io::Write + Send>,
        filter: ActionFilter,
    ) -> Result<Self> {
        let sink = match format {
            ExportFormat::Csv => {
                let mut w = csv::Writer::from_writer(writer);
                w.write_record([
                    "timestamp", "log_file", "log_pos", "database", "table", "action", "sql",
                    "before", "after",
                ])
                .map_err(|e| Error::handler("export", e.to_string()))?;
                Sink::Csv(w)
            }
            ExportFormat::Jsonl => Sink::Jsonl(writer),
        };

        Ok(Self {
            filter,
            sink: Mutex::new(sink),
        })
    }
}

#[async_trait]
impl Handler for ExportHandler {
    fn name(&self) -> &'static str {
        "export"
    }

    async fn accept(&self, event: &RowChange) -> Result<()> {
        if !self.filter.wants(event.action) {
            return Ok(());
        }

        let mut sink = self.sink.lock();
        match &mut *sink {
            Sink::Csv(w) => {
                let before = serde_json::to_string(&event.before)?;
                let after = serde_json::to_string(&event.after)?;
                w.write_record([
                    event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    event.log_file.clone(),
                    event.log_pos.to_string(),
                    event.database.clone(),
                    event.table.clone(),
                    event.action.to_string(),
                    event.sql.clone().unwrap_or_default(),
                    before,
                    after,
                ])
                .map_err(|e| Error::handler("export", e.to_string()))?;
            }
            Sink::Jsonl(w) => {
                let line = serde_json::to_string(event)?;
                writeln!(w, "{}", line).map_err(|e| Error::handler("export", e.to_string()))?;
            }
        }
        Ok(())
    }

    async fn finalize(&self) -> Result<()> {
        match &mut *self.sink.lock() {
            Sink::Csv(w) => w.flush().map_err(|e| Error::handler("export", e.to_string())),
            Sink::Jsonl(w) => w.flush().map_err(|e| Error::handler("export", e.to_string())),
        }
    }
}
