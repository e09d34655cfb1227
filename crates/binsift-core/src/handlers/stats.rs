//! Event distribution statistics

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::event::RowChange;
use crate::handler::Handler;

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    per_database: HashMap<String, u64>,
    per_table: HashMap<String, u64>,
    per_action: HashMap<String, u64>,
}

/// Final tallies, sorted descending for display.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub total: u64,
    pub per_database: Vec<(String, u64)>,
    pub per_table: Vec<(String, u64)>,
    pub per_action: Vec<(String, u64)>,
}

impl StatsSnapshot {
    /// Keep only the `top` largest entries per distribution; 0 keeps all.
    pub fn truncated(mut self, top: usize) -> Self {
        if top > 0 {
            self.per_database.truncate(top);
            self.per_table.truncate(top);
            self.per_action.truncate(top);
        }
        self
    }
}

/// Counts events per database, `database.table` and action.
#[derive(Default)]
pub struct StatsHandler {
    counters: Mutex<Counters>,
}

impl StatsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.counters.lock();

        let sorted = |map: &HashMap<String, u64>| {
            let mut entries: Vec<(String, u64)> =
                map.iter().map(|(k, v)| (k.clone(), *v)).collect();
            entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            entries
        };

        StatsSnapshot {
            total: counters.total,
            per_database: sorted(&counters.per_database),
            per_table: sorted(&counters.per_table),
            per_action: sorted(&counters.per_action),
        }
    }
}

#[async_trait]
impl Handler for StatsHandler {
    fn name(&self) -> &'static str {
        "stats"
    }

    async fn accept(&self, event: &RowChange) -> Result<()> {
        let mut counters = self.counters.lock();
        counters.total += 1;
        *counters
            .per_database
            .entry(event.database.clone())
            .or_default() += 1;
        *counters
            .per_table
            .entry(event.qualified_table())
            .or_default() += 1;
        *counters
            .per_action
            .entry(event.action.to_string())
            .or_default() += 1;
        Ok(())
    }
}
