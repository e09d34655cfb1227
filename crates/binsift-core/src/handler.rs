//! Consumer contract
//!
//! Handlers receive every dispatched event and flush at teardown. They
//! are shared read-only across workers and synchronize any mutable state
//! internally. A handler error is logged and never aborts the pipeline.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;
use crate::event::{Action, RowChange};

/// The capability set every consumer implements.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Short name, used in error logs.
    fn name(&self) -> &'static str;

    /// Process one event.
    async fn accept(&self, event: &RowChange) -> Result<()>;

    /// Called exactly once after all events have been processed or the
    /// pipeline was cancelled. Persistent handlers flush/close here.
    async fn finalize(&self) -> Result<()> {
        Ok(())
    }
}

/// Action filter consumed by handlers: events outside the set are ignored
/// by the handler but still dispatched to it.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    actions: HashSet<Action>,
}

impl ActionFilter {
    /// Empty set accepts every action.
    pub fn new(actions: &[Action]) -> Self {
        Self {
            actions: actions.iter().copied().collect(),
        }
    }

    pub fn wants(&self, action: Action) -> bool {
        self.actions.is_empty() || self.actions.contains(&action)
    }
}

/// Shared line-oriented output sink for handlers. Writes are short and
/// guarded; handlers never hold the lock across an await.
pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;

pub fn stdout_writer() -> SharedWriter {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

pub fn boxed_writer(w: impl Write + Send + 'static) -> SharedWriter {
    Arc::new(Mutex::new(Box::new(w)))
}
