//! Built-in consumers: statistics, forward SQL, rollback SQL, event
//! display and tabular export.

mod export;
mod parse;
mod rollback;
mod sql;
mod stats;

pub use export::{ExportFormat, ExportHandler};
pub use parse::ParseHandler;
pub use rollback::RollbackHandler;
pub use sql::SqlHandler;
pub use stats::{StatsHandler, StatsSnapshot};
