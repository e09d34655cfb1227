//! # binsift-core
//!
//! MySQL binlog event pipeline: reads a binary replication log from an
//! offline file or a live replication stream, reconstructs logical
//! row-change events, and feeds them through a concurrent,
//! causally-ordered pipeline to pluggable consumers (statistics, forward
//! and rollback SQL, export).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐      ┌─────────────┐      ┌──────────────────────┐
//! │ FileSource │      │ MySqlSource │      │  EventDecoder        │
//! │ (offline)  │──┬──▶│ (live dump) │──┬──▶│  raw → RowChange     │
//! └────────────┘  │   └─────────────┘  │   └──────────┬───────────┘
//!                 └───────────┬────────┘              │
//!                             ▼                       ▼
//!                     ┌───────────────┐      ┌────────────────┐
//!                     │  RouteFilter  │─────▶│   Pipeline     │
//!                     │ accept + part │      │ 1 producer     │
//!                     └───────────────┘      │ N workers      │
//!                                            │ N bounded q's  │
//!                                            └───────┬────────┘
//!                                 MetaCache ─────────┤ rename cols
//!                                 SqlGenerator ──────┤ materialize
//!                                                    ▼
//!                                            ┌────────────────┐
//!                                            │   Handlers     │
//!                                            │ stats/sql/...  │
//!                                            └────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use binsift_core::{
//!     FileSource, Pipeline, RouteFilter,
//!     handler::{stdout_writer, ActionFilter},
//!     handlers::SqlHandler,
//! };
//!
//! # async fn example() -> binsift_core::Result<()> {
//! let source = Box::new(FileSource::new("mysql-bin.000001"));
//! let filter = RouteFilter::new(&["db_[0-3].users".to_string()])?;
//!
//! let pipeline = Pipeline::new(source, filter, 4)
//!     .add_handler(Arc::new(SqlHandler::new(stdout_writer(), ActionFilter::default())));
//!
//! let summary = pipeline.run().await?;
//! println!("{} events", summary.dispatched);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod checkpoint;
pub mod config;
pub mod decoder;
pub mod error;
pub mod event;
pub mod filter;
pub mod handler;
pub mod handlers;
pub mod monitor;
pub mod pattern;
pub mod pipeline;
pub mod protocol;
pub mod source;
pub mod sql;
pub mod value;

pub use cache::{Catalog, ColumnMeta, ColumnsOutcome, MetaCache, MySqlCatalog};
pub use checkpoint::{CheckpointStore, Position, SourceKind};
pub use config::{RunConfig, TimeRange};
pub use decoder::EventDecoder;
pub use error::{Error, Result};
pub use event::{Action, RowChange, RowImage};
pub use filter::RouteFilter;
pub use handler::{ActionFilter, Handler};
pub use monitor::{Monitor, MonitorStats};
pub use pattern::{worker_id, PatternError, RangeMatcher};
pub use pipeline::{LastEvent, Pipeline, PipelineSummary, Shutdown};
pub use source::{source_from_config, FileSource, MySqlSource, Source};
pub use sql::SqlGenerator;
pub use value::ColumnValue;
