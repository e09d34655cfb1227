//! Table-metadata cache
//!
//! Resolves `schema.table` to an ordered column list from an external
//! catalog, with:
//!
//! - a bounded positive cache (bulk half-drop eviction weighted by last
//!   access)
//! - a negative cache with TTL, so recently-absent tables are not
//!   re-queried
//! - single-flight coordination: at most one outstanding catalog query
//!   per key, concurrent callers await the same outcome
//!
//! Locking discipline: `parking_lot` guards are only ever held for map
//! reads/writes, never across an `.await`; the per-key flight lock is a
//! `tokio::sync::Mutex`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::{RowChange, RowImage};
use crate::monitor::Monitor;

/// One column's metadata, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Declared type token, e.g. `int(11) unsigned` or `varchar(64)`.
    pub column_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
}

/// Result of a cache lookup.
#[derive(Debug, Clone)]
pub enum ColumnsOutcome {
    Found(Arc<Vec<ColumnMeta>>),
    /// The table does not exist (possibly negatively cached).
    NotFound,
    /// No catalog is configured; callers fall back to placeholder names.
    Unavailable,
}

impl ColumnsOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, ColumnsOutcome::Found(_))
    }
}

/// External column catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Ordered column metadata for a table. An empty result means the
    /// table does not exist.
    async fn fetch_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>>;
}

/// INFORMATION_SCHEMA-backed catalog.
pub struct MySqlCatalog {
    pool: mysql_async::Pool,
}

impl MySqlCatalog {
    pub fn new(pool: mysql_async::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for MySqlCatalog {
    async fn fetch_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| Error::catalog(e.to_string()))?;

        let rows: Vec<(String, String, String, Option<String>)> = conn
            .exec(
                r"SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT
                  FROM INFORMATION_SCHEMA.COLUMNS
                  WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
                  ORDER BY ORDINAL_POSITION",
                (schema, table),
            )
            .await
            .map_err(|e| Error::catalog(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(name, column_type, nullable, default_value)| ColumnMeta {
                name,
                column_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
                default_value,
            })
            .collect())
    }
}

struct PositiveEntry {
    columns: Arc<Vec<ColumnMeta>>,
    /// Logical access stamp; larger means more recently used.
    last_used: AtomicU64,
}

/// Cache counters, mostly for tests and the teardown summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub positive_entries: usize,
    pub negative_entries: usize,
    pub catalog_queries: u64,
}

/// Shared table-metadata cache. Cheap to clone behind an `Arc`.
pub struct MetaCache {
    catalog: Option<Arc<dyn Catalog>>,
    monitor: Option<Arc<Monitor>>,
    max_entries: usize,
    negative_ttl: Duration,

    positive: RwLock<HashMap<String, Arc<PositiveEntry>>>,
    /// Key → expiry instant.
    negative: RwLock<HashMap<String, Instant>>,
    flights: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    clock: AtomicU64,
    catalog_queries: AtomicU64,
}

impl MetaCache {
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
    pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(60);
    /// Cadence of the expired-negative sweep.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

    pub fn new(catalog: Option<Arc<dyn Catalog>>) -> Self {
        Self {
            catalog,
            monitor: None,
            max_entries: Self::DEFAULT_MAX_ENTRIES,
            negative_ttl: Self::DEFAULT_NEGATIVE_TTL,
            positive: RwLock::new(HashMap::new()),
            negative: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            catalog_queries: AtomicU64::new(0),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(2);
        self
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    fn key(schema: &str, table: &str) -> String {
        format!("{}.{}", schema, table)
    }

    /// Read phase: negative hit, positive hit, or miss.
    fn lookup(&self, key: &str) -> Option<ColumnsOutcome> {
        {
            let negative = self.negative.read();
            if let Some(expiry) = negative.get(key) {
                if Instant::now() < *expiry {
                    return Some(ColumnsOutcome::NotFound);
                }
            }
        }

        let positive = self.positive.read();
        if let Some(entry) = positive.get(key) {
            let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
            entry.last_used.store(stamp, Ordering::Relaxed);
            return Some(ColumnsOutcome::Found(entry.columns.clone()));
        }
        None
    }

    fn insert_positive(&self, key: String, columns: Arc<Vec<ColumnMeta>>) {
        let mut positive = self.positive.write();

        if positive.len() >= self.max_entries && !positive.contains_key(&key) {
            // Bulk half-drop, oldest access stamps first.
            let mut by_age: Vec<(String, u64)> = positive
                .iter()
                .map(|(k, e)| (k.clone(), e.last_used.load(Ordering::Relaxed)))
                .collect();
            by_age.sort_by_key(|(_, stamp)| *stamp);

            let target = self.max_entries / 2;
            let drop_count = positive.len().saturating_sub(target);
            for (k, _) in by_age.into_iter().take(drop_count) {
                debug!(key = %k, "evicting cached table metadata");
                positive.remove(&k);
            }
        }

        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        positive.insert(
            key.clone(),
            Arc::new(PositiveEntry {
                columns,
                last_used: AtomicU64::new(stamp),
            }),
        );
        drop(positive);

        self.negative.write().remove(&key);
    }

    fn insert_negative(&self, key: String) {
        self.negative
            .write()
            .insert(key, Instant::now() + self.negative_ttl);
    }

    /// Resolve the ordered column list for a table.
    pub async fn columns(&self, schema: &str, table: &str) -> ColumnsOutcome {
        let start = Instant::now();
        let key = Self::key(schema, table);

        if let Some(outcome) = self.lookup(&key) {
            return outcome;
        }

        let Some(catalog) = self.catalog.clone() else {
            return ColumnsOutcome::Unavailable;
        };

        // Single-flight: one catalog query per key; everyone else queues on
        // the same lock and then finds the entry in cache.
        let flight = {
            let mut flights = self.flights.lock();
            flights
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = flight.lock().await;

        if let Some(outcome) = self.lookup(&key) {
            self.flights.lock().remove(&key);
            return outcome;
        }

        self.catalog_queries.fetch_add(1, Ordering::Relaxed);
        let outcome = match catalog.fetch_columns(schema, table).await {
            Ok(columns) if !columns.is_empty() => {
                let columns = Arc::new(columns);
                self.insert_positive(key.clone(), columns.clone());
                ColumnsOutcome::Found(columns)
            }
            Ok(_) => {
                debug!(schema, table, "table not found, negatively cached");
                self.insert_negative(key.clone());
                ColumnsOutcome::NotFound
            }
            Err(e) => {
                warn!(schema, table, error = %e, "catalog query failed, negatively cached");
                self.insert_negative(key.clone());
                ColumnsOutcome::NotFound
            }
        };

        self.flights.lock().remove(&key);

        if let Some(monitor) = &self.monitor {
            monitor.record_slow("columns", start, &key);
        }
        outcome
    }

    /// Column name at `index`; never fails, `col_{index}` on any non-success.
    pub async fn column_name(&self, schema: &str, table: &str, index: usize) -> String {
        match self.columns(schema, table).await {
            ColumnsOutcome::Found(cols) if index < cols.len() => cols[index].name.clone(),
            _ => format!("col_{}", index),
        }
    }

    /// Rewrite `col_{n}` placeholder names in both row images to real
    /// column names, preserving order. A miss leaves the event untouched.
    pub async fn rename_columns(&self, event: &mut RowChange) {
        if event.before.is_empty() && event.after.is_empty() {
            return;
        }

        let ColumnsOutcome::Found(cols) = self.columns(&event.database, &event.table).await
        else {
            return;
        };

        event.before = rename_image(std::mem::take(&mut event.before), &cols);
        event.after = rename_image(std::mem::take(&mut event.after), &cols);
    }

    /// Drop all positive and negative entries.
    pub fn clear(&self) {
        self.positive.write().clear();
        self.negative.write().clear();
    }

    /// Remove expired negative entries.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.negative.write().retain(|_, expiry| *expiry > now);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            positive_entries: self.positive.read().len(),
            negative_entries: self.negative.read().len(),
            catalog_queries: self.catalog_queries.load(Ordering::Relaxed),
        }
    }

    /// Periodic sweep of expired negative entries. Abort the handle on
    /// shutdown.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Self::SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.sweep_expired();
            }
        })
    }
}

fn rename_image(image: RowImage, cols: &[ColumnMeta]) -> RowImage {
    let mut renamed = RowImage::with_capacity(image.len());
    for (name, value) in image {
        let real = name
            .strip_prefix("col_")
            .and_then(|idx| idx.parse::<usize>().ok())
            .and_then(|idx| cols.get(idx))
            .map(|c| c.name.clone())
            .unwrap_or(name);
        renamed.insert(real, value);
    }
    renamed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;
    use crate::value::ColumnValue;

    struct MockCatalog {
        tables: HashMap<String, Vec<ColumnMeta>>,
        delay: Duration,
        queries: AtomicU64,
    }

    impl MockCatalog {
        fn new(delay: Duration) -> Self {
            Self {
                tables: HashMap::new(),
                delay,
                queries: AtomicU64::new(0),
            }
        }

        fn with_table(mut self, schema: &str, table: &str, columns: &[&str]) -> Self {
            let cols = columns
                .iter()
                .map(|name| ColumnMeta {
                    name: name.to_string(),
                    column_type: "int(11)".to_string(),
                    nullable: false,
                    default_value: None,
                })
                .collect();
            self.tables.insert(format!("{}.{}", schema, table), cols);
            self
        }

        fn queries(&self) -> u64 {
            self.queries.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl Catalog for MockCatalog {
        async fn fetch_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnMeta>> {
            self.queries.fetch_add(1, Ordering::Relaxed);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(self
                .tables
                .get(&format!("{}.{}", schema, table))
                .cloned()
                .unwrap_or_default())
        }
    }

    fn cache_with(catalog: MockCatalog) -> (Arc<MetaCache>, Arc<MockCatalog>) {
        let catalog = Arc::new(catalog);
        let cache = Arc::new(MetaCache::new(Some(catalog.clone())));
        (cache, catalog)
    }

    #[tokio::test]
    async fn test_found_and_cached() {
        let (cache, catalog) = cache_with(
            MockCatalog::new(Duration::ZERO).with_table("db", "users", &["id", "name"]),
        );

        let outcome = cache.columns("db", "users").await;
        assert!(outcome.is_found());
        assert_eq!(catalog.queries(), 1);

        // Second lookup is served from cache.
        let outcome = cache.columns("db", "users").await;
        match outcome {
            ColumnsOutcome::Found(cols) => assert_eq!(cols[1].name, "name"),
            other => panic!("expected Found, got {:?}", other),
        }
        assert_eq!(catalog.queries(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_without_catalog() {
        let cache = MetaCache::new(None);
        assert!(matches!(
            cache.columns("db", "users").await,
            ColumnsOutcome::Unavailable
        ));
        // Nothing is cached for an unavailable catalog.
        assert_eq!(cache.stats().negative_entries, 0);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let (cache, catalog) =
            cache_with(MockCatalog::new(Duration::from_millis(50)).with_table(
                "db",
                "users",
                &["id"],
            ));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(
                async move { cache.columns("db", "users").await },
            ));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_found());
        }
        // Concurrent first-time requests coalesce into one catalog query.
        assert_eq!(catalog.queries(), 1);
    }

    #[tokio::test]
    async fn test_negative_ttl() {
        let catalog = Arc::new(MockCatalog::new(Duration::ZERO));
        let cache = Arc::new(
            MetaCache::new(Some(catalog.clone() as Arc<dyn Catalog>))
                .with_negative_ttl(Duration::from_millis(40)),
        );

        assert!(matches!(
            cache.columns("db", "ghost").await,
            ColumnsOutcome::NotFound
        ));
        assert_eq!(catalog.queries(), 1);

        // Within the TTL: no re-query.
        assert!(matches!(
            cache.columns("db", "ghost").await,
            ColumnsOutcome::NotFound
        ));
        assert_eq!(catalog.queries(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Past expiry: queried again.
        let _ = cache.columns("db", "ghost").await;
        assert_eq!(catalog.queries(), 2);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_negatives() {
        let catalog = Arc::new(MockCatalog::new(Duration::ZERO));
        let cache = MetaCache::new(Some(catalog as Arc<dyn Catalog>))
            .with_negative_ttl(Duration::from_millis(10));

        let _ = cache.columns("db", "ghost").await;
        assert_eq!(cache.stats().negative_entries, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.sweep_expired();
        assert_eq!(cache.stats().negative_entries, 0);
    }

    #[tokio::test]
    async fn test_column_name_fallback() {
        let cache = MetaCache::new(None);
        assert_eq!(cache.column_name("db", "t", 5).await, "col_5");

        let (cache, _) =
            cache_with(MockCatalog::new(Duration::ZERO).with_table("db", "t", &["id", "name"]));
        assert_eq!(cache.column_name("db", "t", 1).await, "name");
        // Out of range falls back too.
        assert_eq!(cache.column_name("db", "t", 9).await, "col_9");
    }

    #[tokio::test]
    async fn test_eviction_keeps_recent() {
        let mut catalog = MockCatalog::new(Duration::ZERO);
        for i in 0..5 {
            catalog = catalog.with_table("db", &format!("t{}", i), &["id"]);
        }
        let catalog = Arc::new(catalog);
        let cache = Arc::new(
            MetaCache::new(Some(catalog.clone() as Arc<dyn Catalog>)).with_max_entries(4),
        );

        for i in 0..4 {
            let _ = cache.columns("db", &format!("t{}", i)).await;
        }
        // Refresh t0 so it is the most recently used.
        let _ = cache.columns("db", "t0").await;

        // Inserting a fifth entry triggers the bulk half-drop.
        let _ = cache.columns("db", "t4").await;
        let stats = cache.stats();
        assert!(stats.positive_entries <= 3, "{:?}", stats);

        // t0 survived eviction; no new catalog query needed.
        let before = stats.catalog_queries;
        assert!(cache.columns("db", "t0").await.is_found());
        assert_eq!(cache.stats().catalog_queries, before);
    }

    #[tokio::test]
    async fn test_clear() {
        let (cache, catalog) =
            cache_with(MockCatalog::new(Duration::ZERO).with_table("db", "t", &["id"]));

        let _ = cache.columns("db", "t").await;
        let _ = cache.columns("db", "ghost").await;
        assert_eq!(cache.stats().positive_entries, 1);
        assert_eq!(cache.stats().negative_entries, 1);

        cache.clear();
        assert_eq!(cache.stats().positive_entries, 0);
        assert_eq!(cache.stats().negative_entries, 0);

        let _ = cache.columns("db", "t").await;
        assert_eq!(catalog.queries(), 3);
    }

    #[tokio::test]
    async fn test_rename_columns() {
        let (cache, _) = cache_with(
            MockCatalog::new(Duration::ZERO).with_table("testdb", "users", &["id", "name"]),
        );

        let mut ev = RowChange::new(Action::Insert, "testdb", "users");
        ev.after.insert("col_0".into(), ColumnValue::SignedInt(1));
        ev.after
            .insert("col_1".into(), ColumnValue::Text("John".into()));

        cache.rename_columns(&mut ev).await;
        let keys: Vec<&String> = ev.after.keys().collect();
        assert_eq!(keys, ["id", "name"]);
        assert_eq!(ev.after["id"], ColumnValue::SignedInt(1));
    }

    #[tokio::test]
    async fn test_rename_columns_unknown_table_is_noop() {
        let (cache, _) = cache_with(MockCatalog::new(Duration::ZERO));

        let mut ev = RowChange::new(Action::Insert, "db", "ghost");
        ev.after.insert("col_0".into(), ColumnValue::SignedInt(1));
        cache.rename_columns(&mut ev).await;

        let keys: Vec<&String> = ev.after.keys().collect();
        assert_eq!(keys, ["col_0"]);
    }

    #[tokio::test]
    async fn test_rename_preserves_unparseable_names() {
        let (cache, _) =
            cache_with(MockCatalog::new(Duration::ZERO).with_table("db", "t", &["id"]));

        let mut ev = RowChange::new(Action::Insert, "db", "t");
        ev.after.insert("already_named".into(), ColumnValue::Null);
        ev.after.insert("col_7".into(), ColumnValue::Null); // out of range
        cache.rename_columns(&mut ev).await;

        let keys: Vec<&String> = ev.after.keys().collect();
        assert_eq!(keys, ["already_named", "col_7"]);
    }
}
