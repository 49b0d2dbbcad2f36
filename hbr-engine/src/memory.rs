//! # In-Memory Backend
//!
//! Provide a sharded, versioned wide-column store that satisfies the
//! `StorageInstance` / `StorageTable` collaborators without any network.
//!
//! ## Usage
//!
//! - Use `MemoryInstance::new("id")` and `create_table` to set up tables with
//!   their column families.
//! - Wrap instances in a `MemoryCluster` to exercise instance discovery.
//! - Use `MemoryTable::inject_commit_failure` to make the next commit fail.
//! - Counters are incremented under the row's shard write lock, so concurrent
//!   increments never lose an update.
//!
//! ## Design Principles
//!
//! 1. **Sharded Locks**: Rows hash to per-shard locks so commits touching
//!    different rows rarely contend.
//! 2. **Per-Row Atomicity**: A row's mutations are validated and applied under
//!    one shard write lock; nothing is applied for a row that fails validation.
//! 3. **Versioned Cells**: Each cell keeps every version keyed by timestamp,
//!    newest last, like the store it stands in for.
//!
//! ## Structure Overview
//!
//! ```text
//! MemoryInstance
//!   └── tables: RwLock<HashMap<String, Arc<MemoryTable>>>
//!         └── MemoryTable
//!               ├── families: Vec<String>
//!               └── shards: Vec<Shard>
//!                     └── inner: RwLock<HashMap<Arc<[u8]>, Row>>
//!                           └── Row { family -> qualifier -> BTreeMap<Timestamp, Bytes> }
//! ```

use std::collections::BTreeMap;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use hbr_common::{
    decode_counter, encode_counter, Cell, HbrError, HbrResult, Mutation, ReadFilter, RowMutation,
    Timestamp,
};

use crate::engine::{InstanceListing, InstanceLocator, StorageInstance, StorageTable};

/// Default shard count for new tables.
const DEFAULT_SHARD_COUNT: usize = 16;

/// Cell versions ordered oldest to newest.
type Versions = BTreeMap<Timestamp, Bytes>;

/// All cells of one row, grouped by family then qualifier.
#[derive(Debug, Default)]
struct Row {
    families: HashMap<String, HashMap<Vec<u8>, Versions>>,
}

impl Row {
    fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Newest version of one cell.
    fn newest(&self, family: &str, qualifier: &[u8]) -> Option<(Timestamp, &Bytes)> {
        self.families
            .get(family)?
            .get(qualifier)?
            .iter()
            .next_back()
            .map(|(ts, value)| (*ts, value))
    }

    /// Cells passing `filter`, unordered.
    fn select(&self, filter: &ReadFilter, out: &mut Vec<Cell>) {
        let limit = filter.versions.unwrap_or(usize::MAX);
        for (family, cells) in &self.families {
            for (qualifier, versions) in cells {
                if !filter.selects(family, qualifier) {
                    continue;
                }
                let kept = versions
                    .iter()
                    .rev()
                    .filter(|(ts, _)| filter.admits(**ts))
                    .take(limit)
                    .map(|(ts, value)| Cell {
                        family: family.clone(),
                        qualifier: qualifier.clone(),
                        value: value.clone(),
                        timestamp: *ts,
                    });
                out.extend(kept);
            }
        }
    }

    /// Applies one mutation. Families were validated by the caller.
    fn apply(&mut self, mutation: Mutation, now: Timestamp) {
        match mutation {
            Mutation::SetCell {
                family,
                qualifier,
                value,
                timestamp,
            } => {
                self.families
                    .entry(family)
                    .or_default()
                    .entry(qualifier)
                    .or_default()
                    .insert(timestamp.unwrap_or(now), value);
            }
            Mutation::DeleteCell {
                family,
                qualifier,
                range,
            } => {
                let Some(cells) = self.families.get_mut(&family) else {
                    return;
                };
                if let Some(versions) = cells.get_mut(&qualifier) {
                    let range = range.unwrap_or_default();
                    versions.retain(|ts, _| !range.contains(*ts));
                    if versions.is_empty() {
                        cells.remove(&qualifier);
                    }
                }
                if cells.is_empty() {
                    self.families.remove(&family);
                }
            }
            Mutation::DeleteFamily { family } => {
                self.families.remove(&family);
            }
            Mutation::DeleteRow => self.families.clear(),
        }
    }
}

/// Per-shard lock wrapper.
#[derive(Debug)]
struct Shard {
    inner: RwLock<HashMap<Arc<[u8]>, Row, RandomState>>,
}

/// Sharded in-memory table.
#[derive(Debug)]
pub struct MemoryTable {
    name: String,
    families: Vec<String>,
    shards: Vec<Shard>,
    /// Bitmask for fast shard selection (power-of-two shard count).
    shard_mask: usize,
    hash_state: RandomState,
    commits: AtomicU64,
    /// Message for the next commit to fail with, if armed.
    pending_failure: Mutex<Option<String>>,
}

impl MemoryTable {
    /// Creates a table with the given column families.
    pub fn new(name: impl Into<String>, families: &[&str]) -> Self {
        Self::with_shard_count(name, families, DEFAULT_SHARD_COUNT)
    }

    /// Creates a table with a caller-provided shard count.
    ///
    /// The count is normalized to the next power of two to enable fast masking.
    pub fn with_shard_count(name: impl Into<String>, families: &[&str], shards: usize) -> Self {
        let shard_count = normalize_shard_count(shards);
        let hash_state = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| Shard {
                inner: RwLock::new(HashMap::with_hasher(hash_state.clone())),
            })
            .collect();

        MemoryTable {
            name: name.into(),
            families: families.iter().map(|family| family.to_string()).collect(),
            shards,
            shard_mask: shard_count - 1,
            hash_state,
            commits: AtomicU64::new(0),
            pending_failure: Mutex::new(None),
        }
    }

    /// Column families defined on this table.
    pub fn families(&self) -> &[String] {
        &self.families
    }

    /// Number of `commit` calls received, including failed ones.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Makes the next `commit` fail with `message` without applying anything.
    pub fn inject_commit_failure(&self, message: impl Into<String>) {
        *self.pending_failure.lock() = Some(message.into());
    }

    /// Returns the newest version of a cell.
    pub fn read_cell(&self, row_key: &[u8], family: &str, qualifier: &[u8]) -> Option<Bytes> {
        self.read_versions(row_key, family, qualifier)
            .into_iter()
            .next()
            .map(|(_, value)| value)
    }

    /// Returns every version of a cell, newest first.
    pub fn read_versions(
        &self,
        row_key: &[u8],
        family: &str,
        qualifier: &[u8],
    ) -> Vec<(Timestamp, Bytes)> {
        let inner = self.shard_for(row_key).inner.read();
        inner
            .get(row_key)
            .and_then(|row| row.families.get(family))
            .and_then(|cells| cells.get(qualifier))
            .map(|versions| {
                versions
                    .iter()
                    .rev()
                    .map(|(ts, value)| (*ts, value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns true when the row holds at least one cell.
    pub fn row_exists(&self, row_key: &[u8]) -> bool {
        self.shard_for(row_key).inner.read().contains_key(row_key)
    }

    /// Number of non-empty rows across all shards.
    pub fn row_count(&self) -> usize {
        self.shards.iter().map(|shard| shard.inner.read().len()).sum()
    }

    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = self.hash_state.build_hasher();
        hasher.write(key);
        (hasher.finish() as usize) & self.shard_mask
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    fn has_family(&self, family: &str) -> bool {
        self.families.iter().any(|known| known == family)
    }

    fn validate(&self, mutations: &[Mutation]) -> Result<(), String> {
        for mutation in mutations {
            let family = match mutation {
                Mutation::SetCell { family, .. }
                | Mutation::DeleteCell { family, .. }
                | Mutation::DeleteFamily { family } => family,
                Mutation::DeleteRow => continue,
            };
            if !self.has_family(family) {
                return Err(format!("unknown column family {family:?}"));
            }
        }
        Ok(())
    }

    /// Validates and applies one row under its shard lock.
    fn apply_row(&self, row: RowMutation, now: Timestamp) -> Result<(), String> {
        let (row_key, mutations) = row.into_parts();
        self.validate(&mutations)?;

        let mut inner = self.shard_for(&row_key).inner.write();
        let key: Arc<[u8]> = Arc::from(row_key);
        let mut stored = inner.remove(&key).unwrap_or_default();
        for mutation in mutations {
            stored.apply(mutation, now);
        }
        if !stored.is_empty() {
            inner.insert(key, stored);
        }
        Ok(())
    }
}

impl StorageTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    /// Applies each row atomically; later rows still apply when an earlier
    /// one is rejected.
    fn commit(&self, rows: Vec<RowMutation>) -> HbrResult<()> {
        self.commits.fetch_add(1, Ordering::Relaxed);

        if let Some(message) = self.pending_failure.lock().take() {
            warn!(table = %self.name, %message, "injected commit failure");
            return Err(HbrError::Commit(message));
        }

        let now = Timestamp::now();
        let total = rows.len();
        let mut failures = Vec::new();
        for row in rows {
            let key = String::from_utf8_lossy(row.row_key()).into_owned();
            if let Err(reason) = self.apply_row(row, now) {
                failures.push(format!("row {key:?}: {reason}"));
            }
        }

        debug!(table = %self.name, rows = total, failed = failures.len(), "commit applied");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HbrError::Commit(failures.join("; ")))
        }
    }

    fn column_families(&self) -> Vec<String> {
        self.families.clone()
    }

    fn read_row(&self, row_key: &[u8], filter: &ReadFilter) -> HbrResult<Vec<Cell>> {
        let mut cells = Vec::new();
        if let Some(row) = self.shard_for(row_key).inner.read().get(row_key) {
            row.select(filter, &mut cells);
        }
        cells.sort_by(|a, b| {
            a.family
                .cmp(&b.family)
                .then_with(|| a.qualifier.cmp(&b.qualifier))
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        Ok(cells)
    }

    /// The new version is written at "now", or over the newest version when
    /// that one is later, so it is always the value read back.
    fn increment_cell(&self, row_key: &[u8], family: &str, qualifier: &[u8], delta: i64) -> HbrResult<i64> {
        if !self.has_family(family) {
            return Err(HbrError::InvalidArgument(format!(
                "unknown column family {family:?}"
            )));
        }

        let mut inner = self.shard_for(row_key).inner.write();
        let (current, newest_at) = match inner.get(row_key).and_then(|row| row.newest(family, qualifier)) {
            Some((ts, raw)) => (decode_counter(raw)?, Some(ts)),
            None => (0, None),
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            HbrError::InvalidArgument(format!("counter overflow adding {delta} to {current}"))
        })?;

        let now = Timestamp::now();
        let at = newest_at.map_or(now, |newest| newest.max(now));
        let key: Arc<[u8]> = Arc::from(row_key);
        inner.entry(key).or_default().apply(
            Mutation::SetCell {
                family: family.to_string(),
                qualifier: qualifier.to_vec(),
                value: encode_counter(next),
                timestamp: Some(at),
            },
            now,
        );

        debug!(table = %self.name, family, delta, value = next, "counter incremented");
        Ok(next)
    }
}

/// An in-memory instance holding named tables.
#[derive(Debug)]
pub struct MemoryInstance {
    id: String,
    tables: RwLock<HashMap<String, Arc<MemoryTable>>>,
}

impl MemoryInstance {
    pub fn new(id: impl Into<String>) -> Self {
        MemoryInstance {
            id: id.into(),
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Creates (or replaces) a table and returns a handle to it.
    pub fn create_table(&self, name: &str, families: &[&str]) -> Arc<MemoryTable> {
        let table = Arc::new(MemoryTable::new(name, families));
        self.tables.write().insert(name.to_string(), Arc::clone(&table));
        table
    }

    /// Concrete handle for inspection in tests and tooling.
    pub fn memory_table(&self, name: &str) -> Option<Arc<MemoryTable>> {
        self.tables.read().get(name).cloned()
    }
}

impl StorageInstance for MemoryInstance {
    fn id(&self) -> &str {
        &self.id
    }

    fn table(&self, name: &str) -> HbrResult<Arc<dyn StorageTable>> {
        match self.memory_table(name) {
            Some(table) => Ok(table as Arc<dyn StorageTable>),
            None => Err(HbrError::TableNotFound(name.to_string())),
        }
    }
}

/// A set of instances acting as the discovery environment.
#[derive(Default)]
pub struct MemoryCluster {
    instances: Vec<Arc<MemoryInstance>>,
    failed_locations: Vec<String>,
    list_calls: AtomicUsize,
}

impl MemoryCluster {
    pub fn new(instances: Vec<Arc<MemoryInstance>>) -> Self {
        MemoryCluster {
            instances,
            ..Default::default()
        }
    }

    /// Marks a location as unreachable in every listing.
    pub fn with_failed_location(mut self, location: impl Into<String>) -> Self {
        self.failed_locations.push(location.into());
        self
    }

    /// How many times `list_instances` was called.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl InstanceLocator for MemoryCluster {
    fn list_instances(&self) -> HbrResult<InstanceListing> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(InstanceListing {
            instances: self
                .instances
                .iter()
                .map(|instance| Arc::clone(instance) as Arc<dyn StorageInstance>)
                .collect(),
            failed_locations: self.failed_locations.clone(),
        })
    }
}

/// Normalizes shard counts to a power of two for fast masking.
fn normalize_shard_count(count: usize) -> usize {
    count.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::discover_instance;
    use hbr_common::{ColumnSpec, TimeRange};

    fn ts(millis: i64) -> Timestamp {
        Timestamp::from_millis(millis).unwrap()
    }

    fn put(table: &MemoryTable, row: &[u8], family: &str, qualifier: &[u8], value: &'static [u8], at: i64) {
        let mut mutation = table.row_mutation(row);
        mutation.set_cell(family, qualifier, Bytes::from_static(value), Some(ts(at)));
        table.commit(vec![mutation]).unwrap();
    }

    #[test]
    fn set_and_read_newest_version() {
        let table = MemoryTable::with_shard_count("t", &["cf"], 4);
        put(&table, b"r", "cf", b"q", b"old", 1);
        put(&table, b"r", "cf", b"q", b"new", 2);

        assert_eq!(table.read_cell(b"r", "cf", b"q").unwrap(), &b"new"[..]);
        let versions = table.read_versions(b"r", "cf", b"q");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].0, ts(1));
        assert_eq!(table.commit_count(), 2);
    }

    #[test]
    fn delete_cell_respects_range() {
        let table = MemoryTable::new("t", &["cf"]);
        put(&table, b"r", "cf", b"q", b"a", 10);
        put(&table, b"r", "cf", b"q", b"b", 20);

        let mut mutation = table.row_mutation(b"r");
        mutation.delete_cell("cf", b"q", Some(ts(10).delete_range()));
        table.commit(vec![mutation]).unwrap();

        let versions = table.read_versions(b"r", "cf", b"q");
        assert_eq!(versions, vec![(ts(20), Bytes::from_static(b"b"))]);
    }

    #[test]
    fn delete_family_and_row() {
        let table = MemoryTable::new("t", &["a", "b"]);
        put(&table, b"r", "a", b"q", b"1", 1);
        put(&table, b"r", "b", b"q", b"2", 1);

        let mut mutation = table.row_mutation(b"r");
        mutation.delete_family("a");
        table.commit(vec![mutation]).unwrap();
        assert!(table.read_cell(b"r", "a", b"q").is_none());
        assert!(table.row_exists(b"r"));

        let mut mutation = table.row_mutation(b"r");
        mutation.delete_row();
        table.commit(vec![mutation]).unwrap();
        assert!(!table.row_exists(b"r"));
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn unknown_family_rejects_only_that_row() {
        let table = MemoryTable::new("t", &["cf"]);

        let mut bad = table.row_mutation(b"bad");
        bad.set_cell("cf", b"q", Bytes::from_static(b"x"), None);
        bad.set_cell("missing", b"q", Bytes::from_static(b"x"), None);
        let mut good = table.row_mutation(b"good");
        good.set_cell("cf", b"q", Bytes::from_static(b"y"), None);

        let err = table.commit(vec![bad, good]).unwrap_err();
        assert!(matches!(err, HbrError::Commit(ref msg) if msg.contains("missing")));
        assert!(!table.row_exists(b"bad"));
        assert!(table.row_exists(b"good"));
    }

    #[test]
    fn injected_failure_applies_nothing() {
        let table = MemoryTable::new("t", &["cf"]);
        table.inject_commit_failure("unavailable");

        let mut mutation = table.row_mutation(b"r");
        mutation.set_cell("cf", b"q", Bytes::from_static(b"x"), None);
        assert_eq!(
            table.commit(vec![mutation.clone()]),
            Err(HbrError::Commit("unavailable".to_string()))
        );
        assert!(!table.row_exists(b"r"));

        table.commit(vec![mutation]).unwrap();
        assert!(table.row_exists(b"r"));
    }

    #[test]
    fn read_row_filters_and_orders() {
        let table = MemoryTable::new("t", &["a", "b"]);
        put(&table, b"r", "b", b"x", b"b1", 1);
        put(&table, b"r", "a", b"y", b"a1", 1);
        put(&table, b"r", "a", b"y", b"a2", 2);
        put(&table, b"r", "a", b"z", b"a3", 3);

        let all = table.read_row(b"r", &ReadFilter::default()).unwrap();
        let order: Vec<_> = all.iter().map(|cell| (cell.column(), cell.timestamp)).collect();
        assert_eq!(
            order,
            vec![
                (b"a:y".to_vec(), ts(2)),
                (b"a:y".to_vec(), ts(1)),
                (b"a:z".to_vec(), ts(3)),
                (b"b:x".to_vec(), ts(1)),
            ]
        );

        let filter = ReadFilter {
            columns: vec![ColumnSpec::parse(b"a", false).unwrap()],
            range: Some(TimeRange::until(ts(3))),
            versions: Some(1),
        };
        let latest = table.read_row(b"r", &filter).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(&latest[0].value[..], b"a2");

        assert!(table.read_row(b"missing", &ReadFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn read_rows_skips_empty_rows() {
        let table = MemoryTable::new("t", &["cf"]);
        put(&table, b"r1", "cf", b"q", b"1", 1);
        put(&table, b"r3", "cf", b"q", b"3", 1);

        let keys = vec![b"r1".to_vec(), b"r2".to_vec(), b"r3".to_vec()];
        let rows = table.read_rows(&keys, &ReadFilter::default()).unwrap();
        let found: Vec<_> = rows.iter().map(|(key, _)| key.clone()).collect();
        assert_eq!(found, vec![b"r1".to_vec(), b"r3".to_vec()]);
    }

    #[test]
    fn increment_starts_at_zero_and_accumulates() {
        let table = MemoryTable::new("t", &["cf"]);
        assert_eq!(table.increment_cell(b"r", "cf", b"hits", 0).unwrap(), 0);
        assert_eq!(table.increment_cell(b"r", "cf", b"hits", 5).unwrap(), 5);
        assert_eq!(table.increment_cell(b"r", "cf", b"hits", -7).unwrap(), -2);
        assert_eq!(table.read_cell(b"r", "cf", b"hits").unwrap(), encode_counter(-2));
        assert_eq!(table.commit_count(), 0);
    }

    #[test]
    fn increment_over_future_version_stays_newest() {
        let table = MemoryTable::new("t", &["cf"]);
        let mut mutation = table.row_mutation(b"r");
        mutation.set_cell("cf", b"hits", encode_counter(10), Some(Timestamp::from_micros(i64::MAX)));
        table.commit(vec![mutation]).unwrap();

        assert_eq!(table.increment_cell(b"r", "cf", b"hits", 1).unwrap(), 11);
        assert_eq!(table.increment_cell(b"r", "cf", b"hits", 1).unwrap(), 12);
    }

    #[test]
    fn increment_rejects_bad_cells() {
        let table = MemoryTable::new("t", &["cf"]);
        put(&table, b"r", "cf", b"text", b"abc", 1);
        assert!(matches!(
            table.increment_cell(b"r", "cf", b"text", 1),
            Err(HbrError::InvalidArgument(_))
        ));
        assert!(matches!(
            table.increment_cell(b"fresh", "nope", b"q", 1),
            Err(HbrError::InvalidArgument(_))
        ));
        assert!(!table.row_exists(b"fresh"));

        table.increment_cell(b"r", "cf", b"max", i64::MAX).unwrap();
        assert!(matches!(
            table.increment_cell(b"r", "cf", b"max", 1),
            Err(HbrError::InvalidArgument(_))
        ));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let table = Arc::new(MemoryTable::new("t", &["cf"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        table.increment_cell(b"r", "cf", b"hits", 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(table.increment_cell(b"r", "cf", b"hits", 0).unwrap(), 800);
    }

    #[test]
    fn instance_table_lookup() {
        let instance = MemoryInstance::new("inst");
        instance.create_table("users", &["cf"]);
        assert_eq!(instance.table("users").unwrap().name(), "users");
        assert_eq!(
            instance.table("nope").unwrap_err(),
            HbrError::TableNotFound("nope".to_string())
        );
    }

    #[test]
    fn discovery_requires_exactly_one_instance() {
        let one = MemoryCluster::new(vec![Arc::new(MemoryInstance::new("a"))]);
        assert_eq!(discover_instance(&one).unwrap().id(), "a");
        assert_eq!(one.list_calls(), 1);

        let none = MemoryCluster::new(Vec::new());
        assert!(matches!(discover_instance(&none), Err(HbrError::Discovery(_))));

        let two = MemoryCluster::new(vec![
            Arc::new(MemoryInstance::new("a")),
            Arc::new(MemoryInstance::new("b")),
        ]);
        assert!(matches!(discover_instance(&two), Err(HbrError::Discovery(_))));

        let failed = MemoryCluster::new(vec![Arc::new(MemoryInstance::new("a"))])
            .with_failed_location("us-east1-b");
        let err = discover_instance(&failed).unwrap_err();
        assert!(matches!(err, HbrError::Discovery(ref msg) if msg.contains("us-east1-b")));
    }
}
