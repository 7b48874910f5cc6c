//! ACID-durable relational store backed by redb.
//!
//! Every public engine operation maps to exactly one transaction here: writes
//! go through a single [`WriteTxn`] (redb serializes writers, which supplies
//! the isolation reconciliation needs), reads through an MVCC [`ReadTxn`]
//! snapshot. The reachability index (`ancestors` / `descendants` tables) is a
//! materialized transitive closure kept in-step with edge mutations, so an
//! ancestor lookup is one indexed range read.

use std::path::Path;

use redb::{Database, ReadTransaction, ReadableTable, TableDefinition, WriteTransaction};

use crate::entity::{EntityId, EntityKind, EntityRecord, RuleRow};
use crate::error::StoreError;

/// Result type for store operations.
pub(crate) type StoreResult<T> = std::result::Result<T, StoreError>;

/// Entity rows: `(kind, surrogate id)` to encoded [`EntityRecord`].
const ENTITIES: TableDefinition<(u8, u64), &[u8]> = TableDefinition::new("entities");

/// External-id index: `(kind, ext id)` to surrogate id.
const ENTITY_INDEX: TableDefinition<(u8, &str), u64> = TableDefinition::new("entity_index");

/// Direct edges: `(kind, parent, child)`.
const EDGES: TableDefinition<(u8, u64, u64), ()> = TableDefinition::new("edges");

/// Direct edges, child-keyed: `(kind, child, parent)`.
const EDGES_BY_CHILD: TableDefinition<(u8, u64, u64), ()> = TableDefinition::new("edges_by_child");

/// Reachability index: `(kind, node, ancestor)`, proper pairs only.
const ANCESTORS: TableDefinition<(u8, u64, u64), ()> = TableDefinition::new("ancestors");

/// Reachability index, dual direction: `(kind, node, descendant)`.
const DESCENDANTS: TableDefinition<(u8, u64, u64), ()> = TableDefinition::new("descendants");

/// Rule rows: `(subject, object, permission)` to encoded [`RuleRow`].
const RULES: TableDefinition<(u64, u64, u64), &[u8]> = TableDefinition::new("rules");

/// Engine metadata (id allocator state).
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_ID_KEY: &str = "next_entity_id";

/// Handle to the backing database.
pub(crate) struct Store {
    db: Database,
}

impl Store {
    /// Open or create a persistent store in the given directory.
    pub fn open(data_dir: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| StoreError::Io { source: e })?;
        let db = Database::create(data_dir.join("warden.redb"))?;
        Self::bootstrap(db)
    }

    /// Create a memory-only store (no persistence). Used by tests and
    /// short-lived embedding.
    pub fn in_memory() -> StoreResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::bootstrap(db)
    }

    /// Ensure all tables exist so read transactions never observe a missing table.
    fn bootstrap(db: Database) -> StoreResult<Self> {
        let txn = db.begin_write()?;
        {
            txn.open_table(ENTITIES)?;
            txn.open_table(ENTITY_INDEX)?;
            txn.open_table(EDGES)?;
            txn.open_table(EDGES_BY_CHILD)?;
            txn.open_table(ANCESTORS)?;
            txn.open_table(DESCENDANTS)?;
            txn.open_table(RULES)?;
            txn.open_table(META)?;
        }
        txn.commit()?;
        Ok(Self { db })
    }

    /// Begin a write transaction. redb admits one live writer at a time.
    pub fn write(&self) -> StoreResult<WriteTxn> {
        Ok(WriteTxn {
            txn: self.db.begin_write()?,
        })
    }

    /// Begin a snapshot read transaction.
    pub fn read(&self) -> StoreResult<ReadTxn> {
        Ok(ReadTxn {
            txn: self.db.begin_read()?,
        })
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish()
    }
}

// ---------------------------------------------------------------------------
// Row encoding
// ---------------------------------------------------------------------------

fn encode<T: serde::Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization {
        message: format!("failed to encode row: {e}"),
    })
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization {
        message: format!("failed to decode row: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Shared read paths (write and read transactions see the same queries)
// ---------------------------------------------------------------------------

fn lookup_id(
    index: &impl ReadableTable<(u8, &'static str), u64>,
    kind: EntityKind,
    ext_id: &str,
) -> StoreResult<Option<u64>> {
    Ok(index.get((kind.code(), ext_id))?.map(|g| g.value()))
}

fn lookup_record(
    entities: &impl ReadableTable<(u8, u64), &'static [u8]>,
    kind: EntityKind,
    id: u64,
) -> StoreResult<Option<EntityRecord>> {
    match entities.get((kind.code(), id))? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_records(
    entities: &impl ReadableTable<(u8, u64), &'static [u8]>,
    kind: EntityKind,
) -> StoreResult<Vec<EntityRecord>> {
    let code = kind.code();
    let mut out = Vec::new();
    for entry in entities.range((code, 0)..=(code, u64::MAX))? {
        let (_, value) = entry?;
        out.push(decode(value.value())?);
    }
    Ok(out)
}

/// Third key components of all rows prefixed by `(kind, node)`.
fn scan_targets(
    table: &impl ReadableTable<(u8, u64, u64), ()>,
    kind: EntityKind,
    node: u64,
) -> StoreResult<Vec<u64>> {
    let code = kind.code();
    let mut out = Vec::new();
    for entry in table.range((code, node, 0)..=(code, node, u64::MAX))? {
        let (key, _) = entry?;
        out.push(key.value().2);
    }
    Ok(out)
}

/// All `(second, third)` key pairs of one kind.
fn scan_pairs(
    table: &impl ReadableTable<(u8, u64, u64), ()>,
    kind: EntityKind,
) -> StoreResult<Vec<(u64, u64)>> {
    let code = kind.code();
    let mut out = Vec::new();
    for entry in table.range((code, 0, 0)..=(code, u64::MAX, u64::MAX))? {
        let (key, _) = entry?;
        let (_, a, b) = key.value();
        out.push((a, b));
    }
    Ok(out)
}

fn contains_key(
    table: &impl ReadableTable<(u8, u64, u64), ()>,
    key: (u8, u64, u64),
) -> StoreResult<bool> {
    Ok(table.get(key)?.is_some())
}

fn lookup_rule(
    rules: &impl ReadableTable<(u64, u64, u64), &'static [u8]>,
    key: (u64, u64, u64),
) -> StoreResult<Option<RuleRow>> {
    match rules.get(key)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_rules(
    rules: &impl ReadableTable<(u64, u64, u64), &'static [u8]>,
    range: impl std::ops::RangeBounds<(u64, u64, u64)>,
) -> StoreResult<Vec<((u64, u64, u64), RuleRow)>> {
    let mut out = Vec::new();
    for entry in rules.range(range)? {
        let (key, value) = entry?;
        out.push((key.value(), decode(value.value())?));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Write transaction
// ---------------------------------------------------------------------------

/// A single logical mutation against the store. Dropping without
/// [`WriteTxn::commit`] rolls every write back together.
pub(crate) struct WriteTxn {
    txn: WriteTransaction,
}

impl WriteTxn {
    pub fn commit(self) -> StoreResult<()> {
        Ok(self.txn.commit()?)
    }

    /// Allocate the next surrogate id. Ids start at 1 and are shared across kinds.
    pub fn allocate_id(&self) -> StoreResult<EntityId> {
        let mut meta = self.txn.open_table(META)?;
        let next = meta.get(NEXT_ID_KEY)?.map(|g| g.value()).unwrap_or(1);
        meta.insert(NEXT_ID_KEY, next + 1)?;
        EntityId::new(next).ok_or(StoreError::Serialization {
            message: "entity id allocator produced zero".into(),
        })
    }

    /// Insert or replace an entity row and its external-id index entry.
    pub fn put_entity(&self, kind: EntityKind, record: &EntityRecord) -> StoreResult<()> {
        let encoded = encode(record)?;
        let mut entities = self.txn.open_table(ENTITIES)?;
        entities.insert((kind.code(), record.id.get()), encoded.as_slice())?;
        drop(entities);
        let mut index = self.txn.open_table(ENTITY_INDEX)?;
        index.insert((kind.code(), record.ext_id.as_str()), record.id.get())?;
        Ok(())
    }

    /// Remove an entity row and its index entry. Edges and rules referencing
    /// the entity are the caller's responsibility.
    pub fn delete_entity(&self, kind: EntityKind, record: &EntityRecord) -> StoreResult<()> {
        let mut entities = self.txn.open_table(ENTITIES)?;
        entities.remove((kind.code(), record.id.get()))?;
        drop(entities);
        let mut index = self.txn.open_table(ENTITY_INDEX)?;
        index.remove((kind.code(), record.ext_id.as_str()))?;
        Ok(())
    }

    /// Insert a parent->child edge row. Returns false if it already existed.
    pub fn insert_edge(&self, kind: EntityKind, parent: u64, child: u64) -> StoreResult<bool> {
        let mut edges = self.txn.open_table(EDGES)?;
        let existed = edges.insert((kind.code(), parent, child), ())?.is_some();
        drop(edges);
        let mut by_child = self.txn.open_table(EDGES_BY_CHILD)?;
        by_child.insert((kind.code(), child, parent), ())?;
        Ok(!existed)
    }

    /// Remove a parent->child edge row. Returns false if it was absent.
    pub fn remove_edge(&self, kind: EntityKind, parent: u64, child: u64) -> StoreResult<bool> {
        let mut edges = self.txn.open_table(EDGES)?;
        let existed = edges.remove((kind.code(), parent, child))?.is_some();
        drop(edges);
        let mut by_child = self.txn.open_table(EDGES_BY_CHILD)?;
        by_child.remove((kind.code(), child, parent))?;
        Ok(existed)
    }

    /// Record `ancestor` as a proper ancestor of `node` in both directions of
    /// the reachability index.
    pub fn insert_closure_pair(
        &self,
        kind: EntityKind,
        node: u64,
        ancestor: u64,
    ) -> StoreResult<()> {
        let mut anc = self.txn.open_table(ANCESTORS)?;
        anc.insert((kind.code(), node, ancestor), ())?;
        drop(anc);
        let mut desc = self.txn.open_table(DESCENDANTS)?;
        desc.insert((kind.code(), ancestor, node), ())?;
        Ok(())
    }

    /// Drop the entire reachability index of one kind (prelude to a rebuild).
    pub fn clear_closure(&self, kind: EntityKind) -> StoreResult<()> {
        let code = kind.code();
        for def in [ANCESTORS, DESCENDANTS] {
            let mut table = self.txn.open_table(def)?;
            let keys: Vec<(u8, u64, u64)> = table
                .range((code, 0, 0)..=(code, u64::MAX, u64::MAX))?
                .map(|entry| entry.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                table.remove(key)?;
            }
        }
        Ok(())
    }

    /// Insert or replace a rule row.
    pub fn put_rule_row(&self, key: (u64, u64, u64), row: RuleRow) -> StoreResult<()> {
        let encoded = encode(&row)?;
        let mut rules = self.txn.open_table(RULES)?;
        rules.insert(key, encoded.as_slice())?;
        Ok(())
    }

    /// Remove a rule row. Returns false if it was absent.
    pub fn remove_rule_row(&self, key: (u64, u64, u64)) -> StoreResult<bool> {
        let mut rules = self.txn.open_table(RULES)?;
        Ok(rules.remove(key)?.is_some())
    }

    // -- read paths within the write snapshot --------------------------------

    pub fn entity_by_ext(
        &self,
        kind: EntityKind,
        ext_id: &str,
    ) -> StoreResult<Option<EntityRecord>> {
        let index = self.txn.open_table(ENTITY_INDEX)?;
        let Some(id) = lookup_id(&index, kind, ext_id)? else {
            return Ok(None);
        };
        drop(index);
        let entities = self.txn.open_table(ENTITIES)?;
        lookup_record(&entities, kind, id)
    }

    pub fn entity_by_id(&self, kind: EntityKind, id: EntityId) -> StoreResult<Option<EntityRecord>> {
        let entities = self.txn.open_table(ENTITIES)?;
        lookup_record(&entities, kind, id.get())
    }

    pub fn entities(&self, kind: EntityKind) -> StoreResult<Vec<EntityRecord>> {
        let entities = self.txn.open_table(ENTITIES)?;
        scan_records(&entities, kind)
    }

    pub fn children_of(&self, kind: EntityKind, id: EntityId) -> StoreResult<Vec<u64>> {
        let edges = self.txn.open_table(EDGES)?;
        scan_targets(&edges, kind, id.get())
    }

    pub fn parents_of(&self, kind: EntityKind, id: EntityId) -> StoreResult<Vec<u64>> {
        let by_child = self.txn.open_table(EDGES_BY_CHILD)?;
        scan_targets(&by_child, kind, id.get())
    }

    pub fn edges(&self, kind: EntityKind) -> StoreResult<Vec<(u64, u64)>> {
        let edges = self.txn.open_table(EDGES)?;
        scan_pairs(&edges, kind)
    }

    /// Proper ancestors of `id` (the node itself is not included).
    pub fn ancestors_of(&self, kind: EntityKind, id: EntityId) -> StoreResult<Vec<u64>> {
        let anc = self.txn.open_table(ANCESTORS)?;
        scan_targets(&anc, kind, id.get())
    }

    /// Proper descendants of `id`.
    pub fn descendants_of(&self, kind: EntityKind, id: EntityId) -> StoreResult<Vec<u64>> {
        let desc = self.txn.open_table(DESCENDANTS)?;
        scan_targets(&desc, kind, id.get())
    }

    pub fn is_ancestor(
        &self,
        kind: EntityKind,
        node: EntityId,
        ancestor: EntityId,
    ) -> StoreResult<bool> {
        let anc = self.txn.open_table(ANCESTORS)?;
        contains_key(&anc, (kind.code(), node.get(), ancestor.get()))
    }

    pub fn rule(&self, key: (u64, u64, u64)) -> StoreResult<Option<RuleRow>> {
        let rules = self.txn.open_table(RULES)?;
        lookup_rule(&rules, key)
    }

    pub fn all_rules(&self) -> StoreResult<Vec<((u64, u64, u64), RuleRow)>> {
        let rules = self.txn.open_table(RULES)?;
        scan_rules(&rules, ..)
    }
}

impl std::fmt::Debug for WriteTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTxn").finish()
    }
}

// ---------------------------------------------------------------------------
// Read transaction
// ---------------------------------------------------------------------------

/// A consistent MVCC snapshot of the store.
pub(crate) struct ReadTxn {
    txn: ReadTransaction,
}

impl ReadTxn {
    pub fn entity_by_ext(
        &self,
        kind: EntityKind,
        ext_id: &str,
    ) -> StoreResult<Option<EntityRecord>> {
        let index = self.txn.open_table(ENTITY_INDEX)?;
        let Some(id) = lookup_id(&index, kind, ext_id)? else {
            return Ok(None);
        };
        let entities = self.txn.open_table(ENTITIES)?;
        lookup_record(&entities, kind, id)
    }

    pub fn entity_by_id(&self, kind: EntityKind, id: EntityId) -> StoreResult<Option<EntityRecord>> {
        let entities = self.txn.open_table(ENTITIES)?;
        lookup_record(&entities, kind, id.get())
    }

    pub fn entities(&self, kind: EntityKind) -> StoreResult<Vec<EntityRecord>> {
        let entities = self.txn.open_table(ENTITIES)?;
        scan_records(&entities, kind)
    }

    pub fn children_of(&self, kind: EntityKind, id: EntityId) -> StoreResult<Vec<u64>> {
        let edges = self.txn.open_table(EDGES)?;
        scan_targets(&edges, kind, id.get())
    }

    pub fn parents_of(&self, kind: EntityKind, id: EntityId) -> StoreResult<Vec<u64>> {
        let by_child = self.txn.open_table(EDGES_BY_CHILD)?;
        scan_targets(&by_child, kind, id.get())
    }

    /// Proper ancestors of `id` (the node itself is not included).
    pub fn ancestors_of(&self, kind: EntityKind, id: EntityId) -> StoreResult<Vec<u64>> {
        let anc = self.txn.open_table(ANCESTORS)?;
        scan_targets(&anc, kind, id.get())
    }

    /// Proper descendants of `id`.
    pub fn descendants_of(&self, kind: EntityKind, id: EntityId) -> StoreResult<Vec<u64>> {
        let desc = self.txn.open_table(DESCENDANTS)?;
        scan_targets(&desc, kind, id.get())
    }

    /// All rules whose subject is `subject`, one indexed range read.
    pub fn rules_for_subject(&self, subject: u64) -> StoreResult<Vec<((u64, u64, u64), RuleRow)>> {
        let rules = self.txn.open_table(RULES)?;
        scan_rules(
            &rules,
            (subject, 0, 0)..=(subject, u64::MAX, u64::MAX),
        )
    }

    pub fn all_rules(&self) -> StoreResult<Vec<((u64, u64, u64), RuleRow)>> {
        let rules = self.txn.open_table(RULES)?;
        scan_rules(&rules, ..)
    }

    pub fn entity_count(&self, kind: EntityKind) -> StoreResult<usize> {
        Ok(self.entities(kind)?.len())
    }

    pub fn rule_count(&self) -> StoreResult<usize> {
        Ok(self.all_rules()?.len())
    }

    pub fn edge_count(&self, kind: EntityKind) -> StoreResult<usize> {
        let edges = self.txn.open_table(EDGES)?;
        Ok(scan_pairs(&edges, kind)?.len())
    }
}

impl std::fmt::Debug for ReadTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadTxn").finish()
    }
}
