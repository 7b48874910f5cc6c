//! Engine facade: top-level API for the warden system.
//!
//! The `Engine` owns the backing store and provides the public interface for
//! registering entities, shaping hierarchies, managing rules, answering
//! authorization queries, and reconciling declarations. Every operation is a
//! single store transaction; the only long-lived in-process state is the
//! cache of the three supremum surrogate ids.

use std::path::PathBuf;

use dashmap::DashMap;

use crate::decide;
use crate::declare::{Declarations, InitReport};
use crate::entity::{Decision, EntityId, EntityKind, EntityRecord, Rule, RuleSide, Sign};
use crate::error::{AccessError, StoreError, WardenResult};
use crate::hierarchy;
use crate::ident::{ExternalId, Identifier, SUPREMUM};
use crate::rules;
use crate::store::{ReadTxn, Store, WriteTxn};

/// Configuration for the warden engine.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Data directory for persistence. `None` for memory-only mode.
    pub data_dir: Option<PathBuf>,
}

/// The warden hierarchical authorization engine.
pub struct Engine {
    config: EngineConfig,
    store: Store,
    /// Supremum ids per kind. Filled at startup; suprema are never deleted.
    suprema: DashMap<EntityKind, EntityId>,
}

impl Engine {
    /// Create a new engine, opening (or creating) the store and making sure
    /// each hierarchy has its supremum.
    pub fn new(config: EngineConfig) -> WardenResult<Self> {
        let store = match &config.data_dir {
            Some(dir) => Store::open(dir)?,
            None => Store::in_memory()?,
        };
        tracing::info!(
            persistent = config.data_dir.is_some(),
            "initializing warden engine"
        );

        let engine = Self {
            config,
            store,
            suprema: DashMap::new(),
        };
        engine.ensure_suprema()?;
        Ok(engine)
    }

    /// Memory-only engine. Convenience for tests and embedding.
    pub fn in_memory() -> WardenResult<Self> {
        Self::new(EngineConfig::default())
    }

    fn ensure_suprema(&self) -> WardenResult<()> {
        let txn = self.store.write()?;
        for kind in EntityKind::ALL {
            let record = ensure_supremum_row(&txn, kind)?;
            self.suprema.insert(kind, record.id);
        }
        txn.commit()?;
        Ok(())
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    /// Surrogate id of the supremum of `kind`.
    pub(crate) fn supremum_id(&self, kind: EntityKind) -> WardenResult<EntityId> {
        if let Some(id) = self.suprema.get(&kind) {
            return Ok(*id);
        }
        let read = self.store.read()?;
        let record = read
            .entity_by_ext(kind, SUPREMUM)?
            .ok_or_else(|| StoreError::Backend {
                message: format!("missing {kind} supremum row"),
            })?;
        self.suprema.insert(kind, record.id);
        Ok(record.id)
    }

    // -- registration --------------------------------------------------------

    /// Register (or upsert) a subject. Runtime registrations are always dynamic.
    pub fn register_subject(
        &self,
        id: impl Into<Identifier>,
        description: &str,
    ) -> WardenResult<()> {
        self.register(EntityKind::Subject, id.into(), description)
    }

    /// Register (or upsert) an object.
    pub fn register_object(
        &self,
        id: impl Into<Identifier>,
        description: &str,
    ) -> WardenResult<()> {
        self.register(EntityKind::Object, id.into(), description)
    }

    /// Register (or upsert) a permission.
    pub fn register_permission(
        &self,
        id: impl Into<Identifier>,
        description: &str,
    ) -> WardenResult<()> {
        self.register(EntityKind::Permission, id.into(), description)
    }

    fn register(
        &self,
        kind: EntityKind,
        id: Identifier,
        description: &str,
    ) -> WardenResult<()> {
        let ext = id.canonical();
        let txn = self.store.write()?;
        register_in(&txn, kind, &ext, description, false)?;
        txn.commit()?;
        tracing::debug!(%kind, id = %ext, "registered entity");
        Ok(())
    }

    /// Look up an entity row by external id. `"*"` resolves to the supremum.
    pub fn lookup(
        &self,
        kind: EntityKind,
        id: impl Into<Identifier>,
    ) -> WardenResult<Option<EntityRecord>> {
        let ext = id.into().canonical();
        let read = self.store.read()?;
        Ok(read.entity_by_ext(kind, ext.as_str())?)
    }

    /// Whether an entity with this external id exists.
    pub fn exists(&self, kind: EntityKind, id: impl Into<Identifier>) -> WardenResult<bool> {
        Ok(self.lookup(kind, id)?.is_some())
    }

    // -- hierarchy -----------------------------------------------------------

    /// Add a parent->child edge to the given hierarchy.
    pub fn add_child(
        &self,
        kind: EntityKind,
        parent: impl Into<Identifier>,
        child: impl Into<Identifier>,
    ) -> WardenResult<()> {
        let parent_ext = parent.into().canonical();
        let child_ext = child.into().canonical();
        let txn = self.store.write()?;
        let parent = resolve_parent(&txn, kind, &parent_ext)?;
        let child = resolve_child(&txn, kind, &child_ext)?;
        hierarchy::add_edge(&txn, kind, &parent, &child)?;
        txn.commit()?;
        tracing::debug!(%kind, parent = %parent_ext, child = %child_ext, "added edge");
        Ok(())
    }

    /// Remove a parent->child edge. Absent edges are a silent success.
    pub fn remove_child(
        &self,
        kind: EntityKind,
        parent: impl Into<Identifier>,
        child: impl Into<Identifier>,
    ) -> WardenResult<()> {
        let parent_ext = parent.into().canonical();
        let child_ext = child.into().canonical();
        let txn = self.store.write()?;
        let parent = resolve_parent(&txn, kind, &parent_ext)?;
        let child = resolve_child(&txn, kind, &child_ext)?;
        hierarchy::remove_edge(&txn, kind, parent.id, child.id)?;
        txn.commit()?;
        tracing::debug!(%kind, parent = %parent_ext, child = %child_ext, "removed edge");
        Ok(())
    }

    /// Direct parents of a node, sorted by external id.
    pub fn parents(
        &self,
        kind: EntityKind,
        id: impl Into<Identifier>,
    ) -> WardenResult<Vec<String>> {
        self.neighbors(kind, id.into(), ReadTxn::parents_of)
    }

    /// Direct children of a node, sorted by external id.
    pub fn children(
        &self,
        kind: EntityKind,
        id: impl Into<Identifier>,
    ) -> WardenResult<Vec<String>> {
        self.neighbors(kind, id.into(), ReadTxn::children_of)
    }

    /// All descendants of a node (the node itself excluded), sorted by
    /// external id.
    pub fn members(
        &self,
        kind: EntityKind,
        id: impl Into<Identifier>,
    ) -> WardenResult<Vec<String>> {
        self.neighbors(kind, id.into(), ReadTxn::descendants_of)
    }

    fn neighbors(
        &self,
        kind: EntityKind,
        id: Identifier,
        select: fn(&ReadTxn, EntityKind, EntityId) -> crate::store::StoreResult<Vec<u64>>,
    ) -> WardenResult<Vec<String>> {
        let ext = id.canonical();
        let read = self.store.read()?;
        let entity = read
            .entity_by_ext(kind, ext.as_str())?
            .ok_or_else(|| AccessError::NotFound {
                id: ext.as_str().to_string(),
            })?;
        let mut out = Vec::new();
        for raw in select(&read, kind, entity.id)? {
            out.push(resolve_ext(&read, kind, raw)?);
        }
        out.sort();
        Ok(out)
    }

    // -- rules ---------------------------------------------------------------

    /// Add a positive rule for the triple.
    pub fn grant(
        &self,
        subject: impl Into<Identifier>,
        object: impl Into<Identifier>,
        permission: impl Into<Identifier>,
    ) -> WardenResult<()> {
        self.put_rule(subject.into(), object.into(), permission.into(), Sign::Grant)
    }

    /// Add a negative rule for the triple.
    pub fn deny(
        &self,
        subject: impl Into<Identifier>,
        object: impl Into<Identifier>,
        permission: impl Into<Identifier>,
    ) -> WardenResult<()> {
        self.put_rule(subject.into(), object.into(), permission.into(), Sign::Deny)
    }

    /// Remove a positive rule. Absence is success.
    pub fn revoke(
        &self,
        subject: impl Into<Identifier>,
        object: impl Into<Identifier>,
        permission: impl Into<Identifier>,
    ) -> WardenResult<()> {
        self.drop_rule(subject.into(), object.into(), permission.into(), Sign::Grant)
    }

    /// Remove a negative rule. Absence is success.
    pub fn allow(
        &self,
        subject: impl Into<Identifier>,
        object: impl Into<Identifier>,
        permission: impl Into<Identifier>,
    ) -> WardenResult<()> {
        self.drop_rule(subject.into(), object.into(), permission.into(), Sign::Deny)
    }

    fn put_rule(
        &self,
        subject: Identifier,
        object: Identifier,
        permission: Identifier,
        sign: Sign,
    ) -> WardenResult<()> {
        let (s_ext, o_ext, p_ext) =
            (subject.canonical(), object.canonical(), permission.canonical());
        let txn = self.store.write()?;
        let (s, o, p) = resolve_triple_w(&txn, &s_ext, &o_ext, &p_ext)?;
        rules::put_rule(&txn, &s, &o, &p, sign, false)?;
        txn.commit()?;
        tracing::debug!(subject = %s_ext, object = %o_ext, permission = %p_ext, %sign, "put rule");
        Ok(())
    }

    fn drop_rule(
        &self,
        subject: Identifier,
        object: Identifier,
        permission: Identifier,
        sign: Sign,
    ) -> WardenResult<()> {
        let (s_ext, o_ext, p_ext) =
            (subject.canonical(), object.canonical(), permission.canonical());
        let txn = self.store.write()?;
        let (s, o, p) = resolve_triple_w(&txn, &s_ext, &o_ext, &p_ext)?;
        rules::drop_rule(&txn, s.id, o.id, p.id, sign)?;
        txn.commit()?;
        tracing::debug!(subject = %s_ext, object = %o_ext, permission = %p_ext, %sign, "dropped rule");
        Ok(())
    }

    /// All rules matching the entity on the given side, sorted by
    /// `(subject, object, permission, sign)`. Unknown ids yield an empty list.
    pub fn list_rules(
        &self,
        side: RuleSide,
        id: impl Into<Identifier>,
    ) -> WardenResult<Vec<Rule>> {
        let ext = id.into().canonical();
        let read = self.store.read()?;
        Ok(rules::list_rules_by(&read, side, ext.as_str())?)
    }

    // -- decisions -----------------------------------------------------------

    /// Answer an authorization query.
    ///
    /// This is the raising surface: unknown ids surface as the corresponding
    /// `invalid_*` error rather than folding into a denial.
    pub fn decision(
        &self,
        subject: impl Into<Identifier>,
        object: impl Into<Identifier>,
        permission: impl Into<Identifier>,
    ) -> WardenResult<Decision> {
        let s_ext = subject.into().canonical();
        let o_ext = object.into().canonical();
        let p_ext = permission.into().canonical();
        let read = self.store.read()?;

        let s = read
            .entity_by_ext(EntityKind::Subject, s_ext.as_str())?
            .ok_or_else(|| AccessError::InvalidSubject {
                id: s_ext.as_str().to_string(),
            })?;
        let o = read
            .entity_by_ext(EntityKind::Object, o_ext.as_str())?
            .ok_or_else(|| AccessError::InvalidObject {
                id: o_ext.as_str().to_string(),
            })?;
        let p = read
            .entity_by_ext(EntityKind::Permission, p_ext.as_str())?
            .ok_or_else(|| AccessError::InvalidPermission {
                id: p_ext.as_str().to_string(),
            })?;

        let supremum = self.supremum_id(EntityKind::Permission)?;
        Ok(decide::evaluate(&read, supremum, &s, &o, &p)?)
    }

    /// `true` when [`Engine::decision`] grants the triple.
    pub fn is_granted(
        &self,
        subject: impl Into<Identifier>,
        object: impl Into<Identifier>,
        permission: impl Into<Identifier>,
    ) -> WardenResult<bool> {
        Ok(self.decision(subject, object, permission)?.is_granted())
    }

    // -- reconciliation ------------------------------------------------------

    /// Converge persisted static state to the given declarations. Idempotent;
    /// dynamic entities, rules, and edges are never touched.
    pub fn init(&self, declarations: &Declarations) -> WardenResult<InitReport> {
        crate::declare::reconcile(self, declarations)
    }

    // -- introspection -------------------------------------------------------

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Summary counts of the persisted state.
    pub fn info(&self) -> WardenResult<EngineInfo> {
        let read = self.store.read()?;
        Ok(EngineInfo {
            subjects: read.entity_count(EntityKind::Subject)?,
            objects: read.entity_count(EntityKind::Object)?,
            permissions: read.entity_count(EntityKind::Permission)?,
            rules: read.rule_count()?,
            subject_edges: read.edge_count(EntityKind::Subject)?,
            object_edges: read.edge_count(EntityKind::Object)?,
            permission_edges: read.edge_count(EntityKind::Permission)?,
            persistent: self.config.data_dir.is_some(),
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Transaction-scoped helpers (shared with the reconciler)
// ---------------------------------------------------------------------------

/// Upsert the supremum row of one kind.
pub(crate) fn ensure_supremum_row(txn: &WriteTxn, kind: EntityKind) -> WardenResult<EntityRecord> {
    if let Some(existing) = txn.entity_by_ext(kind, SUPREMUM)? {
        return Ok(existing);
    }
    let record = EntityRecord {
        id: txn.allocate_id()?,
        ext_id: SUPREMUM.to_string(),
        description: format!("{kind} hierarchy supremum"),
        is_static: true,
    };
    txn.put_entity(kind, &record)?;
    Ok(record)
}

/// Register or upsert one entity within an open transaction, keeping the
/// supremum an ancestor of the node.
pub(crate) fn register_in(
    txn: &WriteTxn,
    kind: EntityKind,
    ext: &ExternalId,
    description: &str,
    is_static: bool,
) -> WardenResult<EntityRecord> {
    if ext.is_blank() {
        return Err(AccessError::IdRequired.into());
    }
    if description.trim().is_empty() {
        return Err(AccessError::DescriptionRequired.into());
    }
    // The supremum row never loses declaration ownership.
    let is_static = is_static || ext.is_supremum();

    let record = match txn.entity_by_ext(kind, ext.as_str())? {
        Some(mut existing) => {
            if existing.description != description || existing.is_static != is_static {
                existing.description = description.to_string();
                existing.is_static = is_static;
                txn.put_entity(kind, &existing)?;
            }
            existing
        }
        None => {
            let record = EntityRecord {
                id: txn.allocate_id()?,
                ext_id: ext.as_str().to_string(),
                description: description.to_string(),
                is_static,
            };
            txn.put_entity(kind, &record)?;
            record
        }
    };

    let supremum = ensure_supremum_row(txn, kind)?;
    hierarchy::ensure_supremum_path(txn, kind, &supremum, &record)?;
    Ok(record)
}

fn resolve_parent(
    txn: &WriteTxn,
    kind: EntityKind,
    ext: &ExternalId,
) -> WardenResult<EntityRecord> {
    txn.entity_by_ext(kind, ext.as_str())?
        .ok_or_else(|| {
            AccessError::InvalidParent {
                id: ext.as_str().to_string(),
            }
            .into()
        })
}

fn resolve_child(
    txn: &WriteTxn,
    kind: EntityKind,
    ext: &ExternalId,
) -> WardenResult<EntityRecord> {
    txn.entity_by_ext(kind, ext.as_str())?
        .ok_or_else(|| {
            AccessError::InvalidChild {
                id: ext.as_str().to_string(),
            }
            .into()
        })
}

/// Resolve a rule triple's endpoints inside a write transaction.
pub(crate) fn resolve_triple_w(
    txn: &WriteTxn,
    subject: &ExternalId,
    object: &ExternalId,
    permission: &ExternalId,
) -> WardenResult<(EntityRecord, EntityRecord, EntityRecord)> {
    let s = txn
        .entity_by_ext(EntityKind::Subject, subject.as_str())?
        .ok_or_else(|| AccessError::InvalidSubject {
            id: subject.as_str().to_string(),
        })?;
    let o = txn
        .entity_by_ext(EntityKind::Object, object.as_str())?
        .ok_or_else(|| AccessError::InvalidObject {
            id: object.as_str().to_string(),
        })?;
    let p = txn
        .entity_by_ext(EntityKind::Permission, permission.as_str())?
        .ok_or_else(|| AccessError::InvalidPermission {
            id: permission.as_str().to_string(),
        })?;
    Ok((s, o, p))
}

fn resolve_ext(read: &ReadTxn, kind: EntityKind, raw: u64) -> WardenResult<String> {
    let id = EntityId::new(raw).ok_or_else(|| StoreError::Backend {
        message: format!("zero {kind} id in reachability index"),
    })?;
    let record = read
        .entity_by_id(kind, id)?
        .ok_or_else(|| StoreError::Backend {
            message: format!("reachability index references missing {kind} ent:{raw}"),
        })?;
    Ok(record.ext_id)
}

/// Summary information about the engine state.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    pub subjects: usize,
    pub objects: usize,
    pub permissions: usize,
    pub rules: usize,
    pub subject_edges: usize,
    pub object_edges: usize,
    pub permission_edges: usize,
    pub persistent: bool,
}

impl std::fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "warden engine info")?;
        writeln!(f, "  subjects:         {}", self.subjects)?;
        writeln!(f, "  objects:          {}", self.objects)?;
        writeln!(f, "  permissions:      {}", self.permissions)?;
        writeln!(f, "  rules:            {}", self.rules)?;
        writeln!(f, "  subject edges:    {}", self.subject_edges)?;
        writeln!(f, "  object edges:     {}", self.object_edges)?;
        writeln!(f, "  permission edges: {}", self.permission_edges)?;
        writeln!(f, "  persistent:       {}", self.persistent)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WardenError;

    fn engine() -> Engine {
        Engine::in_memory().unwrap()
    }

    fn is_access(err: WardenError, check: impl FnOnce(&AccessError) -> bool) -> bool {
        matches!(err, WardenError::Access(ref e) if check(e))
    }

    #[test]
    fn suprema_exist_after_startup() {
        let engine = engine();
        for kind in EntityKind::ALL {
            let sup = engine.lookup(kind, "*").unwrap().unwrap();
            assert_eq!(sup.ext_id, "*");
            assert!(sup.is_static);
        }
    }

    #[test]
    fn blank_id_and_description_rejected() {
        let engine = engine();
        let err = engine.register_subject("   ", "someone").unwrap_err();
        assert!(is_access(err, |e| matches!(e, AccessError::IdRequired)));

        let err = engine.register_subject("u1", "  ").unwrap_err();
        assert!(is_access(err, |e| matches!(e, AccessError::DescriptionRequired)));

        // nothing was created
        assert!(!engine.exists(EntityKind::Subject, "u1").unwrap());
    }

    #[test]
    fn register_is_an_upsert() {
        let engine = engine();
        engine.register_subject("u1", "first").unwrap();
        engine.register_subject("u1", "second").unwrap();

        let rec = engine.lookup(EntityKind::Subject, "u1").unwrap().unwrap();
        assert_eq!(rec.description, "second");
        assert!(!rec.is_static);
    }

    #[test]
    fn registration_attaches_supremum_parent() {
        let engine = engine();
        engine.register_object("o1", "an object").unwrap();
        assert_eq!(engine.parents(EntityKind::Object, "o1").unwrap(), vec!["*"]);
    }

    #[test]
    fn every_registration_has_a_supremum_path() {
        let engine = engine();
        engine.register_subject("team", "the team").unwrap();
        engine.register_subject("alice", "alice").unwrap();
        engine
            .add_child(EntityKind::Subject, "team", "alice")
            .unwrap();
        engine.register_subject("bob", "bob").unwrap();

        // alice was registered before the edge: she has both parents.
        let mut parents = engine.parents(EntityKind::Subject, "alice").unwrap();
        parents.sort();
        assert_eq!(parents, vec!["*", "team"]);
        assert_eq!(engine.parents(EntityKind::Subject, "bob").unwrap(), vec!["*"]);
    }

    #[test]
    fn unregistered_query_raises_invalid() {
        let engine = engine();
        engine.register_subject("u1", "user").unwrap();
        engine.register_object("o1", "object").unwrap();

        let err = engine.decision("u1", "o1", "edit").unwrap_err();
        assert!(is_access(err, |e| {
            matches!(e, AccessError::InvalidPermission { id } if id == "edit")
        }));
    }

    #[test]
    fn fresh_triple_is_denied_then_granted_then_revoked() {
        let engine = engine();
        engine.register_subject("u1", "user").unwrap();
        engine.register_object("o1", "object").unwrap();
        engine.register_permission("edit", "edit things").unwrap();

        assert_eq!(engine.decision("u1", "o1", "edit").unwrap(), Decision::Denied);

        engine.grant("u1", "o1", "edit").unwrap();
        assert_eq!(engine.decision("u1", "o1", "edit").unwrap(), Decision::Granted);

        let err = engine.deny("u1", "o1", "edit").unwrap_err();
        assert!(is_access(err, |e| matches!(e, AccessError::ConflictingRuleType { .. })));

        engine.revoke("u1", "o1", "edit").unwrap();
        assert_eq!(engine.decision("u1", "o1", "edit").unwrap(), Decision::Denied);
    }

    #[test]
    fn add_child_validates_endpoints() {
        let engine = engine();
        engine.register_subject("team", "team").unwrap();

        let err = engine
            .add_child(EntityKind::Subject, "ghost", "team")
            .unwrap_err();
        assert!(is_access(err, |e| matches!(e, AccessError::InvalidParent { .. })));

        let err = engine
            .add_child(EntityKind::Subject, "team", "ghost")
            .unwrap_err();
        assert!(is_access(err, |e| matches!(e, AccessError::InvalidChild { .. })));
    }

    #[test]
    fn members_lists_descendants_excluding_self() {
        let engine = engine();
        engine.register_subject("staff", "staff").unwrap();
        engine.register_subject("editors", "editors").unwrap();
        engine.register_subject("alice", "alice").unwrap();
        engine
            .add_child(EntityKind::Subject, "staff", "editors")
            .unwrap();
        engine
            .add_child(EntityKind::Subject, "editors", "alice")
            .unwrap();

        assert_eq!(
            engine.members(EntityKind::Subject, "staff").unwrap(),
            vec!["alice", "editors"]
        );
        assert!(engine.members(EntityKind::Subject, "alice").unwrap().is_empty());

        let err = engine.members(EntityKind::Subject, "ghost").unwrap_err();
        assert!(is_access(err, |e| matches!(e, AccessError::NotFound { .. })));
    }

    #[test]
    fn identifier_kinds_normalize_on_every_surface() {
        let engine = engine();
        engine.register_subject(42i64, "numbered subject").unwrap();
        engine.register_object(Identifier::uri("doc", "q3"), "third quarter").unwrap();
        engine.register_permission(Identifier::token("READ"), "read access").unwrap();

        assert!(engine.exists(EntityKind::Subject, "42").unwrap());
        assert!(engine.exists(EntityKind::Object, "doc://q3").unwrap());
        assert!(engine.exists(EntityKind::Permission, "read").unwrap());

        engine.grant(42i64, Identifier::uri("doc", "q3"), Identifier::token("READ")).unwrap();
        assert!(engine.is_granted("42", "doc://q3", "read").unwrap());
    }

    #[test]
    fn info_counts_entities_and_rules() {
        let engine = engine();
        engine.register_subject("u1", "user").unwrap();
        engine.register_object("o1", "object").unwrap();
        engine.register_permission("edit", "edit").unwrap();
        engine.grant("u1", "o1", "edit").unwrap();

        let info = engine.info().unwrap();
        assert_eq!(info.subjects, 2); // supremum + u1
        assert_eq!(info.objects, 2);
        assert_eq!(info.permissions, 2);
        assert_eq!(info.rules, 1);
        assert!(!info.persistent);
    }
}
