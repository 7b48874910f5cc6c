//! Policy declarations: the static baseline an application ships with.
//!
//! A declaration is a TOML-defined (or builder-built) bundle of permissions,
//! roles, collections, and rules. [`Engine::init`](crate::engine::Engine::init)
//! converges the persisted static state to the declaration in five phases,
//! idempotently, without touching anything created at runtime.
//!
//! ```toml
//! [[permission]]
//! id = "edit"
//! description = "Edit documents"
//! implies = ["read"]
//!
//! [[role]]
//! id = "admin"
//! description = "Administrators"
//! implies = ["users"]          # users -> admin: admin inherits users' rules
//!
//! [[collection]]
//! id = "private"
//! description = "Private documents"
//! in = ["docs"]
//!
//! [[grant]]
//! permission = "edit"
//! on = "docs"
//! to = "admin"
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::engine::{self, Engine};
use crate::entity::{EntityKind, EntityRecord, Sign};
use crate::error::{AccessError, DeclError, StoreError, WardenResult};
use crate::hierarchy;
use crate::ident::{ExternalId, Identifier, SUPREMUM};
use crate::rules;
use crate::store::WriteTxn;

// ── Declaration data model ──────────────────────────────────────────────

/// A declared permission. Edges run from the declared permission to each
/// implied one: granting the declared permission covers what it implies.
#[derive(Debug, Clone, Deserialize)]
pub struct PermissionDecl {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub implies: Vec<String>,
}

/// A declared role. Creates both a subject and an object row. Edges run from
/// each implied role to the declared one: the declared role inherits the
/// implied roles' rules.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleDecl {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub implies: Vec<String>,
}

/// A declared object collection, nested under its listed parents.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionDecl {
    pub id: String,
    pub description: String,
    #[serde(default, rename = "in")]
    pub parents: Vec<String>,
}

/// A declared rule: `permission`, `on` an object, `to` a subject.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDecl {
    pub permission: String,
    pub on: String,
    pub to: String,
}

/// The full declarative baseline consumed by [`Engine::init`](crate::engine::Engine::init).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Declarations {
    #[serde(default, rename = "permission")]
    pub permissions: Vec<PermissionDecl>,
    #[serde(default, rename = "role")]
    pub roles: Vec<RoleDecl>,
    #[serde(default, rename = "collection")]
    pub collections: Vec<CollectionDecl>,
    #[serde(default, rename = "grant")]
    pub grants: Vec<RuleDecl>,
    #[serde(default, rename = "deny")]
    pub denies: Vec<RuleDecl>,
}

impl Declarations {
    /// An empty declaration set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse declarations from a TOML string.
    pub fn from_toml_str(input: &str) -> Result<Self, DeclError> {
        toml::from_str(input).map_err(|e| DeclError::Parse {
            message: e.to_string(),
        })
    }

    /// Load declarations from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, DeclError> {
        let content = std::fs::read_to_string(path).map_err(|e| DeclError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content)
    }

    /// Declare a permission with the permissions it implies.
    pub fn permission(
        mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        implies: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.permissions.push(PermissionDecl {
            id: id.into(),
            description: description.into(),
            implies: implies.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Declare a role with the roles it implies (inherits from).
    pub fn role(
        mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        implies: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.roles.push(RoleDecl {
            id: id.into(),
            description: description.into(),
            implies: implies.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Declare an object collection nested in the given parents.
    pub fn collection(
        mut self,
        id: impl Into<String>,
        description: impl Into<String>,
        parents: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.collections.push(CollectionDecl {
            id: id.into(),
            description: description.into(),
            parents: parents.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Declare a positive rule.
    pub fn grant(
        mut self,
        permission: impl Into<String>,
        on: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.grants.push(RuleDecl {
            permission: permission.into(),
            on: on.into(),
            to: to.into(),
        });
        self
    }

    /// Declare a negative rule.
    pub fn deny(
        mut self,
        permission: impl Into<String>,
        on: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.denies.push(RuleDecl {
            permission: permission.into(),
            on: on.into(),
            to: to.into(),
        });
        self
    }
}

/// Report after converging persisted state to a declaration set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitReport {
    /// Static rules removed by the orphan sweep (all of them; rebuilt in phase 4).
    pub rules_swept: usize,
    /// Static entities removed because they are no longer declared.
    pub entities_swept: usize,
    /// Declared entity rows registered or upserted.
    pub entities_registered: usize,
    /// Static rules recreated from the declaration.
    pub rules_rebuilt: usize,
    /// Static edges added to match the declaration.
    pub edges_added: usize,
    /// Static edges removed because they are no longer declared.
    pub edges_removed: usize,
}

// ── Reconciliation ──────────────────────────────────────────────────────

fn canon(raw: &str) -> ExternalId {
    Identifier::from(raw).canonical()
}

/// Canonicalized declared external ids per kind.
struct DeclaredSets {
    subjects: HashSet<String>,
    objects: HashSet<String>,
    permissions: HashSet<String>,
}

impl DeclaredSets {
    fn collect(decls: &Declarations) -> Self {
        let roles: Vec<String> = decls
            .roles
            .iter()
            .map(|r| canon(&r.id).into_string())
            .collect();
        let mut objects: HashSet<String> = roles.iter().cloned().collect();
        objects.extend(decls.collections.iter().map(|c| canon(&c.id).into_string()));
        Self {
            subjects: roles.into_iter().collect(),
            objects,
            permissions: decls
                .permissions
                .iter()
                .map(|p| canon(&p.id).into_string())
                .collect(),
        }
    }

    fn of(&self, kind: EntityKind) -> &HashSet<String> {
        match kind {
            EntityKind::Subject => &self.subjects,
            EntityKind::Object => &self.objects,
            EntityKind::Permission => &self.permissions,
        }
    }
}

/// Converge persisted static state to `decls`. One write transaction per
/// phase; the store admits a single writer, so each phase is serializable
/// against concurrent mutators.
pub(crate) fn reconcile(engine: &Engine, decls: &Declarations) -> WardenResult<InitReport> {
    let mut report = InitReport::default();
    let declared = DeclaredSets::collect(decls);

    // Phase 1: suprema. Engine startup guarantees them; re-ensuring makes a
    // reconcile against a foreign data directory self-sufficient.
    let txn = engine.store().write()?;
    for kind in EntityKind::ALL {
        engine::ensure_supremum_row(&txn, kind)?;
    }
    txn.commit()?;

    sweep_orphans(engine, &declared, &mut report)?;
    register_declared(engine, decls, &mut report)?;
    rebuild_rules(engine, decls, &mut report)?;
    reconcile_edges(engine, decls, &mut report)?;

    tracing::info!(
        entities_swept = report.entities_swept,
        entities_registered = report.entities_registered,
        rules_rebuilt = report.rules_rebuilt,
        edges_added = report.edges_added,
        edges_removed = report.edges_removed,
        "reconciled declarations"
    );
    Ok(report)
}

/// Phase 2: delete all static rules, then every static entity that is no
/// longer declared, cascading its rules (dynamic ones included) and edges.
fn sweep_orphans(
    engine: &Engine,
    declared: &DeclaredSets,
    report: &mut InitReport,
) -> WardenResult<()> {
    let txn = engine.store().write()?;
    report.rules_swept = rules::drop_static_rules(&txn)?;

    let mut touched: Vec<EntityKind> = Vec::new();
    for kind in EntityKind::ALL {
        let keep = declared.of(kind);
        let mut kind_touched = false;
        for record in txn.entities(kind)? {
            if !record.is_static
                || record.ext_id == SUPREMUM
                || keep.contains(record.ext_id.as_str())
            {
                continue;
            }
            rules::drop_rules_referencing(&txn, kind, record.id)?;
            kind_touched |= hierarchy::remove_all_edges_of(&txn, kind, record.id)?;
            txn.delete_entity(kind, &record)?;
            report.entities_swept += 1;
            tracing::debug!(%kind, id = %record.ext_id, "swept undeclared static entity");
        }
        if kind_touched {
            touched.push(kind);
        }
    }

    // A swept parent may have been a survivor's only path to the supremum.
    for kind in touched {
        hierarchy::rebuild_closure(&txn, kind)?;
        restore_supremum_paths(&txn, kind)?;
    }
    txn.commit()?;
    Ok(())
}

/// Phase 3: register every declared entity as static, upserting descriptions.
/// Roles materialize in both the subject and the object hierarchy.
fn register_declared(
    engine: &Engine,
    decls: &Declarations,
    report: &mut InitReport,
) -> WardenResult<()> {
    let txn = engine.store().write()?;
    for p in &decls.permissions {
        engine::register_in(&txn, EntityKind::Permission, &canon(&p.id), &p.description, true)?;
        report.entities_registered += 1;
    }
    for r in &decls.roles {
        let ext = canon(&r.id);
        engine::register_in(&txn, EntityKind::Subject, &ext, &r.description, true)?;
        engine::register_in(&txn, EntityKind::Object, &ext, &r.description, true)?;
        report.entities_registered += 1;
    }
    for c in &decls.collections {
        engine::register_in(&txn, EntityKind::Object, &canon(&c.id), &c.description, true)?;
        report.entities_registered += 1;
    }
    txn.commit()?;
    Ok(())
}

/// Phase 4: recreate static rules through the regular grant/deny path.
fn rebuild_rules(
    engine: &Engine,
    decls: &Declarations,
    report: &mut InitReport,
) -> WardenResult<()> {
    let txn = engine.store().write()?;
    let signed = decls
        .grants
        .iter()
        .map(|d| (d, Sign::Grant))
        .chain(decls.denies.iter().map(|d| (d, Sign::Deny)));
    for (decl, sign) in signed {
        let (s, o, p) = engine::resolve_triple_w(
            &txn,
            &canon(&decl.to),
            &canon(&decl.on),
            &canon(&decl.permission),
        )?;
        rules::put_rule(&txn, &s, &o, &p, sign, true)?;
        report.rules_rebuilt += 1;
    }
    txn.commit()?;
    Ok(())
}

/// Phase 5: diff the declared static neighbor sets against persisted static
/// edges. Roles and collections declare their parents; permissions declare
/// their children. Supremum edges stay out of the diff.
fn reconcile_edges(
    engine: &Engine,
    decls: &Declarations,
    report: &mut InitReport,
) -> WardenResult<()> {
    let txn = engine.store().write()?;

    // (kind, node, declared neighbor exts, neighbors-are-parents)
    let mut diffs: Vec<(EntityKind, ExternalId, Vec<ExternalId>, bool)> = Vec::new();
    for p in &decls.permissions {
        let implied = p.implies.iter().map(|s| canon(s)).collect();
        diffs.push((EntityKind::Permission, canon(&p.id), implied, false));
    }
    for r in &decls.roles {
        let implied: Vec<ExternalId> = r.implies.iter().map(|s| canon(s)).collect();
        diffs.push((EntityKind::Subject, canon(&r.id), implied.clone(), true));
        diffs.push((EntityKind::Object, canon(&r.id), implied, true));
    }
    for c in &decls.collections {
        let parents = c.parents.iter().map(|s| canon(s)).collect();
        diffs.push((EntityKind::Object, canon(&c.id), parents, true));
    }

    // Removals first: each is a raw edge delete, closure is rebuilt per kind
    // before the (incremental) additions below.
    let mut touched: HashSet<u8> = HashSet::new();
    let mut additions: Vec<(EntityKind, EntityRecord, ExternalId, bool)> = Vec::new();
    for (kind, node_ext, declared, parents_side) in diffs {
        let node = txn
            .entity_by_ext(kind, node_ext.as_str())?
            .ok_or_else(|| StoreError::Backend {
                message: format!("declared {kind} \"{node_ext}\" missing after registration"),
            })?;

        let current = if parents_side {
            txn.parents_of(kind, node.id)?
        } else {
            txn.children_of(kind, node.id)?
        };
        let declared_set: HashSet<&str> = declared.iter().map(|e| e.as_str()).collect();

        let mut current_static: HashSet<String> = HashSet::new();
        for raw in current {
            let Some(id) = crate::entity::EntityId::new(raw) else {
                continue;
            };
            let Some(neighbor) = txn.entity_by_id(kind, id)? else {
                continue;
            };
            // Edges with a dynamic endpoint and supremum edges are not ours.
            if !neighbor.is_static || neighbor.ext_id == SUPREMUM {
                continue;
            }
            if !declared_set.contains(neighbor.ext_id.as_str()) {
                let (parent, child) = if parents_side {
                    (neighbor.id, node.id)
                } else {
                    (node.id, neighbor.id)
                };
                if txn.remove_edge(kind, parent.get(), child.get())? {
                    report.edges_removed += 1;
                    touched.insert(kind.code());
                }
            }
            current_static.insert(neighbor.ext_id);
        }

        for ext in declared {
            if !current_static.contains(ext.as_str()) {
                additions.push((kind, node.clone(), ext, parents_side));
            }
        }
    }

    for kind in EntityKind::ALL {
        if touched.contains(&kind.code()) {
            hierarchy::rebuild_closure(&txn, kind)?;
        }
    }

    for (kind, node, neighbor_ext, parents_side) in additions {
        let neighbor = txn.entity_by_ext(kind, neighbor_ext.as_str())?.ok_or_else(|| {
            let id = neighbor_ext.as_str().to_string();
            if parents_side {
                AccessError::InvalidParent { id }
            } else {
                AccessError::InvalidChild { id }
            }
        })?;
        let (parent, child) = if parents_side {
            (&neighbor, &node)
        } else {
            (&node, &neighbor)
        };
        if hierarchy::add_edge(&txn, kind, parent, child)? {
            report.edges_added += 1;
        }
    }

    // Removed edges may have severed a node's last path to the supremum.
    for kind in EntityKind::ALL {
        restore_supremum_paths(&txn, kind)?;
    }
    txn.commit()?;
    Ok(())
}

fn restore_supremum_paths(txn: &WriteTxn, kind: EntityKind) -> WardenResult<()> {
    let supremum = txn
        .entity_by_ext(kind, SUPREMUM)?
        .ok_or_else(|| StoreError::Backend {
            message: format!("missing {kind} supremum row"),
        })?;
    for record in txn.entities(kind)? {
        hierarchy::ensure_supremum_path(txn, kind, &supremum, &record)?;
    }
    Ok(())
}
