//! Access rule store: signed (subject, object, permission) triples.
//!
//! The triple is the primary key; at most one sign exists per triple at any
//! moment. Putting a rule that already exists with the same sign is a silent
//! no-op, with the opposite sign a [`AccessError::ConflictingRuleType`].

use std::collections::HashMap;

use crate::entity::{EntityId, EntityKind, EntityRecord, Rule, RuleRow, RuleSide, Sign};
use crate::error::{AccessError, StoreError, WardenResult};
use crate::store::{ReadTxn, StoreResult, WriteTxn};

/// Insert a rule for the triple, enforcing sign uniqueness.
///
/// Returns `Ok(false)` when an identical rule already existed. Static
/// ownership is sticky: a static put over an existing dynamic rule promotes
/// it, a dynamic put over a static rule leaves it static.
pub(crate) fn put_rule(
    txn: &WriteTxn,
    subject: &EntityRecord,
    object: &EntityRecord,
    permission: &EntityRecord,
    sign: Sign,
    is_static: bool,
) -> WardenResult<bool> {
    let key = (subject.id.get(), object.id.get(), permission.id.get());
    match txn.rule(key)? {
        None => {
            txn.put_rule_row(key, RuleRow { sign, is_static })?;
            Ok(true)
        }
        Some(existing) if existing.sign == sign => {
            if is_static && !existing.is_static {
                txn.put_rule_row(key, RuleRow { sign, is_static: true })?;
            }
            Ok(false)
        }
        Some(_) => Err(AccessError::ConflictingRuleType {
            subject: subject.ext_id.clone(),
            object: object.ext_id.clone(),
            permission: permission.ext_id.clone(),
        }
        .into()),
    }
}

/// Remove exactly the matching (triple, sign) row. Absence is success.
pub(crate) fn drop_rule(
    txn: &WriteTxn,
    subject: EntityId,
    object: EntityId,
    permission: EntityId,
    sign: Sign,
) -> StoreResult<bool> {
    let key = (subject.get(), object.get(), permission.get());
    match txn.rule(key)? {
        Some(row) if row.sign == sign => txn.remove_rule_row(key),
        _ => Ok(false),
    }
}

/// Delete every rule referencing `id` at the position its kind occupies.
/// Used when an entity is removed; rules borrow entities by surrogate id.
pub(crate) fn drop_rules_referencing(
    txn: &WriteTxn,
    kind: EntityKind,
    id: EntityId,
) -> StoreResult<usize> {
    let raw = id.get();
    let mut dropped = 0;
    for (key, _) in txn.all_rules()? {
        let matches = match kind {
            EntityKind::Subject => key.0 == raw,
            EntityKind::Object => key.1 == raw,
            EntityKind::Permission => key.2 == raw,
        };
        if matches && txn.remove_rule_row(key)? {
            dropped += 1;
        }
    }
    Ok(dropped)
}

/// Delete every static rule. The reconciler re-creates them from the declaration.
pub(crate) fn drop_static_rules(txn: &WriteTxn) -> StoreResult<usize> {
    let mut dropped = 0;
    for (key, row) in txn.all_rules()? {
        if row.is_static && txn.remove_rule_row(key)? {
            dropped += 1;
        }
    }
    Ok(dropped)
}

/// All rules matching `entity` on the given side, with external ids resolved,
/// sorted by `(subject, object, permission, sign)`.
///
/// An unknown external id yields an empty list; listing is never an
/// enforcement point.
pub(crate) fn list_rules_by(
    read: &ReadTxn,
    side: RuleSide,
    ext_id: &str,
) -> StoreResult<Vec<Rule>> {
    let kind = match side {
        RuleSide::Subject => EntityKind::Subject,
        RuleSide::Object => EntityKind::Object,
    };
    let Some(entity) = read.entity_by_ext(kind, ext_id)? else {
        return Ok(Vec::new());
    };

    let matching: Vec<((u64, u64, u64), RuleRow)> = match side {
        RuleSide::Subject => read.rules_for_subject(entity.id.get())?,
        RuleSide::Object => read
            .all_rules()?
            .into_iter()
            .filter(|(key, _)| key.1 == entity.id.get())
            .collect(),
    };

    let mut names: HashMap<(EntityKind, u64), String> = HashMap::new();
    let mut resolve = |kind: EntityKind, raw: u64| -> StoreResult<String> {
        if let Some(name) = names.get(&(kind, raw)) {
            return Ok(name.clone());
        }
        let id = EntityId::new(raw).ok_or_else(|| dangling(kind, raw))?;
        let record = read.entity_by_id(kind, id)?.ok_or_else(|| dangling(kind, raw))?;
        names.insert((kind, raw), record.ext_id.clone());
        Ok(record.ext_id)
    };

    let mut rules = Vec::with_capacity(matching.len());
    for ((s, o, p), row) in matching {
        rules.push(Rule {
            subject: resolve(EntityKind::Subject, s)?,
            object: resolve(EntityKind::Object, o)?,
            permission: resolve(EntityKind::Permission, p)?,
            sign: row.sign,
        });
    }
    rules.sort();
    Ok(rules)
}

fn dangling(kind: EntityKind, raw: u64) -> StoreError {
    StoreError::Backend {
        message: format!("rule references missing {kind} ent:{raw}"),
    }
}
