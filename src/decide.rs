//! Authorization decision algorithm.
//!
//! A query `(subject, object, permission)` is answered from four closure sets:
//! the inclusive ancestor sets of subject and object, and both the inclusive
//! ancestor and descendant sets of the permission. Grants propagate down the
//! permission hierarchy (a rule on a stronger permission covers the weaker),
//! denies propagate up (vetoing "read" also vetoes "edit"), and the
//! permission supremum vetoes everything on the deny branch. A negative rule
//! beats any positive rule regardless of graph distance; with no applicable
//! rule at all the answer is denied.

use std::collections::HashSet;

use crate::entity::{Decision, EntityId, EntityKind, EntityRecord, Sign};
use crate::store::{ReadTxn, StoreResult};

/// Evaluate one authorization query against a snapshot.
pub(crate) fn evaluate(
    read: &ReadTxn,
    permission_supremum: EntityId,
    subject: &EntityRecord,
    object: &EntityRecord,
    permission: &EntityRecord,
) -> StoreResult<Decision> {
    let mut subject_line = read.ancestors_of(EntityKind::Subject, subject.id)?;
    subject_line.push(subject.id.get());

    let mut object_line: HashSet<u64> = read
        .ancestors_of(EntityKind::Object, object.id)?
        .into_iter()
        .collect();
    object_line.insert(object.id.get());

    let mut stronger: HashSet<u64> = read
        .ancestors_of(EntityKind::Permission, permission.id)?
        .into_iter()
        .collect();
    stronger.insert(permission.id.get());

    let mut implied: HashSet<u64> = read
        .descendants_of(EntityKind::Permission, permission.id)?
        .into_iter()
        .collect();
    implied.insert(permission.id.get());

    let supremum = permission_supremum.get();
    let mut positive = false;

    for &line_subject in &subject_line {
        for ((_, rule_object, rule_permission), row) in read.rules_for_subject(line_subject)? {
            if !object_line.contains(&rule_object) {
                continue;
            }
            match row.sign {
                Sign::Deny => {
                    if implied.contains(&rule_permission) || rule_permission == supremum {
                        return Ok(Decision::Denied);
                    }
                }
                Sign::Grant => {
                    if stronger.contains(&rule_permission) {
                        positive = true;
                    }
                }
            }
        }
    }

    Ok(if positive {
        Decision::Granted
    } else {
        Decision::Denied
    })
}
