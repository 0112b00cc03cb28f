//! Entry points for the surrounding application: turn a committed change into
//! the propagation work that follows from it.
//!
//! Nothing here writes. The work is applied by
//! [`Propagator::run`](super::Propagator::run), immediately or at the end of a
//! deferred [`PropagationScope`].

use std::collections::{BTreeSet, HashMap, HashSet};

use super::expand::Anchor;
use super::graph::{LOOKUP_CHUNK, RELATIONSHIP, RelationshipGraph};
use super::rules::RuleSet;
use crate::errors::PropagationError;
use crate::models::acl::{AccessControlEntry, ObjectRef};
use crate::models::relationship::Relationship;
use crate::store::AclStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipChange {
    Created,
    /// Called before the row is removed, or after; either works.
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclChange {
    Created,
    /// The row now carries a different role than `previous_role_id`.
    RoleChanged { previous_role_id: i64 },
    Deleted,
}

/// Rows to purge (children before parents) and anchors to expand from.
/// Purges are applied first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationWork {
    pub purge: Vec<i64>,
    pub anchors: Vec<Anchor>,
}

impl PropagationWork {
    pub fn is_empty(&self) -> bool {
        self.purge.is_empty() && self.anchors.is_empty()
    }
}

/// A committed change, as reported by the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Relationship {
        relationship: Relationship,
        change: RelationshipChange,
    },
    Acl {
        acl: AccessControlEntry,
        change: AclChange,
    },
}

/// Explicit replacement for a global "propagation enabled" switch.
///
/// An immediate scope propagates each change as it is reported. A deferred
/// scope only records changes; [`Propagator::finish`](super::Propagator::finish)
/// computes and applies their work in reporting order, each against the state
/// the previous one left behind. Changes that fail stay recorded. Dropping a
/// deferred scope with recorded changes loses them; a later reconciliation run
/// restores the missing rows.
#[derive(Debug)]
pub struct PropagationScope {
    deferred: bool,
    pending: Vec<ChangeEvent>,
}

impl PropagationScope {
    pub fn immediate() -> Self {
        PropagationScope { deferred: false, pending: Vec::new() }
    }

    pub fn deferred() -> Self {
        PropagationScope { deferred: true, pending: Vec::new() }
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Number of recorded changes not yet propagated.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn record(&mut self, event: ChangeEvent) {
        self.pending.push(event);
    }

    pub(crate) fn take(&mut self) -> Vec<ChangeEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Put unpropagated changes back at the front, ahead of anything recorded since.
    pub(crate) fn restore(&mut self, mut events: Vec<ChangeEvent>) {
        events.append(&mut self.pending);
        self.pending = events;
    }
}

impl Drop for PropagationScope {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            log::warn!(
                "Propagation scope dropped with {} unpropagated changes; run reconciliation to restore them",
                self.pending.len()
            );
        }
    }
}

pub async fn relationship_work<S>(
    store: &S,
    rules: &RuleSet,
    relationship: &Relationship,
    change: RelationshipChange,
) -> Result<PropagationWork, PropagationError>
where
    S: AclStore + RelationshipGraph + ?Sized,
{
    let (a, b) = (relationship.source(), relationship.destination());
    match change {
        RelationshipChange::Created => {
            if a == b {
                return Ok(PropagationWork::default());
            }
            // Only rows on the two endpoints whose rule position can reach
            // across this edge; everything else is already in place.
            let acls = store.acls_on_objects(&[a, b]).await?;
            let anchors = load_anchors(store, acls)
                .await?
                .into_iter()
                .filter(|anchor| {
                    let Some(other) = relationship.other_end(&anchor.acl.object()) else {
                        return false;
                    };
                    rules.node_at(&anchor.path).is_some_and(|node| {
                        node.mentions_type(&other.object_type) || node.mentions_type(RELATIONSHIP)
                    })
                })
                .map(|anchor| anchor.via(relationship.clone()))
                .collect();
            Ok(PropagationWork { purge: Vec::new(), anchors })
        }
        RelationshipChange::Deleted => {
            let mut stale: BTreeSet<i64> = store
                .acls_on_objects(&[relationship.as_object()])
                .await?
                .into_iter()
                .filter(AccessControlEntry::is_propagated)
                .map(|acl| acl.id)
                .collect();

            let still_connected = store
                .connecting(&a, &b)
                .await?
                .iter()
                .any(|other| other.id != relationship.id);
            if a != b && !still_connected {
                let on_ends = store.acls_on_objects(&[a.clone(), b.clone()]).await?;
                let ids_on = |object: &ObjectRef| -> HashSet<i64> {
                    on_ends.iter().filter(|acl| acl.object() == *object).map(|acl| acl.id).collect()
                };
                let (on_a, on_b) = (ids_on(&a), ids_on(&b));
                for acl in &on_ends {
                    let Some(parent) = acl.parent_id else { continue };
                    let object = acl.object();
                    if (object == b && on_a.contains(&parent)) || (object == a && on_b.contains(&parent)) {
                        stale.insert(acl.id);
                    }
                }
            }

            let stale: Vec<i64> = stale.into_iter().collect();
            let mut purge = descendants(store, &stale).await?;
            purge.extend(stale);
            Ok(PropagationWork { purge, anchors: Vec::new() })
        }
    }
}

pub async fn acl_work<S>(
    store: &S,
    acl: &AccessControlEntry,
    change: AclChange,
) -> Result<PropagationWork, PropagationError>
where
    S: AclStore + ?Sized,
{
    match change {
        AclChange::Created => Ok(PropagationWork {
            purge: Vec::new(),
            anchors: load_anchors(store, vec![acl.clone()]).await?,
        }),
        AclChange::RoleChanged { previous_role_id } => {
            log::debug!(
                "ACL {} changed role {} -> {}, rebuilding its propagation",
                acl.id, previous_role_id, acl.ac_role_id
            );
            Ok(PropagationWork {
                purge: descendants(store, &[acl.id]).await?,
                anchors: load_anchors(store, vec![acl.clone()]).await?,
            })
        }
        AclChange::Deleted => {
            let purge = if acl.is_propagated() {
                descendants(store, &[acl.id]).await?
            } else {
                store.acl_ids_by_base(&[acl.id]).await?
            };
            Ok(PropagationWork { purge, anchors: Vec::new() })
        }
    }
}

/// Build anchors for existing rows by loading each row's chain up to its root.
/// Rows whose chain is broken are skipped.
pub async fn load_anchors<S>(
    store: &S,
    acls: Vec<AccessControlEntry>,
) -> Result<Vec<Anchor>, PropagationError>
where
    S: AclStore + ?Sized,
{
    let mut known: HashMap<i64, AccessControlEntry> =
        acls.iter().map(|acl| (acl.id, acl.clone())).collect();

    loop {
        let missing: BTreeSet<i64> = known
            .values()
            .filter_map(|acl| acl.parent_id)
            .filter(|parent| !known.contains_key(parent))
            .collect();
        if missing.is_empty() {
            break;
        }
        let missing: Vec<i64> = missing.into_iter().collect();
        let mut fetched = Vec::new();
        for chunk in missing.chunks(LOOKUP_CHUNK) {
            fetched.extend(store.acls_by_ids(chunk).await?);
        }
        if fetched.is_empty() {
            break;
        }
        known.extend(fetched.into_iter().map(|acl| (acl.id, acl)));
    }

    let mut anchors = Vec::with_capacity(acls.len());
    for acl in acls {
        let mut chain = vec![acl.clone()];
        let mut cursor = acl.parent_id;
        while let Some(parent_id) = cursor {
            match known.get(&parent_id) {
                Some(parent) if chain.len() <= known.len() => {
                    cursor = parent.parent_id;
                    chain.push(parent.clone());
                }
                _ => {
                    log::warn!("ACL {} has a broken parent chain at {}, skipping", acl.id, parent_id);
                    chain.clear();
                    break;
                }
            }
        }
        chain.reverse();
        if let Some(anchor) = Anchor::from_chain(&chain) {
            anchors.push(anchor);
        }
    }
    Ok(anchors)
}

/// Every row below `ids` in the parent tree, deepest level first.
pub async fn descendants<S>(store: &S, ids: &[i64]) -> Result<Vec<i64>, PropagationError>
where
    S: AclStore + ?Sized,
{
    let mut seen: HashSet<i64> = ids.iter().copied().collect();
    let mut levels: Vec<Vec<i64>> = Vec::new();
    let mut frontier: Vec<i64> = ids.to_vec();

    while !frontier.is_empty() {
        let mut children = Vec::new();
        for chunk in frontier.chunks(LOOKUP_CHUNK) {
            for id in store.child_acl_ids(chunk).await? {
                if seen.insert(id) {
                    children.push(id);
                }
            }
        }
        if !children.is_empty() {
            levels.push(children.clone());
        }
        frontier = children;
    }

    Ok(levels.into_iter().rev().flatten().collect())
}
