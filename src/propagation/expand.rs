//! ACL expansion: walk the rule tree over the relationship graph and plan
//! every propagated row reachable from a set of anchors.
//!
//! The walk is breadth-first, one rule level at a time, so each level needs a
//! single batched graph lookup per target type. Planned rows live in an arena
//! ([`Expansion::nodes`]); a row whose parent was planned in the same walk
//! points at it by index, since its id only exists once the parent is written.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::graph::{RELATIONSHIP, RelatedObjects, RelationshipGraph};
use super::rules::{RuleNode, RuleSet};
use crate::errors::PropagationError;
use crate::models::acl::{AccessControlEntry, ObjectRef};
use crate::models::relationship::Relationship;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentRef {
    /// An ACL row that already exists.
    Persisted(i64),
    /// Index into [`Expansion::nodes`].
    Planned(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAcl {
    pub ac_role_id: i64,
    pub object: ObjectRef,
    pub parent: ParentRef,
    pub base_id: i64,
    /// 1 for rows whose parent is an anchor.
    pub depth: usize,
}

/// An existing ACL row to propagate from, with its position in the rule tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub acl: AccessControlEntry,
    /// Role ids from the chain's root grant down to `acl`.
    pub path: Vec<i64>,
    /// (object, role) of every row in the chain, root first, `acl` last.
    pub lineage: Vec<(ObjectRef, i64)>,
    /// Restrict the first hop to this edge.
    pub via: Option<Relationship>,
}

impl Anchor {
    /// Anchor at a directly assigned grant.
    pub fn root(acl: AccessControlEntry) -> Self {
        Anchor {
            path: vec![acl.ac_role_id],
            lineage: vec![(acl.object(), acl.ac_role_id)],
            acl,
            via: None,
        }
    }

    /// Anchor at the last row of `chain`, which runs root first. Returns `None`
    /// if the chain does not start at a directly assigned grant.
    pub fn from_chain(chain: &[AccessControlEntry]) -> Option<Self> {
        let (first, _) = chain.split_first()?;
        if first.is_propagated() {
            return None;
        }
        let last = chain.last()?;
        Some(Anchor {
            acl: last.clone(),
            path: chain.iter().map(|a| a.ac_role_id).collect(),
            lineage: chain.iter().map(|a| (a.object(), a.ac_role_id)).collect(),
            via: None,
        })
    }

    pub fn via(mut self, relationship: Relationship) -> Self {
        self.via = Some(relationship);
        self
    }
}

/// The rows a walk decided must exist, in breadth-first order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expansion {
    pub nodes: Vec<PlannedAcl>,
    /// Times the walk refused to grant a role back onto one of its own ancestors.
    pub cycle_guard_trips: usize,
}

impl Expansion {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.nodes.last().map_or(0, |n| n.depth)
    }
}

struct FrontierItem<'r> {
    parent: ParentRef,
    object: ObjectRef,
    base_id: i64,
    node: &'r RuleNode,
    lineage: Vec<(ObjectRef, i64)>,
    via: Option<Relationship>,
}

pub struct ExpansionEngine<'a, G: ?Sized> {
    rules: &'a RuleSet,
    graph: &'a G,
}

impl<'a, G> ExpansionEngine<'a, G>
where
    G: RelationshipGraph + ?Sized,
{
    pub fn new(rules: &'a RuleSet, graph: &'a G) -> Self {
        ExpansionEngine { rules, graph }
    }

    pub async fn expand(&self, anchors: &[Anchor]) -> Result<Expansion, PropagationError> {
        let mut expansion = Expansion::default();
        let mut planned: HashMap<(i64, ObjectRef, ParentRef), usize> = HashMap::new();
        let mut guard_logged = false;

        let mut frontier: Vec<FrontierItem<'a>> = Vec::new();
        for anchor in anchors {
            let Some(node) = self.rules.node_at(&anchor.path) else {
                log::debug!("ACL {} has no propagation rule, skipping", anchor.acl.id);
                continue;
            };
            if node.is_leaf() {
                continue;
            }
            frontier.push(FrontierItem {
                parent: ParentRef::Persisted(anchor.acl.id),
                object: anchor.acl.object(),
                base_id: anchor.acl.root_id(),
                node,
                lineage: anchor.lineage.clone(),
                via: anchor.via.clone(),
            });
        }

        let mut depth = 0;
        while !frontier.is_empty() {
            depth += 1;
            let related = self.lookup_level(&frontier).await?;
            let mut next = Vec::new();

            for item in frontier {
                for edge in item.node.edges() {
                    let targets = match &item.via {
                        Some(rel) => targets_via(rel, &item.object, &edge.child_object_type),
                        None => related
                            .get(edge.child_object_type.as_str())
                            .and_then(|by_object| by_object.get(&item.object))
                            .cloned()
                            .unwrap_or_default(),
                    };

                    for target in targets {
                        if item.lineage.iter().any(|(o, r)| *o == target && *r == edge.role_id) {
                            expansion.cycle_guard_trips += 1;
                            if !guard_logged {
                                log::warn!(
                                    "Propagation from {} reached its own ancestor {}, not granting role {} again",
                                    item.object, target, edge.role_id
                                );
                                guard_logged = true;
                            }
                            continue;
                        }

                        let key = (edge.role_id, target.clone(), item.parent);
                        if planned.contains_key(&key) {
                            continue;
                        }
                        let index = expansion.nodes.len();
                        planned.insert(key, index);
                        expansion.nodes.push(PlannedAcl {
                            ac_role_id: edge.role_id,
                            object: target.clone(),
                            parent: item.parent,
                            base_id: item.base_id,
                            depth,
                        });

                        if !edge.node.is_leaf() {
                            let mut lineage = item.lineage.clone();
                            lineage.push((target.clone(), edge.role_id));
                            next.push(FrontierItem {
                                parent: ParentRef::Planned(index),
                                object: target,
                                base_id: item.base_id,
                                node: &edge.node,
                                lineage,
                                via: None,
                            });
                        }
                    }
                }
            }

            log::debug!(
                "Expansion level {depth}: {} rows planned so far, {} objects to continue from",
                expansion.nodes.len(),
                next.len()
            );
            frontier = next;
        }

        Ok(expansion)
    }

    /// One batched lookup per target type for every unrestricted item in the level.
    async fn lookup_level(
        &self,
        frontier: &[FrontierItem<'a>],
    ) -> Result<HashMap<&'a str, RelatedObjects>, PropagationError> {
        let mut wanted: BTreeMap<&'a str, BTreeSet<ObjectRef>> = BTreeMap::new();
        for item in frontier.iter().filter(|i| i.via.is_none()) {
            let node: &'a RuleNode = item.node;
            for edge in node.edges() {
                wanted
                    .entry(edge.child_object_type.as_str())
                    .or_default()
                    .insert(item.object.clone());
            }
        }

        let mut related = HashMap::new();
        for (target_type, objects) in wanted {
            let objects: Vec<ObjectRef> = objects.into_iter().collect();
            related.insert(target_type, self.graph.related_batch(&objects, target_type).await?);
        }
        Ok(related)
    }
}

/// Targets reachable from `from` across the single edge `rel`.
fn targets_via(rel: &Relationship, from: &ObjectRef, target_type: &str) -> BTreeSet<ObjectRef> {
    let mut targets = BTreeSet::new();
    if !rel.touches(from) {
        return targets;
    }
    if target_type == RELATIONSHIP {
        targets.insert(rel.as_object());
    } else if let Some(other) = rel.other_end(from) {
        if other.object_type == target_type {
            targets.insert(other);
        }
    }
    targets
}
