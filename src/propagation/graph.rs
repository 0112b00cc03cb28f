//! Read-only access to the relationship graph.
//!
//! Edges are undirected for propagation: an object reaches everything it is the
//! source or the destination of. The `Relationship` type is special: asking for
//! related `Relationship` objects yields the edge rows themselves, and the
//! related objects of a `Relationship` are its two endpoints.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::acl::ObjectRef;
use crate::models::relationship::Relationship;

/// Object type name of relationship rows.
pub const RELATIONSHIP: &str = "Relationship";

/// Upper bound on ids per lookup statement.
pub const LOOKUP_CHUNK: usize = 10_000;

/// Related objects keyed by the object they were looked up from.
pub type RelatedObjects = HashMap<ObjectRef, BTreeSet<ObjectRef>>;

#[async_trait]
pub trait RelationshipGraph: Send + Sync {
    /// Edges with one end among `ids` of `object_type`, either direction,
    /// optionally restricted to edges whose opposite end is of `other_type`.
    async fn relationships_touching(
        &self,
        object_type: &str,
        ids: &[i64],
        other_type: Option<&str>,
    ) -> Result<Vec<Relationship>, StoreError>;

    async fn relationships_by_ids(&self, ids: &[i64]) -> Result<Vec<Relationship>, StoreError>;

    /// Batched form of [`related_objects`](Self::related_objects): one query per
    /// object type and chunk rather than one per object.
    async fn related_batch(
        &self,
        objects: &[ObjectRef],
        target_type: &str,
    ) -> Result<RelatedObjects, StoreError> {
        let mut by_type: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for object in objects {
            by_type.entry(object.object_type.as_str()).or_default().push(object.id);
        }

        let mut related = RelatedObjects::new();
        for (object_type, mut ids) in by_type {
            ids.sort_unstable();
            ids.dedup();
            for chunk in ids.chunks(LOOKUP_CHUNK) {
                if object_type == RELATIONSHIP {
                    // From an edge row, the related objects are its endpoints.
                    for rel in self.relationships_by_ids(chunk).await? {
                        let from = rel.as_object();
                        for end in [rel.source(), rel.destination()] {
                            if end.object_type == target_type {
                                related.entry(from.clone()).or_default().insert(end);
                            }
                        }
                    }
                } else if target_type == RELATIONSHIP {
                    for rel in self.relationships_touching(object_type, chunk, None).await? {
                        for end in [rel.source(), rel.destination()] {
                            if end.object_type == object_type && chunk.binary_search(&end.id).is_ok() {
                                related.entry(end).or_default().insert(rel.as_object());
                            }
                        }
                    }
                } else {
                    let edges = self
                        .relationships_touching(object_type, chunk, Some(target_type))
                        .await?;
                    for rel in edges {
                        let (source, destination) = (rel.source(), rel.destination());
                        if source == destination {
                            continue;
                        }
                        if source.object_type == object_type
                            && destination.object_type == target_type
                            && chunk.binary_search(&source.id).is_ok()
                        {
                            related.entry(source.clone()).or_default().insert(destination.clone());
                        }
                        if destination.object_type == object_type
                            && source.object_type == target_type
                            && chunk.binary_search(&destination.id).is_ok()
                        {
                            related.entry(destination).or_default().insert(source);
                        }
                    }
                }
            }
        }
        Ok(related)
    }

    /// Every object of `target_type` connected to `object` by one edge.
    async fn related_objects(
        &self,
        object: &ObjectRef,
        target_type: &str,
    ) -> Result<BTreeSet<ObjectRef>, StoreError> {
        let mut related = self.related_batch(std::slice::from_ref(object), target_type).await?;
        Ok(related.remove(object).unwrap_or_default())
    }

    /// Edges directly connecting `a` and `b`, in either direction.
    async fn connecting(&self, a: &ObjectRef, b: &ObjectRef) -> Result<Vec<Relationship>, StoreError> {
        let edges = self
            .relationships_touching(&a.object_type, &[a.id], Some(b.object_type.as_str()))
            .await?;
        Ok(edges
            .into_iter()
            .filter(|rel| rel.touches(a) && rel.other_end(a).as_ref() == Some(b))
            .collect())
    }
}
