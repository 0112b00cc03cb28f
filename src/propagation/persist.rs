//! Chunked, retried writes of propagated ACL rows.
//!
//! Every chunk commits on its own. A chunk that exhausts its retry budget
//! fails the whole operation, but chunks already committed stay. Inserts skip
//! existing rows, so re-running the same propagation completes it.

use chrono::Utc;

use super::expand::{Expansion, ParentRef};
use super::retry::RetryPolicy;
use crate::errors::{PropagationError, StoreError};
use crate::models::acl::PropagatedAclRow;
use crate::store::AclStore;

/// Rows per insert or delete statement.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub requested: usize,
    pub inserted: u64,
    pub chunks: usize,
    /// Id of every requested row, in request order.
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteReport {
    pub deleted: u64,
    pub chunks: usize,
}

pub struct BatchWriter<'a, S: ?Sized> {
    store: &'a S,
    retry: &'a RetryPolicy,
    chunk_size: usize,
    actor_id: Option<i64>,
}

impl<'a, S> BatchWriter<'a, S>
where
    S: AclStore + ?Sized,
{
    pub fn new(store: &'a S, retry: &'a RetryPolicy, chunk_size: usize, actor_id: Option<i64>) -> Self {
        BatchWriter {
            store,
            retry,
            chunk_size: chunk_size.max(1),
            actor_id,
        }
    }

    /// Insert rows whose parents already exist, one retried chunk at a time.
    pub async fn insert_propagated_acls(
        &self,
        rows: &[PropagatedAclRow],
    ) -> Result<InsertReport, PropagationError> {
        let mut report = InsertReport {
            requested: rows.len(),
            ..InsertReport::default()
        };

        for (n, chunk) in rows.chunks(self.chunk_size).enumerate() {
            let operation = format!("insert chunk {} ({} rows)", n + 1, chunk.len());
            let outcome = self
                .retry
                .run(&operation, || self.store.insert_propagated(chunk))
                .await?;
            if outcome.ids.len() != chunk.len() {
                return Err(PropagationError::Store(StoreError::Invalid(format!(
                    "{operation}: store returned {} ids",
                    outcome.ids.len()
                ))));
            }
            log::debug!("{operation}: {} new rows committed", outcome.inserted);
            report.inserted += outcome.inserted;
            report.ids.extend(outcome.ids);
            report.chunks += 1;
        }

        Ok(report)
    }

    /// Write a planned expansion level by level, resolving planned parents to
    /// the ids the previous level produced.
    pub async fn persist(&self, expansion: &Expansion) -> Result<InsertReport, PropagationError> {
        let stamped_at = Utc::now();
        let nodes = &expansion.nodes;
        let mut ids: Vec<Option<i64>> = vec![None; nodes.len()];
        let mut report = InsertReport {
            requested: nodes.len(),
            ..InsertReport::default()
        };

        let mut start = 0;
        while start < nodes.len() {
            let depth = nodes[start].depth;
            let end = start + nodes[start..].iter().take_while(|n| n.depth == depth).count();

            let rows = nodes[start..end]
                .iter()
                .map(|node| {
                    let parent_id = match node.parent {
                        ParentRef::Persisted(id) => id,
                        ParentRef::Planned(index) => ids.get(index).copied().flatten().ok_or_else(|| {
                            StoreError::Invalid(format!("parent of {} was not written", node.object))
                        })?,
                    };
                    Ok(PropagatedAclRow {
                        ac_role_id: node.ac_role_id,
                        object: node.object.clone(),
                        parent_id,
                        base_id: node.base_id,
                        modified_by_id: self.actor_id,
                        stamped_at,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()?;

            let level = self.insert_propagated_acls(&rows).await?;
            for (offset, id) in level.ids.into_iter().enumerate() {
                ids[start + offset] = Some(id);
            }
            report.inserted += level.inserted;
            report.chunks += level.chunks;
            log::debug!("Level {depth}: {} rows written", end - start);
            start = end;
        }

        report.ids = ids.into_iter().flatten().collect();
        Ok(report)
    }

    /// Delete rows in retried chunks. Ids that are already gone are ignored.
    pub async fn delete_propagated_acls(&self, ids: &[i64]) -> Result<DeleteReport, PropagationError> {
        let mut report = DeleteReport::default();
        for (n, chunk) in ids.chunks(self.chunk_size).enumerate() {
            let operation = format!("delete chunk {} ({} rows)", n + 1, chunk.len());
            report.deleted += self
                .retry
                .run(&operation, || self.store.delete_acls(chunk))
                .await?;
            report.chunks += 1;
        }
        Ok(report)
    }
}
