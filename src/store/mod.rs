//! Backing-store seam for propagation.
//!
//! [`AclStore`] covers roles and ACL rows; the relationship graph lives behind
//! [`RelationshipGraph`](crate::propagation::graph::RelationshipGraph). Both are
//! implemented by [`PgStore`] and by the in-process [`MemoryStore`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::errors::StoreError;
use crate::models::acl::{AccessControlEntry, InsertOutcome, ObjectRef, PropagatedAclRow};
use crate::models::role::AccessControlRole;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait AclStore: Send + Sync {
    async fn roles(&self) -> Result<Vec<AccessControlRole>, StoreError>;

    async fn acls_by_ids(&self, ids: &[i64]) -> Result<Vec<AccessControlEntry>, StoreError>;

    /// Every row, direct or propagated, on any of `objects`.
    async fn acls_on_objects(&self, objects: &[ObjectRef]) -> Result<Vec<AccessControlEntry>, StoreError>;

    async fn root_acls(&self) -> Result<Vec<AccessControlEntry>, StoreError>;

    async fn child_acl_ids(&self, parent_ids: &[i64]) -> Result<Vec<i64>, StoreError>;

    async fn acl_ids_by_base(&self, base_ids: &[i64]) -> Result<Vec<i64>, StoreError>;

    async fn propagated_acl_ids(&self) -> Result<Vec<i64>, StoreError>;

    /// Insert one chunk as a single committed unit, skipping rows whose key
    /// already exists. Returns an id for every row in `rows`.
    async fn insert_propagated(&self, rows: &[PropagatedAclRow]) -> Result<InsertOutcome, StoreError>;

    /// Delete one chunk of rows. Returns how many of `ids` existed.
    async fn delete_acls(&self, ids: &[i64]) -> Result<u64, StoreError>;
}
