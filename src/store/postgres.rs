use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::PgPool;

use super::AclStore;
use crate::errors::StoreError;
use crate::models::acl::{self, AccessControlEntry, InsertOutcome, ObjectRef, PropagatedAclRow};
use crate::models::relationship::{self, Relationship};
use crate::models::role::{self, AccessControlRole};
use crate::propagation::graph::RelationshipGraph;

/// Postgres backend. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AclStore for PgStore {
    async fn roles(&self) -> Result<Vec<AccessControlRole>, StoreError> {
        Ok(role::queries::find_all(&self.pool).await?)
    }

    async fn acls_by_ids(&self, ids: &[i64]) -> Result<Vec<AccessControlEntry>, StoreError> {
        Ok(acl::queries::find_by_ids(&self.pool, ids).await?)
    }

    async fn acls_on_objects(&self, objects: &[ObjectRef]) -> Result<Vec<AccessControlEntry>, StoreError> {
        let mut by_type: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for object in objects {
            by_type.entry(object.object_type.as_str()).or_default().push(object.id);
        }
        let mut rows = Vec::new();
        for (object_type, ids) in by_type {
            rows.extend(acl::queries::find_by_objects(&self.pool, object_type, &ids).await?);
        }
        Ok(rows)
    }

    async fn root_acls(&self) -> Result<Vec<AccessControlEntry>, StoreError> {
        Ok(acl::queries::find_roots(&self.pool).await?)
    }

    async fn child_acl_ids(&self, parent_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        Ok(acl::queries::child_ids(&self.pool, parent_ids).await?)
    }

    async fn acl_ids_by_base(&self, base_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        Ok(acl::queries::ids_by_base(&self.pool, base_ids).await?)
    }

    async fn propagated_acl_ids(&self) -> Result<Vec<i64>, StoreError> {
        Ok(acl::queries::propagated_ids(&self.pool).await?)
    }

    async fn insert_propagated(&self, rows: &[PropagatedAclRow]) -> Result<InsertOutcome, StoreError> {
        acl::queries::insert_propagated_chunk(&self.pool, rows).await
    }

    async fn delete_acls(&self, ids: &[i64]) -> Result<u64, StoreError> {
        Ok(acl::queries::delete_by_ids(&self.pool, ids).await?)
    }
}

#[async_trait]
impl RelationshipGraph for PgStore {
    async fn relationships_touching(
        &self,
        object_type: &str,
        ids: &[i64],
        other_type: Option<&str>,
    ) -> Result<Vec<Relationship>, StoreError> {
        Ok(relationship::queries::touching(&self.pool, object_type, ids, other_type).await?)
    }

    async fn relationships_by_ids(&self, ids: &[i64]) -> Result<Vec<Relationship>, StoreError> {
        Ok(relationship::queries::find_by_ids(&self.pool, ids).await?)
    }
}
