//! In-process backend.
//!
//! Holds roles, ACL rows, people and relationships in maps behind one
//! `tokio::sync::Mutex`, with the same uniqueness and cascade rules as the
//! Postgres schema. Not durable. Used by tests and by embedders without a
//! database. Transient failures can be injected to exercise retry handling.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::AclStore;
use crate::errors::StoreError;
use crate::models::acl::{AccessControlEntry, AclKey, InsertOutcome, ObjectRef, PropagatedAclRow};
use crate::models::person::{AccessControlPerson, EffectiveHolder};
use crate::models::relationship::Relationship;
use crate::models::role::{AccessControlRole, NewRole};
use crate::propagation::graph::RelationshipGraph;

#[derive(Debug, Default)]
struct State {
    roles: BTreeMap<i64, AccessControlRole>,
    acls: BTreeMap<i64, AccessControlEntry>,
    keys: HashMap<AclKey, i64>,
    people: BTreeMap<i64, AccessControlPerson>,
    relationships: BTreeMap<i64, Relationship>,
    next_id: i64,
    fail_inserts: u32,
    /// Injected insert failures start at this attempt number.
    fail_inserts_from: u32,
    fail_deletes: u32,
    insert_attempts: u32,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Remove `ids` and everything hanging off them through `parent_id` or
    /// `base_id`. Returns how many of `ids` existed.
    fn delete_cascading(&mut self, ids: &[i64]) -> u64 {
        let existing = ids.iter().filter(|id| self.acls.contains_key(*id)).count() as u64;

        let mut doomed: BTreeSet<i64> = ids.iter().copied().filter(|id| self.acls.contains_key(id)).collect();
        loop {
            let more: Vec<i64> = self
                .acls
                .values()
                .filter(|acl| !doomed.contains(&acl.id))
                .filter(|acl| {
                    acl.parent_id.is_some_and(|p| doomed.contains(&p))
                        || acl.base_id.is_some_and(|b| doomed.contains(&b))
                })
                .map(|acl| acl.id)
                .collect();
            if more.is_empty() {
                break;
            }
            doomed.extend(more);
        }

        for id in &doomed {
            if let Some(acl) = self.acls.remove(id) {
                self.keys.remove(&acl.key());
            }
        }
        self.people.retain(|_, p| !doomed.contains(&p.ac_list_id));
        existing
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a role, or return the id of the existing (name, object_type) pair.
    pub async fn add_role(&self, role: NewRole) -> i64 {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .roles
            .values()
            .find(|r| r.name == role.name && r.object_type == role.object_type)
        {
            return existing.id;
        }
        let id = state.next_id();
        state.roles.insert(
            id,
            AccessControlRole {
                id,
                name: role.name,
                object_type: role.object_type,
                mandatory: role.mandatory,
                non_editable: role.non_editable,
                default_to_current_user: role.default_to_current_user,
            },
        );
        id
    }

    pub async fn role_id(&self, name: &str, object_type: &str) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .roles
            .values()
            .find(|r| r.name == name && r.object_type == object_type)
            .map(|r| r.id)
    }

    /// Directly assign `ac_role_id` on `object`. Re-granting returns the existing row.
    pub async fn grant(&self, ac_role_id: i64, object: &ObjectRef) -> AccessControlEntry {
        let mut state = self.state.lock().await;
        let key = AclKey {
            ac_role_id,
            object: object.clone(),
            parent_id: None,
        };
        if let Some(acl) = state.keys.get(&key).and_then(|id| state.acls.get(id)) {
            return acl.clone();
        }
        let id = state.next_id();
        let now = Utc::now();
        let acl = AccessControlEntry {
            id,
            ac_role_id,
            object_id: object.id,
            object_type: object.object_type.clone(),
            parent_id: None,
            base_id: None,
            created_at: now,
            updated_at: now,
            modified_by_id: None,
        };
        state.keys.insert(key, id);
        state.acls.insert(id, acl.clone());
        acl
    }

    /// Attach a person to an ACL row. Returns `None` if the row does not exist.
    pub async fn assign(&self, ac_list_id: i64, person_id: i64) -> Option<i64> {
        let mut state = self.state.lock().await;
        if !state.acls.contains_key(&ac_list_id) {
            return None;
        }
        if let Some(existing) = state
            .people
            .values()
            .find(|p| p.ac_list_id == ac_list_id && p.person_id == person_id)
        {
            return Some(existing.id);
        }
        let id = state.next_id();
        state.people.insert(id, AccessControlPerson { id, ac_list_id, person_id });
        Some(id)
    }

    /// Delete an ACL row and everything propagated from it.
    pub async fn revoke(&self, acl_id: i64) -> Option<AccessControlEntry> {
        let mut state = self.state.lock().await;
        let acl = state.acls.get(&acl_id).cloned()?;
        state.delete_cascading(&[acl_id]);
        Some(acl)
    }

    /// Point an ACL row at a different role, returning the updated row.
    pub async fn change_role(&self, acl_id: i64, ac_role_id: i64) -> Option<AccessControlEntry> {
        let mut state = self.state.lock().await;
        let old_key = state.acls.get(&acl_id)?.key();
        let acl = state.acls.get_mut(&acl_id)?;
        acl.ac_role_id = ac_role_id;
        acl.updated_at = Utc::now();
        let updated = acl.clone();
        state.keys.remove(&old_key);
        state.keys.insert(updated.key(), acl_id);
        Some(updated)
    }

    pub async fn relate(&self, source: &ObjectRef, destination: &ObjectRef) -> Relationship {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let now = Utc::now();
        let relationship = Relationship {
            id,
            source_id: source.id,
            source_type: source.object_type.clone(),
            destination_id: destination.id,
            destination_type: destination.object_type.clone(),
            created_at: now,
            updated_at: now,
        };
        state.relationships.insert(id, relationship.clone());
        relationship
    }

    /// Remove a relationship row. ACL rows are left to propagation.
    pub async fn unrelate(&self, id: i64) -> Option<Relationship> {
        self.state.lock().await.relationships.remove(&id)
    }

    pub async fn acls(&self) -> Vec<AccessControlEntry> {
        self.state.lock().await.acls.values().cloned().collect()
    }

    pub async fn propagated(&self) -> Vec<AccessControlEntry> {
        self.state
            .lock()
            .await
            .acls
            .values()
            .filter(|acl| acl.is_propagated())
            .cloned()
            .collect()
    }

    pub async fn acls_on(&self, object: &ObjectRef) -> Vec<AccessControlEntry> {
        self.state
            .lock()
            .await
            .acls
            .values()
            .filter(|acl| acl.object() == *object)
            .cloned()
            .collect()
    }

    /// Same result as the Postgres `effective_holders` query.
    pub async fn effective_holders(&self, object: &ObjectRef) -> Vec<EffectiveHolder> {
        let state = self.state.lock().await;
        let holders: BTreeSet<EffectiveHolder> = state
            .acls
            .values()
            .filter(|acl| acl.object() == *object)
            .flat_map(|acl| {
                state
                    .people
                    .values()
                    .filter(move |p| p.ac_list_id == acl.root_id())
                    .map(move |p| EffectiveHolder {
                        person_id: p.person_id,
                        ac_role_id: acl.ac_role_id,
                        ac_list_id: acl.id,
                    })
            })
            .collect();
        holders.into_iter().collect()
    }

    /// Make the next `n` chunk inserts fail with a transient conflict.
    pub async fn fail_next_inserts(&self, n: u32) {
        self.fail_inserts_after(0, n).await;
    }

    /// Let `ok` chunk inserts through, then fail the `n` after them.
    pub async fn fail_inserts_after(&self, ok: u32, n: u32) {
        let mut state = self.state.lock().await;
        state.fail_inserts_from = state.insert_attempts + ok + 1;
        state.fail_inserts = n;
    }

    /// Make the next `n` chunk deletes fail with a transient conflict.
    pub async fn fail_next_deletes(&self, n: u32) {
        self.state.lock().await.fail_deletes = n;
    }

    /// Chunk inserts attempted so far, failed ones included.
    pub async fn insert_attempts(&self) -> u32 {
        self.state.lock().await.insert_attempts
    }
}

#[async_trait]
impl AclStore for MemoryStore {
    async fn roles(&self) -> Result<Vec<AccessControlRole>, StoreError> {
        Ok(self.state.lock().await.roles.values().cloned().collect())
    }

    async fn acls_by_ids(&self, ids: &[i64]) -> Result<Vec<AccessControlEntry>, StoreError> {
        let state = self.state.lock().await;
        let ids: BTreeSet<i64> = ids.iter().copied().collect();
        Ok(ids.iter().filter_map(|id| state.acls.get(id).cloned()).collect())
    }

    async fn acls_on_objects(&self, objects: &[ObjectRef]) -> Result<Vec<AccessControlEntry>, StoreError> {
        let state = self.state.lock().await;
        let objects: BTreeSet<&ObjectRef> = objects.iter().collect();
        Ok(state
            .acls
            .values()
            .filter(|acl| objects.contains(&acl.object()))
            .cloned()
            .collect())
    }

    async fn root_acls(&self) -> Result<Vec<AccessControlEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.acls.values().filter(|acl| !acl.is_propagated()).cloned().collect())
    }

    async fn child_acl_ids(&self, parent_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let state = self.state.lock().await;
        let parents: BTreeSet<i64> = parent_ids.iter().copied().collect();
        Ok(state
            .acls
            .values()
            .filter(|acl| acl.parent_id.is_some_and(|p| parents.contains(&p)))
            .map(|acl| acl.id)
            .collect())
    }

    async fn acl_ids_by_base(&self, base_ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let state = self.state.lock().await;
        let bases: BTreeSet<i64> = base_ids.iter().copied().collect();
        Ok(state
            .acls
            .values()
            .filter(|acl| acl.base_id.is_some_and(|b| bases.contains(&b)))
            .map(|acl| acl.id)
            .collect())
    }

    async fn propagated_acl_ids(&self) -> Result<Vec<i64>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.acls.values().filter(|acl| acl.is_propagated()).map(|acl| acl.id).collect())
    }

    async fn insert_propagated(&self, rows: &[PropagatedAclRow]) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.insert_attempts += 1;
        if state.fail_inserts > 0 && state.insert_attempts >= state.fail_inserts_from {
            state.fail_inserts -= 1;
            return Err(StoreError::Conflict("injected deadlock".to_string()));
        }

        // All or nothing, like a chunk transaction.
        for row in rows {
            if !state.roles.contains_key(&row.ac_role_id) {
                return Err(StoreError::Invalid(format!("unknown role {} for {}", row.ac_role_id, row.object)));
            }
            if !state.acls.contains_key(&row.parent_id) {
                return Err(StoreError::Invalid(format!("parent ACL {} of {} does not exist", row.parent_id, row.object)));
            }
            if !state.acls.contains_key(&row.base_id) {
                return Err(StoreError::Invalid(format!("base ACL {} of {} does not exist", row.base_id, row.object)));
            }
        }

        let mut outcome = InsertOutcome::default();
        for row in rows {
            let key = row.key();
            if let Some(id) = state.keys.get(&key) {
                outcome.ids.push(*id);
                continue;
            }
            let id = state.next_id();
            state.acls.insert(
                id,
                AccessControlEntry {
                    id,
                    ac_role_id: row.ac_role_id,
                    object_id: row.object.id,
                    object_type: row.object.object_type.clone(),
                    parent_id: Some(row.parent_id),
                    base_id: Some(row.base_id),
                    created_at: row.stamped_at,
                    updated_at: row.stamped_at,
                    modified_by_id: row.modified_by_id,
                },
            );
            state.keys.insert(key, id);
            outcome.ids.push(id);
            outcome.inserted += 1;
        }
        Ok(outcome)
    }

    async fn delete_acls(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        if state.fail_deletes > 0 {
            state.fail_deletes -= 1;
            return Err(StoreError::Conflict("injected lock timeout".to_string()));
        }
        Ok(state.delete_cascading(ids))
    }
}

#[async_trait]
impl RelationshipGraph for MemoryStore {
    async fn relationships_touching(
        &self,
        object_type: &str,
        ids: &[i64],
        other_type: Option<&str>,
    ) -> Result<Vec<Relationship>, StoreError> {
        let state = self.state.lock().await;
        let ids: BTreeSet<i64> = ids.iter().copied().collect();
        let other_ok = |t: &str| other_type.is_none_or(|o| o == t);
        Ok(state
            .relationships
            .values()
            .filter(|rel| {
                (rel.source_type == object_type && ids.contains(&rel.source_id) && other_ok(&rel.destination_type))
                    || (rel.destination_type == object_type
                        && ids.contains(&rel.destination_id)
                        && other_ok(&rel.source_type))
            })
            .cloned()
            .collect())
    }

    async fn relationships_by_ids(&self, ids: &[i64]) -> Result<Vec<Relationship>, StoreError> {
        let state = self.state.lock().await;
        let ids: BTreeSet<i64> = ids.iter().copied().collect();
        Ok(ids.iter().filter_map(|id| state.relationships.get(id).cloned()).collect())
    }
}
