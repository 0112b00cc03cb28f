use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A domain object addressed by type name and id, e.g. `Audit#12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub id: i64,
}

impl ObjectRef {
    pub fn new(object_type: impl Into<String>, id: i64) -> Self {
        ObjectRef { object_type: object_type.into(), id }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object_type, self.id)
    }
}

/// One row of `access_control_list`.
///
/// `parent_id` is `None` for a directly assigned grant. Propagated rows point at
/// the row they were derived from and carry the root of their chain in `base_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessControlEntry {
    pub id: i64,
    pub ac_role_id: i64,
    pub object_id: i64,
    pub object_type: String,
    pub parent_id: Option<i64>,
    pub base_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub modified_by_id: Option<i64>,
}

impl AccessControlEntry {
    pub fn object(&self) -> ObjectRef {
        ObjectRef::new(self.object_type.clone(), self.object_id)
    }

    pub fn is_propagated(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Id of the directly assigned grant at the top of this row's chain.
    pub fn root_id(&self) -> i64 {
        self.base_id.unwrap_or(self.id)
    }

    pub fn key(&self) -> AclKey {
        AclKey {
            ac_role_id: self.ac_role_id,
            object: self.object(),
            parent_id: self.parent_id,
        }
    }
}

/// Uniqueness key of an ACL row: at most one row per role, object and parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AclKey {
    pub ac_role_id: i64,
    pub object: ObjectRef,
    pub parent_id: Option<i64>,
}

/// A propagated row ready for insertion. Parent and base are already persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagatedAclRow {
    pub ac_role_id: i64,
    pub object: ObjectRef,
    pub parent_id: i64,
    pub base_id: i64,
    pub modified_by_id: Option<i64>,
    pub stamped_at: DateTime<Utc>,
}

impl PropagatedAclRow {
    pub fn key(&self) -> AclKey {
        AclKey {
            ac_role_id: self.ac_role_id,
            object: self.object.clone(),
            parent_id: Some(self.parent_id),
        }
    }
}

/// Result of inserting one chunk: the id of every requested row, in request
/// order, whether it was created now or already existed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    pub ids: Vec<i64>,
    pub inserted: u64,
}
