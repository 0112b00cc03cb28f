use serde::{Deserialize, Serialize};

/// A person holding the role of one ACL row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessControlPerson {
    pub id: i64,
    pub ac_list_id: i64,
    pub person_id: i64,
}

/// Someone who effectively holds a role on an object, directly or through propagation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::FromRow)]
pub struct EffectiveHolder {
    pub person_id: i64,
    pub ac_role_id: i64,
    /// The row on the queried object that grants the role.
    pub ac_list_id: i64,
}
