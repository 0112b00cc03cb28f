use serde::{Deserialize, Serialize};

/// A named role scoped to one object type, e.g. "Program Managers" on "Program".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccessControlRole {
    pub id: i64,
    pub name: String,
    pub object_type: String,
    pub mandatory: bool,
    pub non_editable: bool,
    pub default_to_current_user: bool,
}

/// Role definition as it appears in seed files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub object_type: String,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub non_editable: bool,
    #[serde(default)]
    pub default_to_current_user: bool,
}

impl NewRole {
    pub fn new(name: impl Into<String>, object_type: impl Into<String>) -> Self {
        NewRole {
            name: name.into(),
            object_type: object_type.into(),
            mandatory: false,
            non_editable: false,
            default_to_current_user: false,
        }
    }
}
