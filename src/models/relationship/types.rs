use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::acl::ObjectRef;

/// A directed edge between two domain objects. Propagation treats it as undirected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Relationship {
    pub id: i64,
    pub source_id: i64,
    pub source_type: String,
    pub destination_id: i64,
    pub destination_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    pub fn source(&self) -> ObjectRef {
        ObjectRef::new(self.source_type.clone(), self.source_id)
    }

    pub fn destination(&self) -> ObjectRef {
        ObjectRef::new(self.destination_type.clone(), self.destination_id)
    }

    /// The relationship row itself, as an object that can hold grants.
    pub fn as_object(&self) -> ObjectRef {
        ObjectRef::new(crate::propagation::graph::RELATIONSHIP, self.id)
    }

    pub fn touches(&self, object: &ObjectRef) -> bool {
        self.source_matches(object) || self.destination_matches(object)
    }

    /// The endpoint opposite `object`, or `None` if `object` is not an endpoint.
    /// A self-loop has no opposite end.
    pub fn other_end(&self, object: &ObjectRef) -> Option<ObjectRef> {
        if self.source_matches(object) && !self.destination_matches(object) {
            Some(self.destination())
        } else if self.destination_matches(object) && !self.source_matches(object) {
            Some(self.source())
        } else {
            None
        }
    }

    fn source_matches(&self, object: &ObjectRef) -> bool {
        self.source_type == object.object_type && self.source_id == object.id
    }

    fn destination_matches(&self, object: &ObjectRef) -> bool {
        self.destination_type == object.object_type && self.destination_id == object.id
    }
}
