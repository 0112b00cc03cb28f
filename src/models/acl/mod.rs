pub mod queries;
pub mod types;

pub use types::{AccessControlEntry, AclKey, InsertOutcome, ObjectRef, PropagatedAclRow};
