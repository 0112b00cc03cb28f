pub mod acl;
pub mod person;
pub mod relationship;
pub mod role;
