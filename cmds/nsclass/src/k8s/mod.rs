//! Kubernetes access: cluster connection, type discovery and the object store.

pub mod client;
pub mod registry;
pub mod store;
