//! Mock Kubernetes API server for tests.
//!
//! Serves discovery, `/version` and create/get/list/delete for the kinds a
//! [`MockDiscovery`] describes, backed by an in-memory object map.

pub mod discovery;
mod helpers;
pub mod http;
mod objects;

pub use discovery::{DiscoveryMode, MockApiResource, MockDiscovery};
pub use http::{HttpMockK8sServer, RunningHttpMockK8sServer};
