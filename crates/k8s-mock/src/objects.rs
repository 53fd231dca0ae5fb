//! In-memory object storage and the request handlers that serve it.
//!
//! Objects are keyed by their collection path (`/api/v1/namespaces/x/secrets`)
//! and name, which is all the routing information a request carries.

use std::{
	collections::BTreeMap,
	sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde_json::Value;
use wiremock::{Request, Respond, ResponseTemplate};

use crate::{
	discovery::MockDiscovery,
	helpers::{matches_label_selector, status_body},
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
	pub collection: String,
	pub name: String,
}

impl ObjectKey {
	/// Key of the object addressed by a request path.
	fn from_object_path(path: &str) -> Self {
		let path = path.trim_end_matches('/');
		let (collection, name) = path.rsplit_once('/').unwrap_or((path, ""));
		Self {
			collection: collection.to_string(),
			name: name.to_string(),
		}
	}

	/// Key of a manifest, derived from its apiVersion, kind and metadata.
	pub fn for_manifest(manifest: &Value, discovery: &MockDiscovery) -> Option<Self> {
		let api_version = manifest.get("apiVersion")?.as_str()?;
		let kind = manifest.get("kind")?.as_str()?;
		let name = manifest.pointer("/metadata/name")?.as_str()?;
		let namespace = manifest
			.pointer("/metadata/namespace")
			.and_then(Value::as_str);
		Self::new(discovery, api_version, kind, namespace, name)
	}

	pub fn new(
		discovery: &MockDiscovery,
		api_version: &str,
		kind: &str,
		namespace: Option<&str>,
		name: &str,
	) -> Option<Self> {
		let resource = discovery.find(api_version, kind)?;
		let root = if api_version.contains('/') { "apis" } else { "api" };
		let collection = match (resource.namespaced, namespace) {
			(true, ns) => format!(
				"/{root}/{api_version}/namespaces/{}/{}",
				ns.unwrap_or("default"),
				resource.name
			),
			(false, _) => format!("/{root}/{api_version}/{}", resource.name),
		};
		Some(Self {
			collection,
			name: name.to_string(),
		})
	}

	fn namespace(&self) -> Option<&str> {
		let (_, rest) = self.collection.split_once("/namespaces/")?;
		rest.split('/').next()
	}
}

/// Shared object map, cloned into every handler.
#[derive(Clone, Default)]
pub struct Objects {
	inner: Arc<RwLock<BTreeMap<ObjectKey, Value>>>,
}

impl Objects {
	pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ObjectKey, Value>> {
		self.inner.read().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ObjectKey, Value>> {
		self.inner.write().unwrap_or_else(PoisonError::into_inner)
	}

	/// Objects inside `namespace`, ordered by kind then name.
	pub fn in_namespace(&self, namespace: &str) -> Vec<Value> {
		let mut found: Vec<Value> = self
			.read()
			.iter()
			.filter(|(key, _)| key.namespace() == Some(namespace))
			.map(|(_, object)| object.clone())
			.collect();
		let field = |o: &Value, pointer: &str| {
			o.pointer(pointer)
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string()
		};
		found.sort_by_key(|o| (field(o, "/kind"), field(o, "/metadata/name")));
		found
	}
}

fn not_found(name: &str) -> ResponseTemplate {
	ResponseTemplate::new(404).set_body_json(status_body(
		404,
		"NotFound",
		&format!("\"{name}\" not found"),
	))
}

/// POST: store the body unless the name is missing or taken.
pub struct Create {
	pub objects: Objects,
}

impl Respond for Create {
	fn respond(&self, request: &Request) -> ResponseTemplate {
		let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
		let Some(name) = body
			.pointer("/metadata/name")
			.and_then(Value::as_str)
			.filter(|n| !n.is_empty())
		else {
			return ResponseTemplate::new(422).set_body_json(status_body(
				422,
				"Invalid",
				"metadata.name: Required value",
			));
		};

		let key = ObjectKey {
			collection: request.url.path().trim_end_matches('/').to_string(),
			name: name.to_string(),
		};
		let dry_run = request.url.query_pairs().any(|(k, _)| k == "dryRun");

		let mut objects = self.objects.write();
		if objects.contains_key(&key) {
			return ResponseTemplate::new(409).set_body_json(status_body(
				409,
				"AlreadyExists",
				&format!("\"{name}\" already exists"),
			));
		}
		if !dry_run {
			objects.insert(key, body.clone());
		}
		ResponseTemplate::new(201).set_body_json(body)
	}
}

/// GET: a single object, or a list filtered by `labelSelector`.
pub struct Read {
	pub objects: Objects,
	pub discovery: MockDiscovery,
}

impl Read {
	fn list(&self, request: &Request, collection: &str) -> ResponseTemplate {
		let selector = request
			.url
			.query_pairs()
			.find(|(k, _)| k == "labelSelector")
			.map(|(_, v)| v.into_owned());
		let objects = self.objects.read();

		let items: Vec<&Value> = objects
			.iter()
			.filter(|(key, _)| {
				key.collection == collection
					|| cluster_wide_collection(&key.collection).as_deref() == Some(collection)
			})
			.map(|(_, object)| object)
			.filter(|object| {
				selector
					.as_deref()
					.map_or(true, |s| matches_label_selector(object, s))
			})
			.collect();

		ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"kind": "List",
			"apiVersion": "v1",
			"metadata": {"resourceVersion": "1"},
			"items": items,
		}))
	}
}

impl Respond for Read {
	fn respond(&self, request: &Request) -> ResponseTemplate {
		let path = request.url.path().trim_end_matches('/');
		if is_collection_path(path, &self.discovery) {
			return self.list(request, path);
		}

		let key = ObjectKey::from_object_path(path);
		match self.objects.read().get(&key) {
			Some(object) => ResponseTemplate::new(200).set_body_json(object),
			None => not_found(&key.name),
		}
	}
}

/// DELETE: remove the object and echo it back.
pub struct Remove {
	pub objects: Objects,
}

impl Respond for Remove {
	fn respond(&self, request: &Request) -> ResponseTemplate {
		let key = ObjectKey::from_object_path(request.url.path());
		match self.objects.write().remove(&key) {
			Some(object) => ResponseTemplate::new(200).set_body_json(object),
			None => not_found(&key.name),
		}
	}
}

/// Whether a request path addresses a collection rather than one object.
///
/// - `/api/v1/namespaces` is a collection
/// - `/api/v1/namespaces/my-app` is an object
/// - `/apis/apps/v1/namespaces/my-app/deployments` is a collection
fn is_collection_path(path: &str, discovery: &MockDiscovery) -> bool {
	let segments: Vec<_> = path.split('/').filter(|s| !s.is_empty()).collect();
	if !segments.last().is_some_and(|last| discovery.is_plural(last)) {
		return false;
	}
	// Group paths carry one more segment than core paths
	let depth = match segments.first() {
		Some(&"api") => segments.len(),
		Some(&"apis") => segments.len() - 1,
		_ => return false,
	};
	match depth {
		3 => true,
		5 => segments[segments.len() - 3] == "namespaces",
		_ => false,
	}
}

/// The all-namespaces collection a namespaced collection belongs to.
///
/// `/apis/apps/v1/namespaces/x/deployments` maps to `/apis/apps/v1/deployments`.
fn cluster_wide_collection(collection: &str) -> Option<String> {
	let (prefix, rest) = collection.split_once("/namespaces/")?;
	let (_, plural) = rest.split_once('/')?;
	Some(format!("{prefix}/{plural}"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_collection_paths() {
		let discovery = MockDiscovery::default();
		let collection = |p: &str| is_collection_path(p, &discovery);

		assert!(collection("/api/v1/namespaces"));
		assert!(collection("/api/v1/configmaps"));
		assert!(collection("/api/v1/namespaces/my-app/serviceaccounts"));
		assert!(collection(
			"/apis/networking.k8s.io/v1/namespaces/my-app/networkpolicies"
		));
		assert!(collection("/apis/snowflying.io/v1alpha1/namespaceclasses"));

		assert!(!collection("/api/v1/namespaces/my-app"));
		assert!(!collection("/api/v1/namespaces/serviceaccounts"));
		assert!(!collection(
			"/apis/snowflying.io/v1alpha1/namespaceclasses/secure-network"
		));
		assert!(!collection("/version"));
	}

	#[test]
	fn test_manifest_keys() {
		let discovery = MockDiscovery::default();

		let policy = serde_json::json!({
			"apiVersion": "networking.k8s.io/v1",
			"kind": "NetworkPolicy",
			"metadata": {"name": "deny-all-ingress", "namespace": "my-app"}
		});
		let key = ObjectKey::for_manifest(&policy, &discovery).unwrap();
		assert_eq!(
			key.collection,
			"/apis/networking.k8s.io/v1/namespaces/my-app/networkpolicies"
		);
		assert_eq!(key.name, "deny-all-ingress");
		assert_eq!(key.namespace(), Some("my-app"));

		let namespace = serde_json::json!({
			"apiVersion": "v1",
			"kind": "Namespace",
			"metadata": {"name": "my-app"}
		});
		let key = ObjectKey::for_manifest(&namespace, &discovery).unwrap();
		assert_eq!(key.collection, "/api/v1/namespaces");
		assert_eq!(key.namespace(), None);

		let unknown = serde_json::json!({
			"apiVersion": "example.com/v1",
			"kind": "Widget",
			"metadata": {"name": "gizmo"}
		});
		assert!(ObjectKey::for_manifest(&unknown, &discovery).is_none());
	}

	#[test]
	fn test_object_path_keys() {
		assert_eq!(
			ObjectKey::from_object_path("/api/v1/namespaces/my-app/configmaps/settings"),
			ObjectKey {
				collection: "/api/v1/namespaces/my-app/configmaps".to_string(),
				name: "settings".to_string(),
			}
		);
		assert_eq!(
			ObjectKey::from_object_path("/api/v1/namespaces/my-app").collection,
			"/api/v1/namespaces"
		);
	}

	#[test]
	fn test_cluster_wide_collection() {
		assert_eq!(
			cluster_wide_collection("/apis/apps/v1/namespaces/my-app/deployments").as_deref(),
			Some("/apis/apps/v1/deployments")
		);
		assert_eq!(cluster_wide_collection("/api/v1/namespaces"), None);
	}
}
