//! Shared fixtures for the mock-cluster integration tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use k8s_mock::{DiscoveryMode, HttpMockK8sServer, RunningHttpMockK8sServer};
use nsclass::{
	engine::Reconciler,
	k8s::{client::ClusterConnection, registry::TypeRegistry, store::ObjectStore},
	labels::{CLASS_LABEL, MANAGED_LABEL, OWNER_LABEL},
};
use serde_json::{json, Value};

pub const API_TIMEOUT: Duration = Duration::from_secs(5);

pub fn namespace(name: &str, class: Option<&str>) -> Value {
	let mut ns = json!({
		"apiVersion": "v1",
		"kind": "Namespace",
		"metadata": {"name": name}
	});
	if let Some(class) = class {
		ns["metadata"]["labels"] = json!({ CLASS_LABEL: class });
	}
	ns
}

pub fn class(name: &str, resources: Vec<Value>) -> Value {
	json!({
		"apiVersion": "snowflying.io/v1alpha1",
		"kind": "NamespaceClass",
		"metadata": {"name": name, "generation": 1},
		"spec": {"resources": resources}
	})
}

pub fn network_policy(name: &str) -> Value {
	json!({
		"apiVersion": "networking.k8s.io/v1",
		"kind": "NetworkPolicy",
		"metadata": {"name": name},
		"spec": {"podSelector": {}, "policyTypes": ["Ingress"]}
	})
}

pub fn service_account(name: &str) -> Value {
	json!({
		"apiVersion": "v1",
		"kind": "ServiceAccount",
		"metadata": {"name": name}
	})
}

pub fn secure_network() -> Value {
	class(
		"secure-network",
		vec![
			network_policy("deny-all-ingress"),
			service_account("app-service-account"),
		],
	)
}

pub fn public_network() -> Value {
	class("public-network", vec![network_policy("allow-all-ingress")])
}

/// An object the controller created earlier, as the cluster would hold it.
pub fn managed(mut manifest: Value, namespace: &str, owner: &str) -> Value {
	manifest["metadata"]["namespace"] = json!(namespace);
	manifest["metadata"]["labels"] = json!({
		MANAGED_LABEL: "true",
		OWNER_LABEL: owner,
	});
	manifest
}

pub async fn start(resources: Vec<Value>) -> RunningHttpMockK8sServer {
	start_with_mode(DiscoveryMode::Aggregated, resources).await
}

pub async fn start_with_mode(
	discovery_mode: DiscoveryMode,
	resources: Vec<Value>,
) -> RunningHttpMockK8sServer {
	HttpMockK8sServer::builder()
		.discovery_mode(discovery_mode)
		.resources(resources)
		.build()
		.start()
		.await
}

pub async fn connect(server: &RunningHttpMockK8sServer) -> ClusterConnection {
	ClusterConnection::from_kubeconfig(server.kubeconfig(), None)
		.await
		.expect("connection should succeed")
}

pub async fn registry(connection: &ClusterConnection) -> Arc<TypeRegistry> {
	Arc::new(
		TypeRegistry::build(connection.client())
			.await
			.expect("discovery should succeed"),
	)
}

pub async fn reconciler(server: &RunningHttpMockK8sServer) -> Reconciler {
	let connection = connect(server).await;
	let registry = registry(&connection).await;
	let store = ObjectStore::new(connection.client().clone(), API_TIMEOUT);
	Reconciler::new(store, registry)
}

/// `(kind, name, owner)` of every object in `namespace`, sorted.
pub fn owned(server: &RunningHttpMockK8sServer, namespace: &str) -> Vec<(String, String, String)> {
	server
		.namespaced_objects(namespace)
		.iter()
		.map(|o| {
			let field = |pointer: &str| {
				o.pointer(pointer)
					.and_then(Value::as_str)
					.unwrap_or_default()
					.to_string()
			};
			(
				field("/kind"),
				field("/metadata/name"),
				field("/metadata/labels/namespaceclass.snowflying.io~1owner"),
			)
		})
		.collect()
}

pub fn entry(kind: &str, name: &str, owner: &str) -> (String, String, String) {
	(kind.to_string(), name.to_string(), owner.to_string())
}
