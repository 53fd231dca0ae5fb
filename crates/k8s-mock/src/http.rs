//! Mock API server over real HTTP, reachable through a generated kubeconfig.
//!
//! Tests seed objects at startup, change them between steps with
//! [`RunningHttpMockK8sServer::upsert`] and [`RunningHttpMockK8sServer::remove`],
//! and inspect what the client under test created or deleted.

use bon::Builder;
use kube::config::{
	AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
use serde_json::{json, Value};
use tracing::{debug, trace};
use wiremock::{
	matchers::{header_regex, method, path, path_regex},
	Mock, MockServer, ResponseTemplate,
};

use crate::{
	discovery::{DiscoveryMode, MockDiscovery},
	helpers::status_body,
	objects::{Create, ObjectKey, Objects, Read, Remove},
};

const AGGREGATED_CONTENT_TYPE: &str =
	"application/json;g=apidiscovery.k8s.io;v=v2;as=APIGroupDiscoveryList";

/// Any path under `/api` or `/apis`.
const OBJECT_PATHS: &str = r"^/apis?/.+";

#[derive(Builder)]
pub struct HttpMockK8sServer {
	#[builder(default)]
	discovery_mode: DiscoveryMode,
	/// API surface served by the discovery endpoints.
	#[builder(default)]
	discovery: MockDiscovery,
	/// Objects present when the server starts. Manifests whose kind is not
	/// served by `discovery` are skipped.
	#[builder(default)]
	resources: Vec<Value>,
	/// Exact request paths that answer 500 for every method.
	#[builder(default)]
	failing_paths: Vec<String>,
}

pub struct RunningHttpMockK8sServer {
	server: MockServer,
	discovery: MockDiscovery,
	objects: Objects,
}

impl HttpMockK8sServer {
	pub async fn start(self) -> RunningHttpMockK8sServer {
		let server = MockServer::start().await;
		debug!(uri = %server.uri(), "mock API server listening");

		let objects = Objects::default();
		{
			let mut stored = objects.write();
			for manifest in self.resources {
				let Some(key) = ObjectKey::for_manifest(&manifest, &self.discovery) else {
					trace!(?manifest, "skipping manifest of unserved kind");
					continue;
				};
				stored.insert(key, manifest);
			}
		}

		for failing in &self.failing_paths {
			Mock::given(path(failing.as_str()))
				.respond_with(ResponseTemplate::new(500).set_body_json(status_body(
					500,
					"InternalError",
					"injected failure",
				)))
				.with_priority(1)
				.mount(&server)
				.await;
		}

		Mock::given(method("GET"))
			.and(path("/version"))
			.respond_with(ResponseTemplate::new(200).set_body_json(version_info()))
			.mount(&server)
			.await;

		mount_discovery(&server, &self.discovery, self.discovery_mode).await;

		Mock::given(method("POST"))
			.and(path_regex(OBJECT_PATHS))
			.respond_with(Create {
				objects: objects.clone(),
			})
			.mount(&server)
			.await;
		Mock::given(method("GET"))
			.and(path_regex(OBJECT_PATHS))
			.respond_with(Read {
				objects: objects.clone(),
				discovery: self.discovery.clone(),
			})
			.mount(&server)
			.await;
		Mock::given(method("DELETE"))
			.and(path_regex(OBJECT_PATHS))
			.respond_with(Remove {
				objects: objects.clone(),
			})
			.mount(&server)
			.await;

		RunningHttpMockK8sServer {
			server,
			discovery: self.discovery,
			objects,
		}
	}
}

fn version_info() -> Value {
	json!({
		"major": "1",
		"minor": "31",
		"gitVersion": "v1.31.4",
		"gitCommit": "mock",
		"gitTreeState": "clean",
		"buildDate": "2025-01-01T00:00:00Z",
		"goVersion": "go1.22.10",
		"compiler": "gc",
		"platform": "linux/amd64",
	})
}

fn unavailable() -> ResponseTemplate {
	ResponseTemplate::new(503).set_body_json(status_body(
		503,
		"ServiceUnavailable",
		"the server is currently unable to handle the request",
	))
}

async fn mount_discovery(server: &MockServer, discovery: &MockDiscovery, mode: DiscoveryMode) {
	for (root, core) in [("/api", true), ("/apis", false)] {
		let response = match mode {
			// set_body_json would replace the aggregated content type
			DiscoveryMode::Aggregated => ResponseTemplate::new(200).set_body_raw(
				discovery.aggregated_document(core).to_string(),
				AGGREGATED_CONTENT_TYPE,
			),
			DiscoveryMode::Legacy => ResponseTemplate::new(406),
		};
		Mock::given(method("GET"))
			.and(path(root))
			.and(header_regex("accept", "apidiscovery"))
			.respond_with(response)
			.mount(server)
			.await;
	}

	Mock::given(method("GET"))
		.and(path("/api"))
		.respond_with(ResponseTemplate::new(200).set_body_json(json!({
			"kind": "APIVersions",
			"versions": ["v1"],
			"serverAddressByClientCIDRs": [],
		})))
		.mount(server)
		.await;
	Mock::given(method("GET"))
		.and(path("/apis"))
		.respond_with(ResponseTemplate::new(200).set_body_json(discovery.group_list()))
		.mount(server)
		.await;

	for gv in discovery.group_versions() {
		let endpoint = if gv.contains('/') {
			format!("/apis/{gv}")
		} else {
			format!("/api/{gv}")
		};
		let response = match discovery.resource_list(&gv) {
			Some(list) => ResponseTemplate::new(200).set_body_json(list),
			None => unavailable(),
		};
		Mock::given(method("GET"))
			.and(path(endpoint))
			.respond_with(response)
			.mount(server)
			.await;
	}
}

impl RunningHttpMockK8sServer {
	pub fn uri(&self) -> String {
		self.server.uri()
	}

	/// Kubeconfig whose current context, `mock-context`, points at this server.
	pub fn kubeconfig(&self) -> Kubeconfig {
		self.kubeconfig_with_context("mock-context")
	}

	pub fn kubeconfig_with_context(&self, context_name: &str) -> Kubeconfig {
		const CLUSTER: &str = "mock-cluster";
		const USER: &str = "mock-user";

		Kubeconfig {
			clusters: vec![NamedCluster {
				name: CLUSTER.to_string(),
				cluster: Some(Cluster {
					server: Some(self.uri()),
					insecure_skip_tls_verify: Some(true),
					..Cluster::default()
				}),
			}],
			contexts: vec![NamedContext {
				name: context_name.to_string(),
				context: Some(Context {
					cluster: CLUSTER.to_string(),
					user: Some(USER.to_string()),
					..Context::default()
				}),
			}],
			auth_infos: vec![NamedAuthInfo {
				name: USER.to_string(),
				auth_info: Some(AuthInfo::default()),
			}],
			current_context: Some(context_name.to_string()),
			..Kubeconfig::default()
		}
	}

	/// Insert or replace an object, as if another client had written it.
	///
	/// Returns false when the manifest's kind is not served by discovery.
	pub fn upsert(&self, manifest: Value) -> bool {
		let Some(key) = ObjectKey::for_manifest(&manifest, &self.discovery) else {
			return false;
		};
		self.objects.write().insert(key, manifest);
		true
	}

	/// Remove an object, as if another client had deleted it.
	pub fn remove(&self, api_version: &str, kind: &str, namespace: Option<&str>, name: &str) {
		if let Some(key) = ObjectKey::new(&self.discovery, api_version, kind, namespace, name) {
			self.objects.write().remove(&key);
		}
	}

	pub fn get(
		&self,
		api_version: &str,
		kind: &str,
		namespace: Option<&str>,
		name: &str,
	) -> Option<Value> {
		let key = ObjectKey::new(&self.discovery, api_version, kind, namespace, name)?;
		self.objects.read().get(&key).cloned()
	}

	/// All objects stored inside a namespace, sorted by kind then name.
	pub fn namespaced_objects(&self, namespace: &str) -> Vec<Value> {
		self.objects.in_namespace(namespace)
	}
}
