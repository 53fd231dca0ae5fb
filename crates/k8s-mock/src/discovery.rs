//! Mock Kubernetes API discovery types.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

/// Discovery mode for the mock server.
#[derive(Clone, Copy, Default)]
pub enum DiscoveryMode {
	/// Support aggregated discovery (APIGroupDiscoveryList).
	#[default]
	Aggregated,
	/// Return 406 for aggregated discovery, forcing fallback to legacy endpoints.
	Legacy,
}

/// Pre-configured discovery responses.
///
/// Group resources are keyed by groupVersion (`networking.k8s.io/v1`).
#[derive(Clone)]
pub struct MockDiscovery {
	pub core_resources: Vec<MockApiResource>,
	pub group_resources: BTreeMap<String, Vec<MockApiResource>>,
	/// GroupVersions whose legacy discovery endpoint answers 503.
	/// Use `v1` for the core group.
	pub failing_group_versions: BTreeSet<String>,
}

impl Default for MockDiscovery {
	fn default() -> Self {
		Self {
			core_resources: vec![
				MockApiResource::namespaced("configmaps", "ConfigMap"),
				MockApiResource::namespaced("secrets", "Secret"),
				MockApiResource::namespaced("services", "Service"),
				MockApiResource::namespaced("pods", "Pod"),
				MockApiResource::namespaced("serviceaccounts", "ServiceAccount"),
				MockApiResource::namespaced("bindings", "Binding").with_verbs(&["create"]),
				MockApiResource::cluster_scoped("namespaces", "Namespace"),
			],
			group_resources: BTreeMap::from([
				(
					"apps/v1".to_string(),
					vec![
						MockApiResource::namespaced("deployments", "Deployment"),
						MockApiResource::namespaced("statefulsets", "StatefulSet"),
						MockApiResource::namespaced("daemonsets", "DaemonSet"),
					],
				),
				(
					"networking.k8s.io/v1".to_string(),
					vec![MockApiResource::namespaced(
						"networkpolicies",
						"NetworkPolicy",
					)],
				),
				(
					"snowflying.io/v1alpha1".to_string(),
					vec![MockApiResource::cluster_scoped(
						"namespaceclasses",
						"NamespaceClass",
					)],
				),
			]),
			failing_group_versions: BTreeSet::new(),
		}
	}
}

impl MockDiscovery {
	/// Make legacy discovery of the given groupVersion fail.
	pub fn with_failing_group_version(mut self, group_version: &str) -> Self {
		self.failing_group_versions
			.insert(group_version.to_string());
		self
	}

	/// Find the resource serving `kind` in `api_version`.
	pub fn find(&self, api_version: &str, kind: &str) -> Option<&MockApiResource> {
		if api_version.contains('/') {
			self.group_resources
				.get(api_version)?
				.iter()
				.find(|r| r.kind == kind)
		} else if api_version == "v1" {
			self.core_resources.iter().find(|r| r.kind == kind)
		} else {
			None
		}
	}

	/// Whether `plural` names a collection of any discovered resource.
	pub fn is_plural(&self, plural: &str) -> bool {
		self.core_resources
			.iter()
			.chain(self.group_resources.values().flatten())
			.any(|r| r.name == plural)
	}

	fn all_resources(&self) -> impl Iterator<Item = (&str, &MockApiResource)> {
		self.core_resources
			.iter()
			.map(|r| ("v1", r))
			.chain(
				self.group_resources
					.iter()
					.flat_map(|(gv, rs)| rs.iter().map(move |r| (gv.as_str(), r))),
			)
	}

	fn is_failing(&self, group_version: &str) -> bool {
		self.failing_group_versions.contains(group_version)
	}

	/// `APIGroupDiscoveryList` served at `/api` (core) or `/apis` (groups).
	pub fn aggregated_document(&self, core: bool) -> serde_json::Value {
		let items: Vec<_> = self
			.all_resources()
			.filter(|(gv, _)| (*gv == "v1") == core)
			.fold(BTreeMap::<&str, Vec<_>>::new(), |mut by_gv, (gv, r)| {
				by_gv.entry(gv).or_default().push(r);
				by_gv
			})
			.into_iter()
			.map(|(gv, resources)| {
				let (group, version) = split_group_version(gv);
				let resources: Vec<_> = resources
					.into_iter()
					.map(|r| {
						json!({
							"resource": r.name,
							"responseKind": {"group": group, "version": version, "kind": r.kind},
							"scope": if r.namespaced { "Namespaced" } else { "Cluster" },
							"verbs": r.verbs,
						})
					})
					.collect();
				json!({
					"metadata": {"name": group},
					"versions": [{"version": version, "resources": resources, "freshness": "Current"}],
				})
			})
			.collect();

		json!({
			"kind": "APIGroupDiscoveryList",
			"apiVersion": "apidiscovery.k8s.io/v2",
			"items": items,
		})
	}

	/// `APIGroupList` served at `/apis`.
	pub fn group_list(&self) -> serde_json::Value {
		let groups: Vec<_> = self
			.group_resources
			.keys()
			.map(|gv| {
				let (group, version) = split_group_version(gv);
				let entry = json!({"groupVersion": gv, "version": version});
				json!({"name": group, "versions": [entry.clone()], "preferredVersion": entry})
			})
			.collect();
		json!({"kind": "APIGroupList", "apiVersion": "v1", "groups": groups})
	}

	/// `APIResourceList` for one group version, or None when it should fail.
	pub fn resource_list(&self, group_version: &str) -> Option<serde_json::Value> {
		if self.is_failing(group_version) {
			return None;
		}
		let resources: Vec<_> = self
			.all_resources()
			.filter(|(gv, _)| *gv == group_version)
			.map(|(_, r)| {
				json!({
					"name": r.name,
					"singularName": "",
					"namespaced": r.namespaced,
					"kind": r.kind,
					"verbs": r.verbs,
				})
			})
			.collect();
		Some(json!({
			"kind": "APIResourceList",
			"apiVersion": "v1",
			"groupVersion": group_version,
			"resources": resources,
		}))
	}

	/// Every served group version, core first.
	pub fn group_versions(&self) -> Vec<String> {
		std::iter::once("v1".to_string())
			.chain(self.group_resources.keys().cloned())
			.collect()
	}
}

fn split_group_version(gv: &str) -> (&str, &str) {
	gv.split_once('/').unwrap_or(("", gv))
}

/// A mock API resource definition.
#[derive(Clone)]
pub struct MockApiResource {
	pub name: String,
	pub kind: String,
	pub namespaced: bool,
	pub verbs: Vec<String>,
}

const ALL_VERBS: &[&str] = &[
	"create", "delete", "get", "list", "patch", "update", "watch",
];

impl MockApiResource {
	pub fn namespaced(name: &str, kind: &str) -> Self {
		Self {
			name: name.to_string(),
			kind: kind.to_string(),
			namespaced: true,
			verbs: ALL_VERBS.iter().map(|v| (*v).to_string()).collect(),
		}
	}

	pub fn cluster_scoped(name: &str, kind: &str) -> Self {
		Self {
			namespaced: false,
			..Self::namespaced(name, kind)
		}
	}

	/// Replace the advertised verb set.
	pub fn with_verbs(mut self, verbs: &[&str]) -> Self {
		self.verbs = verbs.iter().map(|v| (*v).to_string()).collect();
		self
	}
}
