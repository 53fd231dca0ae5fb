//! Type Registry: discovery-derived lookup of namespaced, deletable kinds.
//!
//! Built once at startup from the cluster's discovery API and shared
//! read-only afterwards. Only kinds that are namespace-scoped and support both
//! `list` and `delete` are retained, since anything else can neither be
//! garbage collected nor created inside a namespace.

use std::collections::HashMap;

use kube::{
	core::GroupVersionKind,
	discovery::{oneshot, verbs, ApiCapabilities, ApiGroup, ApiResource, Scope},
	Client, Discovery,
};
use thiserror::Error;
use tracing::instrument;

/// Errors that make the registry unusable.
#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("listing API groups")]
	ListGroups(#[source] kube::Error),

	#[error("discovery failed for all {failed} API group(s), last was '{group}'")]
	AllGroupsFailed {
		failed: usize,
		group: String,
		#[source]
		source: kube::Error,
	},
}

/// Extract a GroupVersionKind from a Kubernetes manifest.
pub fn gvk_from_manifest(manifest: &serde_json::Value) -> Option<GroupVersionKind> {
	let api_version = manifest.get("apiVersion")?.as_str()?;
	let kind = manifest.get("kind")?.as_str()?;
	if api_version.is_empty() || kind.is_empty() {
		return None;
	}
	let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
	Some(GroupVersionKind::gvk(group, version, kind))
}

/// A resource kind the controller may create, list and delete.
#[derive(Debug, Clone)]
pub struct RegisteredType {
	/// The kube ApiResource for making API calls.
	pub api_resource: ApiResource,
	/// API capabilities (verbs, subresources, etc.)
	pub capabilities: ApiCapabilities,
}

impl RegisteredType {
	pub fn gvk(&self) -> GroupVersionKind {
		let ar = &self.api_resource;
		GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind)
	}
}

/// Immutable mapping from kind identity to API collection.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
	by_gvk: HashMap<GroupVersionKind, RegisteredType>,
	/// One entry per kind, at its most stable served version.
	collections: Vec<RegisteredType>,
}

impl TypeRegistry {
	/// Build the registry by querying the cluster's discovery API.
	///
	/// Uses the Aggregated Discovery API (K8s 1.26+) which requires only 2 API calls.
	/// Older clusters fall back to discovering each API group on its own; a group
	/// that fails is logged and skipped, and only a failure of every group is
	/// reported as an error.
	#[instrument(skip_all)]
	pub async fn build(client: &Client) -> Result<Self, RegistryError> {
		let registry = match Discovery::new(client.clone()).run_aggregated().await {
			Ok(discovery) => {
				tracing::debug!("using aggregated discovery");
				Self::from_groups(discovery.groups())
			}
			Err(e) => {
				tracing::debug!(error = %e, "aggregated discovery not available");
				Self::build_per_group(client).await?
			}
		};

		tracing::info!(
			kinds = registry.by_gvk.len(),
			collections = registry.collections.len(),
			"discovered namespace-scoped resource types"
		);
		Ok(registry)
	}

	/// Discover every API group separately, skipping the ones that fail.
	async fn build_per_group(client: &Client) -> Result<Self, RegistryError> {
		const CORE_GROUP: &str = "";

		let groups = client
			.list_api_groups()
			.await
			.map_err(RegistryError::ListGroups)?;
		let names =
			std::iter::once(CORE_GROUP.to_string()).chain(groups.groups.into_iter().map(|g| g.name));

		let mut discovered = Vec::new();
		let mut failures = Vec::new();
		for name in names {
			match oneshot::group(client, &name).await {
				Ok(group) => discovered.push(group),
				Err(e) => {
					tracing::warn!(group = %name, error = %e, "skipping API group that failed discovery");
					failures.push((name, e));
				}
			}
		}

		if discovered.is_empty() {
			let failed = failures.len();
			if let Some((group, source)) = failures.pop() {
				return Err(RegistryError::AllGroupsFailed {
					failed,
					group,
					source,
				});
			}
		}

		Ok(Self::from_groups(discovered.iter()))
	}

	/// Build a registry from already discovered API groups.
	pub fn from_groups<'a>(groups: impl IntoIterator<Item = &'a ApiGroup>) -> Self {
		let mut by_gvk = HashMap::new();
		let mut collections = Vec::new();

		for group in groups {
			// Every served version resolves, so templates may pin older versions
			for version in group.versions() {
				for (api_resource, capabilities) in group.versioned_resources(version) {
					if !is_eligible(&capabilities) {
						continue;
					}
					let registered = RegisteredType {
						api_resource,
						capabilities,
					};
					by_gvk.insert(registered.gvk(), registered);
				}
			}

			collections.extend(
				group
					.resources_by_stability()
					.into_iter()
					.filter(|(_, caps)| is_eligible(caps))
					.map(|(api_resource, capabilities)| RegisteredType {
						api_resource,
						capabilities,
					}),
			);
		}

		collections.sort_by(|a, b| {
			let key = |t: &RegisteredType| {
				(
					t.api_resource.group.clone(),
					t.api_resource.version.clone(),
					t.api_resource.plural.clone(),
				)
			};
			key(a).cmp(&key(b))
		});

		Self {
			by_gvk,
			collections,
		}
	}

	/// Look up a resource by its GroupVersionKind.
	pub fn resolve(&self, gvk: &GroupVersionKind) -> Option<&RegisteredType> {
		self.by_gvk.get(gvk)
	}

	/// Collections to scan during garbage collection, each kind once.
	pub fn collections(&self) -> &[RegisteredType] {
		&self.collections
	}

	pub fn len(&self) -> usize {
		self.by_gvk.len()
	}

	pub fn is_empty(&self) -> bool {
		self.by_gvk.is_empty()
	}
}

fn is_eligible(capabilities: &ApiCapabilities) -> bool {
	matches!(capabilities.scope, Scope::Namespaced)
		&& capabilities.supports_operation(verbs::LIST)
		&& capabilities.supports_operation(verbs::DELETE)
}
