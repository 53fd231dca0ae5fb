//! Materializing a NamespaceClass inside a namespace.

use std::sync::Arc;

use kube::api::DynamicObject;
use thiserror::Error;
use tracing::instrument;

use super::gc::{CleanupReport, GarbageCollector};
use crate::{
	class::{ClassDefinition, ClassError, ResourceTemplate, TemplateError},
	k8s::{
		registry::TypeRegistry,
		store::{ObjectStore, StoreError},
	},
};

/// Errors for a single resource of a class. They never abort the batch.
#[derive(Debug, Error)]
pub enum ApplyError {
	#[error(transparent)]
	Template(#[from] TemplateError),

	#[error("unknown resource type: {group}/{version} Kind={kind} (resource '{name}')")]
	UnknownResourceType {
		group: String,
		version: String,
		kind: String,
		name: String,
	},

	#[error("creating {kind}/{name}: {source}")]
	CreateFailed {
		kind: String,
		name: String,
		#[source]
		source: StoreError,
	},
}

impl ApplyError {
	/// Kind of the failed resource, when its template declared one.
	pub fn kind(&self) -> Option<&str> {
		match self {
			ApplyError::Template(e) => e.kind(),
			ApplyError::UnknownResourceType { kind, .. } | ApplyError::CreateFailed { kind, .. } => {
				Some(kind)
			}
		}
	}

	pub fn name(&self) -> Option<&str> {
		match self {
			ApplyError::Template(e) => e.name(),
			ApplyError::UnknownResourceType { name, .. } | ApplyError::CreateFailed { name, .. } => {
				Some(name)
			}
		}
	}
}

/// A resource that could not be created.
#[derive(Debug)]
pub struct ItemFailure {
	/// Position of the template in `spec.resources`.
	pub index: usize,
	pub error: ApplyError,
}

/// Outcome of applying one class to one namespace.
#[derive(Debug)]
pub struct ApplyReport {
	pub class: String,
	pub total: usize,
	pub created: usize,
	pub purged: CleanupReport,
	pub failures: Vec<ItemFailure>,
}

impl ApplyReport {
	pub fn is_complete(&self) -> bool {
		self.created == self.total
	}
}

/// Creates the resources a class declares, stamped with ownership labels.
///
/// Application purges every managed object in the namespace first, then
/// creates the declared set. Creation is best-effort: each resource succeeds
/// or fails on its own, and nothing is rolled back.
#[derive(Clone)]
pub struct Applier {
	store: ObjectStore,
	registry: Arc<TypeRegistry>,
	gc: GarbageCollector,
}

impl Applier {
	pub fn new(store: ObjectStore, registry: Arc<TypeRegistry>, gc: GarbageCollector) -> Self {
		Self {
			store,
			registry,
			gc,
		}
	}

	/// Apply `class` (named `class_name`) to `namespace`.
	///
	/// Fails only when the class has no `spec.resources`; in that case the
	/// namespace has already been purged and nothing is created.
	#[instrument(skip(self, class))]
	pub async fn apply_class(
		&self,
		namespace: &str,
		class_name: &str,
		class: &DynamicObject,
	) -> Result<ApplyReport, ClassError> {
		tracing::info!("applying class");

		let purged = self.gc.cleanup(namespace, None).await;

		let definition = ClassDefinition::from_object(class)?;

		let total = definition.len();
		tracing::debug!(total, "creating resources");

		let mut created = 0;
		let mut failures = Vec::new();
		for (index, template) in definition.templates().enumerate() {
			match self.create_resource(namespace, class_name, template).await {
				Ok(template) => {
					tracing::info!(
						kind = %template.gvk.kind,
						name = %template.name,
						"created resource"
					);
					created += 1;
				}
				Err(error) => {
					tracing::error!(
						index,
						kind = error.kind(),
						name = error.name(),
						error = %error,
						"failed to create resource"
					);
					failures.push(ItemFailure { index, error });
				}
			}
		}

		tracing::info!(created, total, "finished applying class");

		Ok(ApplyReport {
			class: class_name.to_string(),
			total,
			created,
			purged,
			failures,
		})
	}

	async fn create_resource(
		&self,
		namespace: &str,
		owner: &str,
		template: Result<ResourceTemplate, TemplateError>,
	) -> Result<ResourceTemplate, ApplyError> {
		let template = template?;

		let ty = self
			.registry
			.resolve(&template.gvk)
			.ok_or_else(|| ApplyError::UnknownResourceType {
				group: template.gvk.group.clone(),
				version: template.gvk.version.clone(),
				kind: template.gvk.kind.clone(),
				name: template.name.clone(),
			})?;

		let object = template.render(namespace, owner)?;

		self.store
			.create(ty, namespace, &object)
			.await
			.map_err(|source| ApplyError::CreateFailed {
				kind: template.gvk.kind.clone(),
				name: template.name.clone(),
				source,
			})?;

		Ok(template)
	}
}
