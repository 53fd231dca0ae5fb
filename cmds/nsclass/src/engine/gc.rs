//! Garbage collection of controller-owned objects.

use std::sync::Arc;

use tracing::instrument;

use crate::{
	k8s::{
		registry::TypeRegistry,
		store::{ObjectStore, StoreError},
	},
	labels,
};

/// A list or delete call that failed during cleanup.
#[derive(Debug)]
pub struct CleanupFailure {
	pub kind: String,
	/// None when listing the kind failed.
	pub name: Option<String>,
	pub error: StoreError,
}

/// Outcome of one cleanup pass over a namespace.
#[derive(Debug, Default)]
pub struct CleanupReport {
	pub deleted: usize,
	pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
	pub fn is_clean(&self) -> bool {
		self.failures.is_empty()
	}
}

/// Deletes managed objects from a namespace across every registered kind.
///
/// Cleanup is best-effort: a kind that cannot be listed, or an object that
/// cannot be deleted, is recorded and the scan moves on. A later pass retries
/// whatever was missed.
#[derive(Clone)]
pub struct GarbageCollector {
	store: ObjectStore,
	registry: Arc<TypeRegistry>,
}

impl GarbageCollector {
	pub fn new(store: ObjectStore, registry: Arc<TypeRegistry>) -> Self {
		Self { store, registry }
	}

	/// Delete managed objects in `namespace`, optionally only those owned by `owner`.
	#[instrument(skip(self))]
	pub async fn cleanup(&self, namespace: &str, owner: Option<&str>) -> CleanupReport {
		let owner = owner.filter(|o| !o.is_empty());
		let selector = labels::managed_selector(owner);
		let mut report = CleanupReport::default();

		tracing::debug!(
			kinds = self.registry.collections().len(),
			selector = %selector,
			"scanning resource types"
		);

		for ty in self.registry.collections() {
			let kind = &ty.api_resource.kind;
			let objects = match self.store.list(ty, namespace, &selector).await {
				Ok(objects) => objects,
				Err(error) => {
					tracing::warn!(kind = %kind, error = %error, "failed to list managed objects");
					report.failures.push(CleanupFailure {
						kind: kind.clone(),
						name: None,
						error,
					});
					continue;
				}
			};

			for object in objects {
				let Some(name) = object.metadata.name else {
					continue;
				};
				match self.store.delete(ty, namespace, &name).await {
					Ok(true) => {
						tracing::info!(kind = %kind, name = %name, "deleted managed object");
						report.deleted += 1;
					}
					Ok(false) => {
						tracing::debug!(kind = %kind, name = %name, "managed object already gone");
					}
					Err(error) => {
						tracing::error!(kind = %kind, name = %name, error = %error, "failed to delete managed object");
						report.failures.push(CleanupFailure {
							kind: kind.clone(),
							name: Some(name),
							error,
						});
					}
				}
			}
		}

		if report.deleted > 0 {
			tracing::info!(deleted = report.deleted, "cleanup finished");
		} else {
			tracing::debug!("no managed objects to clean up");
		}
		report
	}
}
