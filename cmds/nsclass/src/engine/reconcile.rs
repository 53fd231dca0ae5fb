//! Level-triggered reconciliation of a single namespace.
//!
//! A namespace is either unbound (no class label) or bound to one class.
//! Every reconcile reads the namespace fresh and converges it to that state:
//! unbound namespaces lose all managed objects, bound ones are purged and
//! re-populated from the current class definition.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use super::{
	apply::{Applier, ApplyReport},
	gc::{CleanupReport, GarbageCollector},
};
use crate::{
	class::ClassError,
	k8s::{
		registry::TypeRegistry,
		store::{ObjectStore, StoreError},
	},
	labels,
	queue::{TargetAction, TargetHandler},
};

/// Errors that stop a namespace from being reconciled this round.
#[derive(Debug, Error)]
pub enum ReconcileError {
	#[error("fetching namespace '{namespace}': {source}")]
	FetchNamespace {
		namespace: String,
		#[source]
		source: StoreError,
	},

	#[error("fetching NamespaceClass '{class}': {source}")]
	FetchClass {
		class: String,
		#[source]
		source: StoreError,
	},

	#[error("listing namespaces bound to '{class}': {source}")]
	ListBound {
		class: String,
		#[source]
		source: StoreError,
	},

	#[error(transparent)]
	Class(#[from] ClassError),
}

/// What a reconcile did to a namespace.
#[derive(Debug)]
pub enum ReconcileOutcome {
	/// The namespace no longer exists.
	NamespaceGone,
	/// The namespace is being deleted; its objects go with it.
	Terminating,
	/// No class label: every managed object was removed.
	Unbound(CleanupReport),
	/// The label names a class that does not exist: its objects were removed.
	ClassMissing {
		class: String,
		cleanup: CleanupReport,
	},
	Applied(ApplyReport),
}

#[derive(Clone)]
pub struct Reconciler {
	store: ObjectStore,
	gc: GarbageCollector,
	applier: Applier,
}

impl Reconciler {
	pub fn new(store: ObjectStore, registry: Arc<TypeRegistry>) -> Self {
		let gc = GarbageCollector::new(store.clone(), registry.clone());
		let applier = Applier::new(store.clone(), registry, gc.clone());
		Self { store, gc, applier }
	}

	pub fn applier(&self) -> &Applier {
		&self.applier
	}

	pub fn gc(&self) -> &GarbageCollector {
		&self.gc
	}

	/// Converge `namespace` to the class its label currently selects.
	#[instrument(skip(self))]
	pub async fn reconcile_target(
		&self,
		namespace: &str,
	) -> Result<ReconcileOutcome, ReconcileError> {
		let ns = self
			.store
			.get_namespace(namespace)
			.await
			.map_err(|source| ReconcileError::FetchNamespace {
				namespace: namespace.to_string(),
				source,
			})?;

		let Some(ns) = ns else {
			tracing::debug!("namespace no longer exists");
			return Ok(ReconcileOutcome::NamespaceGone);
		};
		if ns.metadata.deletion_timestamp.is_some() {
			tracing::debug!("namespace is terminating");
			return Ok(ReconcileOutcome::Terminating);
		}

		let Some(class_name) = labels::bound_class(ns.metadata.labels.as_ref()) else {
			tracing::info!("no class label, cleaning up managed objects");
			return Ok(ReconcileOutcome::Unbound(
				self.gc.cleanup(namespace, None).await,
			));
		};

		let class = self
			.store
			.get_class(class_name)
			.await
			.map_err(|source| ReconcileError::FetchClass {
				class: class_name.to_string(),
				source,
			})?;

		match class {
			Some(class) => {
				let report = self
					.applier
					.apply_class(namespace, class_name, &class)
					.await?;
				Ok(ReconcileOutcome::Applied(report))
			}
			None => {
				tracing::warn!(class = %class_name, "bound class does not exist, cleaning up its objects");
				let cleanup = self.gc.cleanup(namespace, Some(class_name)).await;
				Ok(ReconcileOutcome::ClassMissing {
					class: class_name.to_string(),
					cleanup,
				})
			}
		}
	}

	/// Names of namespaces whose label binds them to `class`.
	pub async fn bound_namespaces(&self, class: &str) -> Result<Vec<String>, ReconcileError> {
		let selector = labels::bound_namespaces_selector(class);
		let namespaces = self
			.store
			.list_namespaces(&selector)
			.await
			.map_err(|source| ReconcileError::ListBound {
				class: class.to_string(),
				source,
			})?;

		Ok(namespaces
			.into_iter()
			.filter_map(|ns| ns.metadata.name)
			.collect())
	}
}

impl TargetHandler for Reconciler {
	async fn handle(&self, target: &str, action: TargetAction) {
		match action {
			TargetAction::Reconcile => match self.reconcile_target(target).await {
				Ok(outcome) => {
					tracing::debug!(namespace = %target, outcome = ?outcome, "reconciled namespace");
				}
				Err(e) => {
					tracing::error!(namespace = %target, error = %e, "failed to reconcile namespace");
				}
			},
			TargetAction::Cleanup { owner } => {
				let report = self.gc.cleanup(target, Some(&owner)).await;
				tracing::debug!(
					namespace = %target,
					class = %owner,
					deleted = report.deleted,
					failures = report.failures.len(),
					"cleaned up namespace"
				);
			}
		}
	}
}
