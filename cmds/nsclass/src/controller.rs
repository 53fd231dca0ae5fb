//! Controller wiring: discovery, the engine, the work queue and both watchers.

use std::sync::Arc;

use kube::Client;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
	config::ControllerConfig,
	engine::Reconciler,
	k8s::{
		client::ClusterConnection,
		registry::{RegistryError, TypeRegistry},
		store::ObjectStore,
	},
	queue::TargetQueue,
	watch::{class, namespace, WatchDriver},
};

#[derive(Debug, Error)]
pub enum ControllerError {
	#[error("discovering API resources")]
	Discovery(#[from] RegistryError),

	#[error("{0} watch stopped unexpectedly")]
	WatchStopped(&'static str),

	#[error("{stream} watch task failed")]
	WatchPanicked {
		stream: &'static str,
		#[source]
		source: tokio::task::JoinError,
	},
}

pub struct Controller {
	store: ObjectStore,
	reconciler: Reconciler,
	config: ControllerConfig,
}

impl Controller {
	/// Discover the cluster's resource types and set up the engine.
	///
	/// Fails when discovery fails entirely.
	pub async fn new(
		connection: &ClusterConnection,
		config: ControllerConfig,
	) -> Result<Self, ControllerError> {
		let registry = TypeRegistry::build(connection.client()).await?;
		Ok(Self::with_registry(
			connection.client().clone(),
			registry,
			config,
		))
	}

	pub fn with_registry(client: Client, registry: TypeRegistry, config: ControllerConfig) -> Self {
		let store = ObjectStore::new(client, config.api_timeout);
		let reconciler = Reconciler::new(store.clone(), Arc::new(registry));
		Self {
			store,
			reconciler,
			config,
		}
	}

	pub fn reconciler(&self) -> &Reconciler {
		&self.reconciler
	}

	/// Run both watchers until `shutdown` is cancelled.
	///
	/// Queued work still pending at shutdown is dropped.
	pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
		let threshold = self.config.watch_failure_threshold;
		let queue = TargetQueue::new(
			Arc::new(self.reconciler.clone()),
			shutdown.clone(),
			self.config.max_concurrent_reconciles,
		);

		let namespaces = WatchDriver::watch(self.store.namespaces(), namespace::STREAM, threshold);
		let classes = WatchDriver::watch(self.store.classes(), class::STREAM, threshold);

		let mut namespace_task = tokio::spawn(namespace::run(namespaces, queue.clone()));
		let mut class_task = tokio::spawn(class::run(classes, self.reconciler.clone(), queue));

		tracing::info!("controller started");

		let result = tokio::select! {
			() = shutdown.cancelled() => {
				tracing::info!("shutting down");
				Ok(())
			}
			joined = &mut namespace_task => watch_exit(namespace::STREAM, joined),
			joined = &mut class_task => watch_exit(class::STREAM, joined),
		};

		shutdown.cancel();
		abort(namespace_task);
		abort(class_task);
		result
	}
}

fn watch_exit(
	stream: &'static str,
	joined: Result<(), tokio::task::JoinError>,
) -> Result<(), ControllerError> {
	match joined {
		Ok(()) => Err(ControllerError::WatchStopped(stream)),
		Err(source) => Err(ControllerError::WatchPanicked { stream, source }),
	}
}

fn abort(task: JoinHandle<()>) {
	if !task.is_finished() {
		task.abort();
	}
}
