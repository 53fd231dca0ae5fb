//! Object store facade over the Kubernetes API.
//!
//! The engine only needs get/list/create/delete on namespaces, classes and
//! registered kinds. Every call is bounded by a deadline so a stuck request
//! cannot stall a worker indefinitely.

use std::{future::Future, time::Duration};

use k8s_openapi::api::core::v1::Namespace;
use kube::{
	api::{Api, DeleteParams, DynamicObject, ListParams, PostParams},
	Client,
};
use thiserror::Error;

use super::registry::RegisteredType;
use crate::class::class_api_resource;

/// Errors returned by object store calls.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("{operation} timed out after {timeout:?}")]
	Timeout {
		operation: &'static str,
		timeout: Duration,
	},

	#[error("{operation} failed: {source}")]
	Api {
		operation: &'static str,
		#[source]
		source: Box<kube::Error>,
	},
}

fn is_not_found(error: &kube::Error) -> bool {
	matches!(error, kube::Error::Api(status) if status.code == 404)
}

/// Thin capability surface over the kube client.
#[derive(Clone)]
pub struct ObjectStore {
	client: Client,
	timeout: Duration,
}

impl ObjectStore {
	pub fn new(client: Client, timeout: Duration) -> Self {
		Self { client, timeout }
	}

	/// Api handle for namespaces, used by the namespace watcher.
	pub fn namespaces(&self) -> Api<Namespace> {
		Api::all(self.client.clone())
	}

	/// Api handle for NamespaceClasses, used by the class watcher.
	pub fn classes(&self) -> Api<DynamicObject> {
		Api::all_with(self.client.clone(), &class_api_resource())
	}

	fn namespaced(&self, ty: &RegisteredType, namespace: &str) -> Api<DynamicObject> {
		Api::namespaced_with(self.client.clone(), namespace, &ty.api_resource)
	}

	async fn call<T>(
		&self,
		operation: &'static str,
		request: impl Future<Output = kube::Result<T>>,
	) -> Result<T, StoreError> {
		match tokio::time::timeout(self.timeout, request).await {
			Ok(result) => result.map_err(|e| StoreError::Api {
				operation,
				source: Box::new(e),
			}),
			Err(_) => Err(StoreError::Timeout {
				operation,
				timeout: self.timeout,
			}),
		}
	}

	pub async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, StoreError> {
		let api = self.namespaces();
		self.call("get namespace", api.get_opt(name)).await
	}

	pub async fn list_namespaces(&self, selector: &str) -> Result<Vec<Namespace>, StoreError> {
		let api = self.namespaces();
		let params = ListParams::default().labels(selector);
		let list = self.call("list namespaces", api.list(&params)).await?;
		Ok(list.items)
	}

	pub async fn get_class(&self, name: &str) -> Result<Option<DynamicObject>, StoreError> {
		let api = self.classes();
		self.call("get NamespaceClass", api.get_opt(name)).await
	}

	pub async fn list(
		&self,
		ty: &RegisteredType,
		namespace: &str,
		selector: &str,
	) -> Result<Vec<DynamicObject>, StoreError> {
		let api = self.namespaced(ty, namespace);
		let params = ListParams::default().labels(selector);
		let list = self.call("list", api.list(&params)).await?;
		Ok(list.items)
	}

	pub async fn create(
		&self,
		ty: &RegisteredType,
		namespace: &str,
		object: &DynamicObject,
	) -> Result<DynamicObject, StoreError> {
		let api = self.namespaced(ty, namespace);
		self.call("create", api.create(&PostParams::default(), object))
			.await
	}

	/// Delete an object. Returns false when it was already gone.
	pub async fn delete(
		&self,
		ty: &RegisteredType,
		namespace: &str,
		name: &str,
	) -> Result<bool, StoreError> {
		let api = self.namespaced(ty, namespace);
		match tokio::time::timeout(self.timeout, api.delete(name, &DeleteParams::default())).await {
			Ok(Ok(_)) => Ok(true),
			Ok(Err(e)) if is_not_found(&e) => Ok(false),
			Ok(Err(e)) => Err(StoreError::Api {
				operation: "delete",
				source: Box::new(e),
			}),
			Err(_) => Err(StoreError::Timeout {
				operation: "delete",
				timeout: self.timeout,
			}),
		}
	}
}
