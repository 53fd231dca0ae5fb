//! Connecting to the cluster.
//!
//! Credentials come from the pod's service account when running in a cluster,
//! and from a kubeconfig (`$KUBECONFIG`, then `~/.kube/config`) otherwise.

use std::fmt;

use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
	config::{KubeConfigOptions, Kubeconfig, KubeconfigError},
	Client, Config,
};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum ConnectionError {
	#[error("no context named `{0}` was found. Please check your $KUBECONFIG")]
	ContextNotFound(String),

	#[error("loading kubeconfig")]
	Kubeconfig(#[from] KubeconfigError),

	#[error("contacting the API server")]
	Kube(#[from] kube::Error),
}

/// Where the credentials of a connection came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
	InCluster,
	Context(String),
}

impl fmt::Display for CredentialSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CredentialSource::InCluster => f.write_str("in-cluster"),
			CredentialSource::Context(name) => write!(f, "context:{name}"),
		}
	}
}

/// A verified client: the API server answered `/version` when it was made.
#[derive(Clone)]
pub struct ClusterConnection {
	client: Client,
	version: Info,
	source: CredentialSource,
}

impl fmt::Debug for ClusterConnection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClusterConnection")
			.field("source", &self.source)
			.field("version", &self.version.git_version)
			.finish_non_exhaustive()
	}
}

impl ClusterConnection {
	/// Prefer in-cluster credentials, falling back to the local kubeconfig.
	///
	/// `context` only applies to the kubeconfig path.
	#[instrument(skip_all)]
	pub async fn infer(context: Option<&str>) -> Result<Self, ConnectionError> {
		if let Ok(config) = Config::incluster() {
			tracing::debug!("using service account credentials");
			return Self::verify(config, CredentialSource::InCluster).await;
		}

		tracing::debug!("not running in a cluster, reading kubeconfig");
		Self::from_kubeconfig(Kubeconfig::read()?, context).await
	}

	/// Connect through `kubeconfig`, using `context` or the current one.
	#[instrument(skip(kubeconfig))]
	pub async fn from_kubeconfig(
		kubeconfig: Kubeconfig,
		context: Option<&str>,
	) -> Result<Self, ConnectionError> {
		let selected = match context {
			Some(name) if kubeconfig.contexts.iter().all(|c| c.name != name) => {
				return Err(ConnectionError::ContextNotFound(name.to_string()));
			}
			Some(name) => name.to_string(),
			None => kubeconfig.current_context.clone().unwrap_or_default(),
		};

		let options = KubeConfigOptions {
			context: context.map(str::to_string),
			..KubeConfigOptions::default()
		};
		let config = Config::from_custom_kubeconfig(kubeconfig, &options).await?;
		Self::verify(config, CredentialSource::Context(selected)).await
	}

	async fn verify(config: Config, source: CredentialSource) -> Result<Self, ConnectionError> {
		let client = Client::try_from(config)?;
		let version = client.apiserver_version().await?;
		tracing::info!(
			source = %source,
			version = %version.git_version,
			"connected to API server"
		);
		Ok(Self {
			client,
			version,
			source,
		})
	}

	pub fn client(&self) -> &Client {
		&self.client
	}

	pub fn server_version(&self) -> &Info {
		&self.version
	}

	pub fn source(&self) -> &CredentialSource {
		&self.source
	}
}
