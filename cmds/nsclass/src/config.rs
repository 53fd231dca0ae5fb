//! Runtime configuration.
//!
//! Every setting is a flag with an environment fallback and a default, so the
//! controller runs without any arguments inside a cluster.

use std::time::Duration;

use clap::Args;
use tracing::Level;

pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WATCH_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 8;

#[derive(Args, Debug, Clone)]
pub struct ControllerArgs {
	/// Log level (trace, debug, info, warn, error). Takes priority over RUST_LOG
	#[arg(long, env = "NSCLASS_LOG_LEVEL")]
	pub log_level: Option<Level>,

	/// Kubeconfig context to use when running outside a cluster
	#[arg(long, env = "NSCLASS_CONTEXT")]
	pub context: Option<String>,

	/// Deadline in seconds for each get, list, create and delete call
	#[arg(long, env = "NSCLASS_API_TIMEOUT_SECS", default_value_t = DEFAULT_API_TIMEOUT_SECS)]
	pub api_timeout_secs: u64,

	/// Consecutive watch failures before connectivity is reported as lost
	#[arg(long, env = "NSCLASS_WATCH_FAILURE_THRESHOLD", default_value_t = DEFAULT_WATCH_FAILURE_THRESHOLD)]
	pub watch_failure_threshold: u32,

	/// Namespaces reconciled at the same time
	#[arg(long, env = "NSCLASS_MAX_CONCURRENT_RECONCILES", default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILES)]
	pub max_concurrent_reconciles: usize,
}

/// Settings the controller needs once the process is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
	pub api_timeout: Duration,
	pub watch_failure_threshold: u32,
	pub max_concurrent_reconciles: usize,
}

impl Default for ControllerConfig {
	fn default() -> Self {
		Self {
			api_timeout: Duration::from_secs(DEFAULT_API_TIMEOUT_SECS),
			watch_failure_threshold: DEFAULT_WATCH_FAILURE_THRESHOLD,
			max_concurrent_reconciles: DEFAULT_MAX_CONCURRENT_RECONCILES,
		}
	}
}

impl From<&ControllerArgs> for ControllerConfig {
	fn from(args: &ControllerArgs) -> Self {
		Self {
			// A zero deadline would fail every call.
			api_timeout: Duration::from_secs(args.api_timeout_secs.max(1)),
			watch_failure_threshold: args.watch_failure_threshold.max(1),
			max_concurrent_reconciles: args.max_concurrent_reconciles.max(1),
		}
	}
}
