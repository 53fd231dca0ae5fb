use anyhow::{Context, Result};
use clap::Parser;
use nsclass::{
	config::{ControllerArgs, ControllerConfig},
	controller::Controller,
	k8s::client::ClusterConnection,
	telemetry,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "nsclass-controller")]
#[command(about = "Materializes NamespaceClass resources into labeled namespaces", long_about = None)]
#[command(version)]
struct Cli {
	#[command(flatten)]
	args: ControllerArgs,
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};

		let mut sigterm = match signal(SignalKind::terminate()) {
			Ok(s) => s,
			Err(e) => {
				tracing::error!(error = %e, "failed to install SIGTERM handler");
				return;
			}
		};

		tokio::select! {
			_ = sigterm.recv() => tracing::info!("received SIGTERM"),
			result = tokio::signal::ctrl_c() => match result {
				Ok(()) => tracing::info!("received SIGINT"),
				Err(e) => {
					tracing::error!(error = %e, "failed to listen for SIGINT");
					return;
				}
			},
		}
	}

	#[cfg(not(unix))]
	{
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "failed to listen for Ctrl+C");
			return;
		}
		tracing::info!("received Ctrl+C");
	}

	shutdown.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	let _telemetry = telemetry::init(cli.args.log_level)?;

	let connection = ClusterConnection::infer(cli.args.context.as_deref())
		.await
		.context("connecting to the cluster")?;

	let config = ControllerConfig::from(&cli.args);
	tracing::debug!(?config, "starting controller");
	let controller = Controller::new(&connection, config).await?;

	let shutdown = CancellationToken::new();
	tokio::spawn(shutdown_on_signal(shutdown.clone()));

	controller.run(shutdown).await?;
	Ok(())
}
