//! Namespace watcher: every added or changed namespace gets reconciled.

use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::watcher::Event;

use super::WatchDriver;
use crate::queue::{TargetAction, TargetHandler, TargetQueue};

pub const STREAM: &str = "namespaces";

/// The namespace an event asks to reconcile.
///
/// Deletions need no work: managed objects are namespaced and go away with
/// their namespace.
pub fn target_for(event: &Event<Namespace>) -> Option<&str> {
	match event {
		Event::Apply(ns) | Event::InitApply(ns) => ns.metadata.name.as_deref(),
		Event::Delete(_) | Event::Init | Event::InitDone => None,
	}
}

/// Consume namespace events until the stream ends.
pub async fn run<H, E>(mut driver: WatchDriver<Namespace, E>, queue: TargetQueue<H>)
where
	H: TargetHandler,
	E: std::fmt::Display,
{
	tracing::info!("watching namespaces");
	while let Some(event) = driver.next().await {
		match &event {
			Event::Init => tracing::debug!("namespace list started"),
			Event::InitDone => tracing::debug!("namespace list complete"),
			_ => {}
		}
		if let Some(name) = target_for(&event) {
			queue.submit(name, TargetAction::Reconcile);
		}
	}
	tracing::warn!("namespace watch stream ended");
}
