//! NamespaceClass watcher.
//!
//! The kube watcher reports objects as applied or deleted, with re-list
//! markers around each full listing. [`ClassTracker`] turns that back into
//! add/modify/delete by remembering the last revision seen for each class.

use std::collections::{HashMap, HashSet};

use kube::{api::DynamicObject, runtime::watcher::Event, ResourceExt};

use super::WatchDriver;
use crate::{
	engine::Reconciler,
	queue::{TargetAction, TargetHandler, TargetQueue},
};

pub const STREAM: &str = "namespaceclasses";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Revision {
	Generation(i64),
	ResourceVersion(String),
}

impl Revision {
	fn of(class: &DynamicObject) -> Option<Self> {
		class
			.metadata
			.generation
			.map(Revision::Generation)
			.or_else(|| {
				class
					.metadata
					.resource_version
					.clone()
					.map(Revision::ResourceVersion)
			})
	}
}

/// A change to a class, as seen by this controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassChange {
	Added(String),
	Modified(String),
	Deleted(String),
}

#[derive(Debug, Default)]
pub struct ClassTracker {
	seen: HashMap<String, Option<Revision>>,
	/// Names listed so far during a re-list.
	relisted: Option<HashSet<String>>,
}

impl ClassTracker {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_tracking(&self, class: &str) -> bool {
		self.seen.contains_key(class)
	}

	/// Feed one watch event, returning the changes it implies.
	pub fn observe(&mut self, event: &Event<DynamicObject>) -> Vec<ClassChange> {
		match event {
			Event::Init => {
				self.relisted = Some(HashSet::new());
				Vec::new()
			}
			Event::InitApply(class) => {
				if let Some(relisted) = &mut self.relisted {
					relisted.insert(class.name_any());
				}
				self.applied(class).into_iter().collect()
			}
			Event::InitDone => {
				let Some(relisted) = self.relisted.take() else {
					return Vec::new();
				};
				let mut gone: Vec<String> = self
					.seen
					.keys()
					.filter(|name| !relisted.contains(*name))
					.cloned()
					.collect();
				gone.sort();
				for name in &gone {
					self.seen.remove(name);
				}
				gone.into_iter().map(ClassChange::Deleted).collect()
			}
			Event::Apply(class) => self.applied(class).into_iter().collect(),
			Event::Delete(class) => {
				let name = class.name_any();
				self.seen.remove(&name);
				vec![ClassChange::Deleted(name)]
			}
		}
	}

	fn applied(&mut self, class: &DynamicObject) -> Option<ClassChange> {
		let name = class.name_any();
		let revision = Revision::of(class);
		match self.seen.insert(name.clone(), revision.clone()) {
			None => Some(ClassChange::Added(name)),
			Some(previous) if previous.is_some() && previous == revision => None,
			Some(_) => Some(ClassChange::Modified(name)),
		}
	}
}

/// Queue the work a class change implies for the namespaces bound to it.
pub async fn dispatch<H: TargetHandler>(
	change: ClassChange,
	reconciler: &Reconciler,
	queue: &TargetQueue<H>,
) {
	let (class, action) = match change {
		ClassChange::Added(class) => {
			tracing::debug!(class = %class, "class added");
			return;
		}
		ClassChange::Modified(class) => {
			tracing::info!(class = %class, "class modified, reconciling bound namespaces");
			(class, TargetAction::Reconcile)
		}
		ClassChange::Deleted(class) => {
			tracing::info!(class = %class, "class deleted, cleaning up bound namespaces");
			let owner = class.clone();
			(class, TargetAction::Cleanup { owner })
		}
	};

	let namespaces = match reconciler.bound_namespaces(&class).await {
		Ok(namespaces) => namespaces,
		Err(e) => {
			tracing::error!(class = %class, error = %e, "failed to list bound namespaces");
			return;
		}
	};

	tracing::debug!(class = %class, count = namespaces.len(), "queueing bound namespaces");
	for namespace in namespaces {
		queue.submit(&namespace, action.clone());
	}
}

/// Consume class events until the stream ends.
pub async fn run<H, E>(
	mut driver: WatchDriver<DynamicObject, E>,
	reconciler: Reconciler,
	queue: TargetQueue<H>,
) where
	H: TargetHandler,
	E: std::fmt::Display,
{
	tracing::info!("watching NamespaceClasses");
	let mut tracker = ClassTracker::new();
	while let Some(event) = driver.next().await {
		for change in tracker.observe(&event) {
			dispatch(change, &reconciler, &queue).await;
		}
	}
	tracing::warn!("NamespaceClass watch stream ended");
}
