//! Per-namespace work queue.
//!
//! Both watchers funnel their work through a [`TargetQueue`], which runs at
//! most one worker per namespace. Actions submitted for a namespace that is
//! already being worked on wait their turn, so a class change and a relabel
//! of the same namespace never interleave their deletes and creates.
//! Different namespaces are processed concurrently, up to a fixed number of
//! actions in flight at once.

use std::{
	collections::{HashMap, VecDeque},
	future::Future,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Work to be done on a single namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAction {
	/// Converge the namespace to whatever its label currently selects.
	Reconcile,
	/// Remove objects owned by a class that was deleted.
	Cleanup { owner: String },
}

/// Executes queued actions.
pub trait TargetHandler: Send + Sync + 'static {
	fn handle(&self, target: &str, action: TargetAction) -> impl Future<Output = ()> + Send;
}

type Pending = HashMap<String, VecDeque<TargetAction>>;

/// Serializes work per target while running distinct targets in parallel.
///
/// A target has an entry in the pending map exactly while a worker owns it.
/// Workers hold a permit only while an action runs, so a worker waiting for
/// a permit keeps collecting actions for its target.
pub struct TargetQueue<H> {
	handler: Arc<H>,
	pending: Arc<Mutex<Pending>>,
	permits: Arc<Semaphore>,
	shutdown: CancellationToken,
}

impl<H> Clone for TargetQueue<H> {
	fn clone(&self) -> Self {
		Self {
			handler: self.handler.clone(),
			pending: self.pending.clone(),
			permits: self.permits.clone(),
			shutdown: self.shutdown.clone(),
		}
	}
}

impl<H: TargetHandler> TargetQueue<H> {
	/// `max_concurrent` bounds the actions running at once across all targets.
	pub fn new(handler: Arc<H>, shutdown: CancellationToken, max_concurrent: usize) -> Self {
		Self {
			handler,
			pending: Arc::default(),
			permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
			shutdown,
		}
	}

	fn lock(&self) -> MutexGuard<'_, Pending> {
		self.pending.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Queue `action` for `target`.
	///
	/// Returns false when the action was dropped, either because the same
	/// action is already the last one waiting for this target or because the
	/// queue is shutting down.
	pub fn submit(&self, target: &str, action: TargetAction) -> bool {
		if self.shutdown.is_cancelled() {
			return false;
		}

		let mut pending = self.lock();
		if let Some(queued) = pending.get_mut(target) {
			if queued.back() == Some(&action) {
				tracing::trace!(namespace = %target, ?action, "coalesced with pending action");
				return false;
			}
			queued.push_back(action);
			return true;
		}

		pending.insert(target.to_string(), VecDeque::from([action]));
		drop(pending);
		self.spawn_worker(target.to_string());
		true
	}

	/// Whether no target currently has a worker.
	pub fn is_idle(&self) -> bool {
		self.lock().is_empty()
	}

	fn spawn_worker(&self, target: String) {
		let queue = self.clone();
		tokio::spawn(async move {
			tokio::select! {
				biased;
				() = queue.shutdown.cancelled() => {
					tracing::debug!(namespace = %target, "worker stopped by shutdown");
				}
				() = queue.drain(&target) => {}
			}
		});
	}

	async fn drain(&self, target: &str) {
		loop {
			// The semaphore is never closed.
			let permit = self.permits.acquire().await.ok();
			let Some(action) = self.next_action(target) else {
				return;
			};
			self.handler.handle(target, action).await;
			drop(permit);
		}
	}

	/// Pop the next action, releasing the target when nothing is left.
	fn next_action(&self, target: &str) -> Option<TargetAction> {
		let mut pending = self.lock();
		let queued = pending.get_mut(target)?;
		let action = queued.pop_front();
		if action.is_none() {
			pending.remove(target);
		}
		action
	}
}
