//! Watch streams for namespaces and NamespaceClasses.
//!
//! Each stream is consumed by its own task, one event at a time. Reconnects
//! are handled by the kube watcher with exponential backoff; [`StreamHealth`]
//! tracks the connection state and raises a single alarm when a stream keeps
//! failing.

use std::fmt::{self, Display};

use futures::{stream::BoxStream, StreamExt};
use kube::{
	runtime::{
		watcher::{self, Event},
		WatchStreamExt,
	},
	Api, Resource,
};
use serde::de::DeserializeOwned;

pub mod class;
pub mod namespace;

/// Connection state of a watch stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
	Disconnected,
	Connecting,
	Streaming,
}

impl Display for WatchState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			WatchState::Disconnected => "disconnected",
			WatchState::Connecting => "connecting",
			WatchState::Streaming => "streaming",
		};
		f.write_str(s)
	}
}

/// Tracks consecutive failures of one stream.
///
/// After `threshold` failures in a row the stream is considered lost and an
/// error is logged once. The next successful event logs the recovery.
#[derive(Debug)]
pub struct StreamHealth {
	stream: &'static str,
	threshold: u32,
	consecutive_failures: u32,
	state: WatchState,
	alarmed: bool,
}

impl StreamHealth {
	pub fn new(stream: &'static str, threshold: u32) -> Self {
		Self {
			stream,
			threshold: threshold.max(1),
			consecutive_failures: 0,
			state: WatchState::Disconnected,
			alarmed: false,
		}
	}

	pub fn state(&self) -> WatchState {
		self.state
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.consecutive_failures
	}

	pub fn is_alarmed(&self) -> bool {
		self.alarmed
	}

	pub fn connecting(&mut self) {
		tracing::debug!(stream = self.stream, from = %self.state, "watch stream connecting");
		self.state = WatchState::Connecting;
	}

	/// Record a successfully received event.
	pub fn observe(&mut self) {
		if self.state != WatchState::Streaming {
			tracing::debug!(stream = self.stream, from = %self.state, "watch stream established");
		}
		if self.alarmed {
			tracing::info!(
				stream = self.stream,
				failures = self.consecutive_failures,
				"watch connectivity restored"
			);
		}
		self.state = WatchState::Streaming;
		self.consecutive_failures = 0;
		self.alarmed = false;
	}

	/// Record a stream error. Returns true when this failure raised the alarm.
	pub fn record_failure(&mut self, error: &impl Display) -> bool {
		self.state = WatchState::Disconnected;
		self.consecutive_failures = self.consecutive_failures.saturating_add(1);
		tracing::warn!(
			stream = self.stream,
			failures = self.consecutive_failures,
			error = %error,
			"watch stream error, reconnecting"
		);

		if !self.alarmed && self.consecutive_failures >= self.threshold {
			self.alarmed = true;
			tracing::error!(
				stream = self.stream,
				failures = self.consecutive_failures,
				"watch connectivity lost"
			);
			return true;
		}
		false
	}
}

/// Pulls events off a watch stream, feeding errors into [`StreamHealth`].
pub struct WatchDriver<K, E = watcher::Error> {
	events: BoxStream<'static, Result<Event<K>, E>>,
	health: StreamHealth,
}

impl<K> WatchDriver<K>
where
	K: Resource + Clone + DeserializeOwned + fmt::Debug + Send + 'static,
{
	/// Watch every object of `api`, reconnecting with the default backoff.
	pub fn watch(api: Api<K>, stream: &'static str, failure_threshold: u32) -> Self {
		let events = watcher::watcher(api, watcher::Config::default())
			.default_backoff()
			.boxed();
		Self::from_stream(events, stream, failure_threshold)
	}
}

impl<K, E: Display> WatchDriver<K, E> {
	pub fn from_stream(
		events: BoxStream<'static, Result<Event<K>, E>>,
		stream: &'static str,
		failure_threshold: u32,
	) -> Self {
		let mut health = StreamHealth::new(stream, failure_threshold);
		health.connecting();
		Self { events, health }
	}

	pub fn health(&self) -> &StreamHealth {
		&self.health
	}

	/// Next event, or None once the stream has ended.
	pub async fn next(&mut self) -> Option<Event<K>> {
		loop {
			match self.events.next().await? {
				Ok(event) => {
					self.health.observe();
					return Some(event);
				}
				Err(e) => {
					self.health.record_failure(&e);
					// The backoff stream retries on the next poll.
					self.health.connecting();
				}
			}
		}
	}
}
