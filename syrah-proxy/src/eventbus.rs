//! Event bus (spec §4.K): two topics, `flows` and `status`. Grounded on the
//! teacher's `store::binds::Store`, which pairs a `HashMap` of live state
//! with a `tokio::sync::broadcast::Sender` subscribers drain via
//! `BroadcastStream`. `status` additionally rides a `tokio::sync::watch`
//! channel since "slow subscribers get coalesced updates, latest value
//! wins" is exactly `watch`'s native semantics, whereas `flows` needs the
//! full per-event history a `broadcast` channel provides (minus whatever a
//! lagging subscriber misses, which is counted rather than hidden).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use syrah_core::Flow;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;

const FLOWS_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum FlowEvent {
	Created { flow: Flow },
	Updated { flow: Flow },
	Finalized { flow: Flow },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
	pub is_running: bool,
	pub port: u16,
	pub address: String,
	pub active_connections: u64,
	pub bytes_rx: u64,
	pub bytes_tx: u64,
	pub ssl_interception_enabled: bool,
	pub error: Option<String>,
}

impl Default for StatusEvent {
	fn default() -> Self {
		StatusEvent {
			is_running: false,
			port: 0,
			address: String::new(),
			active_connections: 0,
			bytes_rx: 0,
			bytes_tx: 0,
			ssl_interception_enabled: false,
			error: None,
		}
	}
}

pub struct EventBus {
	flows_tx: broadcast::Sender<FlowEvent>,
	flows_dropped: AtomicU64,
	status_tx: watch::Sender<StatusEvent>,
}

impl EventBus {
	pub fn new() -> Self {
		let (flows_tx, _) = broadcast::channel(FLOWS_CHANNEL_CAPACITY);
		let (status_tx, _) = watch::channel(StatusEvent::default());
		EventBus {
			flows_tx,
			flows_dropped: AtomicU64::new(0),
			status_tx,
		}
	}

	/// Publishing never blocks: a `broadcast::Sender::send` only fails when
	/// there are no subscribers, which is fine — nobody's listening yet.
	pub fn publish_flow(&self, event: FlowEvent) {
		let _ = self.flows_tx.send(event);
	}

	pub fn publish_status(&self, event: StatusEvent) {
		let _ = self.status_tx.send(event);
	}

	pub fn subscribe_flows(&self) -> BroadcastStream<FlowEvent> {
		BroadcastStream::new(self.flows_tx.subscribe())
	}

	pub fn subscribe_status(&self) -> watch::Receiver<StatusEvent> {
		self.status_tx.subscribe()
	}

	pub fn latest_status(&self) -> StatusEvent {
		self.status_tx.borrow().clone()
	}

	/// Callers that drain `subscribe_flows()` themselves should call this
	/// whenever the underlying stream yields `Err(BroadcastStreamRecvError::Lagged(n))`,
	/// so the aggregate drop count surfaced in `get_status` stays accurate.
	pub fn record_lagged(&self, n: u64) {
		self.flows_dropped.fetch_add(n, Ordering::Relaxed);
	}

	pub fn dropped_count(&self) -> u64 {
		self.flows_dropped.load(Ordering::Relaxed)
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use syrah_core::model::request::{ContentType, Method, Scheme};
	use syrah_core::model::{OrderedHeaders, Request};
	use uuid::Uuid;

	fn sample_flow() -> Flow {
		let req = Request {
			id: Uuid::nil(),
			method: Method::Get,
			scheme: Scheme::Http,
			host: "example.com".into(),
			port: 80,
			path: "/".into(),
			query_string: String::new(),
			query_params: Default::default(),
			headers: OrderedHeaders::new(),
			body_bytes: bytes::Bytes::new(),
			content_type: ContentType::Other,
			content_length: None,
			http_version: "HTTP/1.1".into(),
			timestamp_ns: 0,
			is_secure: false,
			cookies: Vec::new(),
		};
		Flow::new(Uuid::new_v4(), Uuid::nil(), 1, req, syrah_core::model::flow::Protocol::Http, Uuid::nil(), 0)
	}

	#[tokio::test]
	async fn flows_topic_delivers_to_subscriber() {
		let bus = EventBus::new();
		let mut rx = bus.subscribe_flows();
		bus.publish_flow(FlowEvent::Created { flow: sample_flow() });
		let event = futures_util::StreamExt::next(&mut rx).await.unwrap().unwrap();
		matches!(event, FlowEvent::Created { .. });
	}

	#[tokio::test]
	async fn status_topic_coalesces_to_latest() {
		let bus = EventBus::new();
		let mut rx = bus.subscribe_status();
		bus.publish_status(StatusEvent {
			is_running: true,
			..Default::default()
		});
		rx.changed().await.unwrap();
		assert!(rx.borrow().is_running);
	}
}
