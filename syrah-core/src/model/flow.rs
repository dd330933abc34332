use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::request::Request;
use super::response::Response;
use crate::strng::Strng;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
	Pending,
	Waiting,
	Receiving,
	Completed,
	Failed,
	Aborted,
	Paused,
	Modifying,
}

impl FlowState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, FlowState::Completed | FlowState::Failed | FlowState::Aborted)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
	Http,
	Https,
	WebSocket,
	WebSocketSecure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WsDirection {
	ClientToServer,
	ServerToClient,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsMessage {
	pub direction: WsDirection,
	pub is_text: bool,
	#[serde(with = "crate::model::bytes_b64")]
	pub payload: bytes::Bytes,
	pub timestamp_ns: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowError {
	pub kind: crate::error::ErrorKind,
	pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
	pub id: Uuid,
	pub session_id: Uuid,
	pub sequence_number: u64,
	pub request: Request,
	pub response: Option<Response>,
	pub state: FlowState,
	pub protocol: Protocol,
	pub ws_messages: Vec<WsMessage>,
	pub error: Option<FlowError>,
	pub tags: Vec<String>,
	pub is_marked: bool,
	pub applied_rules: Vec<Strng>,
	pub original_request: Option<Request>,
	pub original_response: Option<Response>,
	pub connection_id: Uuid,
	pub created_at_ns: u128,
	pub updated_at_ns: u128,
}

impl Flow {
	pub fn new(
		id: Uuid,
		session_id: Uuid,
		sequence_number: u64,
		request: Request,
		protocol: Protocol,
		connection_id: Uuid,
		now_ns: u128,
	) -> Flow {
		Flow {
			id,
			session_id,
			sequence_number,
			request,
			response: None,
			state: FlowState::Waiting,
			protocol,
			ws_messages: Vec::new(),
			error: None,
			tags: Vec::new(),
			is_marked: false,
			applied_rules: Vec::new(),
			original_request: None,
			original_response: None,
			connection_id,
			created_at_ns: now_ns,
			updated_at_ns: now_ns,
		}
	}

	/// Returns a new flow with `response` attached and state advanced to
	/// `Completed`, stamping `updated_at`. Matches the spec's "constructor
	/// returns a new flow" phrasing for the builder surface exposed to
	/// callers; the pipeline itself mutates in place for the hot path.
	#[must_use]
	pub fn with_response(mut self, response: Response, now_ns: u128) -> Flow {
		self.response = Some(response);
		self.state = FlowState::Completed;
		self.updated_at_ns = now_ns;
		self
	}

	#[must_use]
	pub fn with_error(mut self, error: FlowError, now_ns: u128) -> Flow {
		self.error = Some(error);
		self.state = FlowState::Failed;
		self.updated_at_ns = now_ns;
		self
	}

	#[must_use]
	pub fn with_ws_message(mut self, message: WsMessage, now_ns: u128) -> Flow {
		self.ws_messages.push(message);
		self.updated_at_ns = now_ns;
		self
	}

	pub fn group_host(&self) -> &str {
		self.request.group_host()
	}

	pub fn group_path(&self) -> String {
		self.request.group_path()
	}

	/// Preserves the unmodified request/response the first time a rule
	/// mutates the flow, so `original_request`/`original_response` always
	/// reflect what actually crossed the wire before any rewrite.
	pub fn snapshot_original_request(&mut self) {
		if self.original_request.is_none() {
			self.original_request = Some(self.request.clone());
		}
	}

	pub fn snapshot_original_response(&mut self) {
		if self.original_response.is_none() {
			if let Some(resp) = &self.response {
				self.original_response = Some(resp.clone());
			}
		}
	}

	pub fn duration_ms(&self) -> Option<f64> {
		let resp = self.response.as_ref()?;
		let delta_ns = resp.timestamp_ns.saturating_sub(self.request.timestamp_ns);
		Some(delta_ns as f64 / 1_000_000.0)
	}

	pub fn formatted_duration(&self) -> String {
		match self.duration_ms() {
			Some(ms) if ms < 1000.0 => format!("{ms:.0} ms"),
			Some(ms) => format!("{:.2} s", ms / 1000.0),
			None => "-".to_string(),
		}
	}

	pub fn formatted_size(&self) -> String {
		self
			.response
			.as_ref()
			.map(|r| r.formatted_size())
			.unwrap_or_else(|| "-".to_string())
	}

	pub fn display_status(&self) -> String {
		match &self.response {
			Some(r) => format!("{} {}", r.status_code, r.status_message),
			None => format!("{:?}", self.state),
		}
	}

	/// Invariant (i)/(ii): Completed implies a response whose timestamp is
	/// at or after the request's.
	pub fn check_invariants(&self) -> bool {
		if self.state == FlowState::Completed {
			match &self.response {
				Some(r) => r.timestamp_ns >= self.request.timestamp_ns,
				None => false,
			}
		} else {
			true
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::request::{ContentType, Method, Scheme};
	use crate::model::{OrderedHeaders, Response};
	use std::collections::BTreeMap;

	fn base_request() -> Request {
		Request {
			id: Uuid::nil(),
			method: Method::Get,
			scheme: Scheme::Http,
			host: "example.com".into(),
			port: 80,
			path: "/".into(),
			query_string: "".into(),
			query_params: BTreeMap::new(),
			headers: OrderedHeaders::new(),
			body_bytes: bytes::Bytes::new(),
			content_type: ContentType::Other,
			content_length: None,
			http_version: "HTTP/1.1".into(),
			timestamp_ns: 100,
			is_secure: false,
			cookies: Vec::new(),
		}
	}

	#[test]
	fn completed_requires_response() {
		let flow = Flow::new(Uuid::nil(), Uuid::nil(), 1, base_request(), Protocol::Http, Uuid::nil(), 100);
		assert!(flow.check_invariants());
		let mut completed = flow.clone();
		completed.state = FlowState::Completed;
		assert!(!completed.check_invariants());
	}

	#[test]
	fn with_response_advances_state_and_timestamp() {
		let flow = Flow::new(Uuid::nil(), Uuid::nil(), 1, base_request(), Protocol::Http, Uuid::nil(), 100);
		let response = Response {
			status_code: 200,
			status_message: "OK".into(),
			headers: OrderedHeaders::new(),
			body_bytes: bytes::Bytes::new(),
			was_compressed: false,
			compression_encoding: None,
			timestamp_ns: 200,
		};
		let flow = flow.with_response(response, 200);
		assert_eq!(flow.state, FlowState::Completed);
		assert!(flow.check_invariants());
		assert_eq!(flow.updated_at_ns, 200);
	}

	#[test]
	fn original_request_snapshotted_once() {
		let mut flow = Flow::new(Uuid::nil(), Uuid::nil(), 1, base_request(), Protocol::Http, Uuid::nil(), 100);
		flow.snapshot_original_request();
		flow.request.path = "/mutated".into();
		flow.snapshot_original_request();
		assert_eq!(flow.original_request.unwrap().path, "/");
	}
}
