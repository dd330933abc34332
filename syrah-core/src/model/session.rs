use std::collections::BTreeMap;
use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::flow::Flow;
use super::rule::Rule;
use crate::filter::FilterState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	Stopped,
	Starting,
	Running,
	Pausing,
	Paused,
	Stopping,
	Error,
}

impl SessionState {
	/// The spec's lifecycle is a straight-line machine with one escape hatch:
	/// `Error` is reachable from any state.
	pub fn can_transition_to(&self, next: SessionState) -> bool {
		use SessionState::*;
		if next == Error {
			return true;
		}
		matches!(
			(self, next),
			(Stopped, Starting)
				| (Starting, Running)
				| (Running, Pausing)
				| (Pausing, Paused)
				| (Paused, Running)
				| (Running, Stopping)
				| (Paused, Stopping)
				| (Stopping, Stopped)
				| (Error, Stopped)
		)
	}
}

/// Bounded ring of flows: `max_flows == 0` means unbounded. Eviction drops
/// the oldest flow by sequence number once the cap is exceeded (invariant:
/// `flows.len() <= max_flows` whenever `max_flows > 0`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowRing {
	flows: VecDeque<Flow>,
	max_flows: usize,
}

impl FlowRing {
	pub fn new(max_flows: usize) -> FlowRing {
		FlowRing {
			flows: VecDeque::new(),
			max_flows,
		}
	}

	/// Inserts a flow, evicting the oldest (by sequence number, which is
	/// also insertion order since it's monotonic) if over capacity. Returns
	/// the evicted flow's id, if any.
	pub fn push(&mut self, flow: Flow) -> Option<Uuid> {
		self.flows.push_back(flow);
		if self.max_flows > 0 && self.flows.len() > self.max_flows {
			return self.flows.pop_front().map(|f| f.id);
		}
		None
	}

	pub fn get(&self, id: Uuid) -> Option<&Flow> {
		self.flows.iter().find(|f| f.id == id)
	}

	pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Flow> {
		self.flows.iter_mut().find(|f| f.id == id)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Flow> {
		self.flows.iter()
	}

	pub fn len(&self) -> usize {
		self.flows.len()
	}

	pub fn is_empty(&self) -> bool {
		self.flows.is_empty()
	}

	pub fn clear(&mut self) {
		self.flows.clear();
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
	pub id: Uuid,
	pub name: String,
	pub state: SessionState,
	pub flows: FlowRing,
	pub rules: Vec<Rule>,
	pub filter_state: FilterState,
	pub max_flows: usize,
	pub started_at_ns: Option<u128>,
	pub stopped_at_ns: Option<u128>,
	pub metadata: BTreeMap<String, String>,
	next_sequence: u64,
}

impl Session {
	pub fn new(id: Uuid, name: impl Into<String>, max_flows: usize) -> Session {
		Session {
			id,
			name: name.into(),
			state: SessionState::Stopped,
			flows: FlowRing::new(max_flows),
			rules: Vec::new(),
			filter_state: FilterState::default(),
			max_flows,
			started_at_ns: None,
			stopped_at_ns: None,
			metadata: BTreeMap::new(),
			next_sequence: 1,
		}
	}

	/// Invariant (v): monotonic sequence number under a single writer.
	/// Callers must serialize calls to this through the one pipeline
	/// dispatcher that owns flow creation.
	pub fn next_sequence_number(&mut self) -> u64 {
		let seq = self.next_sequence;
		self.next_sequence += 1;
		seq
	}

	pub fn transition(&mut self, next: SessionState) -> bool {
		if self.state.can_transition_to(next) {
			self.state = next;
			true
		} else {
			false
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ring_evicts_oldest_past_cap() {
		let mut ring = FlowRing::new(2);
		let mut session = Session::new(Uuid::nil(), "s", 2);
		let make = |seq: u64| {
			Flow::new(
				Uuid::new_v4(),
				session.id,
				seq,
				crate::model::request::Request {
					id: Uuid::nil(),
					method: crate::model::request::Method::Get,
					scheme: crate::model::request::Scheme::Http,
					host: "h".into(),
					port: 80,
					path: "/".into(),
					query_string: "".into(),
					query_params: Default::default(),
					headers: crate::model::OrderedHeaders::new(),
					body_bytes: bytes::Bytes::new(),
					content_type: crate::model::request::ContentType::Other,
					content_length: None,
					http_version: "HTTP/1.1".into(),
					timestamp_ns: seq as u128,
					is_secure: false,
					cookies: Vec::new(),
				},
				crate::model::flow::Protocol::Http,
				Uuid::nil(),
				seq as u128,
			)
		};
		let f1 = make(session.next_sequence_number());
		let f1_id = f1.id;
		assert!(ring.push(f1).is_none());
		let f2 = make(session.next_sequence_number());
		assert!(ring.push(f2).is_none());
		let f3 = make(session.next_sequence_number());
		let evicted = ring.push(f3);
		assert_eq!(evicted, Some(f1_id));
		assert_eq!(ring.len(), 2);
	}

	#[test]
	fn state_machine_error_reachable_from_anywhere() {
		let mut session = Session::new(Uuid::nil(), "s", 0);
		session.transition(SessionState::Starting);
		assert!(session.transition(SessionState::Error));
		assert!(session.transition(SessionState::Stopped));
	}

	#[test]
	fn state_machine_rejects_invalid_transition() {
		let mut session = Session::new(Uuid::nil(), "s", 0);
		assert!(!session.transition(SessionState::Paused));
		assert_eq!(session.state, SessionState::Stopped);
	}
}
