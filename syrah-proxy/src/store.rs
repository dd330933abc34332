//! Flow store (spec §5 "shared state policy"): the session's flow list has
//! exactly one writer (the pipeline dispatcher) and many readers (the event
//! bus serializer, the admin surface, the filter evaluator). The rule list
//! is copy-on-write behind an `arc_swap::ArcSwap` so a `set_rules` command
//! swaps the pointer atomically — every in-flight flow's read of the rule
//! set during its own evaluation sees either wholly the old list or wholly
//! the new one, never a mix.

use std::sync::Mutex;

use arc_swap::ArcSwap;
use syrah_core::filter::FilterState;
use syrah_core::model::{Rule, SessionState};
use syrah_core::{Flow, Session};
use uuid::Uuid;

pub struct FlowStore {
	session: Mutex<Session>,
	rules: ArcSwap<Vec<Rule>>,
}

impl FlowStore {
	pub fn new(mut session: Session) -> Self {
		Rule::sort_by_priority(&mut session.rules);
		let rules = ArcSwap::from_pointee(session.rules.clone());
		FlowStore {
			session: Mutex::new(session),
			rules,
		}
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
		self.session.lock().expect("flow store session mutex")
	}

	/// The rule list in effect right now. Cheap: an `Arc` clone.
	pub fn rules(&self) -> std::sync::Arc<Vec<Rule>> {
		self.rules.load_full()
	}

	/// Atomically replaces the rule list (§6 `set_rules`).
	pub fn set_rules(&self, mut new_rules: Vec<Rule>) {
		Rule::sort_by_priority(&mut new_rules);
		self.rules.store(std::sync::Arc::new(new_rules.clone()));
		self.lock().rules = new_rules;
	}

	pub fn session_id(&self) -> Uuid {
		self.lock().id
	}

	pub fn next_sequence_number(&self) -> u64 {
		self.lock().next_sequence_number()
	}

	pub fn max_flows(&self) -> usize {
		self.lock().max_flows
	}

	pub fn transition(&self, next: SessionState) -> bool {
		self.lock().transition(next)
	}

	pub fn state(&self) -> SessionState {
		self.lock().state
	}

	/// Inserts a newly-created flow, evicting the oldest by sequence number
	/// if the ring is past capacity. Returns the evicted flow id, if any.
	pub fn insert_flow(&self, flow: Flow) -> Option<Uuid> {
		self.lock().flows.push(flow)
	}

	/// Replaces a flow in place by id. A no-op if the flow has since been
	/// evicted (the caller published whatever it had before the eviction
	/// raced it; that's fine, the event bus already saw the last snapshot).
	pub fn update_flow(&self, flow: Flow) {
		let mut session = self.lock();
		if let Some(slot) = session.flows.get_mut(flow.id) {
			*slot = flow;
		}
	}

	pub fn get_flow(&self, id: Uuid) -> Option<Flow> {
		self.lock().flows.get(id).cloned()
	}

	pub fn all_flows(&self) -> Vec<Flow> {
		self.lock().flows.iter().cloned().collect()
	}

	pub fn matching_flows(&self, filter: &FilterState) -> Vec<Flow> {
		self.lock().flows.iter().filter(|f| filter.matches(f)).cloned().collect()
	}

	pub fn clear(&self) {
		self.lock().flows.clear();
	}

	pub fn flow_count(&self) -> usize {
		self.lock().flows.len()
	}

	/// Aborts every flow that hasn't reached a terminal state, used when the
	/// session is stopped (§5 "Cancellation").
	pub fn abort_in_flight(&self, now_ns: u128) {
		let mut session = self.lock();
		let ids: Vec<Uuid> = session.flows.iter().filter(|f| !f.state.is_terminal()).map(|f| f.id).collect();
		for id in ids {
			if let Some(flow) = session.flows.get_mut(id) {
				flow.state = syrah_core::model::flow::FlowState::Aborted;
				flow.updated_at_ns = now_ns;
			}
		}
	}

	pub fn snapshot_session(&self) -> Session {
		self.lock().clone()
	}
}
