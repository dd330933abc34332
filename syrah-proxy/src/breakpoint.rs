//! Breakpoint coordinator (spec §4.J): a single-shot-notifier registry keyed
//! by flow id, in the same "drain"-style trigger/watcher shape used
//! throughout the teacher corpus (`agent-core`/`core::drain`), narrowed here
//! to a single resume decision instead of a multi-watcher graceful drain.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use syrah_core::model::rule::RulePhase;

/// A controller-supplied edit to a paused flow. Which fields apply depends
/// on which phase the breakpoint fired in (request fields for `Request`,
/// response fields for `Response`); the pipeline ignores fields that don't
/// apply to the phase it paused at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Patch {
	pub method: Option<String>,
	pub url: Option<String>,
	pub status: Option<u16>,
	#[serde(default)]
	pub set_headers: Vec<(String, String)>,
	#[serde(default)]
	pub remove_headers: Vec<String>,
	pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum ResumeDecision {
	Abort,
	ResumeUnmodified,
	ResumeModified { patch: Patch },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakpointHit {
	pub flow_id: Uuid,
	pub phase: RulePhase,
}

#[derive(Default)]
pub struct BreakpointCoordinator {
	pending: DashMap<Uuid, oneshot::Sender<ResumeDecision>>,
}

impl BreakpointCoordinator {
	pub fn new() -> Self {
		BreakpointCoordinator::default()
	}

	/// Registers `flow_id` as paused and returns the receiver half the
	/// pipeline task awaits. Replaces any stale registration for the same
	/// id (shouldn't happen — a flow pauses at most once per phase — but
	/// avoids a lingering sender if it does).
	pub fn register(&self, flow_id: Uuid) -> oneshot::Receiver<ResumeDecision> {
		let (tx, rx) = oneshot::channel();
		self.pending.insert(flow_id, tx);
		rx
	}

	/// Delivers a resume decision for `flow_id`. Returns `false` if no flow
	/// was waiting (already resumed, aborted, or never paused).
	pub fn resume(&self, flow_id: Uuid, decision: ResumeDecision) -> bool {
		match self.pending.remove(&flow_id) {
			Some((_, tx)) => tx.send(decision).is_ok(),
			None => false,
		}
	}

	/// Aborts every paused flow. Dropping each sender resolves the paired
	/// receiver with `RecvError`, which the pipeline treats as `{abort}` —
	/// matching "cancelling or closing the controlling connection is
	/// equivalent to `{abort}`" (§4.J).
	pub fn abort_all(&self) {
		self.pending.clear();
	}

	pub fn is_paused(&self, flow_id: Uuid) -> bool {
		self.pending.contains_key(&flow_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn resume_delivers_decision() {
		let coordinator = BreakpointCoordinator::new();
		let flow_id = Uuid::new_v4();
		let rx = coordinator.register(flow_id);
		assert!(coordinator.resume(flow_id, ResumeDecision::ResumeUnmodified));
		let decision = rx.await.unwrap();
		assert!(matches!(decision, ResumeDecision::ResumeUnmodified));
	}

	#[tokio::test]
	async fn dropping_sender_surfaces_as_recv_error() {
		let coordinator = BreakpointCoordinator::new();
		let flow_id = Uuid::new_v4();
		let rx = coordinator.register(flow_id);
		coordinator.abort_all();
		assert!(rx.await.is_err());
	}

	#[test]
	fn resume_on_unknown_flow_is_false() {
		let coordinator = BreakpointCoordinator::new();
		assert!(!coordinator.resume(Uuid::new_v4(), ResumeDecision::Abort));
	}
}
