//! Cancellation primitive (spec §5), modeled on the teacher's
//! `agent-core`/`core::drain` trigger/watcher pair over `tokio::sync::watch`
//! rather than `tokio_util::sync::CancellationToken`, which doesn't by
//! itself block a caller until outstanding holders finish. Simplified here
//! to a boolean "session is stopping" signal — the teacher's `DrainMode`
//! (immediate vs graceful) and its hyper `GracefulConnection` wrapping don't
//! apply, since this proxy drives raw `TcpStream`/`tokio_rustls` sockets
//! directly rather than a hyper server.

use tokio::sync::watch;

pub fn new() -> (DrainTrigger, DrainWatcher) {
	let (tx, rx) = watch::channel(false);
	(DrainTrigger(tx), DrainWatcher(rx))
}

pub struct DrainTrigger(watch::Sender<bool>);

impl DrainTrigger {
	/// Signals every outstanding watcher. Idempotent.
	pub fn signal(&self) {
		let _ = self.0.send(true);
	}

	/// Resolves once every clone of the paired `DrainWatcher` has been
	/// dropped, i.e. every connection task has observed the signal and
	/// exited.
	pub async fn closed(&self) {
		self.0.closed().await;
	}
}

#[derive(Clone)]
pub struct DrainWatcher(watch::Receiver<bool>);

impl DrainWatcher {
	/// Resolves once the session starts stopping. Cancellation-safe:
	/// callers `tokio::select!` this alongside a socket read/write.
	pub async fn signaled(&mut self) {
		let _ = self.0.wait_for(|stopping| *stopping).await;
	}

	pub fn is_signaled(&self) -> bool {
		*self.0.borrow()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn watcher_observes_trigger() {
		let (trigger, mut watcher) = new();
		assert!(!watcher.is_signaled());
		trigger.signal();
		watcher.signaled().await;
		assert!(watcher.is_signaled());
	}

	#[tokio::test]
	async fn trigger_closed_waits_for_watcher_drop() {
		let (trigger, watcher) = new();
		trigger.signal();
		drop(watcher);
		trigger.closed().await;
	}
}
