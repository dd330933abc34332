//! Upstream connection pool (spec §4.H point 3): reuse connections to
//! `(host, port, scheme)`, capping per-key concurrency. No pooling crate
//! appears anywhere in the retrieved corpus and the need here — cap
//! concurrency, keep a few idle h1 connections per key — is small enough to
//! hand-roll in the teacher's own style (cf. `agent-proxy`'s
//! `HBONEConnector` connection-reuse pattern).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use syrah_core::model::request::Scheme;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_rustls::client::TlsStream;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
	pub host: String,
	pub port: u16,
	pub scheme: Scheme,
}

pub enum PooledConn {
	Plain(TcpStream),
	Tls(Box<TlsStream<TcpStream>>),
}

/// Holds the concurrency permit alongside an idle connection so returning
/// one to the pool and releasing its slot happen together.
struct IdleEntry {
	conn: PooledConn,
}

pub struct UpstreamPool {
	max_per_key: usize,
	semaphores: DashMap<PoolKey, Arc<Semaphore>>,
	idle: DashMap<PoolKey, Mutex<Vec<IdleEntry>>>,
}

impl UpstreamPool {
	pub fn new(max_per_key: usize) -> Self {
		UpstreamPool {
			max_per_key: max_per_key.max(1),
			semaphores: DashMap::new(),
			idle: DashMap::new(),
		}
	}

	fn semaphore_for(&self, key: &PoolKey) -> Arc<Semaphore> {
		self
			.semaphores
			.entry(key.clone())
			.or_insert_with(|| Arc::new(Semaphore::new(self.max_per_key)))
			.clone()
	}

	/// Blocks until a concurrency slot for `key` is free. Dropping the
	/// returned permit releases the slot, even if the caller never checks
	/// an idle connection back in.
	pub async fn acquire_permit(&self, key: &PoolKey) -> OwnedSemaphorePermit {
		self
			.semaphore_for(key)
			.acquire_owned()
			.await
			.expect("pool semaphore is never closed")
	}

	/// Takes an idle connection for `key`, if one is stashed.
	pub async fn take_idle(&self, key: &PoolKey) -> Option<PooledConn> {
		let bucket = self.idle.get(key)?;
		let mut entries = bucket.lock().await;
		entries.pop().map(|e| e.conn)
	}

	/// Stashes a still-usable connection for reuse by the next request to
	/// the same `(host, port, scheme)`.
	pub async fn put_idle(&self, key: &PoolKey, conn: PooledConn) {
		let bucket = self.idle.entry(key.clone()).or_insert_with(|| Mutex::new(Vec::new()));
		let mut entries = bucket.lock().await;
		if entries.len() < self.max_per_key {
			entries.push(IdleEntry { conn });
		}
	}

	/// Drops every stashed idle connection for `key` without touching
	/// in-flight permits (used when a `MapRemote` rule changes the
	/// authority a host maps to, so stale pooled sockets aren't reused
	/// against the new target).
	pub async fn evict(&self, key: &PoolKey) {
		if let Some(bucket) = self.idle.get(key) {
			bucket.lock().await.clear();
		}
	}

	pub fn idle_key_count(&self) -> usize {
		self.idle.len()
	}
}

/// Snapshot of which `(host, port, scheme)` triples currently have idle or
/// in-flight connections, used by the HAR/status surfaces.
pub fn keys_overview(pool: &UpstreamPool) -> HashMap<PoolKey, usize> {
	pool.semaphores.iter().map(|kv| (kv.key().clone(), pool.max_per_key - kv.value().available_permits())).collect()
}
