//! Proxy engine (spec §4.G root + §5 concurrency): owns the listener, spawns
//! one task per accepted connection, and drives session-wide start/stop
//! lifecycle plus the status heartbeat. Grounded on the teacher's
//! `proxy::gateway::Gateway`, which keeps one `accept` loop per bound address
//! racing `listener.accept()` against a drain signal and spawning a task per
//! connection — simplified here to a single bind (no thread-per-core
//! `SO_REUSEPORT` listeners) and raw `tokio_rustls`/`TcpStream` I/O instead of
//! the teacher's hyper `auto::Builder`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use syrah_core::ca::CertificateAuthority;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_rustls::TlsAcceptor;

use crate::breakpoint::BreakpointCoordinator;
use crate::config::ProxyConfig;
use crate::connection;
use crate::drain::{self, DrainTrigger, DrainWatcher};
use crate::error::{ProxyError, ProxyResult};
use crate::eventbus::{EventBus, StatusEvent};
use crate::pipeline::{self, PipelineShared};
use crate::pool::UpstreamPool;
use crate::store::FlowStore;
use crate::throttle::ThrottleSetting;
use crate::tls;

/// Coarse connection/byte counters fed into the `status` event topic.
#[derive(Default)]
pub struct Stats {
	pub active_connections: AtomicU64,
	pub bytes_rx: AtomicU64,
	pub bytes_tx: AtomicU64,
}

pub struct EngineShared {
	pub pipeline: PipelineShared,
	pub ca: Arc<CertificateAuthority>,
	pub mitm_acceptor: TlsAcceptor,
	pub stats: Arc<Stats>,
}

struct RunningState {
	trigger: DrainTrigger,
	addr: SocketAddr,
}

/// Top-level handle the root `syrah` binary's admin surface drives: one
/// `start`/`stop` pair per session, per spec §6's `start_proxy`/`stop_proxy`.
pub struct ProxyEngine {
	shared: Arc<EngineShared>,
	events: Arc<EventBus>,
	config: ProxyConfig,
	running: Mutex<Option<RunningState>>,
}

impl ProxyEngine {
	pub fn new(
		config: ProxyConfig,
		store: Arc<FlowStore>,
		events: Arc<EventBus>,
		breakpoints: Arc<BreakpointCoordinator>,
		ca: Arc<CertificateAuthority>,
	) -> Self {
		tls::install_crypto_provider();
		let pool = Arc::new(UpstreamPool::new(config.max_connections_per_upstream));
		let upstream_tls = tls::upstream_client_config();
		let mitm_acceptor = TlsAcceptor::from(tls::server_config(ca.clone()));
		let pipeline = PipelineShared {
			store,
			events: events.clone(),
			breakpoints,
			pool,
			throttle: ArcSwap::from_pointee(config.throttle),
			config: config.clone(),
			upstream_tls,
		};
		ProxyEngine {
			shared: Arc::new(EngineShared {
				pipeline,
				ca,
				mitm_acceptor,
				stats: Arc::new(Stats::default()),
			}),
			events,
			config,
			running: Mutex::new(None),
		}
	}

	/// Binds the listener and spawns the accept loop. Errors with
	/// `ProxyError::Config` if already running (spec §6 `start_proxy` is not
	/// idempotent while a session is active).
	pub async fn start(&self) -> ProxyResult<SocketAddr> {
		let mut running = self.running.lock().await;
		if running.is_some() {
			return Err(ProxyError::Config("proxy is already running".into()));
		}
		let addr = SocketAddr::new(self.config.bind_address, self.config.port);
		let listener = TcpListener::bind(addr).await.map_err(|source| ProxyError::BindFailed {
			address: addr.to_string(),
			source,
		})?;
		let local_addr = listener.local_addr().unwrap_or(addr);
		let (trigger, watcher) = drain::new();
		tokio::spawn(accept_loop(listener, self.shared.clone(), self.config.clone(), watcher));
		*running = Some(RunningState { trigger, addr: local_addr });
		drop(running);
		self.publish_status(true, local_addr).await;
		Ok(local_addr)
	}

	/// Signals every accept/connection task to stop and waits for them to
	/// drain, then aborts in-flight flows and any paused breakpoints (spec §5
	/// "Cancellation").
	pub async fn stop(&self) {
		let state = self.running.lock().await.take();
		let Some(state) = state else {
			return;
		};
		state.trigger.signal();
		state.trigger.closed().await;
		self.shared.pipeline.breakpoints.abort_all();
		self.shared.pipeline.store.abort_in_flight(pipeline::now_ns());
		self.publish_status(false, state.addr).await;
	}

	pub async fn is_running(&self) -> bool {
		self.running.lock().await.is_some()
	}

	pub fn ca(&self) -> &Arc<CertificateAuthority> {
		&self.shared.ca
	}

	/// Replaces the live shaping baseline (§6 `set_throttling`); takes
	/// effect for every new connection's shaper from this point on.
	pub fn set_throttle(&self, setting: ThrottleSetting) {
		self.shared.pipeline.throttle.store(Arc::new(setting));
	}

	pub fn store(&self) -> &Arc<FlowStore> {
		&self.shared.pipeline.store
	}

	pub fn breakpoints(&self) -> &Arc<BreakpointCoordinator> {
		&self.shared.pipeline.breakpoints
	}

	async fn publish_status(&self, is_running: bool, addr: SocketAddr) {
		self.events.publish_status(StatusEvent {
			is_running,
			port: addr.port(),
			address: addr.ip().to_string(),
			active_connections: self.shared.stats.active_connections.load(Ordering::Relaxed),
			bytes_rx: self.shared.stats.bytes_rx.load(Ordering::Relaxed),
			bytes_tx: self.shared.stats.bytes_tx.load(Ordering::Relaxed),
			ssl_interception_enabled: self.config.enable_ssl_interception,
			error: None,
		});
	}

	/// Republishes the `status` topic every second even absent a state
	/// change, per spec §4.K's "or a 1-second heartbeat". Intended to be
	/// spawned once alongside the admin server.
	pub async fn run_heartbeat(self: Arc<Self>) {
		let mut ticker = tokio::time::interval(Duration::from_secs(1));
		loop {
			ticker.tick().await;
			let (is_running, addr) = {
				let running = self.running.lock().await;
				match running.as_ref() {
					Some(state) => (true, state.addr),
					None => (false, SocketAddr::new(self.config.bind_address, self.config.port)),
				}
			};
			self.publish_status(is_running, addr).await;
		}
	}
}

async fn accept_loop(listener: TcpListener, shared: Arc<EngineShared>, config: ProxyConfig, drain: DrainWatcher) {
	loop {
		let mut wait_drain = drain.clone();
		tokio::select! {
			accepted = listener.accept() => {
				let Ok((stream, peer_addr)) = accepted else { continue };
				let shared = shared.clone();
				let config = config.clone();
				let conn_drain = drain.clone();
				shared.stats.active_connections.fetch_add(1, Ordering::Relaxed);
				tokio::spawn(async move {
					connection::handle_connection(stream, peer_addr, shared.clone(), config, conn_drain).await;
					shared.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
				});
			},
			_ = wait_drain.signaled() => break,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use syrah_core::model::Session;

	fn test_ca() -> Arc<CertificateAuthority> {
		Arc::new(CertificateAuthority::bootstrap("syrah-test").expect("bootstrap ca"))
	}

	#[tokio::test]
	async fn start_then_stop_releases_the_bind() {
		let config = ProxyConfig {
			port: 0,
			enable_ssl_interception: false,
			..ProxyConfig::default()
		};
		let session = Session::new(uuid::Uuid::new_v4(), "test", config.max_flows);
		let store = Arc::new(FlowStore::new(session));
		let events = Arc::new(EventBus::new());
		let breakpoints = Arc::new(BreakpointCoordinator::new());
		let engine = ProxyEngine::new(config, store, events, breakpoints, test_ca());

		let addr = engine.start().await.unwrap();
		assert!(addr.port() > 0);
		assert!(engine.is_running().await);
		engine.stop().await;
		assert!(!engine.is_running().await);
	}
}
