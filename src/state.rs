//! Command surface (spec §6 "Command surface"): one request/response pair
//! per row of the spec's command table, dispatched over the admin HTTP API
//! in `admin.rs`. `AppState` is the long-lived handle the whole process
//! shares; a `ProxyEngine` is created fresh on every `start_proxy` and torn
//! down on `stop_proxy`, while the CA, flow store, event bus, and breakpoint
//! coordinator outlive any number of start/stop cycles.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use syrah_core::ca::CertificateAuthority;
use syrah_core::model::{Rule, SessionState};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::har;
use syrah_proxy::breakpoint::{BreakpointCoordinator, Patch, ResumeDecision};
use syrah_proxy::eventbus::{EventBus, StatusEvent};
use syrah_proxy::store::FlowStore;
use syrah_proxy::throttle::ThrottleSetting;
use syrah_proxy::{ProxyEngine, ProxyError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
	#[error("proxy is not running")]
	NotRunning,
	#[error(transparent)]
	Proxy(#[from] ProxyError),
	#[error("flow {0} not found or not paused")]
	FlowNotPaused(Uuid),
	#[error(transparent)]
	Core(#[from] syrah_core::CoreError),
}

pub struct AppState {
	pub config: AppConfig,
	pub ca: Arc<CertificateAuthority>,
	pub store: Arc<FlowStore>,
	pub events: Arc<EventBus>,
	pub breakpoints: Arc<BreakpointCoordinator>,
	engine: RwLock<Option<Arc<ProxyEngine>>>,
}

impl AppState {
	/// Boots the CA (spec §6 `initialize`/§7 "`CertificateIssueFailed` at
	/// startup are fatal"). Callers exit(2) on `Err`.
	pub fn bootstrap(config: AppConfig) -> syrah_core::CoreResult<Self> {
		let ca = Arc::new(CertificateAuthority::bootstrap(config.product_name.clone())?);
		let session = syrah_core::Session::new(Uuid::new_v4(), config.product_name.clone(), config.max_flows);
		Ok(AppState {
			store: Arc::new(FlowStore::new(session)),
			events: Arc::new(EventBus::new()),
			breakpoints: Arc::new(BreakpointCoordinator::new()),
			ca,
			config,
			engine: RwLock::new(None),
		})
	}

	pub async fn engine(&self) -> Option<Arc<ProxyEngine>> {
		self.engine.read().await.clone()
	}

	pub async fn is_running(&self) -> bool {
		self.engine.read().await.is_some()
	}

	pub async fn start_proxy(&self, input: StartProxyInput) -> Result<SocketAddrOutput, CommandError> {
		let mut proxy_config = self.config.to_proxy_config();
		if let Some(port) = input.port {
			proxy_config.port = port;
		}
		if let Some(addr) = input.bind_address {
			proxy_config.bind_address = addr;
		}
		if let Some(enable) = input.enable_ssl {
			proxy_config.enable_ssl_interception = enable;
		}
		if let Some(bypass) = input.bypass_hosts {
			proxy_config.bypass_hosts = bypass;
		}

		let engine = Arc::new(ProxyEngine::new(
			proxy_config,
			self.store.clone(),
			self.events.clone(),
			self.breakpoints.clone(),
			self.ca.clone(),
		));
		let addr = engine.start().await?;
		self.store.transition(SessionState::Starting);
		self.store.transition(SessionState::Running);
		*self.engine.write().await = Some(engine.clone());

		let heartbeat_engine = engine.clone();
		tokio::spawn(async move {
			heartbeat_engine.run_heartbeat().await;
		});

		Ok(SocketAddrOutput {
			bind_address: addr.ip(),
			port: addr.port(),
		})
	}

	pub async fn stop_proxy(&self) -> Result<(), CommandError> {
		let engine = self.engine.write().await.take();
		let Some(engine) = engine else {
			return Ok(());
		};
		self.store.transition(SessionState::Stopping);
		engine.stop().await;
		self.store.transition(SessionState::Stopped);
		Ok(())
	}

	pub fn get_status(&self) -> StatusEvent {
		self.events.latest_status()
	}

	pub fn export_root_certificate(&self, format: &str) -> Result<Vec<u8>, CommandError> {
		Ok(self.ca.export(format)?)
	}

	pub fn set_rules(&self, rules: Vec<Rule>) {
		self.store.set_rules(rules);
	}

	pub fn clear_flows(&self) {
		self.store.clear();
	}

	pub async fn pause_flow(&self, flow_id: Uuid) -> PauseFlowOutput {
		PauseFlowOutput {
			is_paused: self.breakpoints.is_paused(flow_id),
		}
	}

	pub async fn resume_flow(&self, flow_id: Uuid, patch: Option<Patch>) -> Result<(), CommandError> {
		let decision = match patch {
			Some(patch) => ResumeDecision::ResumeModified { patch },
			None => ResumeDecision::ResumeUnmodified,
		};
		if self.breakpoints.resume(flow_id, decision) {
			Ok(())
		} else {
			Err(CommandError::FlowNotPaused(flow_id))
		}
	}

	pub async fn abort_flow(&self, flow_id: Uuid) -> Result<(), CommandError> {
		if self.breakpoints.resume(flow_id, ResumeDecision::Abort) {
			Ok(())
		} else {
			Err(CommandError::FlowNotPaused(flow_id))
		}
	}

	pub async fn set_throttling(&self, setting: ThrottleSetting) -> Result<(), CommandError> {
		let engine = self.engine.read().await.clone().ok_or(CommandError::NotRunning)?;
		engine.set_throttle(setting);
		Ok(())
	}

	pub fn export_har(&self) -> har::Har {
		har::export(&self.config.product_name, self.store.all_flows())
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartProxyInput {
	pub port: Option<u16>,
	pub bind_address: Option<std::net::IpAddr>,
	pub enable_ssl: Option<bool>,
	pub bypass_hosts: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SocketAddrOutput {
	pub bind_address: std::net::IpAddr,
	pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct PauseFlowOutput {
	pub is_paused: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowPatchInput {
	pub flow_id: Uuid,
	#[serde(default)]
	pub patch: Option<Patch>,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn test_config() -> AppConfig {
		let mut config = AppConfig::default();
		config.port = 0;
		config.admin_port = 0;
		config
	}

	#[tokio::test]
	async fn start_then_stop_round_trips_session_state() {
		let state = AppState::bootstrap(test_config()).expect("bootstrap");
		assert_eq!(state.store.state(), SessionState::Stopped);
		let addr = state.start_proxy(StartProxyInput::default()).await.expect("start");
		assert!(addr.port > 0);
		assert_eq!(state.store.state(), SessionState::Running);
		state.stop_proxy().await.expect("stop");
		assert_eq!(state.store.state(), SessionState::Stopped);
	}

	#[tokio::test]
	async fn resume_flow_on_unknown_id_is_an_error() {
		let state = AppState::bootstrap(test_config()).expect("bootstrap");
		let result = state.resume_flow(Uuid::new_v4(), None).await;
		assert!(matches!(result, Err(CommandError::FlowNotPaused(_))));
	}

	#[tokio::test]
	async fn set_throttling_without_a_running_engine_errors() {
		let state = AppState::bootstrap(test_config()).expect("bootstrap");
		let result = state.set_throttling(ThrottleSetting::unthrottled()).await;
		assert!(matches!(result, Err(CommandError::NotRunning)));
	}

	#[test]
	fn export_root_certificate_returns_pem() {
		let state = AppState::bootstrap(test_config()).expect("bootstrap");
		let pem = state.export_root_certificate("pem").expect("export");
		assert!(String::from_utf8(pem).unwrap().starts_with("-----BEGIN CERTIFICATE-----"));
	}
}
