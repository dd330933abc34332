//! Flow pipeline (spec §4.H): rule evaluation, upstream dial, throttle,
//! response capture, and finalize. One call to [`run_request`] handles one
//! parsed request end to end; the connection handler (`connection.rs`)
//! drives the actual sockets and calls back in here per HTTP message.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use bytes::Bytes;
use syrah_core::model::flow::{FlowError, FlowState};
use syrah_core::model::matcher::MatchInput;
use syrah_core::model::request::Scheme;
use syrah_core::model::rule::{RuleAction, RulePhase};
use syrah_core::model::{OrderedHeaders, Request, Response, Rule};
use syrah_core::Flow;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use uuid::Uuid;

use crate::breakpoint::{BreakpointCoordinator, Patch, ResumeDecision};
use crate::config::ProxyConfig;
use crate::drain::DrainWatcher;
use crate::error::{ProxyError, ProxyResult};
use crate::eventbus::{EventBus, FlowEvent};
use crate::http_io::{self, BodyFraming, IoStream};
use crate::pool::{PoolKey, PooledConn, UpstreamPool};
use crate::store::FlowStore;
use crate::throttle::{Direction, Shaper, ThrottleSetting};

pub fn now_ns() -> u128 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0)
}

pub struct PipelineShared {
	pub store: Arc<FlowStore>,
	pub events: Arc<EventBus>,
	pub breakpoints: Arc<BreakpointCoordinator>,
	pub pool: Arc<UpstreamPool>,
	pub config: ProxyConfig,
	pub upstream_tls: Arc<rustls::ClientConfig>,
	/// Live baseline shaping setting, separate from `config.throttle` so a
	/// `set_throttling` command can take effect for connections already
	/// running without tearing down and restarting the engine.
	pub throttle: ArcSwap<ThrottleSetting>,
}

/// The outcome of running one request through the pipeline: either a
/// completed/failed flow ready to serialize back to the client, or a signal
/// that the connection should tear down (e.g. the breakpoint controller
/// aborted and there's nothing sensible left to send).
pub struct PipelineOutcome {
	pub flow: Flow,
	pub response: Option<Response>,
}

#[allow(clippy::too_many_arguments)]
pub async fn run_request(
	shared: &PipelineShared,
	mut request: Request,
	connection_id: Uuid,
	protocol: syrah_core::model::flow::Protocol,
	drain: &mut DrainWatcher,
) -> PipelineOutcome {
	let session_id = shared.store.session_id();
	let sequence = shared.store.next_sequence_number();
	request.timestamp_ns = now_ns();
	let flow_id = Uuid::new_v4();
	let mut flow = Flow::new(flow_id, session_id, sequence, request, protocol, connection_id, now_ns());
	shared.store.insert_flow(flow.clone());
	shared.events.publish_flow(FlowEvent::Created { flow: flow.clone() });

	let mut shaper = Shaper::new(*shared.throttle.load().as_ref());

	match drive_flow(shared, &mut flow, &mut shaper, drain).await {
		Ok(response) => {
			flow.state = FlowState::Completed;
			flow.response = Some(response.clone());
			flow.updated_at_ns = now_ns();
			shared.store.update_flow(flow.clone());
			shared.events.publish_flow(FlowEvent::Finalized { flow: flow.clone() });
			PipelineOutcome {
				flow,
				response: Some(response),
			}
		},
		Err(err) => {
			let (status, reason) = err.client_status();
			let mut headers = OrderedHeaders::new();
			headers.set("Content-Length", "0");
			headers.set("X-Syrah-Error", format!("{:?}", err.kind()).to_ascii_lowercase());
			let response = Response::from_parsed(status, reason.to_string(), headers, Bytes::new(), None, now_ns());
			flow.state = FlowState::Failed;
			flow.error = Some(FlowError {
				kind: core_error_kind(&err),
				message: err.to_string(),
			});
			flow.response = Some(response.clone());
			flow.updated_at_ns = now_ns();
			shared.store.update_flow(flow.clone());
			shared.events.publish_flow(FlowEvent::Finalized { flow: flow.clone() });
			PipelineOutcome {
				flow,
				response: Some(response),
			}
		},
	}
}

fn core_error_kind(err: &ProxyError) -> syrah_core::ErrorKind {
	use crate::error::ErrorKind as PK;
	use syrah_core::ErrorKind as CK;
	match err.kind() {
		PK::ConfigError => CK::ConfigError,
		PK::MalformedRequest => CK::MalformedRequest,
		PK::MalformedResponse => CK::MalformedResponse,
		PK::CertificateIssueFailed => CK::CertificateIssueFailed,
		PK::RuleActionFailed => CK::RuleActionFailed,
		PK::Timeout => CK::Timeout,
		_ => CK::RuleActionFailed,
	}
}

async fn drive_flow(
	shared: &PipelineShared,
	flow: &mut Flow,
	shaper: &mut Shaper,
	drain: &mut DrainWatcher,
) -> ProxyResult<Response> {
	let rules = shared.store.rules();

	if let Some(response) = apply_phase_rules(shared, flow, &rules, RulePhase::Request, shaper, drain).await? {
		return Ok(response);
	}

	let response = dial_and_forward(shared, flow, shaper, drain).await?;
	flow.response = Some(response);

	if let Some(response) = apply_phase_rules(shared, flow, &rules, RulePhase::Response, shaper, drain).await? {
		return Ok(response);
	}

	flow.response.take().ok_or_else(|| ProxyError::UpstreamResetDuringResponse)
}

/// Evaluates rules in descending priority for `phase`; the first match
/// fires. Returns `Some(response)` if the action short-circuits upstream
/// dialing (Block, MapLocal, or a breakpoint resolved with
/// `resume_modified` at the response phase before a response even exists).
async fn apply_phase_rules(
	shared: &PipelineShared,
	flow: &mut Flow,
	rules: &[Rule],
	phase: RulePhase,
	shaper: &mut Shaper,
	drain: &mut DrainWatcher,
) -> ProxyResult<Option<Response>> {
	for rule in rules {
		if !rule.is_enabled || !rule.phase.applies_to(phase) {
			continue;
		}
		let url = flow.request.match_target();
		let input = MatchInput {
			url: &url,
			host: &flow.request.host,
			method: flow.request.method,
			headers: &flow.request.headers,
			content_type: flow.request.headers.get("content-type"),
		};
		let matched = rule.matcher.matches(&input);
		if !matched {
			continue;
		}
		flow.applied_rules.push(rule.id.clone());
		if let Some(resp) = apply_action(shared, flow, rule, phase, shaper, drain).await? {
			return Ok(Some(resp));
		}
	}
	Ok(None)
}

async fn apply_action(
	shared: &PipelineShared,
	flow: &mut Flow,
	rule: &Rule,
	phase: RulePhase,
	shaper: &mut Shaper,
	drain: &mut DrainWatcher,
) -> ProxyResult<Option<Response>> {
	match &rule.action {
		RuleAction::Block { status, body, content_type } => {
			let mut headers = OrderedHeaders::new();
			headers.set("Content-Length", body.len().to_string());
			if let Some(ct) = content_type {
				headers.set("Content-Type", ct.clone());
			}
			Ok(Some(Response::from_parsed(
				*status,
				reason_phrase(*status).to_string(),
				headers,
				Bytes::from(body.clone().into_bytes()),
				None,
				now_ns(),
			)))
		},
		RuleAction::MapLocal { file_path, status, content_type } => {
			let body = tokio::fs::read(file_path)
				.await
				.map_err(|e| ProxyError::RuleActionFailed(format!("map_local file {file_path}: {e}")))?;
			let mut headers = OrderedHeaders::new();
			headers.set("Content-Length", body.len().to_string());
			headers.set("Content-Type", content_type.clone());
			Ok(Some(Response::from_parsed(
				*status,
				reason_phrase(*status).to_string(),
				headers,
				Bytes::from(body),
				None,
				now_ns(),
			)))
		},
		RuleAction::MapRemote {
			authority,
			preserve_path,
			preserve_query,
			preserve_headers,
		} => {
			let (host, port) = split_authority(authority, flow.request.scheme);
			flow.request.host = host;
			flow.request.port = port;
			if !preserve_path {
				flow.request.path = "/".to_string();
			}
			if !preserve_query {
				flow.request.query_string.clear();
				flow.request.query_params.clear();
			}
			if !preserve_headers {
				flow.request.headers = OrderedHeaders::new();
			}
			Ok(None)
		},
		RuleAction::ModifyHeaders { edits } => {
			let headers = match phase {
				RulePhase::Response => flow.response.as_mut().map(|r| &mut r.headers),
				_ => Some(&mut flow.request.headers),
			};
			if let Some(headers) = headers {
				for edit in &edits.set {
					headers.set(edit.name.clone(), edit.value.clone());
				}
				for name in &edits.remove {
					headers.remove(name);
				}
			}
			Ok(None)
		},
		RuleAction::ModifyBody { replacement, find_replace } => {
			match phase {
				RulePhase::Response => {
					if let Some(resp) = flow.response.as_mut() {
						apply_body_edit(&mut resp.body_bytes, replacement, find_replace);
					}
				},
				_ => apply_body_edit(&mut flow.request.body_bytes, replacement, find_replace),
			}
			Ok(None)
		},
		RuleAction::Breakpoint => {
			flow.snapshot_original_request();
			flow.snapshot_original_response();
			flow.state = FlowState::Paused;
			shared.store.update_flow(flow.clone());
			shared.events.publish_flow(FlowEvent::Updated { flow: flow.clone() });
			let rx = shared.breakpoints.register(flow.id);
			let decision = tokio::select! {
				result = rx => result.unwrap_or(ResumeDecision::Abort),
				_ = drain.signaled() => ResumeDecision::Abort,
			};
			flow.state = FlowState::Receiving;
			match decision {
				ResumeDecision::Abort => Err(ProxyError::BreakpointAborted),
				ResumeDecision::ResumeUnmodified => Ok(None),
				ResumeDecision::ResumeModified { patch } => {
					apply_patch(flow, phase, patch);
					Ok(None)
				},
			}
		},
		RuleAction::Script { script_id } => {
			tracing::debug!(flow_id = %flow.id, script_id = %script_id, "script rule matched; no sandboxed runtime configured, passing through");
			Ok(None)
		},
		RuleAction::Throttle {
			preset,
			download_bps,
			upload_bps,
			latency_ms,
			loss_pct,
		} => {
			let mut setting = preset
				.as_deref()
				.and_then(ThrottleSetting::preset)
				.unwrap_or(*shared.throttle.load().as_ref());
			if let Some(v) = download_bps {
				setting.download_bps = *v;
			}
			if let Some(v) = upload_bps {
				setting.upload_bps = *v;
			}
			if let Some(v) = latency_ms {
				setting.latency_ms = *v;
			}
			if let Some(v) = loss_pct {
				setting.loss_pct = *v;
			}
			*shaper = Shaper::new(setting);
			let _ = drain;
			Ok(None)
		},
	}
}

fn apply_patch(flow: &mut Flow, phase: RulePhase, patch: Patch) {
	match phase {
		RulePhase::Response => {
			if let Some(resp) = flow.response.as_mut() {
				if let Some(status) = patch.status {
					resp.status_code = status;
				}
				for (name, value) in &patch.set_headers {
					resp.headers.set(name.clone(), value.clone());
				}
				for name in &patch.remove_headers {
					resp.headers.remove(name);
				}
				if let Some(body) = patch.body {
					resp.body_bytes = Bytes::from(body);
				}
			}
		},
		_ => {
			if let Some(method) = patch.method.as_deref().and_then(|m| m.parse().ok()) {
				flow.request.method = method;
			}
			if let Some(url) = &patch.url {
				flow.request.path = url.clone();
			}
			for (name, value) in &patch.set_headers {
				flow.request.headers.set(name.clone(), value.clone());
			}
			for name in &patch.remove_headers {
				flow.request.headers.remove(name);
			}
			if let Some(body) = patch.body {
				flow.request.body_bytes = Bytes::from(body);
			}
		},
	}
}

fn apply_body_edit(body: &mut Bytes, replacement: &Option<String>, find_replace: &[syrah_core::model::rule::FindReplace]) {
	if let Some(replacement) = replacement {
		*body = Bytes::from(replacement.clone().into_bytes());
		return;
	}
	if find_replace.is_empty() {
		return;
	}
	let mut text = String::from_utf8_lossy(body).into_owned();
	for fr in find_replace {
		text = text.replace(&fr.find, &fr.replace);
	}
	*body = Bytes::from(text.into_bytes());
}

fn split_authority(authority: &str, scheme: Scheme) -> (String, u16) {
	let default_port = match scheme {
		Scheme::Http => 80,
		Scheme::Https => 443,
	};
	match authority.rsplit_once(':') {
		Some((host, port)) if port.parse::<u16>().is_ok() => (host.to_string(), port.parse().unwrap()),
		_ => (authority.to_string(), default_port),
	}
}

fn reason_phrase(status: u16) -> &'static str {
	match status {
		200 => "OK",
		204 => "No Content",
		301 => "Moved Permanently",
		302 => "Found",
		400 => "Bad Request",
		403 => "Forbidden",
		404 => "Not Found",
		451 => "Unavailable For Legal Reasons",
		500 => "Internal Server Error",
		502 => "Bad Gateway",
		503 => "Service Unavailable",
		504 => "Gateway Timeout",
		_ => "Unknown",
	}
}

/// Dials `(host, port, scheme)` (reusing a pooled connection when one is
/// idle), writes the request, shapes and reads the response.
async fn dial_and_forward(
	shared: &PipelineShared,
	flow: &mut Flow,
	shaper: &mut Shaper,
	drain: &mut DrainWatcher,
) -> ProxyResult<Response> {
	let key = PoolKey {
		host: flow.request.host.clone(),
		port: flow.request.port,
		scheme: flow.request.scheme,
	};
	let _permit = shared.pool.acquire_permit(&key).await;

	let mut conn = match shared.pool.take_idle(&key).await {
		Some(conn) => conn,
		None => dial_fresh(shared, &key).await?,
	};

	let body = flow.request.body_bytes.clone();
	let head = syrah_core::http1::serialize_request_head(
		&flow.request.method,
		&flow.request.path_and_query(),
		&format!("{}:{}", flow.request.host, flow.request.port),
		&flow.request.http_version,
		&flow.request.headers,
		false,
	);

	write_shaped(&mut conn, &head, Direction::Upload, shaper, drain).await?;
	if !body.is_empty() {
		write_shaped(&mut conn, &body, Direction::Upload, shaper, drain).await?;
	}

	let response = read_response(&mut conn, shared.config.decompress_responses, shaper, drain).await?;

	shared.pool.put_idle(&key, conn).await;
	Ok(response)
}

async fn dial_fresh(shared: &PipelineShared, key: &PoolKey) -> ProxyResult<PooledConn> {
	let authority = format!("{}:{}", key.host, key.port);
	let tcp = tokio::time::timeout(shared.config.connect_timeout, TcpStream::connect(&authority))
		.await
		.map_err(|_| ProxyError::Timeout(format!("connect to {authority}")))?
		.map_err(|source| ProxyError::UpstreamDialFailed {
			authority: authority.clone(),
			source,
		})?;
	match key.scheme {
		Scheme::Http => Ok(PooledConn::Plain(tcp)),
		Scheme::Https => {
			let connector = TlsConnector::from(shared.upstream_tls.clone());
			let server_name = rustls::pki_types::ServerName::try_from(key.host.clone())
				.map_err(|_| ProxyError::UpstreamDialFailed {
					authority: authority.clone(),
					source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad SNI hostname"),
				})?;
			let tls = connector.connect(server_name, tcp).await.map_err(|source| ProxyError::TlsHandshakeFailed {
				upstream: true,
				source,
			})?;
			Ok(PooledConn::Tls(Box::new(tls)))
		},
	}
}

async fn write_shaped(
	conn: &mut PooledConn,
	bytes: &[u8],
	direction: Direction,
	shaper: &mut Shaper,
	drain: &mut DrainWatcher,
) -> ProxyResult<()> {
	const CHUNK: usize = 16 * 1024;
	for chunk in bytes.chunks(CHUNK.max(1)) {
		shaper.shape(direction, chunk.len(), drain).await?;
		match conn {
			PooledConn::Plain(s) => http_io::write_all(s, chunk).await?,
			PooledConn::Tls(s) => http_io::write_all(s.as_mut(), chunk).await?,
		}
	}
	Ok(())
}

async fn read_response(
	conn: &mut PooledConn,
	decompress: bool,
	shaper: &mut Shaper,
	drain: &mut DrainWatcher,
) -> ProxyResult<Response> {
	let mut buf = bytes::BytesMut::new();
	let (head, leftover) = match conn {
		PooledConn::Plain(s) => http_io::read_response_head(s, &mut buf).await?,
		PooledConn::Tls(s) => http_io::read_response_head(s.as_mut(), &mut buf).await?,
	}
	.ok_or(ProxyError::UpstreamResetDuringResponse)?;

	let framing = http_io::select_framing(&head.headers);
	let body = match conn {
		PooledConn::Plain(s) => http_io::read_body(s, framing, leftover).await?,
		PooledConn::Tls(s) => http_io::read_body(s.as_mut(), framing, leftover).await?,
	};

	// Shape the already-read response bytes: the seed scenario's latency
	// budget is about delivering bytes to the client, not about the
	// upstream read itself, so shaping happens on the body we already have.
	for chunk in body.chunks(16 * 1024) {
		shaper.shape(Direction::Download, chunk.len(), drain).await?;
	}

	let (decoded, encoding) = http_io::maybe_decompress(&head.headers, body, decompress)?;
	Ok(Response::from_parsed(
		head.status_code,
		head.status_message,
		head.headers,
		decoded,
		encoding,
		now_ns(),
	))
}
