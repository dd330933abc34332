//! Admin HTTP+WebSocket surface (spec §6 "Command surface", SPEC_FULL.md
//! §6 "concrete transport"): `POST /commands/:name` dispatches every row of
//! the spec's command table through one handler, `/events/flows` and
//! `/events/status` are WebSocket upgrades streaming the two event-bus
//! topics, and `/certificate` / `/har` are plain GETs. Grounded on the
//! teacher's `admin::App` (`examples/vishalbelsare-agentgateway/src/admin.rs`)
//! — a small `axum` `Router` built from a `Clone` state handle — generalized
//! from its two read-only routes to a single dynamic command dispatcher plus
//! the WebSocket event feeds, matching `metrics::App`'s `axum::serve`
//! alongside the main service loop.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;
use uuid::Uuid;

use crate::har;
use crate::state::{AppState, CommandError, FlowPatchInput, StartProxyInput};
use syrah_core::model::Rule;
use syrah_proxy::throttle::ThrottleSetting;

#[derive(Clone)]
pub struct Admin {
	state: Arc<AppState>,
}

impl Admin {
	pub fn new(state: Arc<AppState>) -> Self {
		Admin { state }
	}

	pub fn router(&self) -> Router {
		Router::new()
			.route("/commands/{name}", axum::routing::post(dispatch_command))
			.route("/certificate", get(export_root_certificate))
			.route("/har", get(export_har))
			.route("/events/flows", get(stream_flows))
			.route("/events/status", get(stream_status))
			.with_state(self.clone())
	}
}

impl IntoResponse for CommandError {
	fn into_response(self) -> Response {
		let status = match &self {
			CommandError::NotRunning => StatusCode::CONFLICT,
			CommandError::FlowNotPaused(_) => StatusCode::NOT_FOUND,
			CommandError::Proxy(_) => StatusCode::BAD_REQUEST,
			CommandError::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
		};
		(status, Json(json!({ "error": self.to_string() }))).into_response()
	}
}

/// `POST /commands/:name` — one entry point for every row of the spec §6
/// command table. `body` is whatever JSON the command needs (absent for
/// commands with no input); the response is the command's JSON output.
async fn dispatch_command(
	State(admin): State<Admin>,
	Path(name): Path<String>,
	body: Option<Json<Value>>,
) -> Result<Json<Value>, CommandError> {
	let body = body.map(|Json(v)| v).unwrap_or(Value::Null);
	debug!(command = %name, "admin command");
	let state = &admin.state;
	let value = match name.as_str() {
		"initialize" => {
			let _ = state.ca.fingerprint_sha256();
			json!({ "ready": true })
		},
		"start_proxy" => {
			let input: StartProxyInput = if body.is_null() { StartProxyInput::default() } else { parse_required(body)? };
			json!(state.start_proxy(input).await?)
		},
		"stop_proxy" => {
			state.stop_proxy().await?;
			Value::Null
		},
		"get_status" => json!(state.get_status()),
		"export_root_certificate" => {
			let format = body.get("format").and_then(Value::as_str).unwrap_or("pem").to_string();
			let bytes = state.export_root_certificate(&format)?;
			json!({ "format": format, "bytes_base64": base64_encode(&bytes) })
		},
		"set_rules" => {
			let rules: Vec<Rule> = parse_required(body)?;
			state.set_rules(rules);
			Value::Null
		},
		"pause_flow" => {
			let flow_id = parse_flow_id(&body)?;
			json!(state.pause_flow(flow_id).await)
		},
		"resume_flow" => {
			let input: FlowPatchInput = parse_required(body)?;
			state.resume_flow(input.flow_id, input.patch).await?;
			Value::Null
		},
		"abort_flow" => {
			let flow_id = parse_flow_id(&body)?;
			state.abort_flow(flow_id).await?;
			Value::Null
		},
		"set_throttling" => {
			let setting: ThrottleSetting = parse_required(body)?;
			state.set_throttling(setting).await?;
			Value::Null
		},
		"clear_flows" => {
			state.clear_flows();
			Value::Null
		},
		other => {
			return Err(CommandError::Core(syrah_core::CoreError::Config(format!("unknown command {other}"))));
		},
	};
	Ok(Json(value))
}

fn parse_flow_id(body: &Value) -> Result<Uuid, CommandError> {
	body.get("flow_id")
		.and_then(Value::as_str)
		.and_then(|s| Uuid::parse_str(s).ok())
		.ok_or_else(|| CommandError::Core(syrah_core::CoreError::Config("missing flow_id".into())))
}

fn parse_required<T: serde::de::DeserializeOwned>(body: Value) -> Result<T, CommandError> {
	serde_json::from_value(body).map_err(|e| CommandError::Core(syrah_core::CoreError::Config(e.to_string())))
}

fn base64_encode(bytes: &[u8]) -> String {
	use base64::Engine;
	base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn default_format() -> String {
	"pem".to_string()
}

#[derive(Deserialize)]
struct CertificateFormatQuery {
	#[serde(default = "default_format")]
	format: String,
}

/// `GET /certificate?format=pem|der` — convenience mirror of the
/// `export_root_certificate` command returning raw bytes instead of base64.
async fn export_root_certificate(State(admin): State<Admin>, Query(query): Query<CertificateFormatQuery>) -> Result<Response, CommandError> {
	let bytes = admin.state.export_root_certificate(&query.format)?;
	let content_type = match query.format.as_str() {
		"der" => "application/pkix-cert",
		_ => "application/x-pem-file",
	};
	Ok(([("content-type", content_type)], bytes).into_response())
}

async fn export_har(State(admin): State<Admin>) -> Json<har::Har> {
	Json(admin.state.export_har())
}

/// `GET /events/flows` — WebSocket upgrade streaming the `flows` topic
/// (spec §4.K), one JSON frame per event. A lagging subscriber's missed
/// count folds into the event bus's drop counter instead of vanishing.
async fn stream_flows(State(admin): State<Admin>, ws: WebSocketUpgrade) -> Response {
	ws.on_upgrade(move |socket| flows_socket(socket, admin))
}

async fn flows_socket(mut socket: WebSocket, admin: Admin) {
	let mut rx = admin.state.events.subscribe_flows();
	loop {
		tokio::select! {
			item = rx.next() => {
				let Some(item) = item else { break };
				match item {
					Ok(event) => {
						let Ok(text) = serde_json::to_string(&event) else { continue };
						if socket.send(Message::Text(text.into())).await.is_err() {
							break;
						}
					},
					Err(BroadcastStreamRecvError::Lagged(n)) => admin.state.events.record_lagged(n),
				}
			},
			incoming = socket.recv() => {
				if incoming.is_none() {
					break;
				}
			},
		}
	}
}

/// `GET /events/status` — WebSocket upgrade over the `status` topic: the
/// underlying `watch` channel already coalesces to "latest value wins" for
/// a slow reader, matching §4.K's backpressure rule.
async fn stream_status(State(admin): State<Admin>, ws: WebSocketUpgrade) -> Response {
	ws.on_upgrade(move |socket| status_socket(socket, admin))
}

async fn status_socket(mut socket: WebSocket, admin: Admin) {
	let mut rx = WatchStream::new(admin.state.events.subscribe_status());
	loop {
		tokio::select! {
			item = rx.next() => {
				let Some(status) = item else { break };
				let Ok(text) = serde_json::to_string(&status) else { continue };
				if socket.send(Message::Text(text.into())).await.is_err() {
					break;
				}
			},
			incoming = socket.recv() => {
				if incoming.is_none() {
					break;
				}
			},
		}
	}
}
