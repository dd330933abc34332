//! Connection handler (spec §4.G): the per-client TCP state machine —
//! plaintext request/response, `CONNECT` tunneling, and MITM TLS
//! interception.
//!
//! ```text
//! ACCEPT -> READ_REQUEST
//! READ_REQUEST -> (method == CONNECT) ? CONNECT_SETUP : FORWARD_REQUEST
//! CONNECT_SETUP -> write "200 Connection Established"
//!               -> (ssl interception enabled && host not bypassed) ? TLS_MITM : RAW_TUNNEL
//! TLS_MITM   -> mint leaf cert for SNI, TLS-accept the client, re-enter READ_REQUEST
//!               on the decrypted stream
//! RAW_TUNNEL -> full-duplex byte relay between client and origin until either closes
//! FORWARD_REQUEST -> runs the flow pipeline (rules, upstream dial, throttle)
//! READ_RESPONSE   -> write the response to the client, then keep-alive or close
//! ```
//!
//! `is_secure` is sticky for the lifetime of one `READ_REQUEST` loop: a
//! `TLS_MITM` tunnel starts its own independent loop on the decrypted stream
//! and never falls back to the original plaintext socket.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use syrah_core::http1::{self, RequestHead, RequestTarget};
use syrah_core::model::flow::Protocol;
use syrah_core::model::request::{Method, Request, Scheme};
use syrah_core::model::OrderedHeaders;
use syrah_core::model::Response;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::drain::DrainWatcher;
use crate::engine::EngineShared;
use crate::error::{MalformedRequestError, ProxyError, ProxyResult};
use crate::http_io::{self, BodyFraming, IoStream};
use crate::pipeline::{self, PipelineOutcome};

/// Drives one accepted TCP connection end to end. Never returns an error to
/// the caller: every failure becomes either a synthesized error response
/// (inside the pipeline) or a logged, silent close.
pub async fn handle_connection(
	stream: TcpStream,
	peer_addr: SocketAddr,
	shared: Arc<EngineShared>,
	config: ProxyConfig,
	mut drain: DrainWatcher,
) {
	let _ = stream.set_nodelay(true);
	let connection_id = Uuid::new_v4();
	let boxed: Box<dyn IoStream> = Box::new(stream);
	if let Err(err) = read_request_loop(boxed, connection_id, &shared, &config, &mut drain, false).await {
		tracing::debug!(%connection_id, peer = %peer_addr, error = %err, "connection closed");
	}
}

/// The `READ_REQUEST` state and everything downstream of it on one duplex
/// stream. Loops for keep-alive; returns once the connection should close.
/// Takes the stream by value since a `CONNECT`/`TLS_MITM` transition replaces
/// it outright rather than mutating in place.
async fn read_request_loop(
	mut stream: Box<dyn IoStream>,
	connection_id: Uuid,
	shared: &Arc<EngineShared>,
	config: &ProxyConfig,
	drain: &mut DrainWatcher,
	is_secure: bool,
) -> ProxyResult<()> {
	loop {
		let mut buf = BytesMut::new();
		let head_result = tokio::select! {
			r = http_io::read_request_head(stream.as_mut(), &mut buf) => r,
			_ = drain.signaled() => return Ok(()),
		};
		let Some((head, leftover)) = head_result? else {
			return Ok(());
		};

		if head.method == Method::Connect {
			return handle_connect(stream, head, connection_id, shared, config, drain).await;
		}

		let body = read_request_body(stream.as_mut(), &head.headers, leftover).await?;
		let request_keep_alive = wants_keep_alive(&head.http_version, &head.headers);
		let request = build_request(&head, body, is_secure)?;

		let protocol = if is_secure { Protocol::Https } else { Protocol::Http };
		let outcome: PipelineOutcome =
			pipeline::run_request(&shared.pipeline, request, connection_id, protocol, drain).await;

		let Some(response) = outcome.response else {
			return Ok(());
		};
		let response_keep_alive = wants_keep_alive_response(&response.headers);
		write_response(stream.as_mut(), &head.http_version, &response).await?;

		if !request_keep_alive || !response_keep_alive {
			return Ok(());
		}
	}
}

/// `CONNECT_SETUP`: acknowledges the tunnel, then picks `TLS_MITM` or
/// `RAW_TUNNEL` per the configured SSL interception policy and bypass list.
async fn handle_connect(
	mut stream: Box<dyn IoStream>,
	head: RequestHead,
	connection_id: Uuid,
	shared: &Arc<EngineShared>,
	config: &ProxyConfig,
	drain: &mut DrainWatcher,
) -> ProxyResult<()> {
	let RequestTarget::Authority { host, port } = head.target else {
		return Err(ProxyError::MalformedRequest(MalformedRequestError(
			"CONNECT without an authority-form target".into(),
		)));
	};
	http_io::write_all(stream.as_mut(), b"HTTP/1.1 200 Connection Established\r\n\r\n").await?;

	if !config.enable_ssl_interception || config.is_bypassed(&host) {
		return raw_tunnel(stream, &host, port, config, drain).await;
	}

	match shared.mitm_acceptor.accept(stream).await {
		Ok(tls_stream) => {
			let boxed: Box<dyn IoStream> = Box::new(tls_stream);
			read_request_loop(boxed, connection_id, shared, config, drain, true).await
		},
		Err(source) => Err(ProxyError::TlsHandshakeFailed { upstream: false, source }),
	}
}

/// `RAW_TUNNEL`: dials the origin in the clear and relays bytes bidirectionally
/// without parsing them, used for bypassed hosts or when SSL interception is
/// disabled outright.
async fn raw_tunnel(
	mut client: Box<dyn IoStream>,
	host: &str,
	port: u16,
	config: &ProxyConfig,
	drain: &mut DrainWatcher,
) -> ProxyResult<()> {
	let authority = format!("{host}:{port}");
	let mut upstream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&authority))
		.await
		.map_err(|_| ProxyError::Timeout(format!("connect to {authority}")))?
		.map_err(|source| ProxyError::UpstreamDialFailed {
			authority: authority.clone(),
			source,
		})?;
	tokio::select! {
		result = tokio::io::copy_bidirectional(&mut client, &mut upstream) => {
			result.map(|_| ()).map_err(|_| ProxyError::UpstreamResetDuringRequest)
		},
		_ = drain.signaled() => Ok(()),
	}
}

/// Reads a request body off `stream` per its framing headers. Unlike the
/// response-side reader in `http_io`, a close-delimited request never waits
/// for EOF (a client wouldn't send one without `Content-Length`/chunked, and
/// waiting would stall the keep-alive loop indefinitely).
async fn read_request_body<S: IoStream + ?Sized>(
	stream: &mut S,
	headers: &OrderedHeaders,
	leftover: Bytes,
) -> ProxyResult<Bytes> {
	match http_io::select_framing(headers) {
		BodyFraming::ContentLength(len) => {
			let len = len as usize;
			let mut buf = BytesMut::from(&leftover[..]);
			while buf.len() < len {
				let mut chunk = [0u8; 8192];
				let n = stream
					.read(&mut chunk)
					.await
					.map_err(|_| ProxyError::MalformedRequest(MalformedRequestError("client closed mid-body".into())))?;
				if n == 0 {
					return Err(ProxyError::MalformedRequest(MalformedRequestError(
						"client closed before full body arrived".into(),
					)));
				}
				buf.extend_from_slice(&chunk[..n]);
			}
			buf.truncate(len);
			Ok(buf.freeze())
		},
		BodyFraming::Chunked => {
			let mut buf = BytesMut::from(&leftover[..]);
			while !buf.windows(5).any(|w| w == b"0\r\n\r\n") {
				let mut chunk = [0u8; 8192];
				let n = stream.read(&mut chunk).await.map_err(|_| {
					ProxyError::MalformedRequest(MalformedRequestError("client closed mid chunked body".into()))
				})?;
				if n == 0 {
					return Err(ProxyError::MalformedRequest(MalformedRequestError(
						"client closed mid chunked body".into(),
					)));
				}
				buf.extend_from_slice(&chunk[..n]);
			}
			http1::chunked::decode(&buf).map_err(ProxyError::from)
		},
		BodyFraming::CloseDelimited => Ok(leftover),
	}
}

fn build_request(head: &RequestHead, body: Bytes, is_secure: bool) -> ProxyResult<Request> {
	let (scheme, host, port, path, query) = match &head.target {
		RequestTarget::Absolute { url } => parse_absolute_target(url)?,
		RequestTarget::Origin { path, query } => {
			let host_header = head.headers.get("host").ok_or_else(|| {
				ProxyError::MalformedRequest(MalformedRequestError("request has no Host header".into()))
			})?;
			let (host, port) = split_host_port(host_header, is_secure);
			(
				if is_secure { Scheme::Https } else { Scheme::Http },
				host,
				port,
				path.clone(),
				query.clone(),
			)
		},
		RequestTarget::Authority { .. } => {
			return Err(ProxyError::MalformedRequest(MalformedRequestError(
				"authority-form target is only valid for CONNECT".into(),
			)));
		},
	};
	Ok(Request::from_parsed(
		Uuid::new_v4(),
		head.method,
		scheme,
		host,
		port,
		path,
		query,
		head.headers.clone(),
		body,
		head.http_version.clone(),
		pipeline::now_ns(),
		is_secure,
	))
}

fn parse_absolute_target(url: &str) -> ProxyResult<(Scheme, String, u16, String, String)> {
	let (scheme_str, rest) = url.split_once("://").ok_or_else(|| bad_target(url))?;
	let scheme = match scheme_str {
		"http" => Scheme::Http,
		"https" => Scheme::Https,
		_ => return Err(bad_target(url)),
	};
	let (authority, path_and_query) = match rest.find('/') {
		Some(idx) => (&rest[..idx], &rest[idx..]),
		None => (rest, "/"),
	};
	let (host, port) = split_host_port(authority, scheme == Scheme::Https);
	let (path, query) = path_and_query.split_once('?').unwrap_or((path_and_query, ""));
	let path = if path.is_empty() { "/".to_string() } else { path.to_string() };
	Ok((scheme, host, port, path, query.to_string()))
}

fn bad_target(url: &str) -> ProxyError {
	ProxyError::MalformedRequest(MalformedRequestError(format!("unsupported absolute-form target: {url}")))
}

fn split_host_port(authority: &str, is_secure: bool) -> (String, u16) {
	match authority.rsplit_once(':') {
		Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
			(host.to_string(), port.parse().unwrap_or(if is_secure { 443 } else { 80 }))
		},
		_ => (authority.to_string(), if is_secure { 443 } else { 80 }),
	}
}

/// Writes the flow's response back to the client. Always re-serializes with
/// an explicit `Content-Length` rather than forwarding whatever framing the
/// origin used, since by the time a flow reaches this point its body is
/// already fully buffered (chunked-decoded and possibly rule-modified).
async fn write_response<S: IoStream + ?Sized>(
	stream: &mut S,
	http_version: &str,
	response: &Response,
) -> ProxyResult<()> {
	let mut headers = response.headers.clone();
	headers.remove("transfer-encoding");
	headers.set("Content-Length", response.body_bytes.len().to_string());
	let head = http1::serialize_response_head(http_version, response.status_code, &response.status_message, &headers);
	http_io::write_all(stream, &head).await?;
	if !response.body_bytes.is_empty() {
		http_io::write_all(stream, &response.body_bytes).await?;
	}
	Ok(())
}

fn connection_says(headers: &OrderedHeaders, token: &str) -> bool {
	headers
		.get("connection")
		.map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
		.unwrap_or(false)
}

fn wants_keep_alive(http_version: &str, headers: &OrderedHeaders) -> bool {
	if connection_says(headers, "close") {
		return false;
	}
	http_version == "HTTP/1.1" || connection_says(headers, "keep-alive")
}

fn wants_keep_alive_response(headers: &OrderedHeaders) -> bool {
	!connection_says(headers, "close")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn absolute_target_splits_authority_and_path() {
		let (scheme, host, port, path, query) = parse_absolute_target("http://example.com:8080/a/b?x=1").unwrap();
		assert_eq!(scheme, Scheme::Http);
		assert_eq!(host, "example.com");
		assert_eq!(port, 8080);
		assert_eq!(path, "/a/b");
		assert_eq!(query, "x=1");
	}

	#[test]
	fn absolute_target_defaults_path_and_port() {
		let (_, host, port, path, _) = parse_absolute_target("https://example.com").unwrap();
		assert_eq!(host, "example.com");
		assert_eq!(port, 443);
		assert_eq!(path, "/");
	}

	#[test]
	fn keep_alive_defaults_true_on_http11() {
		let headers = OrderedHeaders::new();
		assert!(wants_keep_alive("HTTP/1.1", &headers));
	}

	#[test]
	fn keep_alive_false_on_http10_without_explicit_header() {
		let headers = OrderedHeaders::new();
		assert!(!wants_keep_alive("HTTP/1.0", &headers));
	}

	#[test]
	fn connection_close_overrides_version() {
		let mut headers = OrderedHeaders::new();
		headers.append("Connection", "close");
		assert!(!wants_keep_alive("HTTP/1.1", &headers));
	}
}
