//! HTTP/1.x parsing and serialization (spec §4.F).
//!
//! Parsing is streaming-friendly: callers feed whatever bytes they have and
//! get back [`ParseProgress::Incomplete`] until a full request/response head
//! has arrived, at which point they get the parsed head plus how many bytes
//! of the buffer it consumed. Body framing selection and decompression are
//! pure functions over already-read bytes; the actual "read N bytes" /
//! "read until chunk terminator" looping lives in `syrah-proxy`, which owns
//! the socket.

pub mod chunked;

use std::io::Read;

use crate::error::CoreError;
use crate::model::headers::OrderedHeaders;
use crate::model::request::Method;
use crate::model::response::CompressionEncoding;

/// Headers that are valid only for a single transport hop and must never be
/// forwarded to the next hop (spec glossary: "hop-by-hop header"). `Connection`
/// itself is always stripped; any header *named by* a `Connection` value is
/// stripped as well (handled by the caller, which has the parsed value).
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
	"proxy-connection",
	"connection",
	"keep-alive",
	"te",
	"trailer",
	"transfer-encoding",
	"upgrade",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestTarget {
	/// `/path?query`
	Origin { path: String, query: String },
	/// `http://host:port/path?query` (proxy clients send this form)
	Absolute { url: String },
	/// `host:port` — only valid for `CONNECT`.
	Authority { host: String, port: u16 },
}

#[derive(Debug, Clone)]
pub struct RequestHead {
	pub method: Method,
	pub target: RequestTarget,
	pub http_version: String,
	pub headers: OrderedHeaders,
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
	pub http_version: String,
	pub status_code: u16,
	pub status_message: String,
	pub headers: OrderedHeaders,
}

/// Outcome of feeding more bytes into a streaming head parser.
pub enum ParseProgress<T> {
	/// A complete head was parsed; `consumed` is how many bytes of the input
	/// buffer belong to it (the rest, if any, is body or pipelined data).
	Complete { value: T, consumed: usize },
	/// Not enough bytes yet; the caller should read more and retry.
	Incomplete,
}

fn find_header_block_end(buf: &[u8]) -> Option<usize> {
	buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

fn split_lines(block: &[u8]) -> Vec<&[u8]> {
	let text = &block[..block.len() - 2]; // drop the second CRLF of the blank terminator line
	text.split(|&b| b == b'\n').map(|l| l.strip_suffix(b"\r").unwrap_or(l)).collect()
}

fn parse_header_lines(lines: &[&[u8]]) -> Result<OrderedHeaders, CoreError> {
	let mut headers = OrderedHeaders::new();
	for line in lines {
		if line.is_empty() {
			continue;
		}
		if line.first().is_some_and(|b| *b == b' ' || *b == b'\t') {
			return Err(CoreError::MalformedRequest(
				"header line folding is not supported".into(),
			));
		}
		let text = std::str::from_utf8(line)
			.map_err(|_| CoreError::MalformedRequest("header line is not valid UTF-8".into()))?;
		let (name, value) = text
			.split_once(':')
			.ok_or_else(|| CoreError::MalformedRequest(format!("header missing colon: {text:?}")))?;
		headers.append(name.trim(), value.trim());
	}
	Ok(headers)
}

/// Parses `METHOD SP REQUEST-TARGET SP HTTP/VERSION CRLF` plus the header
/// block, up to (and including) the terminating empty line.
pub fn parse_request_head(buf: &[u8]) -> Result<ParseProgress<RequestHead>, CoreError> {
	let Some(end) = find_header_block_end(buf) else {
		return Ok(ParseProgress::Incomplete);
	};
	let block = &buf[..end];
	let mut lines = split_lines(block).into_iter();
	let request_line = lines
		.next()
		.ok_or_else(|| CoreError::MalformedRequest("empty request".into()))?;
	let request_line = std::str::from_utf8(request_line)
		.map_err(|_| CoreError::MalformedRequest("request line is not valid UTF-8".into()))?;
	let mut parts = request_line.split(' ');
	let method_str = parts
		.next()
		.ok_or_else(|| CoreError::MalformedRequest("missing method".into()))?;
	let target_str = parts
		.next()
		.ok_or_else(|| CoreError::MalformedRequest("missing request-target".into()))?;
	let version = parts
		.next()
		.ok_or_else(|| CoreError::MalformedRequest("missing HTTP version".into()))?;
	if parts.next().is_some() {
		return Err(CoreError::MalformedRequest("malformed request line".into()));
	}
	let method: Method = method_str.parse()?;
	let target = parse_request_target(&method, target_str)?;
	let header_lines: Vec<&[u8]> = lines.collect();
	let headers = parse_header_lines(&header_lines)?;
	Ok(ParseProgress::Complete {
		value: RequestHead {
			method,
			target,
			http_version: version.to_string(),
			headers,
		},
		consumed: end,
	})
}

fn parse_request_target(method: &Method, raw: &str) -> Result<RequestTarget, CoreError> {
	if *method == Method::Connect {
		let (host, port) = raw
			.rsplit_once(':')
			.ok_or_else(|| CoreError::MalformedRequest(format!("bad CONNECT target: {raw}")))?;
		let port: u16 = port
			.parse()
			.map_err(|_| CoreError::MalformedRequest(format!("bad CONNECT port: {port}")))?;
		return Ok(RequestTarget::Authority {
			host: host.to_string(),
			port,
		});
	}
	if raw.starts_with("http://") || raw.starts_with("https://") {
		return Ok(RequestTarget::Absolute { url: raw.to_string() });
	}
	let (path, query) = raw.split_once('?').unwrap_or((raw, ""));
	Ok(RequestTarget::Origin {
		path: path.to_string(),
		query: query.to_string(),
	})
}

/// Parses `HTTP/VERSION SP STATUS-CODE SP REASON-PHRASE CRLF` plus headers.
pub fn parse_response_head(buf: &[u8]) -> Result<ParseProgress<ResponseHead>, CoreError> {
	let Some(end) = find_header_block_end(buf) else {
		return Ok(ParseProgress::Incomplete);
	};
	let block = &buf[..end];
	let mut lines = split_lines(block).into_iter();
	let status_line = lines
		.next()
		.ok_or_else(|| CoreError::MalformedResponse("empty response".into()))?;
	let status_line = std::str::from_utf8(status_line)
		.map_err(|_| CoreError::MalformedResponse("status line is not valid UTF-8".into()))?;
	let mut parts = status_line.splitn(3, ' ');
	let version = parts
		.next()
		.ok_or_else(|| CoreError::MalformedResponse("missing HTTP version".into()))?;
	let status_code: u16 = parts
		.next()
		.ok_or_else(|| CoreError::MalformedResponse("missing status code".into()))?
		.parse()
		.map_err(|_| CoreError::MalformedResponse("bad status code".into()))?;
	let reason = parts.next().unwrap_or("").to_string();
	let header_lines: Vec<&[u8]> = lines.collect();
	let headers = parse_header_lines(&header_lines)?;
	Ok(ParseProgress::Complete {
		value: ResponseHead {
			http_version: version.to_string(),
			status_code,
			status_message: reason,
			headers,
		},
		consumed: end,
	})
}

/// Re-emits the forwarded request: drops hop-by-hop headers, rewrites
/// `Host` from the resolved authority, and always uses origin-form (even if
/// the client sent absolute-form, per spec §4.F "absolute vs relative
/// target").
pub fn serialize_request_head(
	method: &Method,
	path_and_query: &str,
	authority: &str,
	http_version: &str,
	headers: &OrderedHeaders,
	forward_upgrade: bool,
) -> Vec<u8> {
	let mut out = Vec::new();
	out.extend_from_slice(format!("{method} {path_and_query} {http_version}\r\n").as_bytes());
	out.extend_from_slice(format!("Host: {authority}\r\n").as_bytes());
	for (name, value) in headers.iter() {
		if name.eq_ignore_ascii_case("host") {
			continue;
		}
		if is_hop_by_hop(name, headers, forward_upgrade) {
			continue;
		}
		out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
	}
	out.extend_from_slice(b"\r\n");
	out
}

pub fn serialize_response_head(
	http_version: &str,
	status_code: u16,
	status_message: &str,
	headers: &OrderedHeaders,
) -> Vec<u8> {
	let mut out = Vec::new();
	out.extend_from_slice(
		format!("{http_version} {status_code} {status_message}\r\n").as_bytes(),
	);
	for (name, value) in headers.iter() {
		out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
	}
	out.extend_from_slice(b"\r\n");
	out
}

fn is_hop_by_hop(name: &str, headers: &OrderedHeaders, forward_upgrade: bool) -> bool {
	let lower = name.to_ascii_lowercase();
	if forward_upgrade && (lower == "upgrade" || lower == "connection") {
		return false;
	}
	if HOP_BY_HOP_HEADERS.contains(&lower.as_str()) {
		return true;
	}
	// Anything the `Connection` header names is hop-by-hop too.
	if let Some(conn) = headers.get("connection") {
		return conn.split(',').any(|tok| tok.trim().eq_ignore_ascii_case(&lower));
	}
	false
}

/// Whether a response carries a `close`-delimited body: no
/// `Transfer-Encoding: chunked` and no `Content-Length`.
pub fn is_close_delimited(headers: &OrderedHeaders) -> bool {
	headers.transfer_encoding_last().as_deref() != Some("chunked") && headers.content_length().is_none()
}

/// Decompresses `body` per `Content-Encoding`. Returns the bytes unchanged
/// (and `None` for the encoding) if `encoding` is `None`.
pub fn decompress(body: &[u8], encoding: CompressionEncoding) -> Result<Vec<u8>, CoreError> {
	match encoding {
		CompressionEncoding::Gzip => {
			let mut out = Vec::new();
			flate2::read::GzDecoder::new(body)
				.read_to_end(&mut out)
				.map_err(|e| CoreError::MalformedResponse(format!("gzip decode failed: {e}")))?;
			Ok(out)
		},
		CompressionEncoding::Deflate => {
			let mut out = Vec::new();
			flate2::read::DeflateDecoder::new(body)
				.read_to_end(&mut out)
				.map_err(|e| CoreError::MalformedResponse(format!("deflate decode failed: {e}")))?;
			Ok(out)
		},
		CompressionEncoding::Brotli => {
			let mut out = Vec::new();
			brotli::BrotliDecompress(&mut std::io::Cursor::new(body), &mut out)
				.map_err(|e| CoreError::MalformedResponse(format!("brotli decode failed: {e}")))?;
			Ok(out)
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_absolute_form_get() {
		let raw = b"GET http://httpbin.org/get HTTP/1.1\r\nHost: httpbin.org\r\n\r\n";
		let ParseProgress::Complete { value, consumed } = parse_request_head(raw).unwrap() else {
			panic!("expected complete parse");
		};
		assert_eq!(consumed, raw.len());
		assert_eq!(value.method, Method::Get);
		assert_eq!(
			value.target,
			RequestTarget::Absolute {
				url: "http://httpbin.org/get".into()
			}
		);
	}

	#[test]
	fn parses_connect_authority_form() {
		let raw = b"CONNECT api.example.com:443 HTTP/1.1\r\n\r\n";
		let ParseProgress::Complete { value, .. } = parse_request_head(raw).unwrap() else {
			panic!("expected complete parse");
		};
		assert_eq!(
			value.target,
			RequestTarget::Authority {
				host: "api.example.com".into(),
				port: 443
			}
		);
	}

	#[test]
	fn incomplete_head_waits_for_more_bytes() {
		let raw = b"GET / HTTP/1.1\r\nHost: example.com\r\n";
		assert!(matches!(
			parse_request_head(raw).unwrap(),
			ParseProgress::Incomplete
		));
	}

	#[test]
	fn rejects_folded_header_lines() {
		let raw = b"GET / HTTP/1.1\r\nX-Foo: a\r\n b\r\n\r\n";
		assert!(parse_request_head(raw).is_err());
	}

	#[test]
	fn parses_response_head_and_preserves_set_cookie_list() {
		let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Length: 0\r\n\r\n";
		let ParseProgress::Complete { value, .. } = parse_response_head(raw).unwrap() else {
			panic!("expected complete parse");
		};
		assert_eq!(value.status_code, 200);
		assert_eq!(value.headers.get_all("set-cookie").count(), 2);
	}

	#[test]
	fn serialize_strips_hop_by_hop_and_rewrites_host() {
		let mut headers = OrderedHeaders::new();
		headers.append("Connection", "keep-alive");
		headers.append("Proxy-Connection", "keep-alive");
		headers.append("X-Custom", "1");
		let out = serialize_request_head(
			&Method::Get,
			"/get",
			"httpbin.org",
			"HTTP/1.1",
			&headers,
			false,
		);
		let text = String::from_utf8(out).unwrap();
		assert!(text.starts_with("GET /get HTTP/1.1\r\n"));
		assert!(text.contains("Host: httpbin.org\r\n"));
		assert!(!text.contains("Connection:"));
		assert!(!text.contains("Proxy-Connection:"));
		assert!(text.contains("X-Custom: 1\r\n"));
	}

	#[test]
	fn close_delimited_detection() {
		let mut headers = OrderedHeaders::new();
		assert!(is_close_delimited(&headers));
		headers.append("Content-Length", "10");
		assert!(!is_close_delimited(&headers));
	}
}
