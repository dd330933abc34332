use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::headers::OrderedHeaders;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	Get,
	Post,
	Put,
	Patch,
	Delete,
	Head,
	Options,
	Trace,
	Connect,
}

impl Method {
	pub fn as_str(&self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
			Method::Head => "HEAD",
			Method::Options => "OPTIONS",
			Method::Trace => "TRACE",
			Method::Connect => "CONNECT",
		}
	}
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for Method {
	type Err = crate::error::CoreError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"GET" => Method::Get,
			"POST" => Method::Post,
			"PUT" => Method::Put,
			"PATCH" => Method::Patch,
			"DELETE" => Method::Delete,
			"HEAD" => Method::Head,
			"OPTIONS" => Method::Options,
			"TRACE" => Method::Trace,
			"CONNECT" => Method::Connect,
			other => {
				return Err(crate::error::CoreError::MalformedRequest(format!(
					"unknown method {other}"
				)));
			},
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
	Http,
	Https,
}

impl fmt::Display for Scheme {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Scheme::Http => f.write_str("http"),
			Scheme::Https => f.write_str("https"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
	Json,
	Xml,
	Html,
	Text,
	FormUrlEncoded,
	MultipartForm,
	OctetStream,
	Image,
	Other,
}

impl ContentType {
	pub fn from_header(value: Option<&str>) -> ContentType {
		let Some(v) = value else {
			return ContentType::Other;
		};
		let v = v.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
		match v.as_str() {
			"application/json" | "text/json" => ContentType::Json,
			"application/xml" | "text/xml" => ContentType::Xml,
			"text/html" => ContentType::Html,
			"text/plain" => ContentType::Text,
			"application/x-www-form-urlencoded" => ContentType::FormUrlEncoded,
			"multipart/form-data" => ContentType::MultipartForm,
			"application/octet-stream" => ContentType::OctetStream,
			other if other.starts_with("image/") => ContentType::Image,
			_ => ContentType::Other,
		}
	}
}

/// Parses a URL-encoded query string into an ordered multimap, preserving
/// repeat-key order (`a=1&a=2` -> `{"a": ["1", "2"]}`).
pub fn parse_query_params(query: &str) -> BTreeMap<String, Vec<String>> {
	let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
	if query.is_empty() {
		return out;
	}
	for pair in query.split('&') {
		if pair.is_empty() {
			continue;
		}
		let mut it = pair.splitn(2, '=');
		let k = it.next().unwrap_or("");
		let v = it.next().unwrap_or("");
		out
			.entry(percent_decode(k))
			.or_default()
			.push(percent_decode(v));
	}
	out
}

fn percent_decode(s: &str) -> String {
	let bytes = s.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;
	while i < bytes.len() {
		match bytes[i] {
			b'+' => {
				out.push(b' ');
				i += 1;
			},
			b'%' if i + 2 < bytes.len() => {
				if let Ok(byte) = u8::from_str_radix(
					std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""),
					16,
				) {
					out.push(byte);
					i += 3;
				} else {
					out.push(bytes[i]);
					i += 1;
				}
			},
			b => {
				out.push(b);
				i += 1;
			},
		}
	}
	String::from_utf8_lossy(&out).into_owned()
}

/// Parses the `Cookie` request header into an ordered list of `(name, value)`.
pub fn parse_cookies(header: Option<&str>) -> Vec<(String, String)> {
	let Some(header) = header else {
		return Vec::new();
	};
	header
		.split(';')
		.filter_map(|part| {
			let part = part.trim();
			if part.is_empty() {
				return None;
			}
			let mut it = part.splitn(2, '=');
			let name = it.next()?.trim().to_string();
			let value = it.next().unwrap_or("").trim().to_string();
			Some((name, value))
		})
		.collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	pub id: Uuid,
	pub method: Method,
	pub scheme: Scheme,
	pub host: String,
	pub port: u16,
	pub path: String,
	pub query_string: String,
	pub query_params: BTreeMap<String, Vec<String>>,
	pub headers: OrderedHeaders,
	#[serde(with = "crate::model::bytes_b64")]
	pub body_bytes: bytes::Bytes,
	pub content_type: ContentType,
	pub content_length: Option<u64>,
	pub http_version: String,
	pub timestamp_ns: u128,
	pub is_secure: bool,
	pub cookies: Vec<(String, String)>,
}

impl Request {
	pub fn url(&self) -> String {
		let default_port = match self.scheme {
			Scheme::Http => 80,
			Scheme::Https => 443,
		};
		let authority = if self.port == default_port {
			self.host.clone()
		} else {
			format!("{}:{}", self.host, self.port)
		};
		format!("{}://{}{}", self.scheme, authority, self.path_and_query())
	}

	pub fn path_and_query(&self) -> String {
		if self.query_string.is_empty() {
			self.path.clone()
		} else {
			format!("{}?{}", self.path, self.query_string)
		}
	}

	/// The form the `Url` rule matcher is evaluated against: `host[:port]` +
	/// path + query, with no `scheme://` prefix. A single `*` in a matcher
	/// pattern (spec §4.E) is documented to stop at a `/`; with the scheme
	/// included, the leading `*` in a pattern like `*api.example.com/users*`
	/// would stall on the `//` of `https://` and never match. Dropping the
	/// scheme makes those patterns resolve against the host authority first.
	pub fn match_target(&self) -> String {
		let default_port = match self.scheme {
			Scheme::Http => 80,
			Scheme::Https => 443,
		};
		let authority = if self.port == default_port {
			self.host.clone()
		} else {
			format!("{}:{}", self.host, self.port)
		};
		format!("{authority}{}", self.path_and_query())
	}

	/// `group_path`: first path segment, `/` if empty (used for grouping UI).
	pub fn group_path(&self) -> String {
		let trimmed = self.path.trim_start_matches('/');
		match trimmed.split('/').next() {
			Some(seg) if !seg.is_empty() => format!("/{seg}"),
			_ => "/".to_string(),
		}
	}

	pub fn group_host(&self) -> &str {
		&self.host
	}

	/// Builds a [`Request`] from a parsed wire head plus the resolved
	/// authority/scheme and a fully-read body. Pure assembly; no I/O.
	#[allow(clippy::too_many_arguments)]
	pub fn from_parsed(
		id: uuid::Uuid,
		method: Method,
		scheme: Scheme,
		host: String,
		port: u16,
		path: String,
		query_string: String,
		headers: OrderedHeaders,
		body_bytes: bytes::Bytes,
		http_version: String,
		timestamp_ns: u128,
		is_secure: bool,
	) -> Request {
		let query_params = parse_query_params(&query_string);
		let cookies = parse_cookies(headers.get("cookie"));
		let content_type = ContentType::from_header(headers.get("content-type"));
		let content_length = headers.content_length();
		Request {
			id,
			method,
			scheme,
			host,
			port,
			path,
			query_string,
			query_params,
			headers,
			body_bytes,
			content_type,
			content_length,
			http_version,
			timestamp_ns,
			is_secure,
			cookies,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_params_preserve_repeats() {
		let q = parse_query_params("a=1&b=2&a=3");
		assert_eq!(q.get("a").unwrap(), &vec!["1".to_string(), "3".to_string()]);
	}

	#[test]
	fn cookies_parse_multiple() {
		let c = parse_cookies(Some("a=1; b=2"));
		assert_eq!(
			c,
			vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
		);
	}

	#[test]
	fn content_type_from_header_strips_params() {
		assert_eq!(
			ContentType::from_header(Some("application/json; charset=utf-8")),
			ContentType::Json
		);
	}

	#[test]
	fn group_path_handles_root() {
		let mut req = sample();
		req.path = "/".into();
		assert_eq!(req.group_path(), "/");
		req.path = "/v1/users/5".into();
		assert_eq!(req.group_path(), "/v1");
	}

	fn sample() -> Request {
		Request {
			id: Uuid::nil(),
			method: Method::Get,
			scheme: Scheme::Http,
			host: "example.com".into(),
			port: 80,
			path: "/".into(),
			query_string: "".into(),
			query_params: BTreeMap::new(),
			headers: OrderedHeaders::new(),
			body_bytes: bytes::Bytes::new(),
			content_type: ContentType::Other,
			content_length: None,
			http_version: "HTTP/1.1".into(),
			timestamp_ns: 0,
			is_secure: false,
			cookies: Vec::new(),
		}
	}
}
