//! HTTP Archive (HAR) 1.2 export (spec §6 "peripheral"): one `entries[]`
//! row per completed flow, timestamps as ISO-8601, compressed bodies
//! base-64. A thin serde-only view over [`syrah_core::Flow`]; nothing here
//! touches a socket.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use syrah_core::Flow;

#[derive(Debug, Serialize)]
pub struct Har {
	pub log: HarLog,
}

#[derive(Debug, Serialize)]
pub struct HarLog {
	pub version: &'static str,
	pub creator: HarCreator,
	pub entries: Vec<HarEntry>,
}

#[derive(Debug, Serialize)]
pub struct HarCreator {
	pub name: String,
	pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HarEntry {
	#[serde(rename = "startedDateTime")]
	pub started_date_time: String,
	pub time: f64,
	pub request: HarRequest,
	pub response: HarResponse,
	pub cache: serde_json::Value,
	pub timings: HarTimings,
}

#[derive(Debug, Serialize)]
pub struct HarNameValue {
	pub name: String,
	pub value: String,
}

#[derive(Debug, Serialize)]
pub struct HarRequest {
	pub method: String,
	pub url: String,
	#[serde(rename = "httpVersion")]
	pub http_version: String,
	pub headers: Vec<HarNameValue>,
	#[serde(rename = "queryString")]
	pub query_string: Vec<HarNameValue>,
	pub cookies: Vec<HarNameValue>,
	#[serde(rename = "postData", skip_serializing_if = "Option::is_none")]
	pub post_data: Option<HarPostData>,
	#[serde(rename = "headersSize")]
	pub headers_size: i64,
	#[serde(rename = "bodySize")]
	pub body_size: i64,
}

#[derive(Debug, Serialize)]
pub struct HarPostData {
	#[serde(rename = "mimeType")]
	pub mime_type: String,
	pub text: String,
}

#[derive(Debug, Serialize)]
pub struct HarResponse {
	pub status: u16,
	#[serde(rename = "statusText")]
	pub status_text: String,
	#[serde(rename = "httpVersion")]
	pub http_version: String,
	pub headers: Vec<HarNameValue>,
	pub cookies: Vec<HarNameValue>,
	pub content: HarContent,
	#[serde(rename = "redirectURL")]
	pub redirect_url: String,
	#[serde(rename = "headersSize")]
	pub headers_size: i64,
	#[serde(rename = "bodySize")]
	pub body_size: i64,
}

#[derive(Debug, Serialize)]
pub struct HarContent {
	pub size: i64,
	#[serde(rename = "mimeType")]
	pub mime_type: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub encoding: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct HarTimings {
	pub send: f64,
	pub wait: f64,
	pub receive: f64,
}

fn iso8601(timestamp_ns: u128) -> String {
	let nanos = timestamp_ns as i64;
	let dt = DateTime::<Utc>::from_timestamp(nanos / 1_000_000_000, (nanos % 1_000_000_000) as u32).unwrap_or_default();
	dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn headers_to_har(headers: &syrah_core::model::OrderedHeaders) -> Vec<HarNameValue> {
	headers
		.iter()
		.map(|(name, value)| HarNameValue {
			name: name.to_string(),
			value: value.to_string(),
		})
		.collect()
}

/// Renders the body as a HAR `content.text`: UTF-8 text inline, otherwise
/// base-64 with `encoding: "base64"` (per §6 "compressed bodies base-64").
fn body_text(body: &bytes::Bytes) -> (Option<String>, Option<&'static str>) {
	if body.is_empty() {
		return (None, None);
	}
	match std::str::from_utf8(body) {
		Ok(text) => (Some(text.to_string()), None),
		Err(_) => (Some(STANDARD.encode(body)), Some("base64")),
	}
}

fn entry_for(flow: &Flow) -> Option<HarEntry> {
	let response = flow.response.as_ref()?;
	let req = &flow.request;

	let query_string = req
		.query_params
		.iter()
		.flat_map(|(k, values)| values.iter().map(move |v| HarNameValue {
			name: k.clone(),
			value: v.clone(),
		}))
		.collect();
	let cookies = req
		.cookies
		.iter()
		.map(|(name, value)| HarNameValue {
			name: name.clone(),
			value: value.clone(),
		})
		.collect();
	let (post_text, _) = body_text(&req.body_bytes);
	let post_data = post_text.map(|text| HarPostData {
		mime_type: req.headers.get("content-type").unwrap_or("application/octet-stream").to_string(),
		text,
	});

	let (resp_text, resp_encoding) = body_text(&response.body_bytes);

	Some(HarEntry {
		started_date_time: iso8601(req.timestamp_ns),
		time: flow.duration_ms().unwrap_or(0.0),
		request: HarRequest {
			method: req.method.as_str().to_string(),
			url: req.url(),
			http_version: req.http_version.clone(),
			headers: headers_to_har(&req.headers),
			query_string,
			cookies,
			post_data,
			headers_size: -1,
			body_size: req.body_bytes.len() as i64,
		},
		response: HarResponse {
			status: response.status_code,
			status_text: response.status_message.clone(),
			http_version: req.http_version.clone(),
			headers: headers_to_har(&response.headers),
			cookies: Vec::new(),
			content: HarContent {
				size: response.body_bytes.len() as i64,
				mime_type: response.headers.get("content-type").unwrap_or("application/octet-stream").to_string(),
				text: resp_text,
				encoding: resp_encoding,
			},
			redirect_url: response.headers.get("location").unwrap_or("").to_string(),
			headers_size: -1,
			body_size: response.body_bytes.len() as i64,
		},
		cache: serde_json::json!({}),
		timings: HarTimings {
			send: 0.0,
			wait: flow.duration_ms().unwrap_or(0.0),
			receive: 0.0,
		},
	})
}

/// Whole-session export: one entry per flow that reached a response,
/// sorted by sequence number (insertion order in the ring already is, but
/// this survives any future reordering of `all_flows`).
pub fn export(product_name: &str, mut flows: Vec<Flow>) -> Har {
	flows.sort_by_key(|f| f.sequence_number);
	let entries = flows.iter().filter_map(entry_for).collect();
	Har {
		log: HarLog {
			version: "1.2",
			creator: HarCreator {
				name: product_name.to_string(),
				version: env!("CARGO_PKG_VERSION"),
			},
			entries,
		},
	}
}

#[cfg(test)]
mod tests {
	use bytes::Bytes;
	use syrah_core::model::request::{ContentType, Method, Scheme};
	use syrah_core::model::{OrderedHeaders, Request, Response};
	use uuid::Uuid;

	use super::*;

	fn completed_flow() -> Flow {
		let req = Request::from_parsed(
			Uuid::nil(),
			Method::Get,
			Scheme::Http,
			"example.com".into(),
			80,
			"/v1/items".into(),
			"q=1".into(),
			OrderedHeaders::new(),
			Bytes::new(),
			"HTTP/1.1".into(),
			1_000_000_000,
			false,
		);
		let mut headers = OrderedHeaders::new();
		headers.set("Content-Type", "application/json");
		let response = Response::from_parsed(200, "OK".into(), headers, Bytes::from_static(b"{\"ok\":true}"), None, 1_050_000_000);
		Flow::new(Uuid::new_v4(), Uuid::nil(), 1, req, syrah_core::model::flow::Protocol::Http, Uuid::nil(), 1_000_000_000).with_response(response, 1_050_000_000)
	}

	#[test]
	fn export_skips_flows_without_a_response() {
		let req = Request::from_parsed(
			Uuid::nil(),
			Method::Get,
			Scheme::Http,
			"example.com".into(),
			80,
			"/".into(),
			"".into(),
			OrderedHeaders::new(),
			Bytes::new(),
			"HTTP/1.1".into(),
			0,
			false,
		);
		let pending = Flow::new(Uuid::new_v4(), Uuid::nil(), 1, req, syrah_core::model::flow::Protocol::Http, Uuid::nil(), 0);
		let har = export("syrah", vec![pending]);
		assert!(har.log.entries.is_empty());
	}

	#[test]
	fn export_fills_in_method_url_and_status() {
		let har = export("syrah", vec![completed_flow()]);
		assert_eq!(har.log.entries.len(), 1);
		let entry = &har.log.entries[0];
		assert_eq!(entry.request.method, "GET");
		assert_eq!(entry.request.url, "http://example.com/v1/items?q=1");
		assert_eq!(entry.response.status, 200);
		assert_eq!(entry.response.content.text.as_deref(), Some("{\"ok\":true}"));
	}
}
