use serde::{Deserialize, Serialize};

use super::headers::OrderedHeaders;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
	Informational,
	Success,
	Redirection,
	ClientError,
	ServerError,
	Unknown,
}

impl StatusCategory {
	pub fn of(status_code: u16) -> StatusCategory {
		match status_code / 100 {
			1 => StatusCategory::Informational,
			2 => StatusCategory::Success,
			3 => StatusCategory::Redirection,
			4 => StatusCategory::ClientError,
			5 => StatusCategory::ServerError,
			_ => StatusCategory::Unknown,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionEncoding {
	Gzip,
	Deflate,
	Brotli,
}

impl CompressionEncoding {
	pub fn from_header_token(token: &str) -> Option<CompressionEncoding> {
		match token.trim().to_ascii_lowercase().as_str() {
			"gzip" | "x-gzip" => Some(CompressionEncoding::Gzip),
			"deflate" => Some(CompressionEncoding::Deflate),
			"br" => Some(CompressionEncoding::Brotli),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub status_code: u16,
	pub status_message: String,
	pub headers: OrderedHeaders,
	#[serde(with = "crate::model::bytes_b64")]
	pub body_bytes: bytes::Bytes,
	pub was_compressed: bool,
	pub compression_encoding: Option<CompressionEncoding>,
	pub timestamp_ns: u128,
}

impl Response {
	pub fn status_category(&self) -> StatusCategory {
		StatusCategory::of(self.status_code)
	}

	pub fn formatted_size(&self) -> String {
		format_size(self.body_bytes.len() as u64)
	}

	/// Builds a [`Response`] from a parsed wire head and a decoded body.
	/// `was_compressed`/`compression_encoding` record whatever the original
	/// `Content-Encoding` indicated, independent of whether `body_bytes` has
	/// already been decompressed for display.
	pub fn from_parsed(
		status_code: u16,
		status_message: String,
		headers: OrderedHeaders,
		body_bytes: bytes::Bytes,
		compression_encoding: Option<CompressionEncoding>,
		timestamp_ns: u128,
	) -> Response {
		Response {
			status_code,
			status_message,
			headers,
			body_bytes,
			was_compressed: compression_encoding.is_some(),
			compression_encoding,
			timestamp_ns,
		}
	}
}

pub fn format_size(bytes: u64) -> String {
	const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
	let mut size = bytes as f64;
	let mut unit = 0;
	while size >= 1024.0 && unit < UNITS.len() - 1 {
		size /= 1024.0;
		unit += 1;
	}
	if unit == 0 {
		format!("{bytes} {}", UNITS[unit])
	} else {
		format!("{size:.1} {}", UNITS[unit])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_category_buckets() {
		assert_eq!(StatusCategory::of(204), StatusCategory::Success);
		assert_eq!(StatusCategory::of(404), StatusCategory::ClientError);
		assert_eq!(StatusCategory::of(502), StatusCategory::ServerError);
	}

	#[test]
	fn formatted_size_units() {
		assert_eq!(format_size(17), "17 B");
		assert_eq!(format_size(2048), "2.0 KB");
	}
}
