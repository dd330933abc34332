//! Chunked transfer-coding decode/encode (spec §4.F / §8 round-trip property).

use bytes::{Bytes, BytesMut};

use crate::error::CoreError;

const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024; // defensive cap against hostile size headers

/// Decodes a complete chunked body (`size CRLF data CRLF ... 0 CRLF CRLF`).
/// The caller is responsible for framing a full buffer off the wire first;
/// this is the pure decode half of the streaming reader.
pub fn decode(input: &[u8]) -> Result<Bytes, CoreError> {
	let mut out = BytesMut::new();
	let mut pos = 0usize;
	loop {
		let line_end = find_crlf(input, pos).ok_or_else(|| {
			CoreError::MalformedResponse("chunked: missing size line terminator".into())
		})?;
		let size_line = &input[pos..line_end];
		let size_str = std::str::from_utf8(size_line)
			.map_err(|_| CoreError::MalformedResponse("chunked: invalid size line".into()))?;
		let size_hex = size_str.split(';').next().unwrap_or("").trim();
		let size = u64::from_str_radix(size_hex, 16)
			.map_err(|_| CoreError::MalformedResponse(format!("chunked: bad size {size_hex}")))?;
		if size > MAX_CHUNK_SIZE {
			return Err(CoreError::MalformedResponse("chunked: size overflow".into()));
		}
		pos = line_end + 2;
		if size == 0 {
			// trailers: consume lines until an empty line
			loop {
				let Some(end) = find_crlf(input, pos) else {
					return Err(CoreError::MalformedResponse("chunked: missing trailer terminator".into()));
				};
				if end == pos {
					pos = end + 2;
					break;
				}
				pos = end + 2;
			}
			break;
		}
		let size = size as usize;
		if pos + size + 2 > input.len() {
			return Err(CoreError::MalformedResponse("chunked: truncated chunk data".into()));
		}
		out.extend_from_slice(&input[pos..pos + size]);
		pos += size;
		if &input[pos..pos + 2] != b"\r\n" {
			return Err(CoreError::MalformedResponse("chunked: missing chunk terminator".into()));
		}
		pos += 2;
	}
	Ok(out.freeze())
}

fn find_crlf(input: &[u8], from: usize) -> Option<usize> {
	input[from..]
		.windows(2)
		.position(|w| w == b"\r\n")
		.map(|p| p + from)
}

/// Encodes `data` as a single chunk followed by the terminating zero-chunk.
pub fn encode(data: &[u8]) -> Bytes {
	let mut out = BytesMut::with_capacity(data.len() + 32);
	out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
	out.extend_from_slice(data);
	out.extend_from_slice(b"\r\n0\r\n\r\n");
	out.freeze()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decode_three_chunks() {
		let input = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
		let out = decode(input).unwrap();
		assert_eq!(out, Bytes::from_static(b"hello world"));
	}

	#[test]
	fn round_trip_arbitrary_bytes() {
		let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
		let encoded = encode(&data);
		let decoded = decode(&encoded).unwrap();
		assert_eq!(decoded.as_ref(), data.as_slice());
	}

	#[test]
	fn empty_body() {
		let encoded = encode(&[]);
		let decoded = decode(&encoded).unwrap();
		assert!(decoded.is_empty());
	}

	#[test]
	fn overflow_size_rejected() {
		let input = b"FFFFFFFFFF\r\nxx\r\n0\r\n\r\n";
		assert!(decode(input).is_err());
	}

	#[test]
	fn trailers_are_consumed() {
		let input = b"5\r\nhello\r\n0\r\nX-Trailer: 1\r\n\r\n";
		let out = decode(input).unwrap();
		assert_eq!(out, Bytes::from_static(b"hello"));
	}
}
