//! Wire-level read loops that drive `syrah_core::http1`'s pure parsers off a
//! live socket. Kept separate from `syrah_core` because it owns actual I/O;
//! `syrah_core` stays sans-I/O per its own module doc.

use bytes::{Bytes, BytesMut};
use syrah_core::http1::{self, ParseProgress, RequestHead, ResponseHead};
use syrah_core::model::response::CompressionEncoding;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{MalformedRequestError, ProxyError, ProxyResult};

const MAX_HEAD_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 8 * 1024;

/// Any concrete duplex stream type the connection handler drives: a plain
/// `TcpStream`, or either half of a `tokio_rustls` `TlsStream`.
pub trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// Reads from `stream` into `buf` until a complete request head is present,
/// returning the parsed head and any body bytes already read past it
/// (pipelined data or the start of the body).
pub async fn read_request_head<S: IoStream + ?Sized>(
	stream: &mut S,
	buf: &mut BytesMut,
) -> ProxyResult<Option<(RequestHead, Bytes)>> {
	loop {
		match http1::parse_request_head(buf) {
			Ok(ParseProgress::Complete { value, consumed }) => {
				let leftover = buf.split_off(consumed).freeze();
				buf.clear();
				return Ok(Some((value, leftover)));
			},
			Ok(ParseProgress::Incomplete) => {},
			Err(e) => return Err(ProxyError::MalformedRequest(MalformedRequestError(e.to_string()))),
		}
		if buf.len() > MAX_HEAD_BYTES {
			return Err(ProxyError::MalformedRequest(MalformedRequestError(
				"request head exceeds maximum size".into(),
			)));
		}
		let mut chunk = [0u8; READ_CHUNK];
		let n = stream
			.read(&mut chunk)
			.await
			.map_err(|_| ProxyError::UpstreamResetDuringRequest)?;
		if n == 0 {
			return Ok(None);
		}
		buf.extend_from_slice(&chunk[..n]);
	}
}

pub async fn read_response_head<S: IoStream + ?Sized>(
	stream: &mut S,
	buf: &mut BytesMut,
) -> ProxyResult<Option<(ResponseHead, Bytes)>> {
	loop {
		match http1::parse_response_head(buf) {
			Ok(ParseProgress::Complete { value, consumed }) => {
				let leftover = buf.split_off(consumed).freeze();
				buf.clear();
				return Ok(Some((value, leftover)));
			},
			Ok(ParseProgress::Incomplete) => {},
			Err(e) => return Err(ProxyError::MalformedResponse(e.to_string())),
		}
		if buf.len() > MAX_HEAD_BYTES {
			return Err(ProxyError::MalformedResponse("response head exceeds maximum size".into()));
		}
		let mut chunk = [0u8; READ_CHUNK];
		let n = stream
			.read(&mut chunk)
			.await
			.map_err(|_| ProxyError::UpstreamResetDuringResponse)?;
		if n == 0 {
			return Ok(None);
		}
		buf.extend_from_slice(&chunk[..n]);
	}
}

pub enum BodyFraming {
	ContentLength(u64),
	Chunked,
	CloseDelimited,
}

pub fn select_framing(headers: &syrah_core::model::OrderedHeaders) -> BodyFraming {
	if headers.transfer_encoding_last().as_deref() == Some("chunked") {
		BodyFraming::Chunked
	} else if let Some(len) = headers.content_length() {
		BodyFraming::ContentLength(len)
	} else {
		BodyFraming::CloseDelimited
	}
}

/// Reads a body of the given framing, given whatever bytes were already
/// buffered past the head (`leftover`). Errors propagate as the
/// response-reset variant since this is primarily used on the upstream leg;
/// callers reading a request body remap the error if needed.
pub async fn read_body<S: IoStream + ?Sized>(
	stream: &mut S,
	framing: BodyFraming,
	already_read: Bytes,
) -> ProxyResult<Bytes> {
	let mut leftover = BytesMut::from(&already_read[..]);
	match framing {
		BodyFraming::ContentLength(len) => {
			let len = len as usize;
			while leftover.len() < len {
				let mut chunk = [0u8; READ_CHUNK];
				let n = stream
					.read(&mut chunk)
					.await
					.map_err(|_| ProxyError::UpstreamResetDuringResponse)?;
				if n == 0 {
					return Err(ProxyError::UpstreamResetDuringResponse);
				}
				leftover.extend_from_slice(&chunk[..n]);
			}
			leftover.truncate(len);
			Ok(leftover.freeze())
		},
		BodyFraming::Chunked => {
			// The chunked codec consumes a self-delimited grammar ending in
			// "0\r\n\r\n"; read until that terminator is present, then hand
			// the whole block to the pure decoder.
			while !contains_terminator(&leftover) {
				let mut chunk = [0u8; READ_CHUNK];
				let n = stream
					.read(&mut chunk)
					.await
					.map_err(|_| ProxyError::UpstreamResetDuringResponse)?;
				if n == 0 {
					return Err(ProxyError::UpstreamResetDuringResponse);
				}
				leftover.extend_from_slice(&chunk[..n]);
			}
			http1::chunked::decode(&leftover).map_err(ProxyError::from)
		},
		BodyFraming::CloseDelimited => {
			loop {
				let mut chunk = [0u8; READ_CHUNK];
				let n = stream.read(&mut chunk).await.unwrap_or(0);
				if n == 0 {
					break;
				}
				leftover.extend_from_slice(&chunk[..n]);
			}
			Ok(leftover.freeze())
		},
	}
}

fn contains_terminator(buf: &[u8]) -> bool {
	buf.windows(5).any(|w| w == b"0\r\n\r\n")
}

/// Decompresses `body` if `Content-Encoding` names a supported scheme and
/// `decompress` is enabled, recording which encoding it was.
pub fn maybe_decompress(
	headers: &syrah_core::model::OrderedHeaders,
	body: Bytes,
	decompress: bool,
) -> ProxyResult<(Bytes, Option<CompressionEncoding>)> {
	let Some(token) = headers.get("content-encoding") else {
		return Ok((body, None));
	};
	let Some(encoding) = CompressionEncoding::from_header_token(token) else {
		return Ok((body, None));
	};
	if !decompress {
		return Ok((body, Some(encoding)));
	}
	let decoded = http1::decompress(&body, encoding)?;
	Ok((Bytes::from(decoded), Some(encoding)))
}

pub async fn write_all<S: IoStream + ?Sized>(stream: &mut S, bytes: &[u8]) -> ProxyResult<()> {
	stream.write_all(bytes).await.map_err(|_| ProxyError::UpstreamResetDuringRequest)?;
	stream.flush().await.map_err(|_| ProxyError::UpstreamResetDuringRequest)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn reads_request_head_split_across_reads() {
		let (mut client, mut server) = tokio::io::duplex(1024);
		let task = tokio::spawn(async move {
			let mut buf = BytesMut::new();
			read_request_head(&mut server, &mut buf).await
		});
		client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;
		client.write_all(b"Host: example.com\r\n\r\n").await.unwrap();
		let (head, leftover) = task.await.unwrap().unwrap().unwrap();
		assert_eq!(head.http_version, "HTTP/1.1");
		assert!(leftover.is_empty());
	}
}
