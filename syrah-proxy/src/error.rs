//! Error taxonomy for the async engine (spec §7), layered on top of
//! [`syrah_core::CoreError`]. Each variant still exposes a stable
//! [`ErrorKind`] via [`ProxyError::kind`] so the event bus and the
//! `X-Syrah-Error` response header can match on a tag rather than parsing
//! `Display` text.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	ConfigError,
	BindFailed,
	UpstreamDialFailed,
	UpstreamResetDuringRequest,
	UpstreamResetDuringResponse,
	MalformedRequest,
	MalformedResponse,
	TlsHandshakeFailed,
	CertificateIssueFailed,
	RuleActionFailed,
	BreakpointAborted,
	ThrottleCancelled,
	Timeout,
}

#[derive(Debug, Error)]
pub enum ProxyError {
	#[error("config error: {0}")]
	Config(String),

	#[error("bind failed on {address}: {source}")]
	BindFailed {
		address: String,
		#[source]
		source: std::io::Error,
	},

	#[error("upstream dial to {authority} failed: {source}")]
	UpstreamDialFailed {
		authority: String,
		#[source]
		source: std::io::Error,
	},

	#[error("upstream connection reset while sending the request")]
	UpstreamResetDuringRequest,

	#[error("upstream connection reset while reading the response")]
	UpstreamResetDuringResponse,

	#[error(transparent)]
	MalformedRequest(#[from] MalformedRequestError),

	#[error("malformed response: {0}")]
	MalformedResponse(String),

	/// `upstream = true` for the proxy->origin leg, `false` for the
	/// client->proxy leg, matching §7's "client side or upstream side".
	#[error("TLS handshake failed ({}): {source}", if *.upstream { "upstream" } else { "client" })]
	TlsHandshakeFailed {
		upstream: bool,
		#[source]
		source: std::io::Error,
	},

	#[error("certificate issuance failed: {0}")]
	CertificateIssueFailed(String),

	#[error("rule action failed: {0}")]
	RuleActionFailed(String),

	#[error("breakpoint aborted by controller")]
	BreakpointAborted,

	#[error("throttle cancelled")]
	ThrottleCancelled,

	#[error("operation timed out: {0}")]
	Timeout(String),

	#[error(transparent)]
	Core(#[from] syrah_core::CoreError),
}

/// Wraps a `CoreError::MalformedRequest`/`MalformedResponse`-shaped parse
/// failure from `syrah-core` so the `#[from]` on `ProxyError::MalformedRequest`
/// doesn't collide with `ProxyError::Core`'s blanket `CoreError` conversion.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MalformedRequestError(pub String);

impl ProxyError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			ProxyError::Config(_) => ErrorKind::ConfigError,
			ProxyError::BindFailed { .. } => ErrorKind::BindFailed,
			ProxyError::UpstreamDialFailed { .. } => ErrorKind::UpstreamDialFailed,
			ProxyError::UpstreamResetDuringRequest => ErrorKind::UpstreamResetDuringRequest,
			ProxyError::UpstreamResetDuringResponse => ErrorKind::UpstreamResetDuringResponse,
			ProxyError::MalformedRequest(_) => ErrorKind::MalformedRequest,
			ProxyError::MalformedResponse(_) => ErrorKind::MalformedResponse,
			ProxyError::TlsHandshakeFailed { .. } => ErrorKind::TlsHandshakeFailed,
			ProxyError::CertificateIssueFailed(_) => ErrorKind::CertificateIssueFailed,
			ProxyError::RuleActionFailed(_) => ErrorKind::RuleActionFailed,
			ProxyError::BreakpointAborted => ErrorKind::BreakpointAborted,
			ProxyError::ThrottleCancelled => ErrorKind::ThrottleCancelled,
			ProxyError::Timeout(_) => ErrorKind::Timeout,
			ProxyError::Core(e) => match e.kind() {
				syrah_core::ErrorKind::ConfigError => ErrorKind::ConfigError,
				syrah_core::ErrorKind::MalformedRequest => ErrorKind::MalformedRequest,
				syrah_core::ErrorKind::MalformedResponse => ErrorKind::MalformedResponse,
				syrah_core::ErrorKind::CertificateIssueFailed => ErrorKind::CertificateIssueFailed,
				syrah_core::ErrorKind::RuleActionFailed => ErrorKind::RuleActionFailed,
				syrah_core::ErrorKind::Timeout => ErrorKind::Timeout,
			},
		}
	}

	/// The status line a malformed/failed flow sends back to the client,
	/// per §7's "user-visible behavior".
	pub fn client_status(&self) -> (u16, &'static str) {
		match self.kind() {
			ErrorKind::MalformedRequest => (400, "Bad Request"),
			ErrorKind::UpstreamDialFailed
			| ErrorKind::UpstreamResetDuringRequest
			| ErrorKind::UpstreamResetDuringResponse
			| ErrorKind::TlsHandshakeFailed => (502, "Bad Gateway"),
			ErrorKind::Timeout => (504, "Gateway Timeout"),
			_ => (502, "Bad Gateway"),
		}
	}
}

pub type ProxyResult<T> = Result<T, ProxyError>;
