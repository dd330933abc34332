//! Error taxonomy for the sans-I/O half of the proxy.
//!
//! Each variant carries a stable [`ErrorKind`] tag (via [`CoreError::kind`])
//! decoupled from the `Display` message, so callers (the event bus, the
//! `X-Syrah-Error` header) can match on the tag without parsing text.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	ConfigError,
	MalformedRequest,
	MalformedResponse,
	CertificateIssueFailed,
	RuleActionFailed,
	Timeout,
}

#[derive(Debug, Error)]
pub enum CoreError {
	#[error("config error: {0}")]
	Config(String),

	#[error("malformed request: {0}")]
	MalformedRequest(String),

	#[error("malformed response: {0}")]
	MalformedResponse(String),

	#[error("key generation failed: {0}")]
	KeyGenFailed(String),

	#[error("certificate signing failed: {0}")]
	SigningFailed(String),

	#[error("unsupported certificate export format: {0}")]
	InvalidFormat(String),

	#[error("rule action failed: {0}")]
	RuleActionFailed(String),

	#[error("operation timed out: {0}")]
	Timeout(String),
}

impl CoreError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			CoreError::Config(_) => ErrorKind::ConfigError,
			CoreError::MalformedRequest(_) => ErrorKind::MalformedRequest,
			CoreError::MalformedResponse(_) => ErrorKind::MalformedResponse,
			CoreError::KeyGenFailed(_) | CoreError::SigningFailed(_) | CoreError::InvalidFormat(_) => {
				ErrorKind::CertificateIssueFailed
			},
			CoreError::RuleActionFailed(_) => ErrorKind::RuleActionFailed,
			CoreError::Timeout(_) => ErrorKind::Timeout,
		}
	}
}

pub type CoreResult<T> = Result<T, CoreError>;
