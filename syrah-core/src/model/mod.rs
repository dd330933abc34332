pub mod flow;
pub mod headers;
pub mod matcher;
pub mod request;
pub mod response;
pub mod rule;
pub mod session;

pub use flow::{Flow, FlowState, Protocol, WsMessage};
pub use headers::OrderedHeaders;
pub use matcher::Matcher;
pub use request::{ContentType, Method, Request, Scheme};
pub use response::{Response, StatusCategory};
pub use rule::{Rule, RuleAction, RulePhase, RuleType};
pub use session::{Session, SessionState};

/// Base64 (de)serialization for `bytes::Bytes`, used for every body field so
/// flow snapshots remain plain JSON on the event bus / HAR export without a
/// lossy UTF-8 round-trip.
pub mod bytes_b64 {
	use base64::Engine;
	use base64::engine::general_purpose::STANDARD;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &bytes::Bytes, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bytes::Bytes, D::Error> {
		let s = String::deserialize(d)?;
		STANDARD
			.decode(s.as_bytes())
			.map(bytes::Bytes::from)
			.map_err(serde::de::Error::custom)
	}
}
