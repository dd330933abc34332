//! Sans-I/O half of the proxy: ASN.1/DER encoding, the certificate
//! authority's key generation and signing, the flow/session data model, the
//! filter engine, the rule matcher, and HTTP/1.x parsing and serialization.
//!
//! Nothing in this crate touches a socket or a `tokio` runtime; callers in
//! `syrah-proxy` drive all I/O and hand bytes in and out.

pub mod asn1;
pub mod ca;
pub mod error;
pub mod filter;
pub mod http1;
pub mod model;
pub mod prelude;
pub mod strng;

pub use error::{CoreError, CoreResult, ErrorKind};
pub use model::{Flow, OrderedHeaders, Request, Response, Rule, Session};
pub use strng::Strng;
