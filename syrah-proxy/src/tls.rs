//! TLS plumbing (spec §4.G): a `rustls::server::ResolvesServerCert` that
//! mints (or returns a cached) leaf certificate from the SNI hostname via
//! [`syrah_core::ca::CertificateAuthority`], and the upstream `ClientConfig`
//! used to originate a fresh TLS session to the real origin once the client
//! side of the MITM has been terminated.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, DigitallySignedStruct, ServerConfig, SignatureScheme};
use syrah_core::ca::CertificateAuthority;

/// Resolves a MITM leaf certificate per accepted TLS connection, keyed by
/// the ClientHello's SNI. Invariant (vi): subject CN equals the SNI host.
pub struct MitmCertResolver {
	ca: Arc<CertificateAuthority>,
}

impl MitmCertResolver {
	pub fn new(ca: Arc<CertificateAuthority>) -> Self {
		MitmCertResolver { ca }
	}
}

impl std::fmt::Debug for MitmCertResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MitmCertResolver").finish_non_exhaustive()
	}
}

impl ResolvesServerCert for MitmCertResolver {
	fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
		let sni = client_hello.server_name()?;
		let issued = self.ca.issue_leaf(sni, &[]).ok()?;
		let cert_der = CertificateDer::from(issued.der.clone());
		let key_der = PrivatePkcs8KeyDer::from(issued.key_der.clone());
		let signing_key = rustls::crypto::ring::sign::any_supported_type(&PrivateKeyDer::Pkcs8(key_der)).ok()?;
		Some(Arc::new(CertifiedKey::new(vec![cert_der], signing_key)))
	}
}

/// Builds the server-side TLS config for the `TLS_MITM` state: no client
/// auth, SNI-keyed leaf resolution through `resolver`.
pub fn server_config(ca: Arc<CertificateAuthority>) -> Arc<ServerConfig> {
	let mut config = ServerConfig::builder()
		.with_no_client_auth()
		.with_cert_resolver(Arc::new(MitmCertResolver::new(ca)));
	config.alpn_protocols = vec![b"http/1.1".to_vec()];
	Arc::new(config)
}

/// A debugging proxy's MITM purpose is to decrypt traffic for inspection,
/// not to vouch for the origin's identity to a downstream client — the
/// client already trusts *our* minted leaf, not the origin's real chain.
/// Upstream connections therefore don't verify the origin's certificate; a
/// compromised/self-signed origin can still be inspected, which is the
/// point. Recorded as an Open Question resolution in `DESIGN.md`.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn verify_tls13_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		vec![
			SignatureScheme::RSA_PKCS1_SHA256,
			SignatureScheme::RSA_PKCS1_SHA384,
			SignatureScheme::RSA_PKCS1_SHA512,
			SignatureScheme::ECDSA_NISTP256_SHA256,
			SignatureScheme::ECDSA_NISTP384_SHA384,
			SignatureScheme::RSA_PSS_SHA256,
			SignatureScheme::RSA_PSS_SHA384,
			SignatureScheme::RSA_PSS_SHA512,
			SignatureScheme::ED25519,
		]
	}
}

pub fn upstream_client_config() -> Arc<ClientConfig> {
	let mut config = ClientConfig::builder()
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
		.with_no_client_auth();
	config.alpn_protocols = vec![b"http/1.1".to_vec()];
	Arc::new(config)
}

/// Installs `ring` as the process-wide default crypto provider. Must run
/// once before any `rustls::ServerConfig`/`ClientConfig` is built; the root
/// `syrah` binary calls this from `main` before starting the engine.
pub fn install_crypto_provider() {
	let _ = rustls::crypto::ring::default_provider().install_default();
}

