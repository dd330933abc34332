//! Certificate Authority (spec §4.B): root bootstrap, on-demand leaf
//! minting with an LRU cache, and DER/PEM export.
//!
//! Key generation uses the `rsa` crate (`rcgen` cannot itself generate RSA
//! keys, only sign with caller-supplied ones); the resulting PKCS#8 key is
//! handed to `rcgen` for `TBSCertificate` assembly and signing. The four
//! X.509v3 extensions the spec lists are hand-encoded through
//! [`crate::asn1`] and attached as `rcgen::CustomExtension`s, so the ASN.1
//! codec does real, exercised work rather than sitting unused behind
//! `rcgen`'s own typed extension builders.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Datelike, Utc};
use rand::RngCore;
use rcgen::{
	CertificateParams, CustomExtension, DistinguishedName, DnType, Issuer, KeyPair,
	PrivatePkcs8KeyDer,
};
use rsa::RsaPrivateKey;
use rsa::pkcs8::EncodePrivateKey;
use sha2::{Digest, Sha256};

use crate::asn1;
use crate::error::{CoreError, CoreResult};

const RSA_BITS: usize = 2048;
const ROOT_VALIDITY_DAYS: u64 = 365 * 10;
const LEAF_VALIDITY_DAYS: u64 = 365;
const LEAF_CACHE_CAPACITY: usize = 1000;
const LEAF_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// OID 2.5.29.19 `basicConstraints`.
const OID_BASIC_CONSTRAINTS: &[u64] = &[2, 5, 29, 19];
/// OID 2.5.29.15 `keyUsage`.
const OID_KEY_USAGE: &[u64] = &[2, 5, 29, 15];
/// OID 2.5.29.37 `extKeyUsage`.
const OID_EXT_KEY_USAGE: &[u64] = &[2, 5, 29, 37];
/// OID 2.5.29.17 `subjectAltName`.
const OID_SUBJECT_ALT_NAME: &[u64] = &[2, 5, 29, 17];
/// OID 1.3.6.1.5.5.7.3.1 `id-kp-serverAuth`.
const OID_SERVER_AUTH: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 3, 1];

// RFC 5280 §4.2.1.3 keyUsage bit numbers.
const KU_DIGITAL_SIGNATURE: u8 = 0;
const KU_KEY_ENCIPHERMENT: u8 = 2;
const KU_KEY_CERT_SIGN: u8 = 5;
const KU_CRL_SIGN: u8 = 6;

fn new_rsa_keypair() -> CoreResult<(RsaPrivateKey, KeyPair)> {
	let mut rng = rand::rngs::OsRng;
	let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
		.map_err(|e| CoreError::KeyGenFailed(e.to_string()))?;
	let pkcs8 = private
		.to_pkcs8_der()
		.map_err(|e| CoreError::KeyGenFailed(e.to_string()))?;
	let der = PrivatePkcs8KeyDer::from(pkcs8.as_bytes().to_vec());
	let key_pair = KeyPair::from_der_and_sign_algo(&der, &rcgen::PKCS_RSA_SHA256)
		.map_err(|e| CoreError::KeyGenFailed(e.to_string()))?;
	Ok((private, key_pair))
}

fn random_serial() -> Vec<u8> {
	// "random 63-bit positive serial": clear the top bit of a u64 so the
	// value is always non-negative in DER's two's-complement INTEGER.
	let mut bytes = [0u8; 8];
	rand::rngs::OsRng.fill_bytes(&mut bytes);
	bytes[0] &= 0x7f;
	bytes.to_vec()
}

/// Extracts `(year, month, day)` from a `chrono` timestamp so validity
/// windows can be built through `rcgen::date_time_ymd` without pulling in
/// the `time` crate directly just for date arithmetic `chrono` already does.
fn ymd(dt: chrono::DateTime<Utc>) -> (i32, u8, u8) {
	(dt.year(), dt.month() as u8, dt.day() as u8)
}

/// Leaf certificate + key pair plus the PEM/DER bytes and metadata callers
/// want without re-deriving them from `rcgen` types on every lookup.
#[derive(Clone)]
pub struct IssuedCert {
	pub der: Vec<u8>,
	pub key_der: Vec<u8>,
	pub pem: String,
	pub subject_cn: String,
	pub sans: Vec<String>,
	pub not_before_ns: u128,
	pub not_after_ns: u128,
}

struct CachedLeaf {
	cert: IssuedCert,
	inserted_at: Instant,
}

/// Hand-rolled LRU: capacity 1000, 24h TTL, evict-oldest-25%-when-full.
/// Guarded by a single mutex held only for map operations, never across
/// signing (§5's concurrency policy for the CA).
struct LeafCache {
	capacity: usize,
	// Insertion-ordered so "oldest" is simply "front of the map iteration
	// order"; `order` tracks that order explicitly since `HashMap` doesn't.
	entries: HashMap<String, CachedLeaf>,
	order: Vec<String>,
}

impl LeafCache {
	fn new(capacity: usize) -> Self {
		LeafCache {
			capacity,
			entries: HashMap::new(),
			order: Vec::new(),
		}
	}

	fn get(&mut self, host: &str) -> Option<IssuedCert> {
		let expired = match self.entries.get(host) {
			Some(cached) => cached.inserted_at.elapsed() > LEAF_CACHE_TTL,
			None => return None,
		};
		if expired {
			self.entries.remove(host);
			self.order.retain(|h| h != host);
			return None;
		}
		self.entries.get(host).map(|c| c.cert.clone())
	}

	fn insert(&mut self, host: String, cert: IssuedCert) {
		if !self.entries.contains_key(&host) {
			self.order.push(host.clone());
		}
		self.entries.insert(
			host,
			CachedLeaf {
				cert,
				inserted_at: Instant::now(),
			},
		);
		if self.entries.len() > self.capacity {
			self.evict_oldest_quarter();
		}
	}

	fn evict_oldest_quarter(&mut self) {
		let n = (self.capacity / 4).max(1);
		let victims: Vec<String> = self.order.drain(..n.min(self.order.len())).collect();
		for host in victims {
			self.entries.remove(&host);
		}
	}
}

/// Long-lived in-memory root CA. Invariant (vii): the private key lives
/// only in process memory for the session and is never persisted unless the
/// operator explicitly exports it.
pub struct CertificateAuthority {
	root_key: KeyPair,
	root_cert_der: Vec<u8>,
	root_cert_pem: String,
	root_subject_cn: String,
	issuer: Issuer<'static, KeyPair>,
	cache: Mutex<LeafCache>,
	product_name: String,
}

fn distinguished_name(cn: &str, org: &str, country: Option<&str>) -> DistinguishedName {
	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, cn);
	dn.push(DnType::OrganizationName, org);
	if let Some(c) = country {
		dn.push(DnType::CountryName, c);
	}
	dn
}

fn basic_constraints_extension(is_ca: bool, critical: bool) -> CustomExtension {
	let value = asn1::basic_constraints(is_ca);
	let mut ext = CustomExtension::from_oid_content(OID_BASIC_CONSTRAINTS, value);
	ext.set_criticality(critical);
	ext
}

fn key_usage_extension(bits: &[u8]) -> CustomExtension {
	let value = asn1::key_usage(bits);
	let mut ext = CustomExtension::from_oid_content(OID_KEY_USAGE, value);
	ext.set_criticality(true);
	ext
}

fn ext_key_usage_extension(oids: &[&[u64]]) -> CustomExtension {
	let value = asn1::ext_key_usage(oids);
	let mut ext = CustomExtension::from_oid_content(OID_EXT_KEY_USAGE, value);
	ext.set_criticality(false);
	ext
}

fn subject_alt_name_extension(dns_names: &[&str]) -> CustomExtension {
	let value = asn1::subject_alt_names(dns_names);
	CustomExtension::from_oid_content(OID_SUBJECT_ALT_NAME, value)
}

fn pem_encode(der: &[u8]) -> String {
	use base64::Engine;
	let b64 = base64::engine::general_purpose::STANDARD.encode(der);
	let mut out = String::from("-----BEGIN CERTIFICATE-----\n");
	for line in b64.as_bytes().chunks(64) {
		out.push_str(std::str::from_utf8(line).unwrap());
		out.push('\n');
	}
	out.push_str("-----END CERTIFICATE-----\n");
	out
}

impl CertificateAuthority {
	/// Bootstraps a fresh ephemeral root key and self-signed root
	/// certificate. Subject `CN=<product> Proxy CA, O=<product>, C=US`,
	/// 10 year validity, `basicConstraints: CA:TRUE critical` and
	/// `keyUsage: keyCertSign|cRLSign critical`.
	pub fn bootstrap(product_name: impl Into<String>) -> CoreResult<Self> {
		let product_name = product_name.into();
		let subject_cn = format!("{product_name} Proxy CA");
		let (_priv, root_key) = new_rsa_keypair()?;

		let mut params = CertificateParams::default();
		params.distinguished_name = distinguished_name(&subject_cn, &product_name, Some("US"));
		let now = Utc::now();
		let (y0, m0, d0) = ymd(now);
		let (y1, m1, d1) = ymd(now + chrono::Days::new(ROOT_VALIDITY_DAYS));
		params.not_before = rcgen::date_time_ymd(y0, m0, d0);
		params.not_after = rcgen::date_time_ymd(y1, m1, d1);
		params.serial_number = Some(rcgen::SerialNumber::from_slice(&random_serial()));
		params.is_ca = rcgen::IsCa::NoCa;
		params.custom_extensions = vec![
			basic_constraints_extension(true, true),
			key_usage_extension(&[KU_KEY_CERT_SIGN, KU_CRL_SIGN]),
		];

		let root_cert = params
			.clone()
			.self_signed(&root_key)
			.map_err(|e| CoreError::SigningFailed(e.to_string()))?;
		let root_cert_der = root_cert.der().to_vec();
		let root_cert_pem = pem_encode(&root_cert_der);
		let issuer = Issuer::new(params, root_key.clone_key());

		Ok(CertificateAuthority {
			root_key,
			root_cert_der,
			root_cert_pem,
			root_subject_cn: subject_cn,
			issuer,
			cache: Mutex::new(LeafCache::new(LEAF_CACHE_CAPACITY)),
			product_name,
		})
	}

	/// Issues (or returns a cached) leaf certificate for `host` plus any
	/// additional SANs. Invariant (vi): subject CN equals the SNI host and
	/// `subjectAltName` includes it plus any user-specified aliases.
	pub fn issue_leaf(&self, host: &str, extra_sans: &[String]) -> CoreResult<IssuedCert> {
		{
			let mut cache = self.cache.lock().expect("leaf cache mutex");
			if let Some(cached) = cache.get(host) {
				return Ok(cached);
			}
		}

		let (_priv, leaf_key) = new_rsa_keypair()?;
		let mut sans: Vec<String> = vec![host.to_string()];
		sans.extend(extra_sans.iter().cloned());
		sans.dedup();

		let mut params = CertificateParams::default();
		params.distinguished_name = distinguished_name(
			host,
			&format!("{} Proxy", self.product_name),
			None,
		);
		let now = Utc::now();
		let (y0, m0, d0) = ymd(now);
		let (y1, m1, d1) = ymd(now + chrono::Days::new(LEAF_VALIDITY_DAYS));
		params.not_before = rcgen::date_time_ymd(y0, m0, d0);
		params.not_after = rcgen::date_time_ymd(y1, m1, d1);
		params.serial_number = Some(rcgen::SerialNumber::from_slice(&random_serial()));
		params.is_ca = rcgen::IsCa::NoCa;
		let san_refs: Vec<&str> = sans.iter().map(|s| s.as_str()).collect();
		params.custom_extensions = vec![
			basic_constraints_extension(false, false),
			key_usage_extension(&[KU_DIGITAL_SIGNATURE, KU_KEY_ENCIPHERMENT]),
			ext_key_usage_extension(&[OID_SERVER_AUTH]),
			subject_alt_name_extension(&san_refs),
		];

		let cert = params
			.signed_by(&leaf_key, &self.issuer)
			.map_err(|e| CoreError::SigningFailed(e.to_string()))?;
		let der = cert.der().to_vec();
		let pem = pem_encode(&der);
		let key_der = leaf_key.serialize_der();

		let issued = IssuedCert {
			der,
			key_der,
			pem,
			subject_cn: host.to_string(),
			sans,
			not_before_ns: now.timestamp_nanos_opt().unwrap_or(0).max(0) as u128,
			not_after_ns: (now + chrono::Days::new(LEAF_VALIDITY_DAYS))
				.timestamp_nanos_opt()
				.unwrap_or(0)
				.max(0) as u128,
		};

		self
			.cache
			.lock()
			.expect("leaf cache mutex")
			.insert(host.to_string(), issued.clone());
		Ok(issued)
	}

	pub fn root_subject_cn(&self) -> &str {
		&self.root_subject_cn
	}

	pub fn root_der(&self) -> &[u8] {
		&self.root_cert_der
	}

	pub fn root_pem(&self) -> &str {
		&self.root_cert_pem
	}

	pub fn root_key_pair(&self) -> &KeyPair {
		&self.root_key
	}

	/// Export in the requested format. `InvalidFormat` for anything else.
	pub fn export(&self, format: &str) -> CoreResult<Vec<u8>> {
		match format.to_ascii_lowercase().as_str() {
			"der" => Ok(self.root_cert_der.clone()),
			"pem" => Ok(self.root_cert_pem.clone().into_bytes()),
			other => Err(CoreError::InvalidFormat(other.to_string())),
		}
	}

	/// Uppercase colon-separated hex of `SHA-256(DER(root))`.
	pub fn fingerprint_sha256(&self) -> String {
		let digest = Sha256::digest(&self.root_cert_der);
		digest
			.iter()
			.map(|b| format!("{b:02X}"))
			.collect::<Vec<_>>()
			.join(":")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bootstrap_produces_self_signed_root() {
		let ca = CertificateAuthority::bootstrap("Syrah").unwrap();
		assert!(ca.root_der().len() > 100);
		assert!(ca.root_pem().starts_with("-----BEGIN CERTIFICATE-----"));
		assert_eq!(ca.fingerprint_sha256().split(':').count(), 32);
	}

	#[test]
	fn issue_leaf_is_cached_on_second_call() {
		let ca = CertificateAuthority::bootstrap("Syrah").unwrap();
		let first = ca.issue_leaf("api.example.com", &[]).unwrap();
		let second = ca.issue_leaf("api.example.com", &[]).unwrap();
		assert_eq!(first.der, second.der);
		assert_eq!(first.subject_cn, "api.example.com");
	}

	#[test]
	fn issue_leaf_parses_with_x509_parser_and_matches_host() {
		use x509_parser::oid_registry::asn1_rs::oid;
		let ca = CertificateAuthority::bootstrap("Syrah").unwrap();
		let issued = ca.issue_leaf("example.com", &["alt.example.com".into()]).unwrap();
		let (_, cert) = x509_parser::parse_x509_certificate(&issued.der).unwrap();
		let cn = cert
			.subject()
			.iter_common_name()
			.next()
			.unwrap()
			.as_str()
			.unwrap();
		assert_eq!(cn, "example.com");

		let san_oid = oid!(2.5.29.17);
		let san_ext = cert
			.extensions()
			.iter()
			.find(|e| e.oid == san_oid)
			.expect("subjectAltName extension present");
		// DNS names are carried as raw ASCII inside the extension's OCTET
		// STRING payload, so a substring check is a robust-enough oracle
		// without depending on x509-parser's SAN accessor shape.
		let raw = String::from_utf8_lossy(san_ext.value);
		assert!(raw.contains("example.com"));
		assert!(raw.contains("alt.example.com"));
	}

	#[test]
	fn export_der_and_pem() {
		let ca = CertificateAuthority::bootstrap("Syrah").unwrap();
		assert_eq!(ca.export("der").unwrap(), ca.root_der());
		assert!(ca.export("pem").is_ok());
		assert!(matches!(ca.export("xyz"), Err(CoreError::InvalidFormat(_))));
	}
}
