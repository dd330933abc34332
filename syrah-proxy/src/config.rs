//! Proxy engine configuration. The root `syrah` package layers YAML, env,
//! and CLI flags with `figment` and produces one of these; `syrah-proxy`
//! itself stays configuration-source-agnostic.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::throttle::ThrottleSetting;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
	pub bind_address: IpAddr,
	pub port: u16,
	pub enable_ssl_interception: bool,
	#[serde(default)]
	pub bypass_hosts: Vec<String>,
	pub max_connections_per_upstream: usize,
	pub max_flows: usize,
	#[serde(with = "humantime_duration")]
	pub connect_timeout: Duration,
	#[serde(with = "humantime_duration")]
	pub read_timeout: Duration,
	#[serde(default)]
	pub throttle: ThrottleSetting,
	#[serde(default)]
	pub decompress_responses: bool,
}

impl Default for ProxyConfig {
	fn default() -> Self {
		ProxyConfig {
			bind_address: IpAddr::from([127, 0, 0, 1]),
			port: 8080,
			enable_ssl_interception: true,
			bypass_hosts: Vec::new(),
			max_connections_per_upstream: 8,
			max_flows: 1000,
			connect_timeout: Duration::from_secs(30),
			read_timeout: Duration::from_secs(60),
			throttle: ThrottleSetting::unthrottled(),
			decompress_responses: true,
		}
	}
}

impl ProxyConfig {
	pub fn is_bypassed(&self, host: &str) -> bool {
		self.bypass_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
	}
}

/// `serde(with = ...)` helper for `Duration` via humantime strings
/// (`"30s"`, `"2m"`), so the YAML config layer reads naturally.
mod humantime_duration {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&humantime::format_duration(*d).to_string())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		let s = String::deserialize(d)?;
		humantime::parse_duration(&s).map_err(serde::de::Error::custom)
	}
}
