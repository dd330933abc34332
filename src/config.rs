//! Configuration surface: a YAML file, `SYRAH_`-prefixed env vars, and CLI
//! flags layered with `figment`, the same three-source approach the pack's
//! `hypernetix-hyperspot` example uses for its own service config.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use syrah_proxy::ProxyConfig;
use syrah_proxy::throttle::ThrottleSetting;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
	pub bind_address: IpAddr,
	pub port: u16,
	pub admin_bind_address: IpAddr,
	pub admin_port: u16,
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
	pub product_name: String,
}

impl Default for AppConfig {
	fn default() -> Self {
		AppConfig {
			bind_address: IpAddr::from([127, 0, 0, 1]),
			port: 8080,
			admin_bind_address: IpAddr::from([127, 0, 0, 1]),
			admin_port: 9900,
			enable_ssl_interception: true,
			bypass_hosts: Vec::new(),
			max_connections_per_upstream: 8,
			max_flows: 1000,
			connect_timeout: Duration::from_secs(30),
			read_timeout: Duration::from_secs(60),
			throttle: ThrottleSetting::unthrottled(),
			decompress_responses: true,
			product_name: "Syrah".to_string(),
		}
	}
}

impl AppConfig {
	/// Layers, in increasing precedence: built-in defaults, an optional YAML
	/// file, then `SYRAH_*` environment variables.
	pub fn load(file: Option<&Path>) -> Result<AppConfig, figment::Error> {
		let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
		if let Some(path) = file {
			figment = figment.merge(Yaml::file(path));
		}
		figment = figment.merge(Env::prefixed("SYRAH_").split("__"));
		figment.extract()
	}

	pub fn to_proxy_config(&self) -> ProxyConfig {
		ProxyConfig {
			bind_address: self.bind_address,
			port: self.port,
			enable_ssl_interception: self.enable_ssl_interception,
			bypass_hosts: self.bypass_hosts.clone(),
			max_connections_per_upstream: self.max_connections_per_upstream,
			max_flows: self.max_flows,
			connect_timeout: self.connect_timeout,
			read_timeout: self.read_timeout,
			throttle: self.throttle,
			decompress_responses: self.decompress_responses,
		}
	}
}

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

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_round_trip_through_figment_with_no_overrides() {
		let config = AppConfig::load(None).expect("defaults extract cleanly");
		assert_eq!(config.port, 8080);
		assert_eq!(config.admin_port, 9900);
	}

	#[test]
	fn to_proxy_config_carries_the_listener_fields_over() {
		let config = AppConfig::default();
		let proxy = config.to_proxy_config();
		assert_eq!(proxy.port, config.port);
		assert_eq!(proxy.max_flows, config.max_flows);
	}
}
