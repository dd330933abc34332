//! Throttle / latency shaper (spec §4.I). Two token buckets per flow
//! (download, upload), a fixed per-direction latency delay applied once per
//! flow, and probabilistic packet loss. No crate in the corpus models
//! byte-level bidirectional throttling with latency+loss as one unit —
//! `governor` (available via the `hypernetix-hyperspot` pack example) is a
//! request-admission limiter, not a byte-stream shaper, so this is a small
//! hand-rolled bucket instead.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::drain::DrainWatcher;
use crate::error::{ProxyError, ProxyResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThrottleSetting {
	pub download_bps: u64,
	pub upload_bps: u64,
	pub latency_ms: u64,
	pub loss_pct: f32,
}

impl Default for ThrottleSetting {
	fn default() -> Self {
		ThrottleSetting {
			download_bps: 0,
			upload_bps: 0,
			latency_ms: 0,
			loss_pct: 0.0,
		}
	}
}

impl ThrottleSetting {
	/// No shaping: unlimited bandwidth, no latency, no loss.
	pub fn unthrottled() -> Self {
		ThrottleSetting::default()
	}

	/// Named presets, bytes/s download, bytes/s upload, ms latency (spec
	/// §4.I table, verbatim). `0 bps` means unlimited except for `Offline`,
	/// which is `0 bps` *and* modeled as 100% loss.
	pub fn preset(name: &str) -> Option<Self> {
		Some(match name.to_ascii_lowercase().as_str() {
			"slow3g" => ThrottleSetting {
				download_bps: 50_000,
				upload_bps: 50_000,
				latency_ms: 400,
				loss_pct: 0.0,
			},
			"fast3g" => ThrottleSetting {
				download_bps: 187_500,
				upload_bps: 93_750,
				latency_ms: 150,
				loss_pct: 0.0,
			},
			"slow4g" => ThrottleSetting {
				download_bps: 500_000,
				upload_bps: 375_000,
				latency_ms: 100,
				loss_pct: 0.0,
			},
			"fast4g" => ThrottleSetting {
				download_bps: 2_500_000,
				upload_bps: 1_250_000,
				latency_ms: 50,
				loss_pct: 0.0,
			},
			"wifi" => ThrottleSetting {
				download_bps: 3_750_000,
				upload_bps: 1_875_000,
				latency_ms: 10,
				loss_pct: 0.0,
			},
			"offline" => ThrottleSetting {
				download_bps: 0,
				upload_bps: 0,
				latency_ms: 0,
				loss_pct: 100.0,
			},
			_ => return None,
		})
	}

	/// `0 bps` is "unlimited" for every preset except `Offline`, which pairs
	/// it with 100% loss so writes never actually drain.
	fn is_unlimited(bps: u64, loss_pct: f32) -> bool {
		bps == 0 && loss_pct == 0.0
	}
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
	Download,
	Upload,
}

struct TokenBucket {
	rate_bps: u64,
	capacity: f64,
	tokens: f64,
	last_refill: Instant,
}

impl TokenBucket {
	fn new(rate_bps: u64) -> Self {
		TokenBucket {
			rate_bps,
			capacity: rate_bps as f64,
			tokens: rate_bps as f64,
			last_refill: Instant::now(),
		}
	}

	fn refill(&mut self) {
		let elapsed = self.last_refill.elapsed().as_secs_f64();
		self.tokens = (self.tokens + elapsed * self.rate_bps as f64).min(self.capacity);
		self.last_refill = Instant::now();
	}

	/// Blocks until `n` bytes' worth of tokens are available, re-checking
	/// the drain signal between sleeps so a stopped session doesn't leave
	/// the task parked forever against an `Offline` bucket.
	async fn acquire(&mut self, n: usize, drain: &mut DrainWatcher) -> ProxyResult<()> {
		if self.rate_bps == 0 {
			// Unlimited bandwidth is modeled as rate_bps == 0 *unless* this
			// bucket belongs to an Offline preset, in which case the caller
			// never calls acquire at all (loss drops the chunk first).
			return Ok(());
		}
		loop {
			self.refill();
			if self.tokens >= n as f64 {
				self.tokens -= n as f64;
				return Ok(());
			}
			let deficit = n as f64 - self.tokens;
			let wait = Duration::from_secs_f64(deficit / self.rate_bps as f64).max(Duration::from_millis(1));
			tokio::select! {
				_ = tokio::time::sleep(wait) => {},
				_ = drain.signaled() => return Err(ProxyError::ThrottleCancelled),
			}
		}
	}
}

/// Per-flow shaper. Not shared across flows (spec §5: "throttle buckets are
/// per-flow and therefore unshared").
pub struct Shaper {
	download: TokenBucket,
	upload: TokenBucket,
	latency: Duration,
	loss_pct: f32,
	latency_applied: [bool; 2],
}

impl Shaper {
	pub fn new(setting: ThrottleSetting) -> Self {
		Shaper {
			download: TokenBucket::new(setting.download_bps),
			upload: TokenBucket::new(setting.upload_bps),
			latency: Duration::from_millis(setting.latency_ms),
			loss_pct: setting.loss_pct,
			latency_applied: [false, false],
		}
	}

	pub fn is_unthrottled(setting: &ThrottleSetting) -> bool {
		ThrottleSetting::is_unlimited(setting.download_bps, setting.loss_pct)
			&& ThrottleSetting::is_unlimited(setting.upload_bps, setting.loss_pct)
			&& setting.latency_ms == 0
	}

	/// Shapes one chunk of `n` bytes being emitted in `direction`: applies
	/// the fixed per-direction latency once, rolls for packet loss, then
	/// blocks on the bucket. Returns `Err(ThrottleCancelled)` on drop
	/// (dropped chunks transition the flow to `Failed` with a synthetic
	/// reset, per §4.I) or on session shutdown.
	pub async fn shape(&mut self, direction: Direction, n: usize, drain: &mut DrainWatcher) -> ProxyResult<()> {
		let idx = match direction {
			Direction::Download => 0,
			Direction::Upload => 1,
		};
		if !self.latency_applied[idx] {
			self.latency_applied[idx] = true;
			if !self.latency.is_zero() {
				tokio::select! {
					_ = tokio::time::sleep(self.latency) => {},
					_ = drain.signaled() => return Err(ProxyError::ThrottleCancelled),
				}
			}
		}
		if self.loss_pct > 0.0 && rand::rng().random::<f32>() * 100.0 < self.loss_pct {
			return Err(ProxyError::UpstreamResetDuringResponse);
		}
		match direction {
			Direction::Download => self.download.acquire(n, drain).await,
			Direction::Upload => self.upload.acquire(n, drain).await,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn preset_table_matches_spec() {
		let slow3g = ThrottleSetting::preset("Slow3G").unwrap();
		assert_eq!(slow3g.download_bps, 50_000);
		assert_eq!(slow3g.upload_bps, 50_000);
		assert_eq!(slow3g.latency_ms, 400);

		let offline = ThrottleSetting::preset("offline").unwrap();
		assert_eq!(offline.loss_pct, 100.0);
		assert_eq!(offline.download_bps, 0);
	}

	#[test]
	fn unknown_preset_is_none() {
		assert!(ThrottleSetting::preset("nope").is_none());
	}

	#[tokio::test]
	async fn unthrottled_bucket_never_blocks() {
		let (_trigger, mut watcher) = crate::drain::new();
		let mut shaper = Shaper::new(ThrottleSetting::unthrottled());
		shaper.shape(Direction::Download, 10_000_000, &mut watcher).await.unwrap();
	}

	#[tokio::test]
	async fn offline_preset_always_drops() {
		let (_trigger, mut watcher) = crate::drain::new();
		let mut shaper = Shaper::new(ThrottleSetting::preset("offline").unwrap());
		let result = shaper.shape(Direction::Download, 10, &mut watcher).await;
		assert!(result.is_err());
	}
}
