// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracker configuration supplied once at `init`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Events per flush when not configured.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Timer flush period when not configured.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5000);
/// In-process retries after the first failed delivery attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Base delay for exponential retry backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Upper bound for a single delivery attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration errors raised by `init`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
	#[error("shopId is required")]
	MissingShopId,

	#[error("endpoint is required")]
	MissingEndpoint,

	#[error("batchSize must be at least 1")]
	InvalidBatchSize,

	#[error("flushInterval must be greater than zero")]
	InvalidFlushInterval,
}

/// Configuration for one tracker instance.
///
/// Durations serialise as integer milliseconds, matching the embed snippet
/// (`flushInterval: 5000`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerConfig {
	/// Shop identifier attached to every event.
	pub shop_id: String,
	/// Collector URL receiving `POST` batches.
	pub endpoint: String,
	#[serde(default = "default_batch_size")]
	pub batch_size: usize,
	#[serde(default = "default_flush_interval", with = "duration_ms")]
	pub flush_interval: Duration,
	/// Emit per-event and per-attempt diagnostics.
	#[serde(default)]
	pub debug: bool,
	#[serde(default = "default_true")]
	pub auto_track_page_views: bool,
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	#[serde(default = "default_retry_delay", with = "duration_ms")]
	pub retry_delay: Duration,
	#[serde(default = "default_request_timeout", with = "duration_ms")]
	pub request_timeout: Duration,
}

impl TrackerConfig {
	/// Creates a configuration with every optional field at its default.
	pub fn new(shop_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
		Self {
			shop_id: shop_id.into(),
			endpoint: endpoint.into(),
			batch_size: DEFAULT_BATCH_SIZE,
			flush_interval: DEFAULT_FLUSH_INTERVAL,
			debug: false,
			auto_track_page_views: true,
			max_retries: DEFAULT_MAX_RETRIES,
			retry_delay: DEFAULT_RETRY_DELAY,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}

	pub fn with_batch_size(mut self, batch_size: usize) -> Self {
		self.batch_size = batch_size;
		self
	}

	pub fn with_flush_interval(mut self, interval: Duration) -> Self {
		self.flush_interval = interval;
		self
	}

	pub fn with_debug(mut self, debug: bool) -> Self {
		self.debug = debug;
		self
	}

	pub fn with_auto_track_page_views(mut self, enabled: bool) -> Self {
		self.auto_track_page_views = enabled;
		self
	}

	/// Sets the in-process retry budget and backoff base for delivery.
	pub fn with_retry(mut self, max_retries: u32, retry_delay: Duration) -> Self {
		self.max_retries = max_retries;
		self.retry_delay = retry_delay;
		self
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	/// Rejects configurations the tracker cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.shop_id.trim().is_empty() {
			return Err(ConfigError::MissingShopId);
		}
		if self.endpoint.trim().is_empty() {
			return Err(ConfigError::MissingEndpoint);
		}
		if self.batch_size == 0 {
			return Err(ConfigError::InvalidBatchSize);
		}
		if self.flush_interval.is_zero() {
			return Err(ConfigError::InvalidFlushInterval);
		}
		Ok(())
	}
}

fn default_batch_size() -> usize {
	DEFAULT_BATCH_SIZE
}

fn default_flush_interval() -> Duration {
	DEFAULT_FLUSH_INTERVAL
}

fn default_true() -> bool {
	true
}

fn default_max_retries() -> u32 {
	DEFAULT_MAX_RETRIES
}

fn default_retry_delay() -> Duration {
	DEFAULT_RETRY_DELAY
}

fn default_request_timeout() -> Duration {
	DEFAULT_REQUEST_TIMEOUT
}

mod duration_ms {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
		serializer.serialize_u64(millis)
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_new_applies_defaults() {
		let config = TrackerConfig::new("shop_1", "https://collector.test/api/events");
		assert_eq!(config.batch_size, 10);
		assert_eq!(config.flush_interval, Duration::from_millis(5000));
		assert!(!config.debug);
		assert!(config.auto_track_page_views);
		assert_eq!(config.max_retries, 3);
		assert_eq!(config.retry_delay, Duration::from_millis(1000));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_deserialize_fills_defaults() {
		let config: TrackerConfig = serde_json::from_value(json!({
			"shopId": "shop_1",
			"endpoint": "https://collector.test/api/events",
			"flushInterval": 2500,
			"debug": true
		}))
		.unwrap();

		assert_eq!(config.flush_interval, Duration::from_millis(2500));
		assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
		assert!(config.debug);
		assert!(config.auto_track_page_views);
	}

	#[test]
	fn test_serializes_durations_as_millis() {
		let config = TrackerConfig::new("s", "e").with_flush_interval(Duration::from_secs(2));
		let value = serde_json::to_value(&config).unwrap();
		assert_eq!(value["flushInterval"], 2000);
		assert_eq!(value["retryDelay"], 1000);
		assert_eq!(value["autoTrackPageViews"], true);
	}

	#[test]
	fn test_validate_requires_shop_id() {
		let config = TrackerConfig::new("  ", "https://collector.test");
		assert_eq!(config.validate(), Err(ConfigError::MissingShopId));
	}

	#[test]
	fn test_validate_requires_endpoint() {
		let config = TrackerConfig::new("shop_1", "");
		assert_eq!(config.validate(), Err(ConfigError::MissingEndpoint));
	}

	#[test]
	fn test_validate_rejects_zero_batch_size() {
		let config = TrackerConfig::new("shop_1", "https://collector.test").with_batch_size(0);
		assert_eq!(config.validate(), Err(ConfigError::InvalidBatchSize));
	}

	#[test]
	fn test_validate_rejects_zero_flush_interval() {
		let config =
			TrackerConfig::new("shop_1", "https://collector.test").with_flush_interval(Duration::ZERO);
		assert_eq!(config.validate(), Err(ConfigError::InvalidFlushInterval));
	}
}
