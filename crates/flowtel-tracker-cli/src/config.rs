// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered tracker configuration: defaults, TOML file, environment, flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use flowtel_tracker_core::{ConfigError, TrackerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
	#[error("failed to read config file {path}: {source}")]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {value:?}")]
	InvalidEnv { key: &'static str, value: String },

	#[error(transparent)]
	Invalid(#[from] ConfigError),
}

/// One source's view of the configuration. Unset fields defer to lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
	pub shop_id: Option<String>,
	pub endpoint: Option<String>,
	pub batch_size: Option<usize>,
	pub flush_interval_ms: Option<u64>,
	pub debug: Option<bool>,
	pub auto_track_page_views: Option<bool>,
	pub max_retries: Option<u32>,
	pub retry_delay_ms: Option<u64>,
	pub request_timeout_ms: Option<u64>,
}

impl ConfigLayer {
	/// Reads a TOML file with snake_case keys.
	pub fn from_file(path: &Path) -> Result<Self, ConfigLoadError> {
		debug!(path = %path.display(), "Loading config file");
		let content = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		toml::from_str(&content).map_err(|source| ConfigLoadError::TomlParse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Reads `FLOWTEL_*` variables from the process environment.
	pub fn from_env() -> Result<Self, ConfigLoadError> {
		Self::from_env_with(|key| std::env::var(key).ok())
	}

	/// Reads `FLOWTEL_*` variables through `lookup`. Blank values are ignored.
	pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigLoadError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |key: &str| {
			lookup(key)
				.map(|value| value.trim().to_string())
				.filter(|value| !value.is_empty())
		};

		Ok(Self {
			shop_id: get("FLOWTEL_SHOP_ID"),
			endpoint: get("FLOWTEL_ENDPOINT"),
			batch_size: parse_env("FLOWTEL_BATCH_SIZE", get("FLOWTEL_BATCH_SIZE"))?,
			flush_interval_ms: parse_env(
				"FLOWTEL_FLUSH_INTERVAL_MS",
				get("FLOWTEL_FLUSH_INTERVAL_MS"),
			)?,
			debug: parse_bool_env("FLOWTEL_DEBUG", get("FLOWTEL_DEBUG"))?,
			auto_track_page_views: parse_bool_env(
				"FLOWTEL_AUTO_TRACK_PAGE_VIEWS",
				get("FLOWTEL_AUTO_TRACK_PAGE_VIEWS"),
			)?,
			max_retries: parse_env("FLOWTEL_MAX_RETRIES", get("FLOWTEL_MAX_RETRIES"))?,
			retry_delay_ms: parse_env("FLOWTEL_RETRY_DELAY_MS", get("FLOWTEL_RETRY_DELAY_MS"))?,
			request_timeout_ms: parse_env(
				"FLOWTEL_REQUEST_TIMEOUT_MS",
				get("FLOWTEL_REQUEST_TIMEOUT_MS"),
			)?,
		})
	}

	/// Overlays `higher` on top of `self`.
	pub fn merge(self, higher: ConfigLayer) -> Self {
		Self {
			shop_id: higher.shop_id.or(self.shop_id),
			endpoint: higher.endpoint.or(self.endpoint),
			batch_size: higher.batch_size.or(self.batch_size),
			flush_interval_ms: higher.flush_interval_ms.or(self.flush_interval_ms),
			debug: higher.debug.or(self.debug),
			auto_track_page_views: higher.auto_track_page_views.or(self.auto_track_page_views),
			max_retries: higher.max_retries.or(self.max_retries),
			retry_delay_ms: higher.retry_delay_ms.or(self.retry_delay_ms),
			request_timeout_ms: higher.request_timeout_ms.or(self.request_timeout_ms),
		}
	}

	/// Applies defaults for unset fields and validates the result.
	pub fn finalize(self) -> Result<TrackerConfig, ConfigLoadError> {
		let mut config = TrackerConfig::new(
			self.shop_id.unwrap_or_default(),
			self.endpoint.unwrap_or_default(),
		);

		if let Some(batch_size) = self.batch_size {
			config = config.with_batch_size(batch_size);
		}
		if let Some(ms) = self.flush_interval_ms {
			config = config.with_flush_interval(Duration::from_millis(ms));
		}
		if let Some(debug) = self.debug {
			config = config.with_debug(debug);
		}
		if let Some(enabled) = self.auto_track_page_views {
			config = config.with_auto_track_page_views(enabled);
		}
		if self.max_retries.is_some() || self.retry_delay_ms.is_some() {
			let max_retries = self.max_retries.unwrap_or(config.max_retries);
			let retry_delay = self
				.retry_delay_ms
				.map(Duration::from_millis)
				.unwrap_or(config.retry_delay);
			config = config.with_retry(max_retries, retry_delay);
		}
		if let Some(ms) = self.request_timeout_ms {
			config = config.with_request_timeout(Duration::from_millis(ms));
		}

		config.validate()?;
		Ok(config)
	}
}

fn parse_env<T: std::str::FromStr>(
	key: &'static str,
	value: Option<String>,
) -> Result<Option<T>, ConfigLoadError> {
	value
		.map(|value| {
			value
				.parse()
				.map_err(|_| ConfigLoadError::InvalidEnv { key, value })
		})
		.transpose()
}

fn parse_bool_env(key: &'static str, value: Option<String>) -> Result<Option<bool>, ConfigLoadError> {
	value
		.map(|value| match value.to_ascii_lowercase().as_str() {
			"1" | "true" | "yes" | "on" => Ok(true),
			"0" | "false" | "no" | "off" => Ok(false),
			_ => Err(ConfigLoadError::InvalidEnv { key, value }),
		})
		.transpose()
}
