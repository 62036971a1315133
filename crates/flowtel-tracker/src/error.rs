// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the tracker.

use flowtel_common_http::RetryableError;
use flowtel_tracker_core::ConfigError;
use thiserror::Error;

/// Tracker errors.
///
/// Only `Tracker::init` surfaces these to the embedding page. Delivery
/// failures are folded into `SendResult`/`FlushResult` and logged.
#[derive(Debug, Error)]
pub enum TrackerError {
	/// Required configuration is missing or invalid.
	#[error("invalid tracker configuration: {0}")]
	Config(#[from] ConfigError),

	/// The batcher needs a tokio runtime for its flush timer.
	#[error("no tokio runtime available; init must be called from within a runtime")]
	RuntimeUnavailable,

	/// HTTP request failed before a response arrived.
	#[error("HTTP request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	/// Collector answered with a non-success status.
	#[error("collector responded with status {status}: {message}")]
	ServerError { status: u16, message: String },

	/// Event batch could not be serialised.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Synchronous transport failed outside of the HTTP layer.
	#[error("synchronous transport failed: {0}")]
	Transport(String),
}

impl TrackerError {
	/// The collector's response status, if one arrived.
	pub fn status(&self) -> Option<u16> {
		match self {
			TrackerError::ServerError { status, .. } => Some(*status),
			TrackerError::RequestFailed(e) => e.status().map(|s| s.as_u16()),
			_ => None,
		}
	}

	/// True for 4xx responses: the collector rejected the batch itself.
	pub fn is_client_error(&self) -> bool {
		matches!(self, TrackerError::ServerError { status, .. } if (400..500).contains(status))
	}
}

impl RetryableError for TrackerError {
	fn is_retryable(&self) -> bool {
		match self {
			TrackerError::RequestFailed(e) => e.is_retryable(),
			TrackerError::ServerError { status, .. } => *status == 0 || (500..600).contains(status),
			_ => false,
		}
	}
}

/// Result type alias for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
