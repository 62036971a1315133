// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use flowtel_tracker_core::DEFAULT_REQUEST_TIMEOUT;
use reqwest::header::CONTENT_TYPE;

use super::SyncTransport;
use crate::error::{Result, TrackerError};

/// Blocking JSON POST over reqwest's blocking client.
///
/// The request runs on a scoped OS thread and the caller waits for it, so
/// this may be called from inside a tokio runtime (the blocking client must
/// never be built or dropped on an async worker).
#[derive(Debug, Clone)]
pub struct BlockingHttpTransport {
	timeout: Duration,
}

impl BlockingHttpTransport {
	pub fn new(timeout: Duration) -> Self {
		Self { timeout }
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	fn post(&self, endpoint: &str, body: &[u8]) -> Result<u16> {
		let client = flowtel_common_http::blocking_builder()
			.timeout(self.timeout)
			.build()?;
		let response = client
			.post(endpoint)
			.header(CONTENT_TYPE, "application/json")
			.body(body.to_vec())
			.send()?;
		Ok(response.status().as_u16())
	}
}

impl Default for BlockingHttpTransport {
	fn default() -> Self {
		Self::new(DEFAULT_REQUEST_TIMEOUT)
	}
}

impl SyncTransport for BlockingHttpTransport {
	fn post_json(&self, endpoint: &str, body: &[u8]) -> Result<u16> {
		std::thread::scope(|scope| {
			scope
				.spawn(|| self.post(endpoint, body))
				.join()
				.map_err(|_| TrackerError::Transport("blocking request thread panicked".to_string()))?
		})
	}
}
