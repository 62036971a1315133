// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery of event batches to the collector.

use std::time::Duration;

use flowtel_common_http::{retry, RetryConfig};
use flowtel_tracker_core::{EventRecord, TrackerConfig};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use crate::error::{Result, TrackerError};

/// Outcome of one delivery attempt cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
	pub success: bool,
	pub error: Option<String>,
	/// Whether the batch is worth queueing for a later flush.
	pub retryable: bool,
}

impl SendResult {
	pub fn ok() -> Self {
		Self {
			success: true,
			error: None,
			retryable: false,
		}
	}

	pub fn failed(error: impl Into<String>, retryable: bool) -> Self {
		Self {
			success: false,
			error: Some(error.into()),
			retryable,
		}
	}
}

/// Settings for [`HttpSender`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
	pub endpoint: String,
	pub debug: bool,
	pub retry: RetryConfig,
	pub request_timeout: Duration,
}

impl SenderConfig {
	pub fn new(endpoint: impl Into<String>) -> Self {
		Self::from(&TrackerConfig::new("", endpoint))
	}

	pub fn with_retry(mut self, retry: RetryConfig) -> Self {
		self.retry = retry;
		self
	}

	pub fn with_debug(mut self, debug: bool) -> Self {
		self.debug = debug;
		self
	}
}

impl From<&TrackerConfig> for SenderConfig {
	fn from(config: &TrackerConfig) -> Self {
		Self {
			endpoint: config.endpoint.clone(),
			debug: config.debug,
			retry: RetryConfig::exponential(config.max_retries, config.retry_delay),
			request_timeout: config.request_timeout,
		}
	}
}

/// Delivers a batch of events somewhere.
#[async_trait::async_trait]
pub trait EventSender: Send + Sync {
	/// Delivers `events` as one batch. Never fails outward; the outcome is
	/// reported in the result.
	async fn send_events(&self, events: &[EventRecord]) -> SendResult;
}

/// POSTs batches as a JSON array, retrying transient failures with
/// exponential backoff.
///
/// - 2xx: success
/// - 4xx: permanent failure, no retry
/// - 5xx or no response: retried up to `max_retries` times, then reported
///   as retryable
/// - anything else: reported as retryable without an in-process retry
#[derive(Debug, Clone)]
pub struct HttpSender {
	config: SenderConfig,
	client: Client,
}

impl HttpSender {
	pub fn new(config: SenderConfig) -> Result<Self> {
		let client = flowtel_common_http::new_client_with_timeout(config.request_timeout)?;
		Ok(Self { config, client })
	}

	pub fn config(&self) -> &SenderConfig {
		&self.config
	}

	async fn post(&self, body: Vec<u8>, attempt: u32, count: usize) -> Result<()> {
		if self.config.debug {
			debug!(
				endpoint = %self.config.endpoint,
				attempt,
				count,
				"Sending event batch"
			);
		}

		let response = self
			.client
			.post(&self.config.endpoint)
			.header(CONTENT_TYPE, "application/json")
			.body(body)
			.send()
			.await?;

		let status = response.status();
		if status.is_success() {
			return Ok(());
		}

		let message = response.text().await.unwrap_or_default();
		Err(TrackerError::ServerError {
			status: status.as_u16(),
			message,
		})
	}
}

#[async_trait::async_trait]
impl EventSender for HttpSender {
	async fn send_events(&self, events: &[EventRecord]) -> SendResult {
		if events.is_empty() {
			return SendResult::ok();
		}

		let body = match serde_json::to_vec(events) {
			Ok(body) => body,
			Err(e) => return SendResult::failed(TrackerError::from(e).to_string(), false),
		};

		let count = events.len();
		let outcome = retry(&self.config.retry, |attempt| {
			self.post(body.clone(), attempt, count)
		})
		.await;

		match outcome {
			Ok(()) => {
				if self.config.debug {
					debug!(count, "Event batch delivered");
				}
				SendResult::ok()
			}
			Err(e) if e.is_client_error() => {
				let status = e.status().unwrap_or_default();
				if self.config.debug {
					debug!(status, count, "Collector rejected event batch");
				}
				SendResult::failed(format!("Client error: {status}"), false)
			}
			Err(e) => {
				if self.config.debug {
					debug!(error = %e, count, "Event batch delivery failed");
				}
				SendResult::failed(e.to_string(), true)
			}
		}
	}
}

/// One-shot delivery with a freshly built [`HttpSender`].
pub async fn send_events(events: &[EventRecord], config: &SenderConfig) -> SendResult {
	if events.is_empty() {
		return SendResult::ok();
	}

	match HttpSender::new(config.clone()) {
		Ok(sender) => sender.send_events(events).await,
		Err(e) => SendResult::failed(e.to_string(), false),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::Map;

	fn unreachable_config() -> SenderConfig {
		SenderConfig::new("http://127.0.0.1:1/events")
			.with_retry(RetryConfig::exponential(0, Duration::from_millis(1)))
	}

	fn event() -> EventRecord {
		EventRecord::new(
			"shop_1",
			"session_1",
			"add_to_cart",
			Map::new(),
			"https://shop.test/",
			"test-agent",
		)
	}

	#[test]
	fn test_config_from_tracker_config() {
		let tracker = TrackerConfig::new("shop_1", "https://collector.test/events")
			.with_debug(true)
			.with_retry(5, Duration::from_millis(250));
		let config = SenderConfig::from(&tracker);

		assert_eq!(config.endpoint, "https://collector.test/events");
		assert!(config.debug);
		assert_eq!(config.retry.max_retries, 5);
		assert_eq!(config.retry.base_delay, Duration::from_millis(250));
		assert!(!config.retry.jitter);
		assert_eq!(config.request_timeout, Duration::from_secs(10));
	}

	#[test]
	fn test_default_sender_config() {
		let config = SenderConfig::new("https://collector.test/events");
		assert_eq!(config.retry.max_retries, 3);
		assert_eq!(config.retry.base_delay, Duration::from_millis(1000));
		assert!(!config.debug);
	}

	#[test]
	fn test_send_result_constructors() {
		assert!(SendResult::ok().success);
		let failed = SendResult::failed("Client error: 400", false);
		assert!(!failed.success);
		assert!(!failed.retryable);
		assert_eq!(failed.error.as_deref(), Some("Client error: 400"));
	}

	#[tokio::test]
	async fn test_empty_batch_makes_no_request() {
		let result = send_events(&[], &unreachable_config()).await;
		assert_eq!(result, SendResult::ok());
	}

	#[tokio::test]
	async fn test_dropped_connections_are_retried_with_backoff() {
		use std::sync::atomic::{AtomicUsize, Ordering};
		use std::sync::Arc;

		// Accepts and immediately closes every connection, so no response arrives.
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let accepted = Arc::new(AtomicUsize::new(0));
		let counter = accepted.clone();
		tokio::spawn(async move {
			while let Ok((socket, _)) = listener.accept().await {
				counter.fetch_add(1, Ordering::SeqCst);
				drop(socket);
			}
		});

		let config = SenderConfig::new(format!("http://{addr}/events"))
			.with_retry(RetryConfig::exponential(3, Duration::from_millis(50)));
		let started = std::time::Instant::now();
		let result = send_events(&[event()], &config).await;
		let elapsed = started.elapsed();

		assert!(!result.success);
		assert!(result.retryable);
		assert_eq!(accepted.load(Ordering::SeqCst), 4);
		// 50 + 100 + 200 ms between the four attempts.
		assert!(elapsed >= Duration::from_millis(350), "elapsed {elapsed:?}");
	}

	#[tokio::test]
	async fn test_network_failure_is_retryable() {
		let result = send_events(&[event()], &unreachable_config()).await;
		assert!(!result.success);
		assert!(result.retryable);
		assert!(result.error.is_some());
	}
}
