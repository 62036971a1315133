// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Retry logic with exponential backoff for HTTP requests.

use std::time::Duration;
use tracing::debug;

/// Backoff policy for [`retry`].
///
/// The first attempt is always made; `max_retries` counts the attempts that
/// follow a retryable failure. The delay after failed attempt `n` (0-based)
/// is `base_delay * backoff_factor^n`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub max_retries: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			base_delay: Duration::from_millis(1000),
			max_delay: Duration::from_secs(60),
			backoff_factor: 2.0,
			jitter: false,
		}
	}
}

impl RetryConfig {
	/// Plain doubling backoff without jitter.
	///
	/// `max_delay` is raised to the last delay of the budget, so every
	/// configured delay is honoured in full.
	pub fn exponential(max_retries: u32, base_delay: Duration) -> Self {
		let defaults = Self::default();
		let last = 2u32
			.checked_pow(max_retries.saturating_sub(1))
			.map_or(Duration::MAX, |factor| base_delay.saturating_mul(factor));
		Self {
			max_retries,
			base_delay,
			max_delay: defaults.max_delay.max(last),
			..defaults
		}
	}

	/// Total number of attempts, including the first.
	pub fn max_attempts(&self) -> u32 {
		self.max_retries.saturating_add(1)
	}

	/// Delay to wait after the failed attempt with the given 0-based index.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
		let exponential_delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
		let capped_delay = exponential_delay.min(self.max_delay.as_secs_f64());

		let final_delay = if self.jitter {
			capped_delay * (0.5 + fastrand::f64())
		} else {
			capped_delay
		};

		Duration::try_from_secs_f64(final_delay).unwrap_or(self.max_delay)
	}
}

/// Classifies an error as transient (worth another attempt) or permanent.
pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		match self.status() {
			Some(status) => status.is_server_error(),
			// No response at all: connect failure, timeout, reset.
			None => !self.is_builder(),
		}
	}
}

/// Runs `f` until it succeeds, fails permanently, or the retry budget is spent.
///
/// `f` receives the 0-based attempt number. The last error is returned when
/// attempts run out.
pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut(u32) -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Debug,
{
	let mut attempt = 0;

	loop {
		match f(attempt).await {
			Ok(result) => return Ok(result),
			Err(err) => {
				if !err.is_retryable() {
					debug!(
						error = ?err,
						attempt,
						"Non-retryable error encountered"
					);
					return Err(err);
				}

				if attempt >= cfg.max_retries {
					debug!(
						error = ?err,
						attempts = attempt + 1,
						"Retry budget exhausted"
					);
					return Err(err);
				}

				let delay = cfg.delay_for(attempt);
				debug!(
					error = ?err,
					attempt,
					max_retries = cfg.max_retries,
					delay_ms = delay.as_millis(),
					"Retrying after error"
				);

				tokio::time::sleep(delay).await;
				attempt += 1;
			}
		}
	}
}
