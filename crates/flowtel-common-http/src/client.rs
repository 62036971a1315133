// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! HTTP client builders with the Flowtel User-Agent header.

use reqwest::{Client, ClientBuilder};
use std::time::Duration;

const SDK_NAME: &str = "flowtel-tracker";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Creates an async client builder with the standard User-Agent header.
///
/// # Example
/// ```ignore
/// let client = flowtel_common_http::builder()
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// ```
pub fn builder() -> ClientBuilder {
	Client::builder().user_agent(user_agent())
}

/// Creates a blocking client builder with the standard User-Agent header.
///
/// The blocking client owns an internal runtime. Build, use and drop it off
/// any async worker thread.
pub fn blocking_builder() -> reqwest::blocking::ClientBuilder {
	reqwest::blocking::Client::builder().user_agent(user_agent())
}

/// Creates an async client that gives up on a request after `timeout`.
pub fn new_client_with_timeout(timeout: Duration) -> reqwest::Result<Client> {
	builder().timeout(timeout).build()
}

/// Returns the standard User-Agent string.
///
/// Format: `flowtel-tracker/{version} ({os}-{arch})`
pub fn user_agent() -> String {
	format!(
		"{SDK_NAME}/{SDK_VERSION} ({}-{})",
		std::env::consts::OS,
		std::env::consts::ARCH
	)
}
