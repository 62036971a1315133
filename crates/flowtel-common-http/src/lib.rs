// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP utilities for the Flowtel tracker.
//!
//! This crate provides:
//! - Pre-configured async and blocking HTTP clients with a consistent User-Agent header
//! - Retry logic with exponential backoff for transient failures

mod client;
mod retry;

pub use client::{blocking_builder, builder, new_client_with_timeout, user_agent};
pub use retry::{retry, RetryConfig, RetryableError};
