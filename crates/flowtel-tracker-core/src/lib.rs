// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Flowtel storefront tracker.
//!
//! These types describe what travels between the embedded tracker and the
//! collector endpoint:
//!
//! - [`EventRecord`]: one tracked event, serialised as camelCase JSON. The
//!   collector accepts a JSON array of records per request.
//! - [`EventType`]: the well-known storefront event keys.
//! - [`TrackerConfig`]: the immutable per-instance tracker configuration.

pub mod config;
pub mod event;

pub use config::{
	ConfigError, TrackerConfig, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_RETRIES,
	DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAY,
};
pub use event::{
	format_event_name, validate_batch, EventRecord, EventType, RecordError, UnknownEventType,
};
