// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Time-windowed suppression of repeated events.
//!
//! An event's identity is its type plus a fixed set of identifying
//! properties. A second event with the same identity inside the window is a
//! duplicate. The window is measured from the last accepted occurrence.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::pageview::PAGE_VIEW_EVENT;

/// Window for ordinary events.
pub const DEDUP_WINDOW: Duration = Duration::from_millis(1000);

/// Window for page views, which browsers can signal several times per navigation.
pub const PAGE_VIEW_DEDUP_WINDOW: Duration = Duration::from_millis(3000);

/// Properties that make up an event's identity, in key order.
pub const IDENTITY_PROPERTIES: [&str; 4] = ["productId", "orderId", "url", "path"];

/// Ledger entries older than this are purged on every check.
const STALE_AFTER: Duration = Duration::from_millis(2 * 3000);

/// Duplicate filter consulted by the tracker before enqueueing.
pub trait Dedup: Send {
	/// Returns true when the event should be dropped. A false answer records
	/// the event, restarting its window.
	fn check(&mut self, event_type: &str, properties: &Map<String, Value>) -> bool;

	/// Forgets everything seen so far.
	fn clear(&mut self);
}

/// Derives the identity key `type::k1:v1|k2:v2` from the present identity
/// properties. Strings are used as-is, other values as JSON text.
pub fn dedup_key(event_type: &str, properties: &Map<String, Value>) -> String {
	let parts: Vec<String> = IDENTITY_PROPERTIES
		.iter()
		.filter_map(|name| {
			properties.get(*name).map(|value| match value {
				Value::String(s) => format!("{name}:{s}"),
				other => format!("{name}:{other}"),
			})
		})
		.collect();

	format!("{event_type}::{}", parts.join("|"))
}

/// Window that applies to `event_type`.
pub fn window_for(event_type: &str) -> Duration {
	if event_type == PAGE_VIEW_EVENT {
		PAGE_VIEW_DEDUP_WINDOW
	} else {
		DEDUP_WINDOW
	}
}

/// In-memory ledger of last-seen times keyed by identity.
#[derive(Debug, Default)]
pub struct Deduplicator {
	ledger: HashMap<String, Instant>,
}

impl Deduplicator {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn is_duplicate(&mut self, event_type: &str, key: &str) -> bool {
		self.is_duplicate_at(event_type, key, Instant::now())
	}

	pub fn is_duplicate_at(&mut self, event_type: &str, key: &str, now: Instant) -> bool {
		self.ledger
			.retain(|_, seen| now.saturating_duration_since(*seen) <= STALE_AFTER);

		if let Some(last) = self.ledger.get(key) {
			if now.saturating_duration_since(*last) < window_for(event_type) {
				return true;
			}
		}

		self.ledger.insert(key.to_string(), now);
		false
	}

	pub fn len(&self) -> usize {
		self.ledger.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ledger.is_empty()
	}
}

impl Dedup for Deduplicator {
	fn check(&mut self, event_type: &str, properties: &Map<String, Value>) -> bool {
		let key = dedup_key(event_type, properties);
		self.is_duplicate(event_type, &key)
	}

	fn clear(&mut self) {
		self.ledger.clear();
	}
}
