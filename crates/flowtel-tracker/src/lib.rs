// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storefront event tracker for Flowtel analytics.
//!
//! Events tracked on a storefront page are deduplicated, queued and delivered
//! to the collector in batches. Delivery survives flaky networks (bounded
//! retries with exponential backoff, then re-queueing) and page teardown
//! (a final hand-off through a beacon or a blocking request).
//!
//! # Quick Start
//!
//! ```ignore
//! use flowtel_tracker::{Properties, Tracker, TrackerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tracker = Tracker::new();
//!     tracker.init(TrackerConfig::new("shop_123", "https://collector.example.com/api/events"))?;
//!
//!     tracker.track("add_to_cart", Properties::new()
//!         .insert("productId", "sku_42")
//!         .insert("quantity", 1)
//!     );
//!
//!     // Hands off anything still queued and removes page hooks.
//!     tracker.destroy();
//!     Ok(())
//! }
//! ```
//!
//! # When events are sent
//!
//! - when the queue reaches `batchSize` (default 10)
//! - every `flushInterval` (default 5 s) if anything is queued
//! - when the page is hidden or about to unload
//! - on [`Tracker::flush`] and [`Tracker::destroy`]
//!
//! # Delivery failures
//!
//! | Collector answer | Outcome |
//! |------------------|---------|
//! | 2xx | delivered |
//! | 4xx | batch dropped, no retry |
//! | 5xx / no response | retried with backoff, then re-queued for the next flush |
//!
//! Failures never surface from `track`; only [`Tracker::init`] returns errors.
//!
//! # Embedding
//!
//! The tracker reaches the page only through the traits in [`host`].
//! [`host::HeadlessPage`] provides an in-memory page for native use and tests.

pub mod batch;
pub mod client;
pub mod dedup;
pub mod error;
pub mod host;
pub mod pageview;
pub mod properties;
pub mod sender;

mod sync;

pub use batch::{BatchConfig, Batcher, EventBatcher, FlushResult};
pub use client::{Tracker, TrackerBuilder};
pub use dedup::{dedup_key, Dedup, Deduplicator};
pub use error::{Result, TrackerError};
pub use host::{HeadlessPage, Host};
pub use pageview::{PageViewProperties, PageViewTracker};
pub use properties::Properties;
pub use sender::{send_events, EventSender, HttpSender, SendResult, SenderConfig};

pub use flowtel_tracker_core::{
	format_event_name, EventRecord, EventType, TrackerConfig,
};
