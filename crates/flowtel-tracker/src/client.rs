// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The tracker facade embedded by storefront pages.

use std::mem;
use std::sync::{Arc, Mutex};

use flowtel_tracker_core::{EventRecord, TrackerConfig};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::{BatchConfig, Batcher, EventBatcher, FlushResult};
use crate::dedup::{Dedup, Deduplicator};
use crate::error::Result;
use crate::host::Host;
use crate::pageview::{self, PageViewTracker, TrackCallback};
use crate::properties::Properties;
use crate::sender::{EventSender, HttpSender, SenderConfig};
use crate::sync::lock;

/// Builder for constructing a [`Tracker`].
///
/// Every collaborator can be substituted; anything not set is built from the
/// configuration passed to [`Tracker::init`].
#[derive(Default)]
pub struct TrackerBuilder {
	host: Host,
	sender: Option<Arc<dyn EventSender>>,
	batcher: Option<Arc<dyn Batcher>>,
	dedup: Option<Box<dyn Dedup>>,
}

impl TrackerBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Page capabilities the tracker observes and delivers through.
	pub fn host(mut self, host: Host) -> Self {
		self.host = host;
		self
	}

	/// Replaces the HTTP sender used by the default batcher.
	pub fn sender(mut self, sender: Arc<dyn EventSender>) -> Self {
		self.sender = Some(sender);
		self
	}

	/// Replaces the batcher entirely. `sender` is then unused.
	pub fn batcher(mut self, batcher: Arc<dyn Batcher>) -> Self {
		self.batcher = Some(batcher);
		self
	}

	pub fn dedup(mut self, dedup: Box<dyn Dedup>) -> Self {
		self.dedup = Some(dedup);
		self
	}

	pub fn build(self) -> Tracker {
		Tracker {
			inner: Arc::new(TrackerInner {
				host: self.host,
				overrides: Mutex::new(Overrides {
					sender: self.sender,
					batcher: self.batcher,
					dedup: self.dedup,
				}),
				state: Mutex::new(Lifecycle::Uninitialized),
			}),
		}
	}
}

struct Overrides {
	sender: Option<Arc<dyn EventSender>>,
	batcher: Option<Arc<dyn Batcher>>,
	dedup: Option<Box<dyn Dedup>>,
}

struct ActiveState {
	config: TrackerConfig,
	session_id: Uuid,
	batcher: Arc<dyn Batcher>,
	dedup: Box<dyn Dedup>,
	page_views: Option<PageViewTracker>,
}

enum Lifecycle {
	Uninitialized,
	Active(ActiveState),
	Destroyed,
}

struct TrackerInner {
	host: Host,
	overrides: Mutex<Overrides>,
	state: Mutex<Lifecycle>,
}

/// Storefront event tracker.
///
/// A tracker moves from uninitialised to active on [`Tracker::init`] and to
/// destroyed on [`Tracker::destroy`]. Tracking calls outside the active state
/// are ignored with a warning. Only `init` can fail.
///
/// Handles are cheap to clone and share one instance.
#[derive(Clone)]
pub struct Tracker {
	inner: Arc<TrackerInner>,
}

impl Tracker {
	/// A tracker on a headless page with the default collaborators.
	pub fn new() -> Self {
		Self::builder().build()
	}

	pub fn builder() -> TrackerBuilder {
		TrackerBuilder::new()
	}

	/// Validates `config`, starts a session and begins batching.
	///
	/// A second call, or a call after [`Tracker::destroy`], logs a warning and
	/// leaves the tracker unchanged. Must be called from within a tokio
	/// runtime unless a batcher was supplied to the builder.
	pub fn init(&self, config: TrackerConfig) -> Result<()> {
		let page_views = {
			let mut state = lock(&self.inner.state);
			match &*state {
				Lifecycle::Active(_) => {
					warn!("Tracker already initialized, ignoring init");
					return Ok(());
				}
				Lifecycle::Destroyed => {
					warn!("Tracker has been destroyed, ignoring init");
					return Ok(());
				}
				Lifecycle::Uninitialized => {}
			}

			config.validate()?;

			let mut overrides = lock(&self.inner.overrides);
			let batcher: Arc<dyn Batcher> = match overrides.batcher.take() {
				Some(batcher) => batcher,
				None => {
					let sender: Arc<dyn EventSender> = match &overrides.sender {
						Some(sender) => sender.clone(),
						None => Arc::new(HttpSender::new(SenderConfig::from(&config))?),
					};
					EventBatcher::start(BatchConfig::from(&config), sender, &self.inner.host)?
				}
			};
			let dedup = overrides
				.dedup
				.take()
				.unwrap_or_else(|| Box::new(Deduplicator::new()));
			drop(overrides);

			let page_views = config.auto_track_page_views.then(|| {
				PageViewTracker::new(
					self.inner.host.page.clone(),
					self.inner.host.navigation.clone(),
				)
			});

			let session_id = Uuid::new_v4();
			info!(
				shop_id = %config.shop_id,
				endpoint = %config.endpoint,
				session_id = %session_id,
				"Tracker initialized"
			);

			let debug = config.debug;
			*state = Lifecycle::Active(ActiveState {
				config,
				session_id,
				batcher,
				dedup,
				page_views: page_views.clone(),
			});
			page_views.map(|tracker| (tracker, debug))
		};

		// The initial page view re-enters `track`, so the state lock must be free.
		if let Some((tracker, debug)) = page_views {
			tracker.setup(self.track_callback(), debug);
		}

		Ok(())
	}

	/// Records an event. Duplicates inside the dedup window are dropped.
	pub fn track(&self, event_type: impl AsRef<str>, properties: impl Into<Properties>) {
		let event_type = event_type.as_ref();
		let properties = properties.into().into_map();

		let (batcher, record, debug) = {
			let mut state = lock(&self.inner.state);
			let Lifecycle::Active(active) = &mut *state else {
				warn!(event_type, "Tracker not initialized, event ignored");
				return;
			};

			if active.dedup.check(event_type, &properties) {
				if active.config.debug {
					debug!(event_type, "Duplicate event suppressed");
				}
				return;
			}

			let page = &self.inner.host.page;
			let record = EventRecord::new(
				&active.config.shop_id,
				active.session_id.to_string(),
				event_type,
				properties,
				page.href(),
				page.user_agent(),
			);
			(active.batcher.clone(), record, active.config.debug)
		};

		if debug {
			debug!(
				event_type = %record.event_type,
				url = %record.url,
				"Event tracked"
			);
		}
		batcher.add(record);
	}

	/// Records a page view for the current page, bypassing URL change detection.
	pub fn track_page_view(&self) {
		if !self.is_initialized() {
			warn!("Tracker not initialized, page view ignored");
			return;
		}
		pageview::track_page_view(self.inner.host.page.as_ref(), &self.track_callback());
	}

	/// Flushes queued events now. `None` when the tracker is not active.
	pub async fn flush(&self) -> Option<FlushResult> {
		let batcher = {
			let state = lock(&self.inner.state);
			match &*state {
				Lifecycle::Active(active) => active.batcher.clone(),
				_ => {
					warn!("Tracker not initialized, flush ignored");
					return None;
				}
			}
		};
		Some(batcher.flush().await)
	}

	/// Waits for any in-flight delivery, then flushes what is still queued.
	///
	/// Unlike [`Tracker::flush`], the result also reflects a batch that was
	/// being sent when the call began and any batch rejected since the
	/// previous drain. `None` when the tracker is not active.
	pub async fn drain(&self) -> Option<FlushResult> {
		let batcher = {
			let state = lock(&self.inner.state);
			match &*state {
				Lifecycle::Active(active) => active.batcher.clone(),
				_ => {
					warn!("Tracker not initialized, drain ignored");
					return None;
				}
			}
		};
		Some(batcher.drain().await)
	}

	/// Tears down page hooks, hands off queued events and ends the session.
	///
	/// No-op unless active. A destroyed tracker cannot be initialised again.
	pub fn destroy(&self) {
		let previous = {
			let mut state = lock(&self.inner.state);
			if !matches!(&*state, Lifecycle::Active(_)) {
				return;
			}
			mem::replace(&mut *state, Lifecycle::Destroyed)
		};

		if let Lifecycle::Active(mut active) = previous {
			if let Some(page_views) = &active.page_views {
				page_views.teardown();
			}
			active.batcher.destroy();
			active.dedup.clear();
			info!(session_id = %active.session_id, "Tracker destroyed");
		}
	}

	pub fn config(&self) -> Option<TrackerConfig> {
		match &*lock(&self.inner.state) {
			Lifecycle::Active(active) => Some(active.config.clone()),
			_ => None,
		}
	}

	pub fn session_id(&self) -> Option<Uuid> {
		match &*lock(&self.inner.state) {
			Lifecycle::Active(active) => Some(active.session_id),
			_ => None,
		}
	}

	pub fn is_initialized(&self) -> bool {
		matches!(&*lock(&self.inner.state), Lifecycle::Active(_))
	}

	/// Events waiting for the next flush.
	pub fn queue_len(&self) -> usize {
		match &*lock(&self.inner.state) {
			Lifecycle::Active(active) => active.batcher.queue_len(),
			_ => 0,
		}
	}

	pub fn host(&self) -> &Host {
		&self.inner.host
	}

	fn track_callback(&self) -> TrackCallback {
		let weak = Arc::downgrade(&self.inner);
		Arc::new(move |event_type: &str, properties: Properties| {
			if let Some(inner) = weak.upgrade() {
				Tracker { inner }.track(event_type, properties);
			}
		})
	}
}

impl Default for Tracker {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for Tracker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tracker")
			.field("initialized", &self.is_initialized())
			.field("session_id", &self.session_id())
			.field("host", &self.inner.host)
			.finish()
	}
}
