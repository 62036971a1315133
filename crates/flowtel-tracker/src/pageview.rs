// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Automatic page-view tracking.
//!
//! Fires once for the initial load and once per distinct URL reached through
//! the History API or back/forward navigation.

use std::sync::{Arc, Mutex, Weak};

use tokio::runtime::Handle;
use tracing::debug;

use crate::host::{NavigationObserver, NavigationSignal, PageContext};
use crate::properties::Properties;
use crate::sync::lock;

/// Event type emitted for page views.
pub const PAGE_VIEW_EVENT: &str = "page_view";

/// Receives `(event_type, properties)` for each detected page view.
pub type TrackCallback = Arc<dyn Fn(&str, Properties) + Send + Sync>;

/// Snapshot of the page at the moment a page view is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageViewProperties {
	pub url: String,
	pub title: String,
	pub referrer: String,
	pub path: String,
}

impl PageViewProperties {
	pub fn capture(page: &dyn PageContext) -> Self {
		Self {
			url: page.href(),
			title: page.title(),
			referrer: page.referrer(),
			path: page.pathname(),
		}
	}
}

impl From<PageViewProperties> for Properties {
	fn from(view: PageViewProperties) -> Self {
		Properties::new()
			.insert("url", view.url)
			.insert("title", view.title)
			.insert("referrer", view.referrer)
			.insert("path", view.path)
	}
}

#[derive(Default)]
struct Observation {
	last_url: Option<String>,
	callback: Option<TrackCallback>,
	debug: bool,
}

struct Inner {
	page: Arc<dyn PageContext>,
	navigation: Arc<dyn NavigationObserver>,
	state: Mutex<Observation>,
}

impl Inner {
	fn check(&self) {
		let href = self.page.href();
		let (callback, debug) = {
			let mut state = lock(&self.state);
			let Some(callback) = state.callback.clone() else {
				return;
			};
			if state.last_url.as_deref() == Some(href.as_str()) {
				return;
			}
			state.last_url = Some(href);
			(callback, state.debug)
		};

		let view = PageViewProperties::capture(self.page.as_ref());
		if debug {
			debug!(url = %view.url, path = %view.path, "Page view detected");
		}
		callback(PAGE_VIEW_EVENT, view.into());
	}

	fn on_navigation(self: Arc<Self>, signal: NavigationSignal) {
		match signal {
			// The URL is already current when popstate fires.
			NavigationSignal::PopState => self.check(),
			// Defer so the check runs after the history call has fully returned.
			NavigationSignal::PushState | NavigationSignal::ReplaceState => {
				match Handle::try_current() {
					Ok(handle) => {
						handle.spawn(async move { self.check() });
					}
					Err(_) => self.check(),
				}
			}
		}
	}
}

/// Observes navigation on a page and reports page views.
#[derive(Clone)]
pub struct PageViewTracker {
	inner: Arc<Inner>,
}

impl PageViewTracker {
	pub fn new(page: Arc<dyn PageContext>, navigation: Arc<dyn NavigationObserver>) -> Self {
		Self {
			inner: Arc::new(Inner {
				page,
				navigation,
				state: Mutex::new(Observation::default()),
			}),
		}
	}

	/// Starts observing and reports the current page immediately.
	///
	/// Calling `setup` again replaces the callback and starts fresh.
	pub fn setup(&self, callback: TrackCallback, debug: bool) {
		{
			let mut state = lock(&self.inner.state);
			state.last_url = None;
			state.callback = Some(callback);
			state.debug = debug;
		}

		let weak: Weak<Inner> = Arc::downgrade(&self.inner);
		self.inner.navigation.install(Arc::new(move |signal: NavigationSignal| {
			if let Some(inner) = weak.upgrade() {
				inner.on_navigation(signal);
			}
		}));

		if debug {
			debug!("Page view auto-tracking installed");
		}
		self.inner.check();
	}

	/// Stops observing and forgets the last reported URL.
	pub fn teardown(&self) {
		self.inner.navigation.uninstall();
		*lock(&self.inner.state) = Observation::default();
	}

	pub fn is_active(&self) -> bool {
		lock(&self.inner.state).callback.is_some()
	}

	pub fn last_url(&self) -> Option<String> {
		lock(&self.inner.state).last_url.clone()
	}
}

impl std::fmt::Debug for PageViewTracker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PageViewTracker")
			.field("active", &self.is_active())
			.field("last_url", &self.last_url())
			.finish()
	}
}

/// Reports the current page unconditionally.
pub fn track_page_view(page: &dyn PageContext, track: &TrackCallback) {
	track(PAGE_VIEW_EVENT, PageViewProperties::capture(page).into());
}
