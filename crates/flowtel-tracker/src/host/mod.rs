// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Capabilities the tracker needs from the page it is embedded in.
//!
//! A browser binding implements these over `window.location`, the History
//! API, `beforeunload`/`visibilitychange` and `navigator.sendBeacon`.
//! [`HeadlessPage`] implements them in memory for native embedding and tests.

mod blocking;
mod headless;

use std::fmt;
use std::sync::Arc;

pub use blocking::BlockingHttpTransport;
pub use headless::HeadlessPage;

use crate::error::Result;

/// Read access to the current document.
pub trait PageContext: Send + Sync {
	/// Full URL of the current document.
	fn href(&self) -> String;
	fn title(&self) -> String;
	fn referrer(&self) -> String;
	/// Path component of [`PageContext::href`].
	fn pathname(&self) -> String;
	fn user_agent(&self) -> String;
}

/// History mutation observed by a [`NavigationObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationSignal {
	/// `history.pushState` completed.
	PushState,
	/// `history.replaceState` completed.
	ReplaceState,
	/// Browser back/forward (`popstate`).
	PopState,
}

pub type NavigationCallback = Arc<dyn Fn(NavigationSignal) + Send + Sync>;

/// Reversible hook into SPA navigation.
///
/// `install` wraps the two history mutation entry points and listens for
/// back/forward; the callback runs after the wrapped call has returned.
/// `uninstall` restores the original entry points and removes the listener.
/// Installing again replaces the previous callback.
pub trait NavigationObserver: Send + Sync {
	fn install(&self, callback: NavigationCallback);
	fn uninstall(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
	Visible,
	Hidden,
}

/// Page teardown signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
	BeforeUnload,
	VisibilityChange(Visibility),
}

pub type LifecycleListener = Arc<dyn Fn(LifecycleEvent) + Send + Sync>;

/// Handle returned by [`PageLifecycle::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

pub trait PageLifecycle: Send + Sync {
	fn add_listener(&self, listener: LifecycleListener) -> ListenerId;
	fn remove_listener(&self, id: ListenerId);
}

/// Fire-and-forget delivery that survives page teardown.
pub trait Beacon: Send + Sync {
	/// Returns whether the payload was queued, not whether it was delivered.
	fn send_beacon(&self, endpoint: &str, body: &[u8]) -> bool;
}

/// Blocking JSON POST used when no beacon is available or it refuses a payload.
pub trait SyncTransport: Send + Sync {
	/// Returns the HTTP status code of the response.
	fn post_json(&self, endpoint: &str, body: &[u8]) -> Result<u16>;
}

/// The set of page capabilities a tracker instance is wired to.
#[derive(Clone)]
pub struct Host {
	pub page: Arc<dyn PageContext>,
	pub navigation: Arc<dyn NavigationObserver>,
	pub lifecycle: Arc<dyn PageLifecycle>,
	pub beacon: Option<Arc<dyn Beacon>>,
	pub sync_transport: Arc<dyn SyncTransport>,
}

impl Host {
	/// Wires every page capability to one headless page, without a beacon.
	pub fn headless(page: Arc<HeadlessPage>) -> Self {
		Self {
			page: page.clone(),
			navigation: page.clone(),
			lifecycle: page,
			beacon: None,
			sync_transport: Arc::new(BlockingHttpTransport::default()),
		}
	}

	pub fn with_beacon(mut self, beacon: Arc<dyn Beacon>) -> Self {
		self.beacon = Some(beacon);
		self
	}

	pub fn with_sync_transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
		self.sync_transport = transport;
		self
	}
}

impl Default for Host {
	fn default() -> Self {
		Self::headless(Arc::new(HeadlessPage::default()))
	}
}

impl fmt::Debug for Host {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Host")
			.field("href", &self.page.href())
			.field("beacon", &self.beacon.is_some())
			.finish_non_exhaustive()
	}
}
