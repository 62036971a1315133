// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory page with a history stack, visibility and unload signals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use url::Url;

use super::{
	LifecycleEvent, LifecycleListener, ListenerId, NavigationCallback, NavigationObserver,
	NavigationSignal, PageContext, PageLifecycle, Visibility,
};
use crate::sync::lock;

const DEFAULT_USER_AGENT: &str = concat!("flowtel-headless/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
struct HistoryEntry {
	href: String,
	title: String,
}

#[derive(Debug)]
struct PageState {
	entries: Vec<HistoryEntry>,
	index: usize,
	referrer: String,
	visibility: Visibility,
}

impl PageState {
	fn current(&self) -> &HistoryEntry {
		&self.entries[self.index]
	}

	fn current_mut(&mut self) -> &mut HistoryEntry {
		&mut self.entries[self.index]
	}
}

/// A page that lives entirely in memory.
///
/// History methods mirror the browser: `push_state` and `replace_state`
/// change the URL first and then report to the installed navigation
/// observer; `back`/`forward` report a pop. Nothing is reported while no
/// observer is installed.
pub struct HeadlessPage {
	state: Mutex<PageState>,
	navigation: Mutex<Option<NavigationCallback>>,
	listeners: Mutex<Vec<(ListenerId, LifecycleListener)>>,
	next_listener: AtomicU64,
	user_agent: String,
}

impl HeadlessPage {
	/// Creates a page loaded at `href`.
	pub fn new(href: impl AsRef<str>) -> Self {
		Self {
			state: Mutex::new(PageState {
				entries: vec![HistoryEntry {
					href: normalize(href.as_ref()),
					title: String::new(),
				}],
				index: 0,
				referrer: String::new(),
				visibility: Visibility::Visible,
			}),
			navigation: Mutex::new(None),
			listeners: Mutex::new(Vec::new()),
			next_listener: AtomicU64::new(1),
			user_agent: DEFAULT_USER_AGENT.to_string(),
		}
	}

	pub fn with_title(self, title: impl Into<String>) -> Self {
		lock(&self.state).current_mut().title = title.into();
		self
	}

	pub fn with_referrer(self, referrer: impl Into<String>) -> Self {
		lock(&self.state).referrer = referrer.into();
		self
	}

	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = user_agent.into();
		self
	}

	pub fn set_title(&self, title: impl Into<String>) {
		lock(&self.state).current_mut().title = title.into();
	}

	/// Adds a history entry, resolving `url` against the current URL.
	pub fn push_state(&self, url: &str) {
		{
			let mut state = lock(&self.state);
			let href = resolve(&state.current().href, url);
			let title = state.current().title.clone();
			let next = state.index + 1;
			state.entries.truncate(next);
			state.entries.push(HistoryEntry { href, title });
			state.index = next;
		}
		self.notify(NavigationSignal::PushState);
	}

	/// Replaces the current history entry's URL.
	pub fn replace_state(&self, url: &str) {
		{
			let mut state = lock(&self.state);
			let href = resolve(&state.current().href, url);
			state.current_mut().href = href;
		}
		self.notify(NavigationSignal::ReplaceState);
	}

	/// Moves one entry back. Returns false at the start of history.
	pub fn back(&self) -> bool {
		let moved = {
			let mut state = lock(&self.state);
			if state.index == 0 {
				false
			} else {
				state.index -= 1;
				true
			}
		};
		if moved {
			self.notify(NavigationSignal::PopState);
		}
		moved
	}

	/// Moves one entry forward. Returns false at the end of history.
	pub fn forward(&self) -> bool {
		let moved = {
			let mut state = lock(&self.state);
			if state.index + 1 >= state.entries.len() {
				false
			} else {
				state.index += 1;
				true
			}
		};
		if moved {
			self.notify(NavigationSignal::PopState);
		}
		moved
	}

	/// Backgrounds the page, firing `visibilitychange` if it was visible.
	pub fn hide(&self) {
		self.set_visibility(Visibility::Hidden);
	}

	pub fn show(&self) {
		self.set_visibility(Visibility::Visible);
	}

	/// Fires `beforeunload`.
	pub fn unload(&self) {
		self.dispatch(LifecycleEvent::BeforeUnload);
	}

	pub fn visibility(&self) -> Visibility {
		lock(&self.state).visibility
	}

	pub fn history_len(&self) -> usize {
		lock(&self.state).entries.len()
	}

	pub fn listener_count(&self) -> usize {
		lock(&self.listeners).len()
	}

	pub fn is_navigation_installed(&self) -> bool {
		lock(&self.navigation).is_some()
	}

	fn set_visibility(&self, visibility: Visibility) {
		let changed = {
			let mut state = lock(&self.state);
			let changed = state.visibility != visibility;
			state.visibility = visibility;
			changed
		};
		if changed {
			self.dispatch(LifecycleEvent::VisibilityChange(visibility));
		}
	}

	fn notify(&self, signal: NavigationSignal) {
		let callback = lock(&self.navigation).clone();
		if let Some(callback) = callback {
			callback(signal);
		}
	}

	fn dispatch(&self, event: LifecycleEvent) {
		// Listeners may add or remove listeners; call them on a snapshot.
		let listeners: Vec<LifecycleListener> = lock(&self.listeners)
			.iter()
			.map(|(_, listener)| listener.clone())
			.collect();
		for listener in listeners {
			listener(event);
		}
	}
}

impl Default for HeadlessPage {
	fn default() -> Self {
		Self::new("about:blank")
	}
}

impl std::fmt::Debug for HeadlessPage {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HeadlessPage")
			.field("href", &self.href())
			.field("listeners", &self.listener_count())
			.field("navigation_installed", &self.is_navigation_installed())
			.finish()
	}
}

impl PageContext for HeadlessPage {
	fn href(&self) -> String {
		lock(&self.state).current().href.clone()
	}

	fn title(&self) -> String {
		lock(&self.state).current().title.clone()
	}

	fn referrer(&self) -> String {
		lock(&self.state).referrer.clone()
	}

	fn pathname(&self) -> String {
		let href = self.href();
		Url::parse(&href)
			.map(|url| url.path().to_string())
			.unwrap_or_default()
	}

	fn user_agent(&self) -> String {
		self.user_agent.clone()
	}
}

impl NavigationObserver for HeadlessPage {
	fn install(&self, callback: NavigationCallback) {
		*lock(&self.navigation) = Some(callback);
	}

	fn uninstall(&self) {
		*lock(&self.navigation) = None;
	}
}

impl PageLifecycle for HeadlessPage {
	fn add_listener(&self, listener: LifecycleListener) -> ListenerId {
		let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
		lock(&self.listeners).push((id, listener));
		id
	}

	fn remove_listener(&self, id: ListenerId) {
		lock(&self.listeners).retain(|(existing, _)| *existing != id);
	}
}

fn normalize(href: &str) -> String {
	Url::parse(href)
		.map(|url| url.to_string())
		.unwrap_or_else(|_| href.to_string())
}

fn resolve(current: &str, target: &str) -> String {
	Url::parse(current)
		.and_then(|base| base.join(target))
		.map(|url| url.to_string())
		.unwrap_or_else(|_| normalize(target))
}
