// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event queue with size, timer and page-teardown flushing.
//!
//! One background task per batcher services the size trigger and the
//! interval timer. Manual flushes may race it; the in-flight guard turns the
//! loser into a no-op. The queue is snapshotted and cleared before any await,
//! so events added during a send land behind it.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use flowtel_tracker_core::{ConfigError, EventRecord, TrackerConfig};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Result, TrackerError};
use crate::host::{
	Beacon, Host, LifecycleEvent, ListenerId, PageLifecycle, SyncTransport, Visibility,
};
use crate::sender::EventSender;
use crate::sync::lock;

/// Settings for [`EventBatcher`].
#[derive(Debug, Clone)]
pub struct BatchConfig {
	/// Queue length that triggers an immediate flush.
	pub batch_size: usize,
	/// Period of the background flush timer.
	pub flush_interval: Duration,
	/// Collector endpoint for the teardown delivery paths.
	pub endpoint: String,
	pub debug: bool,
}

impl From<&TrackerConfig> for BatchConfig {
	fn from(config: &TrackerConfig) -> Self {
		Self {
			batch_size: config.batch_size,
			flush_interval: config.flush_interval,
			endpoint: config.endpoint.clone(),
			debug: config.debug,
		}
	}
}

/// Outcome of a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushResult {
	pub success: bool,
	/// Number of events in the sent snapshot.
	pub event_count: usize,
	pub error: Option<String>,
}

impl FlushResult {
	fn empty() -> Self {
		Self {
			success: true,
			event_count: 0,
			error: None,
		}
	}
}

/// Queue operations the tracker depends on.
#[async_trait::async_trait]
pub trait Batcher: Send + Sync {
	/// Enqueues an event. Dropped with a warning once destroyed.
	fn add(&self, event: EventRecord);

	/// Sends everything queued as one batch.
	async fn flush(&self) -> FlushResult;

	/// Delivers everything queued without awaiting, for page teardown.
	/// Returns whether delivery was handed off successfully.
	fn flush_sync(&self) -> bool;

	/// Stops the timer, removes page listeners and performs a final
	/// [`Batcher::flush_sync`]. Idempotent.
	fn destroy(&self);

	fn queue_len(&self) -> usize;

	/// Waits for any in-flight flush, then flushes what is still queued.
	///
	/// Fails when the final flush fails or when a batch was rejected since
	/// the previous drain.
	async fn drain(&self) -> FlushResult {
		self.flush().await
	}
}

/// Resets the in-flight flag and wakes drainers when a flush ends, however
/// it ends.
struct FlushGuard<'a> {
	flushing: &'a AtomicBool,
	idle: &'a Notify,
}

impl Drop for FlushGuard<'_> {
	fn drop(&mut self) {
		self.flushing.store(false, Ordering::SeqCst);
		self.idle.notify_waiters();
	}
}

/// Batches dropped after a non-retryable failure.
#[derive(Debug, Default)]
struct Rejected {
	events: usize,
	error: Option<String>,
}

/// The batcher used by the tracker.
pub struct EventBatcher {
	config: BatchConfig,
	sender: Arc<dyn EventSender>,
	beacon: Option<Arc<dyn Beacon>>,
	sync_transport: Arc<dyn SyncTransport>,
	lifecycle: Arc<dyn PageLifecycle>,
	queue: Mutex<Vec<EventRecord>>,
	destroyed: AtomicBool,
	flushing: AtomicBool,
	flush_notify: Arc<Notify>,
	idle: Notify,
	rejected: Mutex<Rejected>,
	listener: Mutex<Option<ListenerId>>,
	timer: Mutex<Option<JoinHandle<()>>>,
}

impl EventBatcher {
	/// Creates a batcher, hooks page teardown and starts the background task.
	///
	/// Must be called from within a tokio runtime.
	pub fn start(
		config: BatchConfig,
		sender: Arc<dyn EventSender>,
		host: &Host,
	) -> Result<Arc<Self>> {
		let handle = Handle::try_current().map_err(|_| TrackerError::RuntimeUnavailable)?;
		if config.batch_size == 0 {
			return Err(ConfigError::InvalidBatchSize.into());
		}
		if config.flush_interval.is_zero() {
			return Err(ConfigError::InvalidFlushInterval.into());
		}

		let batcher = Arc::new(Self {
			config,
			sender,
			beacon: host.beacon.clone(),
			sync_transport: host.sync_transport.clone(),
			lifecycle: host.lifecycle.clone(),
			queue: Mutex::new(Vec::new()),
			destroyed: AtomicBool::new(false),
			flushing: AtomicBool::new(false),
			flush_notify: Arc::new(Notify::new()),
			idle: Notify::new(),
			rejected: Mutex::new(Rejected::default()),
			listener: Mutex::new(None),
			timer: Mutex::new(None),
		});

		let weak: Weak<Self> = Arc::downgrade(&batcher);
		let id = batcher.lifecycle.add_listener(Arc::new(move |event: LifecycleEvent| {
			let Some(batcher) = weak.upgrade() else {
				return;
			};
			match event {
				LifecycleEvent::BeforeUnload
				| LifecycleEvent::VisibilityChange(Visibility::Hidden) => {
					batcher.flush_sync();
				}
				LifecycleEvent::VisibilityChange(Visibility::Visible) => {}
			}
		}));
		*lock(&batcher.listener) = Some(id);

		let task = handle.spawn(Self::run(
			Arc::downgrade(&batcher),
			batcher.flush_notify.clone(),
			batcher.config.flush_interval,
			batcher.config.batch_size,
		));
		*lock(&batcher.timer) = Some(task);

		Ok(batcher)
	}

	pub fn config(&self) -> &BatchConfig {
		&self.config
	}

	pub fn is_destroyed(&self) -> bool {
		self.destroyed.load(Ordering::SeqCst)
	}

	/// True while the background task is alive.
	pub fn is_running(&self) -> bool {
		lock(&self.timer)
			.as_ref()
			.is_some_and(|task| !task.is_finished())
	}

	/// Background loop. Holds the batcher only while flushing, so dropping
	/// the last handle stops it.
	async fn run(weak: Weak<Self>, wake: Arc<Notify>, period: Duration, batch_size: usize) {
		info!(
			flush_interval_ms = period.as_millis() as u64,
			batch_size,
			"Starting event batcher"
		);

		let mut ticker = interval_at(Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			let timed = tokio::select! {
				_ = ticker.tick() => true,
				_ = wake.notified() => false,
			};

			let Some(batcher) = weak.upgrade() else {
				break;
			};
			if batcher.is_destroyed() {
				break;
			}
			if !timed || batcher.queue_len() > 0 {
				batcher.flush().await;
			}
		}

		info!("Event batcher stopped");
	}

	/// Resolves once no flush is in flight.
	async fn wait_idle(&self) {
		loop {
			let idle = self.idle.notified();
			tokio::pin!(idle);
			idle.as_mut().enable();
			if !self.flushing.load(Ordering::SeqCst) {
				return;
			}
			idle.await;
		}
	}

	fn take_queue(&self) -> Vec<EventRecord> {
		mem::take(&mut *lock(&self.queue))
	}

	/// Puts a failed snapshot back ahead of anything queued since.
	fn requeue(&self, mut events: Vec<EventRecord>) {
		let mut queue = lock(&self.queue);
		let newer = mem::take(&mut *queue);
		events.extend(newer);
		*queue = events;
	}

	fn deliver_sync(&self, body: &[u8]) -> bool {
		if let Some(beacon) = &self.beacon {
			if beacon.send_beacon(&self.config.endpoint, body) {
				return true;
			}
			if self.config.debug {
				debug!("Beacon refused payload, falling back to blocking request");
			}
		}

		match self.sync_transport.post_json(&self.config.endpoint, body) {
			Ok(status) if (200..300).contains(&status) => true,
			Ok(status) => {
				if self.config.debug {
					debug!(status, "Blocking flush rejected");
				}
				false
			}
			Err(e) => {
				if self.config.debug {
					debug!(error = %e, "Blocking flush failed");
				}
				false
			}
		}
	}
}

#[async_trait::async_trait]
impl Batcher for EventBatcher {
	fn add(&self, event: EventRecord) {
		if self.is_destroyed() {
			warn!(event_type = %event.event_type, "Batcher destroyed, dropping event");
			return;
		}

		let len = {
			let mut queue = lock(&self.queue);
			queue.push(event);
			queue.len()
		};

		if self.config.debug {
			debug!(queue_len = len, "Event queued");
		}

		if len >= self.config.batch_size {
			self.flush_notify.notify_one();
		}
	}

	async fn flush(&self) -> FlushResult {
		if lock(&self.queue).is_empty() {
			return FlushResult::empty();
		}

		if self.flushing.swap(true, Ordering::SeqCst) {
			if self.config.debug {
				debug!("Flush already in progress");
			}
			return FlushResult::empty();
		}
		let _guard = FlushGuard {
			flushing: &self.flushing,
			idle: &self.idle,
		};

		let events = self.take_queue();
		if events.is_empty() {
			return FlushResult::empty();
		}
		let event_count = events.len();

		if self.config.debug {
			debug!(count = event_count, "Flushing event batch");
		}

		let result = self.sender.send_events(&events).await;
		if result.success {
			return FlushResult {
				success: true,
				event_count,
				error: None,
			};
		}

		if result.retryable {
			warn!(
				count = event_count,
				error = result.error.as_deref().unwrap_or_default(),
				"Event batch delivery failed, requeueing"
			);
			self.requeue(events);
		} else {
			if self.config.debug {
				debug!(
					count = event_count,
					error = result.error.as_deref().unwrap_or_default(),
					"Event batch rejected, dropping"
				);
			}
			let mut rejected = lock(&self.rejected);
			rejected.events += event_count;
			rejected.error = result.error.clone();
		}

		FlushResult {
			success: false,
			event_count,
			error: result.error,
		}
	}

	fn flush_sync(&self) -> bool {
		let events = self.take_queue();
		if events.is_empty() {
			return true;
		}

		let body = match serde_json::to_vec(&events) {
			Ok(body) => body,
			Err(e) => {
				warn!(error = %e, "Failed to serialize event batch");
				self.requeue(events);
				return false;
			}
		};

		if self.deliver_sync(&body) {
			if self.config.debug {
				debug!(count = events.len(), "Event batch handed off on teardown");
			}
			return true;
		}

		self.requeue(events);
		false
	}

	fn destroy(&self) {
		if self.destroyed.swap(true, Ordering::SeqCst) {
			return;
		}

		// The task exits at its next wake-up; an in-flight flush completes first.
		self.flush_notify.notify_one();

		if let Some(id) = lock(&self.listener).take() {
			self.lifecycle.remove_listener(id);
		}

		self.flush_sync();

		if self.config.debug {
			debug!("Event batcher destroyed");
		}
	}

	fn queue_len(&self) -> usize {
		lock(&self.queue).len()
	}

	async fn drain(&self) -> FlushResult {
		let mut result = FlushResult::empty();
		loop {
			// A failed in-flight batch is requeued before the flag clears.
			self.wait_idle().await;
			if self.queue_len() == 0 {
				break;
			}
			let flushed = self.flush().await;
			if flushed.event_count > 0 {
				result = flushed;
				break;
			}
		}

		let rejected = mem::take(&mut *lock(&self.rejected));
		if result.success && rejected.events > 0 {
			return FlushResult {
				success: false,
				event_count: result.event_count + rejected.events,
				error: rejected.error,
			};
		}
		result
	}
}

impl Drop for EventBatcher {
	fn drop(&mut self) {
		if let Some(id) = lock(&self.listener).take() {
			self.lifecycle.remove_listener(id);
		}
		self.flush_notify.notify_one();
	}
}

impl std::fmt::Debug for EventBatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventBatcher")
			.field("config", &self.config)
			.field("queue_len", &self.queue_len())
			.field("destroyed", &self.is_destroyed())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::host::HeadlessPage;
	use crate::sender::SendResult;
	use proptest::prelude::*;
	use serde_json::Map;
	use std::sync::atomic::AtomicUsize;
	use tokio::sync::Semaphore;

	#[derive(Default)]
	struct MockSender {
		batches: Mutex<Vec<Vec<String>>>,
		outcome: Mutex<Option<SendResult>>,
		gate: Option<Semaphore>,
	}

	impl MockSender {
		fn failing(result: SendResult) -> Self {
			Self {
				outcome: Mutex::new(Some(result)),
				..Self::default()
			}
		}

		fn gated() -> Self {
			Self {
				gate: Some(Semaphore::new(0)),
				..Self::default()
			}
		}

		fn succeed(&self) {
			*self.outcome.lock().unwrap() = None;
		}

		fn release(&self) {
			if let Some(gate) = &self.gate {
				gate.add_permits(1);
			}
		}

		fn batches(&self) -> Vec<Vec<String>> {
			self.batches.lock().unwrap().clone()
		}
	}

	#[async_trait::async_trait]
	impl EventSender for MockSender {
		async fn send_events(&self, events: &[EventRecord]) -> SendResult {
			self.batches
				.lock()
				.unwrap()
				.push(events.iter().map(|e| e.event_type.clone()).collect());
			if let Some(gate) = &self.gate {
				gate.acquire().await.unwrap().forget();
			}
			self.outcome.lock().unwrap().clone().unwrap_or_else(SendResult::ok)
		}
	}

	struct MockBeacon {
		accept: bool,
		calls: AtomicUsize,
		payloads: Mutex<Vec<Vec<u8>>>,
	}

	impl MockBeacon {
		fn new(accept: bool) -> Self {
			Self {
				accept,
				calls: AtomicUsize::new(0),
				payloads: Mutex::new(Vec::new()),
			}
		}
	}

	impl Beacon for MockBeacon {
		fn send_beacon(&self, _endpoint: &str, body: &[u8]) -> bool {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.payloads.lock().unwrap().push(body.to_vec());
			self.accept
		}
	}

	struct MockTransport {
		status: u16,
		calls: AtomicUsize,
	}

	impl MockTransport {
		fn new(status: u16) -> Self {
			Self {
				status,
				calls: AtomicUsize::new(0),
			}
		}
	}

	impl SyncTransport for MockTransport {
		fn post_json(&self, _endpoint: &str, _body: &[u8]) -> Result<u16> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			Ok(self.status)
		}
	}

	fn config(batch_size: usize) -> BatchConfig {
		BatchConfig {
			batch_size,
			flush_interval: Duration::from_secs(60),
			endpoint: "https://collector.test/events".to_string(),
			debug: true,
		}
	}

	fn event(event_type: &str) -> EventRecord {
		EventRecord::new(
			"shop_1",
			"session_1",
			event_type,
			Map::new(),
			"https://shop.test/",
			"test-agent",
		)
	}

	struct Fixture {
		page: Arc<HeadlessPage>,
		transport: Arc<MockTransport>,
		host: Host,
	}

	fn fixture(transport_status: u16) -> Fixture {
		let page = Arc::new(HeadlessPage::new("https://shop.test/"));
		let transport = Arc::new(MockTransport::new(transport_status));
		let host = Host::headless(page.clone()).with_sync_transport(transport.clone());
		Fixture {
			page,
			transport,
			host,
		}
	}

	async fn settle() {
		for _ in 0..5 {
			tokio::task::yield_now().await;
		}
	}

	#[test]
	fn test_start_requires_runtime() {
		let fx = fixture(200);
		let result = EventBatcher::start(config(10), Arc::new(MockSender::default()), &fx.host);
		assert!(matches!(result, Err(TrackerError::RuntimeUnavailable)));
	}

	#[tokio::test]
	async fn test_adds_below_batch_size_do_not_flush() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::default());
		let batcher = EventBatcher::start(config(5), sender.clone(), &fx.host).unwrap();

		for _ in 0..4 {
			batcher.add(event("add_to_cart"));
		}
		settle().await;

		assert_eq!(batcher.queue_len(), 4);
		assert!(sender.batches().is_empty());
		assert!(batcher.is_running());
	}

	#[tokio::test]
	async fn test_reaching_batch_size_flushes_once() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::default());
		let batcher = EventBatcher::start(config(3), sender.clone(), &fx.host).unwrap();

		batcher.add(event("page_view"));
		batcher.add(event("product_viewed"));
		batcher.add(event("add_to_cart"));
		settle().await;

		assert_eq!(
			sender.batches(),
			vec![vec!["page_view", "product_viewed", "add_to_cart"]]
		);
		assert_eq!(batcher.queue_len(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn test_timer_flushes_non_empty_queue() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::default());
		let mut cfg = config(100);
		cfg.flush_interval = Duration::from_millis(5000);
		let batcher = EventBatcher::start(cfg, sender.clone(), &fx.host).unwrap();

		tokio::time::sleep(Duration::from_millis(5100)).await;
		assert!(sender.batches().is_empty(), "empty queue must not be sent");

		batcher.add(event("add_to_cart"));
		tokio::time::sleep(Duration::from_millis(4000)).await;
		assert!(sender.batches().is_empty());

		tokio::time::sleep(Duration::from_millis(1000)).await;
		settle().await;
		assert_eq!(sender.batches().len(), 1);
	}

	#[tokio::test]
	async fn test_empty_flush_succeeds_without_sending() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::default());
		let batcher = EventBatcher::start(config(10), sender.clone(), &fx.host).unwrap();

		let result = batcher.flush().await;
		assert_eq!(result, FlushResult::empty());
		assert!(sender.batches().is_empty());
	}

	#[tokio::test]
	async fn test_retryable_failure_requeues_ahead_of_newer_events() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::gated());
		*sender.outcome.lock().unwrap() = Some(SendResult::failed("HTTP 503", true));
		let batcher = EventBatcher::start(config(100), sender.clone(), &fx.host).unwrap();

		batcher.add(event("page_view"));
		batcher.add(event("add_to_cart"));

		let flushing = tokio::spawn({
			let batcher = batcher.clone();
			async move { batcher.flush().await }
		});
		settle().await;

		assert_eq!(batcher.queue_len(), 0, "queue is cleared before the send");
		batcher.add(event("checkout_started"));
		sender.release();

		let result = flushing.await.unwrap();
		assert!(!result.success);
		assert_eq!(result.event_count, 2);

		sender.succeed();
		sender.release();
		let retried = batcher.flush().await;
		assert!(retried.success);
		assert_eq!(
			sender.batches()[1],
			vec!["page_view", "add_to_cart", "checkout_started"]
		);
	}

	#[tokio::test]
	async fn test_non_retryable_failure_drops_batch() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::failing(SendResult::failed("Client error: 400", false)));
		let batcher = EventBatcher::start(config(100), sender.clone(), &fx.host).unwrap();

		batcher.add(event("add_to_cart"));
		let result = batcher.flush().await;

		assert!(!result.success);
		assert_eq!(result.error.as_deref(), Some("Client error: 400"));
		assert_eq!(batcher.queue_len(), 0);
	}

	#[tokio::test]
	async fn test_concurrent_flush_is_a_no_op() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::gated());
		let batcher = EventBatcher::start(config(100), sender.clone(), &fx.host).unwrap();

		batcher.add(event("add_to_cart"));
		let first = tokio::spawn({
			let batcher = batcher.clone();
			async move { batcher.flush().await }
		});
		settle().await;

		batcher.add(event("remove_from_cart"));
		let second = batcher.flush().await;
		assert_eq!(second, FlushResult::empty());

		sender.release();
		let first = first.await.unwrap();
		assert_eq!(first.event_count, 1);
		assert_eq!(sender.batches().len(), 1);
		assert_eq!(batcher.queue_len(), 1);
	}

	#[tokio::test]
	async fn test_flush_sync_prefers_beacon() {
		let fx = fixture(200);
		let beacon = Arc::new(MockBeacon::new(true));
		let host = fx.host.clone().with_beacon(beacon.clone());
		let batcher =
			EventBatcher::start(config(100), Arc::new(MockSender::default()), &host).unwrap();

		batcher.add(event("purchase_completed"));
		assert!(batcher.flush_sync());

		assert_eq!(beacon.calls.load(Ordering::SeqCst), 1);
		assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 0);
		let sent: Vec<EventRecord> =
			serde_json::from_slice(&beacon.payloads.lock().unwrap()[0]).unwrap();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].event_type, "purchase_completed");
	}

	#[tokio::test]
	async fn test_flush_sync_falls_back_when_beacon_refuses() {
		let fx = fixture(204);
		let beacon = Arc::new(MockBeacon::new(false));
		let host = fx.host.clone().with_beacon(beacon.clone());
		let batcher =
			EventBatcher::start(config(100), Arc::new(MockSender::default()), &host).unwrap();

		batcher.add(event("add_to_cart"));
		assert!(batcher.flush_sync());
		assert_eq!(beacon.calls.load(Ordering::SeqCst), 1);
		assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 1);
		assert_eq!(batcher.queue_len(), 0);
	}

	#[tokio::test]
	async fn test_flush_sync_requeues_when_all_paths_fail() {
		let fx = fixture(503);
		let host = fx.host.clone().with_beacon(Arc::new(MockBeacon::new(false)));
		let batcher =
			EventBatcher::start(config(100), Arc::new(MockSender::default()), &host).unwrap();

		batcher.add(event("page_view"));
		batcher.add(event("add_to_cart"));
		assert!(!batcher.flush_sync());
		assert_eq!(batcher.queue_len(), 2);
	}

	#[tokio::test]
	async fn test_hidden_page_triggers_flush_sync() {
		let fx = fixture(200);
		let batcher =
			EventBatcher::start(config(100), Arc::new(MockSender::default()), &fx.host).unwrap();

		batcher.add(event("add_to_cart"));
		fx.page.hide();
		assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 1);
		assert_eq!(batcher.queue_len(), 0);

		batcher.add(event("add_to_cart"));
		fx.page.show();
		assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 1);

		fx.page.unload();
		assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn test_destroy_delivers_once_and_stops() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::default());
		let batcher = EventBatcher::start(config(100), sender.clone(), &fx.host).unwrap();
		assert_eq!(fx.page.listener_count(), 1);

		for _ in 0..3 {
			batcher.add(event("add_to_cart"));
		}
		batcher.destroy();
		batcher.destroy();
		settle().await;

		assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 1);
		assert!(sender.batches().is_empty());
		assert_eq!(fx.page.listener_count(), 0);
		assert!(batcher.is_destroyed());
		assert!(!batcher.is_running());

		batcher.add(event("add_to_cart"));
		assert_eq!(batcher.queue_len(), 0);
	}

	#[tokio::test]
	async fn test_destroy_lets_in_flight_flush_finish() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::gated());
		let batcher = EventBatcher::start(config(100), sender.clone(), &fx.host).unwrap();

		batcher.add(event("add_to_cart"));
		let flushing = tokio::spawn({
			let batcher = batcher.clone();
			async move { batcher.flush().await }
		});
		settle().await;

		batcher.destroy();
		assert_eq!(fx.transport.calls.load(Ordering::SeqCst), 0, "nothing left to hand off");

		sender.release();
		assert!(flushing.await.unwrap().success);
	}

	#[tokio::test]
	async fn test_drain_waits_for_size_triggered_flush() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::gated());
		*sender.outcome.lock().unwrap() = Some(SendResult::failed("HTTP 503", true));
		let batcher = EventBatcher::start(config(3), sender.clone(), &fx.host).unwrap();

		for _ in 0..3 {
			batcher.add(event("add_to_cart"));
		}
		settle().await;
		assert_eq!(sender.batches().len(), 1);
		assert_eq!(batcher.flush().await, FlushResult::empty());

		let draining = tokio::spawn({
			let batcher = batcher.clone();
			async move { batcher.drain().await }
		});
		settle().await;
		assert!(!draining.is_finished());

		// The background send fails and requeues; drain resends the batch.
		sender.release();
		settle().await;
		assert_eq!(sender.batches().len(), 2);

		sender.succeed();
		sender.release();
		let result = draining.await.unwrap();
		assert!(result.success);
		assert_eq!(result.event_count, 3);
		assert_eq!(batcher.queue_len(), 0);
	}

	#[tokio::test]
	async fn test_drain_reports_batch_rejected_in_background() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::failing(SendResult::failed("Client error: 400", false)));
		let batcher = EventBatcher::start(config(2), sender.clone(), &fx.host).unwrap();

		batcher.add(event("add_to_cart"));
		batcher.add(event("checkout_started"));
		settle().await;
		assert_eq!(sender.batches().len(), 1);
		assert_eq!(batcher.queue_len(), 0);

		let result = batcher.drain().await;
		assert!(!result.success);
		assert_eq!(result.event_count, 2);
		assert_eq!(result.error.as_deref(), Some("Client error: 400"));

		assert_eq!(batcher.drain().await, FlushResult::empty());
	}

	#[tokio::test]
	async fn test_drain_flushes_queue_when_idle() {
		let fx = fixture(200);
		let sender = Arc::new(MockSender::default());
		let batcher = EventBatcher::start(config(100), sender.clone(), &fx.host).unwrap();

		batcher.add(event("product_viewed"));
		let result = batcher.drain().await;

		assert!(result.success);
		assert_eq!(result.event_count, 1);
		assert_eq!(sender.batches(), vec![vec!["product_viewed"]]);
	}

	#[tokio::test]
	async fn test_dropping_batcher_releases_it() {
		let fx = fixture(200);
		let batcher =
			EventBatcher::start(config(100), Arc::new(MockSender::default()), &fx.host).unwrap();
		let weak = Arc::downgrade(&batcher);
		assert_eq!(fx.page.listener_count(), 1);

		drop(batcher);
		settle().await;

		assert!(weak.upgrade().is_none());
		assert_eq!(fx.page.listener_count(), 0);
	}

	proptest! {
		#[test]
		fn test_queue_len_tracks_adds_below_batch_size(adds in 0usize..20) {
			let runtime = tokio::runtime::Builder::new_current_thread()
				.enable_time()
				.build()
				.unwrap();
			runtime.block_on(async {
				let fx = fixture(200);
				let sender = Arc::new(MockSender::default());
				let batcher = EventBatcher::start(config(20), sender.clone(), &fx.host).unwrap();

				for _ in 0..adds {
					batcher.add(event("product_viewed"));
				}
				settle().await;

				assert_eq!(batcher.queue_len(), adds);
				assert!(sender.batches().is_empty());
			});
		}
	}
}
