//! Event buffer and flush manager
//!
//! `EventTracker` validates incoming events, appends them to an in-memory
//! buffer and writes them to the column store in batches, either when the
//! buffer reaches the batch size or on a fixed timer.
//!
//! # Flushing
//!
//! A flush detaches the whole buffer, so events tracked while a write is in
//! flight land in a fresh buffer. Flushes are serialized: if a write fails,
//! the batch is put back at the head of the buffer before any other flush
//! can detach it. When the re-queued buffer grows beyond twice the batch
//! size it is cut back to exactly one batch, dropping the newest events.
//!
//! # Example
//!
//! ```ignore
//! let tracker = EventTracker::new(TrackerConfig::from_env(), store).with_cache(cache);
//! tracker.start();
//!
//! let id = tracker.track(CreateEventRequest::new(EventCategory::UserInteraction, "Click"))?;
//!
//! // ... later, graceful shutdown
//! tracker.shutdown().await;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::buffer::EventBuffer;
use crate::config::TrackerConfig;
use crate::event::{CreateEventRequest, Event};
use crate::realtime::RealtimeCache;
use crate::store::{CacheStore, EventStore};
use crate::validation::{validate_event, ValidationError};

/// Result of a single flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlushOutcome {
    /// Nothing was buffered; the store was not called
    Empty,
    /// The batch was written
    Written { count: usize },
    /// The write failed and the batch was re-queued
    Failed { attempted: usize, dropped: usize },
}

/// An item of a batch request that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEvent {
    /// Position of the request in the submitted batch
    pub index: usize,
    pub error: ValidationError,
}

/// Per-item outcome of `track_batch`
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub accepted: Vec<Uuid>,
    pub rejected: Vec<RejectedEvent>,
}

struct TrackerInner {
    config: TrackerConfig,
    store: Arc<dyn EventStore>,
    buffer: Mutex<EventBuffer>,
    flush_lock: tokio::sync::Mutex<()>,
    flush_scheduled: AtomicBool,
    tasks: TaskTracker,
}

impl TrackerInner {
    async fn flush(&self, scheduled: bool) -> FlushOutcome {
        let _guard = self.flush_lock.lock().await;
        if scheduled {
            self.flush_scheduled.store(false, Ordering::SeqCst);
        }

        let batch = self.buffer.lock().detach();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let attempted = batch.len();
        match self.store.insert_events(&batch).await {
            Ok(()) => {
                info!(count = attempted, store = self.store.name(), "Flushed events");
                FlushOutcome::Written { count: attempted }
            }
            Err(e) => {
                error!(
                    count = attempted,
                    store = self.store.name(),
                    error = %e,
                    "Failed to flush events, re-queueing batch"
                );
                let dropped = self
                    .buffer
                    .lock()
                    .restore_failed(batch, self.config.batch_size);
                if dropped > 0 {
                    warn!(
                        dropped,
                        kept = self.config.batch_size,
                        "Retry buffer over capacity, dropped newest events"
                    );
                }
                FlushOutcome::Failed { attempted, dropped }
            }
        }
    }
}

/// Buffers analytics events and flushes them to an `EventStore`
pub struct EventTracker {
    inner: Arc<TrackerInner>,
    cache: Option<RealtimeCache>,
    shutdown_tx: watch::Sender<bool>,
    timer: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl EventTracker {
    pub fn new(config: TrackerConfig, store: Arc<dyn EventStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(TrackerInner {
                config,
                store,
                buffer: Mutex::new(EventBuffer::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                flush_scheduled: AtomicBool::new(false),
                tasks: TaskTracker::new(),
            }),
            cache: None,
            shutdown_tx,
            timer: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Attach a key-value cache for the real-time side effects of `track`
    pub fn with_cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(RealtimeCache::new(cache));
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Spawn the scheduled flush timer
    ///
    /// Does nothing if scheduled flushing is disabled, the timer is already
    /// running, or the tracker has been shut down.
    pub fn start(&self) {
        if !self.inner.config.scheduled_flush || self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut timer = self.timer.lock();
        if timer.is_some() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let period = inner.config.flush_interval;

        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.flush(false).await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Flush timer: shutdown requested");
                        break;
                    }
                }
            }
        }));

        info!(
            interval_ms = period.as_millis() as u64,
            batch_size = self.inner.config.batch_size,
            "Scheduled flush started"
        );
    }

    /// Validate and buffer an event, returning its id
    ///
    /// Never waits on the column store. Reaching the batch size schedules a
    /// flush on a background task, and cache side effects are dispatched
    /// the same way. After `shutdown` events are still buffered but only an
    /// explicit `flush` writes them. Must be called from within a Tokio
    /// runtime.
    pub fn track(&self, request: CreateEventRequest) -> Result<Uuid, ValidationError> {
        let now = Utc::now();
        let category = validate_event(&request, now)?;
        let event = Event::from_validated(request, category, now);
        let id = event.id;

        let len = match &self.cache {
            Some(cache) => {
                let len = self.inner.buffer.lock().push(event.clone());
                let cache = cache.clone();
                self.inner.tasks.spawn(async move {
                    cache.record(&event, now).await;
                });
                len
            }
            None => self.inner.buffer.lock().push(event),
        };

        debug!(event_id = %id, event_type = %category, buffered = len, "Tracked event");

        if len >= self.inner.config.batch_size
            && !self.closed.load(Ordering::SeqCst)
            && !self.inner.flush_scheduled.swap(true, Ordering::SeqCst)
        {
            let inner = Arc::clone(&self.inner);
            self.inner.tasks.spawn(async move {
                inner.flush(true).await;
            });
        }

        Ok(id)
    }

    /// Track several requests, then flush once
    ///
    /// `actor_override` replaces the user id of every request when given.
    pub async fn track_batch(
        &self,
        requests: Vec<CreateEventRequest>,
        actor_override: Option<&str>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, mut request) in requests.into_iter().enumerate() {
            if let Some(actor) = actor_override {
                request.user_id = Some(actor.to_string());
            }
            match self.track(request) {
                Ok(id) => outcome.accepted.push(id),
                Err(error) => outcome.rejected.push(RejectedEvent { index, error }),
            }
        }

        self.flush().await;
        outcome
    }

    /// Write everything buffered so far in one bulk insert
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush(false).await
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    pub fn buffered_events(&self) -> Vec<Event> {
        self.inner.buffer.lock().snapshot()
    }

    /// Final flush, then stop the timer and drain background work
    ///
    /// Each phase is bounded by the configured shutdown timeout. Returns the
    /// outcome of the final flush, or `None` if it timed out or the tracker
    /// was already shut down.
    pub async fn shutdown(&self) -> Option<FlushOutcome> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let timeout = self.inner.config.shutdown_timeout;
        info!(timeout_ms = timeout.as_millis() as u64, "Shutting down event tracker");

        let outcome = match tokio::time::timeout(timeout, self.inner.flush(false)).await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                warn!(
                    buffered = self.buffered_len(),
                    "Final flush timed out"
                );
                None
            }
        };

        self.shutdown_tx.send_replace(true);
        let timer = self.timer.lock().take();
        if let Some(handle) = timer {
            if let Err(e) = handle.await {
                error!(error = %e, "Flush timer task failed");
            }
        }

        self.inner.tasks.close();
        if tokio::time::timeout(timeout, self.inner.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.inner.tasks.len(),
                "Timed out waiting for background tasks"
            );
        }

        info!(remaining = self.buffered_len(), "Event tracker stopped");
        outcome
    }
}

impl Drop for EventTracker {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
