//! Subscription base shared by both roles
//!
//! A [`Subscription`] holds the signaling state of one subscription (address,
//! event id, dialog, armed timer, lifecycle status) and a behavior object
//! supplied by the event package:
//!
//! - subscriber side: [`SubscriberHandler`] consumes NOTIFY payloads and
//!   learns about success, failure and termination
//! - notifier side: [`NotifierHandler`] produces NOTIFY payloads, and a
//!   [`SubscriptionFactory`] creates subscriptions for incoming SUBSCRIBEs
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──2xx / NOTIFY──▶ Active ──terminate / expire / error──▶ Terminated
//!    └────────────────── failure / rollback ─────────────────────────▲
//! ```
//!
//! [`SubscriptionHandler::removed`] fires exactly once each time the
//! subscription leaves an engine's table.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::EventResult;
use crate::timer::{TimerHandle, TimerService};
use crate::transport::DialogHandle;
use crate::types::{Address, StatusCode, SubscriptionKey, SubscriptionState, TerminationReason};

/// Hook shared by every event package behavior
pub trait SubscriptionHandler: Send + Sync {
    /// The subscription left the engine's table; release package resources
    fn removed(&self) {}
}

/// Subscriber-side behavior of an event package
#[async_trait]
pub trait SubscriberHandler: SubscriptionHandler {
    /// A NOTIFY carried a body while the subscription is alive
    async fn on_active(&self, payload: Bytes);

    /// The SUBSCRIBE was rejected or its challenge could not be answered
    async fn on_failure(&self, status: StatusCode);

    /// The SUBSCRIBE (or a refresh) was accepted
    async fn on_success(&self, status: StatusCode);

    /// The notifier terminated the subscription
    async fn on_terminated(&self, reason: Option<TerminationReason>);
}

/// Notifier-side behavior of an event package
pub trait NotifierHandler: SubscriptionHandler {
    /// Build the NOTIFY body describing the current resource state
    fn build_payload(
        &self,
        state: SubscriptionState,
        reason: Option<&TerminationReason>,
    ) -> EventResult<Bytes>;
}

/// Creates notifier subscriptions for incoming SUBSCRIBE requests
pub trait SubscriptionFactory: Send + Sync {
    fn create_subscription(&self, from: &Address, event_id: Option<&str>) -> NotifierSubscription;
}

/// Subscription tracked by an [`EventSubscriber`](crate::subscriber::EventSubscriber)
pub type SubscriberSubscription = Subscription<dyn SubscriberHandler>;

/// Subscription tracked by an [`EventNotifier`](crate::notifier::EventNotifier)
pub type NotifierSubscription = Subscription<dyn NotifierHandler>;

/// Lifecycle status of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Terminated,
}

#[derive(Debug)]
struct SubscriptionInner {
    dialog: Option<DialogHandle>,
    timer: Option<TimerHandle>,
    /// Bumped on every arm/disarm; a firing timer must still own the epoch
    timer_epoch: u64,
    status: SubscriptionStatus,
    expires_at: Option<Instant>,
    interval_retried: bool,
}

/// One subscription relationship plus its event package behavior
pub struct Subscription<H: ?Sized> {
    address: Address,
    event_id: Option<String>,
    key: SubscriptionKey,
    inner: Mutex<SubscriptionInner>,
    removed: AtomicBool,
    handler: Arc<H>,
}

impl<H: ?Sized + SubscriptionHandler> Subscription<H> {
    pub fn new(address: Address, event_id: Option<String>, handler: Arc<H>) -> Self {
        let key = SubscriptionKey::new(address.clone(), event_id.as_deref());
        Self {
            address,
            event_id,
            key,
            inner: Mutex::new(SubscriptionInner {
                dialog: None,
                timer: None,
                timer_epoch: 0,
                status: SubscriptionStatus::Pending,
                expires_at: None,
                interval_retried: false,
            }),
            removed: AtomicBool::new(false),
            handler,
        }
    }

    /// The watched resource (subscriber) or the watcher (notifier)
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Whether this subscription is identified by `address` and `event_id`
    pub fn matches(&self, address: &Address, event_id: Option<&str>) -> bool {
        self.key == SubscriptionKey::new(address.clone(), event_id)
    }

    /// The dialog of this subscription, once established
    pub fn dialog(&self) -> Option<DialogHandle> {
        self.inner.lock().dialog.clone()
    }

    pub(crate) fn set_dialog(&self, dialog: Option<DialogHandle>) {
        self.inner.lock().dialog = dialog;
    }

    /// Attach `dialog` only if none is attached yet; returns whether it did
    pub(crate) fn establish(&self, dialog: &DialogHandle) -> bool {
        let mut inner = self.inner.lock();
        if inner.dialog.is_none() {
            inner.dialog = Some(dialog.clone());
            true
        } else {
            false
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.inner.lock().status
    }

    pub(crate) fn set_status(&self, status: SubscriptionStatus) {
        self.inner.lock().status = status;
    }

    /// Whether a refresh/expiry timer is currently armed
    pub fn has_pending_timer(&self) -> bool {
        self.inner.lock().timer.is_some()
    }

    /// Delay the currently armed timer was scheduled with
    pub fn pending_timer_delay(&self) -> Option<Duration> {
        self.inner.lock().timer.as_ref().map(TimerHandle::delay)
    }

    /// Seconds left (rounded up) until the expiry recorded by
    /// [`Self::set_expires_in`]
    pub fn remaining_secs(&self) -> Option<u32> {
        self.inner.lock().expires_at.map(|at| {
            let left = at.saturating_duration_since(Instant::now());
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            u32::try_from(secs).unwrap_or(u32::MAX)
        })
    }

    pub(crate) fn set_expires_in(&self, duration: Duration) {
        self.inner.lock().expires_at = Some(Instant::now() + duration);
    }

    /// Arm the subscription's timer, replacing (and cancelling) any previous
    /// one
    ///
    /// `make_task` receives the arming epoch the task must later pass to
    /// [`Self::claim_timer`].
    pub(crate) fn schedule_timer<F, Fut>(&self, timers: &TimerService, delay: Duration, make_task: F)
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        // Held across schedule() so the task cannot claim before the handle is stored
        let mut inner = self.inner.lock();
        inner.timer_epoch += 1;
        let handle = timers.schedule(delay, make_task(inner.timer_epoch));
        if let Some(previous) = inner.timer.replace(handle) {
            previous.cancel();
        }
    }

    /// Called by a firing timer: succeeds only if the timer armed at `epoch`
    /// is still the current one and the subscription was not removed
    pub(crate) fn claim_timer(&self, epoch: u64) -> bool {
        if self.removed.load(Ordering::SeqCst) {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.timer_epoch != epoch {
            return false;
        }
        // The task is running; dropping the handle must not abort it
        inner.timer.take();
        true
    }

    /// Mark whether the pending request is a retry after 423 Interval Too
    /// Brief; returns `false` if a retry was already made
    pub(crate) fn begin_interval_retry(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.interval_retried {
            false
        } else {
            inner.interval_retried = true;
            true
        }
    }

    pub(crate) fn reset_interval_retry(&self) {
        self.inner.lock().interval_retried = false;
    }

    /// The subscription is (again) tracked by an engine
    pub(crate) fn registered(&self) {
        self.removed.store(false, Ordering::SeqCst);
    }

    /// The subscription left the engine's table
    ///
    /// Clears the dialog, cancels the timer and fires
    /// [`SubscriptionHandler::removed`]. Only the first call after a
    /// registration has any effect; returns whether this call was it.
    pub(crate) fn mark_removed(&self) -> bool {
        if self.removed.swap(true, Ordering::SeqCst) {
            return false;
        }

        {
            let mut inner = self.inner.lock();
            inner.dialog = None;
            inner.timer_epoch += 1;
            if let Some(timer) = inner.timer.take() {
                timer.cancel();
            }
            inner.status = SubscriptionStatus::Terminated;
            inner.expires_at = None;
            inner.interval_retried = false;
        }

        debug!("Subscription {} removed", self.key);
        self.handler.removed();
        true
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

impl Subscription<dyn SubscriberHandler> {
    /// Create a subscriber-side subscription to `address`
    pub fn subscriber(
        address: Address,
        event_id: Option<String>,
        handler: impl SubscriberHandler + 'static,
    ) -> Self {
        Self::new(address, event_id, Arc::new(handler))
    }
}

impl Subscription<dyn NotifierHandler> {
    /// Create a notifier-side subscription for watcher `address`
    pub fn notifier(
        address: Address,
        event_id: Option<String>,
        handler: impl NotifierHandler + 'static,
    ) -> Self {
        Self::new(address, event_id, Arc::new(handler))
    }
}

impl<H: ?Sized> fmt::Debug for Subscription<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("address", &self.address.canonical())
            .field("event_id", &self.event_id)
            .field("removed", &self.removed.load(Ordering::SeqCst))
            .finish()
    }
}
