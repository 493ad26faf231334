//! Notifier role of RFC 3265
//!
//! [`EventNotifier`] accepts SUBSCRIBE requests for one event package,
//! tracks one subscription per (watcher, event id), sends NOTIFY requests
//! with the payloads its [`NotifierHandler`]s build and expires
//! subscriptions that are not refreshed in time.
//!
//! An incoming SUBSCRIBE is one of:
//!
//! - too brief (`0 < Expires < min_expires`): 423 with Min-Expires
//! - a termination (`Expires: 0`): 200, then a terminating NOTIFY
//! - a refresh (same watcher and event id on the same dialog): 200, timer
//!   reset, no NOTIFY
//! - a takeover (same watcher and event id on another dialog): the old
//!   subscription is terminated with `reason=rejected`, then a new one is
//!   created
//! - a new subscription: 200, initial NOTIFY, expiry timer

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::config::NotifierConfig;
use crate::errors::{EventError, EventResult};
use crate::message::{Method, RequestEvent, Response, ResponseEvent, SubscriptionStateHeader};
use crate::subscription::{NotifierSubscription, SubscriptionFactory, SubscriptionStatus};
use crate::support::PackageSupport;
use crate::timer::TimerService;
use crate::transport::{ChallengeResolver, DialogHandle, EventTransport, MessageProcessor, same_dialog};
use crate::types::{Address, StatusCode, SubscriptionKey, SubscriptionState, TerminationReason};

/// Notifier engine for one event package
pub struct EventNotifier {
    support: PackageSupport,
    min_expires: u32,
    factory: Arc<dyn SubscriptionFactory>,
    subscriptions: Mutex<HashMap<SubscriptionKey, Arc<NotifierSubscription>>>,
    me: Weak<EventNotifier>,
}

/// Builder for [`EventNotifier`]
pub struct EventNotifierBuilder {
    config: NotifierConfig,
    transport: Arc<dyn EventTransport>,
    factory: Arc<dyn SubscriptionFactory>,
    timers: Option<Arc<TimerService>>,
    resolver: Option<Arc<dyn ChallengeResolver>>,
}

impl EventNotifierBuilder {
    pub fn with_timer_service(mut self, timers: Arc<TimerService>) -> Self {
        self.timers = Some(timers);
        self
    }

    pub fn with_challenge_resolver(mut self, resolver: Arc<dyn ChallengeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> EventResult<Arc<EventNotifier>> {
        self.config.validate()?;

        let timers = self.timers.unwrap_or_default();
        let mut support = PackageSupport::new(self.config.package, self.transport, timers);
        support.resolver = self.resolver;
        let min_expires = self.config.min_expires;
        let factory = self.factory;

        Ok(Arc::new_cyclic(|me| EventNotifier {
            support,
            min_expires,
            factory,
            subscriptions: Mutex::new(HashMap::new()),
            me: me.clone(),
        }))
    }
}

impl EventNotifier {
    pub fn builder(
        config: NotifierConfig,
        transport: Arc<dyn EventTransport>,
        factory: Arc<dyn SubscriptionFactory>,
    ) -> EventNotifierBuilder {
        EventNotifierBuilder {
            config,
            transport,
            factory,
            timers: None,
            resolver: None,
        }
    }

    pub fn event_package(&self) -> &str {
        self.support.event_package()
    }

    pub fn min_expires(&self) -> u32 {
        self.min_expires
    }

    // ===== Public operations =====

    /// Send a NOTIFY for `subscription` in `state`
    ///
    /// Active and pending NOTIFYs carry the remaining lifetime. A terminated
    /// NOTIFY removes the subscription whether or not it could be sent.
    pub async fn notify(
        &self,
        subscription: &Arc<NotifierSubscription>,
        state: SubscriptionState,
        reason: Option<TerminationReason>,
    ) -> EventResult<()> {
        let result = self.send_notify(subscription, state, reason).await;
        if state.is_terminated() {
            self.remove_subscription(subscription);
        }
        result
    }

    /// Notify every tracked subscription
    ///
    /// Each subscription is attempted even when an earlier one fails; the
    /// first error is returned.
    pub async fn notify_all(
        &self,
        state: SubscriptionState,
        reason: Option<TerminationReason>,
    ) -> EventResult<()> {
        self.notify_all_filtered(|_| true, state, reason).await
    }

    /// Notify the tracked subscriptions accepted by `filter`
    pub async fn notify_all_filtered<F>(
        &self,
        filter: F,
        state: SubscriptionState,
        reason: Option<TerminationReason>,
    ) -> EventResult<()>
    where
        F: Fn(&NotifierSubscription) -> bool + Send,
    {
        let targets: Vec<_> = self
            .subscriptions()
            .into_iter()
            .filter(|subscription| filter(subscription.as_ref()))
            .collect();

        let mut first_error = None;
        for subscription in targets {
            if let Err(e) = self.notify(&subscription, state, reason.clone()).await {
                warn!("Failed to notify {}: {}", subscription.key(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn find(&self, address: &Address, event_id: Option<&str>) -> Option<Arc<NotifierSubscription>> {
        let key = SubscriptionKey::new(address.clone(), event_id);
        self.subscriptions.lock().get(&key).cloned()
    }

    /// Snapshot of the tracked subscriptions
    pub fn subscriptions(&self) -> Vec<Arc<NotifierSubscription>> {
        self.subscriptions.lock().values().cloned().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    // ===== Incoming messages =====

    /// Process an incoming SUBSCRIBE
    pub async fn handle_subscribe(&self, event: RequestEvent) -> bool {
        let request = &event.request;
        if request.method != Method::Subscribe || !self.support.is_our_event(request.event.as_ref()) {
            return false;
        }

        let Some(dialog) = event.dialog.clone() else {
            error!("SUBSCRIBE {} arrived without a dialog", request.call_id);
            return true;
        };

        let expires = request
            .expires
            .unwrap_or(self.support.package.subscription_duration);
        if expires > 0 && expires < self.min_expires {
            debug!("SUBSCRIBE {} asks for {}s, below {}s", request.call_id, expires, self.min_expires);
            self.support
                .respond(
                    request,
                    Response::new(StatusCode::INTERVAL_TOO_BRIEF).with_min_expires(self.min_expires),
                )
                .await;
            return true;
        }

        let key = SubscriptionKey::new(request.from.clone(), request.event_id());
        let existing = self.subscriptions.lock().get(&key).cloned();

        if expires == 0 {
            self.terminate_on_request(&event, existing, dialog).await;
            return true;
        }

        if let Some(existing) = existing {
            let same = existing
                .dialog()
                .is_some_and(|current| same_dialog(&current, &dialog));
            if same {
                debug!("Refreshing {} for {}s", key, expires);
                existing.set_expires_in(Duration::from_secs(u64::from(expires)));
                self.schedule_expiry(&existing, expires);
                self.support
                    .respond(request, Response::new(StatusCode::OK).with_expires(expires))
                    .await;
                return true;
            }

            debug!("{} subscribes again on another dialog; terminating the old one", key);
            if let Err(e) = self
                .notify(&existing, SubscriptionState::Terminated, Some(TerminationReason::Rejected))
                .await
            {
                debug!("Failed to terminate the replaced subscription {}: {}", key, e);
            }
        }

        self.create_subscription(&event, key, dialog, expires).await;
        true
    }

    /// Process a response to one of our NOTIFY requests
    pub async fn handle_notify_response(&self, event: ResponseEvent) -> bool {
        if event.request.method != Method::Notify
            || !self.support.is_our_event(event.request.event.as_ref())
        {
            return false;
        }

        let status = event.status();
        let Some(subscription) = self.find_by_dialog(event.call_id(), event.request.event_id()) else {
            // e.g. the answer to a terminating NOTIFY
            if status.is_auth_challenge() {
                if let Err(e) = self.support.resolve_and_resend(&event).await {
                    debug!("Can't answer the challenge to NOTIFY {}: {}", event.call_id(), e);
                }
            } else {
                trace!("No subscription for NOTIFY response {} ({})", event.call_id(), status);
            }
            return true;
        };

        if status.is_provisional() || status.is_success() {
            return true;
        }

        if status.is_auth_challenge() {
            if let Err(e) = self.support.resolve_and_resend(&event).await {
                error!("Can't handle the challenge to NOTIFY for {}: {}", subscription.key(), e);
                self.remove_subscription(&subscription);
            }
            return true;
        }

        debug!("NOTIFY for {} answered with {}; removing it", subscription.key(), status);
        self.remove_subscription(&subscription);
        true
    }

    // ===== Internals =====

    async fn send_notify(
        &self,
        subscription: &Arc<NotifierSubscription>,
        state: SubscriptionState,
        reason: Option<TerminationReason>,
    ) -> EventResult<()> {
        let Some(dialog) = subscription.dialog() else {
            return Err(EventError::invalid_state(format!(
                "no dialog to notify {}",
                subscription.key()
            )));
        };

        let payload = subscription
            .handler()
            .build_payload(state, reason.as_ref())
            .map_err(|e| {
                EventError::internal(format!(
                    "failed to build NOTIFY payload for {}: {}",
                    subscription.key(),
                    e
                ))
            })?;

        let expires = if state.is_terminated() {
            None
        } else {
            subscription.remaining_secs()
        };
        let header = SubscriptionStateHeader::new(state)
            .with_reason(reason)
            .with_expires(expires);

        let request = dialog
            .create_request(Method::Notify)
            .with_event(self.support.event_header(subscription.event_id()))
            .with_subscription_state(header)
            .with_body(self.support.content_type(), payload);

        trace!("Sending NOTIFY ({}) to {}", state, subscription.key());
        dialog.send_request(request).await.map_err(|e| {
            EventError::network(format!("failed to send NOTIFY to {}: {}", subscription.key(), e))
        })
    }

    async fn create_subscription(
        &self,
        event: &RequestEvent,
        key: SubscriptionKey,
        dialog: DialogHandle,
        expires: u32,
    ) {
        let request = &event.request;
        let subscription = Arc::new(
            self.factory
                .create_subscription(&request.from, request.event_id()),
        );
        subscription.set_dialog(Some(dialog));
        subscription.set_expires_in(Duration::from_secs(u64::from(expires)));

        let accepted = self
            .support
            .respond(request, Response::new(StatusCode::OK).with_expires(expires))
            .await;
        if !accepted {
            // the subscriber will retry; release what the factory allocated
            subscription.mark_removed();
            return;
        }

        self.add_subscription(key, subscription.clone());
        subscription.set_status(SubscriptionStatus::Active);
        self.schedule_expiry(&subscription, expires);

        if let Err(e) = self
            .notify(&subscription, SubscriptionState::Active, None)
            .await
        {
            error!("Failed to send the initial NOTIFY to {}: {}", subscription.key(), e);
        }
    }

    async fn terminate_on_request(
        &self,
        event: &RequestEvent,
        existing: Option<Arc<NotifierSubscription>>,
        dialog: DialogHandle,
    ) {
        let request = &event.request;
        let subscription = existing.unwrap_or_else(|| {
            Arc::new(
                self.factory
                    .create_subscription(&request.from, request.event_id()),
            )
        });
        subscription.set_dialog(Some(dialog));

        self.support
            .respond(request, Response::new(StatusCode::OK).with_expires(0))
            .await;

        if let Err(e) = self
            .notify(&subscription, SubscriptionState::Terminated, Some(TerminationReason::Timeout))
            .await
        {
            debug!("Failed to send the terminating NOTIFY to {}: {}", subscription.key(), e);
        }

        // a subscription that was never tracked still gets its removed() hook
        subscription.mark_removed();
    }

    fn add_subscription(&self, key: SubscriptionKey, subscription: Arc<NotifierSubscription>) {
        subscription.registered();
        let displaced = self.subscriptions.lock().insert(key, subscription.clone());
        if let Some(displaced) = displaced {
            if !Arc::ptr_eq(&displaced, &subscription) {
                displaced.mark_removed();
            }
        }
    }

    /// Remove `subscription` if it is still the tracked one for its key
    fn remove_subscription(&self, subscription: &Arc<NotifierSubscription>) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.lock();
            match subscriptions.get(subscription.key()) {
                Some(current) if Arc::ptr_eq(current, subscription) => {
                    subscriptions.remove(subscription.key())
                }
                _ => None,
            }
        };

        match removed {
            Some(subscription) => subscription.mark_removed(),
            None => false,
        }
    }

    fn is_current(&self, subscription: &Arc<NotifierSubscription>) -> bool {
        self.subscriptions
            .lock()
            .get(subscription.key())
            .is_some_and(|current| Arc::ptr_eq(current, subscription))
    }

    fn find_by_dialog(&self, call_id: &str, event_id: Option<&str>) -> Option<Arc<NotifierSubscription>> {
        let event_id = event_id.map(str::to_ascii_lowercase);
        self.subscriptions
            .lock()
            .values()
            .find(|subscription| {
                subscription.key().event_id() == event_id.as_deref()
                    && subscription
                        .dialog()
                        .is_some_and(|dialog| dialog.call_id() == call_id)
            })
            .cloned()
    }

    fn schedule_expiry(&self, subscription: &Arc<NotifierSubscription>, expires: u32) {
        let engine = self.me.clone();
        let target = subscription.clone();
        subscription.schedule_timer(
            &self.support.timers,
            Duration::from_secs(u64::from(expires)),
            move |epoch| async move {
                if let Some(engine) = engine.upgrade() {
                    engine.expire(&target, epoch).await;
                }
            },
        );
    }

    async fn expire(&self, subscription: &Arc<NotifierSubscription>, epoch: u64) {
        if !subscription.claim_timer(epoch) || !self.is_current(subscription) {
            trace!("Ignoring stale expiry timer for {}", subscription.key());
            return;
        }

        debug!("Subscription {} expired", subscription.key());
        if let Err(e) = self
            .notify(subscription, SubscriptionState::Terminated, Some(TerminationReason::Timeout))
            .await
        {
            debug!("Failed to send the expiry NOTIFY to {}: {}", subscription.key(), e);
        }
    }
}

#[async_trait]
impl MessageProcessor for EventNotifier {
    fn event_package(&self) -> &str {
        self.support.event_package()
    }

    async fn process_request(&self, event: RequestEvent) -> bool {
        self.handle_subscribe(event).await
    }

    async fn process_response(&self, event: ResponseEvent) -> bool {
        self.handle_notify_response(event).await
    }
}
