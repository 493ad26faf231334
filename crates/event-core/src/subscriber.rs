//! Subscriber role of RFC 3265
//!
//! [`EventSubscriber`] sends SUBSCRIBE requests for one event package,
//! tracks each subscription by the Call-ID of its initial request, refreshes
//! it before the granted duration runs out and delivers NOTIFY payloads to
//! the subscription's [`SubscriberHandler`](crate::subscription::SubscriberHandler).
//!
//! ## Response handling
//!
//! | Response                         | Action                                         |
//! |----------------------------------|------------------------------------------------|
//! | to a request we already forgot   | resolve 401/407, otherwise ignore              |
//! | 2xx                              | remember dialog, schedule refresh, `on_success`|
//! | 3xx                              | logged only                                    |
//! | 423 + Min-Expires                | resend once with the minimum                   |
//! | 401 / 407                        | resolve and resend, `on_failure` if we can't   |
//! | any other final failure          | remove, `on_failure`                           |

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::config::SubscriberConfig;
use crate::errors::{EventError, EventResult};
use crate::message::{Method, Request, RequestEvent, Response, ResponseEvent};
use crate::subscription::{SubscriberSubscription, SubscriptionStatus};
use crate::support::PackageSupport;
use crate::timer::TimerService;
use crate::transport::{ChallengeResolver, DialogHandle, EventTransport, MessageProcessor};
use crate::types::{Address, StatusCode, SubscriptionKey, SubscriptionState};

/// Delay before refreshing a subscription granted for `granted` seconds
///
/// The refresh is sent `margin` seconds early; when the margin is not
/// smaller than the grant the refresh is sent right away.
pub fn refresh_delay(granted: u32, margin: u32) -> Duration {
    Duration::from_secs(u64::from(granted.saturating_sub(margin)))
}

/// Subscriber engine for one event package
pub struct EventSubscriber {
    support: PackageSupport,
    refresh_margin: u32,
    /// Subscriptions indexed by the Call-ID of their initial SUBSCRIBE
    subscriptions: Mutex<HashMap<String, Arc<SubscriberSubscription>>>,
    me: Weak<EventSubscriber>,
}

/// Builder for [`EventSubscriber`]
pub struct EventSubscriberBuilder {
    config: SubscriberConfig,
    transport: Arc<dyn EventTransport>,
    timers: Option<Arc<TimerService>>,
    resolver: Option<Arc<dyn ChallengeResolver>>,
}

impl EventSubscriberBuilder {
    /// Share a timer service with other engines
    pub fn with_timer_service(mut self, timers: Arc<TimerService>) -> Self {
        self.timers = Some(timers);
        self
    }

    /// Answer 401/407 challenges with `resolver`
    pub fn with_challenge_resolver(mut self, resolver: Arc<dyn ChallengeResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> EventResult<Arc<EventSubscriber>> {
        self.config.validate()?;

        let timers = self.timers.unwrap_or_default();
        let mut support = PackageSupport::new(self.config.package, self.transport, timers);
        support.resolver = self.resolver;
        let refresh_margin = self.config.refresh_margin;

        Ok(Arc::new_cyclic(|me| EventSubscriber {
            support,
            refresh_margin,
            subscriptions: Mutex::new(HashMap::new()),
            me: me.clone(),
        }))
    }
}

impl EventSubscriber {
    pub fn builder(config: SubscriberConfig, transport: Arc<dyn EventTransport>) -> EventSubscriberBuilder {
        EventSubscriberBuilder {
            config,
            transport,
            timers: None,
            resolver: None,
        }
    }

    pub fn event_package(&self) -> &str {
        self.support.event_package()
    }

    pub fn refresh_margin(&self) -> u32 {
        self.refresh_margin
    }

    // ===== Public operations =====

    /// Subscribe to `subscription.address()`
    ///
    /// The subscription is registered under the new request's Call-ID before
    /// sending so a fast response can find it. If the send fails the
    /// registration is undone and [`EventError::NetworkFailure`] returned.
    pub async fn subscribe(&self, subscription: Arc<SubscriberSubscription>) -> EventResult<()> {
        let request = self.create_subscribe(&subscription, None, self.support.package.subscription_duration);
        let call_id = request.call_id.clone();

        // we register the subscription to find it when the response arrives
        self.add_subscription(call_id.clone(), subscription.clone());
        debug!("Subscribing to {} (call-id {})", subscription.key(), call_id);

        if let Err(e) = self.support.transport.send_request(request).await {
            // this subscription will never be accepted or rejected
            self.remove_entry(&call_id, &subscription);
            error!("Failed to send the subscription to {}: {}", subscription.key(), e);
            return Err(EventError::network(format!("failed to send SUBSCRIBE: {}", e)));
        }
        Ok(())
    }

    /// Subscribe unless a subscription with the same address and event id
    /// is already tracked
    pub async fn poll(&self, subscription: Arc<SubscriberSubscription>) -> EventResult<()> {
        if self
            .find(subscription.address(), subscription.event_id())
            .is_none()
        {
            self.subscribe(subscription).await
        } else {
            trace!("Already subscribed to {}", subscription.key());
            Ok(())
        }
    }

    /// End the subscription to `address` with `event_id`
    ///
    /// The subscription is forgotten locally before the `Expires: 0`
    /// SUBSCRIBE is sent, so its response is handled as cleanup only. A
    /// failed send is reported but not rolled back.
    ///
    /// A subscription still waiting for its first response is dropped
    /// without sending anything; the notifier only learns of it through the
    /// 481 answer to its next NOTIFY.
    pub async fn unsubscribe(
        &self,
        address: &Address,
        event_id: Option<&str>,
        assert_subscribed: bool,
    ) -> EventResult<()> {
        let Some((call_id, subscription)) = self.find_entry(address, event_id) else {
            if assert_subscribed {
                return Err(EventError::invalid_state(format!(
                    "trying to unsubscribe from {} which is not subscribed",
                    SubscriptionKey::new(address.clone(), event_id)
                )));
            }
            return Ok(());
        };

        let Some(dialog) = subscription.dialog() else {
            // Still pending: drop it; a late 2xx is then cleanup and a late
            // NOTIFY gets 481, which ends the subscription on the notifier
            debug!("Unsubscribing from pending {}; no dialog to signal on", subscription.key());
            self.remove_entry(&call_id, &subscription);
            return Ok(());
        };

        let request = self.create_subscribe(&subscription, Some(&dialog), 0);

        // we are no longer subscribed: the response to this request is
        // handled as an unsubscription response
        self.remove_entry(&call_id, &subscription);

        dialog.send_request(request).await.map_err(|e| {
            debug!("Can't send the unsubscribe request: {}", e);
            EventError::network(format!("failed to send SUBSCRIBE with Expires: 0: {}", e))
        })
    }

    /// Unsubscribe from everything, e.g. on shutdown
    ///
    /// Every subscription is attempted; the first error is returned
    /// afterwards. Peers may never answer, so callers should bound the
    /// surrounding shutdown with a timeout.
    pub async fn unsubscribe_all(&self) -> EventResult<()> {
        let mut first_error = None;
        for subscription in self.subscriptions() {
            if let Err(e) = self
                .unsubscribe(subscription.address(), subscription.event_id(), false)
                .await
            {
                warn!("Failed to unsubscribe from {}: {}", subscription.key(), e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Stop tracking a subscription without signaling anything
    pub fn remove_subscription(&self, address: &Address, event_id: Option<&str>) -> bool {
        match self.find_entry(address, event_id) {
            Some((call_id, subscription)) => self.remove_entry(&call_id, &subscription),
            None => false,
        }
    }

    /// The tracked subscription for `address` and `event_id`
    pub fn find(&self, address: &Address, event_id: Option<&str>) -> Option<Arc<SubscriberSubscription>> {
        self.find_entry(address, event_id).map(|(_, subscription)| subscription)
    }

    /// The tracked subscription whose initial request used `call_id`
    pub fn subscription_for_call_id(&self, call_id: &str) -> Option<Arc<SubscriberSubscription>> {
        self.subscriptions.lock().get(call_id).cloned()
    }

    /// Snapshot of the tracked subscriptions
    pub fn subscriptions(&self) -> Vec<Arc<SubscriberSubscription>> {
        self.subscriptions.lock().values().cloned().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    // ===== Incoming messages =====

    /// Process a response to one of our SUBSCRIBE requests
    pub async fn handle_response(&self, event: ResponseEvent) -> bool {
        if event.request.method != Method::Subscribe
            || !self.support.is_our_event(event.request.event.as_ref())
        {
            return false;
        }

        let status = event.status();
        let call_id = event.call_id().to_string();
        let unsubscribing =
            event.response.expires == Some(0) || event.request.expires == Some(0);

        let subscription = match self.subscription_for_call_id(&call_id) {
            Some(subscription) if !unsubscribing => subscription,
            // the unsubscription case where we removed the subscription
            _ => return self.handle_cleanup_response(&event).await,
        };

        if status.is_provisional() {
            return true;
        }

        if status.is_success() {
            let Some(granted) = event.response.expires else {
                // not conform to rfc3265
                let e = EventError::protocol(format!("no Expires header in the {} response", status));
                error!("Dropping response for {}: {}", subscription.key(), e);
                return true;
            };

            // remember the dialog for refreshes and the unsubscribe
            if let Some(dialog) = &event.dialog {
                subscription.set_dialog(Some(dialog.clone()));
            }
            subscription.reset_interval_retry();
            subscription.set_status(SubscriptionStatus::Active);
            self.schedule_refresh(&call_id, &subscription, granted);

            subscription.handler().on_success(status).await;
            return true;
        }

        if status.is_redirect() {
            info!(
                "Response to subscribe to {}: {} {}",
                subscription.address(),
                status,
                event.response.reason_phrase
            );
            return true;
        }

        if status == StatusCode::INTERVAL_TOO_BRIEF {
            return self.retry_with_min_expires(&event, &call_id, &subscription).await;
        }

        if status.is_auth_challenge() {
            if let Err(e) = self.support.resolve_and_resend(&event).await {
                error!("Can't handle the challenge for {}: {}", subscription.key(), e);
                self.fail(&call_id, &subscription, status).await;
            }
            return true;
        }

        // 408 480 486 600 603: non definitive reject, others definitive
        debug!("Error received from the network for {}: {}", subscription.key(), status);
        self.fail(&call_id, &subscription, status).await;
        true
    }

    /// Process an incoming NOTIFY
    pub async fn handle_notify(&self, event: RequestEvent) -> bool {
        let request = &event.request;
        if request.method != Method::Notify || !self.support.is_our_event(request.event.as_ref()) {
            return false;
        }

        // a NOTIFY must carry one (rfc3265)
        let Some(state_header) = request.subscription_state.clone() else {
            let e = EventError::protocol("no Subscription-State header in NOTIFY");
            error!("Dropping NOTIFY {}: {}", request.call_id, e);
            return true;
        };
        let terminated = state_header.state.is_terminated();

        let call_id = request.call_id.clone();
        let subscription = self.subscription_for_call_id(&call_id);

        // the NOTIFY may arrive before the 2xx
        if let (Some(subscription), Some(dialog)) = (&subscription, &event.dialog) {
            if subscription.establish(dialog) {
                debug!("NOTIFY for {} arrived before the SUBSCRIBE response", subscription.key());
            }
        }

        if subscription.is_none() && !terminated {
            debug!("Subscription not found for call-id {}", call_id);
            self.support
                .respond(request, Response::new(StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST))
                .await;
            return true;
        }

        // if we don't understand the content
        if let Some(content_type) = &request.content_type {
            if !content_type.sub_type_matches(&self.support.package.content_sub_type) {
                self.support
                    .respond(
                        request,
                        Response::new(StatusCode::UNSUPPORTED_MEDIA_TYPE)
                            .with_accept(self.support.content_type()),
                    )
                    .await;
            }
        }

        self.support.respond(request, Response::new(StatusCode::OK)).await;

        let Some(subscription) = subscription else {
            // terminated NOTIFY for a subscription we already ended ourselves
            return true;
        };

        if terminated {
            if self.remove_entry(&call_id, &subscription) {
                subscription.handler().on_terminated(state_header.reason).await;
            }
            return true;
        }

        if state_header.state == SubscriptionState::Active {
            subscription.set_status(SubscriptionStatus::Active);
        }
        if let Some(body) = request.body.clone() {
            subscription.handler().on_active(body).await;
        }
        true
    }

    // ===== Internals =====

    fn create_subscribe(
        &self,
        subscription: &SubscriberSubscription,
        dialog: Option<&DialogHandle>,
        expires: u32,
    ) -> Request {
        let request = match dialog {
            Some(dialog) => dialog.create_request(Method::Subscribe),
            None => self
                .support
                .transport
                .create_request(Method::Subscribe, subscription.address()),
        };

        request
            .with_event(self.support.event_header(subscription.event_id()))
            .with_accept(self.support.content_type())
            .with_expires(expires)
    }

    fn add_subscription(&self, call_id: String, subscription: Arc<SubscriberSubscription>) {
        subscription.registered();
        subscription.set_status(SubscriptionStatus::Pending);

        let displaced = self.subscriptions.lock().insert(call_id, subscription.clone());
        if let Some(displaced) = displaced {
            if !Arc::ptr_eq(&displaced, &subscription) {
                displaced.mark_removed();
            }
        }
    }

    /// Remove `subscription` if it is still the one tracked under `call_id`
    fn remove_entry(&self, call_id: &str, subscription: &Arc<SubscriberSubscription>) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.lock();
            match subscriptions.get(call_id) {
                Some(current) if Arc::ptr_eq(current, subscription) => subscriptions.remove(call_id),
                _ => None,
            }
        };

        match removed {
            Some(subscription) => subscription.mark_removed(),
            None => false,
        }
    }

    fn find_entry(
        &self,
        address: &Address,
        event_id: Option<&str>,
    ) -> Option<(String, Arc<SubscriberSubscription>)> {
        let key = SubscriptionKey::new(address.clone(), event_id);
        self.subscriptions
            .lock()
            .iter()
            .find(|(_, subscription)| *subscription.key() == key)
            .map(|(call_id, subscription)| (call_id.clone(), subscription.clone()))
    }

    fn is_current(&self, call_id: &str, subscription: &Arc<SubscriberSubscription>) -> bool {
        self.subscriptions
            .lock()
            .get(call_id)
            .is_some_and(|current| Arc::ptr_eq(current, subscription))
    }

    async fn fail(&self, call_id: &str, subscription: &Arc<SubscriberSubscription>, status: StatusCode) {
        if self.remove_entry(call_id, subscription) {
            subscription.handler().on_failure(status).await;
        }
    }

    async fn handle_cleanup_response(&self, event: &ResponseEvent) -> bool {
        let status = event.status();
        if status.is_auth_challenge() {
            if let Err(e) = self.support.resolve_and_resend(event).await {
                error!("Can't handle the challenge for unsubscribe {}: {}", event.call_id(), e);
            }
        } else if !status.is_success() && !status.is_provisional() {
            debug!("Unsubscribe {} answered with {}", event.call_id(), status);
        }
        // 2xx implies a terminating NOTIFY, handled there
        true
    }

    async fn retry_with_min_expires(
        &self,
        event: &ResponseEvent,
        call_id: &str,
        subscription: &Arc<SubscriberSubscription>,
    ) -> bool {
        let Some(min_expires) = event.response.min_expires else {
            let e = EventError::protocol("no Min-Expires header in 423 response");
            error!("Dropping response for {}: {}", subscription.key(), e);
            return true;
        };

        let asked_enough = event
            .request
            .expires
            .is_some_and(|asked| asked >= min_expires);
        if asked_enough || !subscription.begin_interval_retry() {
            warn!(
                "Giving up on {} after repeated 423 (Min-Expires {})",
                subscription.key(),
                min_expires
            );
            self.fail(call_id, subscription, event.status()).await;
            return true;
        }

        debug!("Retrying {} with Expires {}", subscription.key(), min_expires);
        let mut request = event.request.clone();
        request.expires = Some(min_expires);

        let sent = match &event.dialog {
            Some(dialog) => dialog.send_request(request).await,
            None => self.support.transport.send_request(request).await,
        };
        if let Err(e) = sent {
            error!("Can't send the new request for {}: {}", subscription.key(), e);
            self.fail(call_id, subscription, event.status()).await;
        }
        true
    }

    fn schedule_refresh(&self, call_id: &str, subscription: &Arc<SubscriberSubscription>, granted: u32) {
        let delay = refresh_delay(granted, self.refresh_margin);
        debug!("Refreshing {} in {:?}", subscription.key(), delay);

        let engine = self.me.clone();
        let call_id = call_id.to_string();
        let target = subscription.clone();
        subscription.schedule_timer(&self.support.timers, delay, move |epoch| async move {
            if let Some(engine) = engine.upgrade() {
                engine.refresh(&call_id, &target, epoch).await;
            }
        });
    }

    async fn refresh(&self, call_id: &str, subscription: &Arc<SubscriberSubscription>, epoch: u64) {
        if !subscription.claim_timer(epoch) || !self.is_current(call_id, subscription) {
            trace!("Ignoring stale refresh timer for {}", subscription.key());
            return;
        }

        let Some(dialog) = subscription.dialog() else {
            warn!("No dialog associated with {}, can't refresh the subscription", subscription.key());
            return;
        };

        let request = self.create_subscribe(subscription, Some(&dialog), self.support.package.subscription_duration);
        if let Err(e) = dialog.send_request(request).await {
            error!("Can't send the refresh for {}: {}", subscription.key(), e);
        }
    }
}

#[async_trait]
impl MessageProcessor for EventSubscriber {
    fn event_package(&self) -> &str {
        self.support.event_package()
    }

    async fn process_request(&self, event: RequestEvent) -> bool {
        self.handle_notify(event).await
    }

    async fn process_response(&self, event: ResponseEvent) -> bool {
        self.handle_response(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_delay_subtracts_margin() {
        assert_eq!(refresh_delay(600, 60), Duration::from_secs(540));
        assert_eq!(refresh_delay(3600, 0), Duration::from_secs(3600));
    }

    #[test]
    fn test_refresh_delay_is_immediate_when_margin_exceeds_grant() {
        assert_eq!(refresh_delay(30, 60), Duration::ZERO);
        assert_eq!(refresh_delay(60, 60), Duration::ZERO);
    }
}
