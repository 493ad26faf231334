//! Common test helpers for event-core
//!
//! Recording mocks for the transport, dialog and challenge resolver
//! collaborators, plus event package handlers that record every callback.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rvoip_event_core::{
    Address, ChallengeResolver, ContentType, Dialog, DialogHandle, EventError, EventHeader,
    EventNotifier, EventPackageConfig, EventResult, EventSubscriber, EventTransport, Method,
    NotifierConfig, NotifierHandler, NotifierSubscription, Request, Response, StatusCode,
    SubscriberConfig, SubscriberHandler, SubscriberSubscription, SubscriptionFactory,
    SubscriptionHandler, SubscriptionState, SubscriptionStateHeader, TerminationReason,
    TransportError,
};

pub const PACKAGE: &str = "presence";
pub const SUB_TYPE: &str = "pidf+xml";
pub const SUBSCRIBER_URI: &str = "sip:bob@example.com";
pub const NOTIFIER_URI: &str = "sip:alice@example.com";

/// Let spawned timer tasks run to completion
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Sleep (virtual time under `start_paused`) and let timers run
pub async fn advance(seconds: u64) {
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    settle().await;
}

// ===== Transport =====

/// Out-of-dialog transport recording everything it is asked to send
pub struct MockTransport {
    local: Address,
    fail_sends: AtomicBool,
    requests: Mutex<Vec<Request>>,
    responses: Mutex<Vec<(Request, Response)>>,
}

impl MockTransport {
    pub fn new(local: &str) -> Arc<Self> {
        Arc::new(Self {
            local: Address::new(local),
            fail_sends: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
        })
    }

    /// Make `send_request` fail until reset
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Request {
        self.requests
            .lock()
            .last()
            .cloned()
            .expect("no request was sent")
    }

    pub fn responses(&self) -> Vec<Response> {
        self.responses
            .lock()
            .iter()
            .map(|(_, response)| response.clone())
            .collect()
    }

    pub fn statuses(&self) -> Vec<StatusCode> {
        self.responses
            .lock()
            .iter()
            .map(|(_, response)| response.status)
            .collect()
    }
}

#[async_trait]
impl EventTransport for MockTransport {
    fn local_address(&self, _target: &Address) -> Address {
        self.local.clone()
    }

    fn new_call_id(&self) -> String {
        format!("{}@test.invalid", uuid::Uuid::new_v4())
    }

    async fn send_request(&self, request: Request) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::new("connection refused"));
        }
        self.requests.lock().push(request);
        Ok(())
    }

    async fn send_response(&self, request: &Request, response: Response) -> Result<(), TransportError> {
        self.responses.lock().push((request.clone(), response));
        Ok(())
    }
}

// ===== Dialog =====

/// Dialog recording the in-dialog requests sent through it
#[derive(Debug)]
pub struct MockDialog {
    id: String,
    call_id: String,
    local: Address,
    remote: Address,
    fail_sends: AtomicBool,
    sent: Mutex<Vec<Request>>,
}

impl MockDialog {
    pub fn new(call_id: &str, local: &str, remote: &str) -> Arc<Self> {
        Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.to_string(),
            local: Address::new(local),
            remote: Address::new(remote),
            fail_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn handle(self: &Arc<Self>) -> DialogHandle {
        self.clone()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.lock().clone()
    }

    pub fn last_sent(&self) -> Request {
        self.sent.lock().last().cloned().expect("nothing sent on dialog")
    }

    /// Subscription-State headers of the NOTIFYs sent on this dialog
    pub fn notify_states(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|request| request.method == Method::Notify)
            .filter_map(|request| request.subscription_state.as_ref())
            .map(ToString::to_string)
            .collect()
    }
}

#[async_trait]
impl Dialog for MockDialog {
    fn id(&self) -> &str {
        &self.id
    }

    fn call_id(&self) -> &str {
        &self.call_id
    }

    fn local_party(&self) -> &Address {
        &self.local
    }

    fn remote_party(&self) -> &Address {
        &self.remote
    }

    async fn send_request(&self, request: Request) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::new("dialog terminated"));
        }
        self.sent.lock().push(request);
        Ok(())
    }
}

// ===== Challenge resolver =====

pub struct MockResolver {
    fail: bool,
    calls: AtomicUsize,
}

impl MockResolver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeResolver for MockResolver {
    async fn resolve_challenge(&self, request: &Request, _challenge: &Response) -> EventResult<Request> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EventError::authentication("wrong password"));
        }
        Ok(request.clone())
    }
}

// ===== Subscriber side =====

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriberCallback {
    Active(Bytes),
    Failure(StatusCode),
    Success(StatusCode),
    Terminated(Option<TerminationReason>),
}

#[derive(Default)]
pub struct RecordingSubscriberHandler {
    callbacks: Mutex<Vec<SubscriberCallback>>,
    removed: AtomicUsize,
}

impl RecordingSubscriberHandler {
    pub fn callbacks(&self) -> Vec<SubscriberCallback> {
        self.callbacks.lock().clone()
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}

impl SubscriptionHandler for RecordingSubscriberHandler {
    fn removed(&self) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubscriberHandler for RecordingSubscriberHandler {
    async fn on_active(&self, payload: Bytes) {
        self.callbacks.lock().push(SubscriberCallback::Active(payload));
    }

    async fn on_failure(&self, status: StatusCode) {
        self.callbacks.lock().push(SubscriberCallback::Failure(status));
    }

    async fn on_success(&self, status: StatusCode) {
        self.callbacks.lock().push(SubscriberCallback::Success(status));
    }

    async fn on_terminated(&self, reason: Option<TerminationReason>) {
        self.callbacks.lock().push(SubscriberCallback::Terminated(reason));
    }
}

pub fn subscriber_subscription(
    address: &str,
    event_id: Option<&str>,
) -> (Arc<RecordingSubscriberHandler>, Arc<SubscriberSubscription>) {
    let handler = Arc::new(RecordingSubscriberHandler::default());
    let subscription = SubscriberSubscription::new(
        Address::new(address),
        event_id.map(str::to_string),
        handler.clone(),
    );
    (handler, Arc::new(subscription))
}

pub fn subscriber(
    duration: u32,
    transport: &Arc<MockTransport>,
    resolver: Option<Arc<MockResolver>>,
) -> Arc<EventSubscriber> {
    let config = SubscriberConfig::new(EventPackageConfig::new(PACKAGE, SUB_TYPE).with_duration(duration));
    let mut builder = EventSubscriber::builder(config, transport.clone());
    if let Some(resolver) = resolver {
        builder = builder.with_challenge_resolver(resolver);
    }
    builder.build().expect("valid subscriber config")
}

/// A NOTIFY as the subscriber receives it
pub fn notify_request(
    call_id: &str,
    state: SubscriptionState,
    reason: Option<TerminationReason>,
    body: Option<&'static str>,
) -> Request {
    let mut request = Request::new(
        Method::Notify,
        Address::new(SUBSCRIBER_URI),
        Address::new(NOTIFIER_URI),
        call_id,
    )
    .with_event(EventHeader::new(PACKAGE, None))
    .with_subscription_state(SubscriptionStateHeader::new(state).with_reason(reason));
    if let Some(body) = body {
        request = request.with_body(ContentType::application(SUB_TYPE), Bytes::from_static(body.as_bytes()));
    }
    request
}

// ===== Notifier side =====

pub struct RecordingNotifierHandler {
    body: Bytes,
    fail: AtomicBool,
    built: Mutex<Vec<(SubscriptionState, Option<TerminationReason>)>>,
    removed: AtomicUsize,
}

impl RecordingNotifierHandler {
    pub fn new(body: &'static str) -> Self {
        Self {
            body: Bytes::from_static(body.as_bytes()),
            fail: AtomicBool::new(false),
            built: Mutex::new(Vec::new()),
            removed: AtomicUsize::new(0),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn built(&self) -> Vec<(SubscriptionState, Option<TerminationReason>)> {
        self.built.lock().clone()
    }

    pub fn removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }
}

impl SubscriptionHandler for RecordingNotifierHandler {
    fn removed(&self) {
        self.removed.fetch_add(1, Ordering::SeqCst);
    }
}

impl NotifierHandler for RecordingNotifierHandler {
    fn build_payload(
        &self,
        state: SubscriptionState,
        reason: Option<&TerminationReason>,
    ) -> EventResult<Bytes> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EventError::internal("document unavailable"));
        }
        self.built.lock().push((state, reason.cloned()));
        Ok(self.body.clone())
    }
}

/// Factory remembering every handler it created
pub struct RecordingFactory {
    body: &'static str,
    created: Mutex<Vec<(Address, Arc<RecordingNotifierHandler>)>>,
}

impl RecordingFactory {
    pub fn new(body: &'static str) -> Arc<Self> {
        Arc::new(Self {
            body,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn handler(&self, index: usize) -> Arc<RecordingNotifierHandler> {
        self.created.lock()[index].1.clone()
    }

    pub fn total_removed(&self) -> usize {
        self.created
            .lock()
            .iter()
            .map(|(_, handler)| handler.removed())
            .sum()
    }
}

impl SubscriptionFactory for RecordingFactory {
    fn create_subscription(&self, from: &Address, event_id: Option<&str>) -> NotifierSubscription {
        let handler = Arc::new(RecordingNotifierHandler::new(self.body));
        self.created.lock().push((from.clone(), handler.clone()));
        NotifierSubscription::new(from.clone(), event_id.map(str::to_string), handler)
    }
}

pub fn notifier(
    duration: u32,
    min_expires: u32,
    transport: &Arc<MockTransport>,
    factory: &Arc<RecordingFactory>,
    resolver: Option<Arc<MockResolver>>,
) -> Arc<EventNotifier> {
    let config = NotifierConfig::new(EventPackageConfig::new(PACKAGE, SUB_TYPE).with_duration(duration))
        .with_min_expires(min_expires);
    let mut builder = EventNotifier::builder(config, transport.clone(), factory.clone());
    if let Some(resolver) = resolver {
        builder = builder.with_challenge_resolver(resolver);
    }
    builder.build().expect("valid notifier config")
}

/// A SUBSCRIBE as the notifier receives it
pub fn subscribe_request(from: &str, call_id: &str, expires: Option<u32>, event_id: Option<&str>) -> Request {
    let mut request = Request::new(
        Method::Subscribe,
        Address::new(NOTIFIER_URI),
        Address::new(from),
        call_id,
    )
    .with_event(EventHeader::new(PACKAGE, event_id))
    .with_accept(ContentType::application(SUB_TYPE));
    if let Some(expires) = expires {
        request = request.with_expires(expires);
    }
    request
}

/// Notifier-side dialog for a watcher
pub fn watcher_dialog(from: &str, call_id: &str) -> Arc<MockDialog> {
    MockDialog::new(call_id, NOTIFIER_URI, from)
}
