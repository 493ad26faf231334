//! # RVoIP Event Core
//!
//! RFC 3265 SIP-specific event notification: the subscriber and notifier
//! sides of SUBSCRIBE/NOTIFY for one event package each (presence,
//! message-summary, dialog, ...).
//!
//! The crate implements the subscription state machines only. Parsing and
//! sending SIP messages, dialog management and credentials are left to the
//! collaborators in [`transport`].
//!
//! ## Features
//!
//! - **Subscriber**: subscribe, poll, refresh before expiry, unsubscribe,
//!   423 Interval Too Brief retry, 401/407 challenge handling
//! - **Notifier**: accept, refresh, take over and expire subscriptions;
//!   NOTIFY one or all subscribers
//! - **Dispatcher**: routes incoming messages to the engine serving their
//!   event package and answers the rest with 489/501
//!
//! ## Architecture
//!
//! - `subscriber` / `notifier`: the two engines
//! - `subscription`: subscription state plus event package behavior traits
//! - `dispatcher`: message routing across engines
//! - `transport`: collaborator traits (dialog, transport, challenge resolver)
//! - `message`, `types`: structured SIP requests/responses and header values
//! - `timer`: one-shot timers for refresh and expiry
//! - `config`, `errors`, `logging`: ambient plumbing

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod message;
pub mod notifier;
pub mod subscriber;
pub mod subscription;
pub mod timer;
pub mod transport;
pub mod types;

mod support;

// Re-export key types
pub use config::{EventPackageConfig, NotifierConfig, SubscriberConfig};
pub use dispatcher::EventDispatcher;
pub use errors::{EventError, EventResult, TransportError};
pub use message::{
    EventHeader, Method, Request, RequestEvent, Response, ResponseEvent, SubscriptionStateHeader,
};
pub use notifier::{EventNotifier, EventNotifierBuilder};
pub use subscriber::{EventSubscriber, EventSubscriberBuilder};
pub use subscription::{
    NotifierHandler, NotifierSubscription, SubscriberHandler, SubscriberSubscription, Subscription,
    SubscriptionFactory, SubscriptionHandler, SubscriptionStatus,
};
pub use timer::{TimerHandle, TimerService};
pub use transport::{ChallengeResolver, Dialog, DialogHandle, EventTransport, MessageProcessor};
pub use types::{
    Address, ContentType, StatusCode, SubscriptionKey, SubscriptionState, TerminationReason,
};
