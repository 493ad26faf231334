//! Structured SUBSCRIBE/NOTIFY messages
//!
//! The engines never see wire-format SIP. The transport collaborator hands
//! them [`RequestEvent`]s and [`ResponseEvent`]s and receives [`Request`]s
//! and [`Response`]s back, carrying only the headers RFC 3265 processing
//! depends on.

use std::fmt;

use bytes::Bytes;

use crate::transport::DialogHandle;
use crate::types::{Address, ContentType, StatusCode, SubscriptionState, TerminationReason};

/// SIP request method
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Subscribe,
    Notify,
    Other(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Other(method) => method,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event header: package name plus optional `id` parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    pub package: String,
    pub id: Option<String>,
}

impl EventHeader {
    pub fn new(package: impl Into<String>, id: Option<&str>) -> Self {
        Self {
            package: package.into(),
            id: id.map(str::to_string),
        }
    }

    /// Event package names compare case-insensitively
    pub fn is_package(&self, package: &str) -> bool {
        self.package.eq_ignore_ascii_case(package)
    }
}

/// Subscription-State header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStateHeader {
    pub state: SubscriptionState,
    pub reason: Option<TerminationReason>,
    /// Remaining lifetime in seconds, for `active`/`pending`
    pub expires: Option<u32>,
}

impl SubscriptionStateHeader {
    pub fn new(state: SubscriptionState) -> Self {
        Self {
            state,
            reason: None,
            expires: None,
        }
    }

    pub fn with_reason(mut self, reason: Option<TerminationReason>) -> Self {
        self.reason = reason;
        self
    }

    pub fn with_expires(mut self, expires: Option<u32>) -> Self {
        self.expires = expires;
        self
    }
}

impl fmt::Display for SubscriptionStateHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)?;
        if let Some(reason) = &self.reason {
            write!(f, ";reason={}", reason)?;
        }
        if let Some(expires) = self.expires {
            write!(f, ";expires={}", expires)?;
        }
        Ok(())
    }
}

/// An outgoing or incoming SUBSCRIBE/NOTIFY request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Request-URI
    pub target: Address,
    pub from: Address,
    pub call_id: String,
    pub event: Option<EventHeader>,
    pub expires: Option<u32>,
    pub accept: Option<ContentType>,
    pub subscription_state: Option<SubscriptionStateHeader>,
    pub content_type: Option<ContentType>,
    pub body: Option<Bytes>,
}

impl Request {
    pub fn new(method: Method, target: Address, from: Address, call_id: impl Into<String>) -> Self {
        Self {
            method,
            target,
            from,
            call_id: call_id.into(),
            event: None,
            expires: None,
            accept: None,
            subscription_state: None,
            content_type: None,
            body: None,
        }
    }

    pub fn with_event(mut self, event: EventHeader) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_accept(mut self, accept: ContentType) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn with_subscription_state(mut self, header: SubscriptionStateHeader) -> Self {
        self.subscription_state = Some(header);
        self
    }

    pub fn with_body(mut self, content_type: ContentType, body: Bytes) -> Self {
        self.content_type = Some(content_type);
        self.body = Some(body);
        self
    }

    /// The `id` parameter of the Event header, if any
    pub fn event_id(&self) -> Option<&str> {
        self.event.as_ref().and_then(|event| event.id.as_deref())
    }
}

/// A SIP response, as far as event processing is concerned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub reason_phrase: String,
    pub expires: Option<u32>,
    pub min_expires: Option<u32>,
    pub accept: Option<ContentType>,
    /// Allow-Events, sent with 489 Bad Event
    pub allow_events: Vec<String>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason_phrase: status.reason_phrase().to_string(),
            expires: None,
            min_expires: None,
            accept: None,
            allow_events: Vec::new(),
        }
    }

    pub fn with_reason_phrase(mut self, reason: impl Into<String>) -> Self {
        self.reason_phrase = reason.into();
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = Some(expires);
        self
    }

    pub fn with_min_expires(mut self, min_expires: u32) -> Self {
        self.min_expires = Some(min_expires);
        self
    }

    pub fn with_accept(mut self, accept: ContentType) -> Self {
        self.accept = Some(accept);
        self
    }

    pub fn with_allow_events(mut self, packages: Vec<String>) -> Self {
        self.allow_events = packages;
        self
    }
}

/// An incoming request together with the server-side dialog it created or
/// belongs to
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub request: Request,
    pub dialog: Option<DialogHandle>,
}

impl RequestEvent {
    pub fn new(request: Request, dialog: Option<DialogHandle>) -> Self {
        Self { request, dialog }
    }
}

/// An incoming response together with the client request it answers
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub response: Response,
    /// The request this response answers (Call-ID, Event, Expires, ...)
    pub request: Request,
    /// The dialog established by, or used for, the request
    pub dialog: Option<DialogHandle>,
}

impl ResponseEvent {
    pub fn new(response: Response, request: Request, dialog: Option<DialogHandle>) -> Self {
        Self {
            response,
            request,
            dialog,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn call_id(&self) -> &str {
        &self.request.call_id
    }
}
