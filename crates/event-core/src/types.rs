//! Protocol value types shared by the subscriber and notifier engines
//!
//! - [`Address`]: a SIP address with a canonical form used for identity
//! - [`SubscriptionKey`]: `(address, event id)` identity of a subscription
//! - [`StatusCode`]: SIP response status with class predicates
//! - [`SubscriptionState`] / [`TerminationReason`]: Subscription-State values
//! - [`ContentType`]: body type announced in Accept / Content-Type

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::errors::EventError;

/// A SIP address (the `Address` of a From/To header or a Request-URI)
///
/// Two addresses are equal when they identify the same resource: display
/// names, angle brackets, URI parameters and headers are ignored and the
/// comparison is case-insensitive.
///
/// ```
/// use rvoip_event_core::types::Address;
///
/// let a = Address::new("\"Alice\" <sip:Alice@Example.com;transport=udp>;tag=1234");
/// let b = Address::new("sip:alice@example.com");
/// assert_eq!(a, b);
/// assert_eq!(a.canonical(), "sip:alice@example.com");
/// ```
#[derive(Debug, Clone)]
pub struct Address {
    raw: String,
    canonical: String,
}

impl Address {
    /// Create an address from a header value or URI
    pub fn new(value: impl Into<String>) -> Self {
        let raw = value.into();
        let canonical = canonicalize(&raw);
        Self { raw, canonical }
    }

    /// The value this address was created from
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The canonical URI used for identity comparisons
    pub fn canonical(&self) -> &str {
        &self.canonical
    }
}

fn canonicalize(value: &str) -> String {
    let value = value.trim();

    // name-addr form: take what is inside the angle brackets
    let uri = match (value.find('<'), value.rfind('>')) {
        (Some(start), Some(end)) if start < end => &value[start + 1..end],
        _ => value,
    };

    let uri = uri.split(['?', ';']).next().unwrap_or(uri).trim();
    let uri = uri.to_ascii_lowercase();

    if uri.contains(':') {
        uri
    } else {
        format!("sip:{}", uri)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Address::new(value)
    }
}

/// Identity of a subscription: the watched/watching address plus the
/// optional `id` parameter of the Event header
///
/// A missing event id is a valid tag of its own and only matches another
/// missing event id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    address: Address,
    event_id: Option<String>,
}

impl SubscriptionKey {
    pub fn new(address: Address, event_id: Option<&str>) -> Self {
        Self {
            address,
            event_id: event_id.map(|id| id.to_ascii_lowercase()),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Normalized (lowercase) event id
    pub fn event_id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.event_id {
            Some(id) => write!(f, "{};id={}", self.address.canonical(), id),
            None => f.write_str(self.address.canonical()),
        }
    }
}

/// SIP response status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const ACCEPTED: StatusCode = StatusCode(202);
    pub const MULTIPLE_CHOICES: StatusCode = StatusCode(300);
    pub const MOVED_TEMPORARILY: StatusCode = StatusCode(302);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const UNAUTHORIZED: StatusCode = StatusCode(401);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const PROXY_AUTHENTICATION_REQUIRED: StatusCode = StatusCode(407);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const UNSUPPORTED_MEDIA_TYPE: StatusCode = StatusCode(415);
    pub const INTERVAL_TOO_BRIEF: StatusCode = StatusCode(423);
    pub const TEMPORARILY_UNAVAILABLE: StatusCode = StatusCode(480);
    pub const CALL_OR_TRANSACTION_DOES_NOT_EXIST: StatusCode = StatusCode(481);
    pub const BUSY_HERE: StatusCode = StatusCode(486);
    pub const BAD_EVENT: StatusCode = StatusCode(489);
    pub const SERVER_INTERNAL_ERROR: StatusCode = StatusCode(500);
    pub const NOT_IMPLEMENTED: StatusCode = StatusCode(501);
    pub const DECLINE: StatusCode = StatusCode(603);

    pub const fn new(code: u16) -> Self {
        StatusCode(code)
    }

    pub const fn as_u16(&self) -> u16 {
        self.0
    }

    pub fn is_provisional(&self) -> bool {
        (100..200).contains(&self.0)
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.0)
    }

    /// 3xx
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.0)
    }

    /// 401 or 407
    pub fn is_auth_challenge(&self) -> bool {
        *self == Self::UNAUTHORIZED || *self == Self::PROXY_AUTHENTICATION_REQUIRED
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.0)
    }

    /// Default reason phrase for the codes the engines emit
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            200 => "OK",
            202 => "Accepted",
            400 => "Bad Request",
            401 => "Unauthorized",
            407 => "Proxy Authentication Required",
            415 => "Unsupported Media Type",
            423 => "Interval Too Brief",
            481 => "Call/Transaction Does Not Exist",
            489 => "Bad Event",
            500 => "Server Internal Error",
            501 => "Not Implemented",
            603 => "Decline",
            _ => "",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

/// Value of the Subscription-State header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Active,
    Pending,
    Terminated,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::Active => "active",
            SubscriptionState::Pending => "pending",
            SubscriptionState::Terminated => "terminated",
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, SubscriptionState::Terminated)
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionState {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(SubscriptionState::Active),
            "pending" => Ok(SubscriptionState::Pending),
            "terminated" => Ok(SubscriptionState::Terminated),
            other => Err(EventError::protocol(format!(
                "unknown subscription state '{}'",
                other
            ))),
        }
    }
}

/// `reason` parameter of a terminated Subscription-State (RFC 3265 §3.2.4)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    Deactivated,
    Probation,
    Rejected,
    Timeout,
    Giveup,
    NoResource,
    Invariant,
    Other(String),
}

impl TerminationReason {
    pub fn as_str(&self) -> &str {
        match self {
            TerminationReason::Deactivated => "deactivated",
            TerminationReason::Probation => "probation",
            TerminationReason::Rejected => "rejected",
            TerminationReason::Timeout => "timeout",
            TerminationReason::Giveup => "giveup",
            TerminationReason::NoResource => "noresource",
            TerminationReason::Invariant => "invariant",
            TerminationReason::Other(reason) => reason,
        }
    }

    /// Parse a reason token; never fails, unknown tokens become `Other`
    pub fn parse(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        match value.as_str() {
            "deactivated" => TerminationReason::Deactivated,
            "probation" => TerminationReason::Probation,
            "rejected" => TerminationReason::Rejected,
            "timeout" => TerminationReason::Timeout,
            "giveup" => TerminationReason::Giveup,
            "noresource" => TerminationReason::NoResource,
            "invariant" => TerminationReason::Invariant,
            _ => TerminationReason::Other(value),
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A media type such as `application/pidf+xml`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub media_type: String,
    pub sub_type: String,
}

impl ContentType {
    pub fn new(media_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            sub_type: sub_type.into(),
        }
    }

    /// `application/<sub_type>`, the form every event package here uses
    pub fn application(sub_type: impl Into<String>) -> Self {
        Self::new("application", sub_type)
    }

    pub fn sub_type_matches(&self, sub_type: &str) -> bool {
        self.sub_type.eq_ignore_ascii_case(sub_type)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.media_type, self.sub_type)
    }
}

impl FromStr for ContentType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.split(';').next().unwrap_or(s).trim();
        match value.split_once('/') {
            Some((media_type, sub_type)) if !media_type.is_empty() && !sub_type.is_empty() => {
                Ok(ContentType::new(media_type.trim(), sub_type.trim()))
            }
            _ => Err(EventError::protocol(format!("invalid content type '{}'", s))),
        }
    }
}
