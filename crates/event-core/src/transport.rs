//! Collaborator contracts
//!
//! event-core does not own a SIP stack. It talks to the layers around it
//! through the traits in this module:
//!
//! ```text
//!  ┌──────────────────┐  RequestEvent / ResponseEvent   ┌──────────────────┐
//!  │ transport/dialog │────────────────────────────────▶│ MessageProcessor │
//!  │      layer       │◀────────────────────────────────│ (subscriber or   │
//!  └──────────────────┘  send_request / send_response   │  notifier)       │
//!           ▲                                           └────────┬─────────┘
//!           │ resend                                             │ 401/407
//!  ┌────────┴─────────┐                                          │
//!  │ChallengeResolver │◀─────────────────────────────────────────┘
//!  └──────────────────┘
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{EventResult, TransportError};
use crate::message::{Method, Request, RequestEvent, Response, ResponseEvent};
use crate::types::Address;

/// An established signaling relationship (SIP dialog)
///
/// Subscriptions attach to a dialog once established and send every
/// follow-up request (refresh, unsubscribe, NOTIFY) through it.
#[async_trait]
pub trait Dialog: Send + Sync + fmt::Debug {
    /// Unique identity of this dialog; two handles with the same id are the
    /// same dialog
    fn id(&self) -> &str;

    /// Call-ID shared by every request of the dialog
    fn call_id(&self) -> &str;

    /// Our own address in this dialog
    fn local_party(&self) -> &Address;

    /// The peer's address of record
    fn remote_party(&self) -> &Address;

    /// The peer's Contact, when it sent one
    fn remote_target(&self) -> Option<&Address> {
        None
    }

    /// Create a follow-up request inside this dialog
    ///
    /// Requests go to the remote target; when the peer sent no Contact the
    /// remote party is used instead.
    fn create_request(&self, method: Method) -> Request {
        let target = self.remote_target().unwrap_or_else(|| self.remote_party());
        Request::new(
            method,
            target.clone(),
            self.local_party().clone(),
            self.call_id().to_string(),
        )
    }

    /// Send a request inside this dialog
    async fn send_request(&self, request: Request) -> Result<(), TransportError>;
}

/// Shared handle to a dialog
pub type DialogHandle = Arc<dyn Dialog>;

/// Whether two handles refer to the same dialog
pub fn same_dialog(a: &DialogHandle, b: &DialogHandle) -> bool {
    Arc::ptr_eq(a, b) || a.id() == b.id()
}

/// Out-of-dialog request creation and message sending
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// The address we use in From when talking to `target`
    fn local_address(&self, target: &Address) -> Address;

    /// Allocate a fresh Call-ID
    fn new_call_id(&self) -> String;

    /// Create a new out-of-dialog request with a fresh Call-ID
    fn create_request(&self, method: Method, target: &Address) -> Request {
        Request::new(
            method,
            target.clone(),
            self.local_address(target),
            self.new_call_id(),
        )
    }

    /// Send an out-of-dialog request in a new client transaction
    async fn send_request(&self, request: Request) -> Result<(), TransportError>;

    /// Answer an incoming request
    async fn send_response(&self, request: &Request, response: Response) -> Result<(), TransportError>;
}

/// Answers 401/407 challenges
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    /// Produce a credentialed copy of `request` answering `challenge`
    async fn resolve_challenge(&self, request: &Request, challenge: &Response) -> EventResult<Request>;
}

/// Receiver of incoming requests and responses
///
/// Both engines implement this. The return value tells the caller whether
/// the message was consumed; a processor returns `false` only for methods or
/// event packages it does not serve so another processor can take it. A
/// message of its own package that it drops, for example one missing a
/// required header, still counts as consumed and gets no response.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// The event package served by this processor
    fn event_package(&self) -> &str;

    async fn process_request(&self, event: RequestEvent) -> bool;

    async fn process_response(&self, event: ResponseEvent) -> bool;
}
