//! Routing of incoming messages to event package engines
//!
//! The transport layer hands every SUBSCRIBE, NOTIFY and response to one
//! [`EventDispatcher`], which offers it to the registered processors in
//! registration order. Requests nobody takes are answered here:
//!
//! - SUBSCRIBE / NOTIFY for an unknown package: `489 Bad Event` with the
//!   supported packages (see [`EventDispatcher::allow_events`])
//! - any other method: `501 Not Implemented`

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, trace};

use crate::message::{Method, RequestEvent, Response, ResponseEvent};
use crate::transport::{EventTransport, MessageProcessor};
use crate::types::StatusCode;

pub struct EventDispatcher {
    transport: Arc<dyn EventTransport>,
    processors: RwLock<Vec<Arc<dyn MessageProcessor>>>,
}

impl EventDispatcher {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self {
            transport,
            processors: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, processor: Arc<dyn MessageProcessor>) {
        debug!("Registering processor for event package {}", processor.event_package());
        self.processors.write().push(processor);
    }

    /// Distinct event packages served, in registration order (the
    /// Allow-Events header)
    pub fn allow_events(&self) -> Vec<String> {
        let mut packages: Vec<String> = Vec::new();
        for processor in self.processors.read().iter() {
            let package = processor.event_package();
            if !packages.iter().any(|known| known.eq_ignore_ascii_case(package)) {
                packages.push(package.to_string());
            }
        }
        packages
    }

    /// Offer `event` to every processor until one handles it
    ///
    /// Returns whether a processor handled it; unhandled requests have been
    /// answered with 489 or 501.
    pub async fn dispatch_request(&self, event: RequestEvent) -> bool {
        for processor in self.snapshot() {
            if processor.process_request(event.clone()).await {
                return true;
            }
        }

        let request = &event.request;
        let response = match request.method {
            Method::Subscribe | Method::Notify => {
                Response::new(StatusCode::BAD_EVENT).with_allow_events(self.allow_events())
            }
            Method::Other(_) => Response::new(StatusCode::NOT_IMPLEMENTED),
        };
        let status = response.status;
        debug!(
            "No processor for {} {} (event {:?}); answering {}",
            request.method,
            request.call_id,
            request.event.as_ref().map(|event| event.package.as_str()),
            status
        );

        if let Err(e) = self
            .transport
            .send_response(request, response)
            .await
        {
            error!("Failed to send {} to {} {}: {}", status, request.method, request.call_id, e);
        }
        false
    }

    /// Offer `event` to every processor until one handles it
    pub async fn dispatch_response(&self, event: ResponseEvent) -> bool {
        for processor in self.snapshot() {
            if processor.process_response(event.clone()).await {
                return true;
            }
        }
        trace!("Unhandled {} response to {}", event.status(), event.call_id());
        false
    }

    fn snapshot(&self) -> Vec<Arc<dyn MessageProcessor>> {
        self.processors.read().clone()
    }
}
