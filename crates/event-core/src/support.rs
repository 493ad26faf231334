//! Helpers shared by the subscriber and notifier engines

use std::sync::Arc;

use tracing::{debug, error};

use crate::config::EventPackageConfig;
use crate::errors::{EventError, EventResult};
use crate::message::{EventHeader, Request, Response, ResponseEvent};
use crate::timer::TimerService;
use crate::transport::{ChallengeResolver, EventTransport};
use crate::types::ContentType;

/// Collaborators and package description common to both roles
pub(crate) struct PackageSupport {
    pub(crate) package: EventPackageConfig,
    pub(crate) transport: Arc<dyn EventTransport>,
    pub(crate) resolver: Option<Arc<dyn ChallengeResolver>>,
    pub(crate) timers: Arc<TimerService>,
}

impl PackageSupport {
    pub(crate) fn new(
        package: EventPackageConfig,
        transport: Arc<dyn EventTransport>,
        timers: Arc<TimerService>,
    ) -> Self {
        Self {
            package,
            transport,
            resolver: None,
            timers,
        }
    }

    pub(crate) fn event_package(&self) -> &str {
        &self.package.event_package
    }

    pub(crate) fn content_type(&self) -> ContentType {
        self.package.content_type()
    }

    /// Whether a message's Event header names our package
    ///
    /// Messages without an Event header or for another package are left to
    /// other processors.
    pub(crate) fn is_our_event(&self, event: Option<&EventHeader>) -> bool {
        event.is_some_and(|event| event.is_package(&self.package.event_package))
    }

    pub(crate) fn event_header(&self, event_id: Option<&str>) -> EventHeader {
        EventHeader::new(self.package.event_package.clone(), event_id)
    }

    /// Send a response, logging instead of failing
    pub(crate) async fn respond(&self, request: &Request, response: Response) -> bool {
        let status = response.status;
        match self.transport.send_response(request, response).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Failed to send {} response to {} {}: {}",
                    status, request.method, request.call_id, e
                );
                false
            }
        }
    }

    /// Answer a 401/407 challenge and resend the credentialed request
    ///
    /// The retry goes through the response's dialog when there is one,
    /// otherwise through a new client transaction.
    pub(crate) async fn resolve_and_resend(&self, event: &ResponseEvent) -> EventResult<()> {
        debug!("Authenticating {} {}", event.request.method, event.call_id());

        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| EventError::authentication("no challenge resolver configured"))?;

        let retry = resolver
            .resolve_challenge(&event.request, &event.response)
            .await
            .map_err(|e| match e {
                EventError::AuthenticationFailure { .. } => e,
                other => EventError::authentication(other.to_string()),
            })?;

        let sent = match &event.dialog {
            Some(dialog) => dialog.send_request(retry).await,
            None => self.transport.send_request(retry).await,
        };

        sent.map_err(|e| {
            EventError::authentication(format!("failed to send authenticated request: {}", e))
        })
    }
}
