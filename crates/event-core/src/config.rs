//! Engine configuration
//!
//! Every engine serves exactly one event package. [`EventPackageConfig`]
//! describes the package; [`SubscriberConfig`] and [`NotifierConfig`] add
//! the role-specific knobs.
//!
//! ```
//! use rvoip_event_core::config::{EventPackageConfig, SubscriberConfig};
//!
//! let config = SubscriberConfig::new(
//!     EventPackageConfig::new("presence", "pidf+xml").with_duration(3600),
//! )
//! .with_refresh_margin(30);
//!
//! assert_eq!(config.package.subscription_duration, 3600);
//! assert_eq!(config.refresh_margin, 30);
//! assert!(config.validate().is_ok());
//! ```
//!
//! All durations are whole seconds, the unit of the SIP Expires header.

use serde::{Deserialize, Serialize};

use crate::errors::{EventError, EventResult};
use crate::types::ContentType;

/// Default subscription duration announced/granted (seconds)
pub const DEFAULT_SUBSCRIPTION_DURATION: u32 = 3600;

/// Default margin subtracted from a granted duration before refreshing
pub const DEFAULT_REFRESH_MARGIN: u32 = 60;

/// Shortest subscription a notifier accepts (RFC 3265 recommends 1 minute;
/// we follow the common 2 minute floor)
pub const DEFAULT_MIN_EXPIRES: u32 = 120;

/// Description of one event package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPackageConfig {
    /// Package name carried in Event and Allow-Events headers
    pub event_package: String,

    /// Sub-type of the `application/*` bodies expected and produced
    pub content_sub_type: String,

    /// Subscriber: Expires requested in SUBSCRIBE.
    /// Notifier: Expires granted when a SUBSCRIBE carries none.
    #[serde(default = "default_duration")]
    pub subscription_duration: u32,
}

fn default_duration() -> u32 {
    DEFAULT_SUBSCRIPTION_DURATION
}

fn default_refresh_margin() -> u32 {
    DEFAULT_REFRESH_MARGIN
}

fn default_min_expires() -> u32 {
    DEFAULT_MIN_EXPIRES
}

impl EventPackageConfig {
    pub fn new(event_package: impl Into<String>, content_sub_type: impl Into<String>) -> Self {
        Self {
            event_package: event_package.into(),
            content_sub_type: content_sub_type.into(),
            subscription_duration: DEFAULT_SUBSCRIPTION_DURATION,
        }
    }

    pub fn with_duration(mut self, seconds: u32) -> Self {
        self.subscription_duration = seconds;
        self
    }

    /// `application/<content_sub_type>`
    pub fn content_type(&self) -> ContentType {
        ContentType::application(self.content_sub_type.clone())
    }

    pub fn validate(&self) -> EventResult<()> {
        if self.event_package.trim().is_empty() {
            return Err(EventError::config("event package name must not be empty"));
        }
        if self.content_sub_type.trim().is_empty() {
            return Err(EventError::config("content sub-type must not be empty"));
        }
        if self.subscription_duration == 0 {
            return Err(EventError::config("subscription duration must be positive"));
        }
        Ok(())
    }
}

/// Configuration of an [`EventSubscriber`](crate::subscriber::EventSubscriber)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    #[serde(flatten)]
    pub package: EventPackageConfig,

    /// Seconds subtracted from the granted duration when scheduling a
    /// refresh
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin: u32,
}

impl SubscriberConfig {
    pub fn new(package: EventPackageConfig) -> Self {
        Self {
            package,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
        }
    }

    pub fn with_refresh_margin(mut self, seconds: u32) -> Self {
        self.refresh_margin = seconds;
        self
    }

    pub fn validate(&self) -> EventResult<()> {
        self.package.validate()
    }
}

/// Configuration of an [`EventNotifier`](crate::notifier::EventNotifier)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    #[serde(flatten)]
    pub package: EventPackageConfig,

    /// SUBSCRIBEs asking for less than this (but more than zero) get
    /// 423 Interval Too Brief
    #[serde(default = "default_min_expires")]
    pub min_expires: u32,
}

impl NotifierConfig {
    pub fn new(package: EventPackageConfig) -> Self {
        Self {
            package,
            min_expires: DEFAULT_MIN_EXPIRES,
        }
    }

    pub fn with_min_expires(mut self, seconds: u32) -> Self {
        self.min_expires = seconds;
        self
    }

    pub fn validate(&self) -> EventResult<()> {
        self.package.validate()?;
        if self.package.subscription_duration < self.min_expires {
            return Err(EventError::config(format!(
                "default duration {}s is below the minimum of {}s",
                self.package.subscription_duration, self.min_expires
            )));
        }
        Ok(())
    }
}
