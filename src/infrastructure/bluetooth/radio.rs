//! Radio Primitive
//!
//! Abstract interface to the platform radio service. The session manager
//! only consumes already-decoded samples and lifecycle events from it; any
//! protocol bytes stay on the platform side.

use crate::domain::models::{ChannelKind, Peripheral, PeripheralId, RadioPowerState, SampleReading};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RadioError {
    #[error("Radio is powered off")]
    PoweredOff,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Radio error: {0}")]
    Other(String),
}

/// What the platform reports about its own capabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioSupport {
    /// Host platform family provides the radio service at all
    pub platform_supported: bool,
    /// A usable radio adapter is present
    pub hardware_available: bool,
    pub channels: Vec<ChannelKind>,
    /// Peripherals already known to the platform (paired wearables)
    pub known_devices: Vec<Peripheral>,
    /// Platform explanation when something is missing
    pub reason: Option<String>,
}

impl RadioSupport {
    pub fn full(known_devices: Vec<Peripheral>) -> Self {
        Self {
            platform_supported: true,
            hardware_available: true,
            channels: ChannelKind::ALL.to_vec(),
            known_devices,
            reason: None,
        }
    }

    pub fn no_hardware(reason: impl Into<String>) -> Self {
        Self {
            platform_supported: true,
            hardware_available: false,
            channels: Vec::new(),
            known_devices: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn unsupported_platform() -> Self {
        Self {
            platform_supported: false,
            hardware_available: false,
            channels: Vec::new(),
            known_devices: Vec::new(),
            reason: None,
        }
    }
}

/// Push events emitted by the radio at its own cadence
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Open link closed without being asked to
    LinkLost(PeripheralId),
    Sample(SampleReading),
    PowerChanged(RadioPowerState),
}

#[async_trait]
pub trait RadioPrimitive: Send + Sync {
    async fn check_compatibility(&self) -> Result<RadioSupport, RadioError>;

    /// Discover nearby peripherals for up to `duration`.
    async fn scan(&self, duration: Duration) -> Result<Vec<Peripheral>, RadioError>;

    /// Open a link; resolves once the link is open.
    async fn connect(&self, id: &PeripheralId) -> Result<(), RadioError>;

    /// Close the current link, if any.
    async fn disconnect(&self) -> Result<(), RadioError>;

    /// Subscribe to the push event stream.
    fn events(&self) -> broadcast::Receiver<RadioEvent>;
}
