//! Connection-and-telemetry session manager for a wrist-worn companion device.
//!
//! The game layer drives a [`SessionManager`] and reads its sensor snapshot;
//! the platform radio is injected as a [`RadioPrimitive`].

pub mod domain;
pub mod infrastructure;

pub use domain::error::SessionError;
pub use domain::intensity::{Intensity, IntensityMonitor};
pub use domain::models::{ConnectionState, Peripheral, PeripheralId, SessionEvent};
pub use infrastructure::bluetooth::connection::SessionConfig;
pub use infrastructure::bluetooth::radio::RadioPrimitive;
pub use infrastructure::bluetooth::SessionManager;
