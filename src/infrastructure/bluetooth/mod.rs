//! Wearable Radio Module
//!
//! Session management for a wrist-worn telemetry device.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    SessionManager                        │
//! │  (State machine - public API for the game layer)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!      ┌────────────────┼────────────────┬───────────────┐
//!      │                │                │               │
//!      ▼                ▼                ▼               ▼
//! ┌──────────────┐ ┌──────────┐ ┌────────────────┐ ┌──────────┐
//! │Compatibility │ │ Registry │ │  Connection    │ │  Radio   │
//! │    Gate      │ │          │ │                │ │          │
//! │ - platform   │ │ - scan   │ │ - timeouts     │ │ - trait  │
//! │ - channels   │ │   results│ │ - reconnect    │ │ - events │
//! │              │ │ - select │ │   budget       │ │ - sim    │
//! └──────────────┘ └──────────┘ └────────────────┘ └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - Platform radio boundary (`RadioPrimitive`) and its push events
//! - [`simulated`] - Scriptable in-process radio for tests and demos
//! - [`compatibility`] - One-shot platform/hardware gate
//! - [`registry`] - Discovered and selected peripherals
//! - [`connection`] - Link attempts, timeouts and the reconnection policy
//! - [`service`] - Main session coordinator

pub mod compatibility;
pub mod connection;
pub mod radio;
pub mod registry;
pub mod service;
pub mod simulated;

// Re-export main service for convenience
pub use service::SessionManager;
