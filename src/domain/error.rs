use crate::domain::models::{ConnectionState, PeripheralId, RadioPowerState, SessionEvent};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Platform does not support wearable integration")]
    PlatformUnsupported,

    #[error("Hardware incompatible: {0}")]
    Incompatible(String),

    #[error("No devices found")]
    NoDevicesFound,

    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Reconnection exhausted: {0}")]
    ReconnectionExhausted(String),

    #[error("Radio is disabled")]
    RadioDisabled,

    #[error("Unknown device: {0}")]
    UnknownDevice(PeripheralId),

    #[error("Scan failed: {0}")]
    ScanFailed(String),

    #[error("Connection attempt cancelled")]
    ConnectionCancelled,

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },
}

impl SessionError {
    /// Reason carried by `ConnectionState::Failed` when this error ends a session.
    pub fn failure_reason(&self) -> String {
        match self {
            Self::ConnectionTimeout => "connection timed out".to_string(),
            Self::ConnectionFailed(reason) if !reason.trim().is_empty() => reason.clone(),
            Self::ConnectionFailed(_) => "connection failed".to_string(),
            Self::ReconnectionExhausted(_) => "reconnection failed".to_string(),
            Self::RadioDisabled => "radio disabled".to_string(),
            other => other.to_string(),
        }
    }

    /// Bus event announcing this error, if it is a mid-session fault.
    pub fn as_event(&self) -> Option<SessionEvent> {
        match self {
            Self::ConnectionTimeout | Self::ConnectionFailed(_) => {
                Some(SessionEvent::ConnectionFailed(self.failure_reason()))
            }
            Self::ReconnectionExhausted(reason) => {
                Some(SessionEvent::ReconnectionFailed(reason.clone()))
            }
            Self::Incompatible(reason) => Some(SessionEvent::CompatibilityFailed(reason.clone())),
            Self::PlatformUnsupported => Some(SessionEvent::CompatibilityFailed(self.to_string())),
            Self::RadioDisabled => Some(SessionEvent::RadioStateChanged(RadioPowerState::PoweredOff)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reasons_are_never_empty() {
        let errors = [
            SessionError::ConnectionTimeout,
            SessionError::ConnectionFailed(String::new()),
            SessionError::ReconnectionExhausted("attempt timed out".into()),
            SessionError::RadioDisabled,
        ];
        for error in errors {
            assert!(!error.failure_reason().is_empty());
        }
        assert_eq!(
            SessionError::ReconnectionExhausted("x".into()).failure_reason(),
            "reconnection failed"
        );
        assert_eq!(SessionError::RadioDisabled.failure_reason(), "radio disabled");
    }

    #[test]
    fn test_reconnection_failure_is_distinct_event() {
        let initial = SessionError::ConnectionFailed("refused".into()).as_event();
        let exhausted = SessionError::ReconnectionExhausted("refused".into()).as_event();
        assert_eq!(initial, Some(SessionEvent::ConnectionFailed("refused".into())));
        assert_eq!(
            exhausted,
            Some(SessionEvent::ReconnectionFailed("refused".into()))
        );
    }

    #[test]
    fn test_radio_disabled_announces_power_off() {
        assert_eq!(
            SessionError::RadioDisabled.as_event(),
            Some(SessionEvent::RadioStateChanged(RadioPowerState::PoweredOff))
        );
        assert_eq!(SessionError::ConnectionCancelled.as_event(), None);
    }
}
