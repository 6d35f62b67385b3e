use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a physical wearable, as reported by the radio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralId(pub String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Platform-specific handle used by the radio to reach a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioAddress {
    /// 6-byte Bluetooth MAC address
    Mac([u8; 6]),
    /// Opaque platform handle (e.g. a paired-device UUID string)
    Platform(String),
}

impl fmt::Display for RadioAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mac(bytes) => {
                let parts: Vec<String> = bytes.iter().map(|b| format!("{:02X}", b)).collect();
                f.write_str(&parts.join(":"))
            }
            Self::Platform(handle) => f.write_str(handle),
        }
    }
}

/// A wearable discovered by a scan. Never mutated after discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peripheral {
    pub id: PeripheralId,
    pub display_name: String,
    pub radio_address: RadioAddress,
}

impl Peripheral {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        radio_address: RadioAddress,
    ) -> Self {
        Self {
            id: PeripheralId::new(id),
            display_name: display_name.into(),
            radio_address,
        }
    }
}

/// Telemetry channel kinds exposed by the wearable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChannelKind {
    HeartRate,
    Motion,
    Gyroscope,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [Self::HeartRate, Self::Motion, Self::Gyroscope];
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HeartRate => "heart rate",
            Self::Motion => "motion",
            Self::Gyroscope => "gyroscope",
        };
        f.write_str(name)
    }
}

/// Three-axis reading (accelerometer in g, gyroscope in deg/s)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A decoded reading as pushed by the radio, before the session stamps it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleReading {
    HeartRate { bpm: f64 },
    Motion(Vector3),
    Gyroscope(Vector3),
}

impl SampleReading {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::HeartRate { .. } => ChannelKind::HeartRate,
            Self::Motion(_) => ChannelKind::Motion,
            Self::Gyroscope(_) => ChannelKind::Gyroscope,
        }
    }

    /// Readings with NaN/infinite components (or a negative pulse) are rejected.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::HeartRate { bpm } => bpm.is_finite() && *bpm >= 0.0,
            Self::Motion(v) | Self::Gyroscope(v) => v.is_finite(),
        }
    }
}

/// A reading stamped with the local receipt time.
///
/// Hardware clocks are not assumed to be synchronized with the host, so the
/// timestamp is always assigned by the session when the sample arrives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub reading: SampleReading,
    pub captured_at: DateTime<Utc>,
}

impl TelemetrySample {
    pub fn new(reading: SampleReading, captured_at: DateTime<Utc>) -> Self {
        Self {
            reading,
            captured_at,
        }
    }

    pub fn stamp_now(reading: SampleReading) -> Self {
        Self::new(reading, Utc::now())
    }

    pub fn kind(&self) -> ChannelKind {
        self.reading.kind()
    }

    pub fn heart_rate(&self) -> Option<f64> {
        match self.reading {
            SampleReading::HeartRate { bpm } => Some(bpm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioPowerState {
    PoweredOn,
    PoweredOff,
}

/// Lifecycle state of the single logical connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Uninitialized,
    CheckingCompatibility,
    Incompatible,
    Ready,
    Scanning,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Failed(String),
}

impl ConnectionState {
    /// States holding (or trying to hold) a radio link
    pub fn has_link_activity(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// States a powered-off radio forces into `Failed`.
    pub fn fails_on_power_loss(&self) -> bool {
        !matches!(
            self,
            Self::Uninitialized | Self::Incompatible | Self::Failed(_)
        )
    }

    pub fn accepts_scan(&self) -> bool {
        matches!(self, Self::Ready | Self::Disconnected | Self::Failed(_))
    }

    pub fn accepts_connect(&self) -> bool {
        matches!(
            self,
            Self::Ready
                | Self::Disconnected
                | Self::Failed(_)
                | Self::Connecting
                | Self::Connected
                | Self::Reconnecting
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        if let Failed(reason) = next {
            return !reason.is_empty() && self.fails_on_power_loss();
        }
        match (self, next) {
            (Uninitialized | Incompatible, CheckingCompatibility) => true,
            (CheckingCompatibility, Ready | Incompatible) => true,
            (Ready | Disconnected | Failed(_), Scanning) => true,
            (Scanning, Ready) => true,
            (s, Connecting) => s.accepts_connect(),
            (Connecting | Reconnecting, Connected) => true,
            (Connected, Reconnecting) => true,
            (Connecting | Connected | Reconnecting, Disconnected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => f.write_str("uninitialized"),
            Self::CheckingCompatibility => f.write_str("checking compatibility"),
            Self::Incompatible => f.write_str("incompatible"),
            Self::Ready => f.write_str("ready"),
            Self::Scanning => f.write_str("scanning"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting => f.write_str("reconnecting"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Outcome of the one-shot compatibility check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompatibilityResult {
    Compatible {
        capabilities: Vec<ChannelKind>,
        initial_devices: Vec<Peripheral>,
    },
    Incompatible {
        reason: String,
    },
}

impl CompatibilityResult {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Self::Compatible { .. })
    }
}

/// Events published on the telemetry bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    Connected(Peripheral),
    Disconnected,
    ConnectionFailed(String),
    ReconnectionFailed(String),
    Sample(TelemetrySample),
    RadioStateChanged(RadioPowerState),
    CompatibilityFailed(String),
    StateChanged(ConnectionState),
    Reconnecting { peripheral: Peripheral, attempt: u32 },
    ScanCompleted(Vec<Peripheral>),
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected(_) => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::ConnectionFailed(_) => EventKind::ConnectionFailed,
            Self::ReconnectionFailed(_) => EventKind::ReconnectionFailed,
            Self::Sample(_) => EventKind::Sample,
            Self::RadioStateChanged(_) => EventKind::RadioStateChanged,
            Self::CompatibilityFailed(_) => EventKind::CompatibilityFailed,
            Self::StateChanged(_) => EventKind::StateChanged,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::ScanCompleted(_) => EventKind::ScanCompleted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Connected,
    Disconnected,
    ConnectionFailed,
    ReconnectionFailed,
    Sample,
    RadioStateChanged,
    CompatibilityFailed,
    StateChanged,
    Reconnecting,
    ScanCompleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_radio_address_display() {
        let addr = RadioAddress::Mac([0xAA, 0xBB, 0x0C, 0x01, 0x02, 0xFF]);
        assert_eq!(addr.to_string(), "AA:BB:0C:01:02:FF");
    }

    #[test]
    fn test_invalid_readings_rejected() {
        assert!(SampleReading::HeartRate { bpm: 72.0 }.is_valid());
        assert!(!SampleReading::HeartRate { bpm: f64::NAN }.is_valid());
        assert!(!SampleReading::HeartRate { bpm: -1.0 }.is_valid());
        assert!(!SampleReading::Motion(Vector3::new(0.0, f64::INFINITY, 0.0)).is_valid());
    }

    #[test]
    fn test_failed_reachable_from_every_live_state() {
        let failed = ConnectionState::Failed("radio disabled".into());
        for state in [
            ConnectionState::CheckingCompatibility,
            ConnectionState::Ready,
            ConnectionState::Scanning,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Disconnected,
        ] {
            assert!(state.can_transition_to(&failed), "{state} -> failed");
        }
        assert!(!ConnectionState::Connected.can_transition_to(&ConnectionState::Failed(String::new())));
    }

    #[test]
    fn test_user_disconnect_never_reconnects() {
        assert!(ConnectionState::Connected.can_transition_to(&ConnectionState::Disconnected));
        assert!(!ConnectionState::Disconnected.can_transition_to(&ConnectionState::Reconnecting));
        assert!(!ConnectionState::Ready.can_transition_to(&ConnectionState::Connected));
    }
}
