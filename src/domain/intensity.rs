//! Intensity Classification
//!
//! Coarse three-level signal derived from the latest heart-rate sample,
//! consumed by the game layer to modulate prompts.

use crate::domain::bus::{SubscriptionHandle, TelemetryBus};
use crate::domain::models::{EventKind, SessionEvent};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub const MEDIUM_THRESHOLD_BPM: f64 = 90.0;
pub const HIGH_THRESHOLD_BPM: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intensity {
    Normal,
    Medium,
    High,
}

impl Intensity {
    /// `bpm > 120` is high, `90 < bpm <= 120` medium, anything else normal.
    pub fn from_bpm(bpm: f64) -> Self {
        if bpm > HIGH_THRESHOLD_BPM {
            Self::High
        } else if bpm > MEDIUM_THRESHOLD_BPM {
            Self::Medium
        } else {
            Self::Normal
        }
    }
}

/// Keeps the classification of the most recent heart-rate sample.
///
/// Unsubscribes from the bus when dropped.
pub struct IntensityMonitor {
    bus: TelemetryBus,
    handle: SubscriptionHandle,
    current: Arc<Mutex<Option<Intensity>>>,
}

impl IntensityMonitor {
    pub fn attach(bus: &TelemetryBus) -> Self {
        let current = Arc::new(Mutex::new(None));
        let latest = current.clone();
        let handle = bus.subscribe(EventKind::Sample, move |event| {
            if let SessionEvent::Sample(sample) = event {
                if let Some(bpm) = sample.heart_rate() {
                    let intensity = Intensity::from_bpm(bpm);
                    let previous = latest.lock().replace(intensity);
                    if previous != Some(intensity) {
                        debug!("Intensity now {:?} ({} bpm)", intensity, bpm);
                    }
                }
            }
            Ok(())
        });

        Self {
            bus: bus.clone(),
            handle,
            current,
        }
    }

    pub fn current(&self) -> Option<Intensity> {
        *self.current.lock()
    }
}

impl Drop for IntensityMonitor {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{SampleReading, TelemetrySample, Vector3};

    #[test]
    fn test_classification_thresholds() {
        assert_eq!(Intensity::from_bpm(150.0), Intensity::High);
        assert_eq!(Intensity::from_bpm(100.0), Intensity::Medium);
        assert_eq!(Intensity::from_bpm(60.0), Intensity::Normal);
        assert_eq!(Intensity::from_bpm(120.0), Intensity::Medium);
        assert_eq!(Intensity::from_bpm(121.0), Intensity::High);
        assert_eq!(Intensity::from_bpm(90.0), Intensity::Normal);
        assert_eq!(Intensity::from_bpm(90.5), Intensity::Medium);
    }

    #[test]
    fn test_classification_is_idempotent() {
        let first = Intensity::from_bpm(118.0);
        assert_eq!(Intensity::from_bpm(118.0), first);
    }

    #[tokio::test]
    async fn test_monitor_tracks_latest_heart_rate() {
        let bus = TelemetryBus::default();
        let monitor = IntensityMonitor::attach(&bus);
        assert_eq!(monitor.current(), None);

        bus.publish(SessionEvent::Sample(TelemetrySample::stamp_now(
            SampleReading::HeartRate { bpm: 130.0 },
        )));
        bus.publish(SessionEvent::Sample(TelemetrySample::stamp_now(
            SampleReading::Motion(Vector3::new(0.0, 0.0, 1.0)),
        )));
        bus.publish(SessionEvent::Sample(TelemetrySample::stamp_now(
            SampleReading::HeartRate { bpm: 95.0 },
        )));
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(monitor.current(), Some(Intensity::Medium));

        drop(monitor);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
