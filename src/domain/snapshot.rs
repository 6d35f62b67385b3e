//! Sensor Snapshot
//!
//! Latest committed sample per telemetry channel. No history is kept.

use crate::domain::models::{ChannelKind, TelemetrySample, Vector3};
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SensorSnapshot {
    latest: RwLock<HashMap<ChannelKind, TelemetrySample>>,
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the entry for the sample's channel.
    pub fn record_sample(&self, sample: TelemetrySample) {
        self.latest.write().insert(sample.kind(), sample);
    }

    pub fn clear(&self) {
        self.latest.write().clear();
    }

    pub fn get(&self, kind: ChannelKind) -> Option<TelemetrySample> {
        self.latest.read().get(&kind).copied()
    }

    pub fn heart_rate(&self) -> Option<f64> {
        self.get(ChannelKind::HeartRate)
            .and_then(|sample| sample.heart_rate())
    }

    pub fn motion(&self) -> Option<Vector3> {
        match self.get(ChannelKind::Motion)?.reading {
            crate::domain::models::SampleReading::Motion(v) => Some(v),
            _ => None,
        }
    }

    pub fn gyroscope(&self) -> Option<Vector3> {
        match self.get(ChannelKind::Gyroscope)?.reading {
            crate::domain::models::SampleReading::Gyroscope(v) => Some(v),
            _ => None,
        }
    }

    /// Copy of every channel's latest sample
    pub fn entries(&self) -> HashMap<ChannelKind, TelemetrySample> {
        self.latest.read().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.read().is_empty()
    }
}
