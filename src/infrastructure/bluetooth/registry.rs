//! Device Registry
//!
//! Peripherals found by the most recent scan, plus the one currently
//! selected for the open link.

use crate::domain::error::SessionError;
use crate::domain::models::{Peripheral, PeripheralId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
struct RegistryState {
    discovered: Vec<Peripheral>,
    selected: Option<Peripheral>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a completed scan result.
    ///
    /// Duplicate ids collapse into one entry at the position of their first
    /// sighting, carrying the most recent display name.
    pub fn replace(&self, found: Vec<Peripheral>) -> Vec<Peripheral> {
        let mut deduped: Vec<Peripheral> = Vec::with_capacity(found.len());
        let mut index: HashMap<PeripheralId, usize> = HashMap::new();
        for peripheral in found {
            match index.get(&peripheral.id) {
                Some(&i) => deduped[i] = peripheral,
                None => {
                    index.insert(peripheral.id.clone(), deduped.len());
                    deduped.push(peripheral);
                }
            }
        }

        debug!("Registry now holds {} peripheral(s)", deduped.len());
        self.state.write().discovered = deduped.clone();
        deduped
    }

    pub fn devices(&self) -> Vec<Peripheral> {
        self.state.read().discovered.clone()
    }

    pub fn get(&self, id: &PeripheralId) -> Option<Peripheral> {
        self.state
            .read()
            .discovered
            .iter()
            .find(|p| &p.id == id)
            .cloned()
    }

    pub fn first(&self) -> Option<Peripheral> {
        self.state.read().discovered.first().cloned()
    }

    pub fn select(&self, id: &PeripheralId) -> Result<Peripheral, SessionError> {
        let mut state = self.state.write();
        let peripheral = state
            .discovered
            .iter()
            .find(|p| &p.id == id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownDevice(id.clone()))?;
        state.selected = Some(peripheral.clone());
        Ok(peripheral)
    }

    pub fn deselect(&self) {
        self.state.write().selected = None;
    }

    pub fn selected(&self) -> Option<Peripheral> {
        self.state.read().selected.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.write();
        state.discovered.clear();
        state.selected = None;
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().discovered.is_empty()
    }
}
