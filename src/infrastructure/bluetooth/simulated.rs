//! In-process radio simulator
//!
//! Scriptable `RadioPrimitive` used by tests and the demo binary: connect
//! outcomes can be queued per call, and link drops, power changes and
//! samples can be injected at any time.

use crate::domain::models::{Peripheral, PeripheralId, RadioPowerState, SampleReading};
use crate::infrastructure::bluetooth::radio::{RadioError, RadioEvent, RadioPrimitive, RadioSupport};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// How the next `connect` call resolves
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectBehavior {
    Succeed,
    Fail(String),
    /// Never resolves; exercises timeouts and cancellation
    Hang,
    /// Reports the link lost, then acknowledges the open anyway
    DropDuringOpen,
}

pub struct SimulatedRadio {
    support: Mutex<Result<RadioSupport, RadioError>>,
    advertised: Mutex<Vec<Peripheral>>,
    connect_plan: Mutex<VecDeque<ConnectBehavior>>,
    default_behavior: Mutex<ConnectBehavior>,
    latency: Mutex<Duration>,
    powered: AtomicBool,
    link: Mutex<Option<PeripheralId>>,
    events_tx: broadcast::Sender<RadioEvent>,
    compatibility_calls: AtomicUsize,
    scan_calls: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl SimulatedRadio {
    pub fn new(support: RadioSupport) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(256);
        Arc::new(Self {
            support: Mutex::new(Ok(support)),
            advertised: Mutex::new(Vec::new()),
            connect_plan: Mutex::new(VecDeque::new()),
            default_behavior: Mutex::new(ConnectBehavior::Succeed),
            latency: Mutex::new(Duration::ZERO),
            powered: AtomicBool::new(true),
            link: Mutex::new(None),
            events_tx,
            compatibility_calls: AtomicUsize::new(0),
            scan_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_support(&self, support: Result<RadioSupport, RadioError>) {
        *self.support.lock() = support;
    }

    /// Peripherals returned by every following scan, in advertisement order.
    pub fn advertise(&self, devices: Vec<Peripheral>) {
        *self.advertised.lock() = devices;
    }

    pub fn queue_connect(&self, behavior: ConnectBehavior) {
        self.connect_plan.lock().push_back(behavior);
    }

    pub fn set_default_connect(&self, behavior: ConnectBehavior) {
        *self.default_behavior.lock() = behavior;
    }

    /// Simulated link-layer latency applied to scans and successful connects.
    /// Uses tokio time, so paused clocks advance instantly in tests.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn emit_sample(&self, reading: SampleReading) {
        let _ = self.events_tx.send(RadioEvent::Sample(reading));
    }

    /// Drop the open link as if the wearable walked out of range.
    pub fn drop_link(&self) {
        if let Some(id) = self.link.lock().take() {
            debug!("Simulated link to {} lost", id);
            let _ = self.events_tx.send(RadioEvent::LinkLost(id));
        }
    }

    pub fn set_powered(&self, powered: bool) {
        self.powered.store(powered, Ordering::SeqCst);
        let state = if powered {
            RadioPowerState::PoweredOn
        } else {
            self.link.lock().take();
            RadioPowerState::PoweredOff
        };
        let _ = self.events_tx.send(RadioEvent::PowerChanged(state));
    }

    pub fn linked_peripheral(&self) -> Option<PeripheralId> {
        self.link.lock().clone()
    }

    pub fn compatibility_calls(&self) -> usize {
        self.compatibility_calls.load(Ordering::SeqCst)
    }

    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn ensure_powered(&self) -> Result<(), RadioError> {
        if self.powered.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RadioError::PoweredOff)
        }
    }

    fn next_behavior(&self) -> ConnectBehavior {
        self.connect_plan
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_behavior.lock().clone())
    }
}

#[async_trait]
impl RadioPrimitive for SimulatedRadio {
    async fn check_compatibility(&self) -> Result<RadioSupport, RadioError> {
        self.compatibility_calls.fetch_add(1, Ordering::SeqCst);
        self.support.lock().clone()
    }

    async fn scan(&self, duration: Duration) -> Result<Vec<Peripheral>, RadioError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_powered()?;
        let latency = (*self.latency.lock()).min(duration);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(self.advertised.lock().clone())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<(), RadioError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_powered()?;
        match self.next_behavior() {
            ConnectBehavior::Succeed => {
                let latency = *self.latency.lock();
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                *self.link.lock() = Some(id.clone());
                Ok(())
            }
            ConnectBehavior::Fail(reason) => Err(RadioError::ConnectionError(reason)),
            ConnectBehavior::Hang => std::future::pending().await,
            ConnectBehavior::DropDuringOpen => {
                debug!("Simulated link to {} lost during open", id);
                let _ = self.events_tx.send(RadioEvent::LinkLost(id.clone()));
                // Give event consumers a chance to see the drop first.
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(())
            }
        }
    }

    async fn disconnect(&self) -> Result<(), RadioError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.link.lock().take();
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<RadioEvent> {
        self.events_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RadioAddress;

    fn band(id: &str) -> Peripheral {
        Peripheral::new(id, format!("Band {}", id), RadioAddress::Platform(id.to_string()))
    }

    #[tokio::test]
    async fn test_connect_plan_then_default() {
        let radio = SimulatedRadio::new(RadioSupport::full(Vec::new()));
        radio.queue_connect(ConnectBehavior::Fail("busy".into()));

        let id = PeripheralId::from("a");
        assert_eq!(
            radio.connect(&id).await,
            Err(RadioError::ConnectionError("busy".into()))
        );
        assert_eq!(radio.connect(&id).await, Ok(()));
        assert_eq!(radio.linked_peripheral(), Some(id));
        assert_eq!(radio.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_drop_link_emits_event() {
        let radio = SimulatedRadio::new(RadioSupport::full(Vec::new()));
        let mut events = radio.events();
        radio.connect(&PeripheralId::from("a")).await.unwrap();

        radio.drop_link();
        assert_eq!(
            events.recv().await.unwrap(),
            RadioEvent::LinkLost(PeripheralId::from("a"))
        );
        // No link, nothing to drop
        radio.drop_link();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_during_open_reports_loss_before_ack() {
        let radio = SimulatedRadio::new(RadioSupport::full(Vec::new()));
        let mut events = radio.events();
        radio.queue_connect(ConnectBehavior::DropDuringOpen);

        assert_eq!(radio.connect(&PeripheralId::from("a")).await, Ok(()));
        assert_eq!(
            events.try_recv().unwrap(),
            RadioEvent::LinkLost(PeripheralId::from("a"))
        );
        assert_eq!(radio.linked_peripheral(), None);
    }

    #[tokio::test]
    async fn test_powered_off_radio_rejects_operations() {
        let radio = SimulatedRadio::new(RadioSupport::full(Vec::new()));
        radio.advertise(vec![band("a")]);
        radio.set_powered(false);
        assert_eq!(
            radio.scan(Duration::from_secs(1)).await,
            Err(RadioError::PoweredOff)
        );
        radio.set_powered(true);
        assert_eq!(radio.scan(Duration::from_secs(1)).await.unwrap().len(), 1);
    }
}
