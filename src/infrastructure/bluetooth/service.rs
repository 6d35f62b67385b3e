//! Session Service Module
//!
//! Main service that owns the single logical wearable connection: the
//! compatibility gate, scanning into the registry, the connection state
//! machine, automatic reconnection, and fan-out of samples and lifecycle
//! events on the telemetry bus.

use crate::domain::bus::{SubscriptionHandle, TelemetryBus};
use crate::domain::error::SessionError;
use crate::domain::models::{
    ChannelKind, CompatibilityResult, ConnectionState, EventKind, Peripheral, PeripheralId,
    RadioPowerState, SampleReading, SessionEvent, TelemetrySample,
};
use crate::domain::snapshot::SensorSnapshot;
use crate::infrastructure::bluetooth::{
    compatibility::CompatibilityGate,
    connection::{open_link, superseded, LinkOutcome, SessionConfig},
    radio::{RadioError, RadioEvent, RadioPrimitive},
    registry::DeviceRegistry,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

struct SharedState {
    state: ConnectionState,
    /// Peripheral the current link work is aimed at
    target: Option<Peripheral>,
    /// Bumped by every operation that supersedes in-flight link work
    epoch: u64,
    /// Epoch whose link dropped before the open was committed
    lost_during_open: Option<u64>,
}

/// Result of committing an opened link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Commit {
    Connected,
    Stale,
    /// The radio reported the link lost while it was still being opened
    LostDuringOpen,
}

struct SessionInner {
    radio: Arc<dyn RadioPrimitive>,
    config: SessionConfig,
    shared: Mutex<SharedState>,
    registry: DeviceRegistry,
    snapshot: SensorSnapshot,
    bus: TelemetryBus,
    last_error: Mutex<Option<SessionError>>,
    capabilities: Mutex<Vec<ChannelKind>>,
    cancel_tx: watch::Sender<u64>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

/// Main session service coordinating all wearable radio operations.
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(radio: Arc<dyn RadioPrimitive>, config: SessionConfig) -> Self {
        let (cancel_tx, _) = watch::channel(0);
        let bus = TelemetryBus::new(config.subscriber_queue_capacity);
        Self {
            inner: Arc::new(SessionInner {
                radio,
                config,
                shared: Mutex::new(SharedState {
                    state: ConnectionState::Uninitialized,
                    target: None,
                    epoch: 0,
                    lost_during_open: None,
                }),
                registry: DeviceRegistry::new(),
                snapshot: SensorSnapshot::new(),
                bus,
                last_error: Mutex::new(None),
                capabilities: Mutex::new(Vec::new()),
                cancel_tx,
                pump: Mutex::new(None),
            }),
        }
    }

    // ----- read accessors -----

    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state.clone()
    }

    pub fn devices(&self) -> Vec<Peripheral> {
        self.inner.registry.devices()
    }

    pub fn selected_peripheral(&self) -> Option<Peripheral> {
        self.inner.registry.selected()
    }

    pub fn snapshot(&self) -> &SensorSnapshot {
        &self.inner.snapshot
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.last_error.lock().clone()
    }

    pub fn clear_error(&self) {
        self.inner.last_error.lock().take();
    }

    pub fn capabilities(&self) -> Vec<ChannelKind> {
        self.inner.capabilities.lock().clone()
    }

    pub fn bus(&self) -> &TelemetryBus {
        &self.inner.bus
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionHandle
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(kind, handler)
    }

    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.subscribe_all(handler)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.inner.bus.unsubscribe(handle)
    }

    // ----- lifecycle -----

    /// Run the compatibility gate.
    ///
    /// Allowed once from `Uninitialized`, and again from `Incompatible` as an
    /// explicit re-check. Partial support comes back as
    /// `CompatibilityResult::Incompatible`, not as an error.
    pub async fn initialize(&self) -> Result<CompatibilityResult, SessionError> {
        {
            let mut shared = self.inner.shared.lock();
            if !matches!(
                shared.state,
                ConnectionState::Uninitialized | ConnectionState::Incompatible
            ) {
                return Err(SessionError::InvalidState {
                    operation: "initialize",
                    state: shared.state.clone(),
                });
            }
            self.inner
                .set_state(&mut shared, ConnectionState::CheckingCompatibility);
        }
        self.inner.publish_state(ConnectionState::CheckingCompatibility);
        self.ensure_event_pump();

        let gate = CompatibilityGate::new(self.inner.config.required_channels.clone());
        let outcome = gate.check(self.inner.radio.as_ref()).await;

        let next = match &outcome {
            Ok(CompatibilityResult::Compatible {
                capabilities,
                initial_devices,
            }) => {
                *self.inner.capabilities.lock() = capabilities.clone();
                self.inner.registry.replace(initial_devices.clone());
                ConnectionState::Ready
            }
            Ok(CompatibilityResult::Incompatible { .. }) | Err(_) => ConnectionState::Incompatible,
        };

        {
            let mut shared = self.inner.shared.lock();
            // Power loss during the check already moved the session on.
            if shared.state != ConnectionState::CheckingCompatibility {
                return Err(self
                    .last_error()
                    .unwrap_or(SessionError::RadioDisabled));
            }
            self.inner.set_state(&mut shared, next.clone());
        }

        let error = match &outcome {
            Ok(CompatibilityResult::Incompatible { reason }) => {
                Some(SessionError::Incompatible(reason.clone()))
            }
            Err(e) => Some(e.clone()),
            Ok(_) => None,
        };
        self.inner.publish_state(next);
        if let Some(error) = error {
            self.inner.record_error(&error);
        }
        outcome
    }

    /// Discover nearby wearables and replace the registry contents.
    ///
    /// An empty list is a normal outcome ("no devices").
    pub async fn scan(&self) -> Result<Vec<Peripheral>, SessionError> {
        let epoch = {
            let mut shared = self.inner.shared.lock();
            self.inner.guard_operation(&shared.state, "scan")?;
            if !shared.state.accepts_scan() {
                return Err(SessionError::InvalidState {
                    operation: "scan",
                    state: shared.state.clone(),
                });
            }
            self.inner.set_state(&mut shared, ConnectionState::Scanning);
            shared.epoch
        };
        self.inner.publish_state(ConnectionState::Scanning);

        info!("Scanning for wearables...");
        let result = self.inner.radio.scan(self.inner.config.scan_duration).await;

        match result {
            Ok(found) => {
                if !self.inner.finish_scan(epoch) {
                    return Err(self
                        .last_error()
                        .unwrap_or(SessionError::RadioDisabled));
                }
                let devices = self.inner.registry.replace(found);
                if devices.is_empty() {
                    info!("Scan finished: no devices found");
                } else {
                    info!("Scan finished: {} device(s)", devices.len());
                }
                self.inner.publish_state(ConnectionState::Ready);
                self.inner
                    .bus
                    .publish(SessionEvent::ScanCompleted(devices.clone()));
                Ok(devices)
            }
            Err(RadioError::PoweredOff) => {
                self.inner.fail(Some(epoch), SessionError::RadioDisabled);
                Err(SessionError::RadioDisabled)
            }
            Err(e) => {
                warn!("Scan failed: {}", e);
                if self.inner.finish_scan(epoch) {
                    self.inner.publish_state(ConnectionState::Ready);
                }
                Err(SessionError::ScanFailed(e.to_string()))
            }
        }
    }

    /// Open a link to a peripheral from the current registry.
    ///
    /// Any existing link to a different peripheral is torn down first.
    pub async fn connect(&self, id: &PeripheralId) -> Result<(), SessionError> {
        let (peripheral, epoch, previous_link) = {
            let mut shared = self.inner.shared.lock();
            self.inner.guard_operation(&shared.state, "connect")?;
            if !shared.state.accepts_connect() {
                return Err(SessionError::InvalidState {
                    operation: "connect",
                    state: shared.state.clone(),
                });
            }
            let peripheral = self
                .inner
                .registry
                .get(id)
                .ok_or_else(|| SessionError::UnknownDevice(id.clone()))?;
            if shared.state == ConnectionState::Connected
                && shared.target.as_ref().map(|p| &p.id) == Some(id)
            {
                debug!("Already connected to {}", id);
                return Ok(());
            }

            // Any link in progress goes down together with the move to Connecting.
            let previous_link = if shared.state.has_link_activity() {
                shared.target.take()
            } else {
                None
            };
            let epoch = self.inner.bump_epoch(&mut shared);
            shared.target = Some(peripheral.clone());
            self.inner.registry.deselect();
            self.inner.snapshot.clear();
            self.inner.set_state(&mut shared, ConnectionState::Connecting);
            (peripheral, epoch, previous_link)
        };
        self.inner.publish_state(ConnectionState::Connecting);

        if let Some(previous) = previous_link {
            info!("Tearing down link to {} before switching peripheral", previous.id);
            if let Err(e) = self.inner.radio.disconnect().await {
                warn!("Radio disconnect reported: {}", e);
            }
        }
        info!(
            "Connecting to {} ({})",
            peripheral.display_name, peripheral.radio_address
        );

        let outcome = open_link(
            self.inner.radio.as_ref(),
            &peripheral.id,
            self.inner.config.connect_timeout,
            epoch,
            self.inner.cancel_tx.subscribe(),
        )
        .await;

        match outcome {
            LinkOutcome::Opened => {
                match self
                    .inner
                    .commit_connected(epoch, &peripheral, ConnectionState::Connecting)
                {
                    Commit::Connected => Ok(()),
                    Commit::Stale => Err(self.inner.superseded_error(epoch)),
                    Commit::LostDuringOpen => {
                        warn!("Link to {} dropped while connecting", peripheral.id);
                        self.inner.fail_attempt(
                            epoch,
                            SessionError::ConnectionFailed("link lost while connecting".into()),
                        )
                    }
                }
            }
            LinkOutcome::Superseded => Err(self.inner.superseded_error(epoch)),
            LinkOutcome::TimedOut => {
                warn!("Connection to {} timed out", peripheral.id);
                self.inner
                    .fail_attempt(epoch, SessionError::ConnectionTimeout)
            }
            LinkOutcome::Failed(RadioError::PoweredOff) => {
                self.inner.fail_attempt(epoch, SessionError::RadioDisabled)
            }
            LinkOutcome::Failed(e) => {
                warn!("Connection to {} failed: {}", peripheral.id, e);
                self.inner
                    .fail_attempt(epoch, SessionError::ConnectionFailed(e.to_string()))
            }
        }
    }

    /// Connect to the first peripheral of the last scan.
    pub async fn connect_first_available(&self) -> Result<Peripheral, SessionError> {
        let peripheral = self
            .inner
            .registry
            .first()
            .ok_or(SessionError::NoDevicesFound)?;
        self.connect(&peripheral.id).await?;
        Ok(peripheral)
    }

    /// Close the link on the caller's request. Never retried.
    ///
    /// Idempotent; cancels a pending connect and suppresses reconnection.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        {
            let mut shared = self.inner.shared.lock();
            if !shared.state.has_link_activity() {
                debug!("Disconnect ignored while {}", shared.state);
                return Ok(());
            }
            self.inner.bump_epoch(&mut shared);
            shared.target = None;
            self.inner.registry.deselect();
            self.inner.snapshot.clear();
            self.inner.set_state(&mut shared, ConnectionState::Disconnected);
        }

        if let Err(e) = self.inner.radio.disconnect().await {
            warn!("Radio disconnect reported: {}", e);
        }
        info!("Disconnected from wearable");
        self.inner.publish_state(ConnectionState::Disconnected);
        self.inner.bus.publish(SessionEvent::Disconnected);
        Ok(())
    }

    /// Forget discovered peripherals. Rejected while a link is active.
    pub fn clear_devices(&self) -> Result<(), SessionError> {
        let shared = self.inner.shared.lock();
        if shared.state.has_link_activity() || shared.state == ConnectionState::Scanning {
            return Err(SessionError::InvalidState {
                operation: "clear devices",
                state: shared.state.clone(),
            });
        }
        self.inner.registry.clear();
        Ok(())
    }

    fn ensure_event_pump(&self) {
        let mut pump = self.inner.pump.lock();
        if pump.is_some() {
            return;
        }
        let events = self.inner.radio.events();
        let weak = Arc::downgrade(&self.inner);
        *pump = Some(tokio::spawn(run_event_pump(weak, events)));
    }
}

impl SessionInner {
    fn set_state(&self, shared: &mut SharedState, next: ConnectionState) {
        if !shared.state.can_transition_to(&next) {
            warn!("Unexpected transition {} -> {}", shared.state, next);
        }
        debug!("State {} -> {}", shared.state, next);
        shared.state = next;
    }

    fn bump_epoch(&self, shared: &mut SharedState) -> u64 {
        shared.epoch += 1;
        // Published under the lock so no task can observe a stale epoch.
        self.cancel_tx.send_replace(shared.epoch);
        shared.epoch
    }

    fn publish_state(&self, state: ConnectionState) {
        self.bus.publish(SessionEvent::StateChanged(state));
    }

    fn record_error(&self, error: &SessionError) {
        *self.last_error.lock() = Some(error.clone());
        if let Some(event) = error.as_event() {
            self.bus.publish(event);
        }
    }

    /// Fail fast for states that never reach the radio.
    fn guard_operation(
        &self,
        state: &ConnectionState,
        operation: &'static str,
    ) -> Result<(), SessionError> {
        match state {
            ConnectionState::Incompatible => Err(self
                .last_error
                .lock()
                .clone()
                .filter(|e| {
                    matches!(
                        e,
                        SessionError::Incompatible(_) | SessionError::PlatformUnsupported
                    )
                })
                .unwrap_or_else(|| SessionError::Incompatible("hardware incompatible".into()))),
            ConnectionState::Uninitialized | ConnectionState::CheckingCompatibility => {
                Err(SessionError::InvalidState {
                    operation,
                    state: state.clone(),
                })
            }
            _ => Ok(()),
        }
    }

    fn finish_scan(&self, epoch: u64) -> bool {
        let mut shared = self.shared.lock();
        if shared.epoch != epoch || shared.state != ConnectionState::Scanning {
            return false;
        }
        self.set_state(&mut shared, ConnectionState::Ready);
        true
    }

    /// Move to `Connected` if `epoch` is still current, the state is `from`
    /// and the link did not drop while it was being opened.
    fn commit_connected(
        &self,
        epoch: u64,
        peripheral: &Peripheral,
        from: ConnectionState,
    ) -> Commit {
        {
            let mut shared = self.shared.lock();
            if shared.epoch != epoch || shared.state != from {
                return Commit::Stale;
            }
            if shared.lost_during_open.take() == Some(epoch) {
                return Commit::LostDuringOpen;
            }
            if let Err(e) = self.registry.select(&peripheral.id) {
                // Registry was cleared under us; stay connected without a selection.
                warn!("Selected peripheral vanished: {}", e);
            }
            if from == ConnectionState::Connecting {
                self.snapshot.clear();
            }
            self.set_state(&mut shared, ConnectionState::Connected);
        }
        info!("Connected to {}", peripheral.display_name);
        self.publish_state(ConnectionState::Connected);
        self.bus.publish(SessionEvent::Connected(peripheral.clone()));
        Commit::Connected
    }

    fn fail_attempt(&self, epoch: u64, error: SessionError) -> Result<(), SessionError> {
        if self.fail(Some(epoch), error.clone()) {
            Err(error)
        } else {
            Err(self.superseded_error(epoch))
        }
    }

    /// Error for link work at `epoch` that newer work took over.
    ///
    /// A session failure (power loss) that directly superseded the attempt
    /// is reported as that failure; a newer user operation as a cancellation.
    fn superseded_error(&self, epoch: u64) -> SessionError {
        let failed_here = {
            let shared = self.shared.lock();
            matches!(shared.state, ConnectionState::Failed(_)) && shared.epoch == epoch + 1
        };
        if failed_here {
            if let Some(error) = self.last_error.lock().clone() {
                return error;
            }
        }
        SessionError::ConnectionCancelled
    }

    /// Enter `Failed`, record and announce `error`.
    ///
    /// With `Some(epoch)`, does nothing if newer work already superseded it.
    fn fail(&self, epoch: Option<u64>, error: SessionError) -> bool {
        let reason = error.failure_reason();
        {
            let mut shared = self.shared.lock();
            if epoch.is_some_and(|e| e != shared.epoch) {
                return false;
            }
            if !shared.state.fails_on_power_loss() {
                return false;
            }
            self.bump_epoch(&mut shared);
            shared.target = None;
            self.registry.deselect();
            self.snapshot.clear();
            self.set_state(&mut shared, ConnectionState::Failed(reason.clone()));
            // Stored with the state so superseded work reads the cause.
            *self.last_error.lock() = Some(error.clone());
        }
        warn!("Session failed: {}", reason);
        self.publish_state(ConnectionState::Failed(reason));
        if let Some(event) = error.as_event() {
            self.bus.publish(event);
        }
        true
    }

    fn handle_sample(&self, reading: SampleReading) {
        if !reading.is_valid() {
            warn!("Discarding invalid {} reading", reading.kind());
            return;
        }
        let sample = {
            let shared = self.shared.lock();
            if shared.state != ConnectionState::Connected {
                debug!("Ignoring {} sample while {}", reading.kind(), shared.state);
                return;
            }
            let sample = TelemetrySample::stamp_now(reading);
            self.snapshot.record_sample(sample);
            sample
        };
        self.bus.publish(SessionEvent::Sample(sample));
    }

    fn handle_power(&self, power: RadioPowerState) {
        info!("Radio power state: {:?}", power);
        // A failure announces the power change itself.
        let failed =
            power == RadioPowerState::PoweredOff && self.fail(None, SessionError::RadioDisabled);
        if !failed {
            self.bus.publish(SessionEvent::RadioStateChanged(power));
        }
    }

    /// Forget a drop reported before this open attempt started.
    fn begin_open(&self, epoch: u64) {
        let mut shared = self.shared.lock();
        if shared.epoch == epoch {
            shared.lost_during_open = None;
        }
    }

    /// Returns the peripheral and epoch to reconnect with, if the drop was unexpected.
    fn begin_reconnect(&self, lost: &PeripheralId) -> Option<(Peripheral, u64)> {
        let (peripheral, epoch) = {
            let mut shared = self.shared.lock();
            let targeted = shared.target.as_ref().is_some_and(|p| &p.id == lost);
            if matches!(
                shared.state,
                ConnectionState::Connecting | ConnectionState::Reconnecting
            ) && targeted
            {
                // The open may still report success; remember the drop for the commit.
                shared.lost_during_open = Some(shared.epoch);
                return None;
            }
            if shared.state != ConnectionState::Connected {
                return None;
            }
            let peripheral = shared.target.clone().filter(|p| &p.id == lost)?;
            let epoch = self.bump_epoch(&mut shared);
            self.registry.deselect();
            self.set_state(&mut shared, ConnectionState::Reconnecting);
            (peripheral, epoch)
        };
        warn!("Link to {} lost unexpectedly, reconnecting", peripheral.id);
        self.publish_state(ConnectionState::Reconnecting);
        Some((peripheral, epoch))
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

async fn run_event_pump(session: Weak<SessionInner>, mut events: broadcast::Receiver<RadioEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Radio event stream lagged, skipped {} event(s)", skipped);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Radio event stream closed");
                break;
            }
        };
        let Some(inner) = session.upgrade() else {
            break;
        };
        match event {
            RadioEvent::Sample(reading) => inner.handle_sample(reading),
            RadioEvent::PowerChanged(power) => inner.handle_power(power),
            RadioEvent::LinkLost(id) => {
                if let Some((peripheral, epoch)) = inner.begin_reconnect(&id) {
                    tokio::spawn(run_reconnect(inner.clone(), peripheral, epoch));
                } else {
                    debug!("Link loss for {} needs no recovery", id);
                }
            }
        }
    }
}

async fn run_reconnect(inner: Arc<SessionInner>, peripheral: Peripheral, epoch: u64) {
    let policy = inner.config.reconnect.clone();
    let mut last_reason = String::from("link lost");

    for attempt in 1..=policy.max_attempts {
        inner.bus.publish(SessionEvent::Reconnecting {
            peripheral: peripheral.clone(),
            attempt,
        });
        let delay = policy.delay_for(attempt);
        info!(
            "Reconnection attempt {}/{} to {} in {:?}",
            attempt, policy.max_attempts, peripheral.id, delay
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = superseded(inner.cancel_tx.subscribe(), epoch) => {
                debug!("Reconnection to {} suppressed", peripheral.id);
                return;
            }
        }

        inner.begin_open(epoch);
        let outcome = open_link(
            inner.radio.as_ref(),
            &peripheral.id,
            policy.attempt_timeout,
            epoch,
            inner.cancel_tx.subscribe(),
        )
        .await;

        match outcome {
            LinkOutcome::Opened => {
                match inner.commit_connected(epoch, &peripheral, ConnectionState::Reconnecting) {
                    Commit::Connected | Commit::Stale => return,
                    Commit::LostDuringOpen => {
                        warn!("Reconnection attempt {} dropped while opening", attempt);
                        last_reason = "link lost while reopening".to_string();
                    }
                }
            }
            LinkOutcome::Superseded => return,
            LinkOutcome::Failed(RadioError::PoweredOff) => {
                inner.fail(Some(epoch), SessionError::RadioDisabled);
                return;
            }
            LinkOutcome::Failed(e) => {
                warn!("Reconnection attempt {} failed: {}", attempt, e);
                last_reason = e.to_string();
            }
            LinkOutcome::TimedOut => {
                warn!("Reconnection attempt {} timed out", attempt);
                last_reason = "attempt timed out".to_string();
            }
        }
    }

    inner.fail(Some(epoch), SessionError::ReconnectionExhausted(last_reason));
}

/// Latest value of every channel, keyed for display.
pub fn describe_snapshot(snapshot: &SensorSnapshot) -> HashMap<ChannelKind, String> {
    snapshot
        .entries()
        .into_iter()
        .map(|(kind, sample)| {
            let text = match sample.reading {
                SampleReading::HeartRate { bpm } => format!("{:.0} bpm", bpm),
                SampleReading::Motion(v) | SampleReading::Gyroscope(v) => {
                    format!("({:.2}, {:.2}, {:.2})", v.x, v.y, v.z)
                }
            };
            (kind, text)
        })
        .collect()
}
