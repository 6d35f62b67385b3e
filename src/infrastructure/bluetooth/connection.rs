//! Link Connection Module
//!
//! Opening a link with a bounded wait, cancellation by newer session
//! operations, and the reconnection budget.

use crate::domain::models::{ChannelKind, PeripheralId};
use crate::domain::settings::{ReconnectSettings, SessionSettings};
use crate::infrastructure::bluetooth::radio::{RadioError, RadioPrimitive};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Bounded retry policy with exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_settings(&ReconnectSettings::default())
    }
}

impl ReconnectPolicy {
    pub fn from_settings(settings: &ReconnectSettings) -> Self {
        Self {
            // Zero would make the budget meaningless; always try at least once.
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            attempt_timeout: Duration::from_millis(settings.attempt_timeout_ms),
        }
    }

    /// Delay before `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Runtime configuration for the session manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub scan_duration: Duration,
    pub reconnect: ReconnectPolicy,
    pub required_channels: Vec<ChannelKind>,
    pub subscriber_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&SessionSettings::default())
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            scan_duration: Duration::from_millis(settings.scan_duration_ms),
            reconnect: ReconnectPolicy::from_settings(&settings.reconnect),
            required_channels: settings.required_channels.clone(),
            subscriber_queue_capacity: settings.subscriber_queue_capacity,
        }
    }
}

/// How a single link attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum LinkOutcome {
    Opened,
    TimedOut,
    Failed(RadioError),
    /// A newer session operation took over while waiting
    Superseded,
}

/// Open a link to `id`, giving up after `timeout` or as soon as the session
/// epoch moves past `epoch`.
pub async fn open_link(
    radio: &dyn RadioPrimitive,
    id: &PeripheralId,
    timeout: Duration,
    epoch: u64,
    cancel: watch::Receiver<u64>,
) -> LinkOutcome {
    info!("Opening link to {}", id);
    tokio::select! {
        result = tokio::time::timeout(timeout, radio.connect(id)) => match result {
            Ok(Ok(())) => LinkOutcome::Opened,
            Ok(Err(e)) => LinkOutcome::Failed(e),
            Err(_) => LinkOutcome::TimedOut,
        },
        _ = superseded(cancel, epoch) => {
            debug!("Link attempt to {} superseded", id);
            LinkOutcome::Superseded
        }
    }
}

/// Resolves once the published epoch differs from `epoch`.
pub async fn superseded(mut cancel: watch::Receiver<u64>, epoch: u64) {
    loop {
        if *cancel.borrow_and_update() != epoch {
            return;
        }
        if cancel.changed().await.is_err() {
            // Session gone: nothing will ever supersede this epoch.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::radio::RadioSupport;
    use crate::infrastructure::bluetooth::simulated::{ConnectBehavior, SimulatedRadio};

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(3000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_zero_attempts_still_bounded_to_one() {
        let settings = ReconnectSettings {
            max_attempts: 0,
            ..ReconnectSettings::default()
        };
        assert_eq!(ReconnectPolicy::from_settings(&settings).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_connect_times_out() {
        let radio = SimulatedRadio::new(RadioSupport::full(Vec::new()));
        radio.queue_connect(ConnectBehavior::Hang);
        let (_tx, rx) = watch::channel(1);

        let outcome = open_link(
            radio.as_ref(),
            &PeripheralId::from("a"),
            Duration::from_secs(3),
            1,
            rx,
        )
        .await;
        assert_eq!(outcome, LinkOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_epoch_change_supersedes_attempt() {
        let radio = SimulatedRadio::new(RadioSupport::full(Vec::new()));
        radio.queue_connect(ConnectBehavior::Hang);
        let (tx, rx) = watch::channel(1);

        let attempt = tokio::spawn(async move {
            open_link(
                radio.as_ref(),
                &PeripheralId::from("a"),
                Duration::from_secs(60),
                1,
                rx,
            )
            .await
        });
        tokio::task::yield_now().await;
        tx.send_replace(2);

        assert_eq!(attempt.await.unwrap(), LinkOutcome::Superseded);
    }
}
