//! Compatibility Gate
//!
//! One-shot check that the platform and hardware can run the wearable
//! integration. "Incompatible" is an expected steady state and is returned
//! as data; only a platform without the radio service at all is an error.

use crate::domain::error::SessionError;
use crate::domain::models::{ChannelKind, CompatibilityResult};
use crate::infrastructure::bluetooth::radio::RadioPrimitive;
use tracing::{info, warn};

pub struct CompatibilityGate {
    required_channels: Vec<ChannelKind>,
}

impl CompatibilityGate {
    pub fn new(required_channels: Vec<ChannelKind>) -> Self {
        Self { required_channels }
    }

    pub async fn check(
        &self,
        radio: &dyn RadioPrimitive,
    ) -> Result<CompatibilityResult, SessionError> {
        let support = match radio.check_compatibility().await {
            Ok(support) => support,
            Err(e) => {
                warn!("Compatibility check failed: {}", e);
                return Ok(CompatibilityResult::Incompatible {
                    reason: format!("compatibility check failed: {}", e),
                });
            }
        };

        if !support.platform_supported {
            warn!("Platform does not provide the radio service");
            return Err(SessionError::PlatformUnsupported);
        }

        if !support.hardware_available {
            let reason = support
                .reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "no radio hardware".to_string());
            info!("Hardware incompatible: {}", reason);
            return Ok(CompatibilityResult::Incompatible { reason });
        }

        let missing: Vec<String> = self
            .required_channels
            .iter()
            .filter(|channel| !support.channels.contains(channel))
            .map(|channel| channel.to_string())
            .collect();
        if !missing.is_empty() {
            let reason = format!("{} channel unavailable", missing.join(", "));
            info!("Hardware incompatible: {}", reason);
            return Ok(CompatibilityResult::Incompatible { reason });
        }

        let mut capabilities = support.channels;
        capabilities.sort();
        capabilities.dedup();
        info!(
            "Compatibility confirmed: {:?}, {} known device(s)",
            capabilities,
            support.known_devices.len()
        );

        Ok(CompatibilityResult::Compatible {
            capabilities,
            initial_devices: support.known_devices,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Peripheral, RadioAddress};
    use crate::infrastructure::bluetooth::radio::{RadioError, RadioSupport};
    use crate::infrastructure::bluetooth::simulated::SimulatedRadio;

    fn gate() -> CompatibilityGate {
        CompatibilityGate::new(vec![ChannelKind::HeartRate])
    }

    #[tokio::test]
    async fn test_full_support_is_compatible() {
        let band = Peripheral::new("a", "Band A", RadioAddress::Mac([1, 2, 3, 4, 5, 6]));
        let radio = SimulatedRadio::new(RadioSupport::full(vec![band.clone()]));
        let result = gate().check(radio.as_ref()).await.unwrap();
        assert_eq!(
            result,
            CompatibilityResult::Compatible {
                capabilities: ChannelKind::ALL.to_vec(),
                initial_devices: vec![band],
            }
        );
    }

    #[tokio::test]
    async fn test_missing_hardware_is_data_not_error() {
        let radio = SimulatedRadio::new(RadioSupport::no_hardware("no radio hardware"));
        let result = gate().check(radio.as_ref()).await.unwrap();
        assert_eq!(
            result,
            CompatibilityResult::Incompatible {
                reason: "no radio hardware".into()
            }
        );
    }

    #[tokio::test]
    async fn test_unsupported_platform_is_error() {
        let radio = SimulatedRadio::new(RadioSupport::unsupported_platform());
        assert_eq!(
            gate().check(radio.as_ref()).await,
            Err(SessionError::PlatformUnsupported)
        );
    }

    #[tokio::test]
    async fn test_missing_required_channel() {
        let mut support = RadioSupport::full(Vec::new());
        support.channels = vec![ChannelKind::Motion, ChannelKind::Gyroscope];
        let radio = SimulatedRadio::new(support);
        let result = gate().check(radio.as_ref()).await.unwrap();
        assert_eq!(
            result,
            CompatibilityResult::Incompatible {
                reason: "heart rate channel unavailable".into()
            }
        );
    }

    #[tokio::test]
    async fn test_radio_error_reported_as_incompatible() {
        let radio = SimulatedRadio::new(RadioSupport::full(Vec::new()));
        radio.set_support(Err(RadioError::Other("adapter busy".into())));
        let result = gate().check(radio.as_ref()).await.unwrap();
        assert!(!result.is_compatible());
    }
}
