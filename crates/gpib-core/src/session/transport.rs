//! Transport seam between the session controller and the bus.

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::capability::{SimulationOptions, SimulationProfile};
use crate::config::SessionConfig;
use crate::error::{GpibError, Result};
use crate::models::Instrument;

/// Bus access for one instrument model.
///
/// The controller wraps every call in a timeout, so implementations may block
/// on the bus. `read` returns the raw value in the unit of the instrument's
/// configured measurement type; quantization to the display resolution is
/// done by the controller.
#[async_trait]
pub trait InstrumentTransport: Send + Sync {
    /// Establish a link to the instrument at its configured address.
    async fn open(&self, instrument: &Instrument) -> Result<()>;

    /// Trigger and fetch a single reading.
    async fn read(&self, instrument: &Instrument) -> Result<f64>;

    /// Release the link.
    async fn close(&self, instrument: &Instrument) -> Result<()>;
}

/// Random readings shaped by a [`SimulationProfile`].
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    profile: SimulationProfile,
    options: SimulationOptions,
}

impl SimulatedTransport {
    pub fn new(profile: SimulationProfile, options: SimulationOptions) -> Self {
        Self { profile, options }
    }

    async fn pause(&self, duration: std::time::Duration) {
        if self.options.latency() && !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }

    fn sample(&self, instrument: &Instrument) -> f64 {
        let mut rng = rand::rng();
        let base = if self.profile.base_max > self.profile.base_min {
            rng.random_range(self.profile.base_min..self.profile.base_max)
        } else {
            self.profile.base_min
        };
        let noise = if self.profile.noise > 0.0 {
            rng.random_range(-self.profile.noise..=self.profile.noise)
        } else {
            0.0
        };

        // Profiles are expressed on a 10-unit scale.
        match instrument.config.range.full_scale() {
            Some(fs) => ((base + noise) * fs / 10.0).clamp(-fs, fs),
            None => base + noise,
        }
    }
}

#[async_trait]
impl InstrumentTransport for SimulatedTransport {
    async fn open(&self, instrument: &Instrument) -> Result<()> {
        self.pause(SessionConfig::SIMULATED_CONNECT_LATENCY).await;

        let rate = self.options.connect_failure_rate();
        let refused = rate > 0.0 && rand::rng().random_bool(rate);
        if refused {
            return Err(GpibError::Transport {
                id: instrument.id,
                message: format!(
                    "no listener acknowledged GPIB address {}",
                    instrument.config.gpib_address
                ),
            });
        }

        debug!(
            "Simulated link opened to {} at address {}",
            instrument.name(),
            instrument.config.gpib_address
        );
        Ok(())
    }

    async fn read(&self, instrument: &Instrument) -> Result<f64> {
        self.pause(self.profile.read_latency).await;
        Ok(self.sample(instrument))
    }

    async fn close(&self, _instrument: &Instrument) -> Result<()> {
        self.pause(SessionConfig::SIMULATED_DISCONNECT_LATENCY).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InstrumentConfig, MeasurementRange, MeasurementType, Resolution};
    use chrono::Utc;
    use std::time::Duration;

    fn instrument(range: MeasurementRange) -> Instrument {
        let now = Utc::now();
        Instrument {
            id: 1,
            config: InstrumentConfig {
                name: "DMM".into(),
                model: "34401A".into(),
                gpib_address: 22,
                description: None,
                auto_connect: false,
                measurement_type: MeasurementType::DcVoltage,
                range,
                resolution: Resolution::Digits6_5,
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn profile() -> SimulationProfile {
        SimulationProfile {
            base_min: 0.5,
            base_max: 9.5,
            noise: 0.01,
            read_latency: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn test_simulated_values_stay_in_range() {
        let transport = SimulatedTransport::new(profile(), SimulationOptions::instant());

        for _ in 0..50 {
            let auto = transport.read(&instrument(MeasurementRange::Auto)).await.unwrap();
            assert!((0.49..=9.51).contains(&auto));

            let small = transport
                .read(&instrument(MeasurementRange::Fixed100m))
                .await
                .unwrap();
            assert!(small.abs() <= 0.1);
        }
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let options = SimulationOptions::instant().with_connect_failure_rate(1.0);
        let transport = SimulatedTransport::new(profile(), options);
        let err = transport
            .open(&instrument(MeasurementRange::Auto))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport_error");
        assert_eq!(err.instrument_id(), Some(1));
    }

    #[tokio::test]
    async fn test_out_of_range_failure_rates_open_cleanly() {
        for rate in [-1.0, f64::NAN, f64::NEG_INFINITY] {
            let options = SimulationOptions::instant().with_connect_failure_rate(rate);
            let transport = SimulatedTransport::new(profile(), options);
            transport.open(&instrument(MeasurementRange::Auto)).await.unwrap();
        }

        let options = SimulationOptions::instant().with_connect_failure_rate(f64::INFINITY);
        let transport = SimulatedTransport::new(profile(), options);
        assert!(transport.open(&instrument(MeasurementRange::Auto)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let transport =
            SimulatedTransport::new(profile(), SimulationOptions::instant().with_latency(true));
        let start = tokio::time::Instant::now();
        transport.read(&instrument(MeasurementRange::Auto)).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
