//! Capability descriptors for instrument models.
//!
//! Each model is described by data: which measurements it supports, which bus
//! addresses it accepts, and which transport produces its readings. Adding a
//! model means registering a descriptor; the session controller never
//! branches on the model key.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SessionConfig;
use crate::models::MeasurementType;
use crate::session::{InstrumentTransport, SimulatedTransport};

/// Inclusive range of accepted GPIB primary addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressRule {
    pub min: u8,
    pub max: u8,
}

impl AddressRule {
    /// Full primary address space of the bus.
    pub const fn gpib_primary() -> Self {
        Self {
            min: 0,
            max: SessionConfig::MAX_GPIB_ADDRESS,
        }
    }

    /// Return the address if it satisfies the rule.
    pub fn check(&self, address: i64) -> Option<u8> {
        u8::try_from(address)
            .ok()
            .filter(|a| (self.min..=self.max).contains(a))
    }
}

impl Default for AddressRule {
    fn default() -> Self {
        Self::gpib_primary()
    }
}

impl fmt::Display for AddressRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} and {}", self.min, self.max)
    }
}

/// Characteristics of a simulated instrument.
///
/// Raw values are drawn on a 0-10 scale and rescaled to the configured range.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationProfile {
    pub base_min: f64,
    pub base_max: f64,
    pub noise: f64,
    pub read_latency: Duration,
}

/// Knobs shared by every simulated transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationOptions {
    latency: bool,
    connect_failure_rate: f64,
}

impl SimulationOptions {
    /// No latency and no refused connections; used by tests.
    pub fn instant() -> Self {
        Self {
            latency: false,
            connect_failure_rate: 0.0,
        }
    }

    pub fn with_latency(mut self, latency: bool) -> Self {
        self.latency = latency;
        self
    }

    /// Any rate outside [0, 1] is clamped; NaN disables refusals.
    pub fn with_connect_failure_rate(mut self, rate: f64) -> Self {
        self.connect_failure_rate = if rate.is_nan() {
            0.0
        } else {
            rate.clamp(0.0, 1.0)
        };
        self
    }

    /// Sleep for the profile latencies to mimic bus round-trips.
    pub fn latency(&self) -> bool {
        self.latency
    }

    /// Probability in [0, 1] that a connect attempt is refused.
    pub fn connect_failure_rate(&self) -> f64 {
        self.connect_failure_rate
    }
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            latency: true,
            connect_failure_rate: 0.0,
        }
    }
}

/// Everything the core needs to know about one instrument model.
#[derive(Clone)]
pub struct CapabilityDescriptor {
    /// Registry key, the value of an instrument's `type` field.
    pub model: String,
    pub display_name: String,
    pub supported_measurements: Vec<MeasurementType>,
    pub address_rule: AddressRule,
    pub transport: Arc<dyn InstrumentTransport>,
}

impl CapabilityDescriptor {
    pub fn new(
        model: impl Into<String>,
        display_name: impl Into<String>,
        transport: Arc<dyn InstrumentTransport>,
    ) -> Self {
        Self {
            model: model.into(),
            display_name: display_name.into(),
            supported_measurements: MeasurementType::ALL.to_vec(),
            address_rule: AddressRule::default(),
            transport,
        }
    }

    /// Simulated model backed by the given profile.
    pub fn simulated(
        model: impl Into<String>,
        display_name: impl Into<String>,
        profile: SimulationProfile,
        options: SimulationOptions,
    ) -> Self {
        Self::new(
            model,
            display_name,
            Arc::new(SimulatedTransport::new(profile, options)),
        )
    }

    pub fn with_measurements(mut self, measurements: Vec<MeasurementType>) -> Self {
        self.supported_measurements = measurements;
        self
    }

    pub fn with_address_rule(mut self, rule: AddressRule) -> Self {
        self.address_rule = rule;
        self
    }

    pub fn supports(&self, measurement: MeasurementType) -> bool {
        self.supported_measurements.contains(&measurement)
    }

    pub fn summary(&self) -> CapabilitySummary {
        CapabilitySummary {
            model: self.model.clone(),
            display_name: self.display_name.clone(),
            supported_measurements: self.supported_measurements.clone(),
            address_rule: self.address_rule,
        }
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("model", &self.model)
            .field("display_name", &self.display_name)
            .field("supported_measurements", &self.supported_measurements)
            .field("address_rule", &self.address_rule)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySummary {
    pub model: String,
    pub display_name: String,
    pub supported_measurements: Vec<MeasurementType>,
    pub address_rule: AddressRule,
}

/// Model key -> capability descriptor.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    descriptors: BTreeMap<String, Arc<CapabilityDescriptor>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the five built-in multimeter models.
    pub fn builtin(options: SimulationOptions) -> Self {
        let mut registry = Self::new();
        for (model, display_name, base_min, base_max, noise, latency_ms) in [
            ("34401A", "HP 34401A", 0.5, 9.5, 0.01, 300),
            ("34410A", "Agilent 34410A", 0.3, 8.7, 0.005, 250),
            ("34461A", "Keysight 34461A", 0.1, 9.9, 0.001, 200),
            ("34465A", "Keysight 34465A", 0.05, 9.95, 0.0001, 150),
            ("custom", "Custom", 0.0, 10.0, 0.05, 400),
        ] {
            let profile = SimulationProfile {
                base_min,
                base_max,
                noise,
                read_latency: Duration::from_millis(latency_ms),
            };
            registry.register(CapabilityDescriptor::simulated(
                model,
                display_name,
                profile,
                options,
            ));
        }
        registry
    }

    /// Register a descriptor, replacing any previous one for the same model.
    pub fn register(&mut self, descriptor: CapabilityDescriptor) -> Option<Arc<CapabilityDescriptor>> {
        self.descriptors
            .insert(descriptor.model.clone(), Arc::new(descriptor))
    }

    pub fn get(&self, model: &str) -> Option<Arc<CapabilityDescriptor>> {
        self.descriptors.get(model).cloned()
    }

    pub fn models(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<CapabilitySummary> {
        self.descriptors.values().map(|d| d.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_models() {
        let registry = CapabilityRegistry::builtin(SimulationOptions::instant());
        assert_eq!(
            registry.models(),
            vec!["34401A", "34410A", "34461A", "34465A", "custom"]
        );
        let hp = registry.get("34401A").unwrap();
        assert_eq!(hp.display_name, "HP 34401A");
        assert!(MeasurementType::ALL.iter().all(|m| hp.supports(*m)));
    }

    #[test]
    fn test_address_rule() {
        let rule = AddressRule::gpib_primary();
        assert_eq!(rule.check(0), Some(0));
        assert_eq!(rule.check(30), Some(30));
        assert_eq!(rule.check(31), None);
        assert_eq!(rule.check(-1), None);
        assert_eq!(rule.to_string(), "0 and 30");
    }

    #[test]
    fn test_register_new_model_is_data_only() {
        let mut registry = CapabilityRegistry::builtin(SimulationOptions::instant());
        let profile = SimulationProfile {
            base_min: 1.0,
            base_max: 2.0,
            noise: 0.0,
            read_latency: Duration::ZERO,
        };
        let previous = registry.register(
            CapabilityDescriptor::simulated(
                "3458A",
                "HP 3458A",
                profile,
                SimulationOptions::instant(),
            )
            .with_measurements(vec![MeasurementType::DcVoltage])
            .with_address_rule(AddressRule { min: 1, max: 22 }),
        );
        assert!(previous.is_none());
        assert_eq!(registry.len(), 6);

        let descriptor = registry.get("3458A").unwrap();
        assert!(!descriptor.supports(MeasurementType::Frequency));
        assert_eq!(descriptor.address_rule.check(0), None);
    }

    #[test]
    fn test_failure_rate_is_clamped() {
        let options = SimulationOptions::instant();
        assert_eq!(options.with_connect_failure_rate(4.0).connect_failure_rate(), 1.0);
        assert_eq!(options.with_connect_failure_rate(-1.0).connect_failure_rate(), 0.0);
        assert_eq!(options.with_connect_failure_rate(f64::NAN).connect_failure_rate(), 0.0);
        assert_eq!(options.with_connect_failure_rate(0.25).connect_failure_rate(), 0.25);
    }
}
