//! Instrument entity, its enumerated settings, and request payload parsing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::capability::CapabilityRegistry;
use crate::error::{FieldError, GpibError, Result};

/// Store-assigned instrument identifier.
pub type InstrumentId = i64;

/// Failure to parse one of the enumerated instrument settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct ParseValueError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseValueError {
    fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

// ============================================================================
// Measurement type
// ============================================================================

/// Quantity the multimeter is configured to measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasurementType {
    DcVoltage,
    AcVoltage,
    DcCurrent,
    AcCurrent,
    Resistance,
    Frequency,
    Period,
}

impl MeasurementType {
    pub const ALL: [MeasurementType; 7] = [
        MeasurementType::DcVoltage,
        MeasurementType::AcVoltage,
        MeasurementType::DcCurrent,
        MeasurementType::AcCurrent,
        MeasurementType::Resistance,
        MeasurementType::Frequency,
        MeasurementType::Period,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementType::DcVoltage => "DC_VOLTAGE",
            MeasurementType::AcVoltage => "AC_VOLTAGE",
            MeasurementType::DcCurrent => "DC_CURRENT",
            MeasurementType::AcCurrent => "AC_CURRENT",
            MeasurementType::Resistance => "RESISTANCE",
            MeasurementType::Frequency => "FREQUENCY",
            MeasurementType::Period => "PERIOD",
        }
    }

    /// SI unit of a reading.
    pub fn unit(&self) -> &'static str {
        match self {
            MeasurementType::DcVoltage | MeasurementType::AcVoltage => "V",
            MeasurementType::DcCurrent | MeasurementType::AcCurrent => "A",
            MeasurementType::Resistance => "Ω",
            MeasurementType::Frequency => "Hz",
            MeasurementType::Period => "s",
        }
    }

    /// Unit with coupling, as shown on the instrument front panel.
    pub fn unit_label(&self) -> &'static str {
        match self {
            MeasurementType::DcVoltage => "V DC",
            MeasurementType::AcVoltage => "V AC",
            MeasurementType::DcCurrent => "A DC",
            MeasurementType::AcCurrent => "A AC",
            MeasurementType::Resistance => "Ω",
            MeasurementType::Frequency => "Hz",
            MeasurementType::Period => "s",
        }
    }
}

impl Default for MeasurementType {
    fn default() -> Self {
        MeasurementType::DcVoltage
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MeasurementType {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        MeasurementType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| ParseValueError::new("measurement type", s))
    }
}

// ============================================================================
// Range
// ============================================================================

/// Measurement range: autoranging or a fixed full-scale value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MeasurementRange {
    #[default]
    Auto,
    Fixed100m,
    Fixed1,
    Fixed10,
    Fixed100,
    Fixed1000,
}

impl MeasurementRange {
    pub const FIXED: [MeasurementRange; 5] = [
        MeasurementRange::Fixed100m,
        MeasurementRange::Fixed1,
        MeasurementRange::Fixed10,
        MeasurementRange::Fixed100,
        MeasurementRange::Fixed1000,
    ];

    /// Full-scale value, `None` for autoranging.
    pub fn full_scale(&self) -> Option<f64> {
        match self {
            MeasurementRange::Auto => None,
            MeasurementRange::Fixed100m => Some(0.1),
            MeasurementRange::Fixed1 => Some(1.0),
            MeasurementRange::Fixed10 => Some(10.0),
            MeasurementRange::Fixed100 => Some(100.0),
            MeasurementRange::Fixed1000 => Some(1000.0),
        }
    }

    pub fn from_full_scale(value: f64) -> Option<Self> {
        Self::FIXED.into_iter().find(|r| {
            r.full_scale()
                .map(|fs| (fs - value).abs() <= fs * 1e-9)
                .unwrap_or(false)
        })
    }

    /// Text form used in storage: `AUTO`, `0.1`, `1`, `10`, ...
    pub fn as_db_string(&self) -> String {
        match self.full_scale() {
            None => "AUTO".to_string(),
            Some(fs) => format_number(fs),
        }
    }

    fn from_json(value: &Value) -> std::result::Result<Self, ParseValueError> {
        match value {
            Value::String(s) => s.parse(),
            Value::Number(n) => n
                .as_f64()
                .and_then(Self::from_full_scale)
                .ok_or_else(|| ParseValueError::new("range", n.to_string())),
            other => Err(ParseValueError::new("range", other.to_string())),
        }
    }
}

impl FromStr for MeasurementRange {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("AUTO") {
            return Ok(MeasurementRange::Auto);
        }
        trimmed
            .parse::<f64>()
            .ok()
            .and_then(Self::from_full_scale)
            .ok_or_else(|| ParseValueError::new("range", s))
    }
}

impl fmt::Display for MeasurementRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_db_string())
    }
}

impl Serialize for MeasurementRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self.full_scale() {
            None => serializer.serialize_str("AUTO"),
            Some(fs) => serializer.serialize_f64(fs),
        }
    }
}

impl<'de> Deserialize<'de> for MeasurementRange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Display resolution in digits (the trailing half digit is the overrange digit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    Digits4_5,
    Digits5_5,
    Digits6_5,
    Digits7_5,
}

impl Resolution {
    pub const ALL: [Resolution; 4] = [
        Resolution::Digits4_5,
        Resolution::Digits5_5,
        Resolution::Digits6_5,
        Resolution::Digits7_5,
    ];

    pub fn digits(&self) -> f64 {
        match self {
            Resolution::Digits4_5 => 4.5,
            Resolution::Digits5_5 => 5.5,
            Resolution::Digits6_5 => 6.5,
            Resolution::Digits7_5 => 7.5,
        }
    }

    /// Number of full digits on the display.
    pub fn full_digits(&self) -> u32 {
        match self {
            Resolution::Digits4_5 => 4,
            Resolution::Digits5_5 => 5,
            Resolution::Digits6_5 => 6,
            Resolution::Digits7_5 => 7,
        }
    }

    pub fn from_digits(value: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| (r.digits() - value).abs() < 1e-9)
    }

    pub fn as_db_string(&self) -> String {
        format_number(self.digits())
    }

    fn from_json(value: &Value) -> std::result::Result<Self, ParseValueError> {
        match value {
            Value::String(s) => s.parse(),
            Value::Number(n) => n
                .as_f64()
                .and_then(Self::from_digits)
                .ok_or_else(|| ParseValueError::new("resolution", n.to_string())),
            other => Err(ParseValueError::new("resolution", other.to_string())),
        }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution::Digits6_5
    }
}

impl FromStr for Resolution {
    type Err = ParseValueError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim()
            .parse::<f64>()
            .ok()
            .and_then(Self::from_digits)
            .ok_or_else(|| ParseValueError::new("resolution", s))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_db_string())
    }
}

impl Serialize for Resolution {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.digits())
    }
}

impl<'de> Deserialize<'de> for Resolution {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// ============================================================================
// Instrument entity
// ============================================================================

/// User-editable configuration of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentConfig {
    pub name: String,
    /// Model key registered in the capability registry.
    #[serde(rename = "type")]
    pub model: String,
    pub gpib_address: u8,
    pub description: Option<String>,
    pub auto_connect: bool,
    pub measurement_type: MeasurementType,
    pub range: MeasurementRange,
    pub resolution: Resolution,
}

/// A persisted instrument record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub id: InstrumentId,
    #[serde(flatten)]
    pub config: InstrumentConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instrument {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Request payloads
// ============================================================================

/// A partial set of instrument fields, as supplied by create/update requests.
///
/// Parsing checks JSON shapes and enumerations field by field; model
/// membership and the address rule are checked against the capability
/// registry when the patch is resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentPatch {
    pub name: Option<String>,
    pub model: Option<String>,
    pub gpib_address: Option<i64>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
    pub auto_connect: Option<bool>,
    pub measurement_type: Option<MeasurementType>,
    pub range: Option<MeasurementRange>,
    pub resolution: Option<Resolution>,
}

/// Look up a field by its camelCase name or the snake_case alias.
fn field<'a>(body: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    body.get(camel).or_else(|| body.get(snake))
}

impl InstrumentPatch {
    /// Parse a JSON request body, collecting every malformed field.
    pub fn from_json(body: &Value) -> Result<Self> {
        if !body.is_object() {
            return Err(GpibError::invalid_field("body", "expected a JSON object"));
        }

        let mut errors = Vec::new();
        let mut patch = InstrumentPatch::default();

        match field(body, "name", "name") {
            None => {}
            Some(Value::String(s)) => patch.name = Some(s.clone()),
            Some(_) => errors.push(FieldError::new("name", "must be a string")),
        }

        match field(body, "type", "type") {
            None => {}
            Some(Value::String(s)) => patch.model = Some(s.clone()),
            Some(_) => errors.push(FieldError::new("type", "must be a string")),
        }

        match field(body, "gpibAddress", "gpib_address") {
            None => {}
            Some(Value::Number(n)) => match n.as_i64() {
                Some(v) => patch.gpib_address = Some(v),
                None => errors.push(FieldError::new("gpibAddress", "must be an integer")),
            },
            Some(Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(v) => patch.gpib_address = Some(v),
                Err(_) => errors.push(FieldError::new("gpibAddress", "must be an integer")),
            },
            Some(_) => errors.push(FieldError::new("gpibAddress", "must be an integer")),
        }

        match field(body, "description", "description") {
            None => {}
            Some(Value::Null) => patch.description = Some(None),
            Some(Value::String(s)) => patch.description = Some(Some(s.clone())),
            Some(_) => errors.push(FieldError::new("description", "must be a string or null")),
        }

        match field(body, "autoConnect", "auto_connect") {
            None => {}
            Some(Value::Bool(b)) => patch.auto_connect = Some(*b),
            Some(_) => errors.push(FieldError::new("autoConnect", "must be a boolean")),
        }

        match field(body, "measurementType", "measurement_type") {
            None => {}
            Some(Value::String(s)) => match s.parse::<MeasurementType>() {
                Ok(t) => patch.measurement_type = Some(t),
                Err(_) => errors.push(FieldError::new(
                    "measurementType",
                    format!("unsupported measurement type '{}'", s),
                )),
            },
            Some(_) => errors.push(FieldError::new("measurementType", "must be a string")),
        }

        if let Some(value) = field(body, "range", "range") {
            match MeasurementRange::from_json(value) {
                Ok(r) => patch.range = Some(r),
                Err(_) => errors.push(FieldError::new(
                    "range",
                    "must be AUTO or one of 0.1, 1, 10, 100, 1000",
                )),
            }
        }

        if let Some(value) = field(body, "resolution", "resolution") {
            match Resolution::from_json(value) {
                Ok(r) => patch.resolution = Some(r),
                Err(_) => errors.push(FieldError::new(
                    "resolution",
                    "must be one of 4.5, 5.5, 6.5, 7.5",
                )),
            }
        }

        if errors.is_empty() {
            Ok(patch)
        } else {
            Err(GpibError::Validation { fields: errors })
        }
    }

    /// Build a new configuration from this patch, applying creation defaults.
    pub fn into_new_config(self, registry: &CapabilityRegistry) -> Result<InstrumentConfig> {
        let mut errors = Vec::new();
        if self.name.is_none() {
            errors.push(FieldError::new("name", "is required"));
        }
        if self.model.is_none() {
            errors.push(FieldError::new("type", "is required"));
        }
        if self.gpib_address.is_none() {
            errors.push(FieldError::new("gpibAddress", "is required"));
        }
        if !errors.is_empty() {
            // Report the other problems alongside the missing fields.
            if let Err(err) = self.check(registry) {
                errors.extend_from_slice(err.field_errors());
            }
            return Err(GpibError::Validation { fields: errors });
        }

        let draft = Draft {
            name: self.name.unwrap_or_default(),
            model: self.model.unwrap_or_default(),
            gpib_address: self.gpib_address.unwrap_or_default(),
            description: self.description.unwrap_or(None),
            auto_connect: self.auto_connect.unwrap_or(false),
            measurement_type: self.measurement_type.unwrap_or_default(),
            range: self.range.unwrap_or_default(),
            resolution: self.resolution.unwrap_or_default(),
        };
        draft.validate(registry)
    }

    /// Merge this patch onto an existing configuration and re-validate.
    pub fn apply_to(
        self,
        current: &InstrumentConfig,
        registry: &CapabilityRegistry,
    ) -> Result<InstrumentConfig> {
        let draft = Draft {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            model: self.model.unwrap_or_else(|| current.model.clone()),
            gpib_address: self
                .gpib_address
                .unwrap_or(i64::from(current.gpib_address)),
            description: self
                .description
                .unwrap_or_else(|| current.description.clone()),
            auto_connect: self.auto_connect.unwrap_or(current.auto_connect),
            measurement_type: self.measurement_type.unwrap_or(current.measurement_type),
            range: self.range.unwrap_or(current.range),
            resolution: self.resolution.unwrap_or(current.resolution),
        };
        draft.validate(registry)
    }

    /// Validate only the fields present in the patch.
    fn check(&self, registry: &CapabilityRegistry) -> Result<()> {
        let mut errors = Vec::new();
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                errors.push(FieldError::new("name", "must not be empty"));
            }
        }
        if let Some(model) = &self.model {
            if registry.get(model).is_none() {
                errors.push(unknown_model(model, registry));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(GpibError::Validation { fields: errors })
        }
    }
}

/// Merged but not yet validated field set.
struct Draft {
    name: String,
    model: String,
    gpib_address: i64,
    description: Option<String>,
    auto_connect: bool,
    measurement_type: MeasurementType,
    range: MeasurementRange,
    resolution: Resolution,
}

impl Draft {
    fn validate(self, registry: &CapabilityRegistry) -> Result<InstrumentConfig> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push(FieldError::new("name", "must not be empty"));
        }

        let mut address = None;
        match registry.get(&self.model) {
            None => errors.push(unknown_model(&self.model, registry)),
            Some(descriptor) => {
                if !descriptor.supports(self.measurement_type) {
                    errors.push(FieldError::new(
                        "measurementType",
                        format!(
                            "{} is not supported by model {}",
                            self.measurement_type, descriptor.model
                        ),
                    ));
                }
                match descriptor.address_rule.check(self.gpib_address) {
                    Some(valid) => address = Some(valid),
                    None => errors.push(FieldError::new(
                        "gpibAddress",
                        format!("must be between {}", descriptor.address_rule),
                    )),
                }
            }
        }

        match (errors.is_empty(), address) {
            (true, Some(gpib_address)) => Ok(InstrumentConfig {
                name: self.name,
                model: self.model,
                gpib_address,
                description: self.description,
                auto_connect: self.auto_connect,
                measurement_type: self.measurement_type,
                range: self.range,
                resolution: self.resolution,
            }),
            _ => Err(GpibError::Validation { fields: errors }),
        }
    }
}

fn unknown_model(model: &str, registry: &CapabilityRegistry) -> FieldError {
    FieldError::new(
        "type",
        format!(
            "unknown instrument type '{}' (expected one of: {})",
            model,
            registry.models().join(", ")
        ),
    )
}
