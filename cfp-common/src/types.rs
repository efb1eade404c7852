//! Shared record and wire types
//!
//! Fixed-schema structs for everything that crosses a service boundary:
//! feature vectors, inference request/response bodies and broadcast payloads.
//! Every boundary validates through these types; there are no free-form maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Topic carrying scored results
pub const PREDICTIONS_TOPIC: &str = "predictions";

/// Topic carrying unscored rows from the simulator
pub const RAW_DATA_TOPIC: &str = "raw_data";

/// Default number of probabilities retained by a consumer
pub const DEFAULT_WINDOW_SIZE: usize = 50;

/// Column names of a feature record, in model input order
pub const FEATURE_NAMES: [&str; 4] = [
    "cpu_request",
    "memory_request",
    "priority",
    "scheduling_class",
];

/// Largest magnitude at which every integer is exactly representable as f64
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

// ========================================
// Feature Records
// ========================================

/// Resource request of one schedulable job
///
/// Integer fields accept integral floats (`3.0`) on input, since tabular
/// exports often upcast integer columns. `3.5` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub cpu_request: f64,
    pub memory_request: f64,
    #[serde(deserialize_with = "integral")]
    pub priority: i64,
    #[serde(deserialize_with = "integral")]
    pub scheduling_class: i64,
}

impl FeatureVector {
    pub fn new(cpu_request: f64, memory_request: f64, priority: i64, scheduling_class: i64) -> Self {
        Self {
            cpu_request,
            memory_request,
            priority,
            scheduling_class,
        }
    }

    /// Reject non-finite numeric fields
    pub fn validate(&self) -> Result<()> {
        if !self.cpu_request.is_finite() {
            return Err(Error::InvalidInput(format!(
                "cpu_request must be finite, got {}",
                self.cpu_request
            )));
        }
        if !self.memory_request.is_finite() {
            return Err(Error::InvalidInput(format!(
                "memory_request must be finite, got {}",
                self.memory_request
            )));
        }
        Ok(())
    }

    /// Model input in `FEATURE_NAMES` order
    pub fn to_array(&self) -> [f64; 4] {
        [
            self.cpu_request,
            self.memory_request,
            self.priority as f64,
            self.scheduling_class as f64,
        ]
    }
}

fn integral<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value.fract() != 0.0 || value.abs() > MAX_EXACT_INTEGER {
        return Err(serde::de::Error::custom(format!(
            "expected an integer, got {}",
            value
        )));
    }
    Ok(value as i64)
}

// ========================================
// Inference Boundary
// ========================================

/// `POST /predict` request body
///
/// The four feature fields sit at the top level of the body. `request_id` is
/// optional; the endpoint generates one when the caller does not supply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub cpu_request: f64,
    pub memory_request: f64,
    #[serde(deserialize_with = "integral")]
    pub priority: i64,
    #[serde(deserialize_with = "integral")]
    pub scheduling_class: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

impl PredictRequest {
    pub fn new(features: FeatureVector, request_id: Uuid, seq: u64) -> Self {
        Self {
            cpu_request: features.cpu_request,
            memory_request: features.memory_request,
            priority: features.priority,
            scheduling_class: features.scheduling_class,
            request_id: Some(request_id),
            seq: Some(seq),
        }
    }

    pub fn features(&self) -> FeatureVector {
        FeatureVector::new(
            self.cpu_request,
            self.memory_request,
            self.priority,
            self.scheduling_class,
        )
    }
}

/// `POST /predict` response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictResponse {
    pub failure_probability: f64,
    pub request_id: Uuid,
}

// ========================================
// Scored Results
// ========================================

/// Outcome of exactly one scorer call on exactly one feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResult {
    pub request_id: Uuid,
    pub seq: Option<u64>,
    pub features: FeatureVector,
    pub probability: f64,
}

impl ScoreResult {
    /// Wire form for the predictions topic
    pub fn to_message(&self) -> BroadcastMessage {
        BroadcastMessage {
            request_id: Some(self.request_id),
            seq: self.seq,
            data: self.features,
            failure_probability: self.probability,
            published_at: Some(Utc::now()),
        }
    }
}

/// Payload published on the predictions topic
///
/// `request_id` and `published_at` are optional on decode so that payloads
/// from uncorrelated publishers (`{data, failure_probability}` only) are still
/// accepted; such messages are recorded but can never satisfy a pending tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub data: FeatureVector,
    pub failure_probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl BroadcastMessage {
    /// Serialize to the text payload carried by the broker
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate an inbound payload
    ///
    /// Both structural and semantic problems (probability outside [0,1],
    /// non-finite features) surface as `Error::Deserialization`.
    pub fn decode(payload: &str) -> Result<Self> {
        let message: BroadcastMessage = serde_json::from_str(payload)?;
        let p = message.failure_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(malformed(format!("failure_probability out of range: {}", p)));
        }
        if let Err(e) = message.data.validate() {
            return Err(malformed(e.to_string()));
        }
        Ok(message)
    }

    pub fn risk(&self) -> RiskLevel {
        RiskLevel::classify(self.failure_probability)
    }
}

fn malformed(msg: String) -> Error {
    Error::Deserialization(<serde_json::Error as serde::de::Error>::custom(msg))
}

/// Replay policy of a feature record source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    /// Play once; reaching the end stops the stream, stopping rewinds to the start
    #[default]
    OneShot,
    /// Wrap to the start after the last record; stopping keeps the position
    Cyclic,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::OneShot => "one-shot",
            SourceMode::Cyclic => "cyclic",
        }
    }
}

impl std::fmt::Display for SourceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one-shot" | "oneshot" | "one_shot" | "file" => Ok(SourceMode::OneShot),
            "cyclic" | "list" => Ok(SourceMode::Cyclic),
            other => Err(Error::InvalidInput(format!(
                "unknown source mode '{}' (expected one-shot or cyclic)",
                other
            ))),
        }
    }
}

/// Display classification of a failure probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    /// `High` above 0.8, `Low` below 0.2, `Moderate` otherwise
    pub fn classify(probability: f64) -> Self {
        if probability > 0.8 {
            RiskLevel::High
        } else if probability < 0.2 {
            RiskLevel::Low
        } else {
            RiskLevel::Moderate
        }
    }
}
