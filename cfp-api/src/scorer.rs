//! Failure probability scorer
//!
//! The `Scorer` trait is the seam between the inference endpoint and whatever
//! model backs it. `LogisticModel` is the shipped adapter: a linear model over
//! the four features followed by a sigmoid, loaded once from a JSON artifact.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use cfp_common::{Error, FeatureVector, Result};

/// Model capability: feature vector in, failure probability out
///
/// Implementations must be pure and safe to call concurrently.
pub trait Scorer: Send + Sync {
    /// Probability in [0,1] that the job fails
    fn score(&self, features: &FeatureVector) -> Result<f64>;

    /// Identifier of the loaded artifact, reported by `/health`
    fn version(&self) -> &str;
}

/// Logistic regression artifact
///
/// ```json
/// { "weights": [w_cpu, w_mem, w_prio, w_class], "bias": b, "version": "..." }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: [f64; 4],
    pub bias: f64,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "unversioned".to_string()
}

impl LogisticModel {
    /// Load and check the artifact at `path`
    ///
    /// Every failure is `ScorerUnavailable`: the service cannot run without it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ScorerUnavailable(format!("cannot read model {}: {}", path.display(), e))
        })?;
        let model = Self::from_json(&content)
            .map_err(|e| Error::ScorerUnavailable(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), version = %model.version, "Loaded model");
        Ok(model)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let model: LogisticModel = serde_json::from_str(content)
            .map_err(|e| Error::ScorerUnavailable(format!("invalid model artifact: {}", e)))?;
        if !model.weights.iter().all(|w| w.is_finite()) || !model.bias.is_finite() {
            return Err(Error::ScorerUnavailable(
                "model coefficients must be finite".to_string(),
            ));
        }
        Ok(model)
    }
}

impl Scorer for LogisticModel {
    fn score(&self, features: &FeatureVector) -> Result<f64> {
        features.validate()?;

        let z = self
            .weights
            .iter()
            .zip(features.to_array())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;

        // Opposite infinities in the dot product
        if z.is_nan() {
            return Err(Error::InvalidInput(
                "feature magnitudes exceed the model's numeric range".to_string(),
            ));
        }

        Ok(sigmoid(z).clamp(0.0, 1.0))
    }

    fn version(&self) -> &str {
        &self.version
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
