//! Client side of the inference endpoint

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use cfp_common::{Error, PredictRequest, PredictResponse, Result};

const USER_AGENT: &str = concat!("cfp-dashboard/", env!("CARGO_PKG_VERSION"));

/// Something that can score a feature vector on our behalf
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, request: &PredictRequest) -> Result<PredictResponse>;
}

/// `POST /predict` over HTTP
#[derive(Clone)]
pub struct HttpPredictor {
    http_client: reqwest::Client,
    predict_url: String,
}

impl HttpPredictor {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            predict_url: format!("{}/predict", api_url.trim_end_matches('/')),
        })
    }

    pub fn predict_url(&self) -> &str {
        &self.predict_url
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, request: &PredictRequest) -> Result<PredictResponse> {
        let response = self
            .http_client
            .post(&self.predict_url)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!(
                "inference endpoint returned {}: {}",
                status, body
            )));
        }

        let prediction: PredictResponse = response.json().await?;
        debug!(
            request_id = %prediction.request_id,
            probability = prediction.failure_probability,
            "Prediction received"
        );
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfp_common::FeatureVector;
    use uuid::Uuid;

    #[test]
    fn test_predict_url() {
        let p = HttpPredictor::new("http://127.0.0.1:5751/", Duration::from_secs(1)).unwrap();
        assert_eq!(p.predict_url(), "http://127.0.0.1:5751/predict");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_http_error() {
        let p = HttpPredictor::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let request = PredictRequest::new(FeatureVector::new(0.1, 0.1, 0, 0), Uuid::new_v4(), 0);
        let err = p.predict(&request).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
