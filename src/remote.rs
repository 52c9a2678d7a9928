//! Remote inference adapter.
//!
//! Instead of loading a model in-process, this adapter uploads the raw
//! photo to a prediction service and normalizes its response into the same
//! `{class identifier, confidence}` contract as local inference. Transport
//! failures map onto distinct error kinds (timeout, connectivity, non-2xx,
//! malformed payload) so callers can give differentiated guidance.
//!
//! The adapter performs no retries; retry policy belongs to the caller,
//! which knows whether re-running an expensive classification is warranted.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::error::{ClassifierError, Result};

/// A validated prediction from the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePrediction {
    /// Opaque class identifier, resolved downstream via the label map.
    pub plant_id: String,
    /// Top-class probability in `[0, 1]`.
    pub probability: f32,
}

/// Loosely-typed wire shape; validation happens in
/// [`parse_prediction_response`], never downstream.
#[derive(Debug, Deserialize)]
struct WireResponse {
    plant_id: Option<String>,
    probability: Option<f32>,
}

/// Validates a raw service response into a [`RemotePrediction`].
///
/// Non-2xx statuses become [`ClassifierError::Service`] regardless of body;
/// a 2xx body missing either field, or carrying a probability outside
/// `[0, 1]`, is a protocol error.
pub(crate) fn parse_prediction_response(status: u16, body: &[u8]) -> Result<RemotePrediction> {
    if !(200..300).contains(&status) {
        return Err(ClassifierError::Service {
            status,
            message: String::from_utf8_lossy(body).trim().to_string(),
        });
    }

    let wire: WireResponse = serde_json::from_slice(body)
        .map_err(|e| ClassifierError::MalformedResponse(e.to_string()))?;

    let plant_id = wire
        .plant_id
        .ok_or_else(|| ClassifierError::MalformedResponse("missing plant_id".to_string()))?;
    let probability = wire
        .probability
        .ok_or_else(|| ClassifierError::MalformedResponse("missing probability".to_string()))?;

    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(ClassifierError::MalformedResponse(format!(
            "probability {} outside [0, 1]",
            probability
        )));
    }

    Ok(RemotePrediction {
        plant_id,
        probability,
    })
}

/// Client for a remote prediction service speaking the `/predict` multipart
/// contract.
#[derive(Debug, Clone)]
pub struct RemoteClassifier {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl RemoteClassifier {
    /// Creates a classifier for `endpoint` with a hard request deadline.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Config(e.to_string()))?;
        let endpoint: String = endpoint.into();
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ClassifierError {
        if e.is_timeout() {
            ClassifierError::Timeout(self.timeout)
        } else {
            ClassifierError::Connectivity(e.to_string())
        }
    }

    /// Uploads the raw photo bytes and returns the service's validated
    /// prediction. The request is aborted once the deadline elapses.
    pub async fn predict(&self, photo: &[u8]) -> Result<RemotePrediction> {
        let part = Part::bytes(photo.to_vec())
            .file_name("photo.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| ClassifierError::Config(e.to_string()))?;
        let form = Form::new().part("image", part);

        let url = format!("{}/predict", self.endpoint);
        debug!(%url, bytes = photo.len(), "uploading photo for remote prediction");

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        parse_prediction_response(status, &body)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_valid_response() {
        let body = br#"{ "plant_id": "37", "probability": 0.92 }"#;
        let prediction = parse_prediction_response(200, body).unwrap();
        assert_eq!(prediction.plant_id, "37");
        assert!((prediction.probability - 0.92).abs() < f32::EPSILON);
    }

    #[test]
    fn test_missing_probability_is_malformed() {
        let body = br#"{ "plant_id": "37" }"#;
        let err = parse_prediction_response(200, body).unwrap_err();
        assert!(matches!(err, ClassifierError::MalformedResponse(_)));
    }

    #[test]
    fn test_missing_plant_id_is_malformed() {
        let body = br#"{ "probability": 0.5 }"#;
        let err = parse_prediction_response(200, body).unwrap_err();
        assert!(matches!(err, ClassifierError::MalformedResponse(_)));
    }

    #[test]
    fn test_probability_out_of_range_is_malformed() {
        let body = br#"{ "plant_id": "37", "probability": 1.5 }"#;
        let err = parse_prediction_response(200, body).unwrap_err();
        assert!(matches!(err, ClassifierError::MalformedResponse(_)));

        let body = br#"{ "plant_id": "37", "probability": -0.1 }"#;
        let err = parse_prediction_response(200, body).unwrap_err();
        assert!(matches!(err, ClassifierError::MalformedResponse(_)));
    }

    #[test]
    fn test_wrongly_typed_plant_id_is_malformed() {
        let body = br#"{ "plant_id": 37, "probability": 0.5 }"#;
        let err = parse_prediction_response(200, body).unwrap_err();
        assert!(matches!(err, ClassifierError::MalformedResponse(_)));
    }

    #[test]
    fn test_non_2xx_is_service_error_regardless_of_body() {
        let body = br#"{ "plant_id": "37", "probability": 0.92 }"#;
        let err = parse_prediction_response(500, body).unwrap_err();
        match err {
            ClassifierError::Service { status, .. } => assert_eq!(status, 500),
            other => panic!("expected Service, got {:?}", other),
        }
    }

    #[test]
    fn test_service_error_carries_message() {
        let err = parse_prediction_response(503, b"model warming up\n").unwrap_err();
        match err {
            ClassifierError::Service { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "model warming up");
            }
            other => panic!("expected Service, got {:?}", other),
        }
    }

    #[test]
    fn test_boundary_probabilities_are_valid() {
        let zero = parse_prediction_response(200, br#"{ "plant_id": "1", "probability": 0.0 }"#);
        assert!(zero.is_ok());
        let one = parse_prediction_response(200, br#"{ "plant_id": "1", "probability": 1.0 }"#);
        assert!(one.is_ok());
    }
}
