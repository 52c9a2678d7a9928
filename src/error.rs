//! # Error Handling
//!
//! This module defines the error taxonomy for the `chloris` library.
//!
//! Every failure the pipeline can produce is a distinct `ClassifierError`
//! variant, so callers can choose differentiated handling (ask for a new
//! photo, check connectivity, report a deployment defect) instead of
//! pattern-matching on strings. A below-threshold prediction is not an
//! error; it is a normal [`crate::pipeline::ClassificationOutcome`].

use std::time::Duration;

use thiserror::Error;

/// A convenient result alias used throughout the library.
pub type Result<T, E = ClassifierError> = std::result::Result<T, E>;

/// All failures that can surface from the classification pipeline.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Model artifacts are missing, corrupt, or inconsistent with the
    /// manifest. Fatal for local inference until the deployment is fixed.
    #[error("model load failed: {0}")]
    ModelLoad(String),

    /// The photo reference could not be read (e.g. a dangling path).
    #[error("failed to read photo: {0}")]
    ImageFetch(String),

    /// The photo bytes are not a decodable image.
    #[error("failed to decode image: {0}")]
    ImageDecode(String),

    /// The tensor did not match the loaded model's input contract, or the
    /// forward pass itself failed. A deployment defect, not a user error.
    #[error("inference failed: {0}")]
    Inference(String),

    /// A class identifier with no entry in the label map. Non-fatal: the
    /// pipeline reports it and returns a result without a species name.
    #[error("no label for class {0}")]
    UnknownClass(String),

    /// The remote prediction request exceeded its deadline.
    #[error("prediction request timed out after {0:?}")]
    Timeout(Duration),

    /// The remote prediction service could not be reached.
    #[error("could not reach prediction service: {0}")]
    Connectivity(String),

    /// The remote prediction service answered with a non-2xx status.
    #[error("prediction service returned status {status}: {message}")]
    Service { status: u16, message: String },

    /// The remote response did not conform to the wire contract.
    #[error("malformed prediction response: {0}")]
    MalformedResponse(String),

    /// The caller requested cancellation before the pipeline finished.
    #[error("classification was cancelled")]
    Cancelled,

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}
