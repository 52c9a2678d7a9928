//! The most commonly used types, re-exported for convenient glob imports.

pub use crate::config::{Deployment, ModelManifest, Normalization, PipelineConfig};
pub use crate::error::{ClassifierError, Result};
pub use crate::gate::ConfidenceGate;
pub use crate::labels::ClassLabelMap;
pub use crate::model::{Device, ModelHandle, ModelStore};
pub use crate::pipeline::{
    ClassificationOutcome, ClassificationPipeline, Identification, PhotoSource,
};
pub use crate::processor::{ImagePreprocessor, ImageProcessor};
pub use crate::remote::{RemoteClassifier, RemotePrediction};
