//! This module provides the high-level `ClassificationPipeline`.
//!
//! The pipeline runs the stages of a classification request in strict
//! order: fetch photo -> preprocess -> infer -> resolve label -> gate
//! confidence. The two deployment topologies (in-process model, remote
//! prediction service) sit behind the same pipeline type and produce the
//! same result contract, selected by [`PipelineConfig`].
//!
//! Each request is an independent asynchronous unit of work; the only
//! cross-request synchronization is the single-flight model load inside
//! [`ModelStore`]. Cancellation is honored between stages; a stage that has
//! started (in particular the forward pass) runs to completion.

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Deployment, ModelManifest, PipelineConfig};
use crate::error::{ClassifierError, Result};
use crate::gate::ConfidenceGate;
use crate::labels::{argmax, ClassLabelMap};
use crate::model::ModelStore;
use crate::processor::{decode_oriented, ImagePreprocessor, ImageProcessor};
use crate::remote::RemoteClassifier;

/// A photo reference entering the pipeline: a file on disk or bytes already
/// in memory.
#[derive(Debug, Clone)]
pub enum PhotoSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl PhotoSource {
    /// Reads the referenced photo's compressed bytes.
    pub async fn fetch(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            PhotoSource::Path(path) => tokio::fs::read(path).await.map(Cow::Owned).map_err(|e| {
                ClassifierError::ImageFetch(format!("{}: {}", path.display(), e))
            }),
            PhotoSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
        }
    }
}

/// The outcome of one classification request.
///
/// `species_name` is `None` when the class identifier has no entry in the
/// label map; that is a distinct, reportable condition, never silently
/// papered over with a placeholder string.
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    /// The predicted class identifier.
    pub class_id: String,
    /// Display-formatted species name, if the identifier resolved.
    pub species_name: Option<String>,
    /// Raw top-class confidence in `[0, 1]`, surfaced regardless of the
    /// gate's decision.
    pub confidence: f32,
}

/// Terminal state of a classification request that produced a prediction.
///
/// Low confidence is not an error: both variants carry the full
/// [`Identification`], the gate merely decides whether the caller should
/// trust it or prompt for a retake.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassificationOutcome {
    Accepted(Identification),
    RejectedLowConfidence(Identification),
}

impl ClassificationOutcome {
    /// Applies the gate's accept/reject policy to a prediction.
    pub fn from_gate(gate: &ConfidenceGate, identification: Identification) -> Self {
        if gate.accept(identification.confidence) {
            ClassificationOutcome::Accepted(identification)
        } else {
            ClassificationOutcome::RejectedLowConfidence(identification)
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ClassificationOutcome::Accepted(_))
    }

    /// The prediction, whichever way the gate decided.
    pub fn identification(&self) -> &Identification {
        match self {
            ClassificationOutcome::Accepted(identification) => identification,
            ClassificationOutcome::RejectedLowConfidence(identification) => identification,
        }
    }

    pub fn into_identification(self) -> Identification {
        match self {
            ClassificationOutcome::Accepted(identification) => identification,
            ClassificationOutcome::RejectedLowConfidence(identification) => identification,
        }
    }
}

#[derive(Debug)]
enum Backend {
    Local {
        store: ModelStore,
        preprocessor: ImagePreprocessor,
    },
    Remote(RemoteClassifier),
}

/// An end-to-end pipeline for species classification from photos.
#[derive(Debug)]
pub struct ClassificationPipeline {
    backend: Backend,
    labels: Arc<ClassLabelMap>,
    gate: ConfidenceGate,
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(ClassifierError::Cancelled)
    } else {
        Ok(())
    }
}

impl ClassificationPipeline {
    /// Builds a pipeline from a [`PipelineConfig`], loading the label map
    /// and (for local deployments) the model manifest and the configured
    /// execution providers. Model weights load lazily on the first request.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let labels = ClassLabelMap::load(&config.labels)?;
        let gate = ConfidenceGate::new(config.threshold);
        match &config.deployment {
            Deployment::Local { manifest, devices } => {
                crate::model::init(devices.clone())?;
                Self::local_with_gate(manifest.clone(), labels, gate)
            }
            Deployment::Remote {
                endpoint,
                timeout_secs,
            } => Self::remote_with_gate(
                endpoint.clone(),
                Duration::from_secs(*timeout_secs),
                labels,
                gate,
            ),
        }
    }

    /// Creates a pipeline running local inference from manifest-declared
    /// artifacts, with the default confidence threshold.
    pub fn local<P: Into<PathBuf>>(manifest_path: P, labels: ClassLabelMap) -> Result<Self> {
        Self::local_with_gate(manifest_path.into(), labels, ConfidenceGate::default())
    }

    fn local_with_gate(
        manifest_path: PathBuf,
        labels: ClassLabelMap,
        gate: ConfidenceGate,
    ) -> Result<Self> {
        let manifest = ModelManifest::load(&manifest_path)?;
        let preprocessor = ImagePreprocessor::from_manifest(&manifest);
        let dir = manifest_path
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .to_path_buf();
        let store = ModelStore::new(manifest, dir);
        Ok(Self {
            backend: Backend::Local {
                store,
                preprocessor,
            },
            labels: Arc::new(labels),
            gate,
        })
    }

    /// Creates a pipeline delegating inference to a remote prediction
    /// service, with the default confidence threshold.
    pub fn remote(
        endpoint: impl Into<String>,
        timeout: Duration,
        labels: ClassLabelMap,
    ) -> Result<Self> {
        Self::remote_with_gate(endpoint.into(), timeout, labels, ConfidenceGate::default())
    }

    fn remote_with_gate(
        endpoint: String,
        timeout: Duration,
        labels: ClassLabelMap,
        gate: ConfidenceGate,
    ) -> Result<Self> {
        Ok(Self {
            backend: Backend::Remote(RemoteClassifier::new(endpoint, timeout)?),
            labels: Arc::new(labels),
            gate,
        })
    }

    /// The confidence gate in effect.
    pub fn gate(&self) -> ConfidenceGate {
        self.gate
    }

    /// The shared label map.
    pub fn labels(&self) -> &ClassLabelMap {
        &self.labels
    }

    /// Classifies a photo. `from_front_camera` mirrors the image before
    /// inference, since front cameras store unmirrored pixels for a
    /// mirrored preview.
    pub async fn identify(
        &self,
        photo: &PhotoSource,
        from_front_camera: bool,
    ) -> Result<ClassificationOutcome> {
        self.identify_cancellable(photo, from_front_camera, &CancellationToken::new())
            .await
    }

    /// Classifies a photo, honoring `cancel` between pipeline stages. A
    /// remote request in flight is aborted immediately; a local forward
    /// pass that has started runs to completion.
    pub async fn identify_cancellable(
        &self,
        photo: &PhotoSource,
        from_front_camera: bool,
        cancel: &CancellationToken,
    ) -> Result<ClassificationOutcome> {
        ensure_not_cancelled(cancel)?;
        let bytes = photo.fetch().await?;
        ensure_not_cancelled(cancel)?;

        let (class_id, confidence) = match &self.backend {
            Backend::Local {
                store,
                preprocessor,
            } => {
                let handle = store.ensure_loaded().await?;
                ensure_not_cancelled(cancel)?;

                let tensor = {
                    let bytes = bytes.into_owned();
                    let preprocessor = preprocessor.clone();
                    tokio::task::spawn_blocking(move || {
                        let image = decode_oriented(&bytes)?;
                        Ok::<_, ClassifierError>(preprocessor.process(&image, from_front_camera))
                    })
                    .await
                    .map_err(|e| {
                        ClassifierError::Inference(format!("preprocessing task failed: {}", e))
                    })??
                };
                ensure_not_cancelled(cancel)?;

                let probs = {
                    let handle = Arc::clone(&handle);
                    tokio::task::spawn_blocking(move || handle.predict(tensor))
                        .await
                        .map_err(|e| {
                            ClassifierError::Inference(format!("inference task failed: {}", e))
                        })??
                };

                let (index, confidence) = argmax(&probs).ok_or_else(|| {
                    ClassifierError::Inference("model produced an empty distribution".to_string())
                })?;
                debug!(index, confidence, "local prediction");

                let class_id = match self.labels.class_id(index) {
                    Some(id) => id.to_string(),
                    None => {
                        warn!(index, "model output index has no class identifier");
                        index.to_string()
                    }
                };
                (class_id, confidence)
            }
            Backend::Remote(remote) => {
                let prediction = tokio::select! {
                    _ = cancel.cancelled() => return Err(ClassifierError::Cancelled),
                    result = remote.predict(&bytes) => result?,
                };
                debug!(
                    plant_id = %prediction.plant_id,
                    probability = prediction.probability,
                    "remote prediction"
                );
                (prediction.plant_id, prediction.probability)
            }
        };
        ensure_not_cancelled(cancel)?;

        let species_name = match self.labels.resolve(&class_id) {
            Ok(name) => Some(name),
            Err(e) => {
                warn!(class_id = %class_id, error = %e, "species name resolution failed");
                None
            }
        };

        let identification = Identification {
            class_id,
            species_name,
            confidence,
        };
        Ok(ClassificationOutcome::from_gate(&self.gate, identification))
    }
}
