use crate::error::{ClassifierError, Result};
use crate::model::Device;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

/// Default confidence threshold applied when a config omits one.
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Default deadline for remote prediction requests.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// The pixel-value convention the deployed model was trained with.
///
/// This is a training-time decision baked into the model manifest. Mixing
/// conventions between preprocessing and training degrades accuracy without
/// raising an error, so the convention travels with the model artifacts
/// rather than being chosen at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Scale `0..=255` into `[0, 1]`.
    ZeroToOne,
    /// Scale `0..=255` into `[-1, 1]`.
    MinusOneToOne,
}

impl Normalization {
    /// Scales a single 8-bit channel value into the trained range.
    pub fn scale(self, value: u8) -> f32 {
        match self {
            Normalization::ZeroToOne => value as f32 / 255.0,
            Normalization::MinusOneToOne => value as f32 / 255.0 * 2.0 - 1.0,
        }
    }
}

/// A single binary weight shard declared by the model manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightShard {
    /// File name, relative to the manifest's directory.
    pub file: String,
    /// Expected size in bytes. A mismatch means a truncated or corrupt shard.
    pub bytes: u64,
}

/// Descriptor for a deployed model: the graph file, its weight shards, and
/// the preprocessing contract the model was trained with.
///
/// All artifacts named here must be present and consistent for
/// [`crate::model::ModelStore::ensure_loaded`] to succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    /// The ONNX graph file, relative to the manifest's directory.
    pub graph: String,
    /// External weight shards referenced by the graph, if any.
    #[serde(default)]
    pub weight_shards: Vec<WeightShard>,
    /// Trained input resolution; the model accepts square
    /// `[1, input_size, input_size, 3]` tensors.
    pub input_size: u32,
    /// Pixel normalization convention the model was trained with.
    pub normalization: Normalization,
    /// Number of classes in the output distribution, when declared.
    #[serde(default)]
    pub num_classes: Option<usize>,
}

impl ModelManifest {
    /// Loads a manifest from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ClassifierError::ModelLoad(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            ClassifierError::ModelLoad(format!("cannot parse manifest {}: {}", path.display(), e))
        })
    }
}

/// Which inference topology the pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Deployment {
    /// In-process inference from local model artifacts.
    Local {
        /// Path to the model manifest JSON.
        manifest: PathBuf,
        /// Execution providers to initialize the runtime with.
        #[serde(default = "default_devices")]
        devices: Vec<Device>,
    },
    /// Inference delegated to a remote prediction service.
    Remote {
        /// Base URL of the service; the adapter posts to `<endpoint>/predict`.
        endpoint: String,
        /// Hard deadline for a prediction request, in seconds.
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT.as_secs()
}

fn default_devices() -> Vec<Device> {
    Device::cpu()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

/// Top-level pipeline configuration, selecting the deployment topology and
/// the shared label map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Path to the class-index-to-taxon JSON mapping.
    pub labels: PathBuf,
    /// Confidence threshold for accepting a prediction.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    /// Local or remote inference.
    pub deployment: Deployment,
}

impl PipelineConfig {
    /// Loads a pipeline configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ClassifierError::Config(format!("cannot read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            ClassifierError::Config(format!("cannot parse config {}: {}", path.display(), e))
        })
    }
}
