//! This module owns the model lifecycle and the forward pass.
//!
//! `ModelStore` provides load-once, single-flight access to a deployed
//! model: concurrent first callers share one in-flight weight load and all
//! receive the same `ModelHandle`. The handle wraps an ONNX Runtime session
//! and is read-only after load; inference is a pure function of the handle
//! and an input tensor.
//!
//! The `Device` enum selects the execution provider (CPU by default, CUDA /
//! TensorRT / CoreML behind cargo features).

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ndarray::{Array, Ix4};
use ort::{execution_providers::CPUExecutionProvider, session::Session, value::Tensor};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;

#[cfg(feature = "coreml")]
use ort::execution_providers::CoreMLExecutionProvider;

use crate::config::ModelManifest;
use crate::error::{ClassifierError, Result};

/// Execution device the runtime is initialized against.
///
/// Deserializable so a [`crate::config::PipelineConfig`] can select
/// providers for a local deployment (`"cpu"`, or e.g. `{"cuda": 0}` with
/// the matching cargo feature).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Plain CPU inference.
    Cpu,
    /// CUDA execution provider on one GPU.
    #[cfg(feature = "cuda")]
    Cuda(i32),
    /// TensorRT execution provider on one GPU.
    #[cfg(feature = "tensorrt")]
    TensorRT(i32),
    /// CoreML execution provider on macOS.
    #[cfg(feature = "coreml")]
    CoreML,
}

impl Device {
    /// CPU-only provider list, the default for local deployments.
    pub fn cpu() -> Vec<Self> {
        vec![Self::Cpu]
    }

    /// Provider list targeting the given CUDA device ids.
    #[cfg(feature = "cuda")]
    pub fn cuda_devices(device_ids: Vec<i32>) -> Vec<Self> {
        device_ids.into_iter().map(Self::Cuda).collect()
    }

    /// Provider list targeting the given GPUs through TensorRT.
    #[cfg(feature = "tensorrt")]
    pub fn tensorrt_devices(device_ids: Vec<i32>) -> Vec<Self> {
        device_ids.into_iter().map(Self::TensorRT).collect()
    }

    /// CoreML provider list for macOS hosts.
    #[cfg(feature = "coreml")]
    pub fn coreml() -> Vec<Self> {
        vec![Self::CoreML]
    }
}

/// Initializes the ONNX Runtime with a list of execution providers.
///
/// Call once before loading any model; subsequent model loads reuse the
/// committed environment.
pub fn init(devices: Vec<Device>) -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut providers = Vec::new();
    for device in devices {
        let provider = match device {
            Device::Cpu => CPUExecutionProvider::default().build(),
            #[cfg(feature = "cuda")]
            Device::Cuda(device_id) => CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .with_unified_memory(true)
                .build(),
            #[cfg(feature = "tensorrt")]
            Device::TensorRT(device_id) => TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            #[cfg(feature = "coreml")]
            Device::CoreML => CoreMLExecutionProvider::default().build(),
        };
        providers.push(provider);
    }

    ort::init()
        .with_execution_providers(providers)
        .commit()
        .map_err(|e| ClassifierError::ModelLoad(e.to_string()))?;
    Ok(())
}

/// Checks that every artifact the manifest declares is present and has the
/// declared size, so a missing or truncated shard fails here with a precise
/// message instead of deep inside the runtime.
pub(crate) fn validate_artifacts(manifest: &ModelManifest, dir: &Path) -> Result<()> {
    let graph_path = dir.join(&manifest.graph);
    if !graph_path.is_file() {
        return Err(ClassifierError::ModelLoad(format!(
            "graph file {} is missing",
            graph_path.display()
        )));
    }
    for shard in &manifest.weight_shards {
        let shard_path = dir.join(&shard.file);
        let metadata = std::fs::metadata(&shard_path).map_err(|_| {
            ClassifierError::ModelLoad(format!(
                "weight shard {} is missing",
                shard_path.display()
            ))
        })?;
        if metadata.len() != shard.bytes {
            return Err(ClassifierError::ModelLoad(format!(
                "weight shard {} has {} bytes, manifest declares {}",
                shard_path.display(),
                metadata.len(),
                shard.bytes
            )));
        }
    }
    Ok(())
}

/// A loaded model: the runtime session plus its resolved I/O contract.
///
/// Created once by [`ModelStore`], shared read-only across concurrent
/// requests. The session sits behind a mutex because the runtime borrows it
/// mutably during a run; the weights and graph are never modified.
#[derive(Debug)]
pub struct ModelHandle {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    input_size: u32,
    num_classes: Option<usize>,
}

impl ModelHandle {
    /// Assembles a runnable session from manifest-declared artifacts.
    pub fn load(manifest: &ModelManifest, dir: &Path) -> Result<Self> {
        validate_artifacts(manifest, dir)?;

        let graph_path = dir.join(&manifest.graph);
        info!(graph = %graph_path.display(), "loading classification model");

        let threads = num_cpus::get();
        let session = Session::builder()
            .and_then(|b| b.with_parallel_execution(true))
            .and_then(|b| b.with_inter_threads(1))
            .and_then(|b| b.with_intra_threads(threads))
            .and_then(|b| b.commit_from_file(&graph_path))
            .map_err(|e| ClassifierError::ModelLoad(e.to_string()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| ClassifierError::ModelLoad("model has no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ClassifierError::ModelLoad("model has no outputs".to_string()))?;

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            input_size: manifest.input_size,
            num_classes: manifest.num_classes,
        })
    }

    /// Trained input resolution (square).
    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Runs the forward pass over a preprocessed `[1, H, W, 3]` tensor and
    /// returns the probability distribution over known classes.
    pub fn predict(&self, input_tensor: Array<f32, Ix4>) -> Result<Vec<f32>> {
        let size = self.input_size as usize;
        let expected = [1, size, size, 3];
        if input_tensor.shape() != expected {
            return Err(ClassifierError::Inference(format!(
                "input tensor shape {:?} does not match model input {:?}",
                input_tensor.shape(),
                expected
            )));
        }

        let input_tensor = Tensor::from_array(input_tensor)
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| ClassifierError::Inference("model session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => input_tensor])
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let preds = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;

        let probs: Vec<f32> = preds.iter().copied().collect();
        if let Some(num_classes) = self.num_classes {
            if probs.len() != num_classes {
                return Err(ClassifierError::Inference(format!(
                    "model produced {} classes, manifest declares {}",
                    probs.len(),
                    num_classes
                )));
            }
        }
        debug!(classes = probs.len(), "forward pass complete");
        Ok(probs)
    }
}

/// Coalesces concurrent initialization so exactly one caller performs the
/// underlying work and everyone receives the same shared value. Failed
/// initialization is not cached; a later caller may retry.
async fn coalesce<T, F, Fut>(cell: &OnceCell<Arc<T>>, init: F) -> Result<Arc<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<T>>>,
{
    let value = cell.get_or_try_init(init).await?;
    Ok(Arc::clone(value))
}

/// Lazily loads a model on first use and caches the handle for the life of
/// the store. Weight deserialization can block for a non-trivial one-time
/// duration, so it runs on the blocking pool and concurrent first callers
/// share a single in-flight load.
#[derive(Debug)]
pub struct ModelStore {
    manifest: ModelManifest,
    dir: PathBuf,
    cell: OnceCell<Arc<ModelHandle>>,
}

impl ModelStore {
    /// Creates a store for a parsed manifest; `dir` anchors the manifest's
    /// relative artifact paths.
    pub fn new(manifest: ModelManifest, dir: PathBuf) -> Self {
        Self {
            manifest,
            dir,
            cell: OnceCell::new(),
        }
    }

    /// Creates a store by reading a manifest file; artifacts resolve
    /// relative to the manifest's directory.
    pub fn from_manifest_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let manifest = ModelManifest::load(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Ok(Self::new(manifest, dir))
    }

    /// The manifest this store was built from.
    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    /// Returns the loaded handle, loading the model on first call.
    pub async fn ensure_loaded(&self) -> Result<Arc<ModelHandle>> {
        coalesce(&self.cell, || {
            let manifest = self.manifest.clone();
            let dir = self.dir.clone();
            async move {
                let handle = tokio::task::spawn_blocking(move || ModelHandle::load(&manifest, &dir))
                    .await
                    .map_err(|e| {
                        ClassifierError::ModelLoad(format!("model load task failed: {}", e))
                    })??;
                Ok(Arc::new(handle))
            }
        })
        .await
    }

    /// The handle, if a load has already completed.
    pub fn get(&self) -> Option<Arc<ModelHandle>> {
        self.cell.get().cloned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{Normalization, WeightShard};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manifest_with_shards(shards: Vec<WeightShard>) -> ModelManifest {
        ModelManifest {
            graph: "model.onnx".to_string(),
            weight_shards: shards,
            input_size: 224,
            normalization: Normalization::ZeroToOne,
            num_classes: None,
        }
    }

    #[test]
    fn test_init_cpu() {
        init(Device::cpu()).unwrap();
    }

    #[test]
    fn test_device_from_config_json() {
        let devices: Vec<Device> = serde_json::from_str(r#"["cpu"]"#).unwrap();
        assert_eq!(devices, vec![Device::Cpu]);
    }

    #[test]
    fn test_validate_missing_graph() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = manifest_with_shards(vec![]);
        let err = validate_artifacts(&manifest, dir.path()).unwrap_err();
        assert!(matches!(err, ClassifierError::ModelLoad(_)));
        assert!(err.to_string().contains("model.onnx"));
    }

    #[test]
    fn test_validate_missing_shard() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"graph").unwrap();
        let manifest = manifest_with_shards(vec![WeightShard {
            file: "model.onnx.data".to_string(),
            bytes: 4,
        }]);
        let err = validate_artifacts(&manifest, dir.path()).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_validate_shard_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"graph").unwrap();
        std::fs::write(dir.path().join("model.onnx.data"), b"xx").unwrap();
        let manifest = manifest_with_shards(vec![WeightShard {
            file: "model.onnx.data".to_string(),
            bytes: 4,
        }]);
        let err = validate_artifacts(&manifest, dir.path()).unwrap_err();
        assert!(err.to_string().contains("manifest declares 4"));
    }

    #[test]
    fn test_validate_consistent_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"graph").unwrap();
        std::fs::write(dir.path().join("model.onnx.data"), b"data").unwrap();
        let manifest = manifest_with_shards(vec![WeightShard {
            file: "model.onnx.data".to_string(),
            bytes: 4,
        }]);
        assert!(validate_artifacts(&manifest, dir.path()).is_ok());
    }

    #[tokio::test]
    async fn test_coalesce_single_flight() {
        let cell = Arc::new(OnceCell::<Arc<u32>>::new());
        let loads = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let loads = Arc::clone(&loads);
                tokio::spawn(async move {
                    coalesce(&cell, || {
                        let loads = Arc::clone(&loads);
                        async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok(Arc::new(7u32))
                        }
                    })
                    .await
                })
            })
            .collect();

        let handles: Vec<Arc<u32>> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let first = &handles[0];
        for handle in &handles {
            assert!(Arc::ptr_eq(first, handle));
        }
    }

    #[tokio::test]
    async fn test_coalesce_failed_init_retries() {
        let cell = OnceCell::<Arc<u32>>::new();
        let result = coalesce(&cell, || async {
            Err(ClassifierError::ModelLoad("boom".to_string()))
        })
        .await;
        assert!(result.is_err());

        // A failed load is not cached; the next caller gets to try again.
        let value = coalesce(&cell, || async { Ok(Arc::new(3u32)) }).await.unwrap();
        assert_eq!(*value, 3);
    }
}
