//! # Chloris
//!
//! Chloris is a library for identifying plant species from photos using an
//! image-classification model. It provides one pipeline with two
//! interchangeable deployment topologies: a fully local path (ONNX model,
//! tensor preprocessing, in-process inference) and a remote path that
//! uploads the photo to a prediction service over HTTP.
//!
//! ## Features
//!
//! - **High-level API**: a `ClassificationPipeline` for end-to-end
//!   photo-to-species identification.
//! - **ONNX Runtime**: powered by `ort` for efficient, cross-platform local
//!   inference, with single-flight model loading.
//! - **Execution providers**: CPU by default; CUDA, TensorRT, and CoreML
//!   behind cargo features.
//! - **Preprocessing**: EXIF orientation correction, bilinear resizing,
//!   front-camera mirroring, and configurable pixel normalization.
//! - **Confidence gating**: below-threshold predictions are a normal,
//!   fully-populated outcome rather than an error.
//!
//! ## Modules
//!
//! - `pipeline`: the main entry point for classifying photos.
//! - `model`: model lifecycle and the ONNX session wrapper.
//! - `processor`: photo-to-tensor preprocessing.
//! - `labels`: the class-index-to-taxon mapping and name formatting.
//! - `gate`: the confidence accept/reject policy.
//! - `remote`: the HTTP adapter for server-side inference.
//! - `config`: pipeline configuration and the model manifest.
//! - `error`: the error taxonomy for the library.
//! - `prelude`: a collection of the most commonly used types.

pub mod config;
pub mod error;
pub mod gate;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod prelude;
pub mod processor;
pub mod remote;
