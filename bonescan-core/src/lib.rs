//! Core bone scan inference primitives.
//!
//! This crate resolves per-region crop images by naming convention,
//! preprocesses them into tensors, runs region-specific ONNX feature
//! extractors with `tract-onnx`, and fuses the resulting embeddings
//! through a serialized random-forest classifier.

/// Request orchestration: regions -> features -> prediction.
pub mod analyzer;
/// Fusion classifier artifact loading and probability prediction.
pub mod classifier;
/// Per-region ONNX feature extractors.
pub mod extractor;
/// Image pre-processing (resize, center crop, normalization).
pub mod preprocess;
/// Region identifiers and filesystem lookup.
pub mod regions;

pub use analyzer::{Analysis, AnalyzeError, Prediction, ScanAnalyzer};
pub use classifier::{FusionClassifier, PredictError, ResolveError};
pub use extractor::{EMBEDDING_DIM, Embedder, ExtractorBank, RegionExtractor};
pub use preprocess::{
    IMAGENET_MEAN, IMAGENET_STD, PreprocessConfig, preprocess_dynamic_image, preprocess_image,
};
pub use regions::{
    CANONICAL_REGIONS, EXTENSION_PRIORITY, Region, locate_region_images, resolve_region_image,
};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
