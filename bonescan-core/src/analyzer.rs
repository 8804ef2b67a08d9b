//! Request orchestration: region lookup, feature extraction, fusion.
//!
//! A [`ScanAnalyzer`] is built once at startup and holds only read-only
//! state (loaded models, preprocessing dimensions, the region image root),
//! so a single instance can be shared by reference across concurrent
//! requests.

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::info;
use serde::Serialize;
use thiserror::Error;

use bonescan_utils::timing_guard;

use crate::classifier::{FusionClassifier, PredictError};
use crate::extractor::{EMBEDDING_DIM, ExtractorBank};
use crate::preprocess::{PreprocessConfig, preprocess_image};
use crate::regions::{CANONICAL_REGIONS, Region, locate_region_images};

/// Why an analysis request failed.
///
/// Client-class variants describe problems with the request's inputs;
/// everything else is a server-side inference failure.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("could not find corresponding region images")]
    NoRegionImages,
    #[error("missing region image: {0}")]
    MissingRegion(Region),
    #[error("failed to preprocess {region} image: {source}")]
    Preprocess {
        region: Region,
        source: anyhow::Error,
    },
    #[error("feature extraction failed for {region}: {source}")]
    Extraction {
        region: Region,
        source: anyhow::Error,
    },
    #[error("prediction failed: {0}")]
    Classification(#[from] PredictError),
}

impl AnalyzeError {
    /// Whether the failure was caused by the request's inputs rather than
    /// the inference stack. Drives the HTTP status mapping.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AnalyzeError::NoRegionImages | AnalyzeError::MissingRegion(_)
        )
    }
}

/// Final two-class prediction for one scan.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Prediction {
    /// Mirrors `probability_positive`, kept for response compatibility.
    pub prediction: f64,
    pub probability_negative: f64,
    pub probability_positive: f64,
}

impl Prediction {
    fn from_probabilities(probabilities: [f64; 2]) -> Self {
        Self {
            prediction: probabilities[1],
            probability_negative: probabilities[0],
            probability_positive: probabilities[1],
        }
    }

    /// Binary label: positive iff the positive-class probability exceeds 0.5.
    pub fn is_positive(&self) -> bool {
        self.probability_positive > 0.5
    }
}

/// Result of a successful analysis, including the crops that were evaluated.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub prediction: Prediction,
    /// Resolved crop paths in canonical region order.
    pub regions: Vec<(Region, PathBuf)>,
}

/// Couples the loaded models with preprocessing settings and the region
/// image root. The main entry point for running inference.
#[derive(Debug)]
pub struct ScanAnalyzer {
    bank: ExtractorBank,
    classifier: FusionClassifier,
    preprocess: PreprocessConfig,
    region_root: PathBuf,
}

impl ScanAnalyzer {
    /// Load every model artifact from `model_dir` and assemble an analyzer.
    ///
    /// Any missing or invalid artifact is a fatal startup error.
    pub fn load<P: AsRef<Path>, Q: AsRef<Path>>(
        model_dir: P,
        region_root: Q,
        preprocess: PreprocessConfig,
    ) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        let bank = ExtractorBank::load(model_dir)?;
        let classifier = FusionClassifier::load(model_dir.join("mSegResRF_SPECT_final.json"))?;
        anyhow::ensure!(
            classifier.n_features() == CANONICAL_REGIONS.len() * EMBEDDING_DIM,
            "classifier expects {} features but {} regions x {} embedding dims = {}",
            classifier.n_features(),
            CANONICAL_REGIONS.len(),
            EMBEDDING_DIM,
            CANONICAL_REGIONS.len() * EMBEDDING_DIM
        );
        Ok(Self::from_parts(bank, classifier, preprocess, region_root))
    }

    /// Assemble an analyzer from preloaded components.
    pub fn from_parts<Q: AsRef<Path>>(
        bank: ExtractorBank,
        classifier: FusionClassifier,
        preprocess: PreprocessConfig,
        region_root: Q,
    ) -> Self {
        Self {
            bank,
            classifier,
            preprocess,
            region_root: region_root.as_ref().to_path_buf(),
        }
    }

    /// Run the full inference pipeline for one uploaded filename.
    ///
    /// All six canonical regions are mandatory; the check happens before
    /// any extractor is invoked, and there is no partial inference. Any
    /// failure aborts the whole request.
    pub fn analyze(&self, uploaded_filename: &str) -> Result<Analysis, AnalyzeError> {
        let _guard = timing_guard("bonescan_core::analyze", log::Level::Debug);
        info!("analyzing scan '{uploaded_filename}'");

        let located = locate_region_images(&self.region_root, uploaded_filename);
        if located.is_empty() {
            return Err(AnalyzeError::NoRegionImages);
        }
        for region in CANONICAL_REGIONS {
            if !located.contains_key(&region) {
                return Err(AnalyzeError::MissingRegion(region));
            }
        }

        let mut combined = Vec::with_capacity(CANONICAL_REGIONS.len() * EMBEDDING_DIM);
        let mut regions = Vec::with_capacity(CANONICAL_REGIONS.len());
        for region in CANONICAL_REGIONS {
            let path = &located[&region];
            let tensor = preprocess_image(path, &self.preprocess)
                .map_err(|source| AnalyzeError::Preprocess { region, source })?;
            let embedding = self
                .bank
                .embed(region, &tensor)
                .map_err(|source| AnalyzeError::Extraction { region, source })?;
            combined.extend_from_slice(&embedding);
            regions.push((region, path.clone()));
        }

        let probabilities = self.classifier.predict_proba(&combined)?;
        let prediction = Prediction::from_probabilities(probabilities);
        info!(
            "scan '{uploaded_filename}' predicted positive probability {:.4}",
            prediction.probability_positive
        );

        Ok(Analysis { prediction, regions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prediction_mirrors_positive_probability() {
        let prediction = Prediction::from_probabilities([0.3, 0.7]);
        assert_eq!(prediction.prediction, prediction.probability_positive);
        assert!(prediction.is_positive());

        let prediction = Prediction::from_probabilities([0.6, 0.4]);
        assert!(!prediction.is_positive());
    }

    #[test]
    fn client_errors_are_classified() {
        assert!(AnalyzeError::NoRegionImages.is_client_error());
        assert!(AnalyzeError::MissingRegion(Region::KneeLeftAnt).is_client_error());
        assert!(
            !AnalyzeError::Classification(PredictError::FeatureDimensionMismatch {
                expected: 1536,
                actual: 256,
            })
            .is_client_error()
        );
    }
}
