//! Per-region ONNX feature extractors.
//!
//! Each region has an independently trained backbone exported to ONNX with
//! the classification head replaced by an embedding projection. Graphs are
//! loaded once at startup and are read-only afterwards, so one extractor
//! can serve concurrent requests without locking.

use std::{
    collections::BTreeMap,
    fmt::{self, Write},
    path::Path,
};

use anyhow::{Context, Result};
use log::{debug, warn};
use tract_onnx::prelude::{
    Framework, Graph, InferenceModelExt, IntoTensor, SimplePlan, Tensor, TypedFact, TypedOp, tvec,
};

use bonescan_utils::timing_guard;

use crate::regions::{CANONICAL_REGIONS, Region};

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Length of the embedding vector each extractor produces.
pub const EMBEDDING_DIM: usize = 256;

/// Anything that can turn a preprocessed tensor into a fixed-length embedding.
///
/// The production implementation is [`RegionExtractor`]; tests inject
/// stubs to exercise the orchestration path without ONNX artifacts.
pub trait Embedder: Send + Sync + fmt::Debug {
    /// Produce the embedding for one preprocessed region image.
    fn embed(&self, input: &Tensor) -> Result<Vec<f32>>;
}

/// Wrapper around one region's runnable ONNX graph.
#[derive(Debug)]
pub struct RegionExtractor {
    runnable: RunnableModel,
    region: Region,
}

impl RegionExtractor {
    /// Load and optimize the extractor graph for a region.
    ///
    /// A graph that fails optimized loading falls back to the decluttered
    /// form (~2x slower) rather than refusing to start.
    pub fn load<P: AsRef<Path>>(model_path: P, region: Region) -> Result<Self> {
        let path = model_path.as_ref();
        anyhow::ensure!(
            path.exists(),
            "extractor weights for {region} not found: {}",
            path.display()
        );

        let runnable = match load_runnable_model(path, true) {
            Ok(model) => {
                debug!("extractor for {region} optimized successfully");
                model
            }
            Err(opt_err) => {
                let optimize_msg = format!("{opt_err}");
                let mut chain_msg = String::new();
                for cause in opt_err.chain() {
                    let _ = writeln!(&mut chain_msg, "  - {cause}");
                }
                warn!(
                    "extractor for {region} failed optimized load ({}); falling back to decluttered graph.\nError chain:\n{}",
                    optimize_msg,
                    chain_msg.trim_end()
                );
                load_runnable_model(path, false).with_context(|| {
                    format!(
                        "fallback to decluttered graph for {region} failed after optimize error: {optimize_msg}"
                    )
                })?
            }
        };

        Ok(Self { runnable, region })
    }

    /// Run the graph and return all raw outputs.
    fn run(&self, input: &Tensor) -> Result<Vec<Tensor>> {
        let outputs = self
            .runnable
            .run(tvec![input.clone().into()])
            .map_err(|e| anyhow::anyhow!("extractor for {} failed: {e}", self.region))?;
        Ok(outputs
            .into_iter()
            .map(|value| value.into_tensor())
            .collect())
    }

    /// Two-class logits, available when the exported graph kept its
    /// classification head as a second output.
    pub fn logits(&self, input: &Tensor) -> Result<[f32; 2]> {
        let outputs = self.run(input)?;
        let logits = outputs.get(1).ok_or_else(|| {
            anyhow::anyhow!(
                "extractor for {} exposes no classification output",
                self.region
            )
        })?;
        let slice = logits
            .as_slice::<f32>()
            .map_err(|e| anyhow::anyhow!("logit output not f32: {e}"))?;
        anyhow::ensure!(
            slice.len() == 2,
            "expected 2 logits from {}, got {}",
            self.region,
            slice.len()
        );
        Ok([slice[0], slice[1]])
    }
}

impl Embedder for RegionExtractor {
    fn embed(&self, input: &Tensor) -> Result<Vec<f32>> {
        let _guard = timing_guard("bonescan_core::embed", log::Level::Debug);
        let mut outputs = self.run(input)?;
        anyhow::ensure!(
            !outputs.is_empty(),
            "extractor for {} produced no outputs",
            self.region
        );
        let embedding = outputs.swap_remove(0);
        let slice = embedding
            .as_slice::<f32>()
            .map_err(|e| anyhow::anyhow!("embedding output not f32: {e}"))?;
        anyhow::ensure!(
            slice.len() == EMBEDDING_DIM,
            "embedding from {} has length {}, expected {}",
            self.region,
            slice.len(),
            EMBEDDING_DIM
        );
        Ok(slice.to_vec())
    }
}

fn load_runnable_model(path: &Path, optimized: bool) -> Result<RunnableModel> {
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?;

    if optimized {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize extractor graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make extractor graph runnable: {e}"))
    } else {
        model
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check extractor graph: {e}"))?
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter extractor graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make extractor graph runnable: {e}"))
    }
}

/// One embedder per canonical region, loaded once at startup.
#[derive(Debug)]
pub struct ExtractorBank {
    extractors: BTreeMap<Region, Box<dyn Embedder>>,
}

impl ExtractorBank {
    /// Load every region's extractor from `<model_dir>/resnet34_<label>_best.onnx`.
    ///
    /// A missing or corrupt weights file for any region is a fatal error.
    pub fn load<P: AsRef<Path>>(model_dir: P) -> Result<Self> {
        let model_dir = model_dir.as_ref();
        let mut extractors: BTreeMap<Region, Box<dyn Embedder>> = BTreeMap::new();
        for region in CANONICAL_REGIONS {
            let path = model_dir.join(format!("resnet34_{}_best.onnx", region.label()));
            let extractor = RegionExtractor::load(&path, region)
                .with_context(|| format!("failed to load extractor for region {region}"))?;
            extractors.insert(region, Box::new(extractor));
        }
        Ok(Self { extractors })
    }

    /// Assemble a bank from preexisting embedders; all six regions are required.
    pub fn from_parts(extractors: BTreeMap<Region, Box<dyn Embedder>>) -> Result<Self> {
        for region in CANONICAL_REGIONS {
            anyhow::ensure!(
                extractors.contains_key(&region),
                "extractor bank is missing region {region}"
            );
        }
        Ok(Self { extractors })
    }

    /// Produce the embedding for one region's preprocessed image.
    pub fn embed(&self, region: Region, input: &Tensor) -> Result<Vec<f32>> {
        let extractor = self
            .extractors
            .get(&region)
            .ok_or_else(|| anyhow::anyhow!("no extractor loaded for region {region}"))?;
        extractor.embed(input)
    }
}
