//! Region identifiers and filesystem lookup for per-region crop images.
//!
//! The six anatomical views and their order are a versioned contract of the
//! fusion classifier artifact: embeddings are concatenated in this order,
//! so changing the set or the order invalidates the trained classifier.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use log::{debug, warn};

/// One of the six anatomical views used for per-location feature extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    HeadAnt,
    ChestLeftAnt,
    ChestRightAnt,
    PelvisAnt,
    KneeLeftAnt,
    KneeRightAnt,
}

/// Canonical region order used when concatenating embeddings.
pub const CANONICAL_REGIONS: [Region; 6] = [
    Region::HeadAnt,
    Region::ChestLeftAnt,
    Region::ChestRightAnt,
    Region::PelvisAnt,
    Region::KneeLeftAnt,
    Region::KneeRightAnt,
];

/// Extension fallback order for region crop lookup; the first match wins.
pub const EXTENSION_PRIORITY: [&str; 5] = ["jpg", "png", "jpeg", "tif", "bmp"];

impl Region {
    /// Directory and artifact naming label for this region.
    pub fn label(self) -> &'static str {
        match self {
            Region::HeadAnt => "headANT",
            Region::ChestLeftAnt => "chestLANT",
            Region::ChestRightAnt => "chestRANT",
            Region::PelvisAnt => "pelvisANT",
            Region::KneeLeftAnt => "kneeLANT",
            Region::KneeRightAnt => "kneeRANT",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CANONICAL_REGIONS
            .into_iter()
            .find(|region| region.label() == s)
            .ok_or_else(|| format!("unknown region '{s}'"))
    }
}

/// Resolve a region crop by base name inside a region directory.
///
/// Tries each extension in `priority` order and returns the first file
/// that exists. Pure lookup: the only side effect is filesystem metadata
/// reads.
///
/// # Arguments
///
/// * `base_name` - The uploaded file's name without extension.
/// * `region_dir` - Directory holding crops for a single region.
/// * `priority` - Extension fallback order.
pub fn resolve_region_image(
    base_name: &str,
    region_dir: &Path,
    priority: &[&str],
) -> Option<PathBuf> {
    priority
        .iter()
        .map(|ext| region_dir.join(format!("{base_name}.{ext}")))
        .find(|candidate| candidate.exists())
}

/// Locate the region crops corresponding to an uploaded filename.
///
/// Derives the base name from `uploaded_filename` and probes
/// `<root>/<region-label>/<base>.<ext>` for every canonical region.
/// Regions with no matching file are simply absent from the returned map;
/// deciding whether that is an error is left to the caller.
///
/// # Arguments
///
/// * `root` - Root directory holding one subdirectory per region.
/// * `uploaded_filename` - Name of the uploaded whole-body scan file.
pub fn locate_region_images(root: &Path, uploaded_filename: &str) -> BTreeMap<Region, PathBuf> {
    let base_name = Path::new(uploaded_filename)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| uploaded_filename.to_string());
    debug!("looking up region crops for base name '{base_name}'");

    let mut found = BTreeMap::new();
    for region in CANONICAL_REGIONS {
        let region_dir = root.join(region.label());
        if !region_dir.is_dir() {
            warn!("region directory does not exist: {}", region_dir.display());
            continue;
        }
        match resolve_region_image(&base_name, &region_dir, &EXTENSION_PRIORITY) {
            Some(path) => {
                debug!("found crop for {region}: {}", path.display());
                found.insert(region, path);
            }
            None => warn!("no matching crop for region {region}"),
        }
    }
    found
}
