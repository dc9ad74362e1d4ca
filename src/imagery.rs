//! Imagery collaborator: scene types, the source trait, and the local
//! median-composite/mean reducer.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::{Band, BoundingBox, IndexKind, Region};

/// A multi-band raster acquisition. Rasters are `height x width`, row 0 at
/// the northern edge of `bounds`.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub acquired: NaiveDate,
    pub cloud_pct: f64,
    pub bounds: BoundingBox,
    pub bands: BTreeMap<Band, DMatrix<f64>>,
}

impl Scene {
    pub fn band(&self, band: Band) -> Result<&DMatrix<f64>> {
        self.bands
            .get(&band)
            .ok_or_else(|| anyhow!("Scene {} has no {} band", self.id, band.sentinel2_id()))
    }

    pub fn shape(&self) -> Option<(usize, usize)> {
        self.bands.values().next().map(|m| m.shape())
    }
}

/// On-disk scene layout: pixel arrays are row-major.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneFile {
    pub id: String,
    pub acquired: NaiveDate,
    pub cloud_pct: f64,
    pub bounds: BoundingBox,
    pub width: usize,
    pub height: usize,
    pub bands: BTreeMap<Band, Vec<f64>>,
}

impl TryFrom<SceneFile> for Scene {
    type Error = anyhow::Error;

    fn try_from(file: SceneFile) -> Result<Self> {
        let pixels = file.width * file.height;
        if pixels == 0 {
            return Err(anyhow!("Scene {} has an empty raster", file.id));
        }
        let mut bands = BTreeMap::new();
        for (band, values) in file.bands {
            if values.len() != pixels {
                return Err(anyhow!(
                    "Scene {} band {} has {} pixels, expected {}",
                    file.id,
                    band.sentinel2_id(),
                    values.len(),
                    pixels
                ));
            }
            bands.insert(
                band,
                DMatrix::from_row_slice(file.height, file.width, &values),
            );
        }
        Ok(Scene {
            id: file.id,
            acquired: file.acquired,
            cloud_pct: file.cloud_pct,
            bounds: file.bounds,
            bands,
        })
    }
}

/// Index rasters derived from one scene.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexLayers {
    pub bounds: BoundingBox,
    pub ndwi: DMatrix<f64>,
    pub ndci: DMatrix<f64>,
}

impl IndexLayers {
    pub fn layer(&self, kind: IndexKind) -> &DMatrix<f64> {
        match kind {
            IndexKind::Ndwi => &self.ndwi,
            IndexKind::Ndci => &self.ndci,
        }
    }
}

/// Region-mean of the median composite. `None` when no pixel was valid.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct ReducedIndices {
    pub ndwi: Option<f64>,
    pub ndci: Option<f64>,
}

pub trait ImagerySource {
    /// Scenes over `region` acquired in `[start, end)` with cloud cover
    /// strictly below `cloud_threshold` percent.
    fn query(
        &self,
        region: &Region,
        start: NaiveDate,
        end: NaiveDate,
        cloud_threshold: f64,
    ) -> Result<Vec<Scene>>;

    /// Per-pixel median across `layers`, then mean over `region`.
    /// The local reducer samples every layer onto one grid spanning the
    /// region, no coarser than `scale_m` metres per pixel.
    fn reduce_median_and_mean(
        &self,
        layers: &[IndexLayers],
        region: &Region,
        scale_m: f64,
    ) -> Result<ReducedIndices> {
        reduce_locally(layers, region, scale_m)
    }
}

const METRES_PER_DEGREE: f64 = 111_320.0;

/// Regular lon/lat grid over a region, row 0 at the northern edge.
#[derive(Debug, Copy, Clone, PartialEq)]
struct RegionGrid {
    bounds: BoundingBox,
    rows: usize,
    cols: usize,
    dx: f64,
    dy: f64,
}

impl RegionGrid {
    /// Pixel size is the finest layer resolution, widened to `scale_m`.
    fn new(region: &BoundingBox, layers: &[IndexLayers], scale_m: f64) -> Result<Self> {
        let mut dx = f64::INFINITY;
        let mut dy = f64::INFINITY;
        for layer in layers {
            let (rows, cols) = layer.ndwi.shape();
            if rows == 0 || cols == 0 {
                return Err(anyhow!("Cannot composite an empty raster"));
            }
            dx = dx.min((layer.bounds.max_lon - layer.bounds.min_lon) / cols as f64);
            dy = dy.min((layer.bounds.max_lat - layer.bounds.min_lat) / rows as f64);
        }
        if scale_m > 0.0 {
            let lat = region.center()[0].to_radians();
            dy = dy.max(scale_m / METRES_PER_DEGREE);
            dx = dx.max(scale_m / (METRES_PER_DEGREE * lat.cos().max(1e-6)));
        }
        if !(dx.is_finite() && dy.is_finite() && dx > 0.0 && dy > 0.0) {
            return Err(anyhow!("Scenes have degenerate pixel sizes"));
        }

        let width = region.max_lon - region.min_lon;
        let height = region.max_lat - region.min_lat;
        if !(width > 0.0 && height > 0.0) {
            return Err(anyhow!("Region has an empty extent"));
        }
        let cols = ((width / dx) - 1e-9).ceil().max(1.0) as usize;
        let rows = ((height / dy) - 1e-9).ceil().max(1.0) as usize;
        Ok(Self {
            bounds: *region,
            rows,
            cols,
            dx: width / cols as f64,
            dy: height / rows as f64,
        })
    }

    fn center(&self, r: usize, c: usize) -> (f64, f64) {
        (
            self.bounds.min_lon + (c as f64 + 0.5) * self.dx,
            self.bounds.max_lat - (r as f64 + 0.5) * self.dy,
        )
    }
}

/// Nearest pixel of `raster` at `(lon, lat)`, or `None` outside `bounds`.
fn sample(raster: &DMatrix<f64>, bounds: &BoundingBox, lon: f64, lat: f64) -> Option<f64> {
    if !(bounds.min_lon..=bounds.max_lon).contains(&lon)
        || !(bounds.min_lat..=bounds.max_lat).contains(&lat)
    {
        return None;
    }
    let (rows, cols) = raster.shape();
    let fx = (lon - bounds.min_lon) / (bounds.max_lon - bounds.min_lon);
    let fy = (bounds.max_lat - lat) / (bounds.max_lat - bounds.min_lat);
    let c = ((fx * cols as f64) as usize).min(cols - 1);
    let r = ((fy * rows as f64) as usize).min(rows - 1);
    Some(raster[(r, c)])
}

/// Layers may come from different tiles and resolutions; each region pixel
/// takes the median of the finite values from the layers covering it.
pub fn reduce_locally(
    layers: &[IndexLayers],
    region: &Region,
    scale_m: f64,
) -> Result<ReducedIndices> {
    if layers.is_empty() {
        return Err(anyhow!("Cannot composite an empty collection"));
    }
    for layer in layers {
        if layer.ndwi.shape() != layer.ndci.shape() {
            return Err(anyhow!("Index layers of one scene must share a pixel grid"));
        }
    }

    let grid = RegionGrid::new(&region.bounds, layers, scale_m)?;
    Ok(ReducedIndices {
        ndwi: grid_mean(&median_composite(layers, IndexKind::Ndwi, &grid)),
        ndci: grid_mean(&median_composite(layers, IndexKind::Ndci, &grid)),
    })
}

/// Median of the finite values at each grid pixel; NaN where none are finite.
fn median_composite(layers: &[IndexLayers], kind: IndexKind, grid: &RegionGrid) -> DMatrix<f64> {
    let mut stack: Vec<f64> = Vec::with_capacity(layers.len());
    DMatrix::from_fn(grid.rows, grid.cols, |r, c| {
        let (lon, lat) = grid.center(r, c);
        stack.clear();
        stack.extend(
            layers
                .iter()
                .filter_map(|l| sample(l.layer(kind), &l.bounds, lon, lat))
                .filter(|v| v.is_finite()),
        );
        median(&mut stack).unwrap_or(f64::NAN)
    })
}

pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        Some(values[n / 2])
    } else {
        Some((values[n / 2 - 1] + values[n / 2]) / 2.0)
    }
}

fn grid_mean(values: &DMatrix<f64>) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Scenes loaded from a directory of JSON [`SceneFile`]s.
#[derive(Debug, Clone, Default)]
pub struct SceneArchive {
    scenes: Vec<Scene>,
}

impl SceneArchive {
    pub fn from_scenes(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read scene archive: {}", dir.display()))?;

        let mut scenes = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read scene file: {}", path.display()))?;
            let file: SceneFile = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse scene file: {}", path.display()))?;
            let scene = Scene::try_from(file)
                .with_context(|| format!("Invalid scene file: {}", path.display()))?;
            scenes.push(scene);
        }
        scenes.sort_by(|a, b| a.acquired.cmp(&b.acquired).then_with(|| a.id.cmp(&b.id)));

        tracing::info!("🛰️  Loaded {} scenes from {}", scenes.len(), dir.display());
        Ok(Self { scenes })
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl ImagerySource for SceneArchive {
    fn query(
        &self,
        region: &Region,
        start: NaiveDate,
        end: NaiveDate,
        cloud_threshold: f64,
    ) -> Result<Vec<Scene>> {
        Ok(self
            .scenes
            .iter()
            .filter(|s| s.acquired >= start && s.acquired < end)
            .filter(|s| s.cloud_pct < cloud_threshold)
            .filter(|s| s.bounds.intersects(&region.bounds))
            .cloned()
            .collect())
    }
}
