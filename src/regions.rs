use anyhow::{anyhow, Result};

use crate::models::{BoundingBox, Region};

/// Built-in coastal regions as `(name, min_lon, min_lat, max_lon, max_lat)`.
const BUILTIN_REGIONS: [(&str, f64, f64, f64, f64); 4] = [
    ("Sunderbans", 88.0, 21.5, 89.5, 22.5),
    ("Pulicat Lake", 80.0, 13.3, 80.5, 13.8),
    ("Goa Coast", 73.5, 15.0, 74.5, 16.0),
    ("Kochi", 76.0, 9.8, 76.5, 10.2),
];

/// Fixed mapping from region name to bounding box, built once at startup.
#[derive(Debug, Clone)]
pub struct RegionRegistry {
    regions: Vec<Region>,
}

impl Default for RegionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RegionRegistry {
    pub fn builtin() -> Self {
        let regions = BUILTIN_REGIONS
            .iter()
            .map(|(name, min_lon, min_lat, max_lon, max_lat)| Region {
                name: name.to_string(),
                bounds: BoundingBox::new(*min_lon, *min_lat, *max_lon, *max_lat),
            })
            .collect();
        Self { regions }
    }

    /// Built-in regions plus extras; an extra with a built-in name replaces it.
    pub fn with_extras(extras: &[Region]) -> Self {
        let mut registry = Self::builtin();
        for extra in extras {
            match registry.regions.iter_mut().find(|r| r.name == extra.name) {
                Some(existing) => existing.bounds = extra.bounds,
                None => registry.regions.push(extra.clone()),
            }
        }
        registry
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Region> {
        self.regions
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn require(&self, name: &str) -> Result<&Region> {
        self.get(name).ok_or_else(|| {
            anyhow!(
                "Unknown region '{}'. Known regions: {}",
                name,
                self.names().join(", ")
            )
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
