use std::path::PathBuf;

use geo::{BoundingRect, Contains, MultiPolygon, Point};
use rstar::{RTree, RTreeObject, AABB};

pub mod loader;

pub use loader::{load_tracts, read_tracts, DEFAULT_GEOID_FIELD};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("shapefile {}: {source}", path.display())]
    Shapefile {
        path: PathBuf,
        source: shapefile::Error,
    },
    #[error("zip archive {}: {source}", path.display())]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },
    #[error("GeoJSON {}: {source}", path.display())]
    GeoJson {
        path: PathBuf,
        source: geojson::Error,
    },
    #[error("{} contains {count} .shp files, expected exactly 1", path.display())]
    ShapefileCount { path: PathBuf, count: usize },
    #[error("unsupported tract file {}: expected .shp, .zip or .geojson", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("{} has no tract polygons", .0.display())]
    NoTracts(PathBuf),
}

/// One census tract boundary.
#[derive(Clone, Debug)]
pub struct Tract {
    // 11 digit state + county + tract code, e.g. 06075010100
    pub geoid: String,
    pub geometry: MultiPolygon<f64>,
}

struct TractNode {
    // Position in the source file, used to break ties between overlapping polygons
    ordinal: usize,
    tract: Tract,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for TractNode {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Immutable R-tree over tract bounding boxes.
pub struct TractIndex {
    tree: RTree<TractNode>,
}

impl TractIndex {
    /// Builds the index. Tracts with empty geometry have no bounding box and are dropped.
    pub fn new(tracts: impl IntoIterator<Item = Tract>) -> Self {
        let nodes: Vec<TractNode> = tracts
            .into_iter()
            .enumerate()
            .filter_map(|(ordinal, tract)| {
                let rect = tract.geometry.bounding_rect()?;
                let envelope =
                    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
                Some(TractNode {
                    ordinal,
                    tract,
                    envelope,
                })
            })
            .collect();
        Self {
            tree: RTree::bulk_load(nodes),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Returns the GEOID of the tract strictly containing the point, or `None` when the
    /// point is outside every tract (or lies exactly on a boundary). If polygons overlap,
    /// the one that came first in the source wins.
    pub fn lookup(&self, lat: f64, lng: f64) -> Option<&str> {
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        let point = Point::new(lng, lat);
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([lng, lat]))
            .filter(|node| node.tract.geometry.contains(&point))
            .min_by_key(|node| node.ordinal)
            .map(|node| node.tract.geoid.as_str())
    }
}

/// Strips leading zeros from a numeric GEOID ("06075010100" -> "6075010100"), which is
/// how the HPI tables store tract codes. Non-numeric identifiers are only trimmed.
pub fn normalize_geoid(geoid: &str) -> String {
    let geoid = geoid.trim();
    if geoid.is_empty() || !geoid.bytes().all(|b| b.is_ascii_digit()) {
        return geoid.to_string();
    }
    match geoid.trim_start_matches('0') {
        "" => "0".to_string(),
        stripped => stripped.to_string(),
    }
}
