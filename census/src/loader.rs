use std::fs::File;
use std::path::{Path, PathBuf};

use dbase::FieldValue;
use geo::{Geometry, MultiPolygon};
use tracing::{debug, info, warn};

use crate::{Error, Tract, TractIndex};

/// Attribute carrying the tract code in the Census Bureau cartographic boundary files.
pub const DEFAULT_GEOID_FIELD: &str = "GEOID";

/// Reads tract boundaries from `path` and indexes them.
pub fn load_tracts(path: &Path, geoid_field: &str) -> Result<TractIndex, Error> {
    let tracts = read_tracts(path, geoid_field)?;
    let index = TractIndex::new(tracts);
    if index.is_empty() {
        return Err(Error::NoTracts(path.to_path_buf()));
    }
    info!(path = %path.display(), tracts = index.len(), "loaded tract boundaries");
    Ok(index)
}

/// Reads tracts from a `.shp`, a zipped shapefile (as distributed by the Census Bureau),
/// or a GeoJSON feature collection.
pub fn read_tracts(path: &Path, geoid_field: &str) -> Result<Vec<Tract>, Error> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("shp") => read_shapefile(path, geoid_field),
        Some("zip") => read_zipped_shapefile(path, geoid_field),
        Some("geojson") | Some("json") => read_geojson(path, geoid_field),
        _ => Err(Error::UnsupportedFormat(path.to_path_buf())),
    }
}

fn read_shapefile(path: &Path, geoid_field: &str) -> Result<Vec<Tract>, Error> {
    let shapefile_err = |source| Error::Shapefile {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = shapefile::Reader::from_path(path).map_err(shapefile_err)?;

    let mut tracts = Vec::new();
    for (n, item) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = item.map_err(shapefile_err)?;
        let Some(geoid) = record.get(geoid_field).and_then(field_value_to_geoid) else {
            warn!(feature = n, field = geoid_field, "shape has no tract identifier, skipping");
            continue;
        };
        match Geometry::<f64>::try_from(shape) {
            Ok(geometry) => match into_multi_polygon(geometry) {
                Some(geometry) => tracts.push(Tract { geoid, geometry }),
                None => warn!(feature = n, %geoid, "shape is not a polygon, skipping"),
            },
            Err(e) => warn!(feature = n, %geoid, "unreadable shape, skipping: {e}"),
        }
    }
    debug!(path = %path.display(), tracts = tracts.len(), "read shapefile");
    Ok(tracts)
}

fn read_zipped_shapefile(path: &Path, geoid_field: &str) -> Result<Vec<Tract>, Error> {
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let zip_err = |source| Error::Zip {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;

    // The shapefile reader wants sibling .shx/.dbf files on disk, so unpack next to each other.
    let dir = tempfile::tempdir().map_err(io_err)?;
    let mut shp_files: Vec<PathBuf> = Vec::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = Path::new(entry.name()).file_name().map(|n| n.to_owned()) else {
            continue;
        };
        let target = dir.path().join(name);
        let mut out = File::create(&target).map_err(io_err)?;
        std::io::copy(&mut entry, &mut out).map_err(io_err)?;

        let is_shp = target
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("shp"));
        if is_shp {
            shp_files.push(target);
        }
    }

    match shp_files.as_slice() {
        [shp] => read_shapefile(shp, geoid_field),
        other => Err(Error::ShapefileCount {
            path: path.to_path_buf(),
            count: other.len(),
        }),
    }
}

fn read_geojson(path: &Path, geoid_field: &str) -> Result<Vec<Tract>, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let collection: geojson::FeatureCollection = text.parse().map_err(|source| Error::GeoJson {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tracts = Vec::new();
    for (n, feature) in collection.features.into_iter().enumerate() {
        let Some(geoid) = feature.property(geoid_field).and_then(json_to_geoid) else {
            warn!(feature = n, field = geoid_field, "feature has no tract identifier, skipping");
            continue;
        };
        let Some(geometry) = feature.geometry else {
            warn!(feature = n, %geoid, "feature has no geometry, skipping");
            continue;
        };
        match Geometry::<f64>::try_from(geometry.value) {
            Ok(geometry) => match into_multi_polygon(geometry) {
                Some(geometry) => tracts.push(Tract { geoid, geometry }),
                None => warn!(feature = n, %geoid, "feature is not a polygon, skipping"),
            },
            Err(e) => warn!(feature = n, %geoid, "unreadable geometry, skipping: {e}"),
        }
    }
    debug!(path = %path.display(), tracts = tracts.len(), "read GeoJSON");
    Ok(tracts)
}

fn into_multi_polygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(multi) => Some(multi),
        _ => None,
    }
}

fn field_value_to_geoid(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => non_empty(s),
        FieldValue::Numeric(Some(n)) | FieldValue::Double(n) => Some(format!("{n:.0}")),
        FieldValue::Float(Some(n)) => Some(format!("{n:.0}")),
        FieldValue::Integer(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_to_geoid(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => non_empty(s),
        serde_json::Value::Number(n) => match n.as_u64() {
            Some(n) => Some(n.to_string()),
            None => n.as_f64().map(|n| format!("{n:.0}")),
        },
        _ => None,
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
