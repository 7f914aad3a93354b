use std::fs::File;
use std::io::Write;
use std::path::Path;

use census::{load_tracts, Error, DEFAULT_GEOID_FIELD};
use dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing};

// (geoid, min_lng, min_lat, max_lng, max_lat)
const SQUARES: &[(&str, f64, f64, f64, f64)] = &[
    ("36061002100", -74.0100, 40.7100, -74.0020, 40.7160),
    ("36061003100", -74.0020, 40.7100, -73.9950, 40.7160),
    ("06075010100", -122.42, 37.79, -122.40, 37.81),
];

fn write_shapefile(path: &Path) {
    let table = TableWriterBuilder::new()
        .add_character_field(FieldName::try_from("GEOID").unwrap(), 11);
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    for &(geoid, min_x, min_y, max_x, max_y) in SQUARES {
        // Outer rings are clockwise in the ESRI format
        let polygon = Polygon::new(PolygonRing::Outer(vec![
            Point::new(min_x, min_y),
            Point::new(min_x, max_y),
            Point::new(max_x, max_y),
            Point::new(max_x, min_y),
            Point::new(min_x, min_y),
        ]));
        let mut record = Record::default();
        record.insert(
            "GEOID".to_string(),
            FieldValue::Character(Some(geoid.to_string())),
        );
        writer.write_shape_and_record(&polygon, &record).unwrap();
    }
    drop(writer);
}

fn zip_files(zip_path: &Path, files: &[&Path]) {
    let mut zip = zip::ZipWriter::new(File::create(zip_path).unwrap());
    let options =
        zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for file in files {
        let name = file.file_name().unwrap().to_str().unwrap();
        zip.start_file(format!("cb_2019_tract_500k/{name}"), options)
            .unwrap();
        zip.write_all(&std::fs::read(file).unwrap()).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn test_load_plain_shapefile() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("tracts.shp");
    write_shapefile(&shp);

    let index = load_tracts(&shp, DEFAULT_GEOID_FIELD).unwrap();
    assert_eq!(index.len(), 3);
    assert_eq!(index.lookup(40.7128, -74.0060), Some("36061002100"));
    assert_eq!(index.lookup(40.7128, -73.9990), Some("36061003100"));
    assert_eq!(index.lookup(37.80, -122.41), Some("06075010100"));
    assert_eq!(index.lookup(51.5074, -0.1278), None);
}

#[test]
fn test_load_zipped_shapefile() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("tracts.shp");
    write_shapefile(&shp);
    let parts = [
        dir.path().join("tracts.shp"),
        dir.path().join("tracts.shx"),
        dir.path().join("tracts.dbf"),
    ];
    let zip_path = dir.path().join("cb_2019_06_tract_500k.zip");
    zip_files(&zip_path, &parts.iter().map(|p| p.as_path()).collect::<Vec<_>>());

    let index = load_tracts(&zip_path, DEFAULT_GEOID_FIELD).unwrap();
    assert_eq!(index.len(), 3);
    assert_eq!(index.lookup(40.7128, -74.0060), Some("36061002100"));
}

#[test]
fn test_zip_without_shapefile() {
    let dir = tempfile::tempdir().unwrap();
    let readme = dir.path().join("README.txt");
    std::fs::write(&readme, "nothing here").unwrap();
    let zip_path = dir.path().join("empty.zip");
    zip_files(&zip_path, &[readme.as_path()]);

    match load_tracts(&zip_path, DEFAULT_GEOID_FIELD) {
        Err(Error::ShapefileCount { count, .. }) => assert_eq!(count, 0),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[test]
fn test_missing_geoid_attribute() {
    let dir = tempfile::tempdir().unwrap();
    let shp = dir.path().join("tracts.shp");
    write_shapefile(&shp);

    match load_tracts(&shp, "TRACTCE") {
        Err(Error::NoTracts(path)) => assert_eq!(path, shp),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("expected an error"),
    }
}
