use assert_cmd::Command;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("airtable-enrich").unwrap();
    cmd.env_remove("AIRTABLE_APIKEY")
        .env_remove("AIRTABLE_API_URL")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_version() {
    let output = cli().arg("version").output().unwrap();
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        env!("CARGO_PKG_VERSION")
    );
}

#[test]
fn test_fill_census_requires_columns() {
    let output = cli()
        .args(["fill-census", "--base", "appXYZ", "--table", "Sales"])
        .env("AIRTABLE_APIKEY", "keyTEST")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--lat"), "{stderr}");
    assert!(stderr.contains("--tract"), "{stderr}");
}

#[test]
fn test_api_key_is_required() {
    let output = cli()
        .args(["head", "--base", "appXYZ", "--table", "Sales"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--apikey"), "{stderr}");
}

#[test]
fn test_missing_shapefile_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing_tracts.zip");
    let output = cli()
        .args([
            "fill-census",
            "--base",
            "appXYZ",
            "--table",
            "Sales",
            "--lat",
            "Latitude",
            "--lng",
            "Longitude",
            "--tract",
            "Tract",
            "--no-confirm",
        ])
        .arg("--shapefile")
        .arg(&missing)
        // Never reached: the boundary file is loaded before any request
        .env("AIRTABLE_API_URL", "http://127.0.0.1:9")
        .env("AIRTABLE_APIKEY", "keyTEST")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("loading tract boundaries"), "{stderr}");
    assert!(stderr.contains("missing_tracts.zip"), "{stderr}");
}

#[test]
fn test_unknown_engine_is_rejected() {
    let output = cli()
        .args([
            "fill-census",
            "--base",
            "appXYZ",
            "--table",
            "Sales",
            "--lat",
            "Latitude",
            "--lng",
            "Longitude",
            "--tract",
            "Tract",
            "--engine",
            "psychic",
        ])
        .env("AIRTABLE_APIKEY", "keyTEST")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("psychic"), "{stderr}");
}

#[test]
fn test_api_key_from_dotenv_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".env"), "AIRTABLE_APIKEY=keyFROMDOTENV\n").unwrap();
    let output = cli()
        .current_dir(dir.path())
        .args(["head", "--base", "appXYZ", "--table", "Sales", "--max-retries", "0"])
        // Nothing listens here, so the run fails after argument parsing
        .env("AIRTABLE_API_URL", "http://127.0.0.1:9")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("--apikey"), "{stderr}");
    assert!(stderr.contains("sending request to Airtable"), "{stderr}");
}
