use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::lookup::TractLookup;

pub const CENSUS_GEOCODER_URL: &str =
    "https://geocoding.geo.census.gov/geocoder/geographies/coordinates";
pub const DEFAULT_BENCHMARK: &str = "Public_AR_Current";
pub const DEFAULT_VINTAGE: &str = "Current_Current";

const TRACTS_LAYER: &str = "Census Tracts";

#[derive(Debug, Deserialize)]
struct GeocoderResponse {
    result: Option<GeocoderResult>,
}

#[derive(Debug, Deserialize)]
struct GeocoderResult {
    #[serde(default)]
    geographies: HashMap<String, Vec<Geography>>,
}

#[derive(Debug, Deserialize)]
struct Geography {
    #[serde(rename = "GEOID")]
    geoid: Option<String>,
    // Present (and non-empty) when the geocoder could not resolve the layer
    #[serde(default)]
    status: Option<String>,
}

/// Looks tracts up with the US Census Bureau geocoder instead of a local shapefile.
/// One HTTP request per point.
pub struct CensusGeocoder {
    client: Client,
    url: String,
    benchmark: String,
    vintage: String,
}

impl CensusGeocoder {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_url(CENSUS_GEOCODER_URL)
    }

    pub fn with_url(url: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            benchmark: DEFAULT_BENCHMARK.to_string(),
            vintage: DEFAULT_VINTAGE.to_string(),
        })
    }
}

#[async_trait]
impl TractLookup for CensusGeocoder {
    async fn tract(&self, lat: f64, lng: f64) -> anyhow::Result<Option<String>> {
        let response: GeocoderResponse = self
            .client
            .get(&self.url)
            .query(&[
                ("x", lng.to_string()),
                ("y", lat.to_string()),
                ("format", "json".to_string()),
                ("vintage", self.vintage.clone()),
                ("benchmark", self.benchmark.clone()),
            ])
            .send()
            .await
            .context("querying census geocoder")?
            .error_for_status()?
            .json()
            .await
            .context("parsing census geocoder response")?;
        Ok(tract_from_response(response))
    }
}

fn tract_from_response(response: GeocoderResponse) -> Option<String> {
    let mut result = response.result?;
    let tract = result.geographies.remove(TRACTS_LAYER)?.into_iter().next()?;
    if tract.status.is_some_and(|status| !status.is_empty()) {
        return None;
    }
    tract.geoid
}
