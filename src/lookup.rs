use async_trait::async_trait;
use census::TractIndex;

/// Maps a coordinate to the census tract containing it.
#[async_trait]
pub trait TractLookup {
    /// Returns the tract GEOID, or `None` when no tract contains the point.
    async fn tract(&self, lat: f64, lng: f64) -> anyhow::Result<Option<String>>;
}

#[async_trait]
impl TractLookup for TractIndex {
    async fn tract(&self, lat: f64, lng: f64) -> anyhow::Result<Option<String>> {
        Ok(self.lookup(lat, lng).map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use census::Tract;
    use geo::{polygon, MultiPolygon};

    #[tokio::test]
    async fn test_tract_index_lookup() {
        let index = TractIndex::new(vec![Tract {
            geoid: "36061002100".to_string(),
            geometry: MultiPolygon::new(vec![polygon![
                (x: -74.0100, y: 40.7100),
                (x: -74.0020, y: 40.7100),
                (x: -74.0020, y: 40.7160),
                (x: -74.0100, y: 40.7160),
            ]]),
        }]);
        let lookup: &dyn TractLookup = &index;
        assert_eq!(
            lookup.tract(40.7128, -74.0060).await.unwrap().as_deref(),
            Some("36061002100")
        );
        assert_eq!(lookup.tract(0.0, 0.0).await.unwrap(), None);
    }
}
