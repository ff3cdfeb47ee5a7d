//! Map services for travel distance lookups
//!
//! Uses Valhalla for production, a haversine estimate for tests and
//! offline runs.

mod circuit_breaker;
mod valhalla;

pub use circuit_breaker::{
    CircuitBreaker, DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS, DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
};
pub use valhalla::{ValhallaConfig, ValhallaMapService, VALHALLA_DISTANCE_SOURCE_ID};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::services::geo::{estimate_travel, AVERAGE_SPEED_KMH, ROAD_COEFFICIENT};
use crate::types::{Coordinates, DistanceSourceId, ServiceRegionId, TravelDistance};

/// Source id of distances produced by [`MockMapService`]
pub const MOCK_DISTANCE_SOURCE_ID: DistanceSourceId = DistanceSourceId(100);

/// Source ids owned by the primary providers
pub const RESERVED_DISTANCE_SOURCE_IDS: [DistanceSourceId; 2] =
    [VALHALLA_DISTANCE_SOURCE_ID, MOCK_DISTANCE_SOURCE_ID];

/// `use` tag value for secondary-provider calls
pub const RESEARCH_USE_TAG: &str = "research";

/// Tags attached to every provider call for accounting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsTags {
    pub service_region_id: ServiceRegionId,
    pub service_date: NaiveDate,
    pub use_tag: Option<&'static str>,
}

impl MapsTags {
    pub fn new(service_region_id: ServiceRegionId, service_date: NaiveDate) -> Self {
        Self {
            service_region_id,
            service_date,
            use_tag: None,
        }
    }

    pub fn research(&self) -> Self {
        Self {
            use_tag: Some(RESEARCH_USE_TAG),
            ..self.clone()
        }
    }
}

/// Map service trait for abstraction (Valhalla, mock, etc.)
///
/// Results are positional: `distance_matrix(..)[i][j]` is origin `i` to
/// destination `j`, `path_distances(..)[i]` is `path[i]` to `path[i + 1]`.
#[async_trait]
pub trait MapService: Send + Sync {
    async fn distance_matrix(
        &self,
        tags: &MapsTags,
        origins: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<Vec<Vec<TravelDistance>>>;

    async fn path_distances(&self, tags: &MapsTags, path: &[Coordinates])
        -> Result<Vec<TravelDistance>>;

    /// Namespaces this provider's persisted distances
    fn distance_source_id(&self) -> DistanceSourceId;

    /// Get service name for logging
    fn name(&self) -> &str;
}

/// Mock map service for tests and offline runs
/// Uses Haversine distance × coefficient for estimation
pub struct MockMapService {
    source_id: DistanceSourceId,
    /// Coefficient for converting straight-line to road distance (default: 1.3)
    road_coefficient: f64,
    /// Average speed in km/h for time estimation (default: 40)
    average_speed_kmh: f64,
}

impl Default for MockMapService {
    fn default() -> Self {
        Self {
            source_id: MOCK_DISTANCE_SOURCE_ID,
            road_coefficient: ROAD_COEFFICIENT,
            average_speed_kmh: AVERAGE_SPEED_KMH,
        }
    }
}

impl MockMapService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_id(source_id: DistanceSourceId) -> Self {
        Self {
            source_id,
            ..Self::default()
        }
    }

    pub fn with_params(road_coefficient: f64, average_speed_kmh: f64) -> Self {
        Self {
            road_coefficient,
            average_speed_kmh,
            ..Self::default()
        }
    }

    fn estimate(&self, from: &Coordinates, to: &Coordinates) -> TravelDistance {
        estimate_travel(from, to, self.road_coefficient, self.average_speed_kmh)
    }
}

#[async_trait]
impl MapService for MockMapService {
    async fn distance_matrix(
        &self,
        _tags: &MapsTags,
        origins: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<Vec<Vec<TravelDistance>>> {
        Ok(origins
            .iter()
            .map(|from| destinations.iter().map(|to| self.estimate(from, to)).collect())
            .collect())
    }

    async fn path_distances(
        &self,
        _tags: &MapsTags,
        path: &[Coordinates],
    ) -> Result<Vec<TravelDistance>> {
        Ok(path.windows(2).map(|w| self.estimate(&w[0], &w[1])).collect())
    }

    fn distance_source_id(&self) -> DistanceSourceId {
        self.source_id
    }

    fn name(&self) -> &str {
        "MockMaps"
    }
}

/// Create the primary map service with automatic Valhalla detection and fallback
///
/// Tries to connect to Valhalla if URL is provided. Falls back to the mock
/// service if Valhalla is unavailable or URL is not configured.
pub async fn create_map_service_with_fallback(valhalla_url: Option<String>) -> Arc<dyn MapService> {
    use tracing::{info, warn};

    if let Some(url) = valhalla_url {
        match ValhallaMapService::new(ValhallaConfig::new(&url)) {
            Ok(client) => match check_valhalla_health(&url).await {
                Ok(()) => {
                    info!("Valhalla map service available at {}", url);
                    return Arc::new(client);
                }
                Err(e) => {
                    warn!("Valhalla not available at {}: {}. Falling back to mock maps.", url, e);
                }
            },
            Err(e) => warn!("Failed to build Valhalla client for {}: {}", url, e),
        }
    }

    info!("Using mock map service (Valhalla not configured or unavailable)");
    Arc::new(MockMapService::new())
}

/// A research provider and the distance source its rows are stored under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryMapServiceConfig {
    pub source_id: DistanceSourceId,
    pub url: String,
}

/// Secondary providers are not health-checked up front; their circuit
/// breakers take them out of rotation once they start failing.
pub fn create_secondary_map_services(
    configs: &[SecondaryMapServiceConfig],
) -> Result<Vec<Arc<dyn MapService>>> {
    configs
        .iter()
        .map(|secondary| {
            let config = ValhallaConfig {
                source_id: secondary.source_id,
                ..ValhallaConfig::new(&secondary.url)
            };
            let service: Arc<dyn MapService> = Arc::new(ValhallaMapService::new(config)?);
            Ok(service)
        })
        .collect()
}

/// Check if Valhalla is healthy by making a simple status request
async fn check_valhalla_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let url = format!("{}/status", base_url);
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("Valhalla returned status {}", response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prague() -> Coordinates {
        Coordinates { lat: 50.0755, lng: 14.4378 }
    }

    fn brno() -> Coordinates {
        Coordinates { lat: 49.1951, lng: 16.6068 }
    }

    fn ostrava() -> Coordinates {
        Coordinates { lat: 49.8209, lng: 18.2625 }
    }

    fn tags() -> MapsTags {
        MapsTags::new(ServiceRegionId(1), NaiveDate::from_ymd_opt(2026, 10, 16).unwrap())
    }

    #[tokio::test]
    async fn test_mock_matrix_is_rectangular() {
        let service = MockMapService::new();
        let matrix = service
            .distance_matrix(&tags(), &[prague()], &[prague(), brno(), ostrava()])
            .await
            .unwrap();

        assert_eq!(matrix.len(), 1);
        assert_eq!(matrix[0].len(), 3);
        assert_eq!(matrix[0][0], TravelDistance::default());
        assert!(matrix[0][1].length_meters > 0);
        assert!(matrix[0][2].length_meters > matrix[0][1].length_meters);
    }

    #[tokio::test]
    async fn test_mock_prague_brno_reasonable() {
        let service = MockMapService::new();
        let matrix = service
            .distance_matrix(&tags(), &[prague()], &[brno()])
            .await
            .unwrap();

        // Prague to Brno is ~185 km straight line, ~240 km road
        let distance_km = matrix[0][0].length_meters as f64 / 1000.0;
        assert!(distance_km > 200.0 && distance_km < 280.0,
            "Expected ~240 km, got {} km", distance_km);

        // ~240 km at 40 km/h = ~6 hours
        let duration_hours = matrix[0][0].duration_sec as f64 / 3600.0;
        assert!(duration_hours > 5.0 && duration_hours < 8.0,
            "Expected ~6 hours, got {} hours", duration_hours);
    }

    #[tokio::test]
    async fn test_mock_path_has_one_leg_per_hop() {
        let service = MockMapService::new();
        let legs = service
            .path_distances(&tags(), &[prague(), brno(), ostrava()])
            .await
            .unwrap();
        assert_eq!(legs.len(), 2);

        let empty = service.path_distances(&tags(), &[prague()]).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_mock_custom_params() {
        let service = MockMapService::with_params(1.5, 60.0);
        let matrix = service
            .distance_matrix(&tags(), &[prague()], &[brno()])
            .await
            .unwrap();

        let distance_km = matrix[0][0].length_meters as f64 / 1000.0;
        assert!(distance_km > 250.0 && distance_km < 320.0,
            "Expected ~280 km with 1.5 coefficient, got {} km", distance_km);
    }

    #[test]
    fn test_research_tags() {
        let research = tags().research();
        assert_eq!(research.use_tag, Some(RESEARCH_USE_TAG));
        assert_eq!(research.service_region_id, ServiceRegionId(1));
        assert_eq!(tags().use_tag, None);
    }

    #[test]
    fn test_secondary_services_use_configured_source_ids() {
        let secondary = |id: i64, url: &str| SecondaryMapServiceConfig {
            source_id: DistanceSourceId(id),
            url: url.to_string(),
        };
        let services = create_secondary_map_services(&[
            secondary(7, "http://valhalla-a:8002"),
            secondary(3, "http://valhalla-b:8002"),
        ])
        .unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0].distance_source_id(), DistanceSourceId(7));
        assert_eq!(services[1].distance_source_id(), DistanceSourceId(3));
    }

    #[tokio::test]
    async fn test_create_map_service_with_fallback_no_url() {
        let service = create_map_service_with_fallback(None).await;
        assert_eq!(service.name(), "MockMaps");
        assert_eq!(service.distance_source_id(), MOCK_DISTANCE_SOURCE_ID);
    }

    #[tokio::test]
    async fn test_create_map_service_with_fallback_invalid_url() {
        let service = create_map_service_with_fallback(
            Some("http://localhost:99999".to_string())
        ).await;
        assert_eq!(service.name(), "MockMaps");
    }

    #[tokio::test]
    #[ignore = "Requires running Valhalla server"]
    async fn test_create_map_service_with_fallback_valhalla_available() {
        let service = create_map_service_with_fallback(
            Some("http://localhost:8002".to_string())
        ).await;
        assert_eq!(service.name(), "Valhalla");
    }
}
