//! Valhalla routing engine client
//!
//! Valhalla API documentation:
//! https://valhalla.github.io/valhalla/api/matrix/api-reference/
//! https://valhalla.github.io/valhalla/api/turn-by-turn/api-reference/

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{MapService, MapsTags};
use crate::types::{Coordinates, DistanceSourceId, TravelDistance};

pub const VALHALLA_DISTANCE_SOURCE_ID: DistanceSourceId = DistanceSourceId(1);

/// Valhalla client configuration
#[derive(Debug, Clone)]
pub struct ValhallaConfig {
    /// Base URL of Valhalla server (e.g., "http://localhost:8002")
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    pub source_id: DistanceSourceId,
}

impl Default for ValhallaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout_seconds: 30,
            source_id: VALHALLA_DISTANCE_SOURCE_ID,
        }
    }
}

impl ValhallaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

/// Valhalla map service
pub struct ValhallaMapService {
    client: Client,
    config: ValhallaConfig,
}

impl ValhallaMapService {
    pub fn new(config: ValhallaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    fn locations(coords: &[Coordinates]) -> Vec<ValhallaLocation> {
        coords
            .iter()
            .map(|c| ValhallaLocation {
                lat: c.lat,
                lon: c.lng,
                // 500m radius for coordinates that sit slightly off-road
                radius: Some(500),
            })
            .collect()
    }

    /// Build the sources_to_targets request
    fn build_matrix_request(&self, origins: &[Coordinates], destinations: &[Coordinates]) -> MatrixRequest {
        MatrixRequest {
            sources: Self::locations(origins),
            targets: Self::locations(destinations),
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
        }
    }

    /// Build the route request; only leg summaries are needed
    fn build_route_request(&self, path: &[Coordinates]) -> RouteRequest {
        RouteRequest {
            locations: Self::locations(path),
            costing: "auto".to_string(),
            units: "kilometers".to_string(),
            directions_type: "none".to_string(),
        }
    }

    async fn post<Req: Serialize + Sync, Resp: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        request: &Req,
    ) -> Result<Resp> {
        let url = format!("{}/{}", self.config.base_url, endpoint);

        let response = self.client
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to Valhalla", endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Valhalla {} returned error {}: {}", endpoint, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Valhalla {} response", endpoint))
    }
}

#[async_trait]
impl MapService for ValhallaMapService {
    async fn distance_matrix(
        &self,
        tags: &MapsTags,
        origins: &[Coordinates],
        destinations: &[Coordinates],
    ) -> Result<Vec<Vec<TravelDistance>>> {
        if origins.is_empty() || destinations.is_empty() {
            return Ok(vec![Vec::new(); origins.len()]);
        }

        debug!(
            service_region_id = %tags.service_region_id,
            use_tag = ?tags.use_tag,
            "Requesting {}x{} distance matrix from Valhalla",
            origins.len(),
            destinations.len(),
        );

        let request = self.build_matrix_request(origins, destinations);
        let response: MatrixResponse = self.post("sources_to_targets", &request).await?;

        if response.sources_to_targets.len() != origins.len() {
            anyhow::bail!(
                "Valhalla returned {} rows for {} origins",
                response.sources_to_targets.len(),
                origins.len()
            );
        }

        response
            .sources_to_targets
            .iter()
            .enumerate()
            .map(|(i, row)| -> Result<Vec<TravelDistance>> {
                if row.len() != destinations.len() {
                    anyhow::bail!("Valhalla returned {} columns in row {}", row.len(), i);
                }
                row.iter()
                    .enumerate()
                    .map(|(j, cell)| cell.travel_distance().with_context(|| {
                        format!("No route for {} -> {}", i, j)
                    }))
                    .collect()
            })
            .collect()
    }

    async fn path_distances(
        &self,
        tags: &MapsTags,
        path: &[Coordinates],
    ) -> Result<Vec<TravelDistance>> {
        if path.len() < 2 {
            return Ok(Vec::new());
        }

        debug!(
            service_region_id = %tags.service_region_id,
            use_tag = ?tags.use_tag,
            "Requesting route legs from Valhalla for {} locations",
            path.len(),
        );

        let request = self.build_route_request(path);
        let response: RouteResponse = self.post("route", &request).await?;

        if response.trip.legs.len() != path.len() - 1 {
            anyhow::bail!(
                "Valhalla returned {} legs for a path of {} locations",
                response.trip.legs.len(),
                path.len()
            );
        }

        Ok(response
            .trip
            .legs
            .iter()
            .map(|leg| leg.summary.travel_distance())
            .collect())
    }

    fn distance_source_id(&self) -> DistanceSourceId {
        self.config.source_id
    }

    fn name(&self) -> &str {
        "Valhalla"
    }
}

// Valhalla API types

#[derive(Debug, Serialize)]
struct MatrixRequest {
    sources: Vec<ValhallaLocation>,
    targets: Vec<ValhallaLocation>,
    costing: String,
    units: String,
}

#[derive(Debug, Serialize, Clone)]
struct ValhallaLocation {
    lat: f64,
    lon: f64,
    /// Radius in meters for snapping to roads
    #[serde(skip_serializing_if = "Option::is_none")]
    radius: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    sources_to_targets: Vec<Vec<MatrixCell>>,
}

#[derive(Debug, Deserialize)]
struct MatrixCell {
    /// Distance in kilometers (when units="kilometers")
    distance: Option<f64>,
    /// Time in seconds
    time: Option<f64>,
}

impl MatrixCell {
    fn travel_distance(&self) -> Option<TravelDistance> {
        Some(TravelDistance {
            length_meters: (self.distance? * 1000.0).round() as i64,
            duration_sec: self.time?.round() as i64,
        })
    }
}

#[derive(Debug, Serialize)]
struct RouteRequest {
    locations: Vec<ValhallaLocation>,
    costing: String,
    units: String,
    directions_type: String,
}

#[derive(Debug, Deserialize)]
struct RouteResponse {
    trip: Trip,
}

#[derive(Debug, Deserialize)]
struct Trip {
    legs: Vec<Leg>,
}

#[derive(Debug, Deserialize)]
struct Leg {
    summary: LegSummary,
}

#[derive(Debug, Deserialize)]
struct LegSummary {
    /// Kilometers
    length: f64,
    /// Seconds
    time: f64,
}

impl LegSummary {
    fn travel_distance(&self) -> TravelDistance {
        TravelDistance {
            length_meters: (self.length * 1000.0).round() as i64,
            duration_sec: self.time.round() as i64,
        }
    }
}
