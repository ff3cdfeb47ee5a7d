//! Location database queries

use anyhow::Result;
use sqlx::PgPool;

use crate::types::{Location, LocationId};

/// Locations for the given ids; unknown ids are absent
pub async fn locations_by_ids(pool: &PgPool, ids: &[LocationId]) -> Result<Vec<Location>> {
    let ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();

    let locations = sqlx::query_as::<_, Location>(
        r#"
        SELECT id, latitude_e6, longitude_e6
        FROM locations
        WHERE id = ANY($1)
        ORDER BY id
        "#,
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    Ok(locations)
}

/// Insert a location or return the existing one at the same coordinates
pub async fn upsert_location(pool: &PgPool, latitude_e6: i32, longitude_e6: i32) -> Result<Location> {
    let location = sqlx::query_as::<_, Location>(
        r#"
        INSERT INTO locations (latitude_e6, longitude_e6)
        VALUES ($1, $2)
        ON CONFLICT (latitude_e6, longitude_e6)
            DO UPDATE SET latitude_e6 = EXCLUDED.latitude_e6
        RETURNING id, latitude_e6, longitude_e6
        "#,
    )
    .bind(latitude_e6)
    .bind(longitude_e6)
    .fetch_one(pool)
    .await?;

    Ok(location)
}
