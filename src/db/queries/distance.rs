//! Distance database queries
//!
//! Rows are never updated; the newest row of a pair and source wins.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::types::{DistanceSourceId, LocationPair, NewDistance, StoredDistance};

/// Splits pairs into the parallel id columns bound to `UNNEST`
pub(crate) fn pair_columns(pairs: &[LocationPair]) -> (Vec<i64>, Vec<i64>) {
    pairs.iter().map(|p| (p.from.get(), p.to.get())).unzip()
}

/// Latest row per pair for one source, created strictly after `after`
pub async fn latest_distances(
    pool: &PgPool,
    pairs: &[LocationPair],
    source_id: DistanceSourceId,
    after: DateTime<Utc>,
) -> Result<Vec<StoredDistance>> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }
    let (from_ids, to_ids) = pair_columns(pairs);

    let rows = sqlx::query_as::<_, StoredDistance>(
        r#"
        SELECT DISTINCT ON (d.from_location_id, d.to_location_id)
               d.from_location_id, d.to_location_id, d.source_id,
               d.distance_meters, d.duration_seconds, d.created_at
        FROM distances d
        JOIN UNNEST($1::BIGINT[], $2::BIGINT[]) AS wanted (from_id, to_id)
          ON d.from_location_id = wanted.from_id AND d.to_location_id = wanted.to_id
        WHERE d.source_id = $3 AND d.created_at > $4
        ORDER BY d.from_location_id, d.to_location_id, d.created_at DESC, d.id DESC
        "#,
    )
    .bind(&from_ids)
    .bind(&to_ids)
    .bind(source_id)
    .bind(after)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Appends distances in one statement
pub async fn add_distances(pool: &PgPool, distances: &[NewDistance]) -> Result<u64> {
    if distances.is_empty() {
        return Ok(0);
    }

    let mut from_ids = Vec::with_capacity(distances.len());
    let mut to_ids = Vec::with_capacity(distances.len());
    let mut source_ids = Vec::with_capacity(distances.len());
    let mut meters = Vec::with_capacity(distances.len());
    let mut seconds = Vec::with_capacity(distances.len());
    for d in distances {
        from_ids.push(d.pair.from.get());
        to_ids.push(d.pair.to.get());
        source_ids.push(d.source_id.get());
        meters.push(d.distance.length_meters);
        seconds.push(d.distance.duration_sec);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO distances (from_location_id, to_location_id, source_id, distance_meters, duration_seconds)
        SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::BIGINT[], $4::BIGINT[], $5::BIGINT[])
        "#,
    )
    .bind(&from_ids)
    .bind(&to_ids)
    .bind(&source_ids)
    .bind(&meters)
    .bind(&seconds)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
