//! Map provider health queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::types::{DistanceSourceId, ProviderHealth};

pub async fn get_provider_health(pool: &PgPool, source_id: DistanceSourceId) -> Result<Option<ProviderHealth>> {
    let health = sqlx::query_as::<_, ProviderHealth>(
        "SELECT source_id, failure_count, last_failure_at FROM provider_health WHERE source_id = $1",
    )
    .bind(source_id)
    .fetch_optional(pool)
    .await?;

    Ok(health)
}

pub async fn record_success(pool: &PgPool, source_id: DistanceSourceId) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO provider_health (source_id, failure_count)
        VALUES ($1, 0)
        ON CONFLICT (source_id) DO UPDATE SET failure_count = 0
        "#,
    )
    .bind(source_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Counted in one statement so concurrent runs never lose a failure
pub async fn record_failure(pool: &PgPool, source_id: DistanceSourceId, at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO provider_health (source_id, failure_count, last_failure_at)
        VALUES ($1, 1, $2)
        ON CONFLICT (source_id) DO UPDATE
            SET failure_count = provider_health.failure_count + 1,
                last_failure_at = EXCLUDED.last_failure_at
        "#,
    )
    .bind(source_id)
    .bind(at)
    .execute(pool)
    .await?;

    Ok(())
}
