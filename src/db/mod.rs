//! Database module

pub mod queries;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::services::actuals::ActualsSource;
use crate::services::distance_matrix::DistanceStore;
use crate::types::{
    CareRequestId, CareRequestPhaseRow, DistanceSourceId, Location, LocationId, LocationPair,
    NewDistance, PhaseStatusRow, PhaseTypeId, PhaseTypeRow, ProviderHealth, StoredDistance,
    VisitPhaseRow, VisitSnapshotId,
};

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run database migrations.
///
/// Stored checksums are synced with the compiled ones first, so a migration
/// re-saved with different line endings does not block startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    info!("Running database migrations...");

    let migrator = sqlx::migrate!("./migrations");
    fix_migration_checksums(pool, &migrator).await?;
    migrator.run(pool).await?;

    info!("Database migrations complete");
    Ok(())
}

async fn fix_migration_checksums(pool: &PgPool, migrator: &sqlx::migrate::Migrator) -> Result<()> {
    let table_exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = '_sqlx_migrations')",
    )
    .fetch_one(pool)
    .await?;
    if !table_exists {
        return Ok(());
    }

    for migration in migrator.iter() {
        if migration.migration_type.is_down_migration() {
            continue;
        }

        let stored: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT checksum FROM _sqlx_migrations WHERE version = $1")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;

        if let Some((stored_checksum,)) = stored {
            let current_checksum: &[u8] = &migration.checksum;
            if stored_checksum != current_checksum {
                warn!(
                    "Migration {} ({}) checksum mismatch, updating stored checksum",
                    migration.version, migration.description
                );
                sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                    .bind(current_checksum)
                    .bind(migration.version)
                    .execute(pool)
                    .await?;
            }
        }
    }

    Ok(())
}

/// Postgres-backed distance store and phase history
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DistanceStore for PgStore {
    async fn latest_distances(
        &self,
        pairs: &[LocationPair],
        source_id: DistanceSourceId,
        after: DateTime<Utc>,
    ) -> Result<Vec<StoredDistance>> {
        queries::distance::latest_distances(&self.pool, pairs, source_id, after)
            .await
            .with_context(|| format!("Failed to query latest distances for source {}", source_id))
    }

    async fn add_distances(&self, distances: &[NewDistance]) -> Result<()> {
        let written = queries::distance::add_distances(&self.pool, distances)
            .await
            .context("Failed to insert distances")?;
        debug!("Inserted {} distance rows", written);
        Ok(())
    }

    async fn locations_by_ids(&self, ids: &[LocationId]) -> Result<Vec<Location>> {
        queries::location::locations_by_ids(&self.pool, ids)
            .await
            .context("Failed to query locations")
    }

    async fn provider_health(&self, source_id: DistanceSourceId) -> Result<Option<ProviderHealth>> {
        queries::provider_health::get_provider_health(&self.pool, source_id)
            .await
            .with_context(|| format!("Failed to query health of provider {}", source_id))
    }

    async fn record_provider_outcome(
        &self,
        source_id: DistanceSourceId,
        succeeded: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let result = if succeeded {
            queries::provider_health::record_success(&self.pool, source_id).await
        } else {
            queries::provider_health::record_failure(&self.pool, source_id, at).await
        };
        result.with_context(|| format!("Failed to record outcome of provider {}", source_id))
    }
}

#[async_trait]
impl ActualsSource for PgStore {
    async fn phase_types(&self) -> Result<Vec<PhaseTypeRow>> {
        queries::visit_phase::list_phase_types(&self.pool)
            .await
            .context("Failed to query visit phase types")
    }

    async fn visit_phases(&self, visit_ids: &[VisitSnapshotId]) -> Result<Vec<VisitPhaseRow>> {
        queries::visit_phase::visit_phases(&self.pool, visit_ids)
            .await
            .context("Failed to query visit phases")
    }

    async fn latest_care_request_phases(
        &self,
        visit_ids: &[VisitSnapshotId],
    ) -> Result<Vec<CareRequestPhaseRow>> {
        queries::visit_phase::latest_care_request_phases(&self.pool, visit_ids)
            .await
            .context("Failed to query latest care request phases")
    }

    async fn latest_status_times(
        &self,
        care_request_ids: &[CareRequestId],
        phase_type_id: PhaseTypeId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<PhaseStatusRow>> {
        queries::visit_phase::latest_status_times(&self.pool, care_request_ids, phase_type_id, as_of)
            .await
            .with_context(|| format!("Failed to query status times for phase type {}", phase_type_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::actuals::PhaseSnapshot;
    use crate::types::{PhaseTypeTable, ShiftTeamId, TravelDistance, VisitPhase};
    use chrono::Duration;

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for database tests");
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        PgStore::new(pool)
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL"]
    async fn test_latest_distance_wins_per_source() {
        let store = store().await;
        let a = queries::location::upsert_location(store.pool(), 50_100_001, 14_400_001).await.unwrap();
        let b = queries::location::upsert_location(store.pool(), 50_100_002, 14_400_002).await.unwrap();
        let pair = LocationPair { from: a.id, to: b.id };
        let source = DistanceSourceId(9_001);
        let before = Utc::now() - Duration::seconds(1);

        for meters in [1000, 1200] {
            store
                .add_distances(&[NewDistance {
                    pair,
                    source_id: source,
                    distance: TravelDistance { duration_sec: meters / 10, length_meters: meters },
                }])
                .await
                .unwrap();
        }

        let rows = store.latest_distances(&[pair], source, before).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].distance_meters, 1200);

        let other = store.latest_distances(&[pair], DistanceSourceId(9_002), before).await.unwrap();
        assert!(other.is_empty());

        let found = store.locations_by_ids(&[a.id, b.id, LocationId(-1)]).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL"]
    async fn test_provider_failures_survive_new_store() {
        let source = DistanceSourceId(Utc::now().timestamp_micros());
        let first = store().await;
        first.record_provider_outcome(source, false, Utc::now()).await.unwrap();
        first.record_provider_outcome(source, false, Utc::now()).await.unwrap();

        let second = store().await;
        let health = second.provider_health(source).await.unwrap().unwrap();
        assert_eq!(health.failure_count, 2);
        assert!(health.last_failure_at.is_some());

        second.record_provider_outcome(source, true, Utc::now()).await.unwrap();
        assert_eq!(first.provider_health(source).await.unwrap().unwrap().failure_count, 0);
    }

    #[tokio::test]
    #[ignore = "Requires running PostgreSQL"]
    async fn test_phase_history_queries() {
        let store = store().await;
        let phases = PhaseTypeTable::from_rows(&store.phase_types().await.unwrap()).unwrap();
        let now = Utc::now();
        let visit = VisitSnapshotId(now.timestamp_micros());
        let care_request = CareRequestId(now.timestamp_micros());

        for (phase, age) in [(VisitPhase::Committed, 120), (VisitPhase::EnRoute, 60)] {
            queries::visit_phase::record_phase_snapshot(
                store.pool(),
                &PhaseSnapshot {
                    visit_snapshot_id: visit,
                    care_request_id: care_request,
                    phase_type_id: phases.id(phase),
                    shift_team_id: Some(ShiftTeamId(3)),
                    created_at: now - Duration::seconds(age),
                },
            )
            .await
            .unwrap();
        }

        let rows = store.visit_phases(&[visit]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].phase_type_id, phases.id(VisitPhase::EnRoute));

        let latest = store.latest_care_request_phases(&[visit]).await.unwrap();
        assert_eq!(latest[0].care_request_id, care_request);

        let committed = store
            .latest_status_times(&[care_request], phases.id(VisitPhase::Committed), now)
            .await
            .unwrap();
        assert_eq!(committed[0].shift_team_id, Some(ShiftTeamId(3)));

        let early = store
            .latest_status_times(&[care_request], phases.id(VisitPhase::EnRoute), now - Duration::seconds(90))
            .await
            .unwrap();
        assert!(early.is_empty());
    }
}
