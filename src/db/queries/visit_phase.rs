//! Visit phase database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::services::actuals::PhaseSnapshot;
use crate::types::{
    CareRequestId, CareRequestPhaseRow, PhaseStatusRow, PhaseTypeId, PhaseTypeRow, VisitPhaseRow,
    VisitSnapshotId,
};

fn raw_ids<T: Copy>(ids: &[T], get: impl Fn(T) -> i64) -> Vec<i64> {
    ids.iter().copied().map(get).collect()
}

pub async fn list_phase_types(pool: &PgPool) -> Result<Vec<PhaseTypeRow>> {
    let rows = sqlx::query_as::<_, PhaseTypeRow>("SELECT id, short_name FROM visit_phase_types ORDER BY id")
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Latest recorded phase of each visit snapshot
pub async fn visit_phases(pool: &PgPool, visit_ids: &[VisitSnapshotId]) -> Result<Vec<VisitPhaseRow>> {
    let rows = sqlx::query_as::<_, VisitPhaseRow>(
        r#"
        SELECT DISTINCT ON (visit_snapshot_id) visit_snapshot_id, care_request_id, phase_type_id
        FROM visit_phase_snapshots
        WHERE visit_snapshot_id = ANY($1)
        ORDER BY visit_snapshot_id, created_at DESC, id DESC
        "#,
    )
    .bind(raw_ids(visit_ids, VisitSnapshotId::get))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Latest phase of each care request behind the given visits, over all of
/// its visit snapshots
pub async fn latest_care_request_phases(
    pool: &PgPool,
    visit_ids: &[VisitSnapshotId],
) -> Result<Vec<CareRequestPhaseRow>> {
    let rows = sqlx::query_as::<_, CareRequestPhaseRow>(
        r#"
        SELECT DISTINCT ON (s.care_request_id) s.care_request_id, s.phase_type_id
        FROM visit_phase_snapshots s
        WHERE s.care_request_id IN (
            SELECT care_request_id FROM visit_phase_snapshots WHERE visit_snapshot_id = ANY($1)
        )
        ORDER BY s.care_request_id, s.created_at DESC, s.id DESC
        "#,
    )
    .bind(raw_ids(visit_ids, VisitSnapshotId::get))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Latest transition into `phase_type_id` at or before `as_of`
pub async fn latest_status_times(
    pool: &PgPool,
    care_request_ids: &[CareRequestId],
    phase_type_id: PhaseTypeId,
    as_of: DateTime<Utc>,
) -> Result<Vec<PhaseStatusRow>> {
    let rows = sqlx::query_as::<_, PhaseStatusRow>(
        r#"
        SELECT DISTINCT ON (care_request_id)
               care_request_id, shift_team_id, created_at AS status_created_at
        FROM visit_phase_snapshots
        WHERE care_request_id = ANY($1) AND phase_type_id = $2 AND created_at <= $3
        ORDER BY care_request_id, created_at DESC, id DESC
        "#,
    )
    .bind(raw_ids(care_request_ids, CareRequestId::get))
    .bind(phase_type_id)
    .bind(as_of)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn record_phase_snapshot(pool: &PgPool, snapshot: &PhaseSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO visit_phase_snapshots
            (visit_snapshot_id, care_request_id, phase_type_id, shift_team_id, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(snapshot.visit_snapshot_id)
    .bind(snapshot.care_request_id)
    .bind(snapshot.phase_type_id)
    .bind(snapshot.shift_team_id)
    .bind(snapshot.created_at)
    .execute(pool)
    .await?;

    Ok(())
}
