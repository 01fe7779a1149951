use rusqlite::{params, Row};

use crate::db::models::{
    Verification, VerificationLayer, VerificationResults, VerificationStatus,
};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_verification(row: &Row) -> rusqlite::Result<Verification> {
    let results: Option<String> = row.get("results")?;
    let results = results
        .map(|s| serde_json::from_str::<VerificationResults>(&s))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Verification {
        id: row.get("id")?,
        migration_id: row.get("migration_id")?,
        layer: row.get("layer")?,
        status: row.get("status")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        results,
        created_at: row.get("created_at")?,
    })
}

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<Verification, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM _migration_verifications WHERE id = ?1",
        params![id],
        row_to_verification,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Verification {id}")),
        other => AppError::Database(other),
    })
}

/// Verification history, newest first. Optionally restricted to one layer.
pub fn get_by_migration(
    pool: &DbPool,
    migration_id: &str,
    layer: Option<VerificationLayer>,
) -> Result<Vec<Verification>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM _migration_verifications
         WHERE migration_id = ?1 AND (?2 IS NULL OR layer = ?2)
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt.query_map(params![migration_id, layer], row_to_verification)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Record a new verification run in `running` state.
pub fn create_running(
    pool: &DbPool,
    migration_id: &str,
    layer: VerificationLayer,
) -> Result<Verification, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _migration_verifications
         (id, migration_id, layer, status, started_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, migration_id, layer, VerificationStatus::Running, now],
    )?;
    drop(conn);

    get_by_id(pool, &id)
}

/// Store the results and settle the status to passed/failed.
pub fn finish(
    pool: &DbPool,
    id: &str,
    results: &VerificationResults,
) -> Result<Verification, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let status = if results.all_passed() {
        VerificationStatus::Passed
    } else {
        VerificationStatus::Failed
    };
    let json = serde_json::to_string(results)?;

    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migration_verifications
         SET status = ?1, completed_at = ?2, results = ?3
         WHERE id = ?4",
        params![status, now, json, id],
    )?;
    drop(conn);
    if rows == 0 {
        return Err(AppError::NotFound(format!("Verification {id}")));
    }

    get_by_id(pool, id)
}
