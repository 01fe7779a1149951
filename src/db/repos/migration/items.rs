use rusqlite::{params, Row};

use crate::db::models::{ItemStatus, ItemType, MigrationItem, RollbackInfo};
use crate::db::DbPool;
use crate::error::AppError;

// ============================================================================
// Row Mapper
// ============================================================================

fn json_column<T: serde::de::DeserializeOwned>(
    row: &Row,
    idx: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        serde_json::from_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn row_to_item(row: &Row) -> rusqlite::Result<MigrationItem> {
    Ok(MigrationItem {
        id: row.get("id")?,
        migration_id: row.get("migration_id")?,
        item_type: row.get("item_type")?,
        item_name: row.get("item_name")?,
        status: row.get("status")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        error_message: row.get("error_message")?,
        rollback_info: json_column(row, "rollback_info")?,
        metadata: json_column(row, "metadata")?,
        created_at: row.get("created_at")?,
    })
}

fn sort_for_run(items: &mut [MigrationItem]) {
    items.sort_by(|a, b| {
        a.item_type
            .run_order()
            .cmp(&b.item_type.run_order())
            .then_with(|| a.item_name.cmp(&b.item_name))
    });
}

// ============================================================================
// Queries
// ============================================================================

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<MigrationItem, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM _migration_items WHERE id = ?1",
        params![id],
        row_to_item,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Migration item {id}")),
        other => AppError::Database(other),
    })
}

/// All items of a migration in run order.
pub fn get_by_migration(pool: &DbPool, migration_id: &str) -> Result<Vec<MigrationItem>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM _migration_items WHERE migration_id = ?1")?;
    let rows = stmt.query_map(params![migration_id], row_to_item)?;
    let mut items = rows.collect::<Result<Vec<_>, _>>()?;
    sort_for_run(&mut items);
    Ok(items)
}

pub fn get_by_status(
    pool: &DbPool,
    migration_id: &str,
    status: ItemStatus,
) -> Result<Vec<MigrationItem>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM _migration_items WHERE migration_id = ?1 AND status = ?2",
    )?;
    let rows = stmt.query_map(params![migration_id, status], row_to_item)?;
    let mut items = rows.collect::<Result<Vec<_>, _>>()?;
    sort_for_run(&mut items);
    Ok(items)
}

// ============================================================================
// Selection
// ============================================================================

/// Replace the migration's items with `pairs`. Prior items are deleted first,
/// whatever their status.
pub fn replace_for_migration(
    pool: &DbPool,
    migration_id: &str,
    pairs: &[(ItemType, String)],
) -> Result<Vec<MigrationItem>, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    {
        let mut conn = pool.get()?;
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM _migration_items WHERE migration_id = ?1",
            params![migration_id],
        )?;
        for (item_type, item_name) in pairs {
            tx.execute(
                "INSERT INTO _migration_items
                 (id, migration_id, item_type, item_name, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    migration_id,
                    item_type,
                    item_name,
                    ItemStatus::Pending,
                    now,
                ],
            )?;
        }
        tx.commit()?;
        tracing::debug!(
            migration_id = %migration_id,
            removed,
            added = pairs.len(),
            "Replaced migration items"
        );
    }
    get_by_migration(pool, migration_id)
}

// ============================================================================
// Status transitions
// ============================================================================

fn transition_error(pool: &DbPool, id: &str, target: ItemStatus) -> AppError {
    match get_by_id(pool, id) {
        Ok(item) => AppError::Validation(format!(
            "Migration item {id} cannot move from {} to {target}",
            item.status
        )),
        Err(e) => e,
    }
}

/// pending → in_progress. Stamps `started_at`.
pub fn mark_in_progress(pool: &DbPool, id: &str) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migration_items
         SET status = ?1, started_at = ?2, completed_at = NULL, error_message = NULL
         WHERE id = ?3 AND status = ?4",
        params![ItemStatus::InProgress, now, id, ItemStatus::Pending],
    )?;
    drop(conn);
    if rows == 0 {
        return Err(transition_error(pool, id, ItemStatus::InProgress));
    }
    Ok(())
}

/// in_progress → completed, recording the rollback descriptor and metadata.
pub fn mark_completed(
    pool: &DbPool,
    id: &str,
    rollback_info: Option<&RollbackInfo>,
    metadata: Option<&serde_json::Value>,
) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rollback_json = rollback_info.map(serde_json::to_string).transpose()?;
    let metadata_json = metadata.map(serde_json::to_string).transpose()?;

    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migration_items
         SET status = ?1, completed_at = ?2, rollback_info = ?3, metadata = ?4,
             error_message = NULL
         WHERE id = ?5 AND status = ?6",
        params![
            ItemStatus::Completed,
            now,
            rollback_json,
            metadata_json,
            id,
            ItemStatus::InProgress
        ],
    )?;
    drop(conn);
    if rows == 0 {
        return Err(transition_error(pool, id, ItemStatus::Completed));
    }
    Ok(())
}

/// in_progress → failed with the error text.
pub fn mark_failed(pool: &DbPool, id: &str, error_message: &str) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migration_items
         SET status = ?1, completed_at = ?2, error_message = ?3
         WHERE id = ?4 AND status = ?5",
        params![ItemStatus::Failed, now, error_message, id, ItemStatus::InProgress],
    )?;
    drop(conn);
    if rows == 0 {
        return Err(transition_error(pool, id, ItemStatus::Failed));
    }
    Ok(())
}

/// failed | in_progress → pending for every such item of the migration,
/// clearing error and timestamps. An item still `in_progress` here was left
/// behind by an interrupted run. Returns the number of items reset.
pub fn reset_unfinished(pool: &DbPool, migration_id: &str) -> Result<usize, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migration_items
         SET status = ?1, error_message = NULL, started_at = NULL, completed_at = NULL
         WHERE migration_id = ?2 AND status IN (?3, ?4)",
        params![
            ItemStatus::Pending,
            migration_id,
            ItemStatus::Failed,
            ItemStatus::InProgress
        ],
    )?;
    Ok(rows)
}

/// pending → skipped.
pub fn mark_skipped(pool: &DbPool, id: &str) -> Result<(), AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migration_items SET status = ?1 WHERE id = ?2 AND status = ?3",
        params![ItemStatus::Skipped, id, ItemStatus::Pending],
    )?;
    drop(conn);
    if rows == 0 {
        return Err(transition_error(pool, id, ItemStatus::Skipped));
    }
    Ok(())
}

/// completed | failed → rolled_back, after an operator reversed the item by hand.
pub fn mark_rolled_back(pool: &DbPool, id: &str) -> Result<(), AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migration_items SET status = ?1
         WHERE id = ?2 AND status IN (?3, ?4)",
        params![
            ItemStatus::RolledBack,
            id,
            ItemStatus::Completed,
            ItemStatus::Failed
        ],
    )?;
    drop(conn);
    if rows == 0 {
        return Err(transition_error(pool, id, ItemStatus::RolledBack));
    }
    Ok(())
}
