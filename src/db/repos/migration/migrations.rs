use rusqlite::{params, Row};

use crate::db::models::{Migration, MigrationStatus};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_migration(row: &Row) -> rusqlite::Result<Migration> {
    Ok(Migration {
        id: row.get("id")?,
        remote_project_ref: row.get("remote_project_ref")?,
        remote_project_name: row.get("remote_project_name")?,
        encrypted_credentials: row.get("encrypted_credentials")?,
        status: row.get("status")?,
        error_message: row.get("error_message")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

pub fn get_all(pool: &DbPool) -> Result<Vec<Migration>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM _migrations ORDER BY created_at DESC")?;
    let rows = stmt.query_map([], row_to_migration)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<Migration, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM _migrations WHERE id = ?1",
        params![id],
        row_to_migration,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Migration {id}")),
        other => AppError::Database(other),
    })
}

pub fn create(pool: &DbPool) -> Result<Migration, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _migrations (id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![id, MigrationStatus::Pending, now],
    )?;
    drop(conn);

    get_by_id(pool, &id)
}

/// Deletes the migration together with its items, verifications and stored
/// database password.
pub fn delete(pool: &DbPool, id: &str) -> Result<bool, AppError> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    // Explicit cleanup so nothing is orphaned even without PRAGMA foreign_keys.
    tx.execute("DELETE FROM _migration_items WHERE migration_id = ?1", params![id])?;
    tx.execute("DELETE FROM _migration_verifications WHERE migration_id = ?1", params![id])?;
    tx.execute("DELETE FROM _migration_db_passwords WHERE migration_id = ?1", params![id])?;
    let rows = tx.execute("DELETE FROM _migrations WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(rows > 0)
}

/// Store (or clear) the vault-encrypted remote access token.
pub fn set_credentials(
    pool: &DbPool,
    id: &str,
    encrypted_credentials: Option<&str>,
) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migrations SET encrypted_credentials = ?1, updated_at = ?2 WHERE id = ?3",
        params![encrypted_credentials, now, id],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound(format!("Migration {id}")));
    }
    Ok(())
}

pub fn set_project(
    pool: &DbPool,
    id: &str,
    project_ref: Option<&str>,
    project_name: Option<&str>,
) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migrations
         SET remote_project_ref = ?1, remote_project_name = ?2, updated_at = ?3
         WHERE id = ?4",
        params![project_ref, project_name, now, id],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound(format!("Migration {id}")));
    }
    Ok(())
}

/// Set the status. Terminal statuses stamp `completed_at`; `pending` and
/// `in_progress` clear it along with any previous error.
pub fn update_status(
    pool: &DbPool,
    id: &str,
    status: MigrationStatus,
    error_message: Option<&str>,
) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let completed_at = match status {
        MigrationStatus::Completed | MigrationStatus::Failed => Some(now.as_str()),
        MigrationStatus::Pending | MigrationStatus::InProgress => None,
    };

    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migrations
         SET status = ?1, error_message = ?2, completed_at = ?3, updated_at = ?4
         WHERE id = ?5",
        params![status, error_message, completed_at, now, id],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound(format!("Migration {id}")));
    }
    Ok(())
}

/// Move the migration to `in_progress` unless a run already holds it.
/// Returns `false` when the migration is already in progress.
pub fn claim_run(pool: &DbPool, id: &str) -> Result<bool, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE _migrations
         SET status = ?1, error_message = NULL, completed_at = NULL, updated_at = ?2
         WHERE id = ?3 AND status != ?1",
        params![MigrationStatus::InProgress, now, id],
    )?;
    drop(conn);
    if rows == 0 {
        get_by_id(pool, id)?;
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    #[test]
    fn test_migration_lifecycle() {
        let pool = init_test_db().unwrap();

        let m = create(&pool).unwrap();
        assert_eq!(m.status, MigrationStatus::Pending);
        assert!(!m.is_connected());
        assert!(m.remote_project_ref.is_none());

        set_credentials(&pool, &m.id, Some("blob")).unwrap();
        set_project(&pool, &m.id, Some("abcdefgh"), Some("Prod")).unwrap();
        let fetched = get_by_id(&pool, &m.id).unwrap();
        assert!(fetched.is_connected());
        assert_eq!(fetched.remote_project_ref.as_deref(), Some("abcdefgh"));
        assert_eq!(fetched.remote_project_name.as_deref(), Some("Prod"));

        update_status(&pool, &m.id, MigrationStatus::Failed, Some("2 items failed")).unwrap();
        let failed = get_by_id(&pool, &m.id).unwrap();
        assert_eq!(failed.status, MigrationStatus::Failed);
        assert!(failed.completed_at.is_some());
        assert_eq!(failed.error_message.as_deref(), Some("2 items failed"));

        update_status(&pool, &m.id, MigrationStatus::Pending, None).unwrap();
        let reset = get_by_id(&pool, &m.id).unwrap();
        assert!(reset.completed_at.is_none());
        assert!(reset.error_message.is_none());

        assert_eq!(get_all(&pool).unwrap().len(), 1);
        assert!(delete(&pool, &m.id).unwrap());
        assert!(matches!(get_by_id(&pool, &m.id), Err(AppError::NotFound(_))));
        assert!(!delete(&pool, &m.id).unwrap());
    }

    #[test]
    fn test_claim_run_only_once() {
        let pool = init_test_db().unwrap();
        let m = create(&pool).unwrap();
        update_status(&pool, &m.id, MigrationStatus::Failed, Some("1 item(s) failed")).unwrap();

        assert!(claim_run(&pool, &m.id).unwrap());
        let claimed = get_by_id(&pool, &m.id).unwrap();
        assert_eq!(claimed.status, MigrationStatus::InProgress);
        assert!(claimed.error_message.is_none() && claimed.completed_at.is_none());

        assert!(!claim_run(&pool, &m.id).unwrap());
        assert!(matches!(claim_run(&pool, "nope"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_encrypted_credentials_not_serialized() {
        let pool = init_test_db().unwrap();
        let m = create(&pool).unwrap();
        set_credentials(&pool, &m.id, Some("secret-blob")).unwrap();
        let json = serde_json::to_string(&get_by_id(&pool, &m.id).unwrap()).unwrap();
        assert!(!json.contains("secret-blob"));
    }
}
