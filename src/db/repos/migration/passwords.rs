//! Remote database passwords, stored vault-encrypted apart from the
//! migration row so the token and the password never travel together.

use rusqlite::params;

use crate::db::DbPool;
use crate::error::AppError;

pub fn get(pool: &DbPool, migration_id: &str) -> Result<Option<String>, AppError> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT encrypted_password FROM _migration_db_passwords WHERE migration_id = ?1",
        params![migration_id],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(val) => Ok(Some(val)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(AppError::Database(e)),
    }
}

pub fn set(pool: &DbPool, migration_id: &str, encrypted_password: &str) -> Result<(), AppError> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO _migration_db_passwords (migration_id, encrypted_password, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(migration_id) DO UPDATE SET encrypted_password = ?2, updated_at = ?3",
        params![migration_id, encrypted_password, now],
    )?;
    Ok(())
}

pub fn delete(pool: &DbPool, migration_id: &str) -> Result<bool, AppError> {
    let conn = pool.get()?;
    let rows = conn.execute(
        "DELETE FROM _migration_db_passwords WHERE migration_id = ?1",
        params![migration_id],
    )?;
    Ok(rows > 0)
}
