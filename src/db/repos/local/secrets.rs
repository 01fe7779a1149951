use rusqlite::params;

use crate::db::models::LocalSecret;
use crate::db::DbPool;
use crate::engine::crypto::Vault;
use crate::error::AppError;
use crate::validation::validate_identifier;

pub fn get_all(pool: &DbPool) -> Result<Vec<LocalSecret>, AppError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT name, encrypted_value, created_at FROM _secrets ORDER BY name")?;
    let rows = stmt.query_map([], |row| {
        Ok(LocalSecret {
            name: row.get(0)?,
            encrypted_value: row.get(1)?,
            created_at: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_names(pool: &DbPool) -> Result<Vec<String>, AppError> {
    Ok(get_all(pool)?.into_iter().map(|s| s.name).collect())
}

/// Encrypt `value` with the vault and store it under `name`.
pub fn set(pool: &DbPool, vault: &Vault, name: &str, value: &str) -> Result<(), AppError> {
    validate_identifier("secret", name)?;
    let encrypted = vault.encrypt(value)?;
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _secrets (name, encrypted_value, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(name) DO UPDATE SET encrypted_value = ?2",
        params![name, encrypted, now],
    )?;
    Ok(())
}
