use rusqlite::{params, Row};

use crate::db::models::RlsPolicy;
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_policy(row: &Row) -> rusqlite::Result<RlsPolicy> {
    let roles: Option<String> = row.get("roles")?;
    Ok(RlsPolicy {
        id: row.get("id")?,
        table_name: row.get("table_name")?,
        name: row.get("name")?,
        command: row.get("command")?,
        roles: roles
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        using_expr: row.get("using_expr")?,
        check_expr: row.get("check_expr")?,
        enabled: row.get::<_, i32>("enabled")? != 0,
    })
}

pub fn get_all(pool: &DbPool) -> Result<Vec<RlsPolicy>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM _rls_policies ORDER BY table_name, name")?;
    let rows = stmt.query_map([], row_to_policy)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_enabled(pool: &DbPool) -> Result<Vec<RlsPolicy>, AppError> {
    Ok(get_all(pool)?.into_iter().filter(|p| p.enabled).collect())
}

/// Distinct tables guarded by at least one enabled policy.
pub fn tables_with_enabled_policies(pool: &DbPool) -> Result<Vec<String>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT DISTINCT table_name FROM _rls_policies WHERE enabled = 1 ORDER BY table_name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn create(pool: &DbPool, policy: &RlsPolicy) -> Result<(), AppError> {
    let roles = serde_json::to_string(&policy.roles)?;
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _rls_policies (id, table_name, name, command, roles, using_expr, check_expr, enabled)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            policy.id,
            policy.table_name,
            policy.name,
            policy.command,
            roles,
            policy.using_expr,
            policy.check_expr,
            policy.enabled as i32,
        ],
    )?;
    Ok(())
}
