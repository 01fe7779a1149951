use std::path::{Path, PathBuf};

use rusqlite::{params, Row};

use crate::db::models::LocalFunction;
use crate::db::DbPool;
use crate::error::AppError;
use crate::validation::validate_identifier;

fn row_to_function(row: &Row) -> rusqlite::Result<LocalFunction> {
    Ok(LocalFunction {
        name: row.get("name")?,
        verify_jwt: row.get::<_, Option<i32>>("verify_jwt")?.map(|v| v != 0),
        entrypoint: row.get("entrypoint")?,
        created_at: row.get("created_at")?,
    })
}

pub fn get_all(pool: &DbPool) -> Result<Vec<LocalFunction>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM _functions ORDER BY name")?;
    let rows = stmt.query_map([], row_to_function)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_by_name(pool: &DbPool, name: &str) -> Result<LocalFunction, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM _functions WHERE name = ?1",
        params![name],
        row_to_function,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Function {name}")),
        other => AppError::Database(other),
    })
}

pub fn create(pool: &DbPool, function: &LocalFunction) -> Result<(), AppError> {
    validate_identifier("function", &function.name)?;
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _functions (name, verify_jwt, entrypoint, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            function.name,
            function.verify_jwt.map(|v| v as i32),
            function.entrypoint,
            function.created_at,
        ],
    )?;
    Ok(())
}

/// Source directory of a function: `{functions_dir}/{name}/`.
pub fn source_dir(functions_dir: &Path, name: &str) -> Result<PathBuf, AppError> {
    validate_identifier("function", name)?;
    Ok(functions_dir.join(name))
}
