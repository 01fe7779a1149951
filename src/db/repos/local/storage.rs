use std::path::{Component, Path, PathBuf};

use rusqlite::{params, Row};

use crate::db::models::{StorageBucket, StorageObject};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_bucket(row: &Row) -> rusqlite::Result<StorageBucket> {
    let mime: Option<String> = row.get("allowed_mime_types")?;
    let allowed_mime_types = mime
        .map(|s| {
            serde_json::from_str(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
            })
        })
        .transpose()?;
    Ok(StorageBucket {
        id: row.get("id")?,
        name: row.get("name")?,
        public: row.get::<_, i32>("public")? != 0,
        file_size_limit: row.get("file_size_limit")?,
        allowed_mime_types,
        created_at: row.get("created_at")?,
    })
}

fn row_to_object(row: &Row) -> rusqlite::Result<StorageObject> {
    Ok(StorageObject {
        id: row.get("id")?,
        bucket_id: row.get("bucket_id")?,
        name: row.get("name")?,
        size: row.get("size")?,
        mime_type: row.get("mime_type")?,
        created_at: row.get("created_at")?,
    })
}

// ============================================================================
// Buckets
// ============================================================================

pub fn get_all_buckets(pool: &DbPool) -> Result<Vec<StorageBucket>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM _storage_buckets ORDER BY id")?;
    let rows = stmt.query_map([], row_to_bucket)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_bucket(pool: &DbPool, id: &str) -> Result<StorageBucket, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM _storage_buckets WHERE id = ?1",
        params![id],
        row_to_bucket,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Bucket {id}")),
        other => AppError::Database(other),
    })
}

pub fn create_bucket(pool: &DbPool, bucket: &StorageBucket) -> Result<(), AppError> {
    let mime = bucket
        .allowed_mime_types
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _storage_buckets (id, name, public, file_size_limit, allowed_mime_types, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            bucket.id,
            bucket.name,
            bucket.public as i32,
            bucket.file_size_limit,
            mime,
            bucket.created_at,
        ],
    )?;
    Ok(())
}

// ============================================================================
// Objects
// ============================================================================

pub fn get_objects(pool: &DbPool, bucket_id: &str) -> Result<Vec<StorageObject>, AppError> {
    let conn = pool.get()?;
    let mut stmt =
        conn.prepare("SELECT * FROM _storage_objects WHERE bucket_id = ?1 ORDER BY name")?;
    let rows = stmt.query_map(params![bucket_id], row_to_object)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_objects(pool: &DbPool, bucket_id: &str) -> Result<i64, AppError> {
    let conn = pool.get()?;
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM _storage_objects WHERE bucket_id = ?1",
        params![bucket_id],
        |row| row.get(0),
    )?)
}

pub fn create_object(pool: &DbPool, object: &StorageObject) -> Result<(), AppError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _storage_objects (id, bucket_id, name, size, mime_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            object.id,
            object.bucket_id,
            object.name,
            object.size,
            object.mime_type,
            object.created_at,
        ],
    )?;
    Ok(())
}

/// Resolve `{storage_dir}/{bucket}/{name}`, refusing any path that could
/// leave the bucket directory.
pub fn object_path(storage_dir: &Path, bucket_id: &str, name: &str) -> Result<PathBuf, AppError> {
    let relative = Path::new(name);
    let escapes = name.is_empty()
        || relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || Path::new(bucket_id).components().count() != 1 || bucket_id.contains("..") {
        return Err(AppError::Validation(format!(
            "Object path {bucket_id}/{name} escapes the storage directory"
        )));
    }
    Ok(storage_dir.join(bucket_id).join(relative))
}

pub fn read_object_bytes(storage_dir: &Path, object: &StorageObject) -> Result<Vec<u8>, AppError> {
    let path = object_path(storage_dir, &object.bucket_id, &object.name)?;
    Ok(std::fs::read(path)?)
}
