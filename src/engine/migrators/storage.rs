use crate::cloud::RemoteTable;
use crate::db::models::{Migration, RollbackInfo, SqlValue, StorageBucket};
use crate::db::repos::local::storage as storage_repo;
use crate::error::AppError;
use crate::validation::validate_identifier;

use super::ItemOutcome;
use crate::engine::EngineContext;

const BUCKET_COLUMNS: [&str; 6] = [
    "id",
    "name",
    "public",
    "file_size_limit",
    "allowed_mime_types",
    "created_at",
];

/// Postgres array literal, e.g. `{"image/png","text/plain"}`.
pub fn text_array_literal(values: &[String]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|v| format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", items.join(","))
}

fn bucket_row(bucket: &StorageBucket) -> Vec<SqlValue> {
    vec![
        SqlValue::Text(bucket.id.clone()),
        SqlValue::Text(bucket.name.clone()),
        SqlValue::Bool(bucket.public),
        bucket.file_size_limit.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
        bucket
            .allowed_mime_types
            .as_deref()
            .map(|m| SqlValue::Text(text_array_literal(m)))
            .unwrap_or(SqlValue::Null),
        SqlValue::Text(bucket.created_at.clone()),
    ]
}

/// Copy bucket definitions into `storage.buckets` in one transaction.
pub async fn migrate_buckets(ctx: &EngineContext, migration: &Migration) -> Result<ItemOutcome, AppError> {
    let buckets = storage_repo::get_all_buckets(&ctx.pool)?;
    for bucket in &buckets {
        validate_identifier("bucket", &bucket.id)?;
    }
    let bucket_ids: Vec<String> = buckets.iter().map(|b| b.id.clone()).collect();

    if !buckets.is_empty() {
        let columns: Vec<String> = BUCKET_COLUMNS.iter().map(|c| c.to_string()).collect();
        let rows: Vec<Vec<SqlValue>> = buckets.iter().map(bucket_row).collect();
        let db = ctx.database(migration).await?;
        db.writer()
            .insert_rows(&RemoteTable::storage("buckets")?, &columns, &rows)
            .await?;
    }

    tracing::debug!(migration_id = %migration.id, buckets = bucket_ids.len(), "Buckets copied");
    Ok(ItemOutcome::new(
        RollbackInfo::StorageBuckets { bucket_ids: bucket_ids.clone() },
        serde_json::json!({ "buckets": bucket_ids.len() }),
    ))
}

/// Upload every object of one bucket through the storage API, one request
/// per object. The first failure stops the item; a retry uploads all objects
/// again.
pub async fn migrate_files(
    ctx: &EngineContext,
    migration: &Migration,
    bucket_id: &str,
) -> Result<ItemOutcome, AppError> {
    validate_identifier("bucket", bucket_id)?;
    let bucket = storage_repo::get_bucket(&ctx.pool, bucket_id)?;
    let objects = storage_repo::get_objects(&ctx.pool, &bucket.id)?;

    let mut paths = Vec::with_capacity(objects.len());
    let mut total_bytes = 0u64;
    if !objects.is_empty() {
        let project = ctx.project(migration).await?;
        for object in &objects {
            let bytes = storage_repo::read_object_bytes(&ctx.config.storage_dir, object)?;
            total_bytes += bytes.len() as u64;
            project
                .upload_object(&bucket.id, &object.name, bytes, object.mime_type.as_deref())
                .await
                .map_err(|e| AppError::Remote(format!("Upload of {}/{} failed: {e}", bucket.id, object.name)))?;
            paths.push(object.name.clone());
        }
    }

    tracing::debug!(
        migration_id = %migration.id,
        bucket = %bucket.id,
        files = paths.len(),
        bytes = total_bytes,
        "Bucket files uploaded"
    );
    Ok(ItemOutcome::new(
        RollbackInfo::StorageFiles {
            bucket: bucket.id.clone(),
            paths: paths.clone(),
        },
        serde_json::json!({ "files": paths.len(), "bytes": total_bytes }),
    ))
}
