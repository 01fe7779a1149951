use crate::cloud::RemoteTable;
use crate::db::models::{Migration, RollbackInfo};
use crate::db::repos::local::catalog;
use crate::error::AppError;
use crate::validation::validate_identifier;

use super::ItemOutcome;
use crate::engine::EngineContext;

/// Copy every row of one local table into the same-named remote table.
///
/// All rows go in one remote transaction, so a failing row leaves the remote
/// table as it was.
pub async fn migrate(
    ctx: &EngineContext,
    migration: &Migration,
    table_name: &str,
) -> Result<ItemOutcome, AppError> {
    validate_identifier("table", table_name)?;
    let target = RemoteTable::public(table_name)?;
    let (columns, rows) = catalog::read_rows(&ctx.pool, table_name)?;

    let db = ctx.database(migration).await?;
    let written = db.writer().insert_rows(&target, &columns, &rows).await?;

    tracing::debug!(
        migration_id = %migration.id,
        table = %table_name,
        rows = written,
        "Table data copied"
    );
    Ok(ItemOutcome::new(
        RollbackInfo::Data {
            table: table_name.to_string(),
            rows: written,
        },
        serde_json::json!({ "rows": written, "columns": columns.len() }),
    ))
}
