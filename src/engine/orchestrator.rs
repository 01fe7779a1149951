//! Migration lifecycle: item selection, sequential runs and retry.

use std::collections::HashMap;

use crate::db::models::{
    ItemSelection, ItemStatus, ItemType, Migration, MigrationItem, MigrationStatus,
};
use crate::db::repos::local::catalog;
use crate::db::repos::migration::{items as item_repo, migrations as migration_repo};
use crate::db::DbPool;
use crate::error::AppError;
use crate::validation::validate_identifier;

use super::{migrators, EngineContext};

fn running_error(migration_id: &str) -> AppError {
    AppError::Validation(format!(
        "Migration {migration_id} is currently running; retry it if the run was interrupted"
    ))
}

fn ensure_not_running(migration: &Migration) -> Result<(), AppError> {
    if migration.status == MigrationStatus::InProgress {
        return Err(running_error(&migration.id));
    }
    Ok(())
}

/// Replace the migration's items with `selection`. Names of tables, buckets
/// and functions must be plain identifiers.
pub fn select_items(
    pool: &DbPool,
    migration_id: &str,
    selection: &ItemSelection,
) -> Result<Vec<MigrationItem>, AppError> {
    let migration = migration_repo::get_by_id(pool, migration_id)?;
    ensure_not_running(&migration)?;

    let pairs = selection.to_pairs();
    for (item_type, name) in &pairs {
        if item_type.is_multi_instance() {
            validate_identifier(item_type.as_str(), name)?;
        }
    }

    let items = item_repo::replace_for_migration(pool, migration_id, &pairs)?;
    tracing::info!(migration_id = %migration_id, items = items.len(), "Items selected");
    Ok(items)
}

/// Position of each local table in foreign-key order. Used so parent tables
/// get their rows before the tables that reference them.
fn table_ranks(pool: &DbPool) -> HashMap<String, usize> {
    match catalog::describe_all(pool) {
        Ok(tables) => catalog::sort_by_dependencies(&tables)
            .into_iter()
            .enumerate()
            .map(|(rank, t)| (t.name, rank))
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Could not read local catalog; data items run in name order");
            HashMap::new()
        }
    }
}

fn run_order(items: &mut [MigrationItem], ranks: &HashMap<String, usize>) {
    items.sort_by(|a, b| {
        let rank = |i: &MigrationItem| match i.item_type {
            ItemType::Data => ranks.get(&i.item_name).copied().unwrap_or(usize::MAX),
            _ => 0,
        };
        a.item_type
            .run_order()
            .cmp(&b.item_type.run_order())
            .then_with(|| rank(a).cmp(&rank(b)))
            .then_with(|| a.item_name.cmp(&b.item_name))
    });
}

/// Run every pending item of the migration, one at a time.
///
/// Items that are already completed, skipped or rolled back are left alone,
/// so a run after a partial failure picks up where it stopped. A failing item
/// is recorded and the run moves on to the next one. Only one run may hold a
/// migration at a time.
#[tracing::instrument(skip(ctx))]
pub async fn run_migration(ctx: &EngineContext, migration_id: &str) -> Result<Migration, AppError> {
    let migration = migration_repo::get_by_id(&ctx.pool, migration_id)?;
    super::require_project(&migration)?;
    if item_repo::get_by_migration(&ctx.pool, migration_id)?.is_empty() {
        return Err(AppError::Validation(format!(
            "No items selected for migration {migration_id}"
        )));
    }
    if !migration_repo::claim_run(&ctx.pool, migration_id)? {
        return Err(running_error(migration_id));
    }

    let mut pending = item_repo::get_by_status(&ctx.pool, migration_id, ItemStatus::Pending)?;
    run_order(&mut pending, &table_ranks(&ctx.pool));
    tracing::info!(pending = pending.len(), "Migration run started");

    let mut failed_this_run = 0usize;
    for item in &pending {
        if migrators::migrate_item(ctx, &migration, item).await.is_err() {
            failed_this_run += 1;
        }
    }

    // An item still in progress never recorded its outcome.
    let unfinished = item_repo::get_by_status(&ctx.pool, migration_id, ItemStatus::Failed)?.len()
        + item_repo::get_by_status(&ctx.pool, migration_id, ItemStatus::InProgress)?.len();
    if unfinished > 0 {
        let message = format!("{unfinished} item(s) failed");
        migration_repo::update_status(&ctx.pool, migration_id, MigrationStatus::Failed, Some(&message))?;
        tracing::warn!(failed = unfinished, failed_this_run, "Migration run finished with failures");
    } else {
        migration_repo::update_status(&ctx.pool, migration_id, MigrationStatus::Completed, None)?;
        tracing::info!(items = pending.len(), "Migration run completed");
    }

    migration_repo::get_by_id(&ctx.pool, migration_id)
}

/// Put every failed item back to pending so the next run retries only those.
///
/// Allowed once the migration has failed, or when it is stuck `in_progress`
/// after an interrupted run; items that run left `in_progress` are reset too.
#[tracing::instrument(skip(pool))]
pub fn retry_failed_items(pool: &DbPool, migration_id: &str) -> Result<usize, AppError> {
    let migration = migration_repo::get_by_id(pool, migration_id)?;
    match migration.status {
        MigrationStatus::Failed => {}
        MigrationStatus::InProgress => {
            tracing::warn!("Recovering migration left in progress by an interrupted run");
        }
        other => {
            return Err(AppError::Validation(format!(
                "Only failed or interrupted migrations can be retried (status is {other})"
            )));
        }
    }

    let reset = item_repo::reset_unfinished(pool, migration_id)?;
    migration_repo::update_status(pool, migration_id, MigrationStatus::Pending, None)?;
    tracing::info!(reset, "Failed items reset to pending");
    Ok(reset)
}
