//! Data integrity: row counts, sampled row contents and referential
//! integrity of what landed remotely.

use serde_json::json;

use crate::cloud::{RemoteInspector, RemoteTable, SampleOrder};
use crate::db::models::{CheckResult, ItemType, Migration, SqlRow, Verification, VerificationLayer};
use crate::db::repos::local::{auth as auth_repo, catalog, storage as storage_repo};
use crate::engine::EngineContext;
use crate::error::AppError;

use super::sampling::{
    compare_samples, keys_of, local_count, local_rows_by_keys, local_sample, order_column, SampleMismatch,
};
use super::{check_or_fail, connection_failure, record_layer, CompletedItems};

#[tracing::instrument(skip(ctx))]
pub async fn run(ctx: &EngineContext, migration_id: &str) -> Result<Verification, AppError> {
    let items = CompletedItems::load(ctx, migration_id)?;
    record_layer(ctx, migration_id, VerificationLayer::Integrity, |migration| {
        checks(ctx, migration, items)
    })
    .await
}

async fn checks(ctx: &EngineContext, migration: Migration, items: CompletedItems) -> Vec<CheckResult> {
    let tables = items.names(ItemType::Data);
    let buckets = items.names(ItemType::StorageFiles);
    let users = items.has(ItemType::Users);
    if tables.is_empty() && buckets.is_empty() && !users {
        return Vec::new();
    }

    let db = match ctx.database(&migration).await {
        Ok(db) => db,
        Err(e) => return vec![connection_failure(&e)],
    };
    let inspector = db.inspector();
    let sample_size = ctx.config.verification.sample_size;

    let mut results = Vec::new();
    for table in &tables {
        let name = format!("row_count_{table}");
        results.push(check_or_fail(&name, row_count(ctx, inspector, table, &name).await));

        match sample_plan(ctx, inspector, table).await {
            Ok(Some(plan)) => {
                for order in [SampleOrder::First, SampleOrder::Last, SampleOrder::Random] {
                    let name = format!("sample_{}_{table}", order_label(order));
                    let result = sample_check(ctx, inspector, &plan, order, sample_size, &name).await;
                    results.push(check_or_fail(&name, result));
                }
            }
            Ok(None) => results.push(CheckResult::pass(
                format!("sample_{table}"),
                format!("{table} is empty locally; nothing to sample"),
            )),
            Err(e) => results.push(CheckResult::fail(
                format!("sample_{table}"),
                format!("Could not plan samples for {table}: {e}"),
            )),
        }
    }

    if !tables.is_empty() {
        let limit = ctx.config.verification.orphan_sample_limit;
        results.push(check_or_fail(
            "foreign_key_integrity",
            foreign_key_integrity(inspector, limit).await,
        ));
    }

    for bucket in &buckets {
        let name = format!("storage_file_count_{bucket}");
        results.push(check_or_fail(&name, storage_file_count(ctx, inspector, bucket, &name).await));
    }

    if users {
        results.push(check_or_fail("user_count", user_count(ctx, inspector).await));
    }

    results
}

fn order_label(order: SampleOrder) -> &'static str {
    match order {
        SampleOrder::First => "first",
        SampleOrder::Last => "last",
        SampleOrder::Random => "random",
    }
}

fn count_check(name: &str, what: &str, local: i64, remote: i64) -> CheckResult {
    let details = json!({ "local": local, "remote": remote, "difference": (local - remote).abs() });
    let result = if local == remote {
        CheckResult::pass(name, format!("{local} {what} on both sides"))
    } else {
        CheckResult::fail(name, format!("{local} {what} locally but {remote} remotely"))
    };
    result.with_details(details)
}

async fn row_count(
    ctx: &EngineContext,
    inspector: &dyn RemoteInspector,
    table: &str,
    name: &str,
) -> Result<CheckResult, AppError> {
    let local = local_count(&ctx.pool, table)?;
    let remote = inspector.count_rows(&RemoteTable::public(table)?).await?;
    Ok(count_check(name, &format!("rows in {table}"), local, remote))
}

struct SamplePlan {
    table: String,
    remote: RemoteTable,
    key_column: String,
}

/// Pick the column rows are ordered and matched by. `None` when there is
/// nothing to sample.
async fn sample_plan(
    ctx: &EngineContext,
    inspector: &dyn RemoteInspector,
    table: &str,
) -> Result<Option<SamplePlan>, AppError> {
    if local_count(&ctx.pool, table)? == 0 {
        return Ok(None);
    }
    let local = catalog::describe_table(&ctx.pool, table)?;
    let remote = RemoteTable::public(table)?;
    let primary_key: Vec<String> = local.primary_key().iter().map(|c| c.name.clone()).collect();
    let declared: Vec<String> = local.columns.iter().map(|c| c.name.clone()).collect();
    let reported = inspector.column_names(&remote).await?;

    let key_column = order_column(&primary_key, &declared, &reported)
        .ok_or_else(|| AppError::Validation(format!("Table {table} has no columns")))?;
    Ok(Some(SamplePlan {
        table: table.to_string(),
        remote,
        key_column,
    }))
}

/// Local rows are looked up remotely by key. The random sample also runs
/// the other way so rows that exist only remotely are caught.
async fn sample_check(
    ctx: &EngineContext,
    inspector: &dyn RemoteInspector,
    plan: &SamplePlan,
    order: SampleOrder,
    size: u32,
    name: &str,
) -> Result<CheckResult, AppError> {
    let local = local_sample(&ctx.pool, &plan.table, &plan.key_column, order, size)?;
    let remote = inspector
        .rows_by_keys(&plan.remote, &plan.key_column, &keys_of(&local, &plan.key_column))
        .await?;
    let mut mismatches = compare_samples(&local, &remote, &plan.key_column);
    let mut sampled = local.len();

    if order == SampleOrder::Random {
        let remote_sample: Vec<SqlRow> = inspector
            .sample_rows(&plan.remote, &plan.key_column, SampleOrder::Random, size)
            .await?;
        let local_match = local_rows_by_keys(
            &ctx.pool,
            &plan.table,
            &plan.key_column,
            &keys_of(&remote_sample, &plan.key_column),
        )?;
        mismatches.extend(compare_samples(&remote_sample, &local_match, &plan.key_column));
        sampled += remote_sample.len();
    }

    Ok(sample_result(name, &plan.table, order, sampled, &mismatches))
}

fn sample_result(
    name: &str,
    table: &str,
    order: SampleOrder,
    sampled: usize,
    mismatches: &[SampleMismatch],
) -> CheckResult {
    let details = json!({ "sample_size": sampled, "mismatches": mismatches });
    let label = order_label(order);
    let result = if mismatches.is_empty() {
        CheckResult::pass(name, format!("{sampled} {label} rows of {table} match"))
    } else {
        CheckResult::fail(
            name,
            format!("{} of {sampled} {label} rows of {table} differ", mismatches.len()),
        )
    };
    result.with_details(details)
}

async fn foreign_key_integrity(inspector: &dyn RemoteInspector, limit: u32) -> Result<CheckResult, AppError> {
    let constraints = inspector.foreign_keys("public").await?;
    let mut orphaned_count = 0i64;
    let mut orphaned_samples = Vec::new();
    let mut violations = Vec::new();

    for fk in &constraints {
        let report = inspector.orphaned_references(fk, limit).await?;
        if report.count == 0 {
            continue;
        }
        tracing::debug!(constraint = %fk.constraint_name, orphans = report.count, "Orphaned references");
        orphaned_count += report.count;
        orphaned_samples.extend(report.samples.iter().cloned());
        violations.push(json!({
            "constraint": fk.constraint_name,
            "table": fk.table,
            "column": fk.column,
            "references": format!("{}.{}", fk.ref_table, fk.ref_column),
            "count": report.count,
            "samples": report.samples,
        }));
    }

    let details = json!({
        "constraints_checked": constraints.len(),
        "orphaned_count": orphaned_count,
        "orphaned_samples": orphaned_samples,
        "violations": violations,
    });
    let result = if orphaned_count == 0 {
        CheckResult::pass(
            "foreign_key_integrity",
            format!("No orphaned references across {} foreign keys", constraints.len()),
        )
    } else {
        CheckResult::fail(
            "foreign_key_integrity",
            format!("{orphaned_count} orphaned references in {} foreign keys", violations.len()),
        )
    };
    Ok(result.with_details(details))
}

async fn storage_file_count(
    ctx: &EngineContext,
    inspector: &dyn RemoteInspector,
    bucket: &str,
    name: &str,
) -> Result<CheckResult, AppError> {
    let local = storage_repo::count_objects(&ctx.pool, bucket)?;
    let remote = inspector.count_bucket_objects(bucket).await?;
    Ok(count_check(name, &format!("files in {bucket}"), local, remote))
}

async fn user_count(ctx: &EngineContext, inspector: &dyn RemoteInspector) -> Result<CheckResult, AppError> {
    let local = auth_repo::count_users(&ctx.pool)?;
    let remote = inspector.count_rows(&RemoteTable::auth("users")?).await?;
    Ok(count_check("user_count", "users", local, remote))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ItemSelection, VerificationStatus};
    use crate::engine::migrators::auth::fixtures::seed_users;
    use crate::engine::orchestrator::{run_migration, select_items};
    use crate::engine::test_support::{connected_context, seed_todos};
    use crate::cloud::testing::FakeRemote;

    async fn migrated_todos() -> (EngineContext, FakeRemote, Migration) {
        let (ctx, remote, migration) = connected_context();
        seed_todos(&ctx.pool);
        seed_users(&ctx.pool);
        select_items(
            &ctx.pool,
            &migration.id,
            &ItemSelection {
                schema: true,
                data: vec!["lists".into(), "todos".into()],
                users: true,
                ..Default::default()
            },
        )
        .unwrap();
        let done = run_migration(&ctx, &migration.id).await.unwrap();
        assert_eq!(done.error_message, None);
        (ctx, remote, migration)
    }

    #[tokio::test]
    async fn test_identical_data_passes() {
        let (ctx, _remote, migration) = migrated_todos().await;
        let verification = run(&ctx, &migration.id).await.unwrap();
        let results = verification.results.unwrap();
        assert!(results.all_passed(), "{results:#?}");
        assert_eq!(verification.status, VerificationStatus::Passed);

        for name in [
            "row_count_todos",
            "sample_first_todos",
            "sample_last_todos",
            "sample_random_todos",
            "foreign_key_integrity",
            "user_count",
        ] {
            assert!(results.check(name).is_some(), "missing check {name}");
        }
        let fk = results.check("foreign_key_integrity").unwrap().details.clone().unwrap();
        assert_eq!(fk["constraints_checked"], 1);
    }

    #[tokio::test]
    async fn test_missing_remote_row_is_counted() {
        let (ctx, remote, migration) = migrated_todos().await;
        remote.execute("DELETE FROM public.todos WHERE id = 3");

        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        let count = results.check("row_count_todos").unwrap();
        assert!(!count.passed);
        let details = count.details.as_ref().unwrap();
        assert_eq!(details["local"], 3);
        assert_eq!(details["remote"], 2);
        assert_eq!(details["difference"], 1);
        let last = results.check("sample_last_todos").unwrap();
        assert!(!last.passed);
        assert_eq!(last.details.as_ref().unwrap()["mismatches"][0]["key"], 3);
    }

    #[tokio::test]
    async fn test_changed_value_is_reported_per_column() {
        let (ctx, remote, migration) = migrated_todos().await;
        remote.execute("UPDATE public.todos SET title = 'MILK' WHERE id = 1");

        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        let first = results.check("sample_first_todos").unwrap();
        assert!(!first.passed);
        let mismatches = &first.details.as_ref().unwrap()["mismatches"];
        assert_eq!(mismatches[0]["kind"], "different");
        assert_eq!(mismatches[0]["columns"][0]["column"], "title");
    }

    #[tokio::test]
    async fn test_orphaned_reference_detected() {
        let (ctx, remote, migration) = migrated_todos().await;
        remote.execute_unchecked(
            "INSERT INTO public.todos (id, list_id, title, done) VALUES (4, 99, 'stray', 0)",
        );

        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        let fk = results.check("foreign_key_integrity").unwrap();
        assert!(!fk.passed);
        let details = fk.details.as_ref().unwrap();
        assert!(details["orphaned_count"].as_i64().unwrap() >= 1);
        assert!(details["orphaned_samples"]
            .as_array()
            .unwrap()
            .contains(&serde_json::json!("99")));
    }

    #[tokio::test]
    async fn test_user_count_mismatch() {
        let (ctx, remote, migration) = migrated_todos().await;
        remote.execute("DELETE FROM auth.users WHERE id = 'u2'");
        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        assert!(!results.check("user_count").unwrap().passed);
    }

    #[tokio::test]
    async fn test_only_config_items_leave_nothing_to_verify() {
        let (ctx, _remote, migration) = connected_context();
        select_items(&ctx.pool, &migration.id, &ItemSelection { auth_config: true, ..Default::default() }).unwrap();
        run_migration(&ctx, &migration.id).await.unwrap();

        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        assert_eq!(results.summary.total, 1);
        assert_eq!(results.checks[0].name, "nothing_to_verify");
    }
}
