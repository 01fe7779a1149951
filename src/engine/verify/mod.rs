//! Post-migration verification in three layers. Each layer reads both sides
//! on its own paths and never reuses migrator code.

pub mod basic;
pub mod functional;
pub mod integrity;
pub mod normalize;
pub mod sampling;

use std::collections::BTreeSet;

use crate::db::models::{
    CheckResult, ItemStatus, ItemType, Migration, MigrationItem, Verification, VerificationLayer,
    VerificationResults,
};
use crate::db::repos::migration::{
    items as item_repo, migrations as migration_repo, verifications as verification_repo,
};
use crate::error::AppError;

use super::EngineContext;

/// Item types and names that completed in the migration.
pub(crate) struct CompletedItems(Vec<MigrationItem>);

impl CompletedItems {
    pub fn load(ctx: &EngineContext, migration_id: &str) -> Result<Self, AppError> {
        Ok(Self(item_repo::get_by_status(
            &ctx.pool,
            migration_id,
            ItemStatus::Completed,
        )?))
    }

    pub fn has(&self, item_type: ItemType) -> bool {
        self.0.iter().any(|i| i.item_type == item_type)
    }

    pub fn names(&self, item_type: ItemType) -> Vec<String> {
        let names: BTreeSet<&str> = self
            .0
            .iter()
            .filter(|i| i.item_type == item_type)
            .map(|i| i.item_name.as_str())
            .collect();
        names.into_iter().map(String::from).collect()
    }
}

pub(crate) fn connection_failure(e: &AppError) -> CheckResult {
    CheckResult::fail(
        "remote_connection",
        format!("Could not connect to the remote project: {e}"),
    )
}

/// Turn a failed check step into a failed result instead of an early return.
pub(crate) fn check_or_fail(name: &str, result: Result<CheckResult, AppError>) -> CheckResult {
    result.unwrap_or_else(|e| CheckResult::fail(name, format!("Check could not run: {e}")))
}

/// Record a layer run: `running` first, then the settled result. A layer
/// with nothing to check fails rather than passing vacuously.
pub(crate) async fn record_layer<F, Fut>(
    ctx: &EngineContext,
    migration_id: &str,
    layer: VerificationLayer,
    checks: F,
) -> Result<Verification, AppError>
where
    F: FnOnce(Migration) -> Fut,
    Fut: std::future::Future<Output = Vec<CheckResult>>,
{
    let migration = migration_repo::get_by_id(&ctx.pool, migration_id)?;
    let record = verification_repo::create_running(&ctx.pool, migration_id, layer)?;
    tracing::info!(migration_id = %migration_id, layer = %layer, "Verification started");

    let mut results = checks(migration).await;
    if results.is_empty() {
        results.push(CheckResult::fail(
            "nothing_to_verify",
            "No completed items of a kind this layer checks",
        ));
    }
    let results = VerificationResults::from_checks(results);

    let finished = verification_repo::finish(&ctx.pool, &record.id, &results)?;
    tracing::info!(
        migration_id = %migration_id,
        layer = %layer,
        status = %finished.status,
        passed = results.summary.passed,
        failed = results.summary.failed,
        "Verification finished"
    );
    Ok(finished)
}

/// Names in `expected` that are missing from `present`.
pub(crate) fn missing<'a>(expected: &'a [String], present: &[String]) -> Vec<&'a str> {
    let present: BTreeSet<&str> = present.iter().map(String::as_str).collect();
    expected
        .iter()
        .map(String::as_str)
        .filter(|n| !present.contains(n))
        .collect()
}

/// Pass when nothing is missing, otherwise fail listing what is.
pub(crate) fn presence_check(name: &str, what: &str, expected: &[String], present: &[String]) -> CheckResult {
    let absent = missing(expected, present);
    if absent.is_empty() {
        CheckResult::pass(name, format!("All {} {what} found remotely", expected.len()))
    } else {
        CheckResult::fail(name, format!("{} of {} {what} missing remotely", absent.len(), expected.len()))
            .with_details(serde_json::json!({ "missing": absent }))
    }
}
