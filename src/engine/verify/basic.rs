//! Existence and shape: did everything that was migrated arrive?

use serde_json::Value;

use crate::cloud::{ManagementApi, RemoteDatabase, RemoteInspector, RemoteTable};
use crate::db::models::{
    CheckResult, ItemType, Migration, SqlValue, Verification, VerificationLayer,
};
use crate::db::repos::local::{
    auth as auth_repo, catalog, policies as policy_repo, secrets as secret_repo,
    settings, storage as storage_repo,
};
use crate::engine::migrators::platform_config::ANONYMOUS_USERS_FLAG;
use crate::engine::EngineContext;
use crate::error::AppError;

use super::{check_or_fail, connection_failure, presence_check, record_layer, CompletedItems};

#[tracing::instrument(skip(ctx))]
pub async fn run(ctx: &EngineContext, migration_id: &str) -> Result<Verification, AppError> {
    let items = CompletedItems::load(ctx, migration_id)?;
    record_layer(ctx, migration_id, VerificationLayer::Basic, |migration| {
        checks(ctx, migration, items)
    })
    .await
}

async fn checks(ctx: &EngineContext, migration: Migration, items: CompletedItems) -> Vec<CheckResult> {
    let needs_db = [
        ItemType::Schema,
        ItemType::Data,
        ItemType::Users,
        ItemType::Identities,
        ItemType::Rls,
        ItemType::StorageBuckets,
        ItemType::StorageFiles,
    ]
    .into_iter()
    .any(|t| items.has(t));
    let needs_management = [
        ItemType::Functions,
        ItemType::Secrets,
        ItemType::AuthConfig,
        ItemType::OauthConfig,
    ]
    .into_iter()
    .any(|t| items.has(t));

    let db: Option<Box<dyn RemoteDatabase>> = if needs_db {
        match ctx.database(&migration).await {
            Ok(db) => Some(db),
            Err(e) => return vec![connection_failure(&e)],
        }
    } else {
        None
    };
    let management: Option<Box<dyn ManagementApi>> = if needs_management {
        match ctx.management(&migration) {
            Ok(m) => Some(m),
            Err(e) => return vec![connection_failure(&e)],
        }
    } else {
        None
    };
    let project_ref = migration.remote_project_ref.as_deref().unwrap_or_default();

    let mut results = Vec::new();

    if let Some(db) = db.as_deref() {
        let inspector = db.inspector();
        if items.has(ItemType::Schema) {
            results.push(check_or_fail("tables_exist", tables_exist(ctx, inspector).await));
        }
        for table in items.names(ItemType::Data) {
            let name = format!("columns_match_{table}");
            results.push(check_or_fail(&name, columns_match(ctx, inspector, &table, &name).await));
        }
        if items.has(ItemType::Users) {
            results.push(check_or_fail("users_exist", users_exist(ctx, inspector).await));
        }
        if items.has(ItemType::Identities) {
            results.push(check_or_fail("identities_exist", identities_exist(ctx, inspector).await));
        }
        if items.has(ItemType::StorageBuckets) {
            results.push(check_or_fail("buckets_exist", buckets_exist(ctx, inspector).await));
        }
        for bucket in items.names(ItemType::StorageFiles) {
            let name = format!("files_exist_{bucket}");
            results.push(check_or_fail(&name, files_exist(ctx, inspector, &bucket, &name).await));
        }
        if items.has(ItemType::Rls) {
            results.push(check_or_fail("rls_enabled", rls_enabled(ctx, inspector).await));
        }
    }

    if let Some(management) = management.as_deref() {
        if items.has(ItemType::Functions) {
            let migrated = items.names(ItemType::Functions);
            results.push(check_or_fail(
                "functions_deployed",
                functions_deployed(management, project_ref, &migrated).await,
            ));
        }
        if items.has(ItemType::Secrets) {
            results.push(check_or_fail("secrets_exist", secrets_exist(ctx, management, project_ref).await));
        }
        if items.has(ItemType::AuthConfig) || items.has(ItemType::OauthConfig) {
            match management.get_auth_config(project_ref).await {
                Ok(remote) => {
                    if items.has(ItemType::AuthConfig) {
                        results.push(check_or_fail("auth_config", auth_config(ctx, &remote)));
                    }
                    if items.has(ItemType::OauthConfig) {
                        results.push(check_or_fail("oauth_config", oauth_config(ctx, &remote)));
                    }
                }
                Err(e) => results.push(CheckResult::fail(
                    "auth_config",
                    format!("Could not read remote auth config: {e}"),
                )),
            }
        }
    }

    results
}

async fn tables_exist(ctx: &EngineContext, inspector: &dyn RemoteInspector) -> Result<CheckResult, AppError> {
    let local = catalog::list_user_tables(&ctx.pool)?;
    let remote = inspector.list_tables("public").await?;
    Ok(presence_check("tables_exist", "tables", &local, &remote))
}

/// Column count only. Types are left to the integrity layer's value checks.
async fn columns_match(
    ctx: &EngineContext,
    inspector: &dyn RemoteInspector,
    table: &str,
    name: &str,
) -> Result<CheckResult, AppError> {
    let local = catalog::describe_table(&ctx.pool, table)?.columns.len();
    let remote = inspector.column_names(&RemoteTable::public(table)?).await?.len();
    let details = serde_json::json!({ "local": local, "remote": remote });
    let result = if local == remote {
        CheckResult::pass(name, format!("{table} has {local} columns on both sides"))
    } else {
        CheckResult::fail(name, format!("{table} has {local} columns locally but {remote} remotely"))
    };
    Ok(result.with_details(details))
}

async fn keys_present(
    inspector: &dyn RemoteInspector,
    table: &RemoteTable,
    key_column: &str,
    expected: &[String],
) -> Result<Vec<String>, AppError> {
    let keys: Vec<SqlValue> = expected.iter().map(|k| SqlValue::Text(k.clone())).collect();
    let rows = inspector.rows_by_keys(table, key_column, &keys).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.iter().find(|(c, _)| c == key_column))
        .filter_map(|(_, v)| match v {
            SqlValue::Text(s) => Some(s.clone()),
            other => other.to_param_text(),
        })
        .collect())
}

async fn users_exist(ctx: &EngineContext, inspector: &dyn RemoteInspector) -> Result<CheckResult, AppError> {
    let local: Vec<String> = auth_repo::get_all_users(&ctx.pool)?.into_iter().map(|u| u.id).collect();
    let remote = keys_present(inspector, &RemoteTable::auth("users")?, "id", &local).await?;
    Ok(presence_check("users_exist", "users", &local, &remote))
}

async fn identities_exist(ctx: &EngineContext, inspector: &dyn RemoteInspector) -> Result<CheckResult, AppError> {
    let local: Vec<String> = auth_repo::get_all_identities(&ctx.pool)?
        .into_iter()
        .map(|i| i.id)
        .collect();
    let remote = keys_present(inspector, &RemoteTable::auth("identities")?, "id", &local).await?;
    Ok(presence_check("identities_exist", "identities", &local, &remote))
}

async fn buckets_exist(ctx: &EngineContext, inspector: &dyn RemoteInspector) -> Result<CheckResult, AppError> {
    let local: Vec<String> = storage_repo::get_all_buckets(&ctx.pool)?
        .into_iter()
        .map(|b| b.id)
        .collect();
    let remote = inspector.list_bucket_ids().await?;
    Ok(presence_check("buckets_exist", "buckets", &local, &remote))
}

async fn files_exist(
    ctx: &EngineContext,
    inspector: &dyn RemoteInspector,
    bucket: &str,
    name: &str,
) -> Result<CheckResult, AppError> {
    let local: Vec<String> = storage_repo::get_objects(&ctx.pool, bucket)?
        .into_iter()
        .map(|o| o.name)
        .collect();
    let objects = RemoteTable::storage("objects")?;
    let keys: Vec<SqlValue> = local.iter().map(|n| SqlValue::Text(n.clone())).collect();
    let remote: Vec<String> = inspector
        .rows_by_keys(&objects, "name", &keys)
        .await?
        .iter()
        .filter(|row| {
            row.iter()
                .any(|(c, v)| c == "bucket_id" && *v == SqlValue::Text(bucket.to_string()))
        })
        .filter_map(|row| row.iter().find(|(c, _)| c == "name"))
        .filter_map(|(_, v)| match v {
            SqlValue::Text(s) => Some(s.clone()),
            _ => None,
        })
        .collect();
    Ok(presence_check(name, "files", &local, &remote))
}

async fn rls_enabled(ctx: &EngineContext, inspector: &dyn RemoteInspector) -> Result<CheckResult, AppError> {
    let tables = policy_repo::tables_with_enabled_policies(&ctx.pool)?;
    let mut disabled = Vec::new();
    for table in &tables {
        let target = RemoteTable::public(table)?;
        match inspector.row_security_enabled(&target).await {
            Ok(true) => {}
            Ok(false) => disabled.push(table.clone()),
            Err(e) => disabled.push(format!("{table} ({e})")),
        }
    }
    Ok(if disabled.is_empty() {
        CheckResult::pass("rls_enabled", format!("Row security enabled on all {} tables", tables.len()))
    } else {
        CheckResult::fail(
            "rls_enabled",
            format!("Row security not enabled on {} of {} tables", disabled.len(), tables.len()),
        )
        .with_details(serde_json::json!({ "tables": disabled }))
    })
}

async fn functions_deployed(
    management: &dyn ManagementApi,
    project_ref: &str,
    migrated: &[String],
) -> Result<CheckResult, AppError> {
    let remote: Vec<String> = management
        .list_functions(project_ref)
        .await?
        .into_iter()
        .map(|f| f.slug)
        .collect();
    Ok(presence_check("functions_deployed", "functions", migrated, &remote))
}

/// Names only; secret values are never read back.
async fn secrets_exist(
    ctx: &EngineContext,
    management: &dyn ManagementApi,
    project_ref: &str,
) -> Result<CheckResult, AppError> {
    let local = secret_repo::get_names(&ctx.pool)?;
    let remote = management.list_secret_names(project_ref).await?;
    Ok(presence_check("secrets_exist", "secrets", &local, &remote))
}

fn auth_config(ctx: &EngineContext, remote: &Value) -> Result<CheckResult, AppError> {
    if !settings::get_bool(&ctx.pool, settings::ANONYMOUS_SIGN_IN)? {
        return Ok(CheckResult::pass("auth_config", "Anonymous sign-in is not enabled locally"));
    }
    Ok(if remote.get(ANONYMOUS_USERS_FLAG) == Some(&Value::Bool(true)) {
        CheckResult::pass("auth_config", "Anonymous sign-in enabled on both sides")
    } else {
        CheckResult::fail("auth_config", "Anonymous sign-in is enabled locally but not remotely")
    })
}

/// Remote flags for every provider enabled locally, e.g.
/// `external_github_enabled`.
fn enabled_provider_flags(entries: &[(String, String)]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|(key, value)| {
            let provider = key
                .strip_prefix(settings::OAUTH_PREFIX)?
                .strip_suffix(".enabled")?;
            let on = matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on");
            on.then(|| format!("external_{provider}_enabled"))
        })
        .collect()
}

/// Every provider enabled locally must be enabled remotely.
fn oauth_config(ctx: &EngineContext, remote: &Value) -> Result<CheckResult, AppError> {
    let enabled = enabled_provider_flags(&settings::get_prefixed(&ctx.pool, settings::OAUTH_PREFIX)?);
    let off: Vec<&String> = enabled
        .iter()
        .filter(|k| remote.get(k.as_str()) != Some(&Value::Bool(true)))
        .collect();
    Ok(if off.is_empty() {
        CheckResult::pass("oauth_config", format!("{} OAuth providers enabled remotely", enabled.len()))
    } else {
        CheckResult::fail("oauth_config", format!("{} OAuth providers not enabled remotely", off.len()))
            .with_details(serde_json::json!({ "settings": off }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{ItemSelection, VerificationStatus};
    use crate::db::repos::migration::verifications as verification_repo;
    use crate::engine::migrators::{auth::fixtures::seed_users, rls::fixtures::seed_policies};
    use crate::engine::orchestrator::{run_migration, select_items};
    use crate::engine::test_support::{connected_context, seed_todos};

    #[test]
    fn test_enabled_provider_flags() {
        let entries = vec![
            ("oauth.github.enabled".to_string(), "true".to_string()),
            ("oauth.github.client_id".to_string(), "abc".to_string()),
            ("oauth.google.enabled".to_string(), "false".to_string()),
        ];
        assert_eq!(enabled_provider_flags(&entries), vec!["external_github_enabled"]);
    }

    #[tokio::test]
    async fn test_passes_after_successful_migration() {
        let (ctx, _remote, migration) = connected_context();
        seed_todos(&ctx.pool);
        seed_users(&ctx.pool);
        seed_policies(&ctx.pool);
        secret_repo::set(&ctx.pool, &ctx.vault, "STRIPE_KEY", "sk").unwrap();
        settings::set(&ctx.pool, settings::ANONYMOUS_SIGN_IN, "true").unwrap();
        settings::set(&ctx.pool, "oauth.github.enabled", "true").unwrap();

        select_items(
            &ctx.pool,
            &migration.id,
            &ItemSelection {
                schema: true,
                data: vec!["lists".into(), "todos".into()],
                users: true,
                identities: true,
                rls: true,
                secrets: true,
                auth_config: true,
                oauth_config: true,
                ..Default::default()
            },
        )
        .unwrap();
        let done = run_migration(&ctx, &migration.id).await.unwrap();
        assert_eq!(done.error_message, None);

        let verification = run(&ctx, &migration.id).await.unwrap();
        let results = verification.results.unwrap();
        assert!(results.all_passed(), "{results:#?}");
        assert_eq!(verification.status, VerificationStatus::Passed);
        for name in [
            "tables_exist",
            "columns_match_todos",
            "users_exist",
            "identities_exist",
            "rls_enabled",
            "secrets_exist",
            "auth_config",
            "oauth_config",
        ] {
            assert!(results.check(name).is_some(), "missing check {name}");
        }
    }

    #[tokio::test]
    async fn test_detects_missing_remote_table() {
        let (ctx, remote, migration) = connected_context();
        seed_todos(&ctx.pool);
        select_items(&ctx.pool, &migration.id, &ItemSelection { schema: true, ..Default::default() }).unwrap();
        run_migration(&ctx, &migration.id).await.unwrap();
        remote.execute("DROP TABLE public.lists");

        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        let check = results.check("tables_exist").unwrap();
        assert!(!check.passed);
        assert_eq!(check.details.as_ref().unwrap()["missing"], serde_json::json!(["lists"]));
    }

    #[tokio::test]
    async fn test_column_count_mismatch() {
        let (ctx, remote, migration) = connected_context();
        seed_todos(&ctx.pool);
        select_items(
            &ctx.pool,
            &migration.id,
            &ItemSelection { schema: true, data: vec!["lists".into()], ..Default::default() },
        )
        .unwrap();
        run_migration(&ctx, &migration.id).await.unwrap();
        remote.execute("ALTER TABLE public.lists ADD COLUMN extra TEXT");

        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        assert!(!results.check("columns_match_lists").unwrap().passed);
    }

    #[tokio::test]
    async fn test_connection_failure_short_circuits() {
        let (ctx, remote, migration) = connected_context();
        seed_todos(&ctx.pool);
        select_items(&ctx.pool, &migration.id, &ItemSelection { schema: true, ..Default::default() }).unwrap();
        run_migration(&ctx, &migration.id).await.unwrap();
        remote.fail("database");

        let verification = run(&ctx, &migration.id).await.unwrap();
        let results = verification.results.unwrap();
        assert_eq!(results.summary.total, 1);
        assert_eq!(results.checks[0].name, "remote_connection");
        assert_eq!(verification.status, VerificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_nothing_completed_fails_and_history_accumulates() {
        let (ctx, _remote, migration) = connected_context();
        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        assert_eq!(results.checks[0].name, "nothing_to_verify");
        assert!(!results.all_passed());

        run(&ctx, &migration.id).await.unwrap();
        let history =
            verification_repo::get_by_migration(&ctx.pool, &migration.id, Some(VerificationLayer::Basic)).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_remote_file_row() {
        use crate::engine::migrators::storage::fixtures::seed_bucket;

        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::MigratorConfig {
            server_secret: Some(crate::engine::test_support::TEST_SECRET.into()),
            storage_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let (ctx, remote, migration) =
            crate::engine::test_support::context_with(crate::db::init_test_db().unwrap(), config);
        seed_bucket(&ctx.pool, dir.path());
        select_items(
            &ctx.pool,
            &migration.id,
            &ItemSelection { storage_buckets: true, storage_files: vec!["avatars".into()], ..Default::default() },
        )
        .unwrap();
        run_migration(&ctx, &migration.id).await.unwrap();
        remote.remove_object_row("avatars", "ada.txt");

        let results = run(&ctx, &migration.id).await.unwrap().results.unwrap();
        assert!(results.check("buckets_exist").unwrap().passed);
        let files = results.check("files_exist_avatars").unwrap();
        assert!(!files.passed);
        assert_eq!(files.details.as_ref().unwrap()["missing"], serde_json::json!(["ada.txt"]));
    }
}
