//! Live probes against the remote project. Each probe runs only when the
//! caller asks for it, and each cleans up after itself.

use serde_json::json;
use uuid::Uuid;

use crate::cloud::{ProjectApi, RemoteDatabase, RemoteTable};
use crate::db::models::{CheckResult, FunctionalOptions, Migration, Verification, VerificationLayer};
use crate::engine::EngineContext;
use crate::error::AppError;
use crate::validation::validate_identifier;

use super::{check_or_fail, connection_failure, record_layer};

/// Prefix of the temporary object the storage probe writes.
pub const PROBE_PREFIX: &str = "_hostlift_probe";

#[tracing::instrument(skip(ctx))]
pub async fn run(
    ctx: &EngineContext,
    migration_id: &str,
    options: &FunctionalOptions,
) -> Result<Verification, AppError> {
    record_layer(ctx, migration_id, VerificationLayer::Functional, |migration| {
        checks(ctx, migration, options)
    })
    .await
}

async fn checks(ctx: &EngineContext, migration: Migration, options: &FunctionalOptions) -> Vec<CheckResult> {
    if options.is_empty() {
        return vec![CheckResult::fail("no_probes_requested", "No functional probe was requested")];
    }

    let db: Option<Box<dyn RemoteDatabase>> = if options.query_table.is_some() {
        match ctx.database(&migration).await {
            Ok(db) => Some(db),
            Err(e) => return vec![connection_failure(&e)],
        }
    } else {
        None
    };
    let needs_project = options.storage_bucket.is_some() || options.function_name.is_some() || options.test_auth;
    let project: Option<Box<dyn ProjectApi>> = if needs_project {
        match ctx.project(&migration).await {
            Ok(p) => Some(p),
            Err(e) => return vec![connection_failure(&e)],
        }
    } else {
        None
    };

    let mut results = Vec::new();
    if let (Some(table), Some(db)) = (options.query_table.as_deref(), db.as_deref()) {
        let limit = ctx.config.verification.query_test_limit;
        results.push(check_or_fail("query_test", query_test(db, table, limit).await));
    }
    if let Some(project) = project.as_deref() {
        if let Some(bucket) = options.storage_bucket.as_deref() {
            results.push(check_or_fail("storage_roundtrip", storage_roundtrip(project, bucket).await));
        }
        if let Some(function) = options.function_name.as_deref() {
            results.push(check_or_fail(
                "function_invocation",
                function_invocation(project, function).await,
            ));
        }
        if options.test_auth {
            results.push(auth_flow(project).await);
        }
    }
    results
}

async fn query_test(db: &dyn RemoteDatabase, table: &str, limit: u32) -> Result<CheckResult, AppError> {
    let target = RemoteTable::public(table)?;
    let rows = db.inspector().probe_select(&target, limit).await?;
    Ok(CheckResult::pass("query_test", format!("SELECT on {table} returned {rows} rows"))
        .with_details(json!({ "table": table, "rows": rows, "limit": limit })))
}

/// Upload, download, compare, delete. Deletion is attempted whatever step
/// failed, including the upload itself, since a failed upload may still have
/// stored the object.
async fn storage_roundtrip(project: &dyn ProjectApi, bucket: &str) -> Result<CheckResult, AppError> {
    validate_identifier("bucket", bucket)?;
    let token = Uuid::new_v4();
    let path = format!("{PROBE_PREFIX}/{token}.txt");
    let body = format!("hostlift storage probe {token}").into_bytes();

    if let Err(e) = project
        .upload_object(bucket, &path, body.clone(), Some("text/plain"))
        .await
    {
        let cleaned_up = project.delete_object(bucket, &path).await.is_ok();
        return Ok(CheckResult::fail("storage_roundtrip", format!("Upload failed: {e}"))
            .with_details(json!({ "bucket": bucket, "failed_step": "upload", "cleaned_up": cleaned_up })));
    }

    let outcome = match project.download_object(bucket, &path).await {
        Ok(bytes) if bytes == body => Ok(()),
        Ok(bytes) => Err((
            "compare",
            format!("Downloaded {} bytes that differ from the {} uploaded", bytes.len(), body.len()),
        )),
        Err(e) => Err(("download", format!("Download failed: {e}"))),
    };

    let cleanup = project.delete_object(bucket, &path).await;
    if let Err(e) = &cleanup {
        tracing::warn!(bucket = %bucket, path = %path, error = %e, "Could not delete storage probe object");
    }

    Ok(match (outcome, cleanup) {
        (Ok(()), Ok(())) => CheckResult::pass("storage_roundtrip", format!("Round trip through {bucket} succeeded"))
            .with_details(json!({ "bucket": bucket, "bytes": body.len() })),
        (Err((step, message)), _) => CheckResult::fail("storage_roundtrip", message)
            .with_details(json!({ "bucket": bucket, "failed_step": step })),
        (Ok(()), Err(e)) => CheckResult::fail("storage_roundtrip", format!("Cleanup failed: {e}"))
            .with_details(json!({ "bucket": bucket, "failed_step": "delete", "path": path })),
    })
}

async fn function_invocation(project: &dyn ProjectApi, function: &str) -> Result<CheckResult, AppError> {
    validate_identifier("function", function)?;
    let status = project.invoke_function(function, &json!({ "probe": true })).await?;
    let details = json!({ "function": function, "status": status });
    Ok(if (200..300).contains(&status) {
        CheckResult::pass("function_invocation", format!("{function} answered {status}")).with_details(details)
    } else {
        CheckResult::fail("function_invocation", format!("{function} answered {status}")).with_details(details)
    })
}

/// Create a throwaway account, sign in, delete it. Deletion is attempted
/// once the account exists, even if sign-in failed.
async fn auth_flow(project: &dyn ProjectApi) -> CheckResult {
    let token = Uuid::new_v4().simple().to_string();
    let email = format!("hostlift-probe-{token}@example.com");
    let password = format!("Probe-{token}");

    let user_id = match project.create_user(&email, &password).await {
        Ok(id) => id,
        Err(e) => {
            return CheckResult::fail("auth_flow", format!("create_user failed: {e}"))
                .with_details(json!({ "failed_step": "create_user" }));
        }
    };

    let sign_in = project.sign_in_with_password(&email, &password).await;
    let delete = project.delete_user(&user_id).await;

    match (sign_in, delete) {
        (Ok(_), Ok(())) => CheckResult::pass("auth_flow", "Created, signed in and deleted a probe account"),
        (Err(e), delete) => {
            if let Err(de) = &delete {
                tracing::warn!(user_id = %user_id, error = %de, "Could not delete auth probe account");
            }
            CheckResult::fail("auth_flow", format!("sign_in failed: {e}")).with_details(json!({
                "failed_step": "sign_in",
                "cleaned_up": delete.is_ok(),
            }))
        }
        (Ok(_), Err(e)) => {
            tracing::warn!(user_id = %user_id, error = %e, "Could not delete auth probe account");
            CheckResult::fail("auth_flow", format!("delete_user failed: {e}"))
                .with_details(json!({ "failed_step": "delete_user", "user_id": user_id }))
        }
    }
}
