use crate::cloud::RemoteTable;
use crate::db::models::{AuthIdentity, AuthUser, Migration, RollbackInfo, SqlValue};
use crate::db::repos::local::auth as auth_repo;
use crate::error::AppError;

use super::ItemOutcome;
use crate::engine::EngineContext;

const USER_COLUMNS: [&str; 12] = [
    "id",
    "aud",
    "role",
    "email",
    "encrypted_password",
    "phone",
    "email_confirmed_at",
    "last_sign_in_at",
    "raw_user_meta_data",
    "is_anonymous",
    "created_at",
    "updated_at",
];

const IDENTITY_COLUMNS: [&str; 8] = [
    "id",
    "user_id",
    "provider",
    "provider_id",
    "identity_data",
    "last_sign_in_at",
    "created_at",
    "updated_at",
];

const DEFAULT_ROLE: &str = "authenticated";

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

fn opt_text(value: &Option<String>) -> SqlValue {
    value.as_deref().map(text).unwrap_or(SqlValue::Null)
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|c| c.to_string()).collect()
}

fn user_row(user: &AuthUser) -> Vec<SqlValue> {
    vec![
        text(&user.id),
        text(DEFAULT_ROLE),
        text(DEFAULT_ROLE),
        opt_text(&user.email),
        opt_text(&user.encrypted_password),
        opt_text(&user.phone),
        opt_text(&user.email_confirmed_at),
        opt_text(&user.last_sign_in_at),
        opt_text(&user.raw_user_meta_data),
        SqlValue::Bool(user.is_anonymous),
        text(&user.created_at),
        text(&user.updated_at),
    ]
}

fn identity_row(identity: &AuthIdentity) -> Vec<SqlValue> {
    vec![
        text(&identity.id),
        text(&identity.user_id),
        text(&identity.provider),
        text(&identity.provider_id),
        text(identity.identity_data.as_deref().unwrap_or("{}")),
        opt_text(&identity.last_sign_in_at),
        text(&identity.created_at),
        text(&identity.updated_at),
    ]
}

/// Copy accounts into `auth.users`, keeping ids and password hashes so
/// existing credentials keep working.
pub async fn migrate_users(ctx: &EngineContext, migration: &Migration) -> Result<ItemOutcome, AppError> {
    let users = auth_repo::get_all_users(&ctx.pool)?;
    let ids: Vec<String> = users.iter().map(|u| u.id.clone()).collect();

    let written = if users.is_empty() {
        0
    } else {
        let rows: Vec<Vec<SqlValue>> = users.iter().map(user_row).collect();
        let db = ctx.database(migration).await?;
        db.writer()
            .insert_rows(&RemoteTable::auth("users")?, &columns(&USER_COLUMNS), &rows)
            .await?
    };

    tracing::debug!(migration_id = %migration.id, users = written, "Users copied");
    Ok(ItemOutcome::new(
        RollbackInfo::Users { ids },
        serde_json::json!({ "users": written }),
    ))
}

pub async fn migrate_identities(ctx: &EngineContext, migration: &Migration) -> Result<ItemOutcome, AppError> {
    let identities = auth_repo::get_all_identities(&ctx.pool)?;
    let ids: Vec<String> = identities.iter().map(|i| i.id.clone()).collect();

    let written = if identities.is_empty() {
        0
    } else {
        let rows: Vec<Vec<SqlValue>> = identities.iter().map(identity_row).collect();
        let db = ctx.database(migration).await?;
        db.writer()
            .insert_rows(&RemoteTable::auth("identities")?, &columns(&IDENTITY_COLUMNS), &rows)
            .await?
    };

    tracing::debug!(migration_id = %migration.id, identities = written, "Identities copied");
    Ok(ItemOutcome::new(
        RollbackInfo::Identities { ids },
        serde_json::json!({ "identities": written }),
    ))
}


#[cfg(test)]
mod tests {
    use super::fixtures::seed_users;
    use super::*;
    use crate::engine::test_support::connected_context;

    #[tokio::test]
    async fn test_users_and_identities_copied() {
        let (ctx, remote, migration) = connected_context();
        seed_users(&ctx.pool);

        let users = migrate_users(&ctx, &migration).await.unwrap();
        assert_eq!(
            users.rollback,
            Some(RollbackInfo::Users { ids: vec!["u1".into(), "u2".into()] })
        );
        let identities = migrate_identities(&ctx, &migration).await.unwrap();
        assert_eq!(identities.rollback, Some(RollbackInfo::Identities { ids: vec!["i1".into()] }));

        assert_eq!(remote.query_i64("SELECT COUNT(*) FROM auth.users WHERE aud = 'authenticated'"), 2);
        assert_eq!(remote.query_i64("SELECT COUNT(*) FROM auth.users WHERE email IS NULL AND is_anonymous = 1"), 1);
        assert_eq!(remote.query_i64("SELECT COUNT(*) FROM auth.identities WHERE identity_data = '{}'"), 1);
    }

    #[tokio::test]
    async fn test_no_users_needs_no_connection() {
        let (ctx, remote, migration) = connected_context();
        remote.fail("database");
        let outcome = migrate_users(&ctx, &migration).await.unwrap();
        assert_eq!(outcome.rollback, Some(RollbackInfo::Users { ids: vec![] }));
    }
}
