use std::collections::BTreeSet;

use crate::cloud::{RemoteTable, RowSecurityChange};
use crate::db::models::{Migration, RlsPolicy, RollbackInfo};
use crate::db::repos::local::policies as policy_repo;
use crate::error::AppError;
use crate::validation::{quote_ident, validate_identifier, validate_policy_command};

use super::ItemOutcome;
use crate::engine::EngineContext;

/// `CREATE POLICY` for one local policy. `USING` is omitted for `INSERT`
/// and `WITH CHECK` for `SELECT`/`DELETE`, which Postgres rejects.
pub fn policy_statement(policy: &RlsPolicy) -> Result<String, AppError> {
    let table = RemoteTable::public(&policy.table_name)?;
    validate_identifier("policy", &policy.name)?;
    let command = validate_policy_command(&policy.command)?;

    let roles = if policy.roles.is_empty() {
        "public".to_string()
    } else {
        for role in &policy.roles {
            validate_identifier("role", role)?;
        }
        policy.roles.join(", ")
    };

    let mut statement = format!(
        "CREATE POLICY {} ON {} AS PERMISSIVE FOR {command} TO {roles}",
        quote_ident(&policy.name),
        table.qualified()
    );
    if let Some(using) = policy.using_expr.as_deref().filter(|_| command != "INSERT") {
        statement.push_str(&format!(" USING ({using})"));
    }
    if let Some(check) = policy
        .check_expr
        .as_deref()
        .filter(|_| !matches!(command, "SELECT" | "DELETE"))
    {
        statement.push_str(&format!(" WITH CHECK ({check})"));
    }
    Ok(statement)
}

/// Replay enabled policies. Every statement is built before anything is sent,
/// so a bad identifier or verb fails the item with nothing written.
pub async fn migrate(ctx: &EngineContext, migration: &Migration) -> Result<ItemOutcome, AppError> {
    let all = policy_repo::get_all(&ctx.pool)?;
    let skipped = all.iter().filter(|p| !p.enabled).count();
    let enabled: Vec<&RlsPolicy> = all.iter().filter(|p| p.enabled).collect();

    let statements = enabled
        .iter()
        .map(|p| policy_statement(p).map(|s| (*p, s)))
        .collect::<Result<Vec<_>, _>>()?;
    let tables: BTreeSet<&str> = enabled.iter().map(|p| p.table_name.as_str()).collect();

    let mut already_enabled = 0usize;
    if !statements.is_empty() {
        let db = ctx.database(migration).await?;
        let writer = db.writer();
        for table in &tables {
            match writer.enable_row_security(&RemoteTable::public(table)?).await? {
                RowSecurityChange::Enabled => {}
                RowSecurityChange::AlreadyEnabled => {
                    already_enabled += 1;
                    tracing::debug!(table = %table, "Row security already enabled");
                }
            }
        }
        for (policy, statement) in &statements {
            writer
                .create_policy(&RemoteTable::public(&policy.table_name)?, &policy.name, statement)
                .await?;
        }
    }

    tracing::debug!(
        migration_id = %migration.id,
        policies = statements.len(),
        skipped,
        "Policies replayed"
    );
    Ok(ItemOutcome::new(
        RollbackInfo::Rls {
            tables: tables.iter().map(|t| t.to_string()).collect(),
            policies: statements.iter().map(|(p, _)| p.name.clone()).collect(),
        },
        serde_json::json!({
            "policies_created": statements.len(),
            "tables": tables.len(),
            "already_enabled": already_enabled,
            "skipped_disabled": skipped,
        }),
    ))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::cloud::RemoteInspector;
    use crate::engine::migrators::schema;
    use crate::engine::test_support::{connected_context, seed_todos};

    #[test]
    fn test_policy_statement_clauses() {
        let select = policy_statement(&policy("p", "todos", "select", true)).unwrap();
        assert_eq!(
            select,
            "CREATE POLICY \"p\" ON \"public\".\"todos\" AS PERMISSIVE FOR SELECT TO authenticated \
             USING (auth.uid() = owner_id)"
        );
        let insert = policy_statement(&policy("p", "todos", "INSERT", true)).unwrap();
        assert!(!insert.contains("USING"));
        assert!(insert.ends_with("WITH CHECK (auth.uid() = owner_id)"));
    }

    #[test]
    fn test_policy_statement_validation() {
        assert!(policy_statement(&policy("p", "todos", "TRUNCATE", true)).is_err());
        assert!(policy_statement(&policy("p q", "todos", "ALL", true)).is_err());
        let mut bad_role = policy("p", "todos", "ALL", true);
        bad_role.roles = vec!["anon; DROP".into()];
        assert!(policy_statement(&bad_role).is_err());
    }

    #[tokio::test]
    async fn test_enabled_policies_replayed() {
        let (ctx, remote, migration) = connected_context();
        seed_todos(&ctx.pool);
        seed_policies(&ctx.pool);
        schema::migrate(&ctx, &migration).await.unwrap();

        let outcome = migrate(&ctx, &migration).await.unwrap();
        let metadata = outcome.metadata.unwrap();
        assert_eq!(metadata["policies_created"], 2);
        assert_eq!(metadata["skipped_disabled"], 1);

        let todos = RemoteTable::public("todos").unwrap();
        assert!(remote.row_security_enabled(&todos).await.unwrap());
        assert!(remote.policy_statement("todos", "todos_read").is_some());
        assert!(remote.policy_statement("todos", "todos_old").is_none());

        // second run sees the flag already set and still succeeds
        let again = migrate(&ctx, &migration).await.unwrap();
        assert_eq!(again.metadata.unwrap()["already_enabled"], 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_fatal() {
        let (ctx, _remote, migration) = connected_context();
        seed_policies(&ctx.pool);
        assert!(matches!(migrate(&ctx, &migration).await, Err(AppError::RemoteDatabase(_))));
    }

    #[tokio::test]
    async fn test_unknown_verb_fails_before_connecting() {
        let (ctx, remote, migration) = connected_context();
        policy_repo::create(&ctx.pool, &policy("p", "todos", "MERGE", true)).unwrap();
        assert!(matches!(migrate(&ctx, &migration).await, Err(AppError::Validation(_))));
        assert_eq!(remote.database_opens(), 0);
    }
}
