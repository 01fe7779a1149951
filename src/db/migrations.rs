use rusqlite::Connection;

use crate::error::AppError;

/// Run the consolidated schema migration.
///
/// Creates the migration engine's state tables and, when missing, the local
/// backend's system catalog tables the migrators read from. Idempotent.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Migration engine state
-- ============================================================================

CREATE TABLE IF NOT EXISTS _migrations (
    id                      TEXT PRIMARY KEY,
    remote_project_ref      TEXT,
    remote_project_name     TEXT,
    encrypted_credentials   TEXT,
    status                  TEXT NOT NULL DEFAULT 'pending'
                            CHECK(status IN ('pending', 'in_progress', 'completed', 'failed')),
    error_message           TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL,
    completed_at            TEXT
);
CREATE INDEX IF NOT EXISTS idx_migrations_created ON _migrations(created_at);

CREATE TABLE IF NOT EXISTS _migration_items (
    id              TEXT PRIMARY KEY,
    migration_id    TEXT NOT NULL REFERENCES _migrations(id) ON DELETE CASCADE,
    item_type       TEXT NOT NULL CHECK(item_type IN (
                        'schema', 'data', 'users', 'identities', 'rls',
                        'storage_buckets', 'storage_files', 'functions', 'secrets',
                        'auth_config', 'oauth_config', 'email_templates')),
    item_name       TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending', 'in_progress', 'completed', 'failed',
                                     'skipped', 'rolled_back')),
    started_at      TEXT,
    completed_at    TEXT,
    error_message   TEXT,
    rollback_info   TEXT,
    metadata        TEXT,
    created_at      TEXT NOT NULL,
    UNIQUE(migration_id, item_type, item_name)
);
CREATE INDEX IF NOT EXISTS idx_migration_items_migration ON _migration_items(migration_id);
CREATE INDEX IF NOT EXISTS idx_migration_items_status    ON _migration_items(migration_id, status);

CREATE TABLE IF NOT EXISTS _migration_verifications (
    id              TEXT PRIMARY KEY,
    migration_id    TEXT NOT NULL REFERENCES _migrations(id) ON DELETE CASCADE,
    layer           TEXT NOT NULL CHECK(layer IN ('basic', 'integrity', 'functional')),
    status          TEXT NOT NULL DEFAULT 'pending'
                    CHECK(status IN ('pending', 'running', 'passed', 'failed')),
    started_at      TEXT,
    completed_at    TEXT,
    results         TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_migration_verifications_migration
    ON _migration_verifications(migration_id, created_at);

CREATE TABLE IF NOT EXISTS _migration_db_passwords (
    migration_id        TEXT PRIMARY KEY REFERENCES _migrations(id) ON DELETE CASCADE,
    encrypted_password  TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

-- ============================================================================
-- Local backend system catalog
-- ============================================================================

CREATE TABLE IF NOT EXISTS _auth_users (
    id                  TEXT PRIMARY KEY,
    email               TEXT,
    encrypted_password  TEXT,
    phone               TEXT,
    email_confirmed_at  TEXT,
    last_sign_in_at     TEXT,
    raw_user_meta_data  TEXT,
    is_anonymous        INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS _auth_identities (
    id              TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL REFERENCES _auth_users(id) ON DELETE CASCADE,
    provider        TEXT NOT NULL,
    provider_id     TEXT NOT NULL,
    identity_data   TEXT,
    last_sign_in_at TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS _storage_buckets (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL,
    public              INTEGER NOT NULL DEFAULT 0,
    file_size_limit     INTEGER,
    allowed_mime_types  TEXT,
    created_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS _storage_objects (
    id          TEXT PRIMARY KEY,
    bucket_id   TEXT NOT NULL REFERENCES _storage_buckets(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    size        INTEGER NOT NULL DEFAULT 0,
    mime_type   TEXT,
    created_at  TEXT NOT NULL,
    UNIQUE(bucket_id, name)
);

CREATE TABLE IF NOT EXISTS _rls_policies (
    id          TEXT PRIMARY KEY,
    table_name  TEXT NOT NULL,
    name        TEXT NOT NULL,
    command     TEXT NOT NULL DEFAULT 'ALL',
    roles       TEXT,
    using_expr  TEXT,
    check_expr  TEXT,
    enabled     INTEGER NOT NULL DEFAULT 1,
    UNIQUE(table_name, name)
);

CREATE TABLE IF NOT EXISTS _secrets (
    name            TEXT PRIMARY KEY,
    encrypted_value TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS _functions (
    name        TEXT PRIMARY KEY,
    verify_jwt  INTEGER,
    entrypoint  TEXT,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS _settings (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;
