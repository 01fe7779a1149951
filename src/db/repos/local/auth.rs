use rusqlite::{params, Row};

use crate::db::models::{AuthIdentity, AuthUser};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_user(row: &Row) -> rusqlite::Result<AuthUser> {
    Ok(AuthUser {
        id: row.get("id")?,
        email: row.get("email")?,
        encrypted_password: row.get("encrypted_password")?,
        phone: row.get("phone")?,
        email_confirmed_at: row.get("email_confirmed_at")?,
        last_sign_in_at: row.get("last_sign_in_at")?,
        raw_user_meta_data: row.get("raw_user_meta_data")?,
        is_anonymous: row.get::<_, i32>("is_anonymous")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_identity(row: &Row) -> rusqlite::Result<AuthIdentity> {
    Ok(AuthIdentity {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        provider: row.get("provider")?,
        provider_id: row.get("provider_id")?,
        identity_data: row.get("identity_data")?,
        last_sign_in_at: row.get("last_sign_in_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get_all_users(pool: &DbPool) -> Result<Vec<AuthUser>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM _auth_users ORDER BY created_at, id")?;
    let rows = stmt.query_map([], row_to_user)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn get_all_identities(pool: &DbPool) -> Result<Vec<AuthIdentity>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM _auth_identities ORDER BY created_at, id")?;
    let rows = stmt.query_map([], row_to_identity)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_users(pool: &DbPool) -> Result<i64, AppError> {
    let conn = pool.get()?;
    Ok(conn.query_row("SELECT COUNT(*) FROM _auth_users", [], |row| row.get(0))?)
}

pub fn create_user(pool: &DbPool, user: &AuthUser) -> Result<(), AppError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _auth_users
         (id, email, encrypted_password, phone, email_confirmed_at, last_sign_in_at,
          raw_user_meta_data, is_anonymous, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            user.id,
            user.email,
            user.encrypted_password,
            user.phone,
            user.email_confirmed_at,
            user.last_sign_in_at,
            user.raw_user_meta_data,
            user.is_anonymous as i32,
            user.created_at,
            user.updated_at,
        ],
    )?;
    Ok(())
}

pub fn create_identity(pool: &DbPool, identity: &AuthIdentity) -> Result<(), AppError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO _auth_identities
         (id, user_id, provider, provider_id, identity_data, last_sign_in_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            identity.id,
            identity.user_id,
            identity.provider,
            identity.provider_id,
            identity.identity_data,
            identity.last_sign_in_at,
            identity.created_at,
            identity.updated_at,
        ],
    )?;
    Ok(())
}
