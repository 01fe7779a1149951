use std::collections::{HashMap, HashSet};

use rusqlite::params;

use crate::db::models::{
    read_row, AvailableItems, LocalColumn, LocalForeignKey, LocalTable, SqlValue,
};
use crate::db::DbPool;
use crate::error::AppError;
use crate::validation::{quote_ident, validate_identifier};

// ============================================================================
// User tables
// ============================================================================

/// Names of user tables: everything except `_`-prefixed system tables and
/// SQLite internals.
pub fn list_user_tables(pool: &DbPool) -> Result<Vec<String>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table'
           AND name NOT LIKE '\\_%' ESCAPE '\\'
           AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

fn read_columns(conn: &rusqlite::Connection, table: &str) -> Result<Vec<LocalColumn>, AppError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| {
        Ok(LocalColumn {
            name: row.get("name")?,
            decl_type: row.get::<_, Option<String>>("type")?.unwrap_or_default(),
            not_null: row.get::<_, i32>("notnull")? != 0,
            default_value: row.get("dflt_value")?,
            pk_position: row.get("pk")?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn describe_table(pool: &DbPool, table: &str) -> Result<LocalTable, AppError> {
    validate_identifier("table", table)?;
    let conn = pool.get()?;

    let columns = read_columns(&conn, table)?;
    if columns.is_empty() {
        return Err(AppError::NotFound(format!("Local table {table}")));
    }

    let raw_fks: Vec<(String, String, Option<String>)> = {
        let mut stmt =
            conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get("from")?, row.get("table")?, row.get("to")?))
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    let mut foreign_keys = Vec::with_capacity(raw_fks.len());
    for (column, ref_table, ref_column) in raw_fks {
        // A bare `REFERENCES parent` points at the parent's primary key. Only
        // the parent's columns are read, never its own foreign keys.
        let ref_column = match ref_column {
            Some(c) => c,
            None if ref_table == table => first_pk_column(&columns).unwrap_or_default(),
            None => {
                validate_identifier("table", &ref_table)?;
                first_pk_column(&read_columns(&conn, &ref_table)?).unwrap_or_default()
            }
        };
        foreign_keys.push(LocalForeignKey { column, ref_table, ref_column });
    }

    Ok(LocalTable {
        name: table.to_string(),
        columns,
        foreign_keys,
    })
}

fn first_pk_column(columns: &[LocalColumn]) -> Option<String> {
    columns
        .iter()
        .filter(|c| c.pk_position > 0)
        .min_by_key(|c| c.pk_position)
        .map(|c| c.name.clone())
}

pub fn describe_all(pool: &DbPool) -> Result<Vec<LocalTable>, AppError> {
    list_user_tables(pool)?
        .iter()
        .map(|t| describe_table(pool, t))
        .collect()
}

/// Read every row of `table` in rowid order.
pub fn read_rows(pool: &DbPool, table: &str) -> Result<(Vec<String>, Vec<Vec<SqlValue>>), AppError> {
    let described = describe_table(pool, table)?;
    let columns: Vec<String> = described.columns.iter().map(|c| c.name.clone()).collect();
    for c in &columns {
        validate_identifier("column", c)?;
    }

    let select_list = columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ");
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {select_list} FROM {}",
        quote_ident(table)
    ))?;
    let rows = stmt.query_map([], |row| {
        read_row(row, &columns).map(|r| r.into_iter().map(|(_, v)| v).collect::<Vec<_>>())
    })?;
    let rows = rows.collect::<Result<Vec<_>, _>>()?;
    Ok((columns, rows))
}

/// Order tables so every referenced table precedes the tables pointing at it.
/// Self-references and cycles fall back to name order.
pub fn sort_by_dependencies(tables: &[LocalTable]) -> Vec<LocalTable> {
    let by_name: HashMap<&str, &LocalTable> = tables.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut names: Vec<&str> = by_name.keys().copied().collect();
    names.sort_unstable();

    let mut ordered = Vec::with_capacity(tables.len());
    let mut done: HashSet<&str> = HashSet::new();
    let mut visiting: HashSet<&str> = HashSet::new();

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a LocalTable>,
        done: &mut HashSet<&'a str>,
        visiting: &mut HashSet<&'a str>,
        ordered: &mut Vec<LocalTable>,
    ) {
        if done.contains(name) || !visiting.insert(name) {
            return;
        }
        if let Some(table) = by_name.get(name) {
            let mut parents: Vec<&str> = table
                .foreign_keys
                .iter()
                .map(|fk| fk.ref_table.as_str())
                .filter(|p| *p != name)
                .collect();
            parents.sort_unstable();
            for parent in parents {
                visit(parent, by_name, done, visiting, ordered);
            }
            visiting.remove(name);
            done.insert(name);
            ordered.push((*table).clone());
        }
    }

    for name in names {
        visit(name, &by_name, &mut done, &mut visiting, &mut ordered);
    }
    ordered
}

// ============================================================================
// Selection support
// ============================================================================

fn count(conn: &rusqlite::Connection, sql: &str) -> Result<i64, AppError> {
    Ok(conn.query_row(sql, params![], |row| row.get(0))?)
}

pub fn available_items(pool: &DbPool) -> Result<AvailableItems, AppError> {
    let tables = list_user_tables(pool)?;
    let conn = pool.get()?;

    let mut buckets_stmt = conn.prepare("SELECT id FROM _storage_buckets ORDER BY id")?;
    let buckets = buckets_stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut functions_stmt = conn.prepare("SELECT name FROM _functions ORDER BY name")?;
    let functions = functions_stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AvailableItems {
        tables,
        buckets,
        functions,
        user_count: count(&conn, "SELECT COUNT(*) FROM _auth_users")?,
        identity_count: count(&conn, "SELECT COUNT(*) FROM _auth_identities")?,
        policy_count: count(&conn, "SELECT COUNT(*) FROM _rls_policies WHERE enabled = 1")?,
        secret_count: count(&conn, "SELECT COUNT(*) FROM _secrets")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    fn seed(pool: &DbPool) {
        let conn = pool.get().unwrap();
        conn.execute_batch(
            "CREATE TABLE lists (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
             CREATE TABLE todos (
                 id INTEGER PRIMARY KEY,
                 list_id INTEGER REFERENCES lists,
                 title TEXT NOT NULL DEFAULT 'untitled',
                 done BOOLEAN DEFAULT 0
             );
             INSERT INTO lists VALUES (1, 'home');
             INSERT INTO todos VALUES (1, 1, 'milk', 0), (2, 1, 'eggs', 1);",
        )
        .unwrap();
    }

    #[test]
    fn test_user_tables_exclude_system_tables() {
        let pool = init_test_db().unwrap();
        seed(&pool);
        assert_eq!(list_user_tables(&pool).unwrap(), vec!["lists", "todos"]);
    }

    #[test]
    fn test_mutual_bare_references_resolve_to_primary_keys() {
        let pool = init_test_db().unwrap();
        pool.get()
            .unwrap()
            .execute_batch(
                "CREATE TABLE a (id INTEGER PRIMARY KEY, b_id INTEGER REFERENCES b);
                 CREATE TABLE b (code TEXT PRIMARY KEY, a_id INTEGER REFERENCES a);",
            )
            .unwrap();

        let tables = describe_all(&pool).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].foreign_keys[0].ref_table, "b");
        assert_eq!(tables[0].foreign_keys[0].ref_column, "code");
        assert_eq!(tables[1].foreign_keys[0].ref_table, "a");
        assert_eq!(tables[1].foreign_keys[0].ref_column, "id");
    }

    #[test]
    fn test_describe_table() {
        let pool = init_test_db().unwrap();
        seed(&pool);
        let todos = describe_table(&pool, "todos").unwrap();
        assert_eq!(todos.columns.len(), 4);
        assert_eq!(todos.primary_key()[0].name, "id");
        assert_eq!(todos.columns[2].default_value.as_deref(), Some("'untitled'"));
        assert_eq!(
            todos.foreign_keys,
            vec![LocalForeignKey {
                column: "list_id".into(),
                ref_table: "lists".into(),
                ref_column: "id".into(),
            }]
        );

        assert!(matches!(describe_table(&pool, "missing"), Err(AppError::NotFound(_))));
        assert!(matches!(describe_table(&pool, "bad name"), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_read_rows_and_dependency_order() {
        let pool = init_test_db().unwrap();
        seed(&pool);
        let (columns, rows) = read_rows(&pool, "todos").unwrap();
        assert_eq!(columns, vec!["id", "list_id", "title", "done"]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1][2], SqlValue::Text("eggs".into()));

        let mut tables = describe_all(&pool).unwrap();
        tables.reverse();
        let ordered: Vec<String> = sort_by_dependencies(&tables).into_iter().map(|t| t.name).collect();
        assert_eq!(ordered, vec!["lists", "todos"]);
    }

    #[test]
    fn test_available_items() {
        let pool = init_test_db().unwrap();
        seed(&pool);
        let items = available_items(&pool).unwrap();
        assert_eq!(items.tables.len(), 2);
        assert_eq!(items.user_count, 0);
        assert!(items.buckets.is_empty());
    }
}
