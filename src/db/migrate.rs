//! Versioned, idempotent schema migrations.

use super::parse_datetime;
use super::schema::{
    CREATE_MIGRATIONS_TABLE, EXPECTED_TABLES, ExpectedColumn, ExpectedDefault, MIGRATIONS,
    MIGRATIONS_TABLE, Migration,
};
use crate::error::{Result, StoreError};
use crate::models::{AppliedMigration, MigrationReport};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use tracing::{debug, info};

/// Apply every pending migration in one transaction and verify the result.
///
/// Existing tables and rows are left untouched. If a table with one of our
/// names exists but lacks an expected column, default or foreign key,
/// nothing is recorded and [`StoreError::IncompatibleSchema`] is returned.
pub fn run(conn: &Connection) -> Result<MigrationReport> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(CREATE_MIGRATIONS_TABLE, [])?;

    let current = current_version(&tx)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    for migration in &pending {
        debug!(version = migration.version, name = migration.name, "applying migration");
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            (migration.version, migration.name),
        )?;
    }

    verify(&tx)?;
    let applied_versions: Vec<i64> = pending.iter().map(|m| m.version).collect();
    let applied = applied_migrations(&tx)?
        .into_iter()
        .filter(|m| applied_versions.contains(&m.version))
        .collect::<Vec<_>>();
    let version = current_version(&tx)?;
    tx.commit()?;

    if applied.is_empty() {
        debug!(version, "schema up to date");
    } else {
        info!(version, applied = applied.len(), "schema migrated");
    }

    Ok(MigrationReport { version, applied })
}

/// Highest recorded migration, 0 when none (or no bookkeeping table).
pub fn current_version(conn: &Connection) -> Result<i64> {
    if !table_exists(conn, MIGRATIONS_TABLE)? {
        return Ok(0);
    }
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

pub fn applied_migrations(conn: &Connection) -> Result<Vec<AppliedMigration>> {
    if !table_exists(conn, MIGRATIONS_TABLE)? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT version, name, applied_at FROM schema_migrations ORDER BY version",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(AppliedMigration {
            version: row.get(0)?,
            name: row.get(1)?,
            applied_at: parse_datetime(2, row.get(2)?)?,
        })
    })?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| e.into())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Check every table against the expected column catalogue.
pub fn verify(conn: &Connection) -> Result<()> {
    for (table, expected) in EXPECTED_TABLES {
        let actual = table_columns(conn, table)?;
        if actual.is_empty() {
            return Err(StoreError::IncompatibleSchema {
                table: table.to_string(),
                reason: "table is missing".to_string(),
            });
        }
        let foreign_keys = foreign_keys(conn, table)?;
        check_columns(table, expected, &actual, &foreign_keys)?;
    }
    Ok(())
}

/// What `pragma_table_info` reports about one column.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ActualColumn {
    primary_key: bool,
    default: Option<String>,
}

fn table_columns(conn: &Connection, table: &str) -> Result<HashMap<String, ActualColumn>> {
    let mut stmt = conn.prepare("SELECT name, pk, dflt_value FROM pragma_table_info(?1)")?;
    let rows = stmt.query_map([table], |row| {
        let name: String = row.get(0)?;
        let pk: i64 = row.get(1)?;
        Ok((
            name,
            ActualColumn {
                primary_key: pk > 0,
                default: row.get(2)?,
            },
        ))
    })?;
    rows.collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| e.into())
}

/// Column name -> referenced table, lowercased.
fn foreign_keys(conn: &Connection, table: &str) -> Result<HashMap<String, String>> {
    let mut stmt =
        conn.prepare("SELECT \"from\", \"table\" FROM pragma_foreign_key_list(?1)")?;
    let rows = stmt.query_map([table], |row| {
        let from: String = row.get(0)?;
        let target: String = row.get(1)?;
        Ok((from, target.to_lowercase()))
    })?;
    rows.collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| e.into())
}

/// Strip one pair of surrounding quotes from a default expression.
fn unquote(raw: &str) -> &str {
    let raw = raw.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = raw
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    raw
}

fn check_default(column: &ExpectedColumn, actual: Option<&str>) -> Option<String> {
    match (column.default, actual) {
        (ExpectedDefault::Any, _) => None,
        (ExpectedDefault::Present, Some(_)) => None,
        (ExpectedDefault::Present, None) => {
            Some(format!("column `{}` has no default", column.name))
        }
        (ExpectedDefault::Text(want), Some(got)) if unquote(got) == want => None,
        (ExpectedDefault::Text(want), got) => Some(format!(
            "column `{}` must default to '{want}', found {}",
            column.name,
            got.unwrap_or("no default")
        )),
    }
}

fn check_columns(
    table: &str,
    expected: &[ExpectedColumn],
    actual: &HashMap<String, ActualColumn>,
    foreign_keys: &HashMap<String, String>,
) -> Result<()> {
    let incompatible = |reason: String| StoreError::IncompatibleSchema {
        table: table.to_string(),
        reason,
    };

    for column in expected {
        let Some(found) = actual.get(column.name) else {
            return Err(incompatible(format!("missing column `{}`", column.name)));
        };
        if found.primary_key != column.primary_key {
            return Err(incompatible(if column.primary_key {
                format!("column `{}` is not the primary key", column.name)
            } else {
                format!("column `{}` is unexpectedly part of the primary key", column.name)
            }));
        }
        if let Some(reason) = check_default(column, found.default.as_deref()) {
            return Err(incompatible(reason));
        }
        if let Some(target) = column.references {
            if foreign_keys.get(column.name).map(String::as_str) != Some(target) {
                return Err(incompatible(format!(
                    "column `{}` does not reference `{target}`",
                    column.name
                )));
            }
        }
    }
    Ok(())
}
