//! SQLite access: connection setup, migrations, row mapping and queries.

pub mod migrate;
pub mod schema;

use crate::attributes;
use crate::error::{Result, StoreError};
use crate::models::{
    Annotation, AppliedMigration, MigrationReport, NewAnnotation, NewProject, NewTask, Project,
    TableCounts, Task,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ToSql};
use std::path::Path;

const PROJECT_COLUMNS: &str = "project_id, name, created_at";
const TASK_COLUMNS: &str = "task_id, project_id, name, status, assignee, retrieved_at, qc_status";
const ANNOTATION_COLUMNS: &str =
    "annotation_id, task_id, track_id, frame, xtl, ytl, xbr, ybr, outside, attributes";

/// Database handle
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database connection
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // References are only enforced when this is on
        conn.pragma_update(None, "foreign_keys", "ON")?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;

        Ok(Database { conn })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Database { conn })
    }

    // ==================== Schema ====================

    /// Bring the schema up to date (idempotent)
    pub fn migrate(&self) -> Result<MigrationReport> {
        migrate::run(&self.conn)
    }

    pub fn schema_version(&self) -> Result<i64> {
        migrate::current_version(&self.conn)
    }

    pub fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        migrate::applied_migrations(&self.conn)
    }

    /// Check if database is initialized
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.schema_version()? > 0)
    }

    pub fn table_counts(&self) -> Result<TableCounts> {
        let count = |table: &str| -> Result<i64> {
            let sql = format!("SELECT COUNT(*) FROM {table}");
            Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
        };
        Ok(TableCounts {
            projects: count("projects")?,
            tasks: count("tasks")?,
            annotations: count("annotations")?,
        })
    }

    // ==================== Project Operations ====================

    pub fn insert_project(&self, project: &NewProject) -> Result<Project> {
        match &project.created_at {
            Some(at) => self.conn.execute(
                "INSERT INTO projects (project_id, name, created_at) VALUES (?1, ?2, ?3)",
                (project.project_id, &project.name, format_datetime(at)),
            )?,
            None => self.conn.execute(
                "INSERT INTO projects (project_id, name) VALUES (?1, ?2)",
                (project.project_id, &project.name),
            )?,
        };

        self.get_project(project.project_id)?
            .ok_or(StoreError::ProjectNotFound(project.project_id))
    }

    pub fn get_project(&self, id: i64) -> Result<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = ?1");
        self.conn
            .query_row(&sql, [id], project_from_row)
            .optional()
            .map_err(|e| e.into())
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects ORDER BY project_id");
        let mut stmt = self.conn.prepare(&sql)?;
        let projects = stmt.query_map([], project_from_row)?;
        projects
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.into())
    }

    // ==================== Task Operations ====================

    pub fn insert_task(&self, task: &NewTask) -> Result<Task> {
        let retrieved_at = task.retrieved_at.as_ref().map(format_datetime);

        match task.qc_status.as_deref() {
            Some(qc_status) => self.conn.execute(
                "INSERT INTO tasks (task_id, project_id, name, status, assignee, retrieved_at, qc_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                (
                    task.task_id,
                    task.project_id,
                    &task.name,
                    task.status.as_deref(),
                    task.assignee.as_deref(),
                    retrieved_at.as_deref(),
                    qc_status,
                ),
            )?,
            // Omit qc_status so the column default applies
            None => self.conn.execute(
                "INSERT INTO tasks (task_id, project_id, name, status, assignee, retrieved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (
                    task.task_id,
                    task.project_id,
                    &task.name,
                    task.status.as_deref(),
                    task.assignee.as_deref(),
                    retrieved_at.as_deref(),
                ),
            )?,
        };

        self.get_task(task.task_id)?
            .ok_or(StoreError::TaskNotFound(task.task_id))
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?1");
        self.conn
            .query_row(&sql, [id], task_from_row)
            .optional()
            .map_err(|e| e.into())
    }

    pub fn list_tasks(&self, project_id: Option<i64>) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE ?1 IS NULL OR project_id = ?1
             ORDER BY task_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let tasks = stmt.query_map([project_id], task_from_row)?;
        tasks
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.into())
    }

    /// Returns false when no task has this id.
    pub fn set_task_assignee(&self, id: i64, assignee: Option<&str>) -> Result<bool> {
        self.update_task("UPDATE tasks SET assignee = ?1 WHERE task_id = ?2", &assignee, id)
    }

    pub fn set_task_status(&self, id: i64, status: Option<&str>) -> Result<bool> {
        self.update_task("UPDATE tasks SET status = ?1 WHERE task_id = ?2", &status, id)
    }

    pub fn set_task_qc_status(&self, id: i64, qc_status: &str) -> Result<bool> {
        self.update_task("UPDATE tasks SET qc_status = ?1 WHERE task_id = ?2", &qc_status, id)
    }

    pub fn set_task_retrieved_at(&self, id: i64, at: &DateTime<Utc>) -> Result<bool> {
        self.update_task(
            "UPDATE tasks SET retrieved_at = ?1 WHERE task_id = ?2",
            &format_datetime(at),
            id,
        )
    }

    fn update_task(&self, sql: &str, value: &dyn ToSql, id: i64) -> Result<bool> {
        let rows = self.conn.execute(sql, [value, &id as &dyn ToSql])?;
        Ok(rows > 0)
    }

    // ==================== Annotation Operations ====================

    pub fn insert_annotation(&self, annotation: &NewAnnotation) -> Result<Annotation> {
        let id = insert_annotation_row(&self.conn, annotation)?;
        self.get_annotation(id)?
            .ok_or(StoreError::AnnotationNotFound(id))
    }

    /// Insert all rows or none.
    pub fn insert_annotations(&self, annotations: &[NewAnnotation]) -> Result<Vec<Annotation>> {
        let tx = self.conn.unchecked_transaction()?;
        let mut ids = Vec::with_capacity(annotations.len());
        for annotation in annotations {
            ids.push(insert_annotation_row(&tx, annotation)?);
        }
        tx.commit()?;

        let mut inserted = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(annotation) = self.get_annotation(id)? {
                inserted.push(annotation);
            }
        }
        Ok(inserted)
    }

    pub fn get_annotation(&self, id: i64) -> Result<Option<Annotation>> {
        let sql = format!("SELECT {ANNOTATION_COLUMNS} FROM annotations WHERE annotation_id = ?1");
        self.conn
            .query_row(&sql, [id], annotation_from_row)
            .optional()
            .map_err(|e| e.into())
    }

    /// Annotations of a task ordered by track, then frame.
    pub fn list_annotations(&self, task_id: i64, track_id: Option<i64>) -> Result<Vec<Annotation>> {
        let sql = format!(
            "SELECT {ANNOTATION_COLUMNS} FROM annotations
             WHERE task_id = ?1 AND (?2 IS NULL OR track_id = ?2)
             ORDER BY track_id, frame, annotation_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let annotations = stmt.query_map((task_id, track_id), annotation_from_row)?;
        annotations
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.into())
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn insert_annotation_row(conn: &Connection, annotation: &NewAnnotation) -> Result<i64> {
    let attributes = annotation
        .attributes
        .as_ref()
        .map(attributes::to_column)
        .transpose()?;

    conn.execute(
        "INSERT INTO annotations (task_id, track_id, frame, xtl, ytl, xbr, ybr, outside, attributes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        (
            annotation.task_id,
            annotation.track_id,
            annotation.frame,
            annotation.xtl,
            annotation.ytl,
            annotation.xbr,
            annotation.ybr,
            annotation.outside,
            attributes,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

// ==================== Row Parsers ====================

fn project_from_row(row: &Row) -> std::result::Result<Project, rusqlite::Error> {
    Ok(Project {
        project_id: row.get(0)?,
        name: row.get(1)?,
        created_at: row
            .get::<_, Option<String>>(2)?
            .map(|raw| parse_datetime(2, raw))
            .transpose()?,
    })
}

fn task_from_row(row: &Row) -> std::result::Result<Task, rusqlite::Error> {
    Ok(Task {
        task_id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        status: row.get(3)?,
        assignee: row.get(4)?,
        retrieved_at: row
            .get::<_, Option<String>>(5)?
            .map(|raw| parse_datetime(5, raw))
            .transpose()?,
        qc_status: row.get(6)?,
    })
}

fn annotation_from_row(row: &Row) -> std::result::Result<Annotation, rusqlite::Error> {
    let attributes = row
        .get::<_, Option<String>>(9)?
        .map(|raw| {
            attributes::from_column(&raw).map_err(|e| conversion_error(9, e.to_string()))
        })
        .transpose()?;

    Ok(Annotation {
        annotation_id: row.get(0)?,
        task_id: row.get(1)?,
        track_id: row.get(2)?,
        frame: row.get(3)?,
        xtl: row.get(4)?,
        ytl: row.get(5)?,
        xbr: row.get(6)?,
        ybr: row.get(7)?,
        outside: row.get(8)?,
        attributes,
    })
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

/// RFC 3339 UTC with milliseconds, matching the column defaults.
pub(crate) fn format_datetime(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a timestamp read from result column `column`.
pub(crate) fn parse_datetime(
    column: usize,
    s: String,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    // Try formats with timezone first
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }
    // Then naive formats, assumed UTC
    if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(DateTime::from_naive_utc_and_offset(ndt, Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(DateTime::from_naive_utc_and_offset(ndt, Utc));
    }
    Err(conversion_error(column, format!("Cannot parse datetime: {s}")))
}
