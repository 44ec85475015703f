//! Table definitions and migration list.

use crate::models::DEFAULT_QC_STATUS;

/// Table that records applied migrations.
pub const MIGRATIONS_TABLE: &str = "schema_migrations";

pub const CREATE_MIGRATIONS_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)";

/// One schema step. `sql` must be safe to run against a store that already
/// holds the structures it creates.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS projects (
    project_id INTEGER PRIMARY KEY,
    name VARCHAR(255) NOT NULL CHECK (length(name) <= 255),
    created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS tasks (
    task_id INTEGER PRIMARY KEY,
    project_id INTEGER REFERENCES projects(project_id),
    name VARCHAR(255) NOT NULL CHECK (length(name) <= 255),
    status VARCHAR(50) CHECK (status IS NULL OR length(status) <= 50),
    assignee VARCHAR(255) CHECK (assignee IS NULL OR length(assignee) <= 255),
    retrieved_at TEXT,
    qc_status VARCHAR(50) DEFAULT 'pending' CHECK (qc_status IS NULL OR length(qc_status) <= 50)
);

CREATE TABLE IF NOT EXISTS annotations (
    annotation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER REFERENCES tasks(task_id),
    track_id INTEGER NOT NULL,
    frame INTEGER NOT NULL,
    xtl REAL,
    ytl REAL,
    xbr REAL,
    ybr REAL,
    outside BOOLEAN,
    attributes TEXT CHECK (attributes IS NULL OR json_valid(attributes))
);
";

// Lookup indexes only; (task_id, track_id, frame) stays non-unique.
const CREATE_INDEXES: &str = "
CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks(project_id);
CREATE INDEX IF NOT EXISTS idx_annotations_task_id ON annotations(task_id);
CREATE INDEX IF NOT EXISTS idx_annotations_task_track_frame ON annotations(task_id, track_id, frame);
";

/// Ordered migration list. Never edit a released entry; append instead.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_projects_tasks_annotations",
        sql: CREATE_TABLES,
    },
    Migration {
        version: 2,
        name: "add_lookup_indexes",
        sql: CREATE_INDEXES,
    },
];

/// Highest version in [`MIGRATIONS`].
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Default a column must declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedDefault {
    /// Not checked.
    Any,
    /// Some default expression must be present.
    Present,
    /// The default must be this text literal.
    Text(&'static str),
}

/// A column an existing table must carry to be accepted.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedColumn {
    pub name: &'static str,
    pub primary_key: bool,
    pub default: ExpectedDefault,
    /// Table this column must reference with a foreign key.
    pub references: Option<&'static str>,
}

impl ExpectedColumn {
    const fn with_default(mut self, default: ExpectedDefault) -> Self {
        self.default = default;
        self
    }

    const fn references(mut self, table: &'static str) -> Self {
        self.references = Some(table);
        self
    }
}

const fn col(name: &'static str) -> ExpectedColumn {
    ExpectedColumn {
        name,
        primary_key: false,
        default: ExpectedDefault::Any,
        references: None,
    }
}

const fn pk(name: &'static str) -> ExpectedColumn {
    ExpectedColumn {
        primary_key: true,
        ..col(name)
    }
}

/// Column catalogue checked after every migration run.
pub const EXPECTED_TABLES: &[(&str, &[ExpectedColumn])] = &[
    (
        "projects",
        &[
            pk("project_id"),
            col("name"),
            col("created_at").with_default(ExpectedDefault::Present),
        ],
    ),
    (
        "tasks",
        &[
            pk("task_id"),
            col("project_id").references("projects"),
            col("name"),
            col("status"),
            col("assignee"),
            col("retrieved_at"),
            col("qc_status").with_default(ExpectedDefault::Text(DEFAULT_QC_STATUS)),
        ],
    ),
    (
        "annotations",
        &[
            pk("annotation_id"),
            col("task_id").references("tasks"),
            col("track_id"),
            col("frame"),
            col("xtl"),
            col("ytl"),
            col("xbr"),
            col("ybr"),
            col("outside"),
            col("attributes"),
        ],
    ),
];
