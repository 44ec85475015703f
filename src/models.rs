use crate::attributes::Attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// QC status a task gets when none is given on insert.
pub const DEFAULT_QC_STATUS: &str = "pending";

/// Column length limits (the VARCHAR sizes of the schema).
pub const NAME_MAX_LEN: usize = 255;
pub const STATUS_MAX_LEN: usize = 50;
pub const ASSIGNEE_MAX_LEN: usize = 255;
pub const QC_STATUS_MAX_LEN: usize = 50;

/// A labeling project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub project_id: i64,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A task inside a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: i64,
    pub project_id: Option<i64>,
    pub name: String,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub retrieved_at: Option<DateTime<Utc>>,
    pub qc_status: Option<String>,
}

/// One bounding box of one track on one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub annotation_id: i64,
    pub task_id: Option<i64>,
    pub track_id: i64,
    pub frame: i64,
    pub xtl: Option<f64>,
    pub ytl: Option<f64>,
    pub xbr: Option<f64>,
    pub ybr: Option<f64>,
    pub outside: Option<bool>,
    pub attributes: Option<Attributes>,
}

impl Annotation {
    /// The box, when all four corners are recorded.
    pub fn bbox(&self) -> Option<BoundingBox> {
        Some(BoundingBox {
            xtl: self.xtl?,
            ytl: self.ytl?,
            xbr: self.xbr?,
            ybr: self.ybr?,
        })
    }

    /// Visible unless explicitly marked outside.
    pub fn is_visible(&self) -> bool {
        !self.outside.unwrap_or(false)
    }
}

/// Rectangle from top-left to bottom-right
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xtl: f64,
    pub ytl: f64,
    pub xbr: f64,
    pub ybr: f64,
}

impl BoundingBox {
    pub fn new(xtl: f64, ytl: f64, xbr: f64, ybr: f64) -> Self {
        BoundingBox { xtl, ytl, xbr, ybr }
    }

    pub fn width(&self) -> f64 {
        (self.xbr - self.xtl).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.ybr - self.ytl).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }
}

/// New project input
#[derive(Debug, Clone)]
pub struct NewProject {
    pub project_id: i64,
    pub name: String,
    /// Left empty to take the column default (now).
    pub created_at: Option<DateTime<Utc>>,
}

impl NewProject {
    pub fn new(project_id: i64, name: impl Into<String>) -> Self {
        NewProject {
            project_id,
            name: name.into(),
            created_at: None,
        }
    }
}

/// New task input
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub task_id: i64,
    pub project_id: Option<i64>,
    pub name: String,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub retrieved_at: Option<DateTime<Utc>>,
    /// Left empty to take the column default ("pending").
    pub qc_status: Option<String>,
}

impl NewTask {
    pub fn new(task_id: i64, project_id: Option<i64>, name: impl Into<String>) -> Self {
        NewTask {
            task_id,
            project_id,
            name: name.into(),
            ..Default::default()
        }
    }
}

/// New annotation input; `annotation_id` is assigned by the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAnnotation {
    #[serde(default)]
    pub task_id: Option<i64>,
    pub track_id: i64,
    pub frame: i64,
    #[serde(default)]
    pub xtl: Option<f64>,
    #[serde(default)]
    pub ytl: Option<f64>,
    #[serde(default)]
    pub xbr: Option<f64>,
    #[serde(default)]
    pub ybr: Option<f64>,
    #[serde(default)]
    pub outside: Option<bool>,
    #[serde(default)]
    pub attributes: Option<Attributes>,
}

impl NewAnnotation {
    pub fn new(task_id: Option<i64>, track_id: i64, frame: i64) -> Self {
        NewAnnotation {
            task_id,
            track_id,
            frame,
            ..Default::default()
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.xtl = Some(bbox.xtl);
        self.ytl = Some(bbox.ytl);
        self.xbr = Some(bbox.xbr);
        self.ybr = Some(bbox.ybr);
        self
    }

    pub fn with_outside(mut self, outside: bool) -> Self {
        self.outside = Some(outside);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// A migration that has been recorded in `schema_migrations`
#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// Outcome of running the migration harness
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub version: i64,
    pub applied: Vec<AppliedMigration>,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TableCounts {
    pub projects: i64,
    pub tasks: i64,
    pub annotations: i64,
}

/// Snapshot of the store's schema state
#[derive(Debug, Clone, Serialize)]
pub struct SchemaStatus {
    pub version: i64,
    pub latest_version: i64,
    pub migrations: Vec<AppliedMigration>,
    pub counts: TableCounts,
}
