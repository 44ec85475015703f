use crate::db::Database;
use crate::db::schema::latest_version;
use crate::error::{Result, StoreError};
use crate::models::{
    ASSIGNEE_MAX_LEN, Annotation, MigrationReport, NAME_MAX_LEN, NewAnnotation, NewProject,
    NewTask, Project, QC_STATUS_MAX_LEN, STATUS_MAX_LEN, SchemaStatus, TableCounts, Task,
};
use crate::tracks::{self, DuplicateKey, TaskTracks, TrackSummary};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

/// Store service: validation and bookkeeping on top of [`Database`]
pub struct AnnotationStore {
    db: Database,
}

impl AnnotationStore {
    /// Open the store at a database file (created if missing)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::open(path)?;
        Ok(AnnotationStore { db })
    }

    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(AnnotationStore { db })
    }

    /// Check if initialized
    pub fn is_initialized(&self) -> Result<bool> {
        self.db.is_initialized()
    }

    /// Create or upgrade the schema. Safe to call on every start.
    pub fn migrate(&self) -> Result<MigrationReport> {
        self.db.migrate()
    }

    pub fn status(&self) -> Result<SchemaStatus> {
        let version = self.db.schema_version()?;
        let counts = if version > 0 {
            self.db.table_counts()?
        } else {
            TableCounts::default()
        };
        Ok(SchemaStatus {
            version,
            latest_version: latest_version(),
            migrations: self.db.applied_migrations()?,
            counts,
        })
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.is_initialized()? {
            return Err(StoreError::NotInitialized);
        }
        Ok(())
    }

    // ==================== Projects ====================

    pub fn create_project(&self, project: NewProject) -> Result<Project> {
        self.ensure_initialized()?;
        check_len("projects.name", &project.name, NAME_MAX_LEN)?;

        let created = self.db.insert_project(&project)?;
        info!(project_id = created.project_id, "project created");
        Ok(created)
    }

    pub fn get_project(&self, id: i64) -> Result<Project> {
        self.ensure_initialized()?;
        self.db
            .get_project(id)?
            .ok_or(StoreError::ProjectNotFound(id))
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        self.ensure_initialized()?;
        self.db.list_projects()
    }

    // ==================== Tasks ====================

    pub fn create_task(&self, task: NewTask) -> Result<Task> {
        self.ensure_initialized()?;
        check_len("tasks.name", &task.name, NAME_MAX_LEN)?;
        check_opt_len("tasks.status", task.status.as_deref(), STATUS_MAX_LEN)?;
        check_opt_len("tasks.assignee", task.assignee.as_deref(), ASSIGNEE_MAX_LEN)?;
        check_opt_len("tasks.qc_status", task.qc_status.as_deref(), QC_STATUS_MAX_LEN)?;

        let created = self.db.insert_task(&task)?;
        info!(
            task_id = created.task_id,
            project_id = ?created.project_id,
            "task created"
        );
        Ok(created)
    }

    pub fn get_task(&self, id: i64) -> Result<Task> {
        self.ensure_initialized()?;
        self.db.get_task(id)?.ok_or(StoreError::TaskNotFound(id))
    }

    /// All tasks, or only those of one project
    pub fn list_tasks(&self, project_id: Option<i64>) -> Result<Vec<Task>> {
        self.ensure_initialized()?;
        self.db.list_tasks(project_id)
    }

    /// Set or clear the assignee
    pub fn assign_task(&self, id: i64, assignee: Option<&str>) -> Result<Task> {
        self.ensure_initialized()?;
        check_opt_len("tasks.assignee", assignee, ASSIGNEE_MAX_LEN)?;

        if !self.db.set_task_assignee(id, assignee)? {
            return Err(StoreError::TaskNotFound(id));
        }
        debug!(task_id = id, assignee = ?assignee, "task assigned");
        self.get_task(id)
    }

    pub fn set_task_status(&self, id: i64, status: Option<&str>) -> Result<Task> {
        self.ensure_initialized()?;
        check_opt_len("tasks.status", status, STATUS_MAX_LEN)?;

        if !self.db.set_task_status(id, status)? {
            return Err(StoreError::TaskNotFound(id));
        }
        debug!(task_id = id, status = ?status, "task status updated");
        self.get_task(id)
    }

    pub fn set_qc_status(&self, id: i64, qc_status: &str) -> Result<Task> {
        self.ensure_initialized()?;
        check_len("tasks.qc_status", qc_status, QC_STATUS_MAX_LEN)?;

        if !self.db.set_task_qc_status(id, qc_status)? {
            return Err(StoreError::TaskNotFound(id));
        }
        debug!(task_id = id, qc_status, "qc status updated");
        self.get_task(id)
    }

    /// Record when the task's results were fetched
    pub fn mark_retrieved(&self, id: i64, at: DateTime<Utc>) -> Result<Task> {
        self.ensure_initialized()?;

        if !self.db.set_task_retrieved_at(id, &at)? {
            return Err(StoreError::TaskNotFound(id));
        }
        debug!(task_id = id, retrieved_at = %at, "task marked retrieved");
        self.get_task(id)
    }

    // ==================== Annotations ====================

    pub fn add_annotation(&self, annotation: NewAnnotation) -> Result<Annotation> {
        self.ensure_initialized()?;
        let created = self.db.insert_annotation(&annotation)?;
        debug!(
            annotation_id = created.annotation_id,
            task_id = ?created.task_id,
            track_id = created.track_id,
            frame = created.frame,
            "annotation added"
        );
        Ok(created)
    }

    /// Insert a batch in one transaction; any failure inserts nothing.
    pub fn add_annotations(&self, annotations: &[NewAnnotation]) -> Result<Vec<Annotation>> {
        self.ensure_initialized()?;
        let created = self.db.insert_annotations(annotations)?;
        info!(count = created.len(), "annotations added");
        Ok(created)
    }

    pub fn get_annotation(&self, id: i64) -> Result<Annotation> {
        self.ensure_initialized()?;
        self.db
            .get_annotation(id)?
            .ok_or(StoreError::AnnotationNotFound(id))
    }

    /// A task's annotations ordered by `(track_id, frame, annotation_id)`
    pub fn list_annotations(&self, task_id: i64, track_id: Option<i64>) -> Result<Vec<Annotation>> {
        self.get_task(task_id)?;
        self.db.list_annotations(task_id, track_id)
    }

    // ==================== Tracks ====================

    /// The task together with its annotations grouped into tracks
    pub fn task_tracks(&self, task_id: i64) -> Result<TaskTracks> {
        let task = self.get_task(task_id)?;
        let annotations = self.db.list_annotations(task_id, None)?;
        Ok(TaskTracks {
            task,
            tracks: tracks::group_tracks(annotations),
        })
    }

    pub fn track_summaries(&self, task_id: i64) -> Result<Vec<TrackSummary>> {
        let task_tracks = self.task_tracks(task_id)?;
        Ok(task_tracks.tracks.iter().map(|t| t.summary()).collect())
    }

    /// `(track_id, frame)` pairs of the task recorded more than once
    pub fn duplicate_keys(&self, task_id: i64) -> Result<Vec<DuplicateKey>> {
        let annotations = self.list_annotations(task_id, None)?;
        Ok(tracks::duplicate_keys(&annotations))
    }
}

fn check_len(column: &'static str, value: &str, max: usize) -> Result<()> {
    let len = value.chars().count();
    if len > max {
        return Err(StoreError::ValueTooLong { column, max, len });
    }
    Ok(())
}

fn check_opt_len(column: &'static str, value: Option<&str>, max: usize) -> Result<()> {
    match value {
        Some(v) => check_len(column, v, max),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConstraintKind;
    use crate::models::BoundingBox;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn setup() -> (AnnotationStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = AnnotationStore::open(&db_path).unwrap();
        store.migrate().unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_requires_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let store = AnnotationStore::open(temp_dir.path().join("fresh.db")).unwrap();

        assert!(!store.is_initialized().unwrap());
        let err = store.list_projects().unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized));

        let status = store.status().unwrap();
        assert_eq!(status.version, 0);
        assert_eq!(status.latest_version, latest_version());
        assert!(status.migrations.is_empty());
    }

    #[test]
    fn test_reinit_keeps_data() {
        let (store, temp) = setup();
        store.create_project(NewProject::new(1, "Demo")).unwrap();
        drop(store);

        let store = AnnotationStore::open(temp.path().join("test.db")).unwrap();
        let report = store.migrate().unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(store.list_projects().unwrap().len(), 1);
    }

    #[test]
    fn test_demo_scenario() {
        let (store, _temp) = setup();

        let project = store.create_project(NewProject::new(1, "Demo")).unwrap();
        assert!(project.created_at.is_some());

        let task = store
            .create_task(NewTask::new(10, Some(1), "Label cars"))
            .unwrap();
        assert_eq!(task.qc_status.as_deref(), Some("pending"));
        assert!(task.status.is_none());

        let ann = store
            .add_annotation(
                NewAnnotation::new(Some(10), 1, 0)
                    .with_bbox(BoundingBox::new(0.0, 0.0, 10.0, 10.0))
                    .with_outside(false),
            )
            .unwrap();
        assert!(ann.annotation_id > 0);

        let fetched = store.get_annotation(ann.annotation_id).unwrap();
        assert_eq!(fetched, ann);
        assert_eq!(fetched.bbox().unwrap().area(), 100.0);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let (store, _temp) = setup();

        let err = store
            .create_task(NewTask::new(10, Some(99), "Orphan"))
            .unwrap_err();
        assert!(err.is_constraint(ConstraintKind::ForeignKey));

        let err = store
            .add_annotation(NewAnnotation::new(Some(404), 1, 0))
            .unwrap_err();
        assert!(err.is_constraint(ConstraintKind::ForeignKey));
        assert_eq!(err.error_code(), "ForeignKeyViolation");
    }

    #[test]
    fn test_duplicate_task_id() {
        let (store, _temp) = setup();
        store.create_task(NewTask::new(10, None, "First")).unwrap();
        let err = store.create_task(NewTask::new(10, None, "Second")).unwrap_err();
        assert!(err.is_constraint(ConstraintKind::PrimaryKey));
    }

    #[test]
    fn test_value_too_long() {
        let (store, _temp) = setup();

        let err = store
            .create_project(NewProject::new(1, "n".repeat(256)))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::ValueTooLong {
                column: "projects.name",
                max: 255,
                len: 256
            }
        ));

        store.create_task(NewTask::new(10, None, "Task")).unwrap();
        let err = store
            .set_task_status(10, Some("s".repeat(51).as_str()))
            .unwrap_err();
        assert!(matches!(err, StoreError::ValueTooLong { max: 50, .. }));

        // Limits count characters, not bytes
        store.create_project(NewProject::new(2, "é".repeat(255))).unwrap();
    }

    #[test]
    fn test_task_updates() {
        let (store, _temp) = setup();
        store.create_task(NewTask::new(10, None, "Task")).unwrap();

        let task = store.assign_task(10, Some("user1")).unwrap();
        assert_eq!(task.assignee.as_deref(), Some("user1"));
        let task = store.assign_task(10, None).unwrap();
        assert!(task.assignee.is_none());

        let task = store.set_task_status(10, Some("annotation")).unwrap();
        assert_eq!(task.status.as_deref(), Some("annotation"));

        let task = store.set_qc_status(10, "rejected").unwrap();
        assert_eq!(task.qc_status.as_deref(), Some("rejected"));

        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let task = store.mark_retrieved(10, at).unwrap();
        assert_eq!(task.retrieved_at, Some(at));
    }

    #[test]
    fn test_updates_on_missing_task() {
        let (store, _temp) = setup();
        assert!(matches!(
            store.assign_task(5, Some("x")).unwrap_err(),
            StoreError::TaskNotFound(5)
        ));
        assert!(matches!(
            store.set_qc_status(5, "approved").unwrap_err(),
            StoreError::TaskNotFound(5)
        ));
        assert!(matches!(
            store.mark_retrieved(5, Utc::now()).unwrap_err(),
            StoreError::TaskNotFound(5)
        ));
    }

    #[test]
    fn test_missing_reads() {
        let (store, _temp) = setup();
        assert!(matches!(store.get_project(1).unwrap_err(), StoreError::ProjectNotFound(1)));
        assert!(matches!(store.get_task(2).unwrap_err(), StoreError::TaskNotFound(2)));
        assert!(matches!(
            store.get_annotation(3).unwrap_err(),
            StoreError::AnnotationNotFound(3)
        ));
        assert!(matches!(
            store.list_annotations(4, None).unwrap_err(),
            StoreError::TaskNotFound(4)
        ));
    }

    #[test]
    fn test_batch_all_or_nothing() {
        let (store, _temp) = setup();
        store.create_task(NewTask::new(10, None, "Task")).unwrap();

        let batch = vec![
            NewAnnotation::new(Some(10), 1, 0),
            NewAnnotation::new(Some(11), 1, 1),
        ];
        assert!(store.add_annotations(&batch).is_err());
        assert_eq!(store.status().unwrap().counts.annotations, 0);
    }

    #[test]
    fn test_tracks_and_duplicates() {
        let (store, _temp) = setup();
        store.create_task(NewTask::new(10, None, "Task")).unwrap();
        store
            .add_annotations(&[
                NewAnnotation::new(Some(10), 1, 0),
                NewAnnotation::new(Some(10), 1, 1).with_outside(true),
                NewAnnotation::new(Some(10), 2, 0),
                NewAnnotation::new(Some(10), 2, 0),
            ])
            .unwrap();

        let task_tracks = store.task_tracks(10).unwrap();
        assert_eq!(task_tracks.task.task_id, 10);
        assert_eq!(task_tracks.tracks.len(), 2);
        assert_eq!(task_tracks.annotation_count(), 4);

        let summaries = store.track_summaries(10).unwrap();
        assert_eq!(summaries[0].visible_frames, 1);

        let dups = store.duplicate_keys(10).unwrap();
        assert_eq!(dups.len(), 1);
        assert_eq!((dups[0].track_id, dups[0].frame), (2, 0));
        assert_eq!(dups[0].annotation_ids.len(), 2);
    }

    #[test]
    fn test_status_counts() {
        let (store, _temp) = setup();
        store.create_project(NewProject::new(1, "Demo")).unwrap();
        store.create_task(NewTask::new(10, Some(1), "Task")).unwrap();

        let status = store.status().unwrap();
        assert_eq!(status.version, latest_version());
        assert_eq!(status.migrations.len(), 2);
        assert_eq!(status.counts.projects, 1);
        assert_eq!(status.counts.tasks, 1);
        assert_eq!(status.counts.annotations, 0);
    }
}
