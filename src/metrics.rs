//! Pipeline metrics as per-project JSON Lines files.
//!
//! Each event is appended to `<dir>/<project_id>_metrics.jsonl`. Events that
//! repeat the same key within one 5 second bucket are dropped, so handlers
//! can log freely without flooding the file.

use crate::error::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Project id used when an event is not tied to a project.
pub const NO_PROJECT: i64 = -1;

/// Width of the de-duplication window in seconds.
pub const DEDUP_WINDOW_SECS: f64 = 5.0;

const FILE_SUFFIX: &str = "_metrics.jsonl";

pub const TASK_ASSIGNED: &str = "task_assigned";
pub const QC_UPDATED: &str = "qc_updated";
pub const ANNOTATIONS_IMPORTED: &str = "annotations_imported";
pub const EXPORT_TIME: &str = "export_time";

fn no_project() -> i64 {
    NO_PROJECT
}

/// One metrics record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub event_type: String,
    #[serde(default = "no_project")]
    pub project_id: i64,
    #[serde(default)]
    pub task_id: Option<i64>,
    #[serde(default)]
    pub annotator: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl MetricEvent {
    /// New event stamped with the current time.
    pub fn new(event_type: impl Into<String>) -> Self {
        MetricEvent {
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
            event_type: event_type.into(),
            project_id: NO_PROJECT,
            task_id: None,
            annotator: None,
            extra: Map::new(),
        }
    }

    pub fn project(mut self, project_id: Option<i64>) -> Self {
        self.project_id = project_id.unwrap_or(NO_PROJECT);
        self
    }

    pub fn task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn annotator(mut self, annotator: impl Into<String>) -> Self {
        self.annotator = Some(annotator.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn dedup_key(&self) -> DedupKey {
        DedupKey {
            project_id: self.project_id,
            task_id: self.task_id,
            event_type: self.event_type.clone(),
            annotator: self.annotator.clone(),
            // serde_json maps are sorted, so this is canonical
            extra: Value::Object(self.extra.clone()).to_string(),
            bucket: (self.timestamp / DEDUP_WINDOW_SECS).floor() as i64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    project_id: i64,
    task_id: Option<i64>,
    event_type: String,
    annotator: Option<String>,
    extra: String,
    bucket: i64,
}

/// Append-only metrics log rooted at a directory
pub struct MetricsLog {
    dir: PathBuf,
    seen: HashSet<DedupKey>,
}

impl MetricsLog {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        MetricsLog {
            dir: dir.into(),
            seen: HashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn project_file(&self, project_id: i64) -> PathBuf {
        self.dir.join(format!("{project_id}{FILE_SUFFIX}"))
    }

    /// Append an event. Returns false when it was a duplicate and skipped.
    pub fn record(&mut self, event: &MetricEvent) -> Result<bool> {
        let key = event.dedup_key();
        if self.seen.contains(&key) {
            info!(
                event_type = %event.event_type,
                project_id = event.project_id,
                task_id = ?event.task_id,
                "skipping duplicate metric"
            );
            return Ok(false);
        }

        fs::create_dir_all(&self.dir)?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.project_file(event.project_id))?;
        file.write_all(line.as_bytes())?;

        self.seen.insert(key);
        info!(
            event_type = %event.event_type,
            project_id = event.project_id,
            task_id = ?event.task_id,
            annotator = ?event.annotator,
            "metric recorded"
        );
        Ok(true)
    }

    /// Events of one project in file order. A missing file is empty.
    pub fn read_by_project(&self, project_id: i64) -> Result<Vec<MetricEvent>> {
        let path = self.project_file(project_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_file(&path)
    }

    /// Events of every project, files in name order.
    pub fn read_all(&self) -> Result<Vec<MetricEvent>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.ends_with(FILE_SUFFIX))
            })
            .collect();
        files.sort();

        let mut events = Vec::new();
        for path in files {
            events.extend(read_file(&path)?);
        }
        Ok(events)
    }
}

fn read_file(path: &Path) -> Result<Vec<MetricEvent>> {
    let reader = BufReader::new(fs::File::open(path)?);
    let mut events = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<MetricEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                let preview: String = line.chars().take(200).collect();
                warn!(file = %path.display(), error = %e, line = %preview, "skipping malformed metric line");
            }
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (MetricsLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log = MetricsLog::new(temp_dir.path().join("metrics"));
        (log, temp_dir)
    }

    #[test]
    fn test_record_and_read_by_project() {
        let (mut log, _temp) = setup();

        let event = MetricEvent::new("task_ready")
            .project(Some(1))
            .task(101)
            .annotator("user1")
            .extra("time_on_task_creation", 3.5);
        assert!(log.record(&event).unwrap());

        let events = log.read_by_project(1).unwrap();
        assert_eq!(events, vec![event]);
        assert!(log.project_file(1).ends_with("1_metrics.jsonl"));
    }

    #[test]
    fn test_duplicate_within_window_skipped() {
        let (mut log, _temp) = setup();

        let first = MetricEvent::new(EXPORT_TIME).project(Some(1)).at(1000.0);
        let again = MetricEvent::new(EXPORT_TIME).project(Some(1)).at(1004.9);
        let later = MetricEvent::new(EXPORT_TIME).project(Some(1)).at(1005.0);

        assert!(log.record(&first).unwrap());
        assert!(!log.record(&again).unwrap());
        assert!(log.record(&later).unwrap());
        assert_eq!(log.read_by_project(1).unwrap().len(), 2);
    }

    #[test]
    fn test_different_extra_not_duplicate() {
        let (mut log, _temp) = setup();

        let a = MetricEvent::new("ingest_time").extra("files", 1).at(50.0);
        let b = MetricEvent::new("ingest_time").extra("files", 2).at(50.0);
        assert!(log.record(&a).unwrap());
        assert!(log.record(&b).unwrap());
    }

    #[test]
    fn test_default_project_file() {
        let (mut log, _temp) = setup();

        log.record(&MetricEvent::new("ingest_time")).unwrap();
        assert!(log.project_file(NO_PROJECT).exists());
        assert_eq!(log.read_by_project(NO_PROJECT).unwrap()[0].project_id, -1);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let (log, _temp) = setup();
        assert!(log.read_by_project(42).unwrap().is_empty());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_read_all_skips_malformed_lines() {
        let (mut log, _temp) = setup();

        log.record(&MetricEvent::new(QC_UPDATED).project(Some(1)).task(10))
            .unwrap();
        log.record(&MetricEvent::new(TASK_ASSIGNED).project(Some(2)).task(20))
            .unwrap();

        let mut file = OpenOptions::new()
            .append(true)
            .open(log.project_file(2))
            .unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();
        fs::write(log.dir().join("notes.txt"), "ignored").unwrap();

        let events = log.read_all().unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec![QC_UPDATED, TASK_ASSIGNED]);
    }

    #[test]
    fn test_parses_lines_without_optional_fields() {
        let (log, _temp) = setup();
        fs::create_dir_all(log.dir()).unwrap();
        fs::write(
            log.project_file(3),
            "{\"timestamp\": 12.5, \"event_type\": \"ingest_time\", \"project_id\": 3}\n",
        )
        .unwrap();

        let events = log.read_by_project(3).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].task_id.is_none());
        assert!(events[0].extra.is_empty());
    }
}
