use crate::assignment;
use crate::attributes::{self, Attributes};
use crate::cli::AssignArgs;
use crate::config::Settings;
use crate::core::AnnotationStore;
use crate::error::StoreError;
use crate::metrics::{self, MetricEvent, MetricsLog};
use crate::models::{Annotation, BoundingBox, NewAnnotation, NewProject, NewTask, Task};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::warn;

type HandlerResult = Result<(), StoreError>;

fn open_store(settings: &Settings) -> Result<AnnotationStore, StoreError> {
    AnnotationStore::open(&settings.db_path)
}

/// Metrics never fail a command; write errors are only logged.
fn record_metric(settings: &Settings, event: MetricEvent) {
    let mut log = MetricsLog::new(&settings.metrics_dir);
    if let Err(e) = log.record(&event) {
        warn!(event_type = %event.event_type, error = %e, "failed to write metric");
    }
}

fn or_none(value: Option<&str>) -> &str {
    value.unwrap_or("(none)")
}

// ==================== Schema ====================

/// Handle the init command
pub fn handle_init(settings: &Settings) -> HandlerResult {
    let store = open_store(settings)?;
    let report = store.migrate()?;

    if report.applied.is_empty() {
        println!(
            "Store at {} is up to date (schema version {})",
            settings.db_path.display(),
            report.version
        );
    } else {
        println!("Initialized store at {}", settings.db_path.display());
        for migration in &report.applied {
            println!("  - Applied {:03}_{}", migration.version, migration.name);
        }
        println!("Schema version: {}", report.version);
    }

    Ok(())
}

/// Handle the status command
pub fn handle_status(settings: &Settings) -> HandlerResult {
    let store = open_store(settings)?;
    let status = store.status()?;

    println!("Database:     {}", settings.db_path.display());
    println!(
        "Schema:       version {} (latest {})",
        status.version, status.latest_version
    );
    if status.version == 0 {
        println!("Not initialized. Run `labelstore init`.");
        return Ok(());
    }
    if status.version < status.latest_version {
        println!("Pending migrations. Run `labelstore init` to upgrade.");
    }

    println!("Migrations:");
    for migration in &status.migrations {
        println!(
            "  {:03}_{}  {}",
            migration.version,
            migration.name,
            migration.applied_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("Projects:     {}", status.counts.projects);
    println!("Tasks:        {}", status.counts.tasks);
    println!("Annotations:  {}", status.counts.annotations);

    Ok(())
}

// ==================== Projects ====================

pub fn handle_project_add(settings: &Settings, id: i64, name: &str) -> HandlerResult {
    let store = open_store(settings)?;

    let project = store.create_project(NewProject::new(id, name))?;
    println!("Created project #{}: {}", project.project_id, project.name);

    Ok(())
}

pub fn handle_project_list(settings: &Settings) -> HandlerResult {
    let store = open_store(settings)?;

    let projects = store.list_projects()?;
    if projects.is_empty() {
        println!("No projects found.");
        return Ok(());
    }

    for project in projects {
        let created = project
            .created_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  [#{:>4}] {}  ({created})", project.project_id, project.name);
    }

    Ok(())
}

pub fn handle_project_show(settings: &Settings, id: i64) -> HandlerResult {
    let store = open_store(settings)?;

    let project = store.get_project(id)?;
    let tasks = store.list_tasks(Some(id))?;

    println!("[#{}] {}", project.project_id, project.name);
    if let Some(created) = project.created_at {
        println!("Created:      {}", created.format("%Y-%m-%d %H:%M"));
    }
    if tasks.is_empty() {
        println!("Tasks:        (none)");
    } else {
        println!("Tasks:");
        for task in &tasks {
            print_task_line(task);
        }
    }

    Ok(())
}

// ==================== Tasks ====================

pub fn handle_task_add(
    settings: &Settings,
    id: i64,
    name: &str,
    project: Option<i64>,
    status: Option<String>,
    assignee: Option<String>,
    qc: Option<String>,
) -> HandlerResult {
    let store = open_store(settings)?;

    let task = store.create_task(NewTask {
        task_id: id,
        project_id: project,
        name: name.to_string(),
        status,
        assignee,
        retrieved_at: None,
        qc_status: qc,
    })?;

    println!("Created task #{}: {}", task.task_id, task.name);
    println!("  QC status: {}", or_none(task.qc_status.as_deref()));

    Ok(())
}

pub fn handle_task_list(settings: &Settings, project: Option<i64>) -> HandlerResult {
    let store = open_store(settings)?;

    let tasks = store.list_tasks(project)?;
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }
    for task in &tasks {
        print_task_line(task);
    }

    Ok(())
}

fn print_task_line(task: &Task) {
    let project = task
        .project_id
        .map(|p| format!("project #{p}"))
        .unwrap_or_else(|| "no project".to_string());
    println!(
        "  [#{:>4}] {}  ({project}, status: {}, assignee: {}, qc: {})",
        task.task_id,
        task.name,
        or_none(task.status.as_deref()),
        or_none(task.assignee.as_deref()),
        or_none(task.qc_status.as_deref()),
    );
}

pub fn handle_task_show(settings: &Settings, id: i64) -> HandlerResult {
    let store = open_store(settings)?;

    let task_tracks = store.task_tracks(id)?;
    let task = &task_tracks.task;

    println!("[#{}] {}", task.task_id, task.name);
    match task.project_id {
        Some(p) => println!("Project:      #{p}"),
        None => println!("Project:      (none)"),
    }
    println!("Status:       {}", or_none(task.status.as_deref()));
    println!("Assignee:     {}", or_none(task.assignee.as_deref()));
    println!("QC status:    {}", or_none(task.qc_status.as_deref()));
    match task.retrieved_at {
        Some(at) => println!("Retrieved:    {}", at.format("%Y-%m-%d %H:%M")),
        None => println!("Retrieved:    (never)"),
    }
    println!(
        "Annotations:  {} in {} tracks",
        task_tracks.annotation_count(),
        task_tracks.tracks.len()
    );

    Ok(())
}

pub fn handle_task_assign(settings: &Settings, args: &AssignArgs) -> HandlerResult {
    let store = open_store(settings)?;

    let assignee = match (&args.assignee, &args.pool, args.clear) {
        (Some(name), None, false) => Some(name.clone()),
        (None, Some(pool), false) => {
            let pool = assignment::parse_pool(pool);
            let picked = assignment::select_annotators(&pool, 1, &mut rand::rng())?;
            picked.into_iter().next()
        }
        (None, None, true) => None,
        _ => {
            return Err(StoreError::InvalidInput(
                "give exactly one of <ASSIGNEE>, --pool or --clear".to_string(),
            ));
        }
    };

    let task = store.assign_task(args.id, assignee.as_deref())?;
    match &task.assignee {
        Some(name) => {
            println!("Assigned task #{} to {name}", task.task_id);
            record_metric(
                settings,
                MetricEvent::new(metrics::TASK_ASSIGNED)
                    .project(task.project_id)
                    .task(task.task_id)
                    .annotator(name.as_str()),
            );
        }
        None => println!("Cleared assignee of task #{}", task.task_id),
    }

    Ok(())
}

pub fn handle_task_status(settings: &Settings, id: i64, status: Option<&str>) -> HandlerResult {
    let store = open_store(settings)?;

    let task = store.set_task_status(id, status)?;
    println!(
        "Task #{} status: {}",
        task.task_id,
        or_none(task.status.as_deref())
    );

    Ok(())
}

pub fn handle_task_qc(settings: &Settings, id: i64, qc_status: &str) -> HandlerResult {
    let store = open_store(settings)?;

    let task = store.set_qc_status(id, qc_status)?;
    println!("Task #{} QC status: {qc_status}", task.task_id);

    let mut event = MetricEvent::new(metrics::QC_UPDATED)
        .project(task.project_id)
        .task(task.task_id)
        .extra("qc_status", qc_status);
    if let Some(annotator) = &task.assignee {
        event = event.annotator(annotator.as_str());
    }
    record_metric(settings, event);

    Ok(())
}

pub fn handle_task_retrieved(settings: &Settings, id: i64) -> HandlerResult {
    let store = open_store(settings)?;

    let task = store.mark_retrieved(id, Utc::now())?;
    if let Some(at) = task.retrieved_at {
        println!("Task #{} retrieved at {}", task.task_id, at.to_rfc3339());
    }

    Ok(())
}

// ==================== Annotations ====================

/// Parse `xtl,ytl,xbr,ybr`.
pub fn parse_bbox(raw: &str) -> Result<BoundingBox, StoreError> {
    let parts = raw
        .split(',')
        .map(|p| match p.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(n),
            Ok(n) => Err(format!("`{n}` is not a finite number")),
            Err(e) => Err(e.to_string()),
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::InvalidInput(format!("bad box `{raw}`: {e}")))?;

    match parts.as_slice() {
        [xtl, ytl, xbr, ybr] => Ok(BoundingBox::new(*xtl, *ytl, *xbr, *ybr)),
        _ => Err(StoreError::InvalidInput(format!(
            "box needs 4 numbers xtl,ytl,xbr,ybr, got `{raw}`"
        ))),
    }
}

pub fn handle_annotation_add(
    settings: &Settings,
    task: i64,
    track: i64,
    frame: i64,
    bbox: Option<&str>,
    outside: bool,
    attrs: &[String],
) -> HandlerResult {
    let store = open_store(settings)?;

    let mut new = NewAnnotation::new(Some(task), track, frame).with_outside(outside);
    if let Some(raw) = bbox {
        new = new.with_bbox(parse_bbox(raw)?);
    }
    if !attrs.is_empty() {
        let mut attributes = Attributes::new();
        for raw in attrs {
            let (key, value) = attributes::parse_pair(raw)?;
            attributes.insert(key, value);
        }
        new = new.with_attributes(attributes);
    }

    let annotation = store.add_annotation(new)?;
    println!(
        "Created annotation #{} (task #{task}, track {}, frame {})",
        annotation.annotation_id, annotation.track_id, annotation.frame
    );

    Ok(())
}

fn print_annotation_line(annotation: &Annotation) {
    let bbox = annotation
        .bbox()
        .map(|b| format!("({}, {})-({}, {})", b.xtl, b.ytl, b.xbr, b.ybr))
        .unwrap_or_else(|| "-".to_string());
    let outside = if annotation.is_visible() { "" } else { " outside" };
    let attrs = annotation
        .attributes
        .as_ref()
        .filter(|a| !a.is_empty())
        .map(|a| {
            let pairs = a
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("  {{{pairs}}}")
        })
        .unwrap_or_default();

    println!(
        "  #{:<6} track {:>4}  frame {:>6}  {bbox}{outside}{attrs}",
        annotation.annotation_id, annotation.track_id, annotation.frame
    );
}

pub fn handle_annotation_list(settings: &Settings, task: i64, track: Option<i64>) -> HandlerResult {
    let store = open_store(settings)?;

    let annotations = store.list_annotations(task, track)?;
    if annotations.is_empty() {
        println!("No annotations found.");
        return Ok(());
    }
    for annotation in &annotations {
        print_annotation_line(annotation);
    }

    Ok(())
}

/// Accepted import layouts: a bare array of rows, or an export document.
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportDocument {
    Rows(Vec<NewAnnotation>),
    Export { tracks: Vec<ImportTrack> },
}

#[derive(Deserialize)]
struct ImportTrack {
    annotations: Vec<NewAnnotation>,
}

impl ImportDocument {
    fn into_rows(self) -> Vec<NewAnnotation> {
        match self {
            ImportDocument::Rows(rows) => rows,
            ImportDocument::Export { tracks } => {
                tracks.into_iter().flat_map(|t| t.annotations).collect()
            }
        }
    }
}

pub fn handle_annotation_import(
    settings: &Settings,
    file: &Path,
    task: Option<i64>,
) -> HandlerResult {
    let store = open_store(settings)?;

    let content = fs::read_to_string(file)?;
    let document: ImportDocument = serde_json::from_str(&content)?;
    let mut rows = document.into_rows();
    if let Some(task_id) = task {
        for row in rows.iter_mut().filter(|r| r.task_id.is_none()) {
            row.task_id = Some(task_id);
        }
    }

    // Resolve --task before writing so a bad id fails with nothing inserted.
    let project_id = match task {
        Some(task_id) => store.get_task(task_id)?.project_id,
        None => None,
    };

    let started = Instant::now();
    let created = store.add_annotations(&rows)?;
    println!(
        "Imported {} annotations from {}",
        created.len(),
        file.display()
    );

    let mut event = MetricEvent::new(metrics::ANNOTATIONS_IMPORTED)
        .project(project_id)
        .extra("count", created.len())
        .extra("file", file.display().to_string())
        .extra("time_on_import", started.elapsed().as_secs_f64());
    if let Some(task_id) = task {
        event = event.task(task_id);
    }
    record_metric(settings, event);

    Ok(())
}

pub fn handle_annotation_check(settings: &Settings, task: i64) -> HandlerResult {
    let store = open_store(settings)?;

    let summaries = store.track_summaries(task)?;
    if summaries.is_empty() {
        println!("Task #{task} has no annotations.");
        return Ok(());
    }

    println!("Task #{task}: {} tracks", summaries.len());
    for summary in &summaries {
        let span = match (summary.first_frame, summary.last_frame) {
            (Some(first), Some(last)) => format!("frames {first}..={last}"),
            _ => "no frames".to_string(),
        };
        println!(
            "  track {:>4}  {} annotations, {} visible, {span}",
            summary.track_id, summary.annotations, summary.visible_frames
        );
    }

    let duplicates = store.duplicate_keys(task)?;
    if duplicates.is_empty() {
        println!("No duplicate (track, frame) pairs.");
    } else {
        println!("Duplicate (track, frame) pairs:");
        for dup in &duplicates {
            let ids = dup
                .annotation_ids
                .iter()
                .map(|id| format!("#{id}"))
                .collect::<Vec<_>>()
                .join(", ");
            println!("  track {} frame {}: {ids}", dup.track_id, dup.frame);
        }
    }

    Ok(())
}

// ==================== Export ====================

pub fn handle_export(settings: &Settings, task: i64, output: Option<&Path>) -> HandlerResult {
    let store = open_store(settings)?;

    let started = Instant::now();
    let task_tracks = store.task_tracks(task)?;
    let json = serde_json::to_string_pretty(&task_tracks)?;

    let mut event = MetricEvent::new(metrics::EXPORT_TIME)
        .project(task_tracks.task.project_id)
        .task(task);
    match output {
        Some(path) => {
            fs::write(path, json)?;
            println!(
                "Exported task #{task} ({} annotations in {} tracks) to {}",
                task_tracks.annotation_count(),
                task_tracks.tracks.len(),
                path.display()
            );
            event = event.extra("output_file", path.display().to_string());
        }
        None => println!("{json}"),
    }

    record_metric(
        settings,
        event.extra("time_on_export", started.elapsed().as_secs_f64()),
    );

    Ok(())
}

// ==================== Metrics ====================

pub fn handle_metrics_log(
    settings: &Settings,
    event_type: &str,
    project: Option<i64>,
    task: Option<i64>,
    annotator: Option<&str>,
    extra: &[String],
) -> HandlerResult {
    let mut event = MetricEvent::new(event_type).project(project);
    if let Some(task_id) = task {
        event = event.task(task_id);
    }
    if let Some(name) = annotator {
        event = event.annotator(name);
    }
    for raw in extra {
        let (key, value) = attributes::parse_pair(raw)?;
        event = event.extra(key, serde_json::to_value(value)?);
    }

    let mut log = MetricsLog::new(&settings.metrics_dir);
    if log.record(&event)? {
        println!(
            "Logged {event_type} to {}",
            log.project_file(event.project_id).display()
        );
    } else {
        println!("Skipped duplicate {event_type}");
    }

    Ok(())
}

pub fn handle_metrics_show(settings: &Settings, project: Option<i64>) -> HandlerResult {
    let log = MetricsLog::new(&settings.metrics_dir);
    let events = match project {
        Some(id) => log.read_by_project(id)?,
        None => log.read_all()?,
    };

    if events.is_empty() {
        println!("No metrics recorded.");
        return Ok(());
    }
    for event in &events {
        let value: Value = serde_json::to_value(event)?;
        println!("{value}");
    }

    Ok(())
}
