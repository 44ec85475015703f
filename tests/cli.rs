use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn labelstore(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("labelstore").unwrap();
    cmd.current_dir(dir)
        .env_remove("LABELSTORE_DB")
        .env_remove("LABELSTORE_METRICS_DIR")
        .env_remove("RUST_LOG");
    cmd
}

fn init(dir: &TempDir) {
    labelstore(dir).arg("init").assert().success();
}

fn seed(dir: &TempDir) {
    init(dir);
    labelstore(dir)
        .args(["project", "add", "1", "Demo"])
        .assert()
        .success();
    labelstore(dir)
        .args(["task", "add", "10", "Label cars", "--project", "1"])
        .assert()
        .success();
}

#[test]
fn test_init_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();

    labelstore(&temp_dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized store"))
        .stdout(predicate::str::contains("Schema version: 2"));
    assert!(temp_dir.path().join("labelstore.db").exists());

    labelstore(&temp_dir)
        .args(["project", "add", "1", "Demo"])
        .assert()
        .success();

    labelstore(&temp_dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("up to date"));

    labelstore(&temp_dir)
        .args(["project", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Demo"));
}

#[test]
fn test_requires_init() {
    let temp_dir = TempDir::new().unwrap();

    labelstore(&temp_dir)
        .args(["project", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));

    labelstore(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Not initialized"));
}

#[test]
fn test_db_flag_and_env() {
    let temp_dir = TempDir::new().unwrap();

    labelstore(&temp_dir)
        .args(["--db", "custom.db", "init"])
        .assert()
        .success();
    assert!(temp_dir.path().join("custom.db").exists());

    labelstore(&temp_dir)
        .env("LABELSTORE_DB", "custom.db")
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("version 2"));
}

#[test]
fn test_task_defaults_and_foreign_keys() {
    let temp_dir = TempDir::new().unwrap();
    init(&temp_dir);

    labelstore(&temp_dir)
        .args(["project", "add", "1", "Demo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created project #1: Demo"));

    labelstore(&temp_dir)
        .args(["task", "add", "10", "Label cars", "--project", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("QC status: pending"));

    labelstore(&temp_dir)
        .args(["task", "add", "11", "Orphan", "--project", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("foreign key constraint violated"));

    labelstore(&temp_dir)
        .args(["task", "add", "10", "Again"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("primary key constraint violated"));

    labelstore(&temp_dir)
        .args(["annotation", "add", "--task", "404", "--track", "1", "--frame", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("foreign key"));
}

#[test]
fn test_task_workflow() {
    let temp_dir = TempDir::new().unwrap();
    seed(&temp_dir);

    labelstore(&temp_dir)
        .args(["task", "assign", "10", "user1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assigned task #10 to user1"));

    labelstore(&temp_dir)
        .args(["task", "status", "10", "annotation"])
        .assert()
        .success();

    labelstore(&temp_dir)
        .args(["task", "qc", "10", "approved"])
        .assert()
        .success();

    labelstore(&temp_dir)
        .args(["task", "retrieved", "10"])
        .assert()
        .success();

    labelstore(&temp_dir)
        .args(["task", "show", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assignee:     user1"))
        .stdout(predicate::str::contains("Status:       annotation"))
        .stdout(predicate::str::contains("QC status:    approved"))
        .stdout(predicate::str::contains("Retrieved:    (never)").not());

    labelstore(&temp_dir)
        .args(["task", "assign", "10", "--clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared assignee"));

    labelstore(&temp_dir)
        .args(["task", "assign", "10"])
        .assert()
        .failure();

    labelstore(&temp_dir)
        .args(["task", "qc", "77", "approved"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Task #77 not found"));
}

#[test]
fn test_assign_from_pool_logs_metric() {
    let temp_dir = TempDir::new().unwrap();
    seed(&temp_dir);

    labelstore(&temp_dir)
        .args(["task", "assign", "10", "--pool", "ann1,ann2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Assigned task #10 to ann"));

    let metrics = fs::read_to_string(temp_dir.path().join("data/metrics/1_metrics.jsonl")).unwrap();
    assert!(metrics.contains("\"event_type\":\"task_assigned\""));
    assert!(metrics.contains("\"task_id\":10"));

    labelstore(&temp_dir)
        .args(["metrics", "show", "--project", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("task_assigned"));
}

#[test]
fn test_annotations_and_export() {
    let temp_dir = TempDir::new().unwrap();
    seed(&temp_dir);

    labelstore(&temp_dir)
        .args([
            "annotation", "add", "--task", "10", "--track", "1", "--frame", "0", "--box",
            "0,0,10,10", "--attr", "walking_behavior=normal_walk",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created annotation #1"));

    labelstore(&temp_dir)
        .args([
            "annotation", "add", "--task", "10", "--track", "1", "--frame", "1", "--outside",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created annotation #2"));

    labelstore(&temp_dir)
        .args(["annotation", "list", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("walking_behavior=normal_walk"))
        .stdout(predicate::str::contains("outside"));

    labelstore(&temp_dir)
        .args(["export", "10", "--output", "task10.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 annotations in 1 tracks"));

    let exported: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(temp_dir.path().join("task10.json")).unwrap())
            .unwrap();
    assert_eq!(exported["task"]["qc_status"], "pending");
    let rows = exported["tracks"][0]["annotations"].as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["xbr"], 10.0);
    assert_eq!(rows[0]["outside"], false);
    assert_eq!(rows[1]["outside"], true);
    assert_eq!(rows[0]["attributes"]["walking_behavior"], "normal_walk");

    let metrics = fs::read_to_string(temp_dir.path().join("data/metrics/1_metrics.jsonl")).unwrap();
    assert!(metrics.contains("export_time"));
}

#[test]
fn test_import_is_all_or_nothing() {
    let temp_dir = TempDir::new().unwrap();
    seed(&temp_dir);

    fs::write(
        temp_dir.path().join("bad.json"),
        r#"[{"task_id": 10, "track_id": 1, "frame": 0}, {"task_id": 99, "track_id": 1, "frame": 1}]"#,
    )
    .unwrap();
    labelstore(&temp_dir)
        .args(["annotation", "import", "bad.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("foreign key"));

    labelstore(&temp_dir)
        .args(["annotation", "list", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No annotations found."));

    fs::write(
        temp_dir.path().join("good.json"),
        r#"[{"track_id": 1, "frame": 0}, {"track_id": 1, "frame": 0}, {"track_id": 2, "frame": 5}]"#,
    )
    .unwrap();
    labelstore(&temp_dir)
        .args(["annotation", "import", "good.json", "--task", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 3 annotations"));

    labelstore(&temp_dir)
        .args(["annotation", "check", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 tracks"))
        .stdout(predicate::str::contains("track 1 frame 0: #1, #2"));
}

#[test]
fn test_metrics_log_and_show() {
    let temp_dir = TempDir::new().unwrap();

    labelstore(&temp_dir)
        .args([
            "metrics", "log", "ingest_time", "--project", "3", "--extra", "files=2", "--extra",
            "ratio=0.5",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged ingest_time"));

    labelstore(&temp_dir)
        .args(["metrics", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"project_id\":3"))
        .stdout(predicate::str::contains("\"files\":2"))
        .stdout(predicate::str::contains("\"files\":2.0").not())
        .stdout(predicate::str::contains("\"ratio\":0.5"));
}

#[test]
fn test_import_with_unknown_task_inserts_nothing() {
    let temp_dir = TempDir::new().unwrap();
    seed(&temp_dir);

    fs::write(
        temp_dir.path().join("rows.json"),
        r#"[{"task_id": 10, "track_id": 1, "frame": 0}]"#,
    )
    .unwrap();
    labelstore(&temp_dir)
        .args(["annotation", "import", "rows.json", "--task", "99"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Imported").not())
        .stderr(predicate::str::contains("Task #99 not found"));

    labelstore(&temp_dir)
        .args(["annotation", "list", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No annotations found."));
}

#[test]
fn test_non_finite_box_rejected() {
    let temp_dir = TempDir::new().unwrap();
    seed(&temp_dir);

    labelstore(&temp_dir)
        .args([
            "annotation", "add", "--task", "10", "--track", "1", "--frame", "0", "--box",
            "NaN,0,1,1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bad box"));
}
