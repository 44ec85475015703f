use crate::config::{DB_ENV, DEFAULT_DB_FILE, DEFAULT_METRICS_DIR, METRICS_DIR_ENV, Settings};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "labelstore")]
#[command(about = "Annotation store for tracked bounding-box labeling")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = DB_ENV, default_value = DEFAULT_DB_FILE)]
    pub db: PathBuf,

    /// Directory for per-project metrics files
    #[arg(long, global = true, env = METRICS_DIR_ENV, default_value = DEFAULT_METRICS_DIR)]
    pub metrics_dir: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn settings(&self) -> Settings {
        Settings::new(self.db.clone(), self.metrics_dir.clone())
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or upgrade the schema (safe to re-run)
    Init,

    /// Show schema version, applied migrations and row counts
    Status,

    /// Manage projects
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommands),

    /// Record and inspect annotations
    #[command(subcommand)]
    Annotation(AnnotationCommands),

    /// Export a task and its tracks as JSON
    Export {
        /// Task ID
        task: i64,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Pipeline metrics log
    #[command(subcommand)]
    Metrics(MetricsCommands),

    /// Start MCP server
    Mcp,
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// Add a project
    Add {
        /// Project ID (externally assigned)
        id: i64,
        /// Project name
        name: String,
    },

    /// List projects
    List,

    /// Show a project and its tasks
    Show {
        /// Project ID
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Add a task
    Add {
        /// Task ID (externally assigned)
        id: i64,
        /// Task name
        name: String,
        /// Owning project ID
        #[arg(long)]
        project: Option<i64>,
        /// Initial workflow status
        #[arg(long)]
        status: Option<String>,
        /// Initial assignee
        #[arg(long)]
        assignee: Option<String>,
        /// QC status (defaults to "pending")
        #[arg(long)]
        qc: Option<String>,
    },

    /// List tasks
    List {
        /// Only tasks of this project
        #[arg(long)]
        project: Option<i64>,
    },

    /// Show task details
    Show {
        /// Task ID
        id: i64,
    },

    /// Set the assignee, pick one from a pool, or clear it
    Assign(AssignArgs),

    /// Set or clear the workflow status
    Status {
        /// Task ID
        id: i64,
        /// New status (omit to clear)
        status: Option<String>,
    },

    /// Set the QC status
    Qc {
        /// Task ID
        id: i64,
        /// New QC status (e.g. "approved", "rejected")
        qc_status: String,
    },

    /// Mark the task's results as retrieved now
    Retrieved {
        /// Task ID
        id: i64,
    },
}

/// Exactly one of `assignee`, `--pool` or `--clear` is expected.
#[derive(Args)]
pub struct AssignArgs {
    /// Task ID
    pub id: i64,
    /// Annotator name
    pub assignee: Option<String>,
    /// Comma separated annotators to pick one from at random
    #[arg(long, conflicts_with = "assignee")]
    pub pool: Option<String>,
    /// Remove the current assignee
    #[arg(long, conflicts_with_all = ["assignee", "pool"])]
    pub clear: bool,
}

#[derive(Subcommand)]
pub enum AnnotationCommands {
    /// Add one annotation
    Add {
        /// Task ID
        #[arg(long)]
        task: i64,
        /// Track ID
        #[arg(long)]
        track: i64,
        /// Frame index
        #[arg(long)]
        frame: i64,
        /// Bounding box as xtl,ytl,xbr,ybr
        #[arg(long = "box", value_name = "XTL,YTL,XBR,YBR")]
        bbox: Option<String>,
        /// Object is outside the frame
        #[arg(long)]
        outside: bool,
        /// Attribute as key=value (repeatable)
        #[arg(long = "attr", value_name = "KEY=VALUE")]
        attrs: Vec<String>,
    },

    /// List a task's annotations
    List {
        /// Task ID
        task: i64,
        /// Only this track
        #[arg(long)]
        track: Option<i64>,
    },

    /// Import a JSON array of annotations in one transaction
    Import {
        /// Path to the JSON file
        file: PathBuf,
        /// Task ID for rows that do not name one
        #[arg(long)]
        task: Option<i64>,
    },

    /// Summarize tracks and report duplicate (track, frame) pairs
    Check {
        /// Task ID
        task: i64,
    },
}

#[derive(Subcommand)]
pub enum MetricsCommands {
    /// Append a metric event
    Log {
        /// Event type (e.g. "ingest_time")
        event: String,
        /// Project ID
        #[arg(long)]
        project: Option<i64>,
        /// Task ID
        #[arg(long)]
        task: Option<i64>,
        /// Annotator name
        #[arg(long)]
        annotator: Option<String>,
        /// Extra field as key=value (repeatable)
        #[arg(long = "extra", value_name = "KEY=VALUE")]
        extra: Vec<String>,
    },

    /// Print recorded events
    Show {
        /// Only this project
        #[arg(long)]
        project: Option<i64>,
    },
}
