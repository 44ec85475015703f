use clap::Parser;
use labelstore::cli::{AnnotationCommands, Cli, Commands, MetricsCommands, ProjectCommands, TaskCommands};
use labelstore::cli_handlers;
use labelstore::mcp::run_mcp_server;
use std::process;

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr; stdout carries command output and MCP frames
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();

    let result = match cli.command {
        Commands::Init => cli_handlers::handle_init(&settings),
        Commands::Status => cli_handlers::handle_status(&settings),
        Commands::Project(command) => match command {
            ProjectCommands::Add { id, name } => {
                cli_handlers::handle_project_add(&settings, id, &name)
            }
            ProjectCommands::List => cli_handlers::handle_project_list(&settings),
            ProjectCommands::Show { id } => cli_handlers::handle_project_show(&settings, id),
        },
        Commands::Task(command) => match command {
            TaskCommands::Add {
                id,
                name,
                project,
                status,
                assignee,
                qc,
            } => cli_handlers::handle_task_add(&settings, id, &name, project, status, assignee, qc),
            TaskCommands::List { project } => cli_handlers::handle_task_list(&settings, project),
            TaskCommands::Show { id } => cli_handlers::handle_task_show(&settings, id),
            TaskCommands::Assign(args) => cli_handlers::handle_task_assign(&settings, &args),
            TaskCommands::Status { id, status } => {
                cli_handlers::handle_task_status(&settings, id, status.as_deref())
            }
            TaskCommands::Qc { id, qc_status } => {
                cli_handlers::handle_task_qc(&settings, id, &qc_status)
            }
            TaskCommands::Retrieved { id } => cli_handlers::handle_task_retrieved(&settings, id),
        },
        Commands::Annotation(command) => match command {
            AnnotationCommands::Add {
                task,
                track,
                frame,
                bbox,
                outside,
                attrs,
            } => cli_handlers::handle_annotation_add(
                &settings,
                task,
                track,
                frame,
                bbox.as_deref(),
                outside,
                &attrs,
            ),
            AnnotationCommands::List { task, track } => {
                cli_handlers::handle_annotation_list(&settings, task, track)
            }
            AnnotationCommands::Import { file, task } => {
                cli_handlers::handle_annotation_import(&settings, &file, task)
            }
            AnnotationCommands::Check { task } => {
                cli_handlers::handle_annotation_check(&settings, task)
            }
        },
        Commands::Export { task, output } => {
            cli_handlers::handle_export(&settings, task, output.as_deref())
        }
        Commands::Metrics(command) => match command {
            MetricsCommands::Log {
                event,
                project,
                task,
                annotator,
                extra,
            } => cli_handlers::handle_metrics_log(
                &settings,
                &event,
                project,
                task,
                annotator.as_deref(),
                &extra,
            ),
            MetricsCommands::Show { project } => {
                cli_handlers::handle_metrics_show(&settings, project)
            }
        },
        Commands::Mcp => {
            if let Err(e) = run_mcp_server(&settings).await {
                eprintln!("MCP server error: {e}");
                process::exit(1);
            }
            return;
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
