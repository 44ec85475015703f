use crate::assignment;
use crate::attributes::Attributes;
use crate::config::Settings;
use crate::core::AnnotationStore;
use crate::error::{Result as StoreResult, StoreError};
use crate::metrics::{self, MetricEvent, MetricsLog};
use crate::models::{NewAnnotation, NewProject, NewTask, Task};
use rmcp::{
    ErrorData as McpError, ServerHandler, ServiceExt, handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters, model::*, schemars, tool, tool_handler, tool_router,
    transport::stdio,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Annotation store MCP server
#[derive(Clone)]
pub struct LabelStoreMcp {
    store: Arc<Mutex<AnnotationStore>>,
    metrics: Arc<Mutex<MetricsLog>>,
    tool_router: ToolRouter<Self>,
}

// Input types for tools
#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CreateProjectInput {
    pub project_id: i64,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ListTasksInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct TaskIdInput {
    pub task_id: i64,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CreateTaskInput {
    pub task_id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qc_status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct AssignTaskInput {
    pub task_id: i64,
    /// Annotator to assign. Omit together with `pool` to clear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Pick one annotator at random from this list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct SetQcStatusInput {
    pub task_id: i64,
    pub qc_status: String,
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RecordAnnotationInput {
    pub task_id: i64,
    pub track_id: i64,
    pub frame: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xtl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ytl: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xbr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ybr: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outside: Option<bool>,
    /// JSON object of strings, numbers, booleans, nulls or nested objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<serde_json::Value>,
}

impl RecordAnnotationInput {
    fn into_new_annotation(self) -> StoreResult<NewAnnotation> {
        let attributes = match self.attributes {
            Some(value) => Some(
                serde_json::from_value::<Attributes>(value)
                    .map_err(|e| StoreError::InvalidAttribute(e.to_string()))?,
            ),
            None => None,
        };
        Ok(NewAnnotation {
            task_id: Some(self.task_id),
            track_id: self.track_id,
            frame: self.frame,
            xtl: self.xtl,
            ytl: self.ytl,
            xbr: self.xbr,
            ybr: self.ybr,
            outside: self.outside,
            attributes,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ListAnnotationsInput {
    pub task_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

// Response type
#[derive(Debug, Serialize)]
pub struct McpResponse<T: Serialize> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> McpResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            status: "ok",
            data: Some(data),
            error_code: None,
            message: None,
        }
    }

    pub fn error(error_code: &str, message: &str) -> Self {
        Self {
            status: "error",
            data: None,
            error_code: Some(error_code.to_string()),
            message: Some(message.to_string()),
        }
    }
}

fn response_json<T: Serialize>(result: StoreResult<T>) -> Result<String, McpError> {
    let json = match result {
        Ok(data) => serde_json::to_string(&McpResponse::success(data)),
        Err(e) => serde_json::to_string(&McpResponse::<()>::error(e.error_code(), &e.to_string())),
    };
    json.map_err(|e| McpError::internal_error(e.to_string(), None))
}

fn respond<T: Serialize>(result: StoreResult<T>) -> Result<CallToolResult, McpError> {
    let json = response_json(result)?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn pick_assignee(assignee: Option<String>, pool: Option<Vec<String>>) -> StoreResult<Option<String>> {
    match (assignee, pool) {
        (Some(_), Some(_)) => Err(StoreError::InvalidInput(
            "give either assignee or pool, not both".to_string(),
        )),
        (Some(name), None) => Ok(Some(name)),
        (None, Some(pool)) => {
            let picked = assignment::select_annotators(&pool, 1, &mut rand::rng())?;
            Ok(picked.into_iter().next())
        }
        (None, None) => Ok(None),
    }
}

#[tool_router]
impl LabelStoreMcp {
    pub fn new(settings: &Settings) -> StoreResult<Self> {
        let store = AnnotationStore::open(&settings.db_path)?;
        Ok(Self::from_parts(store, MetricsLog::new(&settings.metrics_dir)))
    }

    pub fn from_parts(store: AnnotationStore, metrics: MetricsLog) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            metrics: Arc::new(Mutex::new(metrics)),
            tool_router: Self::tool_router(),
        }
    }

    async fn record_metric(&self, event: MetricEvent) {
        let mut log = self.metrics.lock().await;
        if let Err(e) = log.record(&event) {
            warn!(event_type = %event.event_type, error = %e, "failed to write metric");
        }
    }

    #[tool(description = "List all projects ordered by id.")]
    async fn list_projects(&self) -> Result<CallToolResult, McpError> {
        let store = self.store.lock().await;
        respond(store.list_projects())
    }

    #[tool(
        description = "Create a project with an externally assigned id. created_at is set to now."
    )]
    async fn create_project(
        &self,
        params: Parameters<CreateProjectInput>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.store.lock().await;
        let p = params.0;
        respond(store.create_project(NewProject::new(p.project_id, p.name)))
    }

    #[tool(description = "List tasks, optionally only those of one project.")]
    async fn list_tasks(
        &self,
        params: Parameters<ListTasksInput>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.store.lock().await;
        respond(store.list_tasks(params.0.project_id))
    }

    #[tool(description = "Get one task including status, assignee and QC status.")]
    async fn get_task(&self, params: Parameters<TaskIdInput>) -> Result<CallToolResult, McpError> {
        let store = self.store.lock().await;
        respond(store.get_task(params.0.task_id))
    }

    #[tool(
        description = "Create a task with an externally assigned id. qc_status defaults to 'pending'. project_id must name an existing project."
    )]
    async fn create_task(
        &self,
        params: Parameters<CreateTaskInput>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.store.lock().await;
        let p = params.0;

        respond(store.create_task(NewTask {
            task_id: p.task_id,
            project_id: p.project_id,
            name: p.name,
            status: p.status,
            assignee: p.assignee,
            retrieved_at: None,
            qc_status: p.qc_status,
        }))
    }

    #[tool(
        description = "Assign a task to an annotator, or pick one at random from a pool. Provide neither to clear the assignee."
    )]
    async fn assign_task(
        &self,
        params: Parameters<AssignTaskInput>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let assignee = match pick_assignee(p.assignee, p.pool) {
            Ok(assignee) => assignee,
            Err(e) => return respond::<Task>(Err(e)),
        };

        let result = {
            let store = self.store.lock().await;
            store.assign_task(p.task_id, assignee.as_deref())
        };
        if let Ok(task) = &result {
            if let Some(name) = &task.assignee {
                self.record_metric(
                    MetricEvent::new(metrics::TASK_ASSIGNED)
                        .project(task.project_id)
                        .task(task.task_id)
                        .annotator(name.as_str()),
                )
                .await;
            }
        }
        respond(result)
    }

    #[tool(description = "Set a task's QC status, e.g. 'approved' or 'rejected'.")]
    async fn set_qc_status(
        &self,
        params: Parameters<SetQcStatusInput>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let result = {
            let store = self.store.lock().await;
            store.set_qc_status(p.task_id, &p.qc_status)
        };
        if let Ok(task) = &result {
            self.record_metric(
                MetricEvent::new(metrics::QC_UPDATED)
                    .project(task.project_id)
                    .task(task.task_id)
                    .extra("qc_status", p.qc_status.as_str()),
            )
            .await;
        }
        respond(result)
    }

    #[tool(
        description = "Record one bounding box of a track on a frame. The task must exist. Returns the stored annotation with its generated annotation_id."
    )]
    async fn record_annotation(
        &self,
        params: Parameters<RecordAnnotationInput>,
    ) -> Result<CallToolResult, McpError> {
        let new = match params.0.into_new_annotation() {
            Ok(new) => new,
            Err(e) => return respond::<()>(Err(e)),
        };
        let store = self.store.lock().await;
        respond(store.add_annotation(new))
    }

    #[tool(
        description = "List a task's annotations ordered by track, frame and id. Optionally filter to one track."
    )]
    async fn list_annotations(
        &self,
        params: Parameters<ListAnnotationsInput>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.store.lock().await;
        respond(store.list_annotations(params.0.task_id, params.0.track_id))
    }

    #[tool(
        description = "Get a task with its annotations grouped into tracks, plus any (track_id, frame) pairs recorded more than once."
    )]
    async fn get_tracks(
        &self,
        params: Parameters<TaskIdInput>,
    ) -> Result<CallToolResult, McpError> {
        let store = self.store.lock().await;
        let task_id = params.0.task_id;

        let result = store.task_tracks(task_id).and_then(|task_tracks| {
            let duplicates = store.duplicate_keys(task_id)?;
            Ok(serde_json::json!({
                "task": task_tracks.task,
                "tracks": task_tracks.tracks,
                "duplicates": duplicates,
            }))
        });
        respond(result)
    }

    #[tool(description = "Report schema version, applied migrations and row counts.")]
    async fn schema_status(&self) -> Result<CallToolResult, McpError> {
        let store = self.store.lock().await;
        respond(store.status())
    }
}

#[tool_handler]
impl ServerHandler for LabelStoreMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Labelstore - projects own tasks, tasks own per-frame bounding-box annotations grouped into tracks. \
                 Ids of projects and tasks are assigned by the caller; annotation ids are generated. \
                 Call schema_status first: if version is 0 the store must be initialized with `labelstore init`.".to_string()
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub async fn run_mcp_server(settings: &Settings) -> StoreResult<()> {
    let mcp = LabelStoreMcp::new(settings).inspect_err(|e| {
        error!(error = %e, "failed to initialize MCP server");
    })?;

    info!(db = %settings.db_path.display(), "starting MCP server on stdio");
    let service = mcp
        .serve(stdio())
        .await
        .map_err(|e| StoreError::Mcp(e.to_string()))?;

    service
        .waiting()
        .await
        .map_err(|e| StoreError::Mcp(e.to_string()))?;
    Ok(())
}
