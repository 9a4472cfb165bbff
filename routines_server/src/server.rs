//! HTTP surface for running routines.
//!
//! | Route | Method | Purpose |
//! |-------|--------|---------|
//! | `/routines?action=..&args=..` | GET, POST | Runs a task and streams its output as `text/plain` |
//! | `/` | GET | HTML index of every task with a link that runs it |
//! | `/tasks` | GET | The same listing as JSON |
//! | `/health` | GET | Liveness plus the number of runs in flight |
//!
//! Each run executes on tokio's blocking pool. Its [`Stream`](crate::stream::Stream)
//! feeds a bounded channel that becomes the response body, so a slow client
//! slows the routine down instead of growing a buffer.

use crate::args::{ARGS_KEY, RequestParams};
use crate::config::{ConfigFile, RoutineSettings};
use crate::error::{Result, ServerError};
use crate::guard::ExecutionGuard;
use crate::limits::{AmbientLimits, MemoryLimit, MemoryProbe, ProcessMemory};
use crate::registry::{Task, TaskRegistry};
use crate::stream::Sink;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{RawQuery, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::StreamExt;
use serde::Serialize;
use serde_json::json;
use std::{collections::HashMap, convert::Infallible, net::SocketAddr, sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use url::form_urlencoded;
use uuid::Uuid;

/// Configuration for the routines server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind. Port 0 picks a free port.
    pub bind_addr: SocketAddr,

    /// Chunks a run may queue before its sends block on the client.
    pub channel_capacity: usize,

    /// Execution-time ceiling a run inherits before raising it. 0 is unlimited.
    pub ambient_exec_time_secs: u64,

    /// Memory ceiling a run inherits before raising it.
    pub ambient_memory_limit: MemoryLimit,

    /// Global overrides applied on top of [`RoutineSettings::BUILT_IN`].
    pub defaults: RoutineSettings,

    /// Per-action overrides, applied last.
    pub actions: HashMap<String, RoutineSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            channel_capacity: 64,
            ambient_exec_time_secs: AmbientLimits::DEFAULT_EXEC_TIME_SECS,
            ambient_memory_limit: AmbientLimits::DEFAULT_MEMORY_LIMIT,
            defaults: RoutineSettings::default(),
            actions: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Takes every value the file sets. Settings tables merge over what is
    /// already configured.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(addr) = file.bind_addr {
            self.bind_addr = addr;
        }
        if let Some(capacity) = file.channel_capacity {
            self.channel_capacity = capacity;
        }
        if let Some(secs) = file.ambient.exec_time_secs {
            self.ambient_exec_time_secs = secs;
        }
        if let Some(limit) = file.ambient.memory_limit {
            self.ambient_memory_limit = limit;
        }
        self.defaults = self.defaults.merge(file.defaults);
        for (action, settings) in &file.actions {
            let entry = self.actions.entry(action.clone()).or_default();
            *entry = entry.merge(*settings);
        }
    }

    /// The override chain for `task`: built-in defaults, global defaults, the
    /// task's registered settings, then the per-action entry.
    pub fn settings_for(&self, task: &Task) -> RoutineSettings {
        let action = self.actions.get(task.action()).copied().unwrap_or_default();
        RoutineSettings::BUILT_IN
            .merge(self.defaults)
            .merge(task.registered_settings())
            .merge(action)
    }

    /// Fresh ambient limits for one run.
    pub fn ambient(&self) -> AmbientLimits {
        AmbientLimits::new(self.ambient_exec_time_secs, self.ambient_memory_limit)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunInfo {
    pub action: String,
    pub started_at: DateTime<Utc>,
}

/// Runs currently executing, keyed by run id.
///
/// Used for logging and `/health`. Nothing here can cancel a run.
#[derive(Debug, Default)]
pub struct RunTracker {
    runs: DashMap<String, RunInfo>,
}

impl RunTracker {
    /// Records a new run and returns its id (UUID v4).
    pub fn begin(&self, action: &str) -> String {
        let run_id = Uuid::new_v4().to_string();
        self.runs.insert(
            run_id.clone(),
            RunInfo {
                action: action.to_string(),
                started_at: Utc::now(),
            },
        );
        run_id
    }

    pub fn finish(&self, run_id: &str) -> Option<RunInfo> {
        self.runs.remove(run_id).map(|(_, info)| info)
    }

    pub fn in_flight(&self) -> usize {
        self.runs.len()
    }

    pub fn get(&self, run_id: &str) -> Option<RunInfo> {
        self.runs.get(run_id).map(|entry| entry.value().clone())
    }
}

struct AppState {
    registry: Arc<TaskRegistry>,
    config: ServerConfig,
    runs: Arc<RunTracker>,
    probe: Arc<dyn MemoryProbe>,
}

/// A configured server, ready to be turned into a router or served.
pub struct RoutinesServer {
    state: Arc<AppState>,
}

impl RoutinesServer {
    pub fn new(config: ServerConfig, registry: Arc<TaskRegistry>) -> Self {
        Self::with_probe(config, registry, Arc::new(ProcessMemory))
    }

    pub fn with_probe(
        config: ServerConfig,
        registry: Arc<TaskRegistry>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            state: Arc::new(AppState {
                registry,
                config,
                runs: Arc::new(RunTracker::default()),
                probe,
            }),
        }
    }

    pub fn runs(&self) -> Arc<RunTracker> {
        self.state.runs.clone()
    }

    pub fn router(&self) -> Router {
        let cors = build_cors_layer(&self.state.config.bind_addr);
        Router::new()
            .route("/", get(index))
            .route("/health", get(health_check))
            .route("/tasks", get(list_tasks))
            .route("/routines", get(run_routine).post(run_routine))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Binds and serves until Ctrl-C.
    ///
    /// The bound port is printed to stderr as `ROUTINES_BOUND_PORT=<port>`.
    pub async fn serve(self) -> Result<()> {
        let bind_addr = self.state.config.bind_addr;
        if !bind_addr.ip().is_loopback() {
            warn!(
                "Routines server bound to non-loopback address {}. \
                 Anyone who can reach it can run every registered task.",
                bind_addr
            );
        }

        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| ServerError::HttpServer(format!("Failed to bind: {}", e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::HttpServer(format!("Failed to get local addr: {}", e)))?;

        info!(
            tasks = self.state.registry.len(),
            "Routines server listening on http://{}", local_addr
        );
        eprintln!("ROUTINES_BOUND_PORT={}", local_addr.port());

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| ServerError::HttpServer(format!("Server error: {}", e)))?;

        info!("Routines server stopped");
        Ok(())
    }
}

/// Serves `registry` with `config` until Ctrl-C.
pub async fn start_server(config: ServerConfig, registry: Arc<TaskRegistry>) -> Result<()> {
    RoutinesServer::new(config, registry).serve().await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C, shut down by killing the process: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Loopback binds only accept pages served from loopback origins. Other binds
/// accept any origin.
fn build_cors_layer(bind_addr: &SocketAddr) -> CorsLayer {
    let methods = AllowMethods::list([Method::GET, Method::POST, Method::OPTIONS]);
    let headers = AllowHeaders::list([header::CONTENT_TYPE, header::ACCEPT]);

    if bind_addr.ip().is_loopback() {
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                |origin: &HeaderValue, _req: &axum::http::request::Parts| {
                    let Ok(origin_str) = origin.to_str() else {
                        return false;
                    };
                    let lower = origin_str.to_ascii_lowercase();
                    lower.starts_with("http://127.0.0.1")
                        || lower.starts_with("http://localhost")
                        || lower.starts_with("http://[::1]")
                },
            ))
            .allow_methods(methods)
            .allow_headers(headers)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods(methods)
            .allow_headers(headers)
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "in_flight": state.runs.in_flight(),
    }))
}

async fn list_tasks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.registry.listing())
}

/// Streams one run of the requested task.
///
/// - 400 if `action` is missing
/// - 404 if no task has that action
/// - 200 otherwise, even if the task later fails: by then the status line has
///   been sent and the failure only shows as the stream ending early.
async fn run_routine(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Response {
    let started_at = Instant::now();
    let form = if method == Method::POST && is_form(&headers) {
        body
    } else {
        Bytes::new()
    };
    let params = RequestParams::parse(query.as_deref(), &form);

    let Some(action) = params.action().map(str::to_string) else {
        debug!("Routine request without action");
        return (StatusCode::BAD_REQUEST, "Missing action parameter").into_response();
    };
    let Some(task) = state.registry.get(&action).cloned() else {
        debug!(action = %action, "Unknown action requested");
        return (StatusCode::NOT_FOUND, format!("Unknown action: {action}")).into_response();
    };

    let run_id = state.runs.begin(&action);
    info!(action = %action, run_id = %run_id, "Routine started");

    let settings = state.config.settings_for(&task);
    let guard = ExecutionGuard::new(task, settings)
        .with_ambient(Arc::new(state.config.ambient()))
        .with_probe(state.probe.clone())
        .with_start_time(started_at)
        .with_run_id(run_id.clone());

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.channel_capacity.max(1));
    let handle = tokio::task::spawn_blocking(move || guard.run(&params, Sink::Response(tx)));

    let runs = state.runs.clone();
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => info!(action = %action, run_id = %run_id, "Routine finished"),
            Ok(Err(e)) => error!(action = %action, run_id = %run_id, "{:#}", e),
            Err(e) => error!(action = %action, run_id = %run_id, "Routine panicked: {}", e),
        }
        runs.finish(&run_id);
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        body,
    )
        .into_response()
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

/// Lists every group and task. A page URL value keyed by an action, as in
/// `/?demo_echo=[3]`, becomes that task's run `args` and is shown next to its
/// link.
async fn index(State(state): State<Arc<AppState>>, RawQuery(query): RawQuery) -> Html<String> {
    let params = RequestParams::parse(query.as_deref(), b"");
    Html(render_index(&state.registry, &params))
}

fn render_index(registry: &TaskRegistry, params: &RequestParams) -> String {
    let mut html = String::from(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>Routines</title></head>\n\
         <body>\n<h1>Routines</h1>\n",
    );

    let listing = registry.listing();
    if listing.is_empty() {
        html.push_str("<p>No routines are registered.</p>\n");
    }
    for group in listing {
        html.push_str(&format!("<section>\n<h2>{}</h2>\n<ul>\n", escape_html(&group.name)));
        for task in group.tasks {
            let mut link = form_urlencoded::Serializer::new(String::new());
            link.append_pair("action", &task.action);
            let args = params.values(&task.action).first().copied();
            if let Some(args) = args {
                link.append_pair(ARGS_KEY, args);
            }
            let hint = args
                .map(|args| format!(" ( {} )", escape_html(args)))
                .unwrap_or_default();
            html.push_str(&format!(
                "<li><a href=\"/routines?{}\">{}</a>{}</li>\n",
                escape_html(&link.finish()),
                escape_html(&task.title),
                hint
            ));
        }
        html.push_str("</ul>\n</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
