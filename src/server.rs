//! HTTP surface for poster generation
//!
//! Routing is a pure function of method, path and body
//! ([`PosterService::handle`]), so every endpoint can be exercised without a
//! socket. [`serve`] puts it behind `tiny_http`, one thread per request.
//!
//! | route | purpose |
//! |---|---|
//! | `POST /api/generate-poster`, `POST /api/v2/generate` | render a poster |
//! | `GET /api/download/<id>`, `GET /api/v2/download/<id>` | persisted PNG |
//! | `GET /api/job/<id>`, `GET /api/v2/job/<id>` | job status |
//! | `GET /health` | liveness |

use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::job::{JobId, JobState, RenderJob, RenderResult};
use crate::pipeline::RenderPipeline;
use crate::poster::PosterConfig;
use crate::storage::OutputStore;
use crate::{Error, Launcher, Result};

/// Finished jobs kept for status queries
pub const DEFAULT_REGISTRY_CAPACITY: usize = 1024;

/// Largest accepted request body
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Transport-independent response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
    /// Headers beyond content type and CORS
    pub headers: Vec<(String, String)>,
}

impl ApiResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
                headers: Vec::new(),
            },
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                Self::error(500, "Failed to serialize response")
            }
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: json!({ "success": false, "error": message }).to_string().into_bytes(),
            headers: Vec::new(),
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            content_type: "text/plain",
            body: Vec::new(),
            headers: Vec::new(),
        }
    }

    /// Body parsed as JSON, for tests and diagnostics
    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Status of a submitted job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: JobId,
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    entries: HashMap<JobId, JobStatus>,
    finished: VecDeque<JobId>,
}

/// In-memory job status table. Finished entries beyond the capacity are
/// evicted oldest first; running jobs are never evicted.
#[derive(Debug)]
pub struct JobRegistry {
    capacity: usize,
    inner: Mutex<RegistryInner>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl JobRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start(&self, job: &RenderJob) {
        let status = JobStatus {
            job_id: job.id.clone(),
            status: JobState::Rendering,
            error: None,
            download_url: None,
        };
        self.lock().entries.insert(job.id.clone(), status);
    }

    pub fn finish(&self, job: &RenderJob) {
        let (error, download_url) = match job.result() {
            Some(result) => (result.error.clone(), result.download_url.clone()),
            None => (None, None),
        };
        let status = JobStatus {
            job_id: job.id.clone(),
            status: job.state,
            error,
            download_url,
        };

        let mut inner = self.lock();
        inner.entries.insert(job.id.clone(), status);
        inner.finished.push_back(job.id.clone());
        while inner.finished.len() > self.capacity {
            if let Some(oldest) = inner.finished.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: &JobId) -> Option<JobStatus> {
        self.lock().entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request handling for the poster API
pub struct PosterService<L> {
    pipeline: Arc<RenderPipeline<L>>,
    registry: JobRegistry,
}

impl<L: Launcher> PosterService<L> {
    pub fn new(pipeline: RenderPipeline<L>) -> Self {
        Self::from_shared(Arc::new(pipeline))
    }

    pub fn from_shared(pipeline: Arc<RenderPipeline<L>>) -> Self {
        Self {
            pipeline,
            registry: JobRegistry::default(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &RenderPipeline<L> {
        &self.pipeline
    }

    /// Route one request.
    pub fn handle(&self, method: &str, path: &str, body: &[u8]) -> ApiResponse {
        let path = path.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
        let path = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };

        if method.eq_ignore_ascii_case("OPTIONS") {
            return ApiResponse::no_content();
        }

        match (method, path) {
            ("GET", "/health") => self.health(),
            ("POST", "/api/generate-poster") => self.generate(body, false),
            ("POST", "/api/v2/generate") => self.generate(body, true),
            ("GET", p) => {
                if let Some(id) = strip_any(p, &["/api/download/", "/api/v2/download/"]) {
                    self.download(id)
                } else if let Some(id) = strip_any(p, &["/api/job/", "/api/v2/job/"]) {
                    self.status(id)
                } else {
                    ApiResponse::error(404, "Not found")
                }
            }
            _ => ApiResponse::error(404, "Not found"),
        }
    }

    fn health(&self) -> ApiResponse {
        let now = OffsetDateTime::now_utc();
        let timestamp = now
            .format(&Rfc3339)
            .unwrap_or_else(|_| now.unix_timestamp().to_string());
        ApiResponse::json(
            200,
            &json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": timestamp,
            }),
        )
    }

    fn generate(&self, body: &[u8], wrapped: bool) -> ApiResponse {
        let config = match parse_config(body, wrapped) {
            Ok(config) => config,
            Err(e) => {
                let id = JobId::generate();
                warn!("[{}] Rejected request: {}", id, e);
                return ApiResponse::json(400, &RenderResult::failure(id, &e));
            }
        };

        let mut job = RenderJob::new(config);
        self.registry.start(&job);
        self.pipeline.process(&mut job);
        self.registry.finish(&job);

        let result = job.into_result();
        let status = if result.success {
            200
        } else if result.rejected {
            400
        } else {
            500
        };
        ApiResponse::json(status, &result)
    }

    fn download(&self, id: &str) -> ApiResponse {
        let Some(id) = JobId::parse(id) else {
            return ApiResponse::error(404, "File not found");
        };
        match self.pipeline.store().load(&id) {
            Ok(Some(bytes)) => ApiResponse {
                status: 200,
                content_type: "image/png",
                body: bytes,
                headers: vec![(
                    "Content-Disposition".to_string(),
                    format!(
                        "attachment; filename=\"{}\"",
                        OutputStore::download_name(&id)
                    ),
                )],
            },
            Ok(None) => ApiResponse::error(404, "File not found"),
            Err(e) => {
                error!("[{}] Failed to read poster: {}", id, e);
                ApiResponse::error(500, "Failed to read poster")
            }
        }
    }

    fn status(&self, id: &str) -> ApiResponse {
        match JobId::parse(id).and_then(|id| self.registry.get(&id)) {
            Some(status) => ApiResponse::json(200, &status),
            None => ApiResponse::error(404, "Job not found"),
        }
    }
}

fn strip_any<'a>(path: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
}

/// Read a poster configuration from a request body. With `wrapped`, a body
/// of the form `{"config": {...}}` is unwrapped first.
fn parse_config(body: &[u8], wrapped: bool) -> Result<PosterConfig> {
    let mut value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::ConfigError(format!("Request body is not valid JSON: {}", e)))?;
    if wrapped {
        if let Some(inner) = value.get_mut("config").filter(|c| c.is_object()) {
            value = inner.take();
        }
    }
    PosterConfig::from_value(value)
}

/// Serve `service` on `addr` until the listener fails.
pub fn serve<L: Launcher + 'static>(
    service: Arc<PosterService<L>>,
    addr: &str,
    max_body_bytes: usize,
) -> Result<()> {
    let server = tiny_http::Server::http(addr)
        .map_err(|e| Error::ConfigError(format!("Failed to bind {}: {}", addr, e)))?;
    info!("Map poster service listening on http://{}", server.server_addr());

    for request in server.incoming_requests() {
        let service = Arc::clone(&service);
        let spawned = thread::Builder::new()
            .name("http-request".into())
            .spawn(move || respond(&service, request, max_body_bytes));
        if let Err(e) = spawned {
            error!("Failed to spawn request thread: {}", e);
        }
    }
    Ok(())
}

fn respond<L: Launcher>(
    service: &PosterService<L>,
    mut request: tiny_http::Request,
    max_body_bytes: usize,
) {
    let method = request.method().to_string();
    let path = request.url().to_string();
    info!("{} {}", method, path);

    let mut body = Vec::new();
    let read = request
        .as_reader()
        .take(max_body_bytes as u64 + 1)
        .read_to_end(&mut body);
    let response = match read {
        Err(e) => ApiResponse::error(400, &format!("Failed to read request body: {}", e)),
        Ok(_) if body.len() > max_body_bytes => {
            ApiResponse::error(413, "Request body too large")
        }
        Ok(_) => service.handle(&method, &path, &body),
    };
    info!("{} {} -> {}", method, path, response.status);

    let mut http = tiny_http::Response::from_data(response.body)
        .with_status_code(response.status);
    let headers = [
        ("Content-Type".to_string(), response.content_type.to_string()),
        ("Access-Control-Allow-Origin".to_string(), "*".to_string()),
        (
            "Access-Control-Allow-Methods".to_string(),
            "GET, POST, OPTIONS".to_string(),
        ),
        (
            "Access-Control-Allow-Headers".to_string(),
            "Content-Type".to_string(),
        ),
    ];
    for (name, value) in headers.into_iter().chain(response.headers) {
        match tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            Ok(header) => http.add_header(header),
            Err(()) => warn!("Dropping invalid header {}", name),
        }
    }

    if let Err(e) = request.respond(http) {
        warn!("Failed to send response for {} {}: {}", method, path, e);
    }
}
