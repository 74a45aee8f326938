//! HTTP routing tests (no sockets) plus one round trip through tiny_http

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Once};
use std::time::Duration;

use mapposter::scripted::{ScriptedBehaviour, ScriptedLauncher};
use mapposter::server::{self, PosterService};
use mapposter::{CapabilityProfile, OutputStore, ReadinessTimings, RenderOptions, RenderPipeline};
use serde_json::Value;
use url::Url;

const POSTER: &str = r#"{"print":{"width":2.54,"height":2.54,"dpi":64},"maps":[{"center":[2.35,48.85],"zoom":13}]}"#;

fn service(behaviour: ScriptedBehaviour, dir: &std::path::Path) -> PosterService<ScriptedLauncher> {
    let mut options = RenderOptions::new(
        Url::parse("http://renderer.test/").unwrap(),
        CapabilityProfile::Software,
    );
    options.timings = ReadinessTimings {
        initial_settle: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        ready_timeout: Duration::from_millis(20),
        tile_settle: Duration::ZERO,
        final_settle: Duration::ZERO,
    };
    PosterService::new(RenderPipeline::new(
        ScriptedLauncher::new(behaviour),
        OutputStore::new(dir),
        options,
    ))
}

fn body(response: &mapposter::server::ApiResponse) -> Value {
    response.json_body().expect("JSON body")
}

#[test]
fn generate_then_download_and_status() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(ScriptedBehaviour::ready(), tmp.path());

    let response = service.handle("POST", "/api/generate-poster", POSTER.as_bytes());
    assert_eq!(response.status, 200);
    let envelope = body(&response);
    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["metadata"]["width"], 64);
    assert_eq!(envelope["metadata"]["height"], 64);
    assert_eq!(envelope["metadata"]["degraded"], false);
    assert!(envelope["metadata"]["sizeInMB"].is_string());
    let job_id = envelope["jobId"].as_str().unwrap().to_string();
    let download_url = envelope["downloadUrl"].as_str().unwrap().to_string();
    assert_eq!(download_url, format!("/api/download/{}", job_id));

    let download = service.handle("GET", &download_url, b"");
    assert_eq!(download.status, 200);
    assert_eq!(download.content_type, "image/png");
    assert_eq!(&download.body[..4], b"\x89PNG");
    assert_eq!(
        download.headers,
        vec![(
            "Content-Disposition".to_string(),
            format!("attachment; filename=\"map-poster-{}.png\"", job_id)
        )]
    );

    let v2 = service.handle("GET", &format!("/api/v2/download/{}", job_id), b"");
    assert_eq!(v2.body, download.body);

    let status = service.handle("GET", &format!("/api/job/{}?verbose=1", job_id), b"");
    assert_eq!(status.status, 200);
    assert_eq!(body(&status)["status"], "delivered");
}

#[test]
fn v2_accepts_wrapped_config() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(ScriptedBehaviour::ready(), tmp.path());

    let wrapped = format!(r#"{{"config":{}}}"#, POSTER);
    let response = service.handle("POST", "/api/v2/generate", wrapped.as_bytes());
    assert_eq!(response.status, 200);

    let bare = service.handle("POST", "/api/v2/generate", POSTER.as_bytes());
    assert_eq!(bare.status, 200);
}

#[test]
fn invalid_requests_are_400_with_job_id() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(ScriptedBehaviour::ready(), tmp.path());

    let malformed = service.handle("POST", "/api/generate-poster", b"{not json");
    assert_eq!(malformed.status, 400);
    let envelope = body(&malformed);
    assert_eq!(envelope["success"], false);
    assert_eq!(envelope["errorKind"], "configuration");
    assert_eq!(envelope["jobId"].as_str().unwrap().len(), 32);

    let invalid = service.handle(
        "POST",
        "/api/generate-poster",
        br#"{"print":{"dpi":-5},"maps":[]}"#,
    );
    assert_eq!(invalid.status, 400);
    assert!(body(&invalid)["details"].as_array().unwrap().len() >= 2);
    assert_eq!(service.pipeline().launcher().counters().launched(), 0);
}

#[test]
fn render_failure_is_500_with_envelope() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(
        ScriptedBehaviour {
            fail_capture: true,
            ..ScriptedBehaviour::ready()
        },
        tmp.path(),
    );

    let response = service.handle("POST", "/api/generate-poster", POSTER.as_bytes());
    assert_eq!(response.status, 500);
    let envelope = body(&response);
    assert_eq!(envelope["success"], false);
    assert_eq!(envelope["errorKind"], "capture");
    assert!(envelope["error"].as_str().unwrap().contains("Capture failed"));
    assert!(envelope.get("image").is_none());

    let job_id = envelope["jobId"].as_str().unwrap();
    let status = service.handle("GET", &format!("/api/v2/job/{}", job_id), b"");
    assert_eq!(body(&status)["status"], "failed");
    assert_eq!(
        service.handle("GET", &format!("/api/download/{}", job_id), b"").status,
        404
    );
    assert_eq!(service.pipeline().launcher().counters().live(), 0);
}

#[test]
fn unknown_ids_and_routes_are_404() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(ScriptedBehaviour::ready(), tmp.path());

    assert_eq!(service.handle("GET", "/api/download/../../etc/passwd", b"").status, 404);
    assert_eq!(service.handle("GET", "/api/download/1700000000000", b"").status, 404);
    assert_eq!(
        service
            .handle("GET", "/api/job/0123456789abcdef0123456789abcdef", b"")
            .status,
        404
    );
    assert_eq!(service.handle("GET", "/nope", b"").status, 404);
    assert_eq!(service.handle("DELETE", "/api/generate-poster", b"").status, 404);
}

#[test]
fn health_and_preflight() {
    let tmp = tempfile::tempdir().unwrap();
    let service = service(ScriptedBehaviour::ready(), tmp.path());

    let health = service.handle("GET", "/health", b"");
    assert_eq!(health.status, 200);
    let json = body(&health);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    let timestamp = json["timestamp"].as_str().unwrap();
    assert!(timestamp.ends_with('Z'), "{}", timestamp);

    let preflight = service.handle("OPTIONS", "/api/generate-poster", b"");
    assert_eq!(preflight.status, 204);
    assert!(preflight.body.is_empty());
}

static INIT: Once = Once::new();

/// Start the real server once on a fixed port
fn start_test_server(dir: std::path::PathBuf) -> &'static str {
    INIT.call_once(move || {
        let service = Arc::new(service(ScriptedBehaviour::ready(), &dir));
        std::thread::spawn(move || {
            let _ = server::serve(service, "127.0.0.1:18091", server::DEFAULT_MAX_BODY_BYTES);
        });
        // Give the server time to start
        std::thread::sleep(Duration::from_millis(100));
    });
    "127.0.0.1:18091"
}

fn raw_request(addr: &str, request: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

#[test]
fn serves_over_http_with_cors() {
    let tmp = tempfile::tempdir().unwrap();
    let addr = start_test_server(tmp.path().to_path_buf());

    let response = raw_request(
        addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.contains("Access-Control-Allow-Origin: *"));
    assert!(response.contains("\"status\":\"ok\""));
}
