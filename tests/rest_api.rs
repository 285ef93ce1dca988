/// REST 컨트롤 API 통합 테스트
/// 실제 소켓 없이 라우터에 직접 요청을 넣어 검증

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use kiosk_shell::api::{self, ApiState, ApiToken, API_PREFIX};
use kiosk_shell::browser::{self, BrowserClient};
use kiosk_shell::engine::HeadlessEngine;
use kiosk_shell::extension::ExtensionRegistry;
use kiosk_shell::service::ServiceControl;
use kiosk_shell::telemetry::TelemetryCollector;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;

const TOKEN: &str = "0123456789abcdef";

struct Harness {
    tmp: tempfile::TempDir,
    app: Router,
    client: BrowserClient,
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into(), "sh".into()]
}

impl Harness {
    async fn new(attach: bool) -> Self {
        let service = ServiceControl::new("kiosk-test").with_commands(sh("echo active"), sh("true"));
        Self::with_service(attach, service).await
    }

    async fn with_service(attach: bool, service: ServiceControl) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config");
        std::fs::write(&config_path, "# kiosk\nURL=\"https://wpewebkit.org\"\nAPI_TOKEN=\"secret\"\n").unwrap();
        let extensions_dir = tmp.path().join("extensions");
        std::fs::create_dir(&extensions_dir).unwrap();

        let (client, _task) = browser::spawn(
            Arc::new(ExtensionRegistry::empty()),
            TelemetryCollector::default(),
        );
        if attach {
            let (_events_tx, events_rx) = mpsc::unbounded_channel();
            client.attach(Box::new(HeadlessEngine::new()), events_rx).await.unwrap();
        }

        let state = ApiState {
            client: client.clone(),
            config_path,
            extensions_dir,
            service,
        };
        Self {
            tmp,
            app: api::router(state, ApiToken::new(TOKEN)),
            client,
        }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    async fn send(&self, method: &str, path: &str, key: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(method)
            .uri(format!("{}{}", API_PREFIX, path));
        if let Some(key) = key {
            req = req.header("X-Api-Key", key);
        }
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };

        let resp = self.app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    /// 봉투가 아닌 응답 (문서 페이지)
    async fn get_raw(&self, path: &str) -> (StatusCode, Option<String>, Option<String>, String) {
        let req = Request::builder()
            .uri(format!("{}{}", API_PREFIX, path))
            .body(Body::empty())
            .unwrap();
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header("content-type");
        let cors = header("access-control-allow-origin");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, content_type, cors, String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn call(&self, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(method, path, Some(TOKEN), body).await
    }
}

fn write_extension(root: &Path, dir: &str, name: &str) {
    let ext = root.join("extensions").join(dir);
    std::fs::create_dir_all(&ext).unwrap();
    std::fs::write(
        ext.join("manifest.json"),
        json!({ "name": name, "version": "0.1.0" }).to_string(),
    )
    .unwrap();
}

#[tokio::test]
async fn test_missing_and_wrong_api_key() {
    let h = Harness::new(true).await;

    let (status, body) = h.send("GET", "/status", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["data"], Value::Null);
    assert_eq!(body["error"]["code"], "unauthorized");
    assert_eq!(body["error"]["message"], "Missing X-Api-Key header");

    let (status, body) = h.send("GET", "/status", Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "Invalid API key");
}

#[tokio::test]
async fn test_status_reports_url() {
    let h = Harness::new(true).await;
    h.client.open("https://example.com/").await.unwrap();

    let (status, body) = h.call("GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["url"], "https://example.com/");
    assert_eq!(body["data"]["service"], "active");
    assert_eq!(body["data"]["uptime"], "active");
    assert_eq!(body["error"], Value::Null);
}

#[tokio::test]
async fn test_status_without_systemd() {
    let service = ServiceControl::new("kiosk-test").with_commands(sh("exit 1"), sh("true"));
    let h = Harness::with_service(true, service).await;

    let (status, body) = h.call("GET", "/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["service"], "unknown");
    assert_eq!(body["data"]["uptime"], Value::Null);
}

#[tokio::test]
async fn test_restart_success_and_failure() {
    let h = Harness::new(true).await;
    let (status, body) = h.call("POST", "/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "restarting");

    let (status, _) = h.send("POST", "/restart", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let service = ServiceControl::new("kiosk-test").with_commands(sh("true"), sh("exit 1"));
    let h = Harness::with_service(true, service).await;
    let (status, body) = h.call("POST", "/restart", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "restart_error");
}

#[tokio::test]
async fn test_docs_need_no_api_key() {
    let h = Harness::new(true).await;

    let (status, content_type, _, page) = h.get_raw("/docs").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/html"));
    assert!(page.contains("./docs/openapi.yaml"));

    let (status, content_type, cors, yaml) = h.get_raw("/docs/openapi.yaml").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/yaml"));
    assert_eq!(cors.as_deref(), Some("*"));
    assert!(yaml.starts_with("openapi: 3"));
    assert!(yaml.contains("/restart:"));
}

#[tokio::test]
async fn test_navigate_validates_and_persists() {
    let h = Harness::new(true).await;

    let (status, body) = h.call("POST", "/navigate", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_body");

    let (status, body) = h.call("POST", "/navigate", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["message"], "Invalid JSON body");

    let (status, body) = h
        .call("POST", "/navigate", Some(json!({ "url": "https://example.org/" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["url"], "https://example.org/");
    assert_eq!(h.client.get_url().await.unwrap(), "https://example.org/");

    let saved = std::fs::read_to_string(h.root().join("config")).unwrap();
    assert!(saved.starts_with("# kiosk\n"));
    assert!(saved.contains("URL=\"https://example.org/\""));
}

#[tokio::test]
async fn test_config_hides_token() {
    let h = Harness::new(true).await;

    let (status, body) = h.call("GET", "/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["URL"], "https://wpewebkit.org");
    assert!(body["data"].get("API_TOKEN").is_none());
}

#[tokio::test]
async fn test_config_set_rules() {
    let h = Harness::new(true).await;

    let (status, body) = h
        .call("PUT", "/config", Some(json!({ "key": "API_TOKEN", "value": "x" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "forbidden_key");

    let (status, body) = h
        .call("PUT", "/config", Some(json!({ "key": "BOGUS", "value": "x" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unknown_key");

    let (status, body) = h
        .call("PUT", "/config", Some(json!({ "key": "API_PORT", "value": "http" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_value");

    let (status, body) = h
        .call("PUT", "/config", Some(json!({ "key": "VNC_PORT", "value": "5900" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["restart_required"], true);
}

#[tokio::test]
async fn test_config_url_applies_live() {
    let h = Harness::new(true).await;

    let (status, body) = h
        .call("PUT", "/config", Some(json!({ "key": "URL", "value": "https://example.net/" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["restart_required"], false);
    assert_eq!(h.client.get_url().await.unwrap(), "https://example.net/");
}

#[tokio::test]
async fn test_clear_errors_and_success() {
    let h = Harness::new(false).await;

    let (status, body) = h.call("POST", "/clear", Some(json!({ "scope": "bogus" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_scope");
    assert_eq!(body["error"]["message"], "Scope must be 'cache', 'cookies', or 'all'");

    let (status, body) = h.call("POST", "/clear", Some(json!({ "scope": "cache" }))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "not_ready");

    let (_events_tx, events_rx) = mpsc::unbounded_channel();
    h.client.attach(Box::new(HeadlessEngine::new()), events_rx).await.unwrap();

    let (status, body) = h.call("POST", "/clear", Some(json!({ "scope": "cookies" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cleared"], "cookies");
}

#[tokio::test]
async fn test_extension_toggle() {
    let h = Harness::new(true).await;
    write_extension(h.root(), "clock", "Clock");

    let (status, body) = h.call("GET", "/extensions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["dir_name"], "clock");
    assert_eq!(body["data"][0]["enabled"], true);

    let (status, body) = h.call("POST", "/extensions/Clock/disable", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["extension"], "clock");
    assert_eq!(body["data"]["status"], "disabled");
    assert_eq!(body["data"]["changed"], true);
    assert!(h.root().join("extensions/clock/.disabled").exists());

    let (status, body) = h.call("POST", "/extensions/missing/enable", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_system_snapshot_is_object() {
    let h = Harness::new(true).await;

    let (status, body) = h.call("GET", "/system", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_object());
    assert!(body["data"]["webkit"].is_object());
}
