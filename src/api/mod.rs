//! REST 컨트롤 API
//!
//! `API_TOKEN`이 설정된 경우에만 뜬다. 브라우저 조작은 같은 프로세스의
//! [`BrowserClient`]를 통해, 설정/익스텐션 관리는 파일을 직접 수정한다.
//! 모든 응답은 `{"data": …, "error": …}` 봉투로 감싼다.
//! `/docs`와 `/docs/openapi.yaml`만 인증 없이 열려 있다.

pub mod auth;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::browser::BrowserClient;
use crate::command::CommandError;
use crate::config::{self, ConfigError, ConfigFile};
use crate::extension::{self, ExtensionError};
use crate::service::{ServiceControl, ServiceError};

pub use auth::ApiToken;

pub const API_PREFIX: &str = "/wpe-webkit-kiosk/api/v1";

const OPENAPI_SPEC: &str = include_str!("openapi.yaml");

const SWAGGER_HTML: &str = r##"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>WPE WebKit Kiosk API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css">
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    SwaggerUIBundle({ url: "./docs/openapi.yaml", dom_id: "#swagger-ui" });
  </script>
</body>
</html>
"##;

// ═══════════════════════════════════════════════════════════════
//  응답 봉투 / 에러
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    data: Option<T>,
    error: Option<ErrorBody>,
}

fn ok<T: Serialize>(data: T) -> Response {
    (
        StatusCode::OK,
        Json(Envelope {
            data: Some(data),
            error: None,
        }),
    )
        .into_response()
}

/// 핸들러 에러: 상태 코드 + 머신 리더블 코드 + 메시지
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    fn invalid_body(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_body", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope::<Value> {
            data: None,
            error: Some(ErrorBody {
                code: self.code.to_string(),
                message: self.message,
            }),
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        Self::new(err.status_code(), err.error_code(), err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::InvalidValue { .. } => {
                Self::new(StatusCode::BAD_REQUEST, err.error_code(), err.to_string())
            }
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "config_error", other.to_string()),
        }
    }
}

impl From<ExtensionError> for ApiError {
    fn from(err: ExtensionError) -> Self {
        match err {
            ExtensionError::NotFound { ref name, .. } => Self::new(
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Extension \"{}\" not found", name),
            ),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "extensions_error", other.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "restart_error", err.to_string())
    }
}

type ApiResult = Result<Response, ApiError>;

// ═══════════════════════════════════════════════════════════════
//  상태 / 라우터
// ═══════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ApiState {
    pub client: BrowserClient,
    pub config_path: PathBuf,
    pub extensions_dir: PathBuf,
    pub service: ServiceControl,
}

pub fn router(state: ApiState, token: ApiToken) -> Router {
    let v1 = Router::new()
        .route("/status", get(status))
        .route("/navigate", post(navigate))
        .route("/reload", post(reload))
        .route("/config", get(config_get).put(config_set))
        .route("/clear", post(clear))
        .route("/extensions", get(extensions_list))
        .route("/extensions/:name/enable", post(extension_enable))
        .route("/extensions/:name/disable", post(extension_disable))
        .route("/system", get(system))
        .route("/restart", post(restart))
        .route_layer(middleware::from_fn_with_state(token, auth::require_api_key))
        .with_state(state);

    let docs = Router::new()
        .route("/docs", get(docs_page))
        .route("/docs/openapi.yaml", get(openapi_spec));

    Router::new()
        .nest(API_PREFIX, v1.merge(docs))
        .layer(TraceLayer::new_for_http())
}

/// `0.0.0.0:port`에 바인드하고 종료될 때까지 서빙
pub async fn serve(port: u16, state: ApiState, token: ApiToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding REST API on {}", addr))?;
    tracing::info!("REST API listening on http://{}{}", addr, API_PREFIX);
    axum::serve(listener, router(state, token))
        .await
        .context("REST API server failed")?;
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  핸들러
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct NavigateBody {
    #[serde(default)]
    url: String,
}

#[derive(Deserialize)]
struct ConfigBody {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct ClearBody {
    #[serde(default)]
    scope: String,
}

/// GET /status: `uptime`은 유닛이 active일 때만
async fn status(State(state): State<ApiState>) -> ApiResult {
    let url = state.client.get_url().await?;
    let service = state.service.status().await;
    Ok(ok(json!({
        "service": service.state,
        "uptime": service.since,
        "url": url,
    })))
}

/// POST /navigate
async fn navigate(State(state): State<ApiState>, body: Result<Json<NavigateBody>, JsonRejection>) -> ApiResult {
    let Json(body) = body.map_err(|_| ApiError::invalid_body("Invalid JSON body"))?;
    if body.url.is_empty() {
        return Err(ApiError::invalid_body("Field 'url' is required"));
    }

    state.client.open(&body.url).await?;

    // 다음 시작에도 유지되도록 저장 (실패해도 요청은 성공)
    let saved = ConfigFile::load(&state.config_path).and_then(|mut cfg| {
        cfg.set("URL", &body.url);
        cfg.save()
    });
    if let Err(e) = saved {
        tracing::warn!("Could not persist URL: {}", e);
    }

    Ok(ok(json!({ "url": body.url })))
}

/// POST /reload
async fn reload(State(state): State<ApiState>) -> ApiResult {
    state.client.reload().await?;
    Ok(ok(json!({ "status": "reloaded" })))
}

/// GET /config: API_TOKEN 제외
async fn config_get(State(state): State<ApiState>) -> ApiResult {
    let cfg = ConfigFile::load(&state.config_path)?;
    let map: serde_json::Map<String, Value> = cfg
        .key_values()
        .into_iter()
        .filter(|(k, _)| k != "API_TOKEN")
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    Ok(ok(map))
}

/// PUT /config
async fn config_set(State(state): State<ApiState>, body: Result<Json<ConfigBody>, JsonRejection>) -> ApiResult {
    let Json(body) = body.map_err(|_| ApiError::invalid_body("Invalid JSON body"))?;
    if body.key.is_empty() {
        return Err(ApiError::invalid_body("Field 'key' is required"));
    }
    if body.key == "API_TOKEN" {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "forbidden_key",
            "API_TOKEN cannot be changed via this endpoint. Use kiosk api token regenerate",
        ));
    }
    if !config::is_valid_key(&body.key) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "unknown_key",
            format!("Unknown config key: {}", body.key),
        ));
    }
    config::validate_entry(&body.key, &body.value)?;

    let mut cfg = ConfigFile::load(&state.config_path)?;
    cfg.set(&body.key, &body.value);
    cfg.save()?;

    let restart_required = config::needs_restart(&body.key);
    if !restart_required {
        if let Err(e) = state.client.open(&body.value).await {
            tracing::warn!("Live apply of {} failed: {}", body.key, e);
        }
    }

    Ok(ok(json!({
        "key": body.key,
        "value": body.value,
        "restart_required": restart_required,
    })))
}

/// POST /clear
async fn clear(State(state): State<ApiState>, body: Result<Json<ClearBody>, JsonRejection>) -> ApiResult {
    let Json(body) = body.map_err(|_| ApiError::invalid_body("Invalid JSON body"))?;
    state.client.clear_data(&body.scope).await?;
    Ok(ok(json!({ "cleared": body.scope })))
}

/// GET /extensions
async fn extensions_list(State(state): State<ApiState>) -> ApiResult {
    let entries = extension::list_entries(&state.extensions_dir)?;
    Ok(ok(entries))
}

fn toggle_extension(state: &ApiState, name: &str, enabled: bool) -> ApiResult {
    let (entry, changed) = extension::set_enabled(&state.extensions_dir, name, enabled)?;
    let status = if enabled { "enabled" } else { "disabled" };
    Ok(ok(json!({
        "extension": entry.dir_name,
        "status": status,
        "changed": changed,
    })))
}

/// POST /extensions/:name/enable
async fn extension_enable(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    toggle_extension(&state, &name, true)
}

/// POST /extensions/:name/disable
async fn extension_disable(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    toggle_extension(&state, &name, false)
}

/// GET /system: 텔레메트리 스냅샷
async fn system(State(state): State<ApiState>) -> ApiResult {
    let raw = state.client.get_stats().await?;
    let snapshot: Value = serde_json::from_str(&raw).map_err(|e| {
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "telemetry_error", e.to_string())
    })?;
    Ok(ok(snapshot))
}

/// POST /restart
///
/// 이 서버도 같은 유닛 안에 있으므로 재시작 작업을 큐에 넣기만 하고 응답한다.
async fn restart(State(state): State<ApiState>) -> ApiResult {
    state.service.restart_detached().await?;
    tracing::info!("Restart of {} requested via REST API", state.service.unit());
    Ok(ok(json!({ "status": "restarting" })))
}

/// GET /docs
async fn docs_page() -> Html<&'static str> {
    Html(SWAGGER_HTML)
}

/// GET /docs/openapi.yaml
async fn openapi_spec() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/yaml"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        OPENAPI_SPEC,
    )
}
