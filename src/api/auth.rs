//! REST API 키 인증 미들웨어
//!
//! 모든 `/wpe-webkit-kiosk/api/v1` 요청은 `X-Api-Key` 헤더가 설정 파일의
//! `API_TOKEN`과 일치해야 한다. 비교는 상수 시간으로 수행한다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use super::ApiError;

pub const API_KEY_HEADER: &str = "X-Api-Key";

/// 실패 로그 최소 간격
const FAIL_LOG_INTERVAL: Duration = Duration::from_secs(30);

struct Inner {
    token: String,
    last_fail_log: Mutex<Option<Instant>>,
    suppressed: AtomicU64,
}

/// 기대 토큰 + 인증 실패 로그 rate-limiter
#[derive(Clone)]
pub struct ApiToken {
    inner: Arc<Inner>,
}

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: token.into(),
                last_fail_log: Mutex::new(None),
                suppressed: AtomicU64::new(0),
            }),
        }
    }

    pub fn matches(&self, provided: &str) -> bool {
        self.inner.token.as_bytes().ct_eq(provided.as_bytes()).into()
    }

    /// 30초에 한 번만 경고를 남기고 나머지는 개수만 센다
    fn log_failure(&self, uri: &axum::http::Uri) {
        let should_log = {
            let mut last = self.inner.last_fail_log.lock().unwrap_or_else(|e| e.into_inner());
            match *last {
                Some(t) if t.elapsed() < FAIL_LOG_INTERVAL => false,
                _ => {
                    *last = Some(Instant::now());
                    true
                }
            }
        };
        if should_log {
            let suppressed = self.inner.suppressed.swap(0, Ordering::Relaxed);
            if suppressed > 0 {
                tracing::warn!("API auth failed for {} (suppressed {} previous)", uri, suppressed);
            } else {
                tracing::warn!("API auth failed for {}", uri);
            }
        } else {
            self.inner.suppressed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// axum 미들웨어: `X-Api-Key` 헤더 검증
pub async fn require_api_key(State(token): State<ApiToken>, req: Request, next: Next) -> Response {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if provided.is_empty() {
        return ApiError::unauthorized("Missing X-Api-Key header").into_response();
    }
    if !token.matches(provided) {
        token.log_failure(req.uri());
        return ApiError::unauthorized("Invalid API key").into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        let token = ApiToken::new("secret");
        assert!(token.matches("secret"));
        assert!(!token.matches("secreT"));
        assert!(!token.matches("secret-but-longer"));
        assert!(!token.matches(""));
    }
}
