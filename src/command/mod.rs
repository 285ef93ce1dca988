//! 통합 커맨드 표면
//!
//! D-Bus, 페이지 메시지, REST API 어댑터는 모두 [`Command`]로 변환되어
//! 브라우저 루프 하나에서 순서대로 처리된다.

use std::str::FromStr;

use axum::http::StatusCode;
use tokio::sync::oneshot;

use crate::engine::WebsiteDataTypes;
use crate::extension::ExtensionSummary;

/// 브라우저 루프에 전달되는 요청. 각 요청은 oneshot으로 응답받는다.
#[derive(Debug)]
pub enum Command {
    /// URL 로드: 문법 검증 없음. 뷰가 없으면 no-op.
    Open {
        url: String,
        reply: oneshot::Sender<()>,
    },
    Reload {
        reply: oneshot::Sender<()>,
    },
    /// 현재 URI, 없으면 빈 문자열
    GetUrl {
        reply: oneshot::Sender<String>,
    },
    /// 스코프 문자열은 루프에서 검증한다 (준비 상태보다 먼저)
    ClearData {
        scope: String,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    ListExtensions {
        reply: oneshot::Sender<Vec<ExtensionSummary>>,
    },
    GetStats {
        reply: oneshot::Sender<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "Open",
            Self::Reload { .. } => "Reload",
            Self::GetUrl { .. } => "GetUrl",
            Self::ClearData { .. } => "ClearData",
            Self::ListExtensions { .. } => "ListExtensions",
            Self::GetStats { .. } => "GetStats",
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  ClearScope
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Cache,
    Cookies,
    All,
}

impl ClearScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Cookies => "cookies",
            Self::All => "all",
        }
    }

    /// 스코프별 고정 데이터 종류 집합
    pub fn data_types(self) -> WebsiteDataTypes {
        match self {
            Self::Cache => WebsiteDataTypes::DISK_CACHE | WebsiteDataTypes::MEMORY_CACHE,
            Self::Cookies => WebsiteDataTypes::COOKIES,
            Self::All => {
                WebsiteDataTypes::MEMORY_CACHE
                    | WebsiteDataTypes::DISK_CACHE
                    | WebsiteDataTypes::OFFLINE_APPLICATION_CACHE
                    | WebsiteDataTypes::SESSION_STORAGE
                    | WebsiteDataTypes::LOCAL_STORAGE
                    | WebsiteDataTypes::COOKIES
                    | WebsiteDataTypes::DEVICE_ID_HASH_SALT
                    | WebsiteDataTypes::HSTS_CACHE
                    | WebsiteDataTypes::ITP
                    | WebsiteDataTypes::SERVICE_WORKER_REGISTRATIONS
                    | WebsiteDataTypes::DOM_CACHE
            }
        }
    }
}

impl FromStr for ClearScope {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cache" => Ok(Self::Cache),
            "cookies" => Ok(Self::Cookies),
            "all" => Ok(Self::All),
            other => Err(CommandError::InvalidScope(other.to_string())),
        }
    }
}

impl std::fmt::Display for ClearScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════
//  CommandError
// ═══════════════════════════════════════════════════════════════

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// 잘못된 스코프 (입력값 보관)
    #[error("Scope must be 'cache', 'cookies', or 'all'")]
    InvalidScope(String),

    #[error("Kiosk session not initialized")]
    NotReady,

    /// 엔진 오류 메시지 그대로
    #[error("{0}")]
    Engine(String),

    #[error("Browser loop is not running")]
    Unavailable,
}

impl CommandError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidScope(_) => "invalid_scope",
            Self::NotReady => "not_ready",
            Self::Engine(_) => "engine_error",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidScope(_) => StatusCode::BAD_REQUEST,
            Self::NotReady | Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
