//! 브라우저 엔진 경계
//!
//! 렌더링/JS 실행/네트워크/프로세스 격리는 외부 엔진이 담당한다.
//! 셸은 이 모듈의 [`WebEngine`] 트레이트를 통해서만 엔진과 대화한다:
//! URI 로드, 리로드, 사용자 스크립트/스타일 주입, 웹사이트 데이터 삭제,
//! 그리고 현재 페이지 상태 조회.
//!
//! 엔진 쪽 이벤트(웹 프로세스 종료 등)는 [`EngineEvent`] 채널로,
//! 페이지에서 올라오는 메시지는 [`ScriptMessage`] 채널로 전달된다.

pub mod cdp;

use bitflags::bitflags;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

bitflags! {
    /// 삭제 대상 웹사이트 데이터 종류 (WebKit 값과 동일한 비트 배치)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WebsiteDataTypes: u32 {
        const MEMORY_CACHE = 1 << 0;
        const DISK_CACHE = 1 << 1;
        const OFFLINE_APPLICATION_CACHE = 1 << 2;
        const SESSION_STORAGE = 1 << 3;
        const LOCAL_STORAGE = 1 << 4;
        const INDEXEDDB_DATABASES = 1 << 6;
        const COOKIES = 1 << 8;
        const DEVICE_ID_HASH_SALT = 1 << 9;
        const HSTS_CACHE = 1 << 10;
        const ITP = 1 << 11;
        const SERVICE_WORKER_REGISTRATIONS = 1 << 12;
        const DOM_CACHE = 1 << 13;
    }
}

// ═══════════════════════════════════════════════════════════════
//  사용자 콘텐츠 (주입 단위)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFrames {
    TopFrame,
    AllFrames,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionTime {
    DocumentStart,
    DocumentEnd,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserScript {
    pub source: String,
    pub frames: InjectedFrames,
    pub time: InjectionTime,
}

impl UserScript {
    /// 최상위 프레임, 문서 로드 완료 시점: 익스텐션 기본값
    pub fn top_frame_end(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            frames: InjectedFrames::TopFrame,
            time: InjectionTime::DocumentEnd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserStyleSheet {
    pub source: String,
    pub frames: InjectedFrames,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserContent {
    Script(UserScript),
    StyleSheet(UserStyleSheet),
}

// ═══════════════════════════════════════════════════════════════
//  이벤트 / 메시지
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Crashed,
    ExceededMemoryLimit,
    TerminatedByApi,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let desc = match self {
            Self::Crashed => "crashed",
            Self::ExceededMemoryLimit => "exceeded memory limit",
            Self::TerminatedByApi => "terminated by API",
        };
        f.write_str(desc)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// 웹 콘텐츠 프로세스가 죽음: 셸은 리로드로 복구한다
    WebProcessTerminated(TerminationReason),
    LoadFinished(String),
    /// 엔진 자체(브라우저 프로세스)가 종료됨. 더 이상 복구 불가.
    Exited(String),
}

/// 페이지 JS → 네이티브 메시지 (reply 기반)
#[derive(Debug)]
pub struct ScriptMessage {
    /// `postMessage`에 전달된 JS 값
    pub payload: Value,
    pub reply: oneshot::Sender<Result<String, String>>,
}

/// 엔진이 셸로 올려 보내는 채널 묶음
pub struct EngineChannels {
    pub events: mpsc::UnboundedReceiver<EngineEvent>,
    pub messages: mpsc::UnboundedReceiver<ScriptMessage>,
}

/// 텔레메트리의 `webkit` 항목: 요청 시점에 엔진에서 직접 읽는다
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub uri: String,
    pub title: String,
    pub load_progress: f64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("DevTools connection failed: {0}")]
    Connect(String),

    #[error("{method} failed: {message}")]
    Protocol { method: String, message: String },

    #[error("Engine connection closed")]
    Closed,
}

// ═══════════════════════════════════════════════════════════════
//  WebEngine 트레이트
// ═══════════════════════════════════════════════════════════════

/// 셸이 사용하는 엔진 표면. 변경 메서드는 fire-and-forget이고,
/// 데이터 삭제만 완료를 기다릴 수 있는 future를 돌려준다.
pub trait WebEngine: Send {
    fn add_user_content(&mut self, content: &UserContent);

    fn load_uri(&mut self, uri: &str);

    fn reload(&mut self);

    fn uri(&self) -> Option<String>;

    fn title(&self) -> Option<String>;

    /// 0.0 ~ 1.0
    fn estimated_load_progress(&self) -> f64;

    /// 반환된 future는 엔진을 빌리지 않으므로 별도 태스크에서 기다릴 수 있다.
    fn clear_website_data(&self, types: WebsiteDataTypes) -> BoxFuture<'static, Result<(), EngineError>>;

    fn page_info(&self) -> PageInfo {
        PageInfo {
            uri: self.uri().unwrap_or_default(),
            title: self.title().unwrap_or_default(),
            load_progress: self.estimated_load_progress(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Headless 엔진
// ═══════════════════════════════════════════════════════════════

/// 디스플레이 없이 컨트롤 플레인만 띄울 때 쓰는 엔진.
/// 로드 요청은 즉시 완료된 것으로 취급한다.
#[derive(Debug, Default)]
pub struct HeadlessEngine {
    uri: Option<String>,
    content: Vec<UserContent>,
    reloads: usize,
    events: Option<mpsc::UnboundedSender<EngineEvent>>,
    _messages: Option<mpsc::UnboundedSender<ScriptMessage>>,
}

impl HeadlessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 엔진이 살아 있는 동안 열려 있는 채널 묶음과 함께 생성
    pub fn with_channels() -> (Self, EngineChannels) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (messages_tx, messages) = mpsc::unbounded_channel();
        let engine = Self {
            events: Some(events_tx),
            _messages: Some(messages_tx),
            ..Self::default()
        };
        (engine, EngineChannels { events, messages })
    }

    pub fn user_content(&self) -> &[UserContent] {
        &self.content
    }

    pub fn reload_count(&self) -> usize {
        self.reloads
    }
}

impl WebEngine for HeadlessEngine {
    fn add_user_content(&mut self, content: &UserContent) {
        self.content.push(content.clone());
    }

    fn load_uri(&mut self, uri: &str) {
        tracing::debug!("[headless] load {}", uri);
        self.uri = Some(uri.to_string());
        if let Some(events) = &self.events {
            let _ = events.send(EngineEvent::LoadFinished(uri.to_string()));
        }
    }

    fn reload(&mut self) {
        self.reloads += 1;
    }

    fn uri(&self) -> Option<String> {
        self.uri.clone()
    }

    fn title(&self) -> Option<String> {
        None
    }

    fn estimated_load_progress(&self) -> f64 {
        if self.uri.is_some() {
            1.0
        } else {
            0.0
        }
    }

    fn clear_website_data(&self, types: WebsiteDataTypes) -> BoxFuture<'static, Result<(), EngineError>> {
        tracing::debug!("[headless] clear website data {:?}", types);
        Box::pin(async { Ok(()) })
    }
}
