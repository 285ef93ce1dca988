//! 브라우저 루프
//!
//! [`BrowserHandle`]을 소유하는 단일 태스크. 모든 커맨드와 엔진 이벤트가
//! 이 루프를 거치므로 잠금 없이 직렬화된다.
//!
//! 데이터 삭제는 엔진 future를 별도 태스크에서 기다리고, 완료 결과를
//! 내부 채널로 다시 루프에 넣는다. 그동안 다른 커맨드는 계속 처리된다.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::command::{ClearScope, Command, CommandError};
use crate::engine::{EngineError, EngineEvent, PageInfo, WebEngine};
use crate::extension::{ExtensionRegistry, ExtensionSummary};
use crate::telemetry::TelemetryCollector;

const INBOX_CAPACITY: usize = 64;

/// 활성 뷰와 웹사이트 데이터 세션을 담는 단일 컨텍스트.
/// 엔진이 붙기 전에는 비어 있다.
#[derive(Default)]
pub struct BrowserHandle {
    engine: Option<Box<dyn WebEngine>>,
}

impl BrowserHandle {
    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    fn page_info(&self) -> PageInfo {
        self.engine.as_ref().map(|e| e.page_info()).unwrap_or_default()
    }
}

/// 루프가 끝난 이유
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// 모든 클라이언트가 사라짐
    Closed,
    /// 브라우저 프로세스가 종료됨
    EngineExited(String),
}

enum LoopMessage {
    Command(Command),
    Attach {
        engine: Box<dyn WebEngine>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    },
}

struct ClearFinished {
    scope: ClearScope,
    result: Result<(), EngineError>,
    reply: oneshot::Sender<Result<(), CommandError>>,
}

// ═══════════════════════════════════════════════════════════════
//  BrowserClient
// ═══════════════════════════════════════════════════════════════

/// 어댑터들이 들고 다니는 복제 가능한 핸들
#[derive(Clone)]
pub struct BrowserClient {
    tx: mpsc::Sender<LoopMessage>,
}

impl BrowserClient {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LoopMessage::Command(make(reply)))
            .await
            .map_err(|_| CommandError::Unavailable)?;
        rx.await.map_err(|_| CommandError::Unavailable)
    }

    /// 엔진을 루프에 넘긴다. 이후부터 세션이 준비된 상태가 된다.
    pub async fn attach(
        &self,
        engine: Box<dyn WebEngine>,
        events: mpsc::UnboundedReceiver<EngineEvent>,
    ) -> Result<(), CommandError> {
        self.tx
            .send(LoopMessage::Attach { engine, events })
            .await
            .map_err(|_| CommandError::Unavailable)
    }

    pub async fn open(&self, url: &str) -> Result<(), CommandError> {
        let url = url.to_string();
        self.request(|reply| Command::Open { url, reply }).await
    }

    pub async fn reload(&self) -> Result<(), CommandError> {
        self.request(|reply| Command::Reload { reply }).await
    }

    pub async fn get_url(&self) -> Result<String, CommandError> {
        self.request(|reply| Command::GetUrl { reply }).await
    }

    pub async fn clear_data(&self, scope: &str) -> Result<(), CommandError> {
        let scope = scope.to_string();
        self.request(|reply| Command::ClearData { scope, reply }).await?
    }

    pub async fn list_extensions(&self) -> Result<Vec<ExtensionSummary>, CommandError> {
        self.request(|reply| Command::ListExtensions { reply }).await
    }

    pub async fn get_stats(&self) -> Result<String, CommandError> {
        self.request(|reply| Command::GetStats { reply }).await
    }
}

// ═══════════════════════════════════════════════════════════════
//  BrowserLoop
// ═══════════════════════════════════════════════════════════════

pub struct BrowserLoop {
    handle: BrowserHandle,
    registry: Arc<ExtensionRegistry>,
    telemetry: TelemetryCollector,
    inbox: mpsc::Receiver<LoopMessage>,
    events: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    clear_tx: mpsc::UnboundedSender<ClearFinished>,
    clear_rx: mpsc::UnboundedReceiver<ClearFinished>,
}

impl BrowserLoop {
    pub fn new(registry: Arc<ExtensionRegistry>, telemetry: TelemetryCollector) -> (Self, BrowserClient) {
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let (clear_tx, clear_rx) = mpsc::unbounded_channel();
        let lp = Self {
            handle: BrowserHandle::default(),
            registry,
            telemetry,
            inbox,
            events: None,
            clear_tx,
            clear_rx,
        };
        (lp, BrowserClient { tx })
    }

    /// 루프 실행. 클라이언트가 모두 사라지거나 엔진이 종료되면 반환.
    pub async fn run(mut self) -> LoopExit {
        tracing::debug!("Browser loop started");
        loop {
            tokio::select! {
                msg = self.inbox.recv() => match msg {
                    Some(LoopMessage::Command(cmd)) => self.handle_command(cmd),
                    Some(LoopMessage::Attach { engine, events }) => {
                        tracing::info!("Browser engine attached");
                        self.handle.engine = Some(engine);
                        self.events = Some(events);
                    }
                    None => {
                        tracing::debug!("All browser clients dropped");
                        return LoopExit::Closed;
                    }
                },
                Some(done) = self.clear_rx.recv() => self.finish_clear(done),
                event = next_event(&mut self.events) => match event {
                    Some(event) => {
                        if let Some(exit) = self.handle_event(event) {
                            return exit;
                        }
                    }
                    None => {
                        tracing::warn!("Engine event channel closed");
                        self.events = None;
                    }
                },
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        tracing::debug!("Command: {}", cmd.name());
        match cmd {
            Command::Open { url, reply } => {
                if let Some(engine) = self.handle.engine.as_mut() {
                    tracing::info!("Opening {}", url);
                    engine.load_uri(&url);
                }
                let _ = reply.send(());
            }
            Command::Reload { reply } => {
                if let Some(engine) = self.handle.engine.as_mut() {
                    engine.reload();
                }
                let _ = reply.send(());
            }
            Command::GetUrl { reply } => {
                let uri = self
                    .handle
                    .engine
                    .as_ref()
                    .and_then(|e| e.uri())
                    .unwrap_or_default();
                let _ = reply.send(uri);
            }
            Command::ClearData { scope, reply } => self.start_clear(&scope, reply),
            Command::ListExtensions { reply } => {
                let _ = reply.send(self.registry.summaries());
            }
            Command::GetStats { reply } => {
                let snapshot = self.telemetry.snapshot(self.handle.page_info());
                let _ = reply.send(snapshot.to_json_string());
            }
        }
    }

    fn start_clear(&mut self, scope: &str, reply: oneshot::Sender<Result<(), CommandError>>) {
        let scope: ClearScope = match scope.parse() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("ClearData rejected: invalid scope '{}'", scope);
                let _ = reply.send(Err(e));
                return;
            }
        };
        let Some(engine) = self.handle.engine.as_ref() else {
            let _ = reply.send(Err(CommandError::NotReady));
            return;
        };

        tracing::info!("Clearing website data ({})", scope);
        let pending = engine.clear_website_data(scope.data_types());
        let done = self.clear_tx.clone();
        tokio::spawn(async move {
            let result = pending.await;
            let _ = done.send(ClearFinished { scope, result, reply });
        });
    }

    fn finish_clear(&mut self, done: ClearFinished) {
        let ClearFinished { scope, result, reply } = done;
        let outcome = match result {
            Ok(()) => {
                if let Some(engine) = self.handle.engine.as_mut() {
                    engine.reload();
                }
                tracing::info!("Website data cleared ({}), page reloaded", scope);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to clear website data ({}): {}", scope, e);
                Err(CommandError::Engine(e.to_string()))
            }
        };
        let _ = reply.send(outcome);
    }

    fn handle_event(&mut self, event: EngineEvent) -> Option<LoopExit> {
        match event {
            EngineEvent::WebProcessTerminated(reason) => {
                tracing::warn!("Web process {}, reloading...", reason);
                if let Some(engine) = self.handle.engine.as_mut() {
                    engine.reload();
                }
                None
            }
            EngineEvent::LoadFinished(uri) => {
                tracing::debug!("Load finished: {}", uri);
                None
            }
            EngineEvent::Exited(reason) => {
                tracing::error!("Browser engine exited: {}", reason);
                self.handle.engine = None;
                Some(LoopExit::EngineExited(reason))
            }
        }
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<EngineEvent>>) -> Option<EngineEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// 루프를 tokio 태스크로 띄운다
pub fn spawn(
    registry: Arc<ExtensionRegistry>,
    telemetry: TelemetryCollector,
) -> (BrowserClient, tokio::task::JoinHandle<LoopExit>) {
    let (lp, client) = BrowserLoop::new(registry, telemetry);
    (client, tokio::spawn(lp.run()))
}
