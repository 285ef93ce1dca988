//! Chromium DevTools 프로토콜 엔진 백엔드
//!
//! 키오스크 모드 Chromium 프로세스를 띄우고 첫 번째 page 타겟의
//! DevTools WebSocket에 붙는다. 요청/응답은 id로 매칭하고,
//! 이벤트는 [`EngineEvent`] / [`ScriptMessage`] 채널로 변환한다.
//!
//! 페이지의 `window.webkit.messageHandlers.__kiosk.postMessage`는
//! `Runtime.addBinding` 위에 얹은 shim으로 제공된다.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

use super::{
    EngineChannels, EngineError, EngineEvent, InjectedFrames, InjectionTime, ScriptMessage,
    TerminationReason, UserContent, WebEngine, WebsiteDataTypes,
};
use crate::injector::MESSAGE_CHANNEL;
use crate::utils::js_string_literal;

/// 페이지 → 셸 바인딩 이름
const BINDING_NAME: &str = "__kioskPost";

const DISCOVERY_ATTEMPTS: u32 = 40;
const DISCOVERY_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct CdpOptions {
    pub executable: String,
    pub port: u16,
    pub profile_dir: PathBuf,
}

impl CdpOptions {
    pub fn new(executable: impl Into<String>, port: u16) -> Self {
        Self {
            executable: executable.into(),
            port,
            profile_dir: std::env::temp_dir().join("kiosk-shell-profile"),
        }
    }

    fn args(&self) -> Vec<String> {
        vec![
            "--kiosk".to_string(),
            format!("--remote-debugging-port={}", self.port),
            format!("--user-data-dir={}", self.profile_dir.display()),
            "--no-first-run".to_string(),
            "--no-default-browser-check".to_string(),
            "--noerrdialogs".to_string(),
            "--disable-infobars".to_string(),
            "--disable-session-crashed-bubble".to_string(),
            "about:blank".to_string(),
        ]
    }
}

// ═══════════════════════════════════════════════════════════════
//  세션 (요청/응답 매칭 + 페이지 상태)
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct PageState {
    main_frame: Option<String>,
    uri: Option<String>,
    title: Option<String>,
    progress: f64,
}

struct Pending {
    method: String,
    tx: oneshot::Sender<Result<Value, EngineError>>,
}

struct Session {
    out: mpsc::UnboundedSender<Message>,
    pending: Mutex<HashMap<u64, Pending>>,
    next_id: AtomicU64,
    state: Mutex<PageState>,
    events: mpsc::UnboundedSender<EngineEvent>,
    messages: mpsc::UnboundedSender<ScriptMessage>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Session {
    /// 요청 전송. 반환된 future는 세션을 빌리지 않는다.
    fn call(&self, method: &str, params: Value) -> impl Future<Output = Result<Value, EngineError>> + Send + 'static {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(
            id,
            Pending {
                method: method.to_string(),
                tx,
            },
        );

        let frame = json!({ "id": id, "method": method, "params": params }).to_string();
        let sent = self.out.send(Message::Text(frame)).is_ok();
        if !sent {
            lock(&self.pending).remove(&id);
        }

        async move {
            if !sent {
                return Err(EngineError::Closed);
            }
            rx.await.unwrap_or(Err(EngineError::Closed))
        }
    }

    /// 응답을 기다리지 않는 요청. 실패는 경고 로그로만 남긴다.
    fn fire(&self, method: &str, params: Value) {
        let pending = self.call(method, params);
        tokio::spawn(async move {
            if let Err(e) = pending.await {
                tracing::warn!("[cdp] {}", e);
            }
        });
    }

    fn fail_all_pending(&self) {
        for (_, p) in lock(&self.pending).drain() {
            let _ = p.tx.send(Err(EngineError::Closed));
        }
    }

    fn dispatch(self: &Arc<Self>, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("[cdp] unparsable frame: {}", e);
                return;
            }
        };

        if let Some(id) = frame.get("id").and_then(Value::as_u64) {
            let Some(p) = lock(&self.pending).remove(&id) else {
                return;
            };
            let result = match frame.get("error") {
                Some(err) => Err(EngineError::Protocol {
                    method: p.method,
                    message: err
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                }),
                None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
            };
            let _ = p.tx.send(result);
            return;
        }

        let Some(method) = frame.get("method").and_then(Value::as_str) else {
            return;
        };
        let params = frame.get("params").cloned().unwrap_or(Value::Null);
        self.handle_event(method, &params);
    }

    fn handle_event(self: &Arc<Self>, method: &str, params: &Value) {
        match method {
            "Page.frameNavigated" => {
                let frame = &params["frame"];
                if frame.get("parentId").is_some() {
                    return;
                }
                let mut state = lock(&self.state);
                state.main_frame = frame["id"].as_str().map(str::to_string);
                state.uri = frame["url"].as_str().map(str::to_string);
                state.title = None;
            }
            "Page.frameStartedLoading" => {
                let mut state = lock(&self.state);
                if is_main_frame(&state, params) {
                    state.progress = 0.1;
                }
            }
            "Page.domContentEventFired" => {
                lock(&self.state).progress = 0.7;
            }
            "Page.loadEventFired" => {
                let uri = {
                    let mut state = lock(&self.state);
                    state.progress = 1.0;
                    state.uri.clone().unwrap_or_default()
                };
                let _ = self.events.send(EngineEvent::LoadFinished(uri));
                self.refresh_title();
            }
            "Inspector.targetCrashed" => {
                let _ = self
                    .events
                    .send(EngineEvent::WebProcessTerminated(TerminationReason::Crashed));
            }
            "Runtime.bindingCalled" if params["name"] == BINDING_NAME => {
                self.forward_page_message(params);
            }
            _ => {}
        }
    }

    fn refresh_title(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let pending = self.call(
            "Runtime.evaluate",
            json!({ "expression": "document.title", "returnByValue": true }),
        );
        tokio::spawn(async move {
            match pending.await {
                Ok(result) => {
                    let title = result["result"]["value"].as_str().map(str::to_string);
                    lock(&session.state).title = title;
                }
                Err(e) => tracing::debug!("[cdp] title lookup failed: {}", e),
            }
        });
    }

    /// shim이 보낸 `{id, message}`를 ScriptMessage로 넘기고, 응답을 페이지로 돌려준다
    fn forward_page_message(self: &Arc<Self>, params: &Value) {
        let context_id = params["executionContextId"].clone();
        let Some(raw) = params["payload"].as_str() else {
            return;
        };
        let Ok(envelope) = serde_json::from_str::<Value>(raw) else {
            tracing::debug!("[cdp] malformed binding payload");
            return;
        };
        let Some(call_id) = envelope["id"].as_u64() else {
            return;
        };

        let (reply, rx) = oneshot::channel();
        let msg = ScriptMessage {
            payload: envelope["message"].clone(),
            reply,
        };
        if self.messages.send(msg).is_err() {
            return;
        }

        let session = Arc::clone(self);
        tokio::spawn(async move {
            let (ok, value) = match rx.await {
                Ok(Ok(v)) => (true, v),
                Ok(Err(e)) => (false, e),
                Err(_) => (false, "no handler".to_string()),
            };
            let expression = format!(
                "window.__kioskResolve({},{},{})",
                call_id,
                ok,
                js_string_literal(&value)
            );
            session.fire(
                "Runtime.evaluate",
                json!({ "expression": expression, "contextId": context_id }),
            );
        });
    }
}

fn is_main_frame(state: &PageState, params: &Value) -> bool {
    match (&state.main_frame, params["frameId"].as_str()) {
        (Some(main), Some(id)) => main == id,
        _ => true,
    }
}

// ═══════════════════════════════════════════════════════════════
//  스크립트 변환
// ═══════════════════════════════════════════════════════════════

/// `window.webkit.messageHandlers.__kiosk` 호환 shim
pub fn message_bridge_script() -> String {
    format!(
        "(function(){{\
         if(window.__kioskResolve)return;\
         var pending={{}},seq=0;\
         window.__kioskResolve=function(id,ok,v){{var p=pending[id];if(!p)return;delete pending[id];if(ok)p.resolve(v);else p.reject(new Error(v));}};\
         var post=function(m){{return new Promise(function(res,rej){{var id=++seq;pending[id]={{resolve:res,reject:rej}};window.{BINDING_NAME}(JSON.stringify({{id:id,message:m}}));}});}};\
         window.webkit=window.webkit||{{}};\
         window.webkit.messageHandlers=window.webkit.messageHandlers||{{}};\
         window.webkit.messageHandlers.{MESSAGE_CHANNEL}={{postMessage:post}};\
         }})();"
    )
}

/// 사용자 콘텐츠를 새 문서마다 평가되는 스크립트로 변환.
/// 스크립트 원문은 간접 `eval`로 전역 스코프에서 실행되므로 최상위
/// `var`/`function` 선언이 페이지와 다른 익스텐션에 그대로 보인다.
pub fn document_script(content: &UserContent) -> String {
    let (body, frames, time) = match content {
        UserContent::Script(s) => (
            format!("(0,eval)({});", js_string_literal(&s.source)),
            s.frames,
            s.time,
        ),
        UserContent::StyleSheet(s) => (
            format!(
                "var s=document.createElement('style');s.textContent={};\
                 var add=function(){{(document.head||document.documentElement).appendChild(s);}};\
                 if(document.documentElement){{add();}}else{{document.addEventListener('DOMContentLoaded',add,{{once:true}});}}",
                js_string_literal(&s.source)
            ),
            s.frames,
            InjectionTime::DocumentStart,
        ),
    };

    let guard = match frames {
        InjectedFrames::TopFrame => "if(window.top!==window.self)return;\n",
        InjectedFrames::AllFrames => "",
    };
    let start = match time {
        InjectionTime::DocumentStart => "run();",
        InjectionTime::DocumentEnd => {
            "if(document.readyState==='loading'){document.addEventListener('DOMContentLoaded',run,{once:true});}else{run();}"
        }
    };
    format!("(function(){{\n{guard}var run=function(){{\n{body}\n}};\n{start}\n}})();")
}

/// 삭제 대상 중 `Storage.clearDataForOrigin`으로 처리되는 종류
pub fn storage_types(types: WebsiteDataTypes) -> Vec<&'static str> {
    let table = [
        (WebsiteDataTypes::OFFLINE_APPLICATION_CACHE, "appcache"),
        (WebsiteDataTypes::LOCAL_STORAGE, "local_storage"),
        (WebsiteDataTypes::INDEXEDDB_DATABASES, "indexeddb"),
        (WebsiteDataTypes::SERVICE_WORKER_REGISTRATIONS, "service_workers"),
        (WebsiteDataTypes::DOM_CACHE, "cache_storage"),
    ];
    table
        .iter()
        .filter(|(flag, _)| types.contains(*flag))
        .map(|(_, name)| *name)
        .collect()
}

/// DevTools에 대응하는 삭제 명령이 없는 종류
pub fn unsupported_types(types: WebsiteDataTypes) -> WebsiteDataTypes {
    types
        & (WebsiteDataTypes::SESSION_STORAGE
            | WebsiteDataTypes::HSTS_CACHE
            | WebsiteDataTypes::ITP
            | WebsiteDataTypes::DEVICE_ID_HASH_SALT)
}

/// http(s) URI의 origin. 불투명 origin이면 `None`.
fn origin_of(uri: &str) -> Option<String> {
    let url = reqwest::Url::parse(uri).ok()?;
    let origin = url.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════
//  CdpEngine
// ═══════════════════════════════════════════════════════════════

pub struct CdpEngine {
    session: Arc<Session>,
}

impl WebEngine for CdpEngine {
    fn add_user_content(&mut self, content: &UserContent) {
        self.session.fire(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": document_script(content) }),
        );
    }

    fn load_uri(&mut self, uri: &str) {
        {
            let mut state = lock(&self.session.state);
            state.uri = Some(uri.to_string());
            state.progress = 0.0;
        }
        self.session.fire("Page.navigate", json!({ "url": uri }));
    }

    fn reload(&mut self) {
        lock(&self.session.state).progress = 0.0;
        self.session.fire("Page.reload", json!({ "ignoreCache": false }));
    }

    fn uri(&self) -> Option<String> {
        lock(&self.session.state).uri.clone()
    }

    fn title(&self) -> Option<String> {
        lock(&self.session.state).title.clone()
    }

    fn estimated_load_progress(&self) -> f64 {
        lock(&self.session.state).progress
    }

    fn clear_website_data(&self, types: WebsiteDataTypes) -> BoxFuture<'static, Result<(), EngineError>> {
        let skipped = unsupported_types(types);
        if !skipped.is_empty() {
            tracing::debug!("[cdp] no DevTools equivalent, not cleared: {:?}", skipped);
        }

        let mut steps = Vec::new();
        if types.contains(WebsiteDataTypes::COOKIES) {
            steps.push(self.session.call("Network.clearBrowserCookies", json!({})).boxed_step());
        }
        if types.intersects(WebsiteDataTypes::DISK_CACHE | WebsiteDataTypes::MEMORY_CACHE) {
            steps.push(self.session.call("Network.clearBrowserCache", json!({})).boxed_step());
        }
        let storage = storage_types(types);
        if !storage.is_empty() {
            match self.uri().as_deref().and_then(origin_of) {
                Some(origin) => steps.push(
                    self.session
                        .call(
                            "Storage.clearDataForOrigin",
                            json!({ "origin": origin, "storageTypes": storage.join(",") }),
                        )
                        .boxed_step(),
                ),
                None => tracing::debug!(
                    "[cdp] page has no http(s) origin, not cleared: {}",
                    storage.join(",")
                ),
            }
        }

        Box::pin(async move {
            for step in steps {
                step.await?;
            }
            Ok(())
        })
    }
}

trait BoxedStep {
    fn boxed_step(self) -> BoxFuture<'static, Result<Value, EngineError>>;
}

impl<F> BoxedStep for F
where
    F: Future<Output = Result<Value, EngineError>> + Send + 'static,
{
    fn boxed_step(self) -> BoxFuture<'static, Result<Value, EngineError>> {
        Box::pin(self)
    }
}

// ═══════════════════════════════════════════════════════════════
//  실행 / 접속
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: Option<String>,
}

async fn discover_page(port: u16, child: &mut tokio::process::Child) -> Result<String, EngineError> {
    let url = format!("http://127.0.0.1:{}/json/list", port);
    let http = reqwest::Client::new();
    let mut last_err = String::from("no page target");

    for _ in 0..DISCOVERY_ATTEMPTS {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(EngineError::Launch(format!("browser exited early ({})", status)));
        }
        match http.get(&url).send().await {
            Ok(resp) => match resp.json::<Vec<TargetInfo>>().await {
                Ok(targets) => {
                    if let Some(ws) = targets
                        .into_iter()
                        .filter(|t| t.kind == "page")
                        .find_map(|t| t.ws_url)
                    {
                        return Ok(ws);
                    }
                }
                Err(e) => last_err = e.to_string(),
            },
            Err(e) => last_err = e.to_string(),
        }
        tokio::time::sleep(DISCOVERY_INTERVAL).await;
    }
    Err(EngineError::Connect(format!(
        "no DevTools page target on port {}: {}",
        port, last_err
    )))
}

/// 브라우저 실행 → page 타겟 접속 → 도메인 활성화 → 메시지 shim 설치
pub async fn launch(opts: &CdpOptions) -> Result<(CdpEngine, EngineChannels), EngineError> {
    tracing::info!("Launching {} (DevTools port {})", opts.executable, opts.port);
    let mut child = tokio::process::Command::new(&opts.executable)
        .args(opts.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::Launch(format!("{}: {}", opts.executable, e)))?;

    let ws_url = discover_page(opts.port, &mut child).await?;
    tracing::debug!("[cdp] connecting to {}", ws_url);
    let (ws, _) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .map_err(|e| EngineError::Connect(e.to_string()))?;
    let (mut sink, mut stream) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (messages_tx, messages_rx) = mpsc::unbounded_channel();

    let session = Arc::new(Session {
        out: out_tx,
        pending: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(1),
        state: Mutex::new(PageState::default()),
        events: events_tx.clone(),
        messages: messages_tx,
    });

    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = sink.send(msg).await {
                tracing::warn!("[cdp] send failed: {}", e);
                break;
            }
        }
    });

    let reader = Arc::clone(&session);
    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => reader.dispatch(&text),
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[cdp] receive failed: {}", e);
                    break;
                }
            }
        }
        reader.fail_all_pending();
        tracing::debug!("[cdp] connection closed");
    });

    tokio::spawn(async move {
        let reason = match child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => e.to_string(),
        };
        let _ = events_tx.send(EngineEvent::Exited(reason));
    });

    for method in ["Page.enable", "Runtime.enable", "Inspector.enable", "Network.enable"] {
        session.call(method, json!({})).await?;
    }
    session
        .call("Runtime.addBinding", json!({ "name": BINDING_NAME }))
        .await?;
    session
        .call(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": message_bridge_script() }),
        )
        .await?;

    tracing::info!("DevTools session ready");
    Ok((
        CdpEngine { session },
        EngineChannels {
            events: events_rx,
            messages: messages_rx,
        },
    ))
}
