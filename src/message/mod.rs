//! 페이지 메시지 어댑터
//!
//! `window.__kiosk.sendMessage(type, data)`로 올라온 요청을 처리한다.
//! 페이지는 신뢰할 수 없으므로 읽기 전용인 `getStats`만 커맨드로 연결하고,
//! 나머지는 로그만 남기고 `"ok"`로 응답한다.

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::browser::BrowserClient;
use crate::engine::ScriptMessage;

#[derive(Debug, Deserialize)]
struct PageRequest {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    #[allow(dead_code)]
    data: Option<Value>,
}

/// 단일 메시지 처리. 페이로드가 문자열이 아니면 `expected string` 오류.
pub async fn handle_payload(client: &BrowserClient, payload: &Value) -> Result<String, String> {
    let Some(text) = payload.as_str() else {
        return Err("expected string".to_string());
    };

    match serde_json::from_str::<PageRequest>(text) {
        Ok(req) if req.kind == "getStats" => client.get_stats().await.map_err(|e| e.to_string()),
        _ => {
            tracing::info!("Extension message: {}", text);
            Ok("ok".to_string())
        }
    }
}

/// 엔진 메시지 채널을 끝날 때까지 순서대로 처리
pub async fn serve(mut messages: mpsc::UnboundedReceiver<ScriptMessage>, client: BrowserClient) {
    while let Some(msg) = messages.recv().await {
        let result = handle_payload(&client, &msg.payload).await;
        if msg.reply.send(result).is_err() {
            tracing::debug!("Page went away before reply");
        }
    }
    tracing::debug!("Page message channel closed");
}
