//! 페이지 콘텐츠 주입
//!
//! 첫 페이지 로드 전에 엔진에 설치할 사용자 콘텐츠 목록을 만든다.
//! 순서: 커서 숨김 스타일 → 오버레이 부트스트랩 → 익스텐션별 스타일, 스크립트.

use serde::Serialize;

use crate::engine::{InjectedFrames, UserContent, UserScript, UserStyleSheet, WebEngine};
use crate::extension::ExtensionRegistry;
use crate::utils::js_string_literal;

/// 페이지 ↔ 셸 메시지 채널 이름
pub const MESSAGE_CHANNEL: &str = "__kiosk";

pub const OVERLAY_ELEMENT_ID: &str = "__kiosk-overlay";

pub const HIDE_CURSOR_CSS: &str = "* { cursor: none !important; }";

const OVERLAY_HOST_CSS: &str =
    ":host{position:fixed;top:0;left:0;width:100%;height:100%;pointer-events:none;z-index:2147483647;}";

#[derive(Serialize)]
struct ExtensionInfo<'a> {
    name: &'a str,
    version: &'a str,
}

/// 오버레이 + `window.__kiosk` 부트스트랩 스크립트.
/// `extensions_json`은 활성 익스텐션 `{name, version}` 배열의 JSON.
pub fn bootstrap_script(extensions_json: &str) -> String {
    let id = js_string_literal(OVERLAY_ELEMENT_ID);
    let host_css = js_string_literal(OVERLAY_HOST_CSS);
    let channel = MESSAGE_CHANNEL;
    format!(
        "(function(){{\n\
         \x20 if(document.getElementById({id}))return;\n\
         \x20 var o=document.createElement('div');\n\
         \x20 o.id={id};\n\
         \x20 document.documentElement.appendChild(o);\n\
         \x20 var sr=o.attachShadow({{mode:'open'}});\n\
         \x20 var s=document.createElement('style');\n\
         \x20 s.textContent={host_css};\n\
         \x20 sr.appendChild(s);\n\
         \x20 window.{channel}={{\n\
         \x20   overlay:sr,\n\
         \x20   sendMessage:function(t,p){{\n\
         \x20     return window.webkit.messageHandlers.{channel}.postMessage(\n\
         \x20       JSON.stringify({{type:t,data:p}})\n\
         \x20     );\n\
         \x20   }},\n\
         \x20   extensions:{extensions_json}\n\
         \x20 }};\n\
         }})();\n"
    )
}

/// CSS 텍스트를 오버레이 섀도 루트에 `<style>`로 붙이는 스크립트
pub fn style_injection_script(css: &str) -> String {
    format!(
        "(function(){{var k=window.{MESSAGE_CHANNEL};if(!k||!k.overlay)return;\
         var s=document.createElement('style');s.textContent={};k.overlay.appendChild(s);}})();",
        js_string_literal(css)
    )
}

fn enabled_extensions_json(registry: &ExtensionRegistry) -> String {
    let infos: Vec<ExtensionInfo<'_>> = registry
        .enabled()
        .map(|m| ExtensionInfo {
            name: &m.name,
            version: &m.version,
        })
        .collect();
    serde_json::to_string(&infos).unwrap_or_else(|_| "[]".to_string())
}

/// 설치할 사용자 콘텐츠를 순서대로 만든다.
/// 주입 시점에 사라진 에셋 파일은 조용히 건너뛴다.
pub fn build_user_content(registry: &ExtensionRegistry, cursor_visible: bool) -> Vec<UserContent> {
    let mut content = Vec::new();

    if !cursor_visible {
        content.push(UserContent::StyleSheet(UserStyleSheet {
            source: HIDE_CURSOR_CSS.to_string(),
            frames: InjectedFrames::AllFrames,
        }));
    }

    content.push(UserContent::Script(UserScript::top_frame_end(bootstrap_script(
        &enabled_extensions_json(registry),
    ))));

    for ext in registry.enabled() {
        for path in ext.style_paths() {
            match std::fs::read_to_string(&path) {
                Ok(css) => content.push(UserContent::Script(UserScript::top_frame_end(
                    style_injection_script(&css),
                ))),
                Err(e) => tracing::debug!("Skipping style {}: {}", path.display(), e),
            }
        }
        for path in ext.script_paths() {
            match std::fs::read_to_string(&path) {
                Ok(js) => content.push(UserContent::Script(UserScript::top_frame_end(js))),
                Err(e) => tracing::debug!("Skipping script {}: {}", path.display(), e),
            }
        }
    }

    content
}

/// 엔진에 콘텐츠 설치. 첫 `load_uri` 이전에 호출되어야 한다.
pub fn install(engine: &mut dyn WebEngine, content: &[UserContent]) {
    for item in content {
        engine.add_user_content(item);
    }
    tracing::info!("Installed {} user content item(s)", content.len());
}
