//! Shared utility functions for the kiosk shell.

use std::path::Path;

/// 텍스트 파일을 읽어 반환. 실패하면 경고를 남기고 `None`.
pub fn read_text_file(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(e) => {
            tracing::warn!("Cannot read file {}: {}", path.display(), e);
            None
        }
    }
}

/// 조용한 버전: 텔레메트리처럼 소스가 없을 수 있는 곳에서 사용
pub fn read_text_quiet(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok()
}

/// 공백 제거 후 비어 있으면 `None`
pub fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

/// 문자열을 JS/JSON 문자열 리터럴로 인코딩 (따옴표 포함).
/// 스크립트 템플릿에 값을 끼워 넣을 때 사용한다.
pub fn js_string_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// `value`를 소수점 `digits` 자리로 반올림
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}
