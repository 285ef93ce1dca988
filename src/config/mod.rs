//! 키오스크 설정
//!
//! 두 층으로 구성된다:
//! - [`ConfigFile`]: `/etc/wpe-webkit-kiosk/config`의 `KEY="value"` 줄 단위 파일.
//!   주석과 빈 줄은 저장 시 그대로 보존된다 (CLI/REST API가 편집).
//! - [`KioskConfig`]: 셸 기동 시 환경 변수 + 설정 파일을 합친 결과.
//!   환경 변수가 항상 우선한다.

use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wpe-webkit-kiosk/config";
pub const DEFAULT_URL: &str = "https://wpewebkit.org";
pub const DEFAULT_EXTENSIONS_DIR: &str = "/usr/share/wpe-webkit-kiosk/extensions";
pub const DEFAULT_API_PORT: u16 = 8100;
pub const DEFAULT_DEBUG_PORT: u16 = 9222;

/// 인식하는 설정 키
pub const VALID_KEYS: &[&str] = &[
    "URL",
    "INSPECTOR_PORT",
    "INSPECTOR_HTTP_PORT",
    "VNC_ENABLED",
    "VNC_PORT",
    "EXTENSIONS_DIR",
    "CURSOR_VISIBLE",
    "API_PORT",
    "API_TOKEN",
    "BROWSER",
    "DBUS_BUS",
];

/// 재시작 없이 적용 가능한 키
pub const LIVE_KEYS: &[&str] = &["URL"];

const BROWSER_CANDIDATES: &[&str] = &["chromium", "chromium-browser", "google-chrome"];

pub fn is_valid_key(key: &str) -> bool {
    VALID_KEYS.contains(&key)
}

pub fn needs_restart(key: &str) -> bool {
    !LIVE_KEYS.contains(&key)
}

const PORT_KEYS: &[&str] = &["INSPECTOR_PORT", "INSPECTOR_HTTP_PORT", "VNC_PORT", "API_PORT"];

/// 저장 전 키/값 검증: 포트 키는 1..=65535 정수만 허용
pub fn validate_entry(key: &str, value: &str) -> Result<(), ConfigError> {
    if !is_valid_key(key) {
        return Err(ConfigError::UnknownKey(key.to_string()));
    }
    if PORT_KEYS.contains(&key) && !matches!(value.trim().parse::<u16>(), Ok(p) if p > 0) {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        });
    }
    Ok(())
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown config key: {0}")]
    UnknownKey(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Read { .. } | Self::Write { .. } => "config_io",
            Self::UnknownKey(_) => "unknown_key",
            Self::InvalidValue { .. } => "invalid_value",
        }
    }
}

/// 설정 파일 경로: `WPE_KIOSK_CONFIG`로 덮어쓸 수 있음
pub fn config_path() -> PathBuf {
    std::env::var_os("WPE_KIOSK_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ═══════════════════════════════════════════════════════════════
//  줄 단위 설정 파일
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    raw: String,
    key: Option<String>,
    value: String,
}

impl Line {
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let mut line = Line {
            raw: raw.to_string(),
            key: None,
            value: String::new(),
        };
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return line;
        }
        if let Some(idx) = trimmed.find('=') {
            if idx > 0 {
                line.key = Some(trimmed[..idx].trim().to_string());
                line.value = trimmed[idx + 1..].trim().trim_matches('"').to_string();
            }
        }
        line
    }

    fn entry(key: &str, value: &str) -> Self {
        Line {
            raw: format!("{}=\"{}\"", key, value),
            key: Some(key.to_string()),
            value: value.to_string(),
        }
    }
}

/// `KEY="value"` 형식의 설정 파일. 알 수 없는 줄도 원문 그대로 유지한다.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    path: PathBuf,
    lines: Vec<Line>,
}

impl ConfigFile {
    /// 파일을 읽는다. 파일이 없으면 빈 설정으로 시작한다.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        Ok(Self::parse(path, &content))
    }

    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Self {
        Self {
            path: path.into(),
            lines: content.lines().map(Line::parse).collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines
            .iter()
            .find(|l| l.key.as_deref() == Some(key))
            .map(|l| l.value.as_str())
    }

    /// 기존 키를 갱신하거나 끝에 추가
    pub fn set(&mut self, key: &str, value: &str) {
        match self.lines.iter_mut().find(|l| l.key.as_deref() == Some(key)) {
            Some(line) => *line = Line::entry(key, value),
            None => self.lines.push(Line::entry(key, value)),
        }
    }

    /// 키/값 쌍을 파일 순서대로
    pub fn key_values(&self) -> Vec<(String, String)> {
        self.lines
            .iter()
            .filter_map(|l| l.key.as_ref().map(|k| (k.clone(), l.value.clone())))
            .collect()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.raw);
            out.push('\n');
        }
        out
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                    path: self.path.clone(),
                    source,
                })?;
            }
        }
        std::fs::write(&self.path, self.render()).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })?;
        tracing::debug!("Config saved to {}", self.path.display());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  런타임 설정
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    System,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineBackend {
    /// 디스플레이 없이 컨트롤 플레인만
    Headless,
    /// Chromium 계열 브라우저를 DevTools 프로토콜로 구동
    DevTools { executable: String, port: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub port: u16,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KioskConfig {
    /// 명령행 인자가 없을 때의 첫 페이지
    pub initial_url: String,
    pub extensions_dir: Option<PathBuf>,
    pub cursor_visible: bool,
    pub backend: EngineBackend,
    pub bus: BusKind,
    /// 토큰이 설정된 경우에만 REST API를 띄운다
    pub api: Option<ApiSettings>,
}

impl KioskConfig {
    /// 실제 프로세스 환경 + 기본 경로의 설정 파일
    pub fn load() -> Self {
        let file = match ConfigFile::load(config_path()) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!("Config file ignored: {}", e);
                None
            }
        };
        Self::from_sources(|k| std::env::var(k).ok(), file.as_ref())
    }

    pub fn from_sources<F>(env: F, file: Option<&ConfigFile>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |env_key: &str, file_key: &str| -> Option<String> {
            env(env_key)
                .or_else(|| file.and_then(|f| f.get(file_key)).map(str::to_string))
                .filter(|v| !v.is_empty())
        };

        let extensions_dir = lookup("WPE_KIOSK_EXTENSIONS_DIR", "EXTENSIONS_DIR").map(PathBuf::from);
        let cursor_visible = lookup("WPE_KIOSK_CURSOR_VISIBLE", "CURSOR_VISIBLE")
            .map(|v| v != "false")
            .unwrap_or(true);

        let port = parse_port(lookup("WPE_KIOSK_DEBUG_PORT", "INSPECTOR_PORT"), DEFAULT_DEBUG_PORT);
        let backend = match lookup("WPE_KIOSK_BROWSER", "BROWSER") {
            Some(v) if v == "none" || v == "headless" => EngineBackend::Headless,
            Some(executable) => EngineBackend::DevTools { executable, port },
            None => match find_browser() {
                Some(executable) => EngineBackend::DevTools { executable, port },
                None => EngineBackend::Headless,
            },
        };

        let bus = match lookup("WPE_KIOSK_DBUS_BUS", "DBUS_BUS").as_deref() {
            Some("session") => BusKind::Session,
            _ => BusKind::System,
        };

        let api = lookup("WPE_KIOSK_API_TOKEN", "API_TOKEN").map(|token| ApiSettings {
            port: parse_port(lookup("WPE_KIOSK_API_PORT", "API_PORT"), DEFAULT_API_PORT),
            token,
        });

        Self {
            initial_url: lookup("WPE_KIOSK_URL", "URL").unwrap_or_else(|| DEFAULT_URL.to_string()),
            extensions_dir,
            cursor_visible,
            backend,
            bus,
            api,
        }
    }
}

fn parse_port(value: Option<String>, default: u16) -> u16 {
    match value {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid port '{}', using {}", v, default);
            default
        }),
        None => default,
    }
}

/// PATH에서 첫 번째로 발견되는 Chromium 계열 실행 파일
fn find_browser() -> Option<String> {
    let path = std::env::var_os("PATH")?;
    BROWSER_CANDIDATES
        .iter()
        .find(|name| std::env::split_paths(&path).any(|dir| dir.join(name).is_file()))
        .map(|name| name.to_string())
}

/// 새 API 토큰 (하이픈 없는 32자 hex)
pub fn generate_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
