//! 선언형 익스텐션 레지스트리
//!
//! 익스텐션 디렉토리의 서브디렉토리를 스캔하여 `manifest.json`을 파싱하고,
//! 페이지에 주입할 스크립트/스타일 목록을 검증된 형태로 보관합니다.
//! `.disabled` 마커 파일이 있는 익스텐션은 발견은 되지만 주입되지 않습니다.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

/// 익스텐션 매니페스트 파일명
pub const MANIFEST_FILE: &str = "manifest.json";
/// 존재만으로 익스텐션을 비활성화하는 마커 파일명
pub const DISABLED_MARKER: &str = ".disabled";

// ═══════════════════════════════════════════════════════════════
//  구조화된 에러 타입
// ═══════════════════════════════════════════════════════════════

/// 익스텐션 로드/조작 시 발생할 수 있는 에러.
#[derive(thiserror::Error, Debug)]
pub enum ExtensionError {
    #[error("missing manifest.json: {0}")]
    ManifestUnreadable(#[source] std::io::Error),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("manifest is not a JSON object")]
    NotAnObject,

    #[error("missing 'name' or 'version'")]
    MissingField,

    #[error("invalid manifest field: {0}")]
    InvalidField(#[source] serde_json::Error),

    #[error("referenced files missing: {}", .0.join(", "))]
    MissingAssets(Vec<String>),

    #[error("extension '{name}' not found (available: {})", .available.join(", "))]
    NotFound { name: String, available: Vec<String> },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ExtensionError {
    /// 머신 판별용 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ManifestUnreadable(_) => "manifest_not_found",
            Self::InvalidJson(_) => "invalid_json",
            Self::NotAnObject => "not_an_object",
            Self::MissingField => "missing_field",
            Self::InvalidField(_) => "invalid_field",
            Self::MissingAssets(_) => "missing_assets",
            Self::NotFound { .. } => "not_found",
            Self::Io { .. } => "io_error",
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Manifest 타입 정의
// ═══════════════════════════════════════════════════════════════

/// manifest.json을 역직렬화한 것.
/// `scripts`/`styles`는 매니페스트에 적힌 순서 그대로 주입된다.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtensionManifest {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub scripts: Option<Vec<String>>,
    #[serde(default)]
    pub styles: Option<Vec<String>>,
}

impl ExtensionManifest {
    /// 원본 텍스트에서 매니페스트 파싱. 객체가 아니거나 필수 필드가
    /// 문자열이 아니면 거부한다.
    pub fn parse(text: &str) -> Result<Self, ExtensionError> {
        let root: Value = serde_json::from_str(text).map_err(ExtensionError::InvalidJson)?;
        let obj = root.as_object().ok_or(ExtensionError::NotAnObject)?;

        let has_str = |key: &str| obj.get(key).map(Value::is_string).unwrap_or(false);
        if !has_str("name") || !has_str("version") {
            return Err(ExtensionError::MissingField);
        }

        serde_json::from_value(root).map_err(ExtensionError::InvalidField)
    }

    pub fn script_files(&self) -> &[String] {
        self.scripts.as_deref().unwrap_or_default()
    }

    pub fn style_files(&self) -> &[String] {
        self.styles.as_deref().unwrap_or_default()
    }
}

// ═══════════════════════════════════════════════════════════════
//  발견된 익스텐션
// ═══════════════════════════════════════════════════════════════

/// 검증을 통과한 익스텐션. 생성 이후 변경되지 않는다.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionMeta {
    pub name: String,
    pub version: String,
    /// 익스텐션 디렉토리 절대 경로
    pub dir: PathBuf,
    pub scripts: Vec<String>,
    pub styles: Vec<String>,
    pub enabled: bool,
}

impl ExtensionMeta {
    pub fn script_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.scripts.iter().filter_map(|f| asset_path(&self.dir, f))
    }

    pub fn style_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.styles.iter().filter_map(|f| asset_path(&self.dir, f))
    }

    pub fn summary(&self) -> ExtensionSummary {
        ExtensionSummary {
            name: self.name.clone(),
            version: self.version.clone(),
            enabled: self.enabled,
        }
    }
}

/// `ListExtensions` 응답 항목: (name, version, enabled)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionSummary {
    pub name: String,
    pub version: String,
    pub enabled: bool,
}

impl From<ExtensionSummary> for (String, String, bool) {
    fn from(s: ExtensionSummary) -> Self {
        (s.name, s.version, s.enabled)
    }
}

/// 익스텐션 디렉토리 안의 에셋 경로.
/// 절대 경로나 `..`가 들어간 이름은 디렉토리 밖을 가리키므로 `None`.
pub fn asset_path(dir: &Path, name: &str) -> Option<PathBuf> {
    let rel = Path::new(name);
    let inside = !name.is_empty()
        && rel
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    inside.then(|| dir.join(rel))
}

/// 단일 익스텐션 디렉토리 로드 + 검증.
/// 활성 익스텐션은 참조한 파일이 전부 일반 파일로 존재해야 한다.
pub fn load_extension(dir: &Path) -> Result<ExtensionMeta, ExtensionError> {
    let text = std::fs::read_to_string(dir.join(MANIFEST_FILE))
        .map_err(ExtensionError::ManifestUnreadable)?;
    let manifest = ExtensionManifest::parse(&text)?;

    let enabled = !dir.join(DISABLED_MARKER).exists();

    if enabled {
        let missing: Vec<String> = manifest
            .script_files()
            .iter()
            .chain(manifest.style_files())
            .filter(|f| !asset_path(dir, f).map(|p| p.is_file()).unwrap_or(false))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ExtensionError::MissingAssets(missing));
        }
    }

    let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());

    Ok(ExtensionMeta {
        name: manifest.name,
        version: manifest.version,
        dir,
        scripts: manifest.scripts.unwrap_or_default(),
        styles: manifest.styles.unwrap_or_default(),
        enabled,
    })
}

/// 서브디렉토리 목록을 이름순으로 정렬해 반환.
/// 디렉토리 나열 순서는 파일시스템마다 다르므로 항상 정렬한다.
fn sorted_subdirs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Failed to read directory entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════
//  ExtensionRegistry
// ═══════════════════════════════════════════════════════════════

/// 프로세스 시작 시 한 번 스캔되는 익스텐션 목록 (스캔 순서 유지)
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    extensions: Vec<ExtensionMeta>,
}

impl ExtensionRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 익스텐션 디렉토리 스캔. 디렉토리가 없거나 설정되지 않았으면 빈 레지스트리.
    /// 잘못된 항목은 경고 후 건너뛰고 나머지는 계속 스캔한다.
    pub fn scan(extensions_dir: Option<&Path>) -> Self {
        let dir = match extensions_dir {
            Some(d) if d.is_dir() => d,
            other => {
                tracing::info!(
                    "Extensions: directory not found ({}), skipping",
                    other
                        .map(|d| d.display().to_string())
                        .unwrap_or_else(|| "not set".to_string())
                );
                return Self::empty();
            }
        };

        let subdirs = match sorted_subdirs(dir) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("Extensions: cannot open directory {}: {}", dir.display(), e);
                return Self::empty();
            }
        };

        let mut extensions = Vec::new();
        for path in subdirs {
            let entry = dir_name(&path);
            match load_extension(&path) {
                Ok(meta) => {
                    tracing::info!(
                        "Extension '{}' v{}: {}",
                        meta.name,
                        meta.version,
                        if meta.enabled { "loaded" } else { "disabled" }
                    );
                    extensions.push(meta);
                }
                Err(e) => {
                    tracing::warn!("Extension '{}': {}, skipping", entry, e);
                }
            }
        }

        tracing::info!("Extension scan complete: {} found", extensions.len());
        Self { extensions }
    }

    pub fn from_extensions(extensions: Vec<ExtensionMeta>) -> Self {
        Self { extensions }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtensionMeta> {
        self.extensions.iter()
    }

    /// 활성 익스텐션만 (스캔 순서)
    pub fn enabled(&self) -> impl Iterator<Item = &ExtensionMeta> {
        self.extensions.iter().filter(|e| e.enabled)
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// 현재 레지스트리 스냅샷 (스캔 순서)
    pub fn summaries(&self) -> Vec<ExtensionSummary> {
        self.extensions.iter().map(ExtensionMeta::summary).collect()
    }
}

// ═══════════════════════════════════════════════════════════════
//  관리 도구용 목록 / 활성화 토글
// ═══════════════════════════════════════════════════════════════

/// CLI/REST API 목록 항목. 에셋 검증 없이 매니페스트만 본다.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionEntry {
    pub dir_name: String,
    pub name: String,
    pub version: String,
    pub enabled: bool,
}

/// 디렉토리의 익스텐션 목록 (이름이 비어 있지 않은 매니페스트만).
/// 디렉토리가 없으면 빈 목록.
pub fn list_entries(extensions_dir: &Path) -> Result<Vec<ExtensionEntry>, ExtensionError> {
    let subdirs = match sorted_subdirs(extensions_dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ExtensionError::io(extensions_dir, e)),
    };

    let entries = subdirs
        .into_iter()
        .filter_map(|path| {
            let text = std::fs::read_to_string(path.join(MANIFEST_FILE)).ok()?;
            let manifest = ExtensionManifest::parse(&text).ok()?;
            if manifest.name.is_empty() {
                return None;
            }
            Some(ExtensionEntry {
                dir_name: dir_name(&path),
                name: manifest.name,
                version: manifest.version,
                enabled: !path.join(DISABLED_MARKER).exists(),
            })
        })
        .collect();
    Ok(entries)
}

/// 디렉토리명 또는 매니페스트 이름으로 익스텐션 검색
pub fn find_entry(extensions_dir: &Path, name: &str) -> Result<ExtensionEntry, ExtensionError> {
    let entries = list_entries(extensions_dir)?;
    entries
        .iter()
        .find(|e| e.dir_name == name || e.name == name)
        .cloned()
        .ok_or_else(|| ExtensionError::NotFound {
            name: name.to_string(),
            available: entries.iter().map(|e| e.dir_name.clone()).collect(),
        })
}

/// `.disabled` 마커를 생성/삭제하여 활성 상태를 바꾼다.
/// 상태가 실제로 바뀌었으면 `true`. 적용은 다음 시작 시점.
pub fn set_enabled(
    extensions_dir: &Path,
    name: &str,
    enabled: bool,
) -> Result<(ExtensionEntry, bool), ExtensionError> {
    let mut entry = find_entry(extensions_dir, name)?;
    if entry.enabled == enabled {
        return Ok((entry, false));
    }

    let marker = extensions_dir.join(&entry.dir_name).join(DISABLED_MARKER);
    if enabled {
        std::fs::remove_file(&marker).map_err(|e| ExtensionError::io(&marker, e))?;
    } else {
        std::fs::File::create(&marker).map_err(|e| ExtensionError::io(&marker, e))?;
    }

    tracing::info!(
        "Extension '{}' {}",
        entry.dir_name,
        if enabled { "enabled" } else { "disabled" }
    );
    entry.enabled = enabled;
    Ok((entry, true))
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn write_ext(root: &Path, dir: &str, manifest: &str, files: &[&str]) -> PathBuf {
        let ext_dir = root.join(dir);
        std::fs::create_dir_all(&ext_dir).unwrap();
        std::fs::write(ext_dir.join(MANIFEST_FILE), manifest).unwrap();
        for f in files {
            std::fs::write(ext_dir.join(f), "/* asset */").unwrap();
        }
        ext_dir
    }

    #[test]
    fn test_manifest_parse_full() {
        let m = ExtensionManifest::parse(
            r#"{"name":"Perf","version":"1.2.0","scripts":["a.js","b.js"],"styles":["s.css"]}"#,
        )
        .unwrap();
        assert_eq!(m.name, "Perf");
        assert_eq!(m.script_files(), ["a.js", "b.js"]);
        assert_eq!(m.style_files(), ["s.css"]);
    }

    #[test]
    fn test_manifest_parse_rejects_non_object() {
        let err = ExtensionManifest::parse(r#"["A","1.0"]"#).unwrap_err();
        assert_eq!(err.error_code(), "not_an_object");
    }

    #[test]
    fn test_manifest_parse_rejects_missing_version() {
        let err = ExtensionManifest::parse(r#"{"name":"A"}"#).unwrap_err();
        assert_eq!(err.error_code(), "missing_field");

        let err = ExtensionManifest::parse(r#"{"name":"A","version":3}"#).unwrap_err();
        assert_eq!(err.error_code(), "missing_field");
    }

    #[test]
    fn test_manifest_parse_rejects_bad_lists() {
        let err =
            ExtensionManifest::parse(r#"{"name":"A","version":"1","scripts":"x.js"}"#).unwrap_err();
        assert_eq!(err.error_code(), "invalid_field");
    }

    #[test]
    fn test_scan_single_enabled_extension() {
        let tmp = tempfile::tempdir().unwrap();
        write_ext(
            tmp.path(),
            "ext-a",
            r#"{"name":"A","version":"1.0","scripts":["x.js"]}"#,
            &["x.js"],
        );

        let registry = ExtensionRegistry::scan(Some(tmp.path()));
        assert_eq!(registry.len(), 1);
        let ext = registry.iter().next().unwrap();
        assert_eq!(ext.name, "A");
        assert_eq!(ext.version, "1.0");
        assert!(ext.enabled);
        assert!(ext.dir.is_absolute());
        assert_eq!(
            registry.summaries(),
            vec![ExtensionSummary {
                name: "A".into(),
                version: "1.0".into(),
                enabled: true
            }]
        );
    }

    #[test]
    fn test_scan_disabled_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_ext(tmp.path(), "ext-b", r#"{"name":"B","version":"2.0"}"#, &[]);
        std::fs::write(dir.join(DISABLED_MARKER), "").unwrap();

        let registry = ExtensionRegistry::scan(Some(tmp.path()));
        assert_eq!(registry.len(), 1);
        assert!(!registry.iter().next().unwrap().enabled);
        assert_eq!(registry.enabled().count(), 0);
    }

    #[test]
    fn test_scan_rejects_enabled_extension_with_missing_asset() {
        let tmp = tempfile::tempdir().unwrap();
        write_ext(
            tmp.path(),
            "broken",
            r#"{"name":"Broken","version":"1","scripts":["here.js"],"styles":["gone.css"]}"#,
            &["here.js"],
        );

        let registry = ExtensionRegistry::scan(Some(tmp.path()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_scan_keeps_disabled_extension_with_missing_asset() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_ext(
            tmp.path(),
            "later",
            r#"{"name":"Later","version":"1","scripts":["gone.js"]}"#,
            &[],
        );
        std::fs::write(dir.join(DISABLED_MARKER), "").unwrap();

        let registry = ExtensionRegistry::scan(Some(tmp.path()));
        assert_eq!(registry.len(), 1);
        assert!(!registry.iter().next().unwrap().enabled);
    }

    #[test]
    fn test_asset_path_stays_inside_extension() {
        let dir = Path::new("/ext/clock");
        assert_eq!(asset_path(dir, "main.js"), Some(PathBuf::from("/ext/clock/main.js")));
        assert_eq!(asset_path(dir, "lib/util.js"), Some(PathBuf::from("/ext/clock/lib/util.js")));
        assert_eq!(asset_path(dir, "/etc/hostname"), None);
        assert_eq!(asset_path(dir, "../other/main.js"), None);
        assert_eq!(asset_path(dir, ""), None);
    }

    #[test]
    fn test_scan_rejects_asset_outside_extension() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("outside.js"), "/* not ours */").unwrap();
        write_ext(
            tmp.path(),
            "abs",
            r#"{"name":"Abs","version":"1","scripts":["/etc/hostname"]}"#,
            &[],
        );
        write_ext(
            tmp.path(),
            "dotdot",
            r#"{"name":"DotDot","version":"1","scripts":["../outside.js"]}"#,
            &[],
        );

        let reg = ExtensionRegistry::scan(Some(tmp.path()));
        assert!(reg.is_empty());

        let err = load_extension(&tmp.path().join("abs")).unwrap_err();
        assert_eq!(err.error_code(), "missing_assets");
    }

    #[test]
    fn test_scan_asset_must_be_regular_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_ext(
            tmp.path(),
            "dir-asset",
            r#"{"name":"D","version":"1","styles":["css"]}"#,
            &[],
        );
        std::fs::create_dir_all(dir.join("css")).unwrap();

        assert!(ExtensionRegistry::scan(Some(tmp.path())).is_empty());
    }

    #[test]
    fn test_scan_skips_bad_entries_and_continues() {
        let tmp = tempfile::tempdir().unwrap();
        write_ext(tmp.path(), "a-bad-json", "{not json", &[]);
        write_ext(tmp.path(), "b-array", "[1,2]", &[]);
        write_ext(tmp.path(), "c-no-name", r#"{"version":"1"}"#, &[]);
        std::fs::create_dir_all(tmp.path().join("d-no-manifest")).unwrap();
        std::fs::write(tmp.path().join("stray-file.txt"), "x").unwrap();
        write_ext(tmp.path(), "e-good", r#"{"name":"Good","version":"1"}"#, &[]);

        let registry = ExtensionRegistry::scan(Some(tmp.path()));
        let names: Vec<_> = registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Good"]);
    }

    #[test]
    fn test_scan_order_is_sorted_by_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write_ext(tmp.path(), "zeta", r#"{"name":"Z","version":"1"}"#, &[]);
        write_ext(tmp.path(), "alpha", r#"{"name":"A","version":"1"}"#, &[]);
        write_ext(tmp.path(), "mid", r#"{"name":"M","version":"1"}"#, &[]);

        let registry = ExtensionRegistry::scan(Some(tmp.path()));
        let names: Vec<_> = registry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["A", "M", "Z"]);
    }

    #[test]
    fn test_scan_missing_directory_is_empty() {
        let registry = ExtensionRegistry::scan(Some(Path::new("/nonexistent/kiosk/extensions")));
        assert!(registry.is_empty());
        assert!(ExtensionRegistry::scan(None).is_empty());
    }

    #[test]
    fn test_bundled_extensions_load() {
        let dir = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/extensions"));
        let registry = ExtensionRegistry::scan(Some(dir));
        let perf = registry
            .iter()
            .find(|e| e.name == "Performance")
            .expect("bundled Performance extension");
        assert!(perf.enabled);
        assert_eq!(perf.script_paths().count(), 1);
        assert_eq!(perf.style_paths().count(), 1);
    }

    #[test]
    fn test_list_entries_ignores_asset_validation() {
        let tmp = tempfile::tempdir().unwrap();
        write_ext(
            tmp.path(),
            "perf",
            r#"{"name":"Performance","version":"0.3","scripts":["missing.js"]}"#,
            &[],
        );

        let entries = list_entries(tmp.path()).unwrap();
        assert_eq!(
            entries,
            vec![ExtensionEntry {
                dir_name: "perf".into(),
                name: "Performance".into(),
                version: "0.3".into(),
                enabled: true,
            }]
        );
    }

    #[test]
    fn test_list_entries_missing_dir() {
        assert!(list_entries(Path::new("/nonexistent/kiosk/extensions"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_set_enabled_toggles_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_ext(tmp.path(), "perf", r#"{"name":"Performance","version":"1"}"#, &[]);

        let (entry, changed) = set_enabled(tmp.path(), "perf", false).unwrap();
        assert!(changed);
        assert!(!entry.enabled);
        assert!(dir.join(DISABLED_MARKER).exists());

        // 이미 비활성 → no-op
        let (_, changed) = set_enabled(tmp.path(), "Performance", false).unwrap();
        assert!(!changed);

        let (entry, changed) = set_enabled(tmp.path(), "Performance", true).unwrap();
        assert!(changed);
        assert!(entry.enabled);
        assert!(!dir.join(DISABLED_MARKER).exists());
    }

    #[test]
    fn test_set_enabled_unknown_extension() {
        let tmp = tempfile::tempdir().unwrap();
        write_ext(tmp.path(), "perf", r#"{"name":"Performance","version":"1"}"#, &[]);

        let err = set_enabled(tmp.path(), "nope", true).unwrap_err();
        assert_eq!(err.error_code(), "not_found");
        assert!(err.to_string().contains("perf"));
    }
}
