//! systemd 서비스 제어
//!
//! 셸은 `wpe-webkit-kiosk` 유닛으로 실행된다. 상태 조회는 `systemctl show`,
//! 재시작은 `sudo -n systemctl restart`, 로그는 `journalctl`을 사용한다.
//! 명령 앞부분은 [`ServiceControl`]에 보관되어 테스트에서 바꿀 수 있다.

use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;

pub const SERVICE_NAME: &str = "wpe-webkit-kiosk";

/// `kiosk logs`가 보여주는 최근 줄 수
pub const LOG_LINES: u32 = 100;

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: String },

    #[error("empty command")]
    EmptyCommand,
}

/// `GET /status`, `kiosk status`에 쓰이는 유닛 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    /// systemd ActiveState (`active`, `inactive`, …). 조회 실패 시 `unknown`.
    pub state: String,
    /// `active`일 때만 ActiveEnterTimestamp
    pub since: Option<String>,
}

/// 유닛 이름 + 명령 접두사
#[derive(Debug, Clone)]
pub struct ServiceControl {
    unit: String,
    query: Vec<String>,
    privileged: Vec<String>,
}

impl Default for ServiceControl {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl ServiceControl {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            query: vec!["systemctl".into()],
            privileged: vec!["sudo".into(), "-n".into(), "systemctl".into()],
        }
    }

    /// 조회용/권한용 `systemctl` 호출 접두사 교체
    pub fn with_commands(mut self, query: Vec<String>, privileged: Vec<String>) -> Self {
        self.query = query;
        self.privileged = privileged;
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// `systemctl show <unit> --property=<prop> --value`
    pub async fn property(&self, prop: &str) -> Option<String> {
        let mut args = vec!["show".to_string(), self.unit.clone()];
        args.push(format!("--property={}", prop));
        args.push("--value".into());

        let output = command(&self.query, &args).ok()?.output().await.ok()?;
        if !output.status.success() {
            tracing::debug!("systemctl show {} {} failed: {}", self.unit, prop, output.status);
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    pub async fn status(&self) -> ServiceStatus {
        let state = self
            .property("ActiveState")
            .await
            .unwrap_or_else(|| "unknown".to_string());
        let since = if state == "active" {
            self.property("ActiveEnterTimestamp").await
        } else {
            None
        };
        ServiceStatus { state, since }
    }

    /// 재시작이 끝날 때까지 기다린다 (CLI)
    pub async fn restart(&self) -> Result<(), ServiceError> {
        self.run_privileged(&["restart".to_string(), self.unit.clone()]).await
    }

    /// 재시작 작업만 큐에 넣고 바로 반환 (자기 자신을 재시작하는 REST API)
    pub async fn restart_detached(&self) -> Result<(), ServiceError> {
        self.run_privileged(&["restart".to_string(), "--no-block".to_string(), self.unit.clone()])
            .await
    }

    async fn run_privileged(&self, args: &[String]) -> Result<(), ServiceError> {
        let program = self.privileged.join(" ");
        tracing::info!("Running: {} {}", program, args.join(" "));
        let status = command(&self.privileged, args)?
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|source| ServiceError::Spawn {
                program: program.clone(),
                source,
            })?;
        if !status.success() {
            return Err(ServiceError::Failed {
                program,
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// `journalctl` 인자 목록
pub fn journal_args(unit: &str, follow: bool) -> Vec<String> {
    let mut args = vec![
        "-u".to_string(),
        unit.to_string(),
        "--no-pager".to_string(),
        "-n".to_string(),
        LOG_LINES.to_string(),
    ];
    if follow {
        args.push("-f".to_string());
    }
    args
}

fn command(prefix: &[String], args: &[String]) -> Result<Command, ServiceError> {
    let (program, head) = prefix.split_first().ok_or(ServiceError::EmptyCommand)?;
    let mut cmd = Command::new(program);
    cmd.args(head).args(args).kill_on_drop(true);
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into(), "sh".into()]
    }

    #[test]
    fn test_journal_args() {
        assert_eq!(
            journal_args("wpe-webkit-kiosk", false),
            ["-u", "wpe-webkit-kiosk", "--no-pager", "-n", "100"]
        );
        assert_eq!(journal_args("x", true).last().map(String::as_str), Some("-f"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_status_active_reports_since() {
        let ctl = ServiceControl::new("kiosk-test").with_commands(sh("echo active"), sh("true"));
        let status = ctl.status().await;
        assert_eq!(status.state, "active");
        assert_eq!(status.since.as_deref(), Some("active"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_status_unknown_when_query_fails() {
        let ctl = ServiceControl::new("kiosk-test").with_commands(sh("exit 1"), sh("true"));
        let status = ctl.status().await;
        assert_eq!(status, ServiceStatus { state: "unknown".into(), since: None });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_passes_unit_and_reports_failure() {
        let ok = ServiceControl::new("kiosk-test")
            .with_commands(sh("true"), sh(r#"[ "$1" = restart ] && [ "$2" = --no-block ] && [ "$3" = kiosk-test ]"#));
        assert!(ok.restart_detached().await.is_ok());

        let failing = ServiceControl::new("kiosk-test").with_commands(sh("true"), sh("exit 3"));
        let err = failing.restart().await.unwrap_err();
        assert!(matches!(err, ServiceError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_empty_command_is_error() {
        let ctl = ServiceControl::new("kiosk-test").with_commands(Vec::new(), Vec::new());
        assert!(matches!(ctl.restart().await, Err(ServiceError::EmptyCommand)));
        assert_eq!(ctl.property("ActiveState").await, None);
    }
}
