//! `kiosk`: 키오스크 셸 관리 CLI
//!
//! ## 사용법
//! ```
//! kiosk open <url>                 # URL 열기 (설정 파일에도 저장)
//! kiosk reload                     # 현재 페이지 리로드
//! kiosk url                        # 현재 URL
//! kiosk status                     # 서비스 상태
//! kiosk restart                    # 서비스 재시작
//! kiosk logs [-f]                  # 서비스 로그 (journalctl)
//! kiosk volume [get]               # 볼륨 조회
//! kiosk volume set <0-100>
//! kiosk volume up|down|mute|unmute
//! kiosk clear-cache [-y]           # 캐시 삭제
//! kiosk clear-cookies [-y]         # 쿠키 삭제
//! kiosk clear-data [-y]            # 모든 브라우징 데이터 삭제
//! kiosk extension list             # 익스텐션 목록
//! kiosk extension enable <name>
//! kiosk extension disable <name>
//! kiosk config show                # 설정 표시
//! kiosk config set <key> <value>   # 설정 변경
//! kiosk api status                 # REST API 상태
//! kiosk api token show             # REST API 토큰
//! kiosk api token regenerate
//! ```

mod client;

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use kiosk_shell::audio::{self, Mixer, VOLUME_STEP};
use kiosk_shell::config::{self, ConfigFile, KioskConfig};
use kiosk_shell::extension;
use kiosk_shell::service::{self, ServiceControl};

use client::KioskClient;

#[tokio::main]
async fn main() {
    // 로그는 stderr로 (stdout은 명령 출력 전용)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    if args_ref.is_empty() || matches!(args_ref[0], "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }
    if matches!(args_ref[0], "--version" | "-V") {
        println!("kiosk {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let rest = &args_ref[1..];
    match args_ref[0] {
        "open" => cmd_open(rest).await,
        "reload" => cmd_reload().await,
        "url" => cmd_url().await,
        "status" => cmd_status().await,
        "restart" => cmd_restart().await,
        "logs" => cmd_logs(rest).await,
        "volume" => cmd_volume(rest).await,
        "clear-cache" => cmd_clear("cache", "disk and memory cache", rest).await,
        "clear-cookies" => cmd_clear("cookies", "all cookies", rest).await,
        "clear-data" => cmd_clear("all", "all browsing data (cache, cookies, storage)", rest).await,
        "extension" => cmd_extension(rest),
        "config" => cmd_config(rest).await,
        "api" => cmd_api(rest).await,
        other => bail!("unknown command: {} (run 'kiosk help' for usage)", other),
    }
}

fn print_help() {
    println!("kiosk {} - kiosk shell management", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Commands:");
    println!("  open <url>                Navigate to URL and save it as the start page");
    println!("  reload                    Reload the current page");
    println!("  url                       Print the current URL");
    println!("  status                    Show service status");
    println!("  restart                   Restart the kiosk service");
    println!("  logs [-f]                 Show service logs (follow with -f)");
    println!("  volume [get]              Show the master volume");
    println!("  volume set <0-100>        Set the master volume");
    println!("  volume up|down            Change the volume by {}%", VOLUME_STEP);
    println!("  volume mute|unmute");
    println!("  clear-cache [-y]          Clear disk and memory cache");
    println!("  clear-cookies [-y]        Clear cookies");
    println!("  clear-data [-y]           Clear all browsing data");
    println!("  extension list|enable|disable [name]");
    println!("  config show | set <key> <value>");
    println!("  api status | token show|regenerate");
}

// ═══════════════════════════════════════════════════════
// 공용 헬퍼
// ═══════════════════════════════════════════════════════

async fn connect() -> anyhow::Result<KioskClient> {
    KioskClient::connect(KioskConfig::load().bus).await
}

fn load_config() -> anyhow::Result<ConfigFile> {
    Ok(ConfigFile::load(config::config_path())?)
}

fn extensions_dir() -> PathBuf {
    KioskConfig::load()
        .extensions_dir
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_EXTENSIONS_DIR))
}

fn has_yes_flag(flags: &[&str]) -> bool {
    flags.iter().any(|f| matches!(*f, "-y" | "--yes"))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn confirm(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    is_affirmative(&answer)
}

// ═══════════════════════════════════════════════════════
// 명령어 핸들러
// ═══════════════════════════════════════════════════════

async fn cmd_open(args: &[&str]) -> anyhow::Result<()> {
    let Some(url) = args.first() else {
        bail!("usage: kiosk open <url>");
    };
    connect().await?.open(url).await?;

    let mut cfg = load_config()?;
    cfg.set("URL", url);
    if let Err(e) = cfg.save() {
        eprintln!("Warning: URL opened but not saved: {}", e);
    }
    println!("Opened {}", url);
    Ok(())
}

async fn cmd_reload() -> anyhow::Result<()> {
    connect().await?.reload().await?;
    println!("Reloaded");
    Ok(())
}

async fn cmd_url() -> anyhow::Result<()> {
    let url = connect().await?.get_url().await?;
    println!("{}", url);
    Ok(())
}

async fn cmd_status() -> anyhow::Result<()> {
    let status = ServiceControl::default().status().await;
    println!("Service:  {}", status.state);
    if let Some(since) = status.since {
        println!("Since:    {}", since);
    }

    let url = match connect().await {
        Ok(client) => client.get_url().await,
        Err(e) => Err(e),
    };
    match url {
        Ok(url) if url.is_empty() => println!("URL:      (no page loaded)"),
        Ok(url) => println!("URL:      {}", url),
        Err(e) => {
            tracing::debug!("status: {}", e);
            println!("URL:      (service not reachable)");
        }
    }
    Ok(())
}

async fn cmd_clear(scope: &str, description: &str, flags: &[&str]) -> anyhow::Result<()> {
    if !has_yes_flag(flags) && !confirm(&format!("Clear {}?", description)) {
        println!("Cancelled");
        return Ok(());
    }
    connect().await?.clear_data(scope).await?;
    println!("Cleared {}", description);
    Ok(())
}

fn cmd_extension(args: &[&str]) -> anyhow::Result<()> {
    let dir = extensions_dir();
    match args {
        ["list"] | [] => {
            let entries = extension::list_entries(&dir)?;
            if entries.is_empty() {
                println!("No extensions found.");
                return Ok(());
            }
            let width = entries.iter().map(|e| e.dir_name.len()).max().unwrap_or(4).max(4);
            println!("{:<width$}  {:<10}  STATUS", "NAME", "VERSION", width = width);
            for e in entries {
                let status = if e.enabled { "enabled" } else { "disabled" };
                println!("{:<width$}  {:<10}  {}", e.dir_name, e.version, status, width = width);
            }
            Ok(())
        }
        [action @ ("enable" | "disable"), name] => {
            let enable = *action == "enable";
            let (entry, changed) = extension::set_enabled(&dir, name, enable)?;
            let state = if enable { "enabled" } else { "disabled" };
            if changed {
                println!("Extension \"{}\" {}.", entry.dir_name, state);
                println!("Restart the kiosk to apply.");
            } else {
                println!("Extension \"{}\" is already {}.", entry.dir_name, state);
            }
            Ok(())
        }
        _ => bail!("usage: kiosk extension list | enable <name> | disable <name>"),
    }
}

async fn cmd_config(args: &[&str]) -> anyhow::Result<()> {
    match args {
        ["show"] | [] => {
            let cfg = load_config()?;
            for (key, value) in cfg.key_values() {
                if key == "API_TOKEN" {
                    continue;
                }
                println!("{}={}", key, value);
            }
            Ok(())
        }
        ["set", key, value] => {
            config::validate_entry(key, value)?;
            let mut cfg = load_config()?;
            cfg.set(key, value);
            cfg.save()?;
            println!("{}={}", key, value);

            if config::needs_restart(key) {
                println!("Restart the kiosk to apply.");
            } else {
                match connect().await {
                    Ok(client) => {
                        client.open(value).await?;
                        println!("Applied live.");
                    }
                    Err(e) => tracing::debug!("live apply skipped: {}", e),
                }
            }
            Ok(())
        }
        _ => bail!("usage: kiosk config show | set <key> <value>"),
    }
}

async fn cmd_restart() -> anyhow::Result<()> {
    ServiceControl::default().restart().await?;
    println!("Service restarted");
    Ok(())
}

async fn cmd_logs(args: &[&str]) -> anyhow::Result<()> {
    let follow = match args {
        [] => false,
        ["-f" | "--follow"] => true,
        _ => bail!("usage: kiosk logs [-f]"),
    };
    let status = tokio::process::Command::new("journalctl")
        .args(service::journal_args(service::SERVICE_NAME, follow))
        .status()
        .await
        .context("failed to run journalctl")?;
    if !status.success() {
        bail!("journalctl exited with {}", status);
    }
    Ok(())
}

async fn cmd_volume(args: &[&str]) -> anyhow::Result<()> {
    let mixer = Mixer::default();
    match args {
        [] | ["get"] => println!("Volume: {}", mixer.get().await?),
        ["set", level] => {
            let level = audio::parse_level(level)?;
            mixer.set(level).await?;
            println!("Volume: {}%", level);
        }
        [dir @ ("up" | "down")] => {
            let delta = if *dir == "up" { i16::from(VOLUME_STEP) } else { -i16::from(VOLUME_STEP) };
            let level = audio::step(mixer.get().await?.level, delta);
            mixer.set(level).await?;
            println!("Volume: {}%", level);
        }
        ["mute"] => {
            mixer.mute().await?;
            println!("Audio muted");
        }
        ["unmute"] => {
            mixer.unmute().await?;
            println!("Audio unmuted");
        }
        _ => bail!("usage: kiosk volume [get | set <0-100> | up | down | mute | unmute]"),
    }
    Ok(())
}

/// 설정 파일의 API_PORT (없거나 잘못되면 기본값)
fn api_port(cfg: &ConfigFile) -> u16 {
    cfg.get("API_PORT")
        .and_then(|p| p.trim().parse::<u16>().ok())
        .filter(|p| *p > 0)
        .unwrap_or(config::DEFAULT_API_PORT)
}

/// 로컬 포트에 2초 안에 TCP 연결이 되는지
async fn is_listening(port: u16) -> bool {
    let connect = tokio::net::TcpStream::connect(("127.0.0.1", port));
    matches!(tokio::time::timeout(Duration::from_secs(2), connect).await, Ok(Ok(_)))
}

async fn cmd_api(args: &[&str]) -> anyhow::Result<()> {
    match args {
        ["status"] => {
            let cfg = load_config()?;
            let port = api_port(&cfg);
            let configured = cfg.get("API_TOKEN").map(|t| !t.is_empty()).unwrap_or(false);

            let status = ServiceControl::default().status().await;
            println!("Service:   {}", status.state);
            println!("Port:      {}", port);
            println!("Token:     {}", if configured { "configured" } else { "not configured" });
            println!("Reachable: {}", if is_listening(port).await { "yes" } else { "no" });
            Ok(())
        }
        ["token", "show"] => {
            let cfg = load_config()?;
            match cfg.get("API_TOKEN").filter(|t| !t.is_empty()) {
                Some(token) => println!("{}", token),
                None => println!("API_TOKEN is not configured. Run: kiosk api token regenerate"),
            }
            Ok(())
        }
        ["token", "regenerate"] => {
            let token = config::generate_token();
            let mut cfg = load_config()?;
            cfg.set("API_TOKEN", &token);
            cfg.save()?;
            println!("New token: {}", token);
            println!("Restart the kiosk to apply.");
            Ok(())
        }
        _ => bail!("usage: kiosk api status | token show | token regenerate"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yes_flag() {
        assert!(has_yes_flag(&["-y"]));
        assert!(has_yes_flag(&["--yes"]));
        assert!(!has_yes_flag(&[]));
        assert!(!has_yes_flag(&["-n"]));
    }

    #[test]
    fn test_affirmative_answers() {
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative("\n"));
        assert!(!is_affirmative("no"));
    }

    #[tokio::test]
    async fn test_unknown_command_fails() {
        let err = run(vec!["frobnicate".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("unknown command: frobnicate"));
    }

    #[test]
    fn test_api_port_from_config() {
        let cfg = ConfigFile::parse("/tmp/kiosk-config", "API_PORT=\"9000\"\n");
        assert_eq!(api_port(&cfg), 9000);
        let cfg = ConfigFile::parse("/tmp/kiosk-config", "API_PORT=\"http\"\n");
        assert_eq!(api_port(&cfg), config::DEFAULT_API_PORT);
        let cfg = ConfigFile::parse("/tmp/kiosk-config", "");
        assert_eq!(api_port(&cfg), config::DEFAULT_API_PORT);
    }

    #[tokio::test]
    async fn test_is_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_listening(port).await);
    }

    #[tokio::test]
    async fn test_volume_set_validates_level() {
        let err = run(vec!["volume".into(), "set".into(), "150".into()])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "volume must be a number between 0 and 100");
    }

    #[tokio::test]
    async fn test_logs_rejects_unknown_flag() {
        let err = run(vec!["logs".into(), "--bogus".into()]).await.unwrap_err();
        assert!(err.to_string().starts_with("usage: kiosk logs"));
    }

    #[tokio::test]
    async fn test_config_set_rejects_unknown_key() {
        let err = run(vec!["config".into(), "set".into(), "BOGUS".into(), "1".into()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown config key: BOGUS"));
    }
}
