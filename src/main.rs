use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use kiosk_shell::api::{self, ApiState, ApiToken};
use kiosk_shell::browser::{self, LoopExit};
use kiosk_shell::config::{self, EngineBackend, KioskConfig};
use kiosk_shell::dbus;
use kiosk_shell::engine::cdp::{self, CdpOptions};
use kiosk_shell::engine::{EngineChannels, HeadlessEngine, WebEngine};
use kiosk_shell::extension::ExtensionRegistry;
use kiosk_shell::injector;
use kiosk_shell::message;
use kiosk_shell::service::ServiceControl;
use kiosk_shell::telemetry::TelemetryCollector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut cfg = KioskConfig::load();
    if let Some(url) = std::env::args().nth(1) {
        cfg.initial_url = url;
    }
    tracing::info!("Kiosk shell starting ({})", cfg.initial_url);

    // 익스텐션은 시작 시 한 번만 스캔
    let registry = Arc::new(ExtensionRegistry::scan(cfg.extensions_dir.as_deref()));
    let content = injector::build_user_content(&registry, cfg.cursor_visible);

    let (client, browser_task) = browser::spawn(Arc::clone(&registry), TelemetryCollector::default());

    // D-Bus 등록 실패는 치명적이지 않음 (페이지/REST API는 계속 동작)
    let _bus = match dbus::serve(cfg.bus, client.clone()).await {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::warn!("D-Bus service unavailable: {}", e);
            None
        }
    };

    if let Some(settings) = cfg.api.clone() {
        let state = ApiState {
            client: client.clone(),
            config_path: config::config_path(),
            extensions_dir: cfg
                .extensions_dir
                .clone()
                .unwrap_or_else(|| config::DEFAULT_EXTENSIONS_DIR.into()),
            service: ServiceControl::default(),
        };
        tokio::spawn(async move {
            if let Err(e) = api::serve(settings.port, state, ApiToken::new(settings.token)).await {
                tracing::error!("REST API error: {:#}", e);
            }
        });
    }

    let (mut engine, channels) = start_engine(&cfg.backend).await?;
    injector::install(engine.as_mut(), &content);
    engine.load_uri(&cfg.initial_url);

    let EngineChannels { events, messages } = channels;
    client
        .attach(engine, events)
        .await
        .context("browser loop stopped before the engine was attached")?;
    tokio::spawn(message::serve(messages, client.clone()));

    tokio::select! {
        exit = browser_task => match exit.context("browser loop panicked")? {
            LoopExit::EngineExited(reason) => anyhow::bail!("browser engine exited: {}", reason),
            LoopExit::Closed => {}
        },
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
        }
    }

    tracing::info!("Kiosk shell shutting down");
    Ok(())
}

async fn start_engine(backend: &EngineBackend) -> anyhow::Result<(Box<dyn WebEngine>, EngineChannels)> {
    match backend {
        EngineBackend::Headless => {
            tracing::info!("No browser configured, running headless");
            let (engine, channels) = HeadlessEngine::with_channels();
            Ok((Box::new(engine), channels))
        }
        EngineBackend::DevTools { executable, port } => {
            let (engine, channels) = cdp::launch(&CdpOptions::new(executable.clone(), *port))
                .await
                .context("starting browser engine")?;
            Ok((Box::new(engine), channels))
        }
    }
}

/// Ctrl+C 또는 SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
