//! 셸 D-Bus 서비스 접속

use anyhow::anyhow;
use kiosk_shell::config::BusKind;
use kiosk_shell::dbus::{self, KioskProxy};

const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";

pub struct KioskClient {
    proxy: KioskProxy<'static>,
}

impl KioskClient {
    pub async fn connect(bus: BusKind) -> anyhow::Result<Self> {
        let proxy = dbus::connect(bus)
            .await
            .map_err(|e| anyhow!("failed to connect to {:?} bus: {}", bus, e))?;
        Ok(Self { proxy })
    }

    pub async fn open(&self, url: &str) -> anyhow::Result<()> {
        self.proxy.open(url).await.map_err(|e| describe(e, "Open"))
    }

    pub async fn reload(&self) -> anyhow::Result<()> {
        self.proxy.reload().await.map_err(|e| describe(e, "Reload"))
    }

    pub async fn get_url(&self) -> anyhow::Result<String> {
        self.proxy.get_url().await.map_err(|e| describe(e, "GetUrl"))
    }

    pub async fn clear_data(&self, scope: &str) -> anyhow::Result<()> {
        self.proxy
            .clear_data(scope)
            .await
            .map_err(|e| describe(e, "ClearData"))
    }
}

fn is_service_unknown(err: &zbus::Error) -> bool {
    match err {
        zbus::Error::MethodError(name, _, _) => name.as_str() == SERVICE_UNKNOWN,
        zbus::Error::FDO(e) => matches!(**e, zbus::fdo::Error::ServiceUnknown(_)),
        _ => false,
    }
}

/// 서비스 미실행은 사람이 읽을 수 있는 메시지로
pub fn describe(err: zbus::Error, method: &str) -> anyhow::Error {
    if is_service_unknown(&err) {
        anyhow!("kiosk service is not running")
    } else {
        anyhow!("D-Bus {} failed: {}", method, err)
    }
}
