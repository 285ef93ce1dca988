//! D-Bus 어댑터 (`com.wpe.Kiosk`)
//!
//! 외부 프로세스용 컨트롤 플레인. 메서드 호출을 [`BrowserClient`]로 넘기고
//! [`CommandError`]를 `com.wpe.Kiosk.Error.*` 오류로 변환한다.
//! 같은 인터페이스의 클라이언트 프록시([`KioskProxy`])도 여기서 정의한다.

use zbus::interface;

use crate::browser::BrowserClient;
use crate::command::CommandError;
use crate::config::BusKind;

pub const BUS_NAME: &str = "com.wpe.Kiosk";
pub const OBJECT_PATH: &str = "/";
pub const INTERFACE_NAME: &str = "com.wpe.Kiosk";

#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "com.wpe.Kiosk.Error")]
pub enum KioskError {
    #[zbus(error)]
    ZBus(zbus::Error),
    InvalidScope(String),
    NotReady(String),
    Failed(String),
}

impl From<CommandError> for KioskError {
    fn from(err: CommandError) -> Self {
        let msg = err.to_string();
        match err {
            CommandError::InvalidScope(_) => Self::InvalidScope(msg),
            CommandError::NotReady => Self::NotReady(msg),
            CommandError::Engine(_) | CommandError::Unavailable => Self::Failed(msg),
        }
    }
}

pub struct KioskService {
    client: BrowserClient,
}

impl KioskService {
    pub fn new(client: BrowserClient) -> Self {
        Self { client }
    }
}

#[interface(name = "com.wpe.Kiosk")]
impl KioskService {
    async fn open(&self, url: String) -> Result<(), KioskError> {
        tracing::info!("[D-Bus] Open {}", url);
        Ok(self.client.open(&url).await?)
    }

    async fn reload(&self) -> Result<(), KioskError> {
        tracing::info!("[D-Bus] Reload");
        Ok(self.client.reload().await?)
    }

    async fn get_url(&self) -> Result<String, KioskError> {
        Ok(self.client.get_url().await?)
    }

    async fn clear_data(&self, scope: String) -> Result<(), KioskError> {
        tracing::info!("[D-Bus] ClearData {}", scope);
        Ok(self.client.clear_data(&scope).await?)
    }

    async fn list_extensions(&self) -> Result<Vec<(String, String, bool)>, KioskError> {
        let list = self.client.list_extensions().await?;
        Ok(list.into_iter().map(Into::into).collect())
    }
}

/// 버스에 이름을 등록하고 서비스 객체를 노출한다.
/// 반환된 연결이 살아 있는 동안 서비스가 유지된다.
pub async fn serve(bus: BusKind, client: BrowserClient) -> zbus::Result<zbus::Connection> {
    let builder = match bus {
        BusKind::System => zbus::connection::Builder::system()?,
        BusKind::Session => zbus::connection::Builder::session()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, KioskService::new(client))?
        .build()
        .await?;
    tracing::info!("D-Bus service {} registered on {:?} bus", BUS_NAME, bus);
    Ok(conn)
}

/// 셸에 접속하는 클라이언트 프록시 (kiosk CLI가 사용)
#[zbus::proxy(
    interface = "com.wpe.Kiosk",
    default_service = "com.wpe.Kiosk",
    default_path = "/",
    gen_blocking = false
)]
pub trait Kiosk {
    fn open(&self, url: &str) -> zbus::Result<()>;

    fn reload(&self) -> zbus::Result<()>;

    fn get_url(&self) -> zbus::Result<String>;

    fn clear_data(&self, scope: &str) -> zbus::Result<()>;

    fn list_extensions(&self) -> zbus::Result<Vec<(String, String, bool)>>;
}

/// 버스 연결 후 프록시 생성
pub async fn connect(bus: BusKind) -> zbus::Result<KioskProxy<'static>> {
    let conn = match bus {
        BusKind::System => zbus::Connection::system().await?,
        BusKind::Session => zbus::Connection::session().await?,
    };
    KioskProxy::new(&conn).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::DBusError;

    #[test]
    fn test_error_names() {
        let err = KioskError::from(CommandError::InvalidScope("bogus".into()));
        assert_eq!(err.name().as_str(), "com.wpe.Kiosk.Error.InvalidScope");
        assert_eq!(err.description(), Some("Scope must be 'cache', 'cookies', or 'all'"));

        let err = KioskError::from(CommandError::NotReady);
        assert_eq!(err.name().as_str(), "com.wpe.Kiosk.Error.NotReady");
        assert_eq!(err.description(), Some("Kiosk session not initialized"));

        let err = KioskError::from(CommandError::Engine("quota exceeded".into()));
        assert_eq!(err.name().as_str(), "com.wpe.Kiosk.Error.Failed");
        assert_eq!(err.description(), Some("quota exceeded"));
    }
}
