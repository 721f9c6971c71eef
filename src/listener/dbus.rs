//! Session-bus service.
//!
//! Method calls are forwarded to the coordinator as [`SessionSignal`]s; the
//! interface never touches coordinator state directly. `GetActive` and
//! `GetActiveTime` are answered from a mirror the coordinator keeps current.

use super::SessionBus;
use crate::domain::{Event, SessionSignal, StatusMessage};
use crate::error::StartError;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use zbus::fdo::{self, RequestNameFlags, RequestNameReply};
use zbus::{Connection, interface};

/// Well-known bus name and object path.
pub const SERVICE_NAME: &str = "org.screensaverd.ScreenSaver";
pub const OBJECT_PATH: &str = "/org/screensaverd/ScreenSaver";
const INTERFACE_NAME: &str = "org.screensaverd.ScreenSaver";

/// Active state as seen by bus clients.
#[derive(Debug, Default)]
pub struct ActiveMirror {
    active: AtomicBool,
    /// Unix seconds of activation, 0 while inactive.
    since: AtomicU64,
}

impl ActiveMirror {
    fn set(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
        self.since
            .store(if active { unix_now() } else { 0 }, Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Seconds since activation, 0 while inactive.
    pub fn active_seconds(&self) -> u32 {
        if !self.is_active() {
            return 0;
        }
        let since = self.since.load(Ordering::Relaxed);
        u32::try_from(unix_now().saturating_sub(since)).unwrap_or(u32::MAX)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// The `org.screensaverd.ScreenSaver` interface.
pub struct ScreenSaverInterface {
    events: mpsc::Sender<Event>,
    mirror: Arc<ActiveMirror>,
}

impl ScreenSaverInterface {
    async fn forward(&self, signal: SessionSignal) -> fdo::Result<()> {
        self.events
            .send(Event::Session(signal))
            .await
            .map_err(|_| fdo::Error::Failed("screensaver is shutting down".to_owned()))
    }
}

#[interface(name = "org.screensaverd.ScreenSaver")]
impl ScreenSaverInterface {
    async fn lock(&self) -> fdo::Result<()> {
        debug!("Lock requested over the bus");
        self.forward(SessionSignal::Lock).await
    }

    async fn quit(&self) -> fdo::Result<()> {
        debug!("Quit requested over the bus");
        self.forward(SessionSignal::Quit).await
    }

    async fn cycle(&self) -> fdo::Result<()> {
        self.forward(SessionSignal::Cycle).await
    }

    async fn set_active(&self, active: bool) -> fdo::Result<bool> {
        let (reply, answer) = oneshot::channel();
        self.forward(SessionSignal::SetActive {
            active,
            reply: Some(reply),
        })
        .await?;

        answer
            .await
            .map_err(|_| fdo::Error::Failed("request dropped".to_owned()))
    }

    async fn get_active(&self) -> bool {
        self.mirror.is_active()
    }

    async fn get_active_time(&self) -> u32 {
        self.mirror.active_seconds()
    }

    async fn throttle(&self, throttled: bool) -> fdo::Result<()> {
        self.forward(SessionSignal::Throttle(throttled)).await
    }

    async fn simulate_user_activity(&self) -> fdo::Result<()> {
        self.forward(SessionSignal::SimulateUserActivity).await
    }

    async fn show_message(&self, summary: String, body: String, icon: String) -> fdo::Result<()> {
        self.forward(SessionSignal::ShowMessage(StatusMessage::new(summary, body, icon)))
            .await
    }
}

/// Session bus implementation of [`SessionBus`].
pub struct DbusSession {
    events: mpsc::Sender<Event>,
    mirror: Arc<ActiveMirror>,
    /// Bus address; the user session bus when unset.
    address: Option<String>,
    connection: Option<Connection>,
    signals: Option<mpsc::UnboundedSender<bool>>,
}

impl DbusSession {
    /// Serve on the user session bus.
    pub fn new(events: mpsc::Sender<Event>) -> Self {
        Self {
            events,
            mirror: Arc::new(ActiveMirror::default()),
            address: None,
            connection: None,
            signals: None,
        }
    }

    /// Serve on the bus at `address` instead of the session bus.
    pub fn with_address(events: mpsc::Sender<Event>, address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::new(events)
        }
    }

    pub fn mirror(&self) -> Arc<ActiveMirror> {
        Arc::clone(&self.mirror)
    }

    /// The live connection once acquired.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    async fn connect(&self) -> zbus::Result<Connection> {
        let builder = match self.address {
            Some(ref address) => zbus::connection::Builder::address(address.as_str())?,
            None => zbus::connection::Builder::session()?,
        };

        let interface = ScreenSaverInterface {
            events: self.events.clone(),
            mirror: Arc::clone(&self.mirror),
        };

        builder.serve_at(OBJECT_PATH, interface)?.build().await
    }
}

#[async_trait]
impl SessionBus for DbusSession {
    async fn acquire(&mut self) -> Result<(), StartError> {
        let conn = self
            .connect()
            .await
            .map_err(|e| StartError::SessionAcquisition(e.to_string()))?;

        match conn
            .request_name_with_flags(SERVICE_NAME, RequestNameFlags::DoNotQueue.into())
            .await
        {
            Ok(RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) => {}
            Ok(_) | Err(zbus::Error::NameTaken) => {
                return Err(StartError::AlreadyOwned {
                    name: SERVICE_NAME.to_string(),
                });
            }
            Err(e) => return Err(StartError::SessionAcquisition(e.to_string())),
        }

        info!("Acquired {} on the session bus", SERVICE_NAME);

        let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
        let emitter = conn.clone();
        tokio::spawn(async move {
            while let Some(active) = rx.recv().await {
                if let Err(e) = emitter
                    .emit_signal(
                        None::<&str>,
                        OBJECT_PATH,
                        INTERFACE_NAME,
                        "ActiveChanged",
                        &(active,),
                    )
                    .await
                {
                    warn!("Failed to emit ActiveChanged: {}", e);
                }
            }
        });

        self.signals = Some(tx);
        self.connection = Some(conn);
        Ok(())
    }

    fn emit_active_changed(&mut self, active: bool) {
        self.mirror.set(active);

        if let Some(ref signals) = self.signals
            && signals.send(active).is_err()
        {
            warn!("ActiveChanged emitter is gone");
        }
    }
}
