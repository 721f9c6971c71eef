//! systemd-logind session signals via `DBus`.
//!
//! Watches the current session's `Lock`/`Unlock` signals, the manager's
//! `PrepareForSleep` signal, and polls the session `IdleHint` property.

use crate::domain::{Event, SessionSignal};
use anyhow::{Context, Result};
use futures_util::StreamExt;
use std::env;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use zbus::Connection;

/// `DBus` service and path for login1.
const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const MANAGER_INTERFACE: &str = "org.freedesktop.login1.Manager";
const SESSION_INTERFACE: &str = "org.freedesktop.login1.Session";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// Start watching logind in the background.
///
/// logind is optional: failures are logged and the watcher stops, the
/// daemon keeps running on the session bus and X11 channels alone.
pub fn spawn_watch(events: mpsc::Sender<Event>, poll_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = watch(events, poll_interval).await {
            warn!("logind watcher stopped: {:#}", e);
        }
    })
}

async fn watch(events: mpsc::Sender<Event>, poll_interval: Duration) -> Result<()> {
    let conn = Connection::system()
        .await
        .context("Failed to connect to system DBus")?;

    let session_path = resolve_session_path(&conn).await?;
    info!("Watching logind session {}", session_path);

    let session = zbus::Proxy::new(&conn, LOGIND_SERVICE, session_path.as_str(), SESSION_INTERFACE)
        .await
        .context("Failed to create Session proxy")?;
    let manager = zbus::Proxy::new(&conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
        .await
        .context("Failed to create Manager proxy")?;

    let mut lock = session
        .receive_signal("Lock")
        .await
        .context("Failed to subscribe to Lock")?;
    let mut unlock = session
        .receive_signal("Unlock")
        .await
        .context("Failed to subscribe to Unlock")?;
    let mut sleep = manager
        .receive_signal("PrepareForSleep")
        .await
        .context("Failed to subscribe to PrepareForSleep")?;

    let mut poll = tokio::time::interval(poll_interval);
    let mut idle_hint = false;

    loop {
        let signal = tokio::select! {
            Some(_) = lock.next() => {
                debug!("logind requested session lock");
                SessionSignal::LogindLock
            }
            Some(_) = unlock.next() => {
                debug!("logind requested session unlock");
                SessionSignal::LogindUnlock
            }
            Some(message) = sleep.next() => {
                match message.body().deserialize::<bool>() {
                    Ok(start) => SessionSignal::PrepareForSleep(start),
                    Err(e) => {
                        warn!("Malformed PrepareForSleep signal: {}", e);
                        continue;
                    }
                }
            }
            _ = poll.tick() => {
                match get_idle_hint(&conn, &session_path).await {
                    Ok(idle) if idle != idle_hint => {
                        debug!("Idle hint changed: {} -> {}", idle_hint, idle);
                        idle_hint = idle;
                        SessionSignal::IdleHint(idle)
                    }
                    Ok(idle) => {
                        trace!("Idle hint: {}", idle);
                        continue;
                    }
                    Err(e) => {
                        // Don't stop on transient errors, just log
                        warn!("Failed to poll idle hint: {}", e);
                        continue;
                    }
                }
            }
        };

        if events.send(Event::Session(signal)).await.is_err() {
            debug!("Coordinator gone, stopping logind watcher");
            return Ok(());
        }
    }
}

/// Resolve the session object path for the current session.
async fn resolve_session_path(conn: &Connection) -> Result<String> {
    if let Ok(session_id) = env::var("XDG_SESSION_ID") {
        debug!("Using XDG_SESSION_ID: {}", session_id);
        return get_session_by_id(conn, &session_id).await;
    }

    debug!("XDG_SESSION_ID not set, trying to find current session");

    for alias in ["self", "auto"] {
        let path = format!("{LOGIND_PATH}/session/{alias}");
        if get_idle_hint(conn, &path).await.is_ok() {
            return Ok(path);
        }
    }

    anyhow::bail!(
        "Could not resolve session path. Set XDG_SESSION_ID or ensure logind session is available."
    )
}

/// Get session object path by session ID via `Manager.GetSession`.
async fn get_session_by_id(conn: &Connection, session_id: &str) -> Result<String> {
    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, LOGIND_PATH, MANAGER_INTERFACE)
        .await
        .context("Failed to create Manager proxy")?;

    let path: zbus::zvariant::OwnedObjectPath = proxy
        .call("GetSession", &(session_id,))
        .await
        .context("GetSession call failed")?;

    Ok(path.to_string())
}

/// Get the `IdleHint` property from a session.
async fn get_idle_hint(conn: &Connection, session_path: &str) -> Result<bool> {
    let proxy = zbus::Proxy::new(conn, LOGIND_SERVICE, session_path, PROPERTIES_INTERFACE)
        .await
        .context("Failed to create Properties proxy")?;

    let value: zbus::zvariant::OwnedValue = proxy
        .call("Get", &(SESSION_INTERFACE, "IdleHint"))
        .await
        .context("Failed to get IdleHint property")?;

    let idle: bool = value
        .downcast_ref::<bool>()
        .map_err(|_| anyhow::anyhow!("IdleHint is not a boolean"))?;

    Ok(idle)
}
