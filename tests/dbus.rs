//! Session-bus service against a private `dbus-daemon`.

use screensaverd::domain::{Event, SessionSignal};
use screensaverd::error::StartError;
use screensaverd::listener::SessionBus;
use screensaverd::listener::dbus::{DbusSession, OBJECT_PATH, SERVICE_NAME};
use tokio::sync::mpsc;

fn launch_daemon() -> Option<dbus_launch::Daemon> {
    match dbus_launch::Launcher::daemon().launch() {
        Ok(daemon) => Some(daemon),
        Err(e) => {
            eprintln!("skipping: could not launch dbus-daemon: {e}");
            None
        }
    }
}

async fn client(address: &str) -> zbus::Connection {
    zbus::connection::Builder::address(address)
        .unwrap()
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_second_instance_is_refused() {
    let Some(daemon) = launch_daemon() else {
        return;
    };

    let (tx, _rx) = mpsc::channel(8);
    let mut first = DbusSession::with_address(tx.clone(), daemon.address());
    first.acquire().await.unwrap();

    let mut second = DbusSession::with_address(tx, daemon.address());
    let err = second.acquire().await.unwrap_err();
    assert!(matches!(err, StartError::AlreadyOwned { ref name } if name == SERVICE_NAME));
}

#[tokio::test]
async fn test_methods_forward_and_queries_answer() {
    let Some(daemon) = launch_daemon() else {
        return;
    };

    let (tx, mut rx) = mpsc::channel(8);
    let mut session = DbusSession::with_address(tx, daemon.address());
    session.acquire().await.unwrap();

    let conn = client(daemon.address()).await;
    let proxy = zbus::Proxy::new(&conn, SERVICE_NAME, OBJECT_PATH, SERVICE_NAME)
        .await
        .unwrap();

    let active: bool = proxy.call("GetActive", &()).await.unwrap();
    assert!(!active);

    let () = proxy.call("Lock", &()).await.unwrap();
    assert!(matches!(
        rx.recv().await,
        Some(Event::Session(SessionSignal::Lock))
    ));

    session.emit_active_changed(true);
    let active: bool = proxy.call("GetActive", &()).await.unwrap();
    assert!(active);
}

#[tokio::test]
async fn test_set_active_waits_for_answer() {
    let Some(daemon) = launch_daemon() else {
        return;
    };

    let (tx, mut rx) = mpsc::channel(8);
    let mut session = DbusSession::with_address(tx, daemon.address());
    session.acquire().await.unwrap();

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Event::Session(SessionSignal::SetActive {
                active,
                reply: Some(reply),
            }) = event
            {
                reply.send(active).unwrap();
            }
        }
    });

    let conn = client(daemon.address()).await;
    let proxy = zbus::Proxy::new(&conn, SERVICE_NAME, OBJECT_PATH, SERVICE_NAME)
        .await
        .unwrap();

    let accepted: bool = proxy.call("SetActive", &(true,)).await.unwrap();
    assert!(accepted);
}
