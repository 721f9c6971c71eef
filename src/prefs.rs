//! Preferences snapshot and change notification.
//!
//! The loader owns the file side: it reads the config and publishes a new
//! snapshot only when something changed. The coordinator holds a
//! [`Preferences`] handle, which is read-only.

use crate::config::Config;
use anyhow::Result;
use std::path::PathBuf;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Read-only view of the current preferences.
#[derive(Debug, Clone)]
pub struct Preferences {
    rx: watch::Receiver<Config>,
}

impl Preferences {
    /// Current snapshot.
    pub fn snapshot(&self) -> Config {
        self.rx.borrow().clone()
    }

    /// Borrow the current snapshot without cloning it.
    pub fn current(&self) -> watch::Ref<'_, Config> {
        self.rx.borrow()
    }

    /// Wait for the next change and return the new snapshot.
    ///
    /// Returns `None` once the loader is gone.
    pub async fn changed(&mut self) -> Option<Config> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// Loads the config file and publishes changes.
#[derive(Debug)]
pub struct PreferencesLoader {
    path: Option<PathBuf>,
    tx: watch::Sender<Config>,
    /// CLI overrides re-applied after every load.
    dry_run: bool,
}

impl PreferencesLoader {
    /// Start from an already loaded config.
    pub fn new(initial: Config, path: Option<PathBuf>) -> Self {
        let dry_run = initial.dry_run;
        let (tx, _rx) = watch::channel(initial);
        Self { path, tx, dry_run }
    }

    /// A new handle observing this loader.
    pub fn subscribe(&self) -> Preferences {
        Preferences {
            rx: self.tx.subscribe(),
        }
    }

    /// Replace the snapshot, notifying only when it differs.
    pub fn publish(&self, mut config: Config) -> bool {
        config.dry_run |= self.dry_run;
        self.tx.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config;
                true
            }
        })
    }

    /// Re-read the config file and publish it.
    ///
    /// On a read or parse error the previous snapshot stays in place.
    pub fn reload(&self) -> Result<bool> {
        let config = Config::load_or_default(self.path.as_deref())?;
        let changed = self.publish(config);
        if changed {
            info!("Preferences changed");
        } else {
            debug!("Preferences reloaded, nothing changed");
        }
        Ok(changed)
    }

    /// Reload on every `SIGHUP`.
    pub fn spawn_reload_on_hangup(self) -> Result<JoinHandle<()>> {
        let mut hangup = signal(SignalKind::hangup())?;

        Ok(tokio::spawn(async move {
            while hangup.recv().await.is_some() {
                info!("SIGHUP received, reloading preferences");
                if let Err(e) = self.reload() {
                    error!("Failed to reload preferences: {:#}", e);
                }
            }
        }))
    }
}
