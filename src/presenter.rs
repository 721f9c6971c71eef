//! Lock screen presentation.
//!
//! Rendering is done by external programs. This module defines the seam the
//! lock manager drives, and a command-based implementation that spawns the
//! configured unlock prompt (the external authenticator).

use crate::config::Config;
use crate::domain::{Event, StatusMessage};
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Environment variable prefix for the unlock prompt.
const ENV_PREFIX: &str = "SCREENSAVERD";

/// What the lock surface should currently display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub lock_active: bool,
    pub saver_active: bool,
    pub theme: Option<String>,
}

/// Options handed to the unlock prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnlockOptions {
    /// Present only once logout is enabled and its timeout elapsed.
    pub logout_command: Option<String>,
    pub keyboard_command: Option<String>,
    pub user_switch_enabled: bool,
    pub status_message: Option<StatusMessage>,
}

/// Renders the lock/saver state. Implementations must not block.
pub trait Presenter: Send {
    /// Show or refresh the lock surface.
    fn show(&mut self, view: &View);

    /// Take the lock surface down.
    fn hide(&mut self);

    /// Raise the unlock prompt. Returns whether a prompt is now up; its result
    /// arrives later as `Event::UnlockFinished`.
    fn prompt_unlock(&mut self, options: &UnlockOptions) -> bool;

    /// Display a status message on the lock surface.
    fn show_message(&mut self, message: &StatusMessage);
}

/// Presenter that runs `unlock_command` through `sh -c`.
#[derive(Debug)]
pub struct CommandPresenter {
    /// Unlock prompt command line.
    unlock_command: Option<String>,

    /// Dry run mode.
    dry_run: bool,

    /// Where prompt results are reported.
    events: mpsc::Sender<Event>,
}

impl CommandPresenter {
    /// Create a presenter from config.
    pub fn from_config(config: &Config, events: mpsc::Sender<Event>) -> Self {
        match config.unlock_command {
            Some(ref command) => info!("Using unlock command: {}", command),
            None => warn!("No unlock_command configured; a locked session cannot be unlocked"),
        }

        Self {
            unlock_command: config.unlock_command.clone(),
            dry_run: config.dry_run,
            events,
        }
    }
}

impl Presenter for CommandPresenter {
    fn show(&mut self, view: &View) {
        info!(
            "Showing lock surface (locked={}, saver={}, theme={:?})",
            view.lock_active, view.saver_active, view.theme
        );
    }

    fn hide(&mut self) {
        info!("Hiding lock surface");
    }

    fn prompt_unlock(&mut self, options: &UnlockOptions) -> bool {
        let Some(command) = self.unlock_command.clone() else {
            warn!("Unlock requested but no unlock_command is configured");
            return false;
        };

        let env = build_env(options);

        if self.dry_run {
            info!("[DRY RUN] Would execute: {} (env: {:?})", command, env);
            if let Err(e) = self.events.try_send(Event::UnlockFinished(true)) {
                warn!("Failed to report dry-run unlock: {}", e);
            }
            return true;
        }

        debug!("Spawning unlock prompt: {}", command);

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&command)
            .envs(env)
            .stdin(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to spawn unlock prompt '{}': {}", command, e);
                return false;
            }
        };

        let events = self.events.clone();
        tokio::spawn(async move {
            let authenticated = match child.wait().await {
                Ok(status) if status.success() => true,
                Ok(status) => {
                    debug!("Unlock prompt exited with code {:?}", status.code());
                    false
                }
                Err(e) => {
                    error!("Failed to wait for unlock prompt: {}", e);
                    false
                }
            };

            if events
                .send(Event::UnlockFinished(authenticated))
                .await
                .is_err()
            {
                debug!("Coordinator gone before unlock prompt finished");
            }
        });

        true
    }

    fn show_message(&mut self, message: &StatusMessage) {
        info!("Status message: {}", message.to_line());
    }
}

/// Build the environment passed to the unlock prompt.
fn build_env(options: &UnlockOptions) -> Vec<(String, String)> {
    let mut env = vec![(
        format!("{ENV_PREFIX}_USER_SWITCH"),
        if options.user_switch_enabled { "1" } else { "0" }.to_string(),
    )];

    if let Some(ref command) = options.logout_command {
        env.push((format!("{ENV_PREFIX}_LOGOUT_COMMAND"), command.clone()));
    }

    if let Some(ref command) = options.keyboard_command {
        env.push((format!("{ENV_PREFIX}_KEYBOARD_COMMAND"), command.clone()));
    }

    if let Some(ref message) = options.status_message {
        env.push((format!("{ENV_PREFIX}_STATUS_MESSAGE"), message.to_line()));
        if !message.icon.is_empty() {
            env.push((format!("{ENV_PREFIX}_STATUS_ICON"), message.icon.clone()));
        }
    }

    env
}
