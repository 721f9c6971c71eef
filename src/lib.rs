//! screensaverd - session screen-lock and screensaver activation daemon.
//!
//! Listens for lock/idle requests on the session bus, logind, and the X11
//! idle counter, and coordinates input capture with the lock/saver state.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod grab;
pub mod listener;
pub mod manager;
pub mod prefs;
pub mod presenter;

#[cfg(test)]
pub mod testing;
