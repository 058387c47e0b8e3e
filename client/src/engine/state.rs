//! State machine definitions for the Connection Engine, plus the two
//! hard-coded timing windows the source this crate implements never exposed
//! as configuration. They stay as named constants here rather than
//! [`crate::config::ClientConfig`] fields — see the design notes this
//! crate's specification recorded that decision against.

use std::time::Duration;

/// How long the engine waits, after a server-initiated disconnect, for an
/// asynchronous trailing protocol error before giving up and proceeding
/// with the disconnected notification.
pub const SERVER_CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Poll interval used while waiting for the `reconnecting` flag to clear
/// before replaying stored subscriptions.
pub const REPLAY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Number of polls of [`REPLAY_POLL_INTERVAL`] to attempt before giving up
/// on subscription replay and logging the skip.
pub const REPLAY_POLL_ATTEMPTS: u32 = 4;

/// How long a connection with `reconnect-enabled = false` remains alive
/// after a disconnect, to give trailing error frames a chance to reach
/// their waiting caller, before the engine closes for good.
pub const ZOMBIE_WINDOW: Duration = Duration::from_secs(3);

/// The engine's connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Disconnected with reconnect disabled; alive only to flush trailing
    /// frames within [`ZOMBIE_WINDOW`].
    Zombie,
    Closing,
    Closed,
}

/// Who initiated a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectSource {
    Server,
    Client,
    UserCode,
}

/// The three toggles a disconnected-listener may set before the engine
/// decides how to proceed. These latch per-disconnect and are read
/// immediately after the listener returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedHandler {
    pub close_channel: bool,
    pub prevent_configured_reconnect: bool,
    pub perform_reconnect: bool,
}

impl DisconnectedHandler {
    /// Resolve whether a reconnect should actually be attempted given the
    /// configured default and whatever the listener latched.
    pub fn should_reconnect(&self, reconnect_enabled: bool) -> bool {
        if self.perform_reconnect {
            return true;
        }
        if self.prevent_configured_reconnect {
            return false;
        }
        reconnect_enabled
    }
}

/// Passed to a user-registered disconnected-listener before the engine
/// transitions into Reconnecting or Zombie.
#[derive(Debug)]
pub struct DisconnectedContext {
    pub source: DisconnectSource,
    pub cause: Option<String>,
    pub handler: DisconnectedHandler,
}
