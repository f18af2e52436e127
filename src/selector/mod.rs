//! The selector bridge: a small capability set wrapping the OS readiness
//! primitive (epoll on Linux, kqueue on the BSD family and macOS), timer
//! registration, and a user-triggerable wake-up event.

use std::time::Duration;

use crate::id::Fd;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use epoll::Selector;

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
mod kqueue;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
pub use kqueue::Selector;

/// What a caller wants to be notified about. A subset of `{Read, Write}` —
/// `Error`/`Hup` readiness is always reported when it occurs, it cannot be
/// un-requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(0b01);
    pub const WRITABLE: Interest = Interest(0b10);

    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Interest {
    type Output = Interest;
    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

/// Readiness reported for a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// What kind of OS resource a registered `Fd` backs. The selector tracks this
/// internally so it knows whether to drain a level-triggered counter
/// (timerfd/eventfd) after a readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    User,
    OneshotTimer,
    PeriodicTimer,
    External,
}

/// The capability set a dispatcher needs from a readiness selector.
///
/// Implemented once per platform backend (see [`epoll`] / [`kqueue`]).
/// Every registration is identified by the [`Fd`] the OS handed back (or, for
/// virtual registrations like a kqueue timer, a synthesized one) — the
/// dispatcher's own [`crate::waiting::WaitingTable`] is the layer that maps
/// that `Fd` to a continuation [`crate::id::Id`].
pub trait SelectorBridge: Sized {
    /// Create a new, empty selector.
    fn new() -> std::io::Result<Self>;

    /// Register an externally-owned descriptor for readiness notifications.
    fn register_fd(&self, fd: Fd, interest: Interest) -> std::io::Result<()>;

    /// Register a one-shot timer that fires once after `delay`, returning
    /// the `Fd` it was registered under.
    fn register_timer_oneshot(&self, delay: Duration) -> std::io::Result<Fd>;

    /// Register a periodic timer that fires every `interval`.
    fn register_timer_periodic(&self, interval: Duration) -> std::io::Result<Fd>;

    /// Register the dispatcher's user-triggerable wake-up event.
    fn register_user_event(&self) -> std::io::Result<Fd>;

    /// Stop monitoring `fd`. No-op on an unknown `fd`.
    fn unregister(&self, fd: Fd) -> std::io::Result<()>;

    /// Trigger a previously-registered user event, causing any blocked
    /// `select` to return.
    fn trigger_user_event(&self, fd: Fd) -> std::io::Result<()>;

    /// Block until at least one event is ready, or `timeout` elapses
    /// (`None` blocks indefinitely). Ready events are appended to `out`,
    /// which is cleared first.
    fn select(
        &self,
        timeout: Option<Duration>,
        out: &mut Vec<(Fd, Readiness)>,
    ) -> std::io::Result<()>;
}
