//! A single-threaded cooperative continuation dispatcher.
//!
//! `cord` multiplexes opaque, resumable [`Continuation`]s over OS readiness
//! notifications (file descriptors, timers, a wake-up event) and a
//! [`Semaphore`]-based coordination primitive. It does not itself transform
//! ordinary code into continuation-passing style; it is the runtime that
//! drives already-CPS-shaped code, the way `mio` is the runtime a
//! higher-level reactor is built on rather than a reactor itself.
//!
//! The dispatcher is thread-local and created lazily on first use. See
//! [`run`], [`stop`], and the [`suspend`] module for the primary entry
//! points.

#[macro_use]
mod macros;

mod continuation;
mod dispatcher;
mod error;
mod id;
mod selector;
pub mod suspend;
mod semaphore;
mod waiting;

pub use continuation::{trampoline, Continuation, Step};
pub use dispatcher::{len, poll, run, stop, State};
pub use error::{Error, Result};
pub use id::{Fd, Id};
pub use selector::Interest;
pub use semaphore::Semaphore;
