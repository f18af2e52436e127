//! Suspension primitives: the calling convention CPS-transformed step
//! functions use to hand a continuation to the dispatcher and stop running.
//!
//! Each primitive takes ownership of the continuation it suspends and
//! returns the [`Step`] the caller's `step` method should itself return.
//! `signal`, `signal_all`, and `spawn` don't suspend a particular
//! continuation — they act on the dispatcher directly and are called like
//! ordinary functions from surrounding code.

use std::time::Duration;

use crate::continuation::{Continuation, Step};
use crate::dispatcher::{self, with_mut};
use crate::error::{Error, Result};
use crate::id::Fd;
use crate::selector::{Interest, SelectorBridge};
use crate::semaphore::Semaphore;

/// Append `c` to the yield queue and wake the dispatcher. Resumes no earlier
/// than the current poll iteration's yield-drain completes.
pub fn yield_now(c: Box<dyn Continuation>) -> Result<Step> {
    with_mut(|d| d.yields_push(c));
    dispatcher::wake_up()?;
    Ok(Step::Done)
}

/// Suspend `c` until `delay` elapses. Rejects anything under one millisecond.
pub fn sleep(c: Box<dyn Continuation>, delay: Duration) -> Result<Step> {
    if delay < Duration::from_millis(1) {
        return Err(Error::InvalidArgument(
            "sleep: delay must be at least 1ms",
        ));
    }
    let id = dispatcher::next_id();
    with_mut(|d| -> Result<()> {
        let fd = d.selector().register_timer_oneshot(delay)?;
        d.waiting_put(fd, id);
        d.goto_insert(id, c);
        Ok(())
    })?;
    dispatcher::wake_up()?;
    Ok(Step::Done)
}

/// `sleep` taking whole milliseconds.
pub fn sleep_ms(c: Box<dyn Continuation>, ms: u64) -> Result<Step> {
    sleep(c, Duration::from_millis(ms))
}

/// `sleep` taking fractional seconds, truncated to the millisecond.
pub fn sleep_secs(c: Box<dyn Continuation>, secs: f64) -> Result<Step> {
    let ms = (secs * 1000.0) as u64;
    sleep(c, Duration::from_millis(ms))
}

/// Suspend `c` until `fd` becomes ready for one of `interest`.
pub fn io(c: Box<dyn Continuation>, fd: Fd, interest: Interest) -> Result<Step> {
    if interest.is_empty() {
        return Err(Error::InvalidArgument(
            "io: interest set must not be empty",
        ));
    }
    let id = dispatcher::next_id();
    with_mut(|d| -> Result<()> {
        d.selector().register_fd(fd, interest)?;
        d.waiting_put(fd, id);
        d.goto_insert(id, c);
        Ok(())
    })?;
    dispatcher::wake_up()?;
    Ok(Step::Done)
}

/// Suspend `c` on `sem`. If `sem` is already ready, `c` joins the tail of the
/// yield queue immediately (the fast path); otherwise it parks in `pending`
/// until a matching `signal`/`signal_all` finds it — no wake-up is triggered
/// in that case, since nothing new becomes schedulable until the signal
/// arrives.
pub fn wait(c: Box<dyn Continuation>, sem: &Semaphore) -> Result<Step> {
    if sem.is_ready() {
        with_mut(|d| d.yields_push(c));
        dispatcher::wake_up()?;
        Ok(Step::Done)
    } else {
        let id = dispatcher::next_id();
        with_mut(|d| {
            d.pending_insert(sem.id(), id);
            d.goto_insert(id, c);
        });
        Ok(Step::Done)
    }
}

fn transfer_one(sem: &Semaphore) -> bool {
    sem.with_ready(|| {
        with_mut(|d| {
            let Some(waiter_id) = d.pending_take(sem.id()) else {
                return false;
            };
            match d.goto_remove(waiter_id) {
                Some(cont) => {
                    d.yields_push(cont);
                    true
                }
                None => false,
            }
        })
    })
    .unwrap_or(false)
}

/// Signal `sem`, then move at most one waiter parked on it from `goto` to
/// the tail of `yields`.
pub fn signal(sem: &Semaphore) -> Result<()> {
    sem.signal();
    if transfer_one(sem) {
        dispatcher::wake_up()?;
    }
    Ok(())
}

/// Signal `sem`, then drain every waiter parked on it into `yields`.
pub fn signal_all(sem: &Semaphore) -> Result<()> {
    sem.signal();
    let mut any = false;
    while transfer_one(sem) {
        any = true;
    }
    if any {
        dispatcher::wake_up()?;
    }
    Ok(())
}

/// Clone `c` via its `fork_clone`, enqueue the clone to run next, and return
/// `c` itself so both branches continue — the clone on the yield queue, the
/// original on the caller's stack.
pub fn fork(c: Box<dyn Continuation>) -> Result<Step> {
    let clone = c.fork_clone();
    with_mut(|d| d.yields_push(clone));
    dispatcher::wake_up()?;
    Ok(Step::Continue(c))
}

/// Enqueue an unstarted continuation for the next poll iteration. Unlike the
/// other primitives, this is called from ordinary code, not from inside a
/// running continuation's `step`.
pub fn spawn(c: Box<dyn Continuation>) -> Result<()> {
    with_mut(|d| d.yields_push(c));
    dispatcher::wake_up()
}

/// End `c` without enqueueing any further work.
pub fn discard(c: Box<dyn Continuation>) -> Step {
    drop(c);
    Step::Done
}
