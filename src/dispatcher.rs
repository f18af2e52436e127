//! Lifecycle state machine and poll loop.
//!
//! One [`Dispatcher`] lives per thread, in a lazily-initialized
//! [`thread_local!`] cell. Suspension primitives in [`crate::suspend`] reach
//! it through [`with`]; nothing outside this module touches its fields
//! directly.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::continuation::{trampoline, Continuation};
use crate::error::{Error, Result};
use crate::id::{Fd, Id};
use crate::selector::{Readiness, Selector, SelectorBridge};
use crate::waiting::WaitingTable;

/// The dispatcher's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No OS resources created yet.
    Unready,
    /// Resources exist; the poll loop is not executing.
    Stopped,
    /// `run()` is actively draining events.
    Running,
    /// `stop()` is tearing resources down.
    Stopping,
}

pub(crate) struct Dispatcher {
    state: State,
    /// Semaphore id -> FIFO queue of waiter ids parked on it. Several
    /// continuations may `wait` on the same semaphore before it is
    /// signaled, so each semaphore gets its own queue rather than a single
    /// slot.
    pending: HashMap<Id, VecDeque<Id>>,
    waiting: WaitingTable,
    goto: BTreeMap<Id, Box<dyn Continuation>>,
    yields: VecDeque<Box<dyn Continuation>>,
    last_id: i64,
    selector: Option<Selector>,
    manager: Option<Selector>,
    wake_fd: Fd,
    manager_wake_fd: Fd,
    timer_fd: Fd,
    scratch: Vec<(Fd, Readiness)>,
    manager_scratch: Vec<(Fd, Readiness)>,
}

impl Dispatcher {
    fn new() -> Dispatcher {
        Dispatcher {
            state: State::Unready,
            pending: HashMap::new(),
            waiting: WaitingTable::new(),
            goto: BTreeMap::new(),
            yields: VecDeque::new(),
            last_id: Id::INVALID.get(),
            selector: None,
            manager: None,
            wake_fd: Fd::INVALID,
            manager_wake_fd: Fd::INVALID,
            timer_fd: Fd::INVALID,
            scratch: Vec::new(),
            manager_scratch: Vec::new(),
        }
    }

    /// Idempotent `Unready -> Stopped` transition. Every other entry point
    /// calls this first, so the dispatcher is created on first use rather
    /// than eagerly.
    fn ensure_init(&mut self) -> Result<()> {
        if self.state != State::Unready {
            return Ok(());
        }
        debug!("dispatcher: init");
        let selector = Selector::new()?;
        let manager = Selector::new()?;

        let wake_fd = selector.register_user_event()?;
        self.waiting.put(wake_fd, Id::WAKEUP);
        let manager_wake_fd = manager.register_user_event()?;

        self.selector = Some(selector);
        self.manager = Some(manager);
        self.wake_fd = wake_fd;
        self.manager_wake_fd = manager_wake_fd;
        self.timer_fd = Fd::INVALID;
        self.yields.clear();
        self.last_id = Id::INVALID.get();
        self.state = State::Stopped;
        Ok(())
    }

    fn allocate_id(&mut self) -> Id {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            if self.last_id != Id::INVALID.get() && self.last_id != Id::WAKEUP.get() {
                break;
            }
        }
        Id::new(self.last_id)
    }

    fn len(&self) -> usize {
        let pending: usize = self.pending.values().map(VecDeque::len).sum();
        self.goto.len() + self.yields.len() + pending
    }

    /// `Stopped -> Running`, arming the management timer first if requested.
    /// Does not drive the poll loop itself — see the free function [`run`].
    fn begin_run(&mut self, interval: Duration) -> Result<()> {
        if self.state != State::Stopped {
            return Err(Error::NotStopped(self.state));
        }
        if !interval.is_zero() {
            let timer_fd = self
                .manager
                .as_ref()
                .expect("manager selector missing in Stopped state")
                .register_timer_periodic(interval)?;
            self.timer_fd = timer_fd;
        }
        debug!("dispatcher: run (interval={interval:?})");
        self.state = State::Running;
        Ok(())
    }

    /// Poll-loop phase 1: drain the primary selector and hand back every
    /// continuation whose FD fired, unregistering each as it is taken.
    ///
    /// Deliberately returns continuations rather than trampolining them
    /// itself — the caller must run them with no `Dispatcher` borrow held,
    /// since a continuation's step is free to call back into suspension
    /// primitives (which borrow the thread-local dispatcher themselves).
    fn drain_io(&mut self) -> Result<Vec<Box<dyn Continuation>>> {
        if self.state != State::Running || self.waiting.waiters() == 0 {
            return Ok(Vec::new());
        }
        let selector = self.selector.as_ref().expect("selector missing while Running");
        let mut scratch = std::mem::take(&mut self.scratch);
        selector.select(None, &mut scratch)?;
        let mut ready = Vec::new();
        for (fd, _readiness) in scratch.drain(..) {
            let id = self.waiting.get(fd);
            if id == Id::WAKEUP {
                trace!("dispatcher: wake-up event drained");
                continue;
            }
            if id == Id::INVALID {
                // Stale event for a slot already cleared; ignore.
                continue;
            }
            self.selector.as_ref().unwrap().unregister(fd)?;
            let cont = self
                .goto
                .remove(&id)
                .ok_or(Error::MissingRegistration(fd))?;
            trace!("dispatcher: resuming id={id} from fd={fd}");
            ready.push(cont);
        }
        self.scratch = scratch;
        Ok(ready)
    }

    /// Poll-loop phase 2: snapshot and pop exactly the yield queue's length
    /// as observed at the start of the drain. Entries pushed while the
    /// caller runs this batch are deferred to the next poll iteration.
    fn drain_yields(&mut self) -> Vec<Box<dyn Continuation>> {
        if self.state != State::Running {
            return Vec::new();
        }
        let n = self.yields.len();
        let mut batch = Vec::with_capacity(n);
        for _ in 0..n {
            if let Some(c) = self.yields.pop_front() {
                batch.push(c);
            }
        }
        batch
    }

    /// Poll-loop phase 3: if nothing is left to schedule, either stop (no
    /// management timer armed) or block on the management selector for one
    /// tick before the next iteration reassesses.
    fn check_idle_or_park(&mut self) -> Result<()> {
        if self.state != State::Running {
            return Ok(());
        }
        if !(self.goto.is_empty() && self.yields.is_empty() && self.pending.is_empty()) {
            return Ok(());
        }
        if self.timer_fd == Fd::INVALID {
            return self.stop();
        }
        let manager = self.manager.as_ref().expect("manager missing while Running");
        let mut scratch = std::mem::take(&mut self.manager_scratch);
        manager.select(None, &mut scratch)?;
        let errored = scratch.iter().any(|(_fd, r)| r.error);
        self.manager_scratch = scratch;
        if errored {
            warn!("dispatcher: management selector reported an error, stopping");
            self.stop()?;
            return Err(Error::Os(std::io::Error::new(
                std::io::ErrorKind::Other,
                "management selector reported an error",
            )));
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.state != State::Running {
            return Err(Error::NotRunning(self.state));
        }
        debug!("dispatcher: stop");
        self.state = State::Stopping;

        if let Some(manager) = self.manager.take() {
            let _ = manager.unregister(self.manager_wake_fd);
            if self.timer_fd != Fd::INVALID {
                let _ = manager.unregister(self.timer_fd);
            }
            // manager dropped here, closing its OS selector handle.
        }
        if let Some(selector) = self.selector.take() {
            let _ = selector.unregister(self.wake_fd);
            // selector dropped here, closing the wake event and the
            // selector's OS handle along with it.
        }
        self.timer_fd = Fd::INVALID;
        self.pending.clear();
        self.goto.clear();
        self.yields.clear();
        self.waiting = WaitingTable::new();

        self.state = State::Unready;
        self.ensure_init()
    }

    fn wake_up(&mut self) -> Result<()> {
        match self.state {
            State::Running => {
                if let Some(selector) = &self.selector {
                    selector.trigger_user_event(self.wake_fd)?;
                }
                if let Some(manager) = &self.manager {
                    manager.trigger_user_event(self.manager_wake_fd)?;
                }
                Ok(())
            }
            State::Unready => self.ensure_init(),
            State::Stopped | State::Stopping => Ok(()),
        }
    }
}

thread_local! {
    static DISPATCHER: RefCell<Dispatcher> = RefCell::new(Dispatcher::new());
}

/// Borrow the thread-local dispatcher, lazily initializing it first.
///
/// Every suspension primitive and every public lifecycle operation reaches
/// the dispatcher through this function.
pub(crate) fn with<R>(f: impl FnOnce(&mut Dispatcher) -> R) -> Result<R> {
    DISPATCHER.with(|cell| {
        let mut d = cell.borrow_mut();
        d.ensure_init()?;
        Ok(f(&mut d))
    })
}

/// Allocate the next registration id, skipping the reserved sentinels.
pub fn next_id() -> Id {
    with(|d| d.allocate_id()).expect("dispatcher init cannot fail after the first successful call")
}

/// Total pending continuation count: `len(goto) + len(yields) + len(pending)`.
pub fn len() -> usize {
    with(|d| d.len()).unwrap_or(0)
}

/// Enter the poll loop. `interval == Duration::ZERO` means "run until idle
/// with no work left"; a nonzero interval arms a periodic management timer
/// so an otherwise-idle dispatcher keeps polling rather than stopping.
///
/// Blocks the calling thread until the dispatcher stops, either because it
/// ran out of work (`interval` zero) or because a continuation called
/// [`stop`] from within the loop.
pub fn run(interval: Duration) -> Result<()> {
    DISPATCHER.with(|cell| -> Result<()> {
        let mut d = cell.borrow_mut();
        d.ensure_init()?;
        d.begin_run(interval)
    })?;
    loop {
        let running = DISPATCHER.with(|cell| cell.borrow().state == State::Running);
        if !running {
            return Ok(());
        }
        poll()?;
    }
}

/// Cancel all pending work and tear the dispatcher down to `Stopped`.
pub fn stop() -> Result<()> {
    DISPATCHER.with(|cell| cell.borrow_mut().stop())
}

/// Run a single poll iteration. No-op unless `Running`.
///
/// Each phase borrows the dispatcher only long enough to extract the
/// continuations it made ready; the continuations themselves are
/// trampolined with no borrow held, since their step functions may call
/// back into suspension primitives that borrow the dispatcher in turn.
pub fn poll() -> Result<()> {
    let running = DISPATCHER.with(|cell| cell.borrow().state == State::Running);
    if !running {
        return Ok(());
    }

    let ready = DISPATCHER.with(|cell| cell.borrow_mut().drain_io())?;
    for cont in ready {
        trampoline(cont);
    }

    let running = DISPATCHER.with(|cell| cell.borrow().state == State::Running);
    if !running {
        return Ok(());
    }

    let yielded = DISPATCHER.with(|cell| cell.borrow_mut().drain_yields());
    for cont in yielded {
        trampoline(cont);
    }

    DISPATCHER.with(|cell| cell.borrow_mut().check_idle_or_park())
}

/// Trigger the wake-up event so any blocked `select` returns.
pub(crate) fn wake_up() -> Result<()> {
    DISPATCHER.with(|cell| cell.borrow_mut().wake_up())
}

/// Like [`with`], but panics instead of propagating an init failure. Used by
/// suspension primitives that have no natural `Result` to attach an
/// initialization error to (they run after a continuation has already been
/// scheduled, at which point the dispatcher is guaranteed to exist).
pub(crate) fn with_mut<R>(f: impl FnOnce(&mut Dispatcher) -> R) -> R {
    with(f).expect("dispatcher init failed")
}

impl Dispatcher {
    pub(crate) fn goto_insert(&mut self, id: Id, c: Box<dyn Continuation>) {
        self.goto.insert(id, c);
    }

    pub(crate) fn goto_remove(&mut self, id: Id) -> Option<Box<dyn Continuation>> {
        self.goto.remove(&id)
    }

    pub(crate) fn yields_push(&mut self, c: Box<dyn Continuation>) {
        self.yields.push_back(c);
    }

    pub(crate) fn waiting_put(&mut self, fd: Fd, id: Id) {
        self.waiting.put(fd, id);
    }

    pub(crate) fn selector(&self) -> &Selector {
        self.selector.as_ref().expect("selector used before dispatcher init")
    }

    pub(crate) fn pending_insert(&mut self, sem_id: Id, waiter_id: Id) {
        self.pending.entry(sem_id).or_default().push_back(waiter_id);
    }

    /// Pop the oldest waiter parked on `sem_id`, if any. Removes the queue
    /// entirely once it is drained, so `pending.is_empty()` stays accurate.
    pub(crate) fn pending_take(&mut self, sem_id: Id) -> Option<Id> {
        let queue = self.pending.get_mut(&sem_id)?;
        let waiter = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(&sem_id);
        }
        waiter
    }
}
