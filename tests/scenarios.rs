mod util;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use rand::Rng;

use cord::suspend;
use cord::{len, run, trampoline, Continuation, Error, Semaphore, Step};

// Scenario 1: sleep then signal.

struct SleepThenSignal {
    sem: Semaphore,
    state: u8,
}

impl Continuation for SleepThenSignal {
    fn step(self: Box<Self>) -> Step {
        match self.state {
            0 => suspend::sleep_ms(
                Box::new(SleepThenSignal {
                    sem: self.sem.clone(),
                    state: 1,
                }),
                10,
            )
            .expect("sleep"),
            1 => {
                suspend::signal(&self.sem).expect("signal");
                Step::Done
            }
            _ => unreachable!(),
        }
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

struct WaitThenSet {
    sem: Semaphore,
    success: Rc<Cell<bool>>,
    state: u8,
}

impl Continuation for WaitThenSet {
    fn step(self: Box<Self>) -> Step {
        match self.state {
            0 => suspend::wait(
                Box::new(WaitThenSet {
                    sem: self.sem.clone(),
                    success: self.success.clone(),
                    state: 1,
                }),
                &self.sem,
            )
            .expect("wait"),
            1 => {
                self.success.set(true);
                Step::Done
            }
            _ => unreachable!(),
        }
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

#[test]
fn sleep_then_signal() {
    util::init();
    let sem = Semaphore::new();
    let success = Rc::new(Cell::new(false));

    trampoline(Box::new(SleepThenSignal {
        sem: sem.clone(),
        state: 0,
    }));
    trampoline(Box::new(WaitThenSet {
        sem: sem.clone(),
        success: success.clone(),
        state: 0,
    }));

    run(Duration::ZERO).expect("run");
    assert!(success.get());
    assert_eq!(len(), 0);
}

// Scenario 2: fork doubles work.

struct ForkIncrement {
    count: Rc<Cell<u32>>,
    state: u8,
}

impl Continuation for ForkIncrement {
    fn step(self: Box<Self>) -> Step {
        match self.state {
            0 => suspend::fork(Box::new(ForkIncrement {
                count: self.count.clone(),
                state: 1,
            }))
            .expect("fork"),
            1 => {
                self.count.set(self.count.get() + 1);
                Step::Done
            }
            _ => unreachable!(),
        }
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        Box::new(ForkIncrement {
            count: self.count.clone(),
            state: self.state,
        })
    }
}

#[test]
fn fork_doubles_work() {
    util::init();
    let count = Rc::new(Cell::new(0u32));
    suspend::spawn(Box::new(ForkIncrement {
        count: count.clone(),
        state: 0,
    }))
    .expect("spawn");

    run(Duration::ZERO).expect("run");
    assert_eq!(count.get(), 2);
}

// Scenario 3: yield ordering.

struct YieldTwice {
    name: char,
    log: Rc<RefCell<String>>,
    state: u8,
}

impl Continuation for YieldTwice {
    fn step(self: Box<Self>) -> Step {
        match self.state {
            0 => {
                self.log.borrow_mut().push(self.name);
                suspend::yield_now(Box::new(YieldTwice {
                    name: self.name,
                    log: self.log.clone(),
                    state: 1,
                }))
                .expect("yield")
            }
            1 => {
                self.log.borrow_mut().push(self.name);
                Step::Done
            }
            _ => unreachable!(),
        }
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

#[test]
fn yield_ordering() {
    util::init();
    let log = Rc::new(RefCell::new(String::new()));
    for name in ['A', 'B', 'C'] {
        suspend::spawn(Box::new(YieldTwice {
            name,
            log: log.clone(),
            state: 0,
        }))
        .expect("spawn");
    }

    run(Duration::ZERO).expect("run");
    assert_eq!(*log.borrow(), "ABCABC");
}

// Scenario 4: signalAll wakes every waiter.

struct WaitThenRecord {
    sem: Semaphore,
    index: u32,
    log: Rc<RefCell<Vec<u32>>>,
    state: u8,
}

impl Continuation for WaitThenRecord {
    fn step(self: Box<Self>) -> Step {
        match self.state {
            0 => suspend::wait(
                Box::new(WaitThenRecord {
                    sem: self.sem.clone(),
                    index: self.index,
                    log: self.log.clone(),
                    state: 1,
                }),
                &self.sem,
            )
            .expect("wait"),
            1 => {
                self.log.borrow_mut().push(self.index);
                Step::Done
            }
            _ => unreachable!(),
        }
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

struct SignalAllOnce {
    sem: Semaphore,
}

impl Continuation for SignalAllOnce {
    fn step(self: Box<Self>) -> Step {
        suspend::signal_all(&self.sem).expect("signal_all");
        Step::Done
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

#[test]
fn signal_all_wakes_every_waiter() {
    util::init();
    let sem = Semaphore::new();
    let log = Rc::new(RefCell::new(Vec::new()));

    for index in 0..5 {
        suspend::spawn(Box::new(WaitThenRecord {
            sem: sem.clone(),
            index,
            log: log.clone(),
            state: 0,
        }))
        .expect("spawn");
    }
    suspend::spawn(Box::new(SignalAllOnce { sem: sem.clone() })).expect("spawn");

    run(Duration::ZERO).expect("run");
    assert_eq!(*log.borrow(), vec![0, 1, 2, 3, 4]);
}

// Scenario 5: sub-millisecond sleep rejected.

struct NeverSteps;

impl Continuation for NeverSteps {
    fn step(self: Box<Self>) -> Step {
        panic!("a rejected sleep must not register its continuation");
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

#[test]
fn sub_millisecond_sleep_rejected() {
    util::init();
    let result = suspend::sleep(Box::new(NeverSteps), Duration::ZERO);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

// Scenario 6: stop mid-flight.

struct SleepLong {
    woke: Rc<Cell<bool>>,
}

impl Continuation for SleepLong {
    fn step(self: Box<Self>) -> Step {
        suspend::sleep_ms(Box::new(MarkWoke { woke: self.woke }), 1000).expect("sleep")
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

struct MarkWoke {
    woke: Rc<Cell<bool>>,
}

impl Continuation for MarkWoke {
    fn step(self: Box<Self>) -> Step {
        self.woke.set(true);
        Step::Done
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

struct StopAfterDelay {
    delay_ms: u64,
    state: u8,
}

impl Continuation for StopAfterDelay {
    fn step(self: Box<Self>) -> Step {
        match self.state {
            0 => suspend::sleep_ms(
                Box::new(StopAfterDelay {
                    delay_ms: self.delay_ms,
                    state: 1,
                }),
                self.delay_ms,
            )
            .expect("sleep"),
            1 => {
                cord::stop().expect("stop");
                Step::Done
            }
            _ => unreachable!(),
        }
    }

    fn fork_clone(&self) -> Box<dyn Continuation> {
        unimplemented!()
    }
}

#[test]
fn stop_mid_flight() {
    util::init();
    let woke = Rc::new(Cell::new(false));
    // Jitter the cancellation delay the same way a retry backoff test would,
    // well clear of the 1s sleep it is meant to cut off.
    let delay_ms = rand::rng().random_range(8..=20);

    trampoline(Box::new(SleepLong { woke: woke.clone() }));
    trampoline(Box::new(StopAfterDelay { delay_ms, state: 0 }));

    run(Duration::ZERO).expect("run returns cleanly after a mid-flight stop");
    assert_eq!(len(), 0);
    assert!(!woke.get(), "the 1s sleep must never have fired");
}
