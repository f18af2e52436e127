use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use log::trace;

use super::{Interest, Kind, Readiness, SelectorBridge};
use crate::id::Fd;

/// Readiness selector backed by `epoll(7)`, with `timerfd(2)` for both
/// one-shot and periodic timers and `eventfd(2)` for the wake-up event.
pub struct Selector {
    ep: OwnedFd,
    kinds: RefCell<HashMap<RawFd, Kind>>,
}

impl SelectorBridge for Selector {
    fn new() -> io::Result<Selector> {
        let ep = unsafe { OwnedFd::from_raw_fd(syscall!(epoll_create1(libc::EPOLL_CLOEXEC))?) };
        Ok(Selector {
            ep,
            kinds: RefCell::new(HashMap::new()),
        })
    }

    fn register_fd(&self, fd: Fd, interest: Interest) -> io::Result<()> {
        self.add(fd, interest, Kind::External)
    }

    fn register_timer_oneshot(&self, delay: Duration) -> io::Result<Fd> {
        let fd = create_timerfd()?;
        arm_timer(fd, delay, None)?;
        self.add(Fd::new(fd), Interest::READABLE, Kind::OneshotTimer)?;
        Ok(Fd::new(fd))
    }

    fn register_timer_periodic(&self, interval: Duration) -> io::Result<Fd> {
        let fd = create_timerfd()?;
        arm_timer(fd, interval, Some(interval))?;
        self.add(Fd::new(fd), Interest::READABLE, Kind::PeriodicTimer)?;
        Ok(Fd::new(fd))
    }

    fn register_user_event(&self) -> io::Result<Fd> {
        let flags = libc::EFD_CLOEXEC | libc::EFD_NONBLOCK;
        let fd = syscall!(eventfd(0, flags))?;
        self.add(Fd::new(fd), Interest::READABLE, Kind::User)?;
        Ok(Fd::new(fd))
    }

    fn unregister(&self, fd: Fd) -> io::Result<()> {
        trace!("selector: unregister fd={fd}");
        let raw = fd.get();
        let kind = self.kinds.borrow_mut().remove(&raw);
        let mut dummy = libc::epoll_event { events: 0, u64: 0 };
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_DEL,
            raw,
            &mut dummy
        ))?;
        if matches!(kind, Some(Kind::User) | Some(Kind::OneshotTimer) | Some(Kind::PeriodicTimer)) {
            unsafe { libc::close(raw) };
        }
        Ok(())
    }

    fn trigger_user_event(&self, fd: Fd) -> io::Result<()> {
        let buf: [u8; 8] = 1u64.to_ne_bytes();
        loop {
            let res = unsafe { libc::write(fd.get(), buf.as_ptr() as *const _, 8) };
            if res == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::WouldBlock {
                    // the eventfd counter would overflow; draining and
                    // retrying is always safe since it is additive.
                    drain_counter(fd.get());
                    continue;
                }
                return Err(err);
            }
            return Ok(());
        }
    }

    fn select(
        &self,
        timeout: Option<Duration>,
        out: &mut Vec<(Fd, Readiness)>,
    ) -> io::Result<()> {
        out.clear();
        let timeout_ms = timeout
            .map(|to| {
                to.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(to)
                    .as_millis() as libc::c_int
            })
            .unwrap_or(-1);

        let mut events: [libc::epoll_event; 128] = unsafe { std::mem::zeroed() };
        let n = loop {
            let res = syscall!(epoll_wait(
                self.ep.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as i32,
                timeout_ms,
            ));
            match res {
                Ok(n) => break n as usize,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        };

        for event in &events[..n] {
            let raw = event.u64 as RawFd;
            let fd = Fd::new(raw);
            let kind = self.kinds.borrow().get(&raw).copied();
            if matches!(kind, Some(Kind::User) | Some(Kind::OneshotTimer) | Some(Kind::PeriodicTimer)) {
                drain_counter(raw);
            }
            let readiness = Readiness {
                readable: event.events as i32 & libc::EPOLLIN != 0,
                writable: event.events as i32 & libc::EPOLLOUT != 0,
                error: event.events as i32 & (libc::EPOLLERR | libc::EPOLLHUP) != 0,
            };
            out.push((fd, readiness));
        }
        Ok(())
    }
}

impl Selector {
    fn add(&self, fd: Fd, interest: Interest, kind: Kind) -> io::Result<()> {
        trace!("selector: register fd={fd} kind={kind:?}");
        let mut event = libc::epoll_event {
            events: interests_to_epoll(interest),
            u64: fd.get() as u64,
        };
        syscall!(epoll_ctl(
            self.ep.as_raw_fd(),
            libc::EPOLL_CTL_ADD,
            fd.get(),
            &mut event
        ))?;
        self.kinds.borrow_mut().insert(fd.get(), kind);
        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        for (raw, kind) in self.kinds.borrow().iter() {
            if matches!(kind, Kind::User | Kind::OneshotTimer | Kind::PeriodicTimer) {
                unsafe { libc::close(*raw) };
            }
        }
    }
}

fn interests_to_epoll(interest: Interest) -> u32 {
    let mut kind = 0;
    if interest.is_readable() {
        kind |= libc::EPOLLIN;
    }
    if interest.is_writable() {
        kind |= libc::EPOLLOUT;
    }
    kind as u32
}

fn create_timerfd() -> io::Result<RawFd> {
    syscall!(timerfd_create(
        libc::CLOCK_MONOTONIC,
        libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
    ))
}

fn arm_timer(fd: RawFd, first: Duration, interval: Option<Duration>) -> io::Result<()> {
    let spec = libc::itimerspec {
        it_interval: interval.map(duration_to_timespec).unwrap_or(libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        }),
        it_value: duration_to_timespec(first),
    };
    syscall!(timerfd_settime(fd, 0, &spec, std::ptr::null_mut())).map(|_| ())
}

fn duration_to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

/// Drain the 8-byte counter `timerfd`/`eventfd` expose, so a level-triggered
/// epoll registration does not refire for the same tick.
fn drain_counter(fd: RawFd) {
    let mut buf = [0u8; 8];
    loop {
        let res = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, 8) };
        if res >= 0 {
            break;
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            break;
        }
    }
}
