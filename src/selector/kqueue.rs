use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use log::trace;

use super::{Interest, Kind, Readiness, SelectorBridge};
use crate::id::Fd;

/// Virtual idents for timers and the user event live in a range no real file
/// descriptor will ever occupy, so they can share the same `Fd` keyspace as
/// `register_fd`'s OS-backed descriptors without collision.
const VIRTUAL_IDENT_BASE: u64 = 1 << 24;

/// Readiness selector backed by `kqueue(2)`. Timers and the wake-up event use
/// `EVFILT_TIMER` and `EVFILT_USER` respectively, both of which are
/// edge-triggered by the kernel already, so (unlike the epoll/eventfd
/// backend) no manual counter-draining is needed.
pub struct Selector {
    kq: OwnedFd,
    next_virtual: Cell<u64>,
    kinds: RefCell<HashMap<u64, Kind>>,
}

impl SelectorBridge for Selector {
    fn new() -> io::Result<Selector> {
        let kq = unsafe { OwnedFd::from_raw_fd(syscall!(kqueue())?) };
        Ok(Selector {
            kq,
            next_virtual: Cell::new(VIRTUAL_IDENT_BASE),
            kinds: RefCell::new(HashMap::new()),
        })
    }

    fn register_fd(&self, fd: Fd, interest: Interest) -> io::Result<()> {
        trace!("selector: register fd={fd} kind=External");
        if interest.is_readable() {
            self.add_event(fd.get() as u64, libc::EVFILT_READ, 0, 0, 0)?;
        }
        if interest.is_writable() {
            self.add_event(fd.get() as u64, libc::EVFILT_WRITE, 0, 0, 0)?;
        }
        self.kinds.borrow_mut().insert(fd.get() as u64, Kind::External);
        Ok(())
    }

    fn register_timer_oneshot(&self, delay: Duration) -> io::Result<Fd> {
        let ident = self.alloc_virtual();
        self.add_event(ident, libc::EVFILT_TIMER, libc::EV_ONESHOT, 0, to_millis(delay))?;
        self.kinds.borrow_mut().insert(ident, Kind::OneshotTimer);
        Ok(Fd::new(ident as i32))
    }

    fn register_timer_periodic(&self, interval: Duration) -> io::Result<Fd> {
        let ident = self.alloc_virtual();
        self.add_event(ident, libc::EVFILT_TIMER, 0, 0, to_millis(interval))?;
        self.kinds.borrow_mut().insert(ident, Kind::PeriodicTimer);
        Ok(Fd::new(ident as i32))
    }

    fn register_user_event(&self) -> io::Result<Fd> {
        let ident = self.alloc_virtual();
        // NOTE_FFNOP only: arm the filter without triggering it yet.
        self.add_event(ident, libc::EVFILT_USER, 0, libc::NOTE_FFNOP, 0)?;
        self.kinds.borrow_mut().insert(ident, Kind::User);
        Ok(Fd::new(ident as i32))
    }

    fn unregister(&self, fd: Fd) -> io::Result<()> {
        trace!("selector: unregister fd={fd}");
        let ident = fd.get() as u64;
        let kind = self.kinds.borrow_mut().remove(&ident);
        let filter = match kind {
            Some(Kind::OneshotTimer) | Some(Kind::PeriodicTimer) => libc::EVFILT_TIMER,
            Some(Kind::User) => libc::EVFILT_USER,
            // An external fd may have been registered for read, write, or
            // both; deleting both filters is harmless if only one was armed.
            _ => {
                let _ = self.delete_event(ident, libc::EVFILT_READ);
                let _ = self.delete_event(ident, libc::EVFILT_WRITE);
                return Ok(());
            }
        };
        self.delete_event(ident, filter)
    }

    fn trigger_user_event(&self, fd: Fd) -> io::Result<()> {
        self.add_event(
            fd.get() as u64,
            libc::EVFILT_USER,
            0,
            libc::NOTE_FFNOP | libc::NOTE_TRIGGER,
            0,
        )
        .map(|_| ())
    }

    fn select(
        &self,
        timeout: Option<Duration>,
        out: &mut Vec<(Fd, Readiness)>,
    ) -> io::Result<()> {
        out.clear();
        let ts = timeout.map(|to| libc::timespec {
            tv_sec: to.as_secs() as libc::time_t,
            tv_nsec: to.subsec_nanos() as i64,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(std::ptr::null());

        let mut events: [libc::kevent; 128] = unsafe { std::mem::zeroed() };
        let n = loop {
            let res = unsafe {
                libc::kevent(
                    self.kq.as_raw_fd(),
                    std::ptr::null(),
                    0,
                    events.as_mut_ptr(),
                    events.len() as i32,
                    ts_ptr,
                )
            };
            if res == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            break res as usize;
        };

        for ev in &events[..n] {
            let fd = Fd::new(ev.ident as i32);
            let readiness = Readiness {
                readable: ev.filter == libc::EVFILT_READ || ev.filter == libc::EVFILT_TIMER || ev.filter == libc::EVFILT_USER,
                writable: ev.filter == libc::EVFILT_WRITE,
                error: ev.flags & libc::EV_ERROR != 0,
            };
            out.push((fd, readiness));
        }
        Ok(())
    }
}

impl Selector {
    fn alloc_virtual(&self) -> u64 {
        let id = self.next_virtual.get();
        self.next_virtual.set(id + 1);
        id
    }

    fn add_event(
        &self,
        ident: u64,
        filter: i16,
        flags: u16,
        fflags: u32,
        data: i64,
    ) -> io::Result<()> {
        let kev = libc::kevent {
            ident: ident as usize,
            filter,
            flags: libc::EV_ADD | libc::EV_ENABLE | flags,
            fflags,
            data: data as isize,
            udata: std::ptr::null_mut(),
        };
        self.submit(&kev)
    }

    fn delete_event(&self, ident: u64, filter: i16) -> io::Result<()> {
        let kev = libc::kevent {
            ident: ident as usize,
            filter,
            flags: libc::EV_DELETE,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        self.submit(&kev)
    }

    fn submit(&self, kev: &libc::kevent) -> io::Result<()> {
        let res = unsafe {
            libc::kevent(self.kq.as_raw_fd(), kev, 1, std::ptr::null_mut(), 0, std::ptr::null())
        };
        if res == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

fn to_millis(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}
