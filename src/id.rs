use std::fmt;

/// A registration identifier.
///
/// `Id` tags a suspended continuation: it is the key the dispatcher uses to
/// find the continuation to resume when the OS resource or semaphore it is
/// waiting on becomes ready. Two values are reserved and never issued by
/// [`crate::dispatcher::Dispatcher::next_id`]: [`Id::INVALID`] and
/// [`Id::WAKEUP`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id(i64);

impl Id {
    /// The empty slot value in the waiting table; never a live registration.
    pub const INVALID: Id = Id(0);

    /// The sentinel attached to the dispatcher's internal wake-up event.
    pub const WAKEUP: Id = Id(-1);

    pub(crate) const fn new(value: i64) -> Id {
        Id(value)
    }

    pub(crate) const fn get(self) -> i64 {
        self.0
    }

    /// True for either reserved sentinel.
    pub fn is_reserved(self) -> bool {
        self == Id::INVALID || self == Id::WAKEUP
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Id::INVALID => f.write_str("Id(invalid)"),
            Id::WAKEUP => f.write_str("Id(wakeup)"),
            Id(v) => write!(f, "Id({v})"),
        }
    }
}

/// An OS file descriptor, as tracked by the waiting table.
///
/// `-1` ([`Fd::INVALID`]) denotes "no descriptor".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(i32);

impl Fd {
    pub const INVALID: Fd = Fd(-1);

    pub fn new(raw: i32) -> Fd {
        Fd(raw)
    }

    pub fn get(self) -> i32 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fd({})", self.0)
    }
}

impl From<i32> for Fd {
    fn from(raw: i32) -> Fd {
        Fd(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_sentinels() {
        assert!(Id::INVALID.is_reserved());
        assert!(Id::WAKEUP.is_reserved());
        assert!(!Id::new(1).is_reserved());
    }

    #[test]
    fn display_formats_sentinels_by_name() {
        assert_eq!(Id::INVALID.to_string(), "Id(invalid)");
        assert_eq!(Id::WAKEUP.to_string(), "Id(wakeup)");
        assert_eq!(Id::new(7).to_string(), "Id(7)");
    }

    #[test]
    fn fd_validity() {
        assert!(!Fd::INVALID.is_valid());
        assert!(Fd::new(0).is_valid());
        assert!(Fd::new(3).is_valid());
    }
}
