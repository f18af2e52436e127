use crate::id::{Fd, Id};

#[cfg(feature = "capacity-256")]
const DEFAULT_CAPACITY: usize = 256;
#[cfg(all(feature = "capacity-128", not(feature = "capacity-256")))]
const DEFAULT_CAPACITY: usize = 128;
#[cfg(not(any(feature = "capacity-128", feature = "capacity-256")))]
const DEFAULT_CAPACITY: usize = 64;

/// Dense `Fd -> Id` table, the dispatcher's map from a ready OS descriptor
/// back to the registration waiting on it.
///
/// Grown by doubling, the way a small-integer-keyed slab is usually grown:
/// OS descriptors are small and densely allocated, so a `Vec` indexed
/// directly by `fd` wastes little relative to a hash map and avoids hashing
/// on the poll loop's hot path.
#[derive(Debug)]
pub struct WaitingTable {
    slots: Vec<Id>,
    waiters: usize,
}

impl WaitingTable {
    pub fn new() -> WaitingTable {
        WaitingTable {
            slots: vec![Id::INVALID; DEFAULT_CAPACITY],
            waiters: 0,
        }
    }

    /// Live registrations excluding `invalid` and the wake-up slot.
    pub fn waiters(&self) -> usize {
        self.waiters
    }

    /// Associate `fd` with `id`, growing the table by doubling if needed.
    pub fn put(&mut self, fd: Fd, id: Id) {
        let idx = fd.get() as usize;
        if idx >= self.slots.len() {
            let mut new_len = self.slots.len().max(1);
            while idx >= new_len {
                new_len *= 2;
            }
            self.slots.resize(new_len, Id::INVALID);
        }
        self.slots[idx] = id;
        if !id.is_reserved() {
            self.waiters += 1;
        }
    }

    /// Read the id registered for `fd`. Clears the slot back to `invalid`
    /// unless it held the wake-up sentinel, which stays attributable across
    /// repeated wake-ups.
    pub fn get(&mut self, fd: Fd) -> Id {
        let idx = fd.get() as usize;
        let Some(slot) = self.slots.get_mut(idx) else {
            return Id::INVALID;
        };
        let id = *slot;
        if id != Id::WAKEUP {
            *slot = Id::INVALID;
            if id != Id::INVALID {
                self.waiters -= 1;
            }
        }
        id
    }
}

impl Default for WaitingTable {
    fn default() -> WaitingTable {
        WaitingTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_roundtrip() {
        let mut table = WaitingTable::new();
        table.put(Fd::new(3), Id::new(42));
        assert_eq!(table.waiters(), 1);
        assert_eq!(table.get(Fd::new(3)), Id::new(42));
        assert_eq!(table.waiters(), 0);
        // cleared back to invalid
        assert_eq!(table.get(Fd::new(3)), Id::INVALID);
    }

    #[test]
    fn grows_by_doubling() {
        let mut table = WaitingTable::new();
        table.put(Fd::new(500), Id::new(1));
        assert_eq!(table.get(Fd::new(500)), Id::new(1));
    }

    #[test]
    fn wakeup_slot_is_not_cleared() {
        let mut table = WaitingTable::new();
        table.put(Fd::new(7), Id::WAKEUP);
        assert_eq!(table.waiters(), 0);
        assert_eq!(table.get(Fd::new(7)), Id::WAKEUP);
        // still there on a second read
        assert_eq!(table.get(Fd::new(7)), Id::WAKEUP);
    }

    #[test]
    fn invalid_to_invalid_does_not_underflow_waiters() {
        let mut table = WaitingTable::new();
        assert_eq!(table.get(Fd::new(10)), Id::INVALID);
        assert_eq!(table.waiters(), 0);
    }
}
