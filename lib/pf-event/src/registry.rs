// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assigns stable [`TaskId`]s to statically-allocated tasks at startup.
//!
//! Grounded on `lib/fixedmap`'s const-generic fixed array (no allocator, no
//! growth, linear scan) rather than a dynamically-sized table: the set of
//! tasks in a PicoFramework application is fixed at link time, so a fixed
//! array sized generously at compile time is the natural fit, not a
//! generalization made "just in case."

use core::cell::RefCell;
use core::sync::atomic::{AtomicU16, Ordering};
use critical_section::Mutex;
use heapless::Vec as HVec;
use pf_abi::TaskId;

use crate::task::Notifiable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    Full,
}

/// Default capacity for [`TaskRegistry`]. Generous relative to any single
/// PicoFramework application's task count.
pub const DEFAULT_CAPACITY: usize = 16;

/// A fixed-size table mapping each registered task to a [`TaskId`] it keeps
/// for the life of the process.
pub struct TaskRegistry<const N: usize = DEFAULT_CAPACITY> {
    entries: Mutex<RefCell<HVec<(TaskId, &'static dyn Notifiable), N>>>,
    next_id: AtomicU16,
}

impl<const N: usize> Default for TaskRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TaskRegistry<N> {
    pub const fn new() -> Self {
        TaskRegistry {
            entries: Mutex::new(RefCell::new(HVec::new())),
            next_id: AtomicU16::new(0),
        }
    }

    /// Assigns the next `TaskId` to `task` and records it. Returns
    /// `Err(Full)` once `N` tasks have already been registered.
    pub fn register(&self, task: &'static dyn Notifiable) -> Result<TaskId, Error> {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::AcqRel));
        critical_section::with(|cs| {
            self.entries
                .borrow(cs)
                .borrow_mut()
                .push((id, task))
                .map_err(|_| Error::Full)
        })?;
        Ok(id)
    }

    pub fn lookup(&self, id: TaskId) -> Option<&'static dyn Notifiable> {
        critical_section::with(|cs| {
            self.entries
                .borrow(cs)
                .borrow()
                .iter()
                .find(|(entry_id, _)| *entry_id == id)
                .map(|(_, task)| *task)
        })
    }

    pub fn find_by_name(&self, name: &str) -> Option<TaskId> {
        critical_section::with(|cs| {
            self.entries
                .borrow(cs)
                .borrow()
                .iter()
                .find(|(_, task)| task.name() == name)
                .map(|(id, _)| *id)
        })
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.entries.borrow(cs).borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(&'static str);
    impl Notifiable for Dummy {
        fn name(&self) -> &'static str {
            self.0
        }
        fn notify(&self, _value: u32) {}
    }

    static A: Dummy = Dummy("a");
    static B: Dummy = Dummy("b");

    #[test]
    fn assigns_increasing_ids() {
        let reg: TaskRegistry<4> = TaskRegistry::new();
        let id_a = reg.register(&A).unwrap();
        let id_b = reg.register(&B).unwrap();
        assert_ne!(id_a, id_b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn lookup_and_find_by_name_round_trip() {
        let reg: TaskRegistry<4> = TaskRegistry::new();
        let id = reg.register(&A).unwrap();
        assert_eq!(reg.lookup(id).unwrap().name(), "a");
        assert_eq!(reg.find_by_name("a"), Some(id));
        assert_eq!(reg.find_by_name("nope"), None);
    }

    #[test]
    fn full_registry_refuses_more() {
        let reg: TaskRegistry<1> = TaskRegistry::new();
        reg.register(&A).unwrap();
        assert_eq!(reg.register(&B), Err(Error::Full));
    }
}
