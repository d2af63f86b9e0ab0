//! Fixed-capacity ring of per-branch slots.
//!
//! Ids are wrapping `u32`s handed out in program order. The live ids always
//! form the contiguous window `[front, back]`; retirement pops `front`,
//! flushes cut a suffix off `back`. Capacity is rounded up to a power of two
//! so an id maps to its slot with a mask.

use std::ops::{Index, IndexMut};

use crate::error::ArenaError;

pub struct BranchArena<T> {
    slots: Vec<T>,
    mask: u32,
    /// Oldest live id (next to retire).
    front: u32,
    /// Youngest live id; `front - 1` when empty.
    back: u32,
    len: usize,
}

impl<T: Default> BranchArena<T> {
    pub fn new(max_in_flight: usize) -> Self {
        assert!(max_in_flight > 0, "branch arena needs a non-zero capacity");
        let cap = max_in_flight.next_power_of_two().max(2);
        assert!(cap <= 1 << 31, "branch arena capacity {cap} too large");
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, T::default);
        Self {
            slots,
            mask: (cap - 1) as u32,
            front: 0,
            back: u32::MAX,
            len: 0,
        }
    }
}

impl<T> BranchArena<T> {
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn front_id(&self) -> u32 {
        self.front
    }

    pub fn back_id(&self) -> u32 {
        self.back
    }

    /// True iff `id` lies in the live window. Wrap-safe.
    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        (id.wrapping_sub(self.front) as usize) < self.len
    }

    fn check(&self, id: u32) -> Result<(), ArenaError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(ArenaError::StaleId {
                id,
                front: self.front,
                back: self.back,
            })
        }
    }

    pub fn get(&self, id: u32) -> Result<&T, ArenaError> {
        self.check(id)?;
        Ok(&self.slots[(id & self.mask) as usize])
    }

    pub fn get_mut(&mut self, id: u32) -> Result<&mut T, ArenaError> {
        self.check(id)?;
        Ok(&mut self.slots[(id & self.mask) as usize])
    }

    pub fn try_allocate_back(&mut self) -> Result<u32, ArenaError> {
        if self.is_full() {
            return Err(ArenaError::Full {
                capacity: self.capacity(),
            });
        }
        self.back = self.back.wrapping_add(1);
        self.len += 1;
        Ok(self.back)
    }

    /// Appends a new youngest id. Panics when full.
    pub fn allocate_back(&mut self) -> u32 {
        self.try_allocate_back().unwrap_or_else(|e| panic!("{e}"))
    }

    /// Checks that `id` is the oldest live id, i.e. the next to retire.
    pub fn check_front(&self, id: u32) -> Result<(), ArenaError> {
        if self.is_empty() {
            return Err(ArenaError::Empty);
        }
        if id != self.front {
            return Err(ArenaError::OutOfOrderRetire {
                id,
                front: self.front,
            });
        }
        Ok(())
    }

    pub fn try_deallocate_front(&mut self, id: u32) -> Result<(), ArenaError> {
        self.check_front(id)?;
        self.front = self.front.wrapping_add(1);
        self.len -= 1;
        Ok(())
    }

    /// Retires the oldest id; `id` must equal the current front.
    pub fn deallocate_front(&mut self, id: u32) {
        if let Err(e) = self.try_deallocate_front(id) {
            panic!("{e}");
        }
    }

    pub fn try_deallocate_after(&mut self, id: u32) -> Result<(), ArenaError> {
        self.check(id)?;
        self.len = id.wrapping_sub(self.front) as usize + 1;
        self.back = id;
        Ok(())
    }

    /// Drops every id younger than `id`; `id` stays live.
    pub fn deallocate_after(&mut self, id: u32) {
        if let Err(e) = self.try_deallocate_after(id) {
            panic!("{e}");
        }
    }

    pub fn try_deallocate_and_after(&mut self, id: u32) -> Result<(), ArenaError> {
        self.check(id)?;
        self.len = id.wrapping_sub(self.front) as usize;
        self.back = id.wrapping_sub(1);
        Ok(())
    }

    /// Drops `id` and every id younger than it.
    pub fn deallocate_and_after(&mut self, id: u32) {
        if let Err(e) = self.try_deallocate_and_after(id) {
            panic!("{e}");
        }
    }

    /// Live ids from youngest down to `oldest`, inclusive.
    pub fn ids_back_to(&self, oldest: u32) -> impl Iterator<Item = u32> + use<T> {
        let count = if self.contains(oldest) {
            self.back.wrapping_sub(oldest) as usize + 1
        } else {
            0
        };
        let back = self.back;
        (0..count).map(move |i| back.wrapping_sub(i as u32))
    }
}

impl<T> Index<u32> for BranchArena<T> {
    type Output = T;

    fn index(&self, id: u32) -> &T {
        self.get(id).unwrap_or_else(|e| panic!("{e}"))
    }
}

impl<T> IndexMut<u32> for BranchArena<T> {
    fn index_mut(&mut self, id: u32) -> &mut T {
        self.get_mut(id).unwrap_or_else(|e| panic!("{e}"))
    }
}
