//! # Pool Allocator
//!
//! Generation-checked slot allocator for records that are allocated and
//! released individually over many frames.

/// One slot of the pool.
struct Slot<T> {
    /// Incremented every time the slot is released.
    generation: u32,
    /// The stored value, `None` while the slot is free.
    value: Option<T>,
}

/// A pool allocator handing out generation-checked handles.
///
/// Slots are reserved up front and recycled through a free list. When the
/// reserved capacity runs out the pool grows, so allocation never fails.
/// Releasing a slot bumps its generation: handles issued before the release
/// no longer resolve, even after the slot is reused.
///
/// # Thread Safety
///
/// This pool is NOT thread-safe. It belongs to the thread that owns the
/// records it stores.
///
/// # Example
///
/// ```rust,ignore
/// let mut pool: PoolAllocator<&str> = PoolAllocator::new(16);
///
/// let handle = pool.allocate("region");
/// pool.free(handle);
///
/// // Stale: the slot was released.
/// assert!(pool.get(handle).is_none());
/// ```
pub struct PoolAllocator<T> {
    /// The slot array.
    slots: Vec<Slot<T>>,
    /// Free list - indices of available slots.
    free_list: Vec<u32>,
    /// Number of allocated objects.
    allocated_count: usize,
}

/// Handle to an allocated object in a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolHandle {
    /// Index into the pool.
    index: u32,
    /// Generation of the slot when the handle was issued.
    generation: u32,
}

impl PoolHandle {
    /// Returns the slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation the handle was issued for.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl<T> PoolAllocator<T> {
    /// Creates a new pool with `capacity` slots reserved.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of slots to reserve before the first growth
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.extend((0..capacity).map(|_| Slot { generation: 0, value: None }));

        // Lowest indices are handed out first.
        let free_list: Vec<u32> = (0..capacity as u32).rev().collect();

        Self {
            slots,
            free_list,
            allocated_count: 0,
        }
    }

    /// Returns the number of slots currently reserved.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of currently allocated objects.
    #[inline]
    #[must_use]
    pub const fn allocated_count(&self) -> usize {
        self.allocated_count
    }

    /// Returns true if nothing is allocated.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.allocated_count == 0
    }

    /// Stores `value` in a free slot, growing the pool if none is left.
    pub fn allocate(&mut self, value: T) -> PoolHandle {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot { generation: 0, value: None });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.value.is_none(), "free list handed out an occupied slot");
        slot.value = Some(value);
        self.allocated_count += 1;

        PoolHandle {
            index,
            generation: slot.generation,
        }
    }

    /// Releases the object behind `handle`.
    ///
    /// # Returns
    ///
    /// The released object, or None if the handle was stale.
    pub fn free(&mut self, handle: PoolHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        self.allocated_count -= 1;

        Some(value)
    }

    /// Returns true if `handle` still refers to a live object.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: PoolHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Gets a reference to an allocated object.
    #[inline]
    #[must_use]
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Gets a mutable reference to an allocated object.
    #[inline]
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Releases every object. All outstanding handles become stale.
    pub fn clear(&mut self) {
        self.free_list.clear();
        for (index, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free_list.push(index as u32);
        }
        self.allocated_count = 0;
    }

    /// Iterates over all allocated objects.
    pub fn iter(&self) -> impl Iterator<Item = (PoolHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|v| {
                (
                    PoolHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    v,
                )
            })
        })
    }
}

impl<T> Default for PoolAllocator<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allocate_free() {
        let mut pool: PoolAllocator<u32> = PoolAllocator::new(10);

        let h1 = pool.allocate(42);
        assert_eq!(*pool.get(h1).unwrap(), 42);
        assert_eq!(pool.allocated_count(), 1);

        let freed = pool.free(h1).unwrap();
        assert_eq!(freed, 42);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_pool_grows_past_capacity() {
        let mut pool: PoolAllocator<u8> = PoolAllocator::new(2);

        let _ = pool.allocate(1);
        let _ = pool.allocate(2);
        let h3 = pool.allocate(3);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(*pool.get(h3).unwrap(), 3);
    }

    #[test]
    fn test_pool_reuse_invalidates_old_handle() {
        let mut pool: PoolAllocator<u32> = PoolAllocator::new(1);

        let h1 = pool.allocate(1);
        pool.free(h1);

        let h2 = pool.allocate(2);
        assert_eq!(h1.index(), h2.index()); // Same slot reused
        assert_ne!(h1.generation(), h2.generation());
        assert!(pool.get(h1).is_none());
        assert_eq!(*pool.get(h2).unwrap(), 2);
    }

    #[test]
    fn test_pool_double_free_is_rejected() {
        let mut pool: PoolAllocator<u32> = PoolAllocator::new(4);

        let h = pool.allocate(9);
        assert_eq!(pool.free(h), Some(9));
        assert_eq!(pool.free(h), None);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_pool_clear_stales_everything() {
        let mut pool: PoolAllocator<u32> = PoolAllocator::new(4);

        let handles: Vec<_> = (0..4).map(|v| pool.allocate(v)).collect();
        pool.clear();

        assert!(pool.is_empty());
        assert!(handles.iter().all(|h| !pool.contains(*h)));
        assert_eq!(pool.iter().count(), 0);

        let fresh = pool.allocate(11);
        assert!(pool.contains(fresh));
    }
}
