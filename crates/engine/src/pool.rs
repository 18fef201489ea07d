//! Fixed pool of worker slots bounding concurrent execution.
//!
//! Slots are created once at engine initialization and only ever toggle
//! between idle and busy. All mutation happens under the dispatcher's state
//! lock; the pool itself is plain data.

use calcgrid_core::TaskId;

/// Index of a slot within the pool.
pub type SlotId = usize;

/// State of one execution slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    /// Busy executing the referenced task.
    Busy(TaskId),
}

/// Fixed array of execution slots.
pub struct WorkerPool {
    slots: Vec<SlotState>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![SlotState::Idle; size.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Claim the first idle slot for a task, if any.
    pub fn acquire(&mut self, task_id: &TaskId) -> Option<SlotId> {
        let slot = self.slots.iter().position(|s| *s == SlotState::Idle)?;
        self.slots[slot] = SlotState::Busy(task_id.clone());
        Some(slot)
    }

    /// Return a slot to idle.
    pub fn release(&mut self, slot: SlotId) {
        if let Some(state) = self.slots.get_mut(slot) {
            *state = SlotState::Idle;
        }
    }

    pub fn busy_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(s, SlotState::Idle))
            .count()
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.busy_count()
    }

    pub fn is_idle(&self) -> bool {
        self.busy_count() == 0
    }

    /// Task currently bound to a slot, if busy.
    pub fn task_in_slot(&self, slot: SlotId) -> Option<&TaskId> {
        match self.slots.get(slot) {
            Some(SlotState::Busy(id)) => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_until_exhausted() {
        let mut pool = WorkerPool::new(2);
        assert_eq!(pool.available(), 2);

        let a = pool.acquire(&"t1".to_string()).unwrap();
        let b = pool.acquire(&"t2".to_string()).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.busy_count(), 2);
        assert!(pool.acquire(&"t3".to_string()).is_none());
    }

    #[test]
    fn release_frees_slot() {
        let mut pool = WorkerPool::new(1);
        let slot = pool.acquire(&"t1".to_string()).unwrap();
        assert_eq!(pool.available(), 0);

        pool.release(slot);
        assert_eq!(pool.available(), 1);
        assert!(pool.is_idle());
        assert!(pool.acquire(&"t2".to_string()).is_some());
    }

    #[test]
    fn slot_tracks_bound_task() {
        let mut pool = WorkerPool::new(2);
        let slot = pool.acquire(&"t1".to_string()).unwrap();
        assert_eq!(pool.task_in_slot(slot), Some(&"t1".to_string()));

        pool.release(slot);
        assert_eq!(pool.task_in_slot(slot), None);
    }

    #[test]
    fn zero_size_pool_gets_one_slot() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.capacity(), 1);
    }
}
