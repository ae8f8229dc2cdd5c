//! Per-device pool of timestamp query slots.
//!
//! ```text
//! MarkQuerySlotForReset                  MarkQuerySlotDoneReading
//!           ------------- DoneReading <--------------
//!          |                                          |
//!          |                                          |
//!          |           NextReadyQuerySlot             |
//!          v          --------------------->          |
//! ReadyForQueryIssue                        QueryPendingOnGpu
//!          ^          <---------------------          |
//!          |         RollbackPendingQuerySlots        |
//!          |                                          |
//!          |                                          |
//!           ------------ ResetRequested <------------
//! MarkQuerySlotDoneReading                   MarkQuerySlotForReset
//! ```
//!
//! A slot only returns to `ReadyForQueryIssue` once both halves of its
//! retirement have happened: the tracker gave up reading it
//! ([`TimerQueryPool::mark_query_slots_done_reading`]) and its command
//! buffer was reset ([`TimerQueryPool::mark_query_slots_for_reset`]). Either
//! one alone parks the slot at `DoneReading` or `ResetRequested`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::GpuDriver;
use crate::errors::CreationError;
use crate::handles::{CommandBuffer, Device, QueryPoolHandle};

/// Default slot count for a pool, matching the original layer's default.
pub const DEFAULT_POOL_CAPACITY: u32 = 131072;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    ReadyForQueryIssue,
    QueryPendingOnGpu,
    DoneReading,
    ResetRequested,
}

struct DevicePool {
    query_pool: QueryPoolHandle,
    slot_states: Vec<SlotState>,
    free_slots: Vec<u32>,
}

/// Thread-safety: internally synchronized with a single reader/writer lock,
/// ranked below `SubmissionTracker` and above `DispatchTable` in the lock
/// order.
pub struct TimerQueryPool {
    driver: Arc<dyn GpuDriver + Send + Sync>,
    pools: RwLock<HashMap<Device, DevicePool>>,
    capacity: u32,
}

impl TimerQueryPool {
    /// `capacity` must be at least 1.
    pub fn new(driver: Arc<dyn GpuDriver + Send + Sync>, capacity: u32) -> Result<Self, CreationError> {
        if capacity == 0 {
            return Err(CreationError::InvalidPoolCapacity);
        }
        Ok(Self {
            driver,
            pools: RwLock::new(HashMap::new()),
            capacity,
        })
    }

    /// Creates and resets a `VkQueryPool` for `device`, ready to use for
    /// timestamp queries.
    pub fn initialize(&self, device: Device) {
        {
            let pools = self.pools.read();
            assert!(
                !pools.contains_key(&device),
                "precondition violated: timer query pool already initialized for this device"
            );
        }

        // Driver calls happen outside the lock.
        let query_pool = self.driver.create_query_pool(device, self.capacity);
        self.driver.reset_query_pool(device, query_pool, 0, self.capacity);

        let mut pools = self.pools.write();
        assert!(
            pools
                .insert(
                    device,
                    DevicePool {
                        query_pool,
                        slot_states: vec![SlotState::ReadyForQueryIssue; self.capacity as usize],
                        free_slots: (0..self.capacity).rev().collect(),
                    },
                )
                .is_none(),
            "precondition violated: timer query pool already initialized for this device"
        );
    }

    pub fn destroy(&self, device: Device) {
        let query_pool = {
            let mut pools = self.pools.write();
            pools
                .remove(&device)
                .expect("precondition violated: destroying an uninitialized timer query pool")
                .query_pool
        };
        self.driver.destroy_query_pool(device, query_pool);
    }

    pub fn query_pool(&self, device: Device) -> QueryPoolHandle {
        let pools = self.pools.read();
        pools
            .get(&device)
            .expect("precondition violated: timer query pool not initialized")
            .query_pool
    }

    /// Returns a free slot index, or `None` if the pool is exhausted.
    pub fn next_ready_query_slot(&self, device: Device) -> Option<u32> {
        let mut pools = self.pools.write();
        let pool = pools
            .get_mut(&device)
            .expect("precondition violated: timer query pool not initialized");
        let slot_index = pool.free_slots.pop()?;
        assert_eq!(
            pool.slot_states[slot_index as usize],
            SlotState::ReadyForQueryIssue,
            "free-slot bookkeeping is inconsistent"
        );
        pool.slot_states[slot_index as usize] = SlotState::QueryPendingOnGpu;
        Some(slot_index)
    }

    /// Returns slots that were allocated but never actually submitted to the
    /// driver (e.g. the command buffer holding them was reset before
    /// submission) back to `ReadyForQueryIssue` without touching the query
    /// pool's content.
    pub fn rollback_pending(&self, device: Device, slot_indices: &[u32]) {
        if slot_indices.is_empty() {
            return;
        }
        let mut pools = self.pools.write();
        let pool = pools
            .get_mut(&device)
            .expect("precondition violated: timer query pool not initialized");
        for &slot_index in slot_indices {
            let state = &mut pool.slot_states[slot_index as usize];
            assert_eq!(*state, SlotState::QueryPendingOnGpu, "slot not pending rollback");
            *state = SlotState::ReadyForQueryIssue;
            pool.free_slots.push(slot_index);
        }
    }

    /// Marks that the tracker will not attempt to read `slot_indices`
    /// anymore. A slot already at `ResetRequested` becomes free again (and
    /// its driver-side content is reset); a slot still `QueryPendingOnGpu`
    /// parks at `DoneReading`.
    pub fn mark_query_slots_done_reading(&self, device: Device, slot_indices: &[u32]) {
        if slot_indices.is_empty() {
            return;
        }
        let (query_pool, freed) = {
            let mut pools = self.pools.write();
            let pool = pools
                .get_mut(&device)
                .expect("precondition violated: timer query pool not initialized");
            let mut freed = Vec::new();
            for &slot_index in slot_indices {
                let state = &mut pool.slot_states[slot_index as usize];
                match *state {
                    SlotState::QueryPendingOnGpu => *state = SlotState::DoneReading,
                    SlotState::ResetRequested => {
                        *state = SlotState::ReadyForQueryIssue;
                        pool.free_slots.push(slot_index);
                        freed.push(slot_index);
                    }
                    other => panic!("precondition violated: slot in state {other:?} cannot be marked done reading"),
                }
            }
            (pool.query_pool, freed)
        };
        for slot_index in freed {
            self.driver.reset_query_pool(device, query_pool, slot_index, 1);
        }
    }

    /// Marks that `slot_indices` are no longer baked into any live command
    /// buffer (its command buffer/pool was reset). A slot already at
    /// `DoneReading` becomes free again (and is reset); a slot still
    /// `QueryPendingOnGpu` parks at `ResetRequested`.
    pub fn mark_query_slots_for_reset(&self, device: Device, slot_indices: &[u32]) {
        if slot_indices.is_empty() {
            return;
        }
        let (query_pool, freed) = {
            let mut pools = self.pools.write();
            let pool = pools
                .get_mut(&device)
                .expect("precondition violated: timer query pool not initialized");
            let mut freed = Vec::new();
            for &slot_index in slot_indices {
                let state = &mut pool.slot_states[slot_index as usize];
                match *state {
                    SlotState::QueryPendingOnGpu => *state = SlotState::ResetRequested,
                    SlotState::DoneReading => {
                        *state = SlotState::ReadyForQueryIssue;
                        pool.free_slots.push(slot_index);
                        freed.push(slot_index);
                    }
                    other => panic!("precondition violated: slot in state {other:?} cannot be marked for reset"),
                }
            }
            (pool.query_pool, freed)
        };
        for slot_index in freed {
            self.driver.reset_query_pool(device, query_pool, slot_index, 1);
        }
    }

    /// Records a GPU timestamp write for `slot_index` into `command_buffer`.
    pub fn write_timestamp(&self, device: Device, command_buffer: CommandBuffer, slot_index: u32) {
        let query_pool = self.query_pool(device);
        self.driver.cmd_write_timestamp(command_buffer, query_pool, slot_index);
    }

    /// Reads back a single resolved timestamp for `slot_index`, or `None` if
    /// the GPU has not finished that query yet.
    pub fn read_result(&self, device: Device, slot_index: u32) -> Option<u64> {
        let query_pool = self.query_pool(device);
        self.driver.get_query_pool_result(device, query_pool, slot_index)
    }
}
