//! The driver calls the core must actually invoke, as opposed to merely
//! resolving and storing their addresses ([`crate::dispatch::DispatchTable`]).
//!
//! Casting a resolved [`crate::dispatch::ProcAddr`] to its real Vulkan
//! function signature and calling it through is a "driver-call dispatch
//! table" kept external to the core. [`GpuDriver`] is the seam the core
//! calls through instead, in the same spirit as the other capability traits
//! this crate injects rather than exposing generic type parameters at the
//! public surface.

use crate::device::PhysicalDeviceProperties;
use crate::handles::{CommandBuffer, Device, PhysicalDevice, QueryPoolHandle};

/// Capability trait for the handful of driver calls `TimerQueryPool` and
/// `SubmissionTracker` must make themselves, rather than only forward.
/// Implementations live outside this crate, on top of the entry points
/// `DispatchTable` resolves.
pub trait GpuDriver {
    /// Creates a `VK_QUERY_TYPE_TIMESTAMP` pool with `capacity` slots.
    fn create_query_pool(&self, device: Device, capacity: u32) -> QueryPoolHandle;
    fn destroy_query_pool(&self, device: Device, pool: QueryPoolHandle);
    fn reset_query_pool(&self, device: Device, pool: QueryPoolHandle, first_query: u32, count: u32);
    /// Records a GPU timestamp write into `command_buffer` at `slot_index`.
    fn cmd_write_timestamp(&self, command_buffer: CommandBuffer, pool: QueryPoolHandle, slot_index: u32);
    /// Reads back a single resolved timestamp. `None` means the GPU has not
    /// finished that query yet (`VK_NOT_READY`); this is not an error.
    fn get_query_pool_result(&self, device: Device, pool: QueryPoolHandle, slot_index: u32) -> Option<u64>;
    /// `vkGetPhysicalDeviceProperties`, narrowed to the one field the
    /// tracker reads.
    fn physical_device_properties(&self, physical: PhysicalDevice) -> PhysicalDeviceProperties;
}
