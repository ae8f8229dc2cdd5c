/*!

A GPU submission tracker for Vulkan layer interposition.

This crate is the core state machine behind a Vulkan layer that turns
intercepted command-buffer recording and queue-submission calls into a
causally ordered stream of GPU timing events: command-buffer spans and
nested debug-marker regions, each carrying both a CPU-side submission
timestamp and a resolved GPU timestamp in nanoseconds.

It does not talk to Vulkan itself. Everything that requires a real driver
call — resolving entry points, invoking them, transporting events out of
process — is injected through small capability traits
([`driver::GpuDriver`], [`producer::VulkanLayerProducer`],
[`producer::CaptureStatusListener`], [`clock::CpuClock`]) so the tracker
itself stays a plain, testable, non-generic type.

# Layout

- [`handles`] — opaque dispatchable/non-dispatchable handle types.
- [`dispatch`] — per-handle registry of resolved driver entry points.
- [`driver`] — the driver calls the core actually invokes.
- [`device`] / [`queue`] — logical-device/physical-device and queue-to-device
  registries.
- [`query_pool`] — the per-device pool of timestamp query slots.
- [`events`] / [`producer`] — the message shapes and the producer seam.
- [`clock`] — CPU-side timestamp source.
- [`submission_tracker`] — the orchestrator tying all of the above together.
*/

mod clock;
mod device;
mod dispatch;
mod driver;
mod errors;
mod events;
mod handles;
mod producer;
mod query_pool;
mod queue;
mod submission_tracker;

pub use clock::{CpuClock, SystemCpuClock};
pub use device::PhysicalDeviceProperties;
pub use dispatch::{
    DeviceFunctionTable, DispatchTable, GetProcAddr, InstanceFunctionTable, ProcAddr, REQUIRED_DEVICE_EXTENSIONS,
    REQUIRED_INSTANCE_EXTENSIONS,
};
pub use driver::GpuDriver;
pub use errors::{CreationError, SettingsError};
pub use events::{
    Color, Event, GpuDebugMarker, GpuQueueSubmission, InternedString, ResolvedCommandBuffer, ResolvedMarkerBegin,
    ResolvedSubmitInfo, SubmissionMetaInformation,
};
pub use handles::{CommandBuffer, CommandPool, Device, Dispatchable, DispatchKey, Instance, PhysicalDevice, Queue, QueryPoolHandle};
pub use producer::{CaptureOptions, CaptureStatusListener, VulkanLayerProducer};
pub use query_pool::DEFAULT_POOL_CAPACITY;
pub use submission_tracker::{QueueSubmission, SubmissionTracker};

/// Settings passed on construction of a [`SubmissionTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Number of timestamp query slots to allocate per device.
    ///
    /// Must be greater than 0. A submission that would need more
    /// outstanding slots than this drops its newest timestamp samples
    /// rather than blocking or erroring.
    pub pool_capacity: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.pool_capacity == 0 {
            Err(SettingsError::InvalidPoolCapacity)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert!(TrackerSettings::default().validate().is_ok());
    }

    #[test]
    fn zero_pool_capacity_is_rejected() {
        let settings = TrackerSettings { pool_capacity: 0 };
        assert_eq!(settings.validate().unwrap_err(), SettingsError::InvalidPoolCapacity);
    }
}
