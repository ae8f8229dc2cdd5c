//! Opaque driver handles.
//!
//! The layer never dereferences a handle; it only ever uses it as a hashable
//! key. Real Vulkan dispatchable handles (`VkInstance`, `VkDevice`,
//! `VkQueue`, `VkCommandBuffer`) are pointers whose first machine word is a
//! pointer to a loader-inserted dispatch table, and handles created from the
//! same instance/device share that first word. We keep that property
//! explicit instead of implicit: every dispatchable handle carries the
//! `DispatchKey` of the instance/device it was created from, and
//! [`Dispatchable::dispatch_key`] returns it. Non-dispatchable handles
//! (`VkCommandPool`, `VkQueryPool`) don't implement `Dispatchable`.

/// Key used to look up a [`crate::dispatch::DispatchTable`] entry. Handles
/// created from the same `VkInstance`/`VkDevice` carry the same key.
pub type DispatchKey = u64;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

define_handle!(
    /// `VkInstance`.
    Instance
);
define_handle!(
    /// `VkPhysicalDevice`.
    PhysicalDevice
);
define_handle!(
    /// `VkDevice`. Its inner value doubles as the [`DispatchKey`] for every
    /// handle created from it.
    Device
);
define_handle!(
    /// `VkCommandPool`. Not dispatchable.
    CommandPool
);
define_handle!(
    /// `VkCommandBuffer`.
    CommandBuffer
);
define_handle!(
    /// `VkQueryPool`. Not dispatchable.
    QueryPoolHandle
);

/// Implemented by handle types that are "dispatchable" in Vulkan's sense
/// (their value carries a [`DispatchKey`] shared with the instance/device
/// they were created from).
pub trait Dispatchable {
    fn dispatch_key(&self) -> DispatchKey;
}

impl Dispatchable for Instance {
    fn dispatch_key(&self) -> DispatchKey {
        self.0
    }
}

impl Dispatchable for Device {
    fn dispatch_key(&self) -> DispatchKey {
        self.0
    }
}

impl Queue {
    /// Constructs a queue handle that shares its owning device's dispatch key,
    /// matching the real loader's invariant that a queue's dispatch pointer
    /// equals its device's.
    pub fn new(device: Device, queue_id: u64) -> Self {
        Self {
            device_key: device.0,
            queue_id,
        }
    }
}

/// `VkQueue`. Distinct queues from the same device share a dispatch key but
/// must remain individually hashable, so this is not generated by
/// `define_handle!`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Queue {
    device_key: DispatchKey,
    queue_id: u64,
}

impl Dispatchable for Queue {
    fn dispatch_key(&self) -> DispatchKey {
        self.device_key
    }
}
