//! Maps queues to their owning logical device.
//!
//! There is no `untrack`: Vulkan gives us no queue-destruction callback, and
//! a process typically has few enough devices that letting queue entries
//! live for the process lifetime is not a real leak. Queues are implicitly
//! freed along with their device.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::handles::{Device, Queue};

/// Thread-safety: internally synchronized with a single reader/writer lock.
/// A leaf lock: never calls back into the other components.
#[derive(Default)]
pub struct QueueManager {
    queue_to_device: RwLock<HashMap<Queue, Device>>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent for the same `(queue, device)` pair; re-binding `queue` to
    /// a different device is a precondition violation.
    pub fn track(&self, queue: Queue, device: Device) {
        let mut map = self.queue_to_device.write();
        match map.get(&queue) {
            Some(existing) => assert_eq!(
                *existing, device,
                "precondition violated: queue must not rebind to a different device"
            ),
            None => {
                map.insert(queue, device);
            }
        }
    }

    pub fn device_of(&self, queue: Queue) -> Device {
        let map = self.queue_to_device.read();
        *map.get(&queue).expect("precondition violated: unknown queue")
    }
}
