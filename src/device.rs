//! Maps logical devices to physical devices and caches physical-device
//! properties needed to convert raw timestamps to nanoseconds.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::dispatch::DispatchTable;
use crate::handles::{Device, PhysicalDevice};

/// Physical-device properties the tracker cares about. Real Vulkan carries
/// a much larger `VkPhysicalDeviceProperties` struct; the tracker only ever
/// reads `limits.timestampPeriod` when converting a raw timestamp to
/// nanoseconds, so that's all this caches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalDeviceProperties {
    pub timestamp_period_ns: f32,
}

struct State {
    logical_to_physical: HashMap<Device, PhysicalDevice>,
    physical_to_logicals: HashMap<PhysicalDevice, HashSet<Device>>,
    physical_to_properties: HashMap<PhysicalDevice, PhysicalDeviceProperties>,
}

/// Thread-safety: internally synchronized with a single reader/writer lock.
/// A leaf lock: never calls back into `SubmissionTracker` or
/// `TimerQueryPool`.
///
/// Generic over `Query`, the function that turns a physical device into its
/// cached properties. Casting `DispatchTable::get_physical_device_properties`
/// to its real signature and calling through is, like the driver calls
/// [`crate::driver::GpuDriver`] covers, external to this crate; callers
/// supply that as `query_properties`. There is no usable default, so
/// construction always goes through [`DeviceManager::with_property_query`].
pub struct DeviceManager<Query> {
    state: RwLock<State>,
    query_properties: Query,
}

impl<Query> DeviceManager<Query>
where
    Query: Fn(&DispatchTable, PhysicalDevice) -> PhysicalDeviceProperties,
{
    /// Constructs a manager with a custom property-query function, so tests
    /// can supply a physical device's `timestampPeriod` without a real
    /// driver.
    pub fn with_property_query(query_properties: Query) -> Self {
        Self {
            state: RwLock::new(State {
                logical_to_physical: HashMap::new(),
                physical_to_logicals: HashMap::new(),
                physical_to_properties: HashMap::new(),
            }),
            query_properties,
        }
    }

    /// Records `logical`'s physical device. On the first sighting of
    /// `physical`, queries and caches its properties via the dispatch
    /// table.
    ///
    /// Precondition: `logical` is not already tracked.
    pub fn track_logical(&self, dispatch_table: &DispatchTable, physical: PhysicalDevice, logical: Device) {
        let needs_properties = {
            let state = self.state.read();
            assert!(
                !state.logical_to_physical.contains_key(&logical),
                "precondition violated: duplicate logical device registration"
            );
            !state.physical_to_properties.contains_key(&physical)
        };

        // Querying the driver must not happen under our own lock: it's a
        // forwarded call, and nothing downstream may call back into us.
        let properties = needs_properties.then(|| (self.query_properties)(dispatch_table, physical));

        let mut state = self.state.write();
        state.logical_to_physical.insert(logical, physical);
        state.physical_to_logicals.entry(physical).or_default().insert(logical);
        if let Some(properties) = properties {
            state.physical_to_properties.entry(physical).or_insert(properties);
        }
    }

    /// Reverses `track_logical`. Drops the cached properties once the last
    /// logical device for `physical` is gone.
    pub fn untrack_logical(&self, logical: Device) {
        let mut state = self.state.write();
        let physical = state
            .logical_to_physical
            .remove(&logical)
            .expect("precondition violated: untracking an unknown logical device");

        let logicals = state
            .physical_to_logicals
            .get_mut(&physical)
            .expect("precondition violated: physical device bookkeeping is inconsistent");
        logicals.remove(&logical);
        if logicals.is_empty() {
            state.physical_to_logicals.remove(&physical);
            state.physical_to_properties.remove(&physical);
        }
    }

    pub fn physical_device_of(&self, logical: Device) -> PhysicalDevice {
        let state = self.state.read();
        *state
            .logical_to_physical
            .get(&logical)
            .expect("precondition violated: unknown logical device")
    }

    pub fn physical_device_properties(&self, physical: PhysicalDevice) -> PhysicalDeviceProperties {
        let state = self.state.read();
        *state
            .physical_to_properties
            .get(&physical)
            .expect("precondition violated: unknown physical device")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_fixed_period(period: f32) -> DeviceManager<impl Fn(&DispatchTable, PhysicalDevice) -> PhysicalDeviceProperties> {
        DeviceManager::with_property_query(move |_, _| PhysicalDeviceProperties {
            timestamp_period_ns: period,
        })
    }

    #[test]
    fn track_then_untrack_restores_pre_track_state() {
        let dispatch_table = DispatchTable::new();
        let manager = manager_with_fixed_period(1.5);
        let physical = PhysicalDevice(1);
        let logical = Device(10);

        manager.track_logical(&dispatch_table, physical, logical);
        assert_eq!(manager.physical_device_of(logical), physical);
        assert_eq!(manager.physical_device_properties(physical).timestamp_period_ns, 1.5);

        manager.untrack_logical(logical);

        manager.track_logical(&dispatch_table, physical, logical);
        assert_eq!(manager.physical_device_of(logical), physical);
    }

    #[test]
    fn properties_are_refcounted_by_the_logical_device_set() {
        let dispatch_table = DispatchTable::new();
        let manager = manager_with_fixed_period(2.0);
        let physical = PhysicalDevice(1);
        let first = Device(1);
        let second = Device(2);

        manager.track_logical(&dispatch_table, physical, first);
        manager.track_logical(&dispatch_table, physical, second);

        manager.untrack_logical(first);
        // Still one logical device left, properties must survive.
        assert_eq!(manager.physical_device_properties(physical).timestamp_period_ns, 2.0);

        manager.untrack_logical(second);
        // No thread left; properties dropped. Re-tracking re-queries them.
        let third = Device(3);
        manager.track_logical(&dispatch_table, physical, third);
        assert_eq!(manager.physical_device_properties(physical).timestamp_period_ns, 2.0);
    }

    #[test]
    #[should_panic(expected = "precondition violated: duplicate logical device registration")]
    fn duplicate_logical_device_registration_panics() {
        let dispatch_table = DispatchTable::new();
        let manager = manager_with_fixed_period(1.0);
        let physical = PhysicalDevice(1);
        let logical = Device(1);
        manager.track_logical(&dispatch_table, physical, logical);
        manager.track_logical(&dispatch_table, physical, logical);
    }
}
