//! Per-handle registry of resolved driver function pointers.
//!
//! Real entry-point forwarding — actually *calling* the resolved pointer —
//! is a "plain function-pointer forwarding" shim that lives outside this
//! crate; this module only resolves and stores the pointers, keyed by
//! [`DispatchKey`]. A single reader/writer lock protects both maps: creation
//! and removal are rare (once per instance/device lifetime) while lookups
//! happen on every intercepted call, so readers must never block each
//! other.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::errors::CreationError;
use crate::handles::{Device, DispatchKey, Dispatchable, Instance};

/// A resolved driver entry point. The tracker never calls through this
/// itself (forwarding is an external concern); it only stores and returns
/// it so the passthrough shim can.
pub type ProcAddr = usize;

/// `next_get_instance_proc_addr` / `next_get_device_proc_addr`: the next
/// link's resolver in the layer chain, as handed to the layer's
/// `vkCreateInstance`/`vkCreateDevice` override.
pub trait GetProcAddr {
    fn get_proc_addr(&self, name: &'static str) -> Option<ProcAddr>;
}

impl<F> GetProcAddr for F
where
    F: Fn(&'static str) -> Option<ProcAddr>,
{
    fn get_proc_addr(&self, name: &'static str) -> Option<ProcAddr> {
        self(name)
    }
}

/// The fixed set of instance-level entry points the core requires.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceFunctionTable {
    pub get_physical_device_properties: Option<ProcAddr>,
    pub destroy_instance: Option<ProcAddr>,
}

/// The fixed set of device-level entry points the core requires, plus the
/// optional debug-utils/debug-marker entry points that are only
/// present when the corresponding extension is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceFunctionTable {
    pub reset_command_pool: Option<ProcAddr>,
    pub allocate_command_buffers: Option<ProcAddr>,
    pub free_command_buffers: Option<ProcAddr>,
    pub begin_command_buffer: Option<ProcAddr>,
    pub end_command_buffer: Option<ProcAddr>,
    pub reset_command_buffer: Option<ProcAddr>,
    pub get_device_queue: Option<ProcAddr>,
    pub get_device_queue2: Option<ProcAddr>,
    pub queue_submit: Option<ProcAddr>,
    pub queue_present_khr: Option<ProcAddr>,
    pub create_query_pool: Option<ProcAddr>,
    pub destroy_query_pool: Option<ProcAddr>,
    pub reset_query_pool_ext: Option<ProcAddr>,
    pub cmd_write_timestamp: Option<ProcAddr>,
    pub get_query_pool_results: Option<ProcAddr>,
    pub destroy_device: Option<ProcAddr>,

    pub cmd_begin_debug_utils_label_ext: Option<ProcAddr>,
    pub cmd_end_debug_utils_label_ext: Option<ProcAddr>,
    pub cmd_debug_marker_begin_ext: Option<ProcAddr>,
    pub cmd_debug_marker_end_ext: Option<ProcAddr>,

    pub debug_utils_supported: bool,
    pub debug_marker_supported: bool,
}

struct InstanceDispatch {
    functions: InstanceFunctionTable,
    debug_report_supported: bool,
}

/// Thread-safe registry of per-instance and per-device function tables.
///
/// Thread-safety: a single `RwLock` guards both maps. Accessors take a
/// shared lock; `create_*`/`remove_*` take an exclusive lock. `DispatchTable`
/// is always the innermost lock taken.
#[derive(Default)]
pub struct DispatchTable {
    instances: RwLock<HashMap<DispatchKey, InstanceDispatch>>,
    devices: RwLock<HashMap<DispatchKey, DeviceFunctionTable>>,
}

const INSTANCE_ENTRY_POINTS: &[&str] = &["vkGetPhysicalDeviceProperties", "vkDestroyInstance"];
const REQUIRED_DEVICE_ENTRY_POINTS: &[&str] = &[
    "vkResetCommandPool",
    "vkAllocateCommandBuffers",
    "vkFreeCommandBuffers",
    "vkBeginCommandBuffer",
    "vkEndCommandBuffer",
    "vkResetCommandBuffer",
    "vkGetDeviceQueue",
    "vkGetDeviceQueue2",
    "vkQueueSubmit",
    "vkQueuePresentKHR",
    "vkCreateQueryPool",
    "vkDestroyQueryPool",
    "vkResetQueryPoolEXT",
    "vkCmdWriteTimestamp",
    "vkGetQueryPoolResults",
    "vkDestroyDevice",
];

/// Auto-requested by the layer at instance creation (spec §6).
pub const REQUIRED_INSTANCE_EXTENSIONS: &[&str] = &["VK_KHR_get_physical_device_properties2"];
/// Auto-requested by the layer at device creation (spec §6).
pub const REQUIRED_DEVICE_EXTENSIONS: &[&str] = &["VK_EXT_host_query_reset"];

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks `required` against the names the driver actually enumerated
    /// downstream, matching spec §6: "if missing from downstream
    /// enumeration, the layer fails with a fatal error." Called by the
    /// (out-of-scope) bootstrap before `create_instance_dispatch` /
    /// `create_device_dispatch`; not a method on an existing dispatch
    /// because there is nothing to look up yet at that point.
    pub fn require_extensions(enumerated: &[&str], required: &[&'static str]) -> Result<(), CreationError> {
        for &name in required {
            if !enumerated.contains(&name) {
                return Err(CreationError::MissingExtension(name));
            }
        }
        Ok(())
    }

    /// Resolves the fixed set of instance-level entry points through
    /// `next_get_instance_proc_addr` and records the result under
    /// `instance`'s dispatch key.
    ///
    /// Precondition: no dispatch is currently registered for `instance`.
    pub fn create_instance_dispatch(&self, instance: Instance, next: &impl GetProcAddr) {
        let key = instance.dispatch_key();
        let mut functions = InstanceFunctionTable::default();
        functions.get_physical_device_properties = next.get_proc_addr("vkGetPhysicalDeviceProperties");
        functions.destroy_instance = next.get_proc_addr("vkDestroyInstance");

        let debug_report_supported = next.get_proc_addr("vkCreateDebugReportCallbackEXT").is_some()
            && next.get_proc_addr("vkDestroyDebugReportCallbackEXT").is_some();

        let mut instances = self.instances.write();
        assert!(
            !instances.contains_key(&key),
            "precondition violated: instance dispatch already registered for this key"
        );
        instances.insert(
            key,
            InstanceDispatch {
                functions,
                debug_report_supported,
            },
        );
    }

    pub fn remove_instance_dispatch(&self, instance: Instance) {
        let removed = self.instances.write().remove(&instance.dispatch_key());
        assert!(removed.is_some(), "precondition violated: unknown instance dispatch");
    }

    /// Resolves the fixed set of device-level entry points plus the optional
    /// debug-utils/debug-marker ones, recording which of those optional
    /// extensions are *fully* present (every entry point for that extension
    /// resolved).
    ///
    /// Precondition: no dispatch is currently registered for `device`.
    pub fn create_device_dispatch(&self, device: Device, next: &impl GetProcAddr) {
        let key = device.dispatch_key();
        let mut table = DeviceFunctionTable {
            reset_command_pool: next.get_proc_addr("vkResetCommandPool"),
            allocate_command_buffers: next.get_proc_addr("vkAllocateCommandBuffers"),
            free_command_buffers: next.get_proc_addr("vkFreeCommandBuffers"),
            begin_command_buffer: next.get_proc_addr("vkBeginCommandBuffer"),
            end_command_buffer: next.get_proc_addr("vkEndCommandBuffer"),
            reset_command_buffer: next.get_proc_addr("vkResetCommandBuffer"),
            get_device_queue: next.get_proc_addr("vkGetDeviceQueue"),
            get_device_queue2: next.get_proc_addr("vkGetDeviceQueue2"),
            queue_submit: next.get_proc_addr("vkQueueSubmit"),
            queue_present_khr: next.get_proc_addr("vkQueuePresentKHR"),
            create_query_pool: next.get_proc_addr("vkCreateQueryPool"),
            destroy_query_pool: next.get_proc_addr("vkDestroyQueryPool"),
            reset_query_pool_ext: next.get_proc_addr("vkResetQueryPoolEXT"),
            cmd_write_timestamp: next.get_proc_addr("vkCmdWriteTimestamp"),
            get_query_pool_results: next.get_proc_addr("vkGetQueryPoolResults"),
            destroy_device: next.get_proc_addr("vkDestroyDevice"),
            cmd_begin_debug_utils_label_ext: next.get_proc_addr("vkCmdBeginDebugUtilsLabelEXT"),
            cmd_end_debug_utils_label_ext: next.get_proc_addr("vkCmdEndDebugUtilsLabelEXT"),
            cmd_debug_marker_begin_ext: next.get_proc_addr("vkCmdDebugMarkerBeginEXT"),
            cmd_debug_marker_end_ext: next.get_proc_addr("vkCmdDebugMarkerEndEXT"),
            debug_utils_supported: false,
            debug_marker_supported: false,
        };
        table.debug_utils_supported =
            table.cmd_begin_debug_utils_label_ext.is_some() && table.cmd_end_debug_utils_label_ext.is_some();
        table.debug_marker_supported =
            table.cmd_debug_marker_begin_ext.is_some() && table.cmd_debug_marker_end_ext.is_some();

        if log::log_enabled!(log::Level::Debug) {
            for &name in REQUIRED_DEVICE_ENTRY_POINTS {
                log::debug!("device dispatch entry point resolved: {name}");
            }
        }

        let mut devices = self.devices.write();
        assert!(
            !devices.contains_key(&key),
            "precondition violated: device dispatch already registered for this key"
        );
        devices.insert(key, table);
    }

    pub fn remove_device_dispatch(&self, device: Device) {
        let removed = self.devices.write().remove(&device.dispatch_key());
        assert!(removed.is_some(), "precondition violated: unknown device dispatch");
    }

    fn with_device_table<R>(&self, handle: impl Dispatchable, f: impl FnOnce(&DeviceFunctionTable) -> R) -> R {
        let devices = self.devices.read();
        let table = devices
            .get(&handle.dispatch_key())
            .expect("precondition violated: no device dispatch registered for this handle");
        f(table)
    }

    pub fn cmd_write_timestamp(&self, handle: impl Dispatchable) -> ProcAddr {
        self.with_device_table(handle, |t| {
            t.cmd_write_timestamp.expect("vkCmdWriteTimestamp must resolve")
        })
    }

    pub fn get_query_pool_results(&self, handle: impl Dispatchable) -> ProcAddr {
        self.with_device_table(handle, |t| {
            t.get_query_pool_results.expect("vkGetQueryPoolResults must resolve")
        })
    }

    pub fn create_query_pool(&self, handle: impl Dispatchable) -> ProcAddr {
        self.with_device_table(handle, |t| t.create_query_pool.expect("vkCreateQueryPool must resolve"))
    }

    pub fn destroy_query_pool(&self, handle: impl Dispatchable) -> ProcAddr {
        self.with_device_table(handle, |t| t.destroy_query_pool.expect("vkDestroyQueryPool must resolve"))
    }

    pub fn reset_query_pool_ext(&self, handle: impl Dispatchable) -> ProcAddr {
        self.with_device_table(handle, |t| {
            t.reset_query_pool_ext.expect("vkResetQueryPoolEXT must resolve")
        })
    }

    pub fn get_physical_device_properties(&self, instance: Instance) -> ProcAddr {
        let instances = self.instances.read();
        instances
            .get(&instance.dispatch_key())
            .expect("precondition violated: no instance dispatch registered for this handle")
            .functions
            .get_physical_device_properties
            .expect("vkGetPhysicalDeviceProperties must resolve")
    }

    pub fn is_debug_utils_extension_supported(&self, handle: impl Dispatchable) -> bool {
        self.with_device_table(handle, |t| t.debug_utils_supported)
    }

    pub fn is_debug_marker_extension_supported(&self, handle: impl Dispatchable) -> bool {
        self.with_device_table(handle, |t| t.debug_marker_supported)
    }

    pub fn is_debug_report_extension_supported(&self, instance: Instance) -> bool {
        let instances = self.instances.read();
        instances
            .get(&instance.dispatch_key())
            .expect("precondition violated: no instance dispatch registered for this handle")
            .debug_report_supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::Queue;
    use std::collections::HashSet;

    fn full_resolver(present: &'static [&'static str]) -> impl GetProcAddr {
        let present: HashSet<&'static str> = present.iter().copied().collect();
        move |name: &'static str| present.contains(&name).then_some(name.as_ptr() as usize)
    }

    #[test]
    fn device_dispatch_flags_debug_marker_support_only_when_fully_present() {
        let table = DispatchTable::new();
        let device = Device(1);
        let mut entries: Vec<&str> = REQUIRED_DEVICE_ENTRY_POINTS.to_vec();
        entries.push("vkCmdDebugMarkerBeginEXT");
        // vkCmdDebugMarkerEndEXT deliberately missing: extension not "fully present".
        let leaked: &'static [&'static str] = Box::leak(entries.into_boxed_slice());
        table.create_device_dispatch(device, &full_resolver(leaked));

        assert!(!table.is_debug_marker_extension_supported(device));
        assert!(!table.is_debug_utils_extension_supported(device));
    }

    #[test]
    fn accessors_work_through_any_handle_sharing_the_dispatch_key() {
        let table = DispatchTable::new();
        let device = Device(42);
        let leaked: &'static [&'static str] = Box::leak(REQUIRED_DEVICE_ENTRY_POINTS.to_vec().into_boxed_slice());
        table.create_device_dispatch(device, &full_resolver(leaked));

        let queue = Queue::new(device, 7);
        // Accessing through the queue handle must resolve the same table as the device.
        assert_eq!(table.cmd_write_timestamp(device), table.cmd_write_timestamp(queue));
    }

    #[test]
    #[should_panic(expected = "precondition violated")]
    fn duplicate_device_dispatch_registration_is_a_precondition_violation() {
        let table = DispatchTable::new();
        let device = Device(1);
        let leaked: &'static [&'static str] = Box::leak(REQUIRED_DEVICE_ENTRY_POINTS.to_vec().into_boxed_slice());
        table.create_device_dispatch(device, &full_resolver(leaked));
        table.create_device_dispatch(device, &full_resolver(leaked));
    }

    #[test]
    fn require_extensions_passes_when_all_present() {
        let enumerated = ["VK_KHR_get_physical_device_properties2", "VK_KHR_swapchain"];
        assert!(DispatchTable::require_extensions(&enumerated, REQUIRED_INSTANCE_EXTENSIONS).is_ok());
    }

    #[test]
    fn require_extensions_fails_fatal_on_missing_extension() {
        let enumerated = ["VK_KHR_swapchain"];
        let err = DispatchTable::require_extensions(&enumerated, REQUIRED_DEVICE_EXTENSIONS).unwrap_err();
        assert_eq!(err, CreationError::MissingExtension("VK_EXT_host_query_reset"));
    }
}
