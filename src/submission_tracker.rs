//! The core state machine: bridges the driver's one-way
//! "issue now, results show up later" asynchrony into a causally ordered
//! [`crate::events::Event`] stream.
//!
//! `SubmissionTracker` is deliberately not generic over its collaborators
//! (unlike a design templated over its collaborators): it holds
//! `Arc<dyn GpuDriver>` / `Arc<dyn VulkanLayerProducer>` / `Arc<dyn
//! CpuClock>` trait objects instead, so nothing about its public surface
//! reveals how those are implemented. Tests inject fakes through the same
//! constructor production code uses.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::CpuClock;
use crate::device::{DeviceManager, PhysicalDeviceProperties};
use crate::dispatch::DispatchTable;
use crate::driver::GpuDriver;
use crate::errors::CreationError;
use crate::events::{
    Color, Event, GpuDebugMarker, GpuQueueSubmission, InternedString, ResolvedCommandBuffer, ResolvedMarkerBegin,
    ResolvedSubmitInfo, SubmissionMetaInformation,
};
use crate::handles::{CommandBuffer, CommandPool, Device, PhysicalDevice, Queue};
use crate::producer::{CaptureOptions, CaptureStatusListener, VulkanLayerProducer};
use crate::query_pool::TimerQueryPool;
use crate::queue::QueueManager;
use crate::TrackerSettings;

type PropertyQuery = Box<dyn Fn(&DispatchTable, PhysicalDevice) -> PhysicalDeviceProperties + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Begin,
    End,
}

/// One pending marker entry in a [`CommandBufferState`]. `slot`
/// is `None` when the marker wasn't captured at all (not capturing at
/// record time, or cut off by the local depth limit).
#[derive(Debug, Clone)]
struct Marker {
    kind: MarkerKind,
    slot: Option<u32>,
    label: Option<String>,
    color: Option<Color>,
    cut_off: bool,
}

/// Transient bookkeeping for one command buffer, from its `begin` to its
/// enclosing submission's completion.
#[derive(Debug, Default)]
struct CommandBufferState {
    begin_slot: Option<u32>,
    end_slot: Option<u32>,
    markers: Vec<Marker>,
    local_marker_depth: u32,
    /// Set by [`SubmissionTracker::on_capture_finished`]'s orphan sweep: the
    /// slots this state still references have already been marked
    /// done-reading, so a later reset/untrack must supply the other half of
    /// the pairing via `mark_query_slots_for_reset`, not `rollback_pending`
    /// (which only applies to a slot nothing has attempted to read yet).
    swept_done_reading: bool,
}

/// The begin half of an in-flight marker, carried on a queue's marker stack
/// until its matching end arrives.
#[derive(Debug, Clone)]
struct MarkerState {
    label: String,
    color: Option<Color>,
    begin_info: Option<(SubmissionMetaInformation, u32)>,
    depth: u32,
    depth_exceeds_maximum: bool,
}

/// A command buffer's begin/end slots as they moved into a submission
/// record.
#[derive(Debug, Clone, Copy)]
struct SubmittedCommandBuffer {
    begin_slot: Option<u32>,
    end_slot: u32,
}

#[derive(Debug, Clone, Default)]
struct SubmitInfo {
    command_buffers: Vec<SubmittedCommandBuffer>,
}

/// A marker whose end was recorded within some submission. Only these
/// are ever emitted.
#[derive(Debug, Clone)]
struct SubmittedMarkerSlice {
    begin_info: Option<(SubmissionMetaInformation, u32)>,
    end_slot: u32,
    label: String,
    color: Option<Color>,
    depth: u32,
}

/// A submission snapshot, produced by
/// [`SubmissionTracker::persist_command_buffers_on_submit`] and threaded
/// through [`SubmissionTracker::persist_debug_markers_on_submit`] by the
/// caller. Opaque to callers beyond holding and passing it back; that's
/// why every field is crate-private.
#[derive(Debug, Clone)]
pub struct QueueSubmission {
    queue: Queue,
    meta_info: SubmissionMetaInformation,
    submit_infos: Vec<SubmitInfo>,
    completed_markers: Vec<SubmittedMarkerSlice>,
    num_begin_markers: u32,
}

#[derive(Default)]
struct State {
    cb_states: HashMap<CommandBuffer, CommandBufferState>,
    cb_to_device: HashMap<CommandBuffer, Device>,
    cb_to_pool: HashMap<CommandBuffer, CommandPool>,
    pool_to_cbs: HashMap<CommandPool, HashSet<CommandBuffer>>,
    per_queue_submissions: HashMap<Queue, VecDeque<QueueSubmission>>,
    per_queue_marker_stack: HashMap<Queue, Vec<MarkerState>>,
    max_local_marker_depth: u32,
    intern_cache: HashMap<u64, ()>,
}

/// The core orchestrator. Owns no generic parameters; every collaborator
/// is injected as a trait object at construction, and its own bookkeeping
/// lives behind a single reader/writer lock, innermost of which is
/// `TimerQueryPool`, innermost of which is `DispatchTable`.
pub struct SubmissionTracker {
    producer: Arc<dyn VulkanLayerProducer>,
    driver: Arc<dyn GpuDriver + Send + Sync>,
    clock: Arc<dyn CpuClock>,
    timer_query_pool: TimerQueryPool,
    device_manager: DeviceManager<PropertyQuery>,
    queue_manager: QueueManager,
    dispatch_table: Arc<DispatchTable>,
    state: RwLock<State>,
}

fn thread_id_as_u64() -> u64 {
    format!("{:?}", std::thread::current().id())
        .trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .parse()
        .unwrap_or(u64::MAX)
}

fn intern_key(label: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    label.hash(&mut hasher);
    hasher.finish()
}

impl SubmissionTracker {
    pub fn new(
        settings: TrackerSettings,
        producer: Arc<dyn VulkanLayerProducer>,
        driver: Arc<dyn GpuDriver + Send + Sync>,
        dispatch_table: Arc<DispatchTable>,
        clock: Arc<dyn CpuClock>,
    ) -> Result<Self, CreationError> {
        if settings.pool_capacity == 0 {
            return Err(CreationError::InvalidPoolCapacity);
        }
        let timer_query_pool = TimerQueryPool::new(driver.clone(), settings.pool_capacity)?;
        let property_driver = driver.clone();
        let device_manager = DeviceManager::with_property_query(Box::new(
            move |_dispatch_table: &DispatchTable, physical: PhysicalDevice| property_driver.physical_device_properties(physical),
        ) as PropertyQuery);
        Ok(Self {
            producer,
            driver,
            clock,
            timer_query_pool,
            device_manager,
            queue_manager: QueueManager::new(),
            dispatch_table,
            state: RwLock::new(State {
                max_local_marker_depth: u32::MAX,
                ..State::default()
            }),
        })
    }

    // ---- device / queue registries ---------------------------------------

    pub fn track_device(&self, physical: PhysicalDevice, logical: Device) {
        self.device_manager.track_logical(&self.dispatch_table, physical, logical);
        self.timer_query_pool.initialize(logical);
    }

    pub fn untrack_device(&self, logical: Device) {
        self.timer_query_pool.destroy(logical);
        self.device_manager.untrack_logical(logical);
    }

    pub fn track_queue(&self, queue: Queue, device: Device) {
        self.queue_manager.track(queue, device);
    }

    // ---- command-buffer bookkeeping ---------------------------------------

    /// Precondition: none of `command_buffers` is already tracked.
    pub fn track_command_buffers(&self, device: Device, pool: CommandPool, command_buffers: &[CommandBuffer]) {
        let mut state = self.state.write();
        for &cb in command_buffers {
            assert!(
                state.cb_to_device.insert(cb, device).is_none(),
                "precondition violated: duplicate command buffer registration"
            );
            state.cb_to_pool.insert(cb, pool);
            state.pool_to_cbs.entry(pool).or_default().insert(cb);
        }
    }

    pub fn untrack_command_buffers(&self, device: Device, pool: CommandPool, command_buffers: &[CommandBuffer]) {
        let mut rollback_slots = Vec::new();
        let mut reset_slots = Vec::new();
        {
            let mut state = self.state.write();
            for &cb in command_buffers {
                if let Some(cb_state) = state.cb_states.remove(&cb) {
                    let (rollback, reset) = live_slots_by_disposition(&cb_state);
                    rollback_slots.extend(rollback);
                    reset_slots.extend(reset);
                }
                state.cb_to_device.remove(&cb);
                state.cb_to_pool.remove(&cb);
                if let Some(set) = state.pool_to_cbs.get_mut(&pool) {
                    set.remove(&cb);
                }
            }
        }
        if !rollback_slots.is_empty() {
            self.timer_query_pool.rollback_pending(device, &rollback_slots);
        }
        if !reset_slots.is_empty() {
            self.timer_query_pool.mark_query_slots_for_reset(device, &reset_slots);
        }
    }

    pub fn reset_command_buffer(&self, cb: CommandBuffer) {
        let (device, rollback_slots, reset_slots) = {
            let mut state = self.state.write();
            let device = *state
                .cb_to_device
                .get(&cb)
                .expect("precondition violated: unknown command buffer");
            let (rollback_slots, reset_slots) = state
                .cb_states
                .remove(&cb)
                .map(|s| live_slots_by_disposition(&s))
                .unwrap_or_default();
            (device, rollback_slots, reset_slots)
        };
        if !rollback_slots.is_empty() {
            self.timer_query_pool.rollback_pending(device, &rollback_slots);
        }
        if !reset_slots.is_empty() {
            self.timer_query_pool.mark_query_slots_for_reset(device, &reset_slots);
        }
    }

    pub fn reset_command_pool(&self, pool: CommandPool) {
        let cbs: Vec<CommandBuffer> = {
            let state = self.state.read();
            state.pool_to_cbs.get(&pool).map(|set| set.iter().copied().collect()).unwrap_or_default()
        };
        for cb in cbs {
            self.reset_command_buffer(cb);
        }
    }

    // ---- recording ---------------------------------------------------------

    /// Precondition: no state currently exists for `cb`.
    pub fn mark_command_buffer_begin(&self, cb: CommandBuffer) {
        let device = self.device_of(cb);
        {
            let mut state = self.state.write();
            assert!(
                !state.cb_states.contains_key(&cb),
                "precondition violated: command buffer already has an open begin"
            );
            state.cb_states.insert(cb, CommandBufferState::default());
        }
        if !self.producer.is_capturing() {
            return;
        }
        if let Some(slot) = self.record_timestamp(device, cb) {
            let mut state = self.state.write();
            if let Some(cb_state) = state.cb_states.get_mut(&cb) {
                cb_state.begin_slot = Some(slot);
            }
        }
    }

    /// No-op if no state exists for `cb` (the command buffer was reset and
    /// re-begun while no capture was active).
    pub fn mark_command_buffer_end(&self, cb: CommandBuffer) {
        if !self.producer.is_capturing() {
            return;
        }
        if !self.state.read().cb_states.contains_key(&cb) {
            return;
        }
        let device = self.device_of(cb);
        if let Some(slot) = self.record_timestamp(device, cb) {
            let mut state = self.state.write();
            if let Some(cb_state) = state.cb_states.get_mut(&cb) {
                cb_state.end_slot = Some(slot);
            }
        }
    }

    /// Precondition: `cb` has an open begin.
    pub fn mark_debug_marker_begin(&self, cb: CommandBuffer, label: &str, color: Color) {
        let (device, marker_index, cut_off) = {
            let mut state = self.state.write();
            let device = *state
                .cb_to_device
                .get(&cb)
                .expect("precondition violated: unknown command buffer");
            let max_depth = state.max_local_marker_depth;
            let cb_state = state
                .cb_states
                .get_mut(&cb)
                .expect("precondition violated: debug marker begin without a command buffer begin");
            cb_state.local_marker_depth += 1;
            let cut_off = cb_state.local_marker_depth > max_depth;
            cb_state.markers.push(Marker {
                kind: MarkerKind::Begin,
                slot: None,
                label: Some(label.to_owned()),
                color: color.non_zero(),
                cut_off,
            });
            (device, cb_state.markers.len() - 1, cut_off)
        };

        if !self.producer.is_capturing() || cut_off {
            return;
        }
        if let Some(slot) = self.record_timestamp(device, cb) {
            let mut state = self.state.write();
            if let Some(cb_state) = state.cb_states.get_mut(&cb) {
                if let Some(marker) = cb_state.markers.get_mut(marker_index) {
                    marker.slot = Some(slot);
                }
            }
        }
    }

    /// Decrements the local marker-depth counter, clamped at zero: an `end`
    /// in one command buffer whose `begin` was recorded in another must not
    /// underflow.
    pub fn mark_debug_marker_end(&self, cb: CommandBuffer) {
        let (device, marker_index, cut_off) = {
            let mut state = self.state.write();
            let device = *state
                .cb_to_device
                .get(&cb)
                .expect("precondition violated: unknown command buffer");
            let max_depth = state.max_local_marker_depth;
            let cb_state = state
                .cb_states
                .get_mut(&cb)
                .expect("precondition violated: debug marker end without a command buffer begin");
            let cut_off = cb_state.local_marker_depth > max_depth;
            cb_state.markers.push(Marker {
                kind: MarkerKind::End,
                slot: None,
                label: None,
                color: None,
                cut_off,
            });
            let marker_index = cb_state.markers.len() - 1;
            cb_state.local_marker_depth = cb_state.local_marker_depth.saturating_sub(1);
            (device, marker_index, cut_off)
        };

        if !self.producer.is_capturing() || cut_off {
            return;
        }
        if let Some(slot) = self.record_timestamp(device, cb) {
            let mut state = self.state.write();
            if let Some(cb_state) = state.cb_states.get_mut(&cb) {
                if let Some(marker) = cb_state.markers.get_mut(marker_index) {
                    marker.slot = Some(slot);
                }
            }
        }
    }

    /// Acquires a slot and writes a timestamp into `cb`, outside of
    /// `self.state`'s lock: the driver call must not be made while holding
    /// it. Pool exhaustion is a precondition violation given the pool's
    /// size, but is handled defensively here as a dropped sample.
    fn record_timestamp(&self, device: Device, cb: CommandBuffer) -> Option<u32> {
        match self.timer_query_pool.next_ready_query_slot(device) {
            Some(slot) => {
                self.timer_query_pool.write_timestamp(device, cb, slot);
                Some(slot)
            }
            None => {
                log::debug!("timer query pool exhausted for device {device:?}; dropping a timestamp sample");
                None
            }
        }
    }

    fn device_of(&self, cb: CommandBuffer) -> Device {
        *self
            .state
            .read()
            .cb_to_device
            .get(&cb)
            .expect("precondition violated: unknown command buffer")
    }

    /// Both halves of freeing a slot at once: the tracker will never read it
    /// again ([`TimerQueryPool::mark_query_slots_done_reading`]) and nothing
    /// references it anymore ([`TimerQueryPool::mark_query_slots_for_reset`]).
    /// Used both for slots the tracker decided not to carry through to
    /// resolution (e.g. a cut-off marker's lone surviving slot) and for
    /// slots that were just resolved in [`Self::complete_submits`], where
    /// both conditions become true simultaneously.
    fn abandon_slots(&self, device: Device, slots: &[u32]) {
        if slots.is_empty() {
            return;
        }
        self.timer_query_pool.mark_query_slots_done_reading(device, slots);
        self.timer_query_pool.mark_query_slots_for_reset(device, slots);
    }

    // ---- submission ---------------------------------------------------------

    /// Runs before the driver's `vkQueueSubmit`. `None` if not capturing.
    pub fn persist_command_buffers_on_submit(&self, queue: Queue, submits: &[Vec<CommandBuffer>]) -> Option<QueueSubmission> {
        if !self.producer.is_capturing() {
            return None;
        }
        let pre_submit_cpu_ns = self.clock.now_ns();
        let mut submit_infos = Vec::with_capacity(submits.len());
        {
            let mut state = self.state.write();
            for submit in submits {
                let mut command_buffers = Vec::new();
                for &cb in submit {
                    if let Some(cb_state) = state.cb_states.get_mut(&cb) {
                        if let Some(end_slot) = cb_state.end_slot.take() {
                            command_buffers.push(SubmittedCommandBuffer {
                                begin_slot: cb_state.begin_slot.take(),
                                end_slot,
                            });
                        }
                    }
                }
                submit_infos.push(SubmitInfo { command_buffers });
            }
        }
        Some(QueueSubmission {
            queue,
            meta_info: SubmissionMetaInformation {
                pre_submit_cpu_ns,
                post_submit_cpu_ns: None,
                thread_id: thread_id_as_u64(),
                process_id: std::process::id(),
            },
            submit_infos,
            completed_markers: Vec::new(),
            num_begin_markers: 0,
        })
    }

    /// Runs after the driver's `vkQueueSubmit`. `submission` is whatever
    /// [`Self::persist_command_buffers_on_submit`] returned, including
    /// `None` if capture stopped in between, which is tolerated.
    pub fn persist_debug_markers_on_submit(&self, queue: Queue, submits: &[Vec<CommandBuffer>], mut submission: Option<QueueSubmission>) {
        let post_submit_cpu_ns = self.clock.now_ns();
        if let Some(sub) = submission.as_mut() {
            sub.meta_info.post_submit_cpu_ns = Some(post_submit_cpu_ns);
        }
        let device = self.queue_manager.device_of(queue);
        let mut abandoned = Vec::new();

        {
            let mut state = self.state.write();
            let mut marker_stack = state.per_queue_marker_stack.remove(&queue).unwrap_or_default();

            for submit in submits {
                for &cb in submit {
                    let Some(cb_state) = state.cb_states.remove(&cb) else {
                        continue;
                    };
                    // Leftover begin/end slots mean capture stopped between
                    // record time and persist_command_buffers_on_submit,
                    // which returned None without harvesting them.
                    abandoned.extend(cb_state.begin_slot);
                    abandoned.extend(cb_state.end_slot);

                    for marker in cb_state.markers {
                        match marker.kind {
                            MarkerKind::Begin => {
                                let begin_info = match marker.slot {
                                    Some(slot) => match submission.as_mut() {
                                        Some(sub) => {
                                            sub.num_begin_markers += 1;
                                            Some((sub.meta_info, slot))
                                        }
                                        None => {
                                            abandoned.push(slot);
                                            None
                                        }
                                    },
                                    None => None,
                                };
                                marker_stack.push(MarkerState {
                                    label: marker.label.unwrap_or_default(),
                                    color: marker.color,
                                    begin_info,
                                    depth: marker_stack.len() as u32,
                                    depth_exceeds_maximum: marker.cut_off,
                                });
                            }
                            MarkerKind::End => {
                                if let Some(begin_state) = marker_stack.pop() {
                                    if let Some((_, begin_slot)) = begin_state.begin_info {
                                        if submission.is_none() {
                                            abandoned.push(begin_slot);
                                        }
                                    }
                                    let mut end_claimed = false;
                                    if !begin_state.depth_exceeds_maximum {
                                        if let (Some(sub), Some(end_slot)) = (submission.as_mut(), marker.slot) {
                                            sub.completed_markers.push(SubmittedMarkerSlice {
                                                begin_info: begin_state.begin_info,
                                                end_slot,
                                                label: begin_state.label,
                                                color: begin_state.color,
                                                depth: begin_state.depth,
                                            });
                                            end_claimed = true;
                                        }
                                    }
                                    if !end_claimed {
                                        abandoned.extend(marker.slot);
                                    }
                                }
                            }
                        }
                    }
                }
            }

            state.per_queue_marker_stack.insert(queue, marker_stack);
            if let Some(sub) = submission {
                state.per_queue_submissions.entry(queue).or_default().push_back(sub);
            }
        }

        self.abandon_slots(device, &abandoned);
    }

    // ---- completion ---------------------------------------------------------

    /// Periodic completion tick, called on queue present.
    pub fn complete_submits(&self, device: Device) {
        let collected = self.pull_completed_submissions(device);
        if collected.is_empty() {
            return;
        }

        let physical = self.device_manager.physical_device_of(device);
        let timestamp_period = self.device_manager.physical_device_properties(physical).timestamp_period_ns;

        let mut ready_events = Vec::new();
        let mut resolved_slots = Vec::new();
        let mut blocked_tail = Vec::new();
        let mut blocked = false;

        for submission in collected {
            if blocked {
                blocked_tail.push(submission);
                continue;
            }
            match self.try_resolve(device, &submission, timestamp_period) {
                Some((resolved, labels)) => {
                    resolved_slots.extend(submission_slots(&submission));
                    ready_events.push((resolved, labels));
                }
                None => {
                    blocked = true;
                    blocked_tail.push(submission);
                }
            }
        }

        if !blocked_tail.is_empty() {
            let mut state = self.state.write();
            for submission in blocked_tail.into_iter().rev() {
                state.per_queue_submissions.entry(submission.queue).or_default().push_front(submission);
            }
        }

        // A resolved submission's slots are both "done reading" (the event
        // carrying their value has just been built) and "no command buffer
        // references them anymore" (they were already detached from their
        // CommandBufferState at submit time) — both halves of the pairing
        // are satisfied at once, so these slots go straight back to the
        // free pool instead of parking in an intermediate state.
        self.abandon_slots(device, &resolved_slots);

        for (event, labels) in ready_events {
            self.emit_resolved(event, labels);
        }
    }

    /// Scans every queue of `device`, draining submissions whose terminal
    /// timestamp is readable. Drops empty submissions immediately; leaves
    /// `NOT_READY` ones in place, never retried twice in one tick. Returns
    /// the drained set sorted by `pre_submit_cpu_ns` ascending.
    fn pull_completed_submissions(&self, device: Device) -> Vec<QueueSubmission> {
        let mut collected = Vec::new();
        let mut state = self.state.write();
        for (&queue, submissions) in state.per_queue_submissions.iter_mut() {
            if self.queue_manager.device_of(queue) != device {
                continue;
            }
            loop {
                let Some(front) = submissions.front() else { break };
                if submission_is_empty(front) {
                    submissions.pop_front();
                    continue;
                }
                let terminal_slot = terminal_slot_of(front);
                match self.timer_query_pool.read_result(device, terminal_slot) {
                    Some(_) => collected.push(submissions.pop_front().expect("front just matched")),
                    None => break,
                }
            }
        }
        collected.sort_by_key(|s| s.meta_info.pre_submit_cpu_ns);
        collected
    }

    /// Attempts to resolve every timestamp of `submission` via single-slot
    /// queries. `None` if any of them is still `NOT_READY`; `submission`
    /// itself is left untouched on failure so it can be retried whole on
    /// the next tick.
    fn try_resolve(&self, device: Device, submission: &QueueSubmission, timestamp_period: f32) -> Option<(GpuQueueSubmission, Vec<(u64, String)>)> {
        let resolve = |slot: u32| -> Option<f64> {
            let raw = self.timer_query_pool.read_result(device, slot)?;
            Some((raw as f64 * timestamp_period as f64).round())
        };

        let mut submit_infos = Vec::with_capacity(submission.submit_infos.len());
        for submit_info in &submission.submit_infos {
            let mut command_buffers = Vec::with_capacity(submit_info.command_buffers.len());
            for scb in &submit_info.command_buffers {
                let begin_gpu_timestamp_ns = match scb.begin_slot {
                    Some(slot) => Some(resolve(slot)?),
                    None => None,
                };
                let end_gpu_timestamp_ns = resolve(scb.end_slot)?;
                command_buffers.push(ResolvedCommandBuffer {
                    begin_gpu_timestamp_ns,
                    end_gpu_timestamp_ns,
                });
            }
            submit_infos.push(ResolvedSubmitInfo { command_buffers });
        }

        let mut completed_markers = Vec::with_capacity(submission.completed_markers.len());
        let mut labels = Vec::with_capacity(submission.completed_markers.len());
        for marker in &submission.completed_markers {
            let begin_marker = match marker.begin_info {
                Some((meta_info, slot)) => Some(ResolvedMarkerBegin {
                    meta_info,
                    gpu_timestamp_ns: resolve(slot)?,
                }),
                None => None,
            };
            let end_gpu_timestamp_ns = resolve(marker.end_slot)?;
            let text_key = intern_key(&marker.label);
            labels.push((text_key, marker.label.clone()));
            completed_markers.push(GpuDebugMarker {
                text_key,
                color: marker.color,
                depth: marker.depth,
                end_gpu_timestamp_ns,
                begin_marker,
            });
        }

        Some((
            GpuQueueSubmission {
                queue: submission.queue,
                meta_info: submission.meta_info,
                submit_infos,
                num_begin_markers: submission.num_begin_markers,
                completed_markers,
            },
            labels,
        ))
    }

    /// Emits an `InternedString` event for any label not yet seen this
    /// capture before the `GpuQueueSubmission` event that first references
    /// it; the cache is cleared on every `on_capture_start` so labels are
    /// re-interned across successive captures.
    fn emit_resolved(&self, event: GpuQueueSubmission, labels: Vec<(u64, String)>) {
        for (key, label) in labels {
            let is_new = {
                let mut state = self.state.write();
                state.intern_cache.insert(key, ()).is_none()
            };
            if is_new {
                self.producer.emit(Event::InternedString(InternedString { key, intern: label }));
            }
        }
        self.producer.emit(Event::GpuQueueSubmission(event));
    }

    // ---- capture lifecycle ---------------------------------------------------

    pub fn on_capture_start(&self, options: CaptureOptions) {
        let mut state = self.state.write();
        state.max_local_marker_depth = options.max_local_marker_depth_per_command_buffer;
        state.intern_cache.clear();
    }

    pub fn on_capture_stop(&self) {
        // No state change to in-flight slots: new timestamp writes stop
        // because producer.is_capturing() now reads false; submissions
        // already in flight complete naturally.
    }

    /// Sweeps every live `CommandBufferState` for slots still referenced by
    /// a begin/end/marker field and marks them done-reading, so they don't
    /// orphan waiting for a submission that will never arrive. Flags the
    /// swept state so that a later reset/untrack of the same command buffer
    /// supplies the other half of the pairing via `mark_query_slots_for_reset`
    /// instead of `rollback_pending` (the slot is no longer merely
    /// "written but unsubmitted" — the tracker has already given up reading
    /// it, so rolling it back without a driver-side reset would be wrong).
    pub fn on_capture_finished(&self) {
        let by_device: HashMap<Device, Vec<u32>> = {
            let mut state = self.state.write();
            let State { cb_states, cb_to_device, .. } = &mut *state;
            let mut by_device: HashMap<Device, Vec<u32>> = HashMap::new();
            for (cb, cb_state) in cb_states.iter_mut() {
                let slots = live_slots(cb_state);
                if slots.is_empty() {
                    continue;
                }
                cb_state.swept_done_reading = true;
                let device = *cb_to_device.get(cb).expect("cb tracked without a device");
                by_device.entry(device).or_default().extend(slots);
            }
            by_device
        };
        for (device, slots) in by_device {
            self.timer_query_pool.mark_query_slots_done_reading(device, &slots);
        }
    }
}

impl CaptureStatusListener for SubmissionTracker {
    fn on_capture_start(&self, options: CaptureOptions) {
        SubmissionTracker::on_capture_start(self, options);
    }

    fn on_capture_stop(&self) {
        SubmissionTracker::on_capture_stop(self);
    }

    fn on_capture_finished(&self) {
        SubmissionTracker::on_capture_finished(self);
    }
}

/// Every slot a live (not yet submitted) [`CommandBufferState`] still
/// references.
fn live_slots(cb_state: &CommandBufferState) -> Vec<u32> {
    let mut slots: Vec<u32> = cb_state.begin_slot.into_iter().chain(cb_state.end_slot).collect();
    slots.extend(cb_state.markers.iter().filter_map(|m| m.slot));
    slots
}

/// Splits a live `CommandBufferState`'s slots by how reset/untrack must
/// retire them: untouched slots (never read) go through `rollback_pending`;
/// slots an `on_capture_finished` sweep already marked done-reading go
/// through `mark_query_slots_for_reset` instead, as `rollback_pending`'s
/// precondition (still `QueryPendingOnGpu`) no longer holds for them.
/// Returns `(rollback_slots, reset_slots)`.
fn live_slots_by_disposition(cb_state: &CommandBufferState) -> (Vec<u32>, Vec<u32>) {
    let slots = live_slots(cb_state);
    if cb_state.swept_done_reading {
        (Vec::new(), slots)
    } else {
        (slots, Vec::new())
    }
}

fn submission_is_empty(submission: &QueueSubmission) -> bool {
    submission.submit_infos.iter().all(|si| si.command_buffers.is_empty())
}

/// The `end_slot` of the last non-empty submit-info's last command buffer —
/// the one whose readability means the whole submission is resolvable.
fn terminal_slot_of(submission: &QueueSubmission) -> u32 {
    submission
        .submit_infos
        .iter()
        .rev()
        .find_map(|si| si.command_buffers.last())
        .expect("submission_is_empty should have filtered this out")
        .end_slot
}

/// Every slot a submission references, once fully resolved — handed to
/// `MarkQuerySlotsDoneReading` as a batch.
fn submission_slots(submission: &QueueSubmission) -> Vec<u32> {
    let mut slots = Vec::new();
    for si in &submission.submit_infos {
        for cb in &si.command_buffers {
            slots.extend(cb.begin_slot);
            slots.push(cb.end_slot);
        }
    }
    for marker in &submission.completed_markers {
        if let Some((_, slot)) = marker.begin_info {
            slots.push(slot);
        }
        slots.push(marker.end_slot);
    }
    slots
}

