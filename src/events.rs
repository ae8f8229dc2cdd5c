//! The message shapes exposed to the producer: label interning, resolved
//! submission events, and the `Color` sentinel markers carry.

use crate::handles::Queue;

/// RGBA marker tint as the driver passed it. Debug-marker color is only
/// meaningful when it was explicitly set, so a zeroed color is represented
/// as "no explicit tint" (`None`) rather than as a zeroed struct.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    /// Returns `None` for an all-zero color, `Some(self)` otherwise.
    pub(crate) fn non_zero(self) -> Option<Self> {
        (self.red != 0.0 || self.green != 0.0 || self.blue != 0.0 || self.alpha != 0.0).then_some(self)
    }
}

/// `(pre_submit_cpu_ns, post_submit_cpu_ns, thread_id, process_id)`.
/// `post_submit_cpu_ns` is filled in by
/// [`crate::submission_tracker::SubmissionTracker::persist_debug_markers_on_submit`],
/// which runs after the driver call; it is `None` in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubmissionMetaInformation {
    pub pre_submit_cpu_ns: u64,
    pub post_submit_cpu_ns: Option<u64>,
    pub thread_id: u64,
    pub process_id: u32,
}

/// A resolved command buffer within a [`GpuQueueSubmission`]. `begin` is
/// `None` when the command buffer's begin happened before capture started.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedCommandBuffer {
    pub begin_gpu_timestamp_ns: Option<f64>,
    pub end_gpu_timestamp_ns: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSubmitInfo {
    pub command_buffers: Vec<ResolvedCommandBuffer>,
}

/// The begin half of a completed marker, present only when the begin was
/// recorded while capturing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMarkerBegin {
    pub meta_info: SubmissionMetaInformation,
    pub gpu_timestamp_ns: f64,
}

/// One emitted debug-marker region, resolved to nanoseconds. `text_key` is
/// the stable hash an earlier [`Event::InternedString`] already carried the
/// label for.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuDebugMarker {
    pub text_key: u64,
    pub color: Option<Color>,
    pub depth: u32,
    pub end_gpu_timestamp_ns: f64,
    pub begin_marker: Option<ResolvedMarkerBegin>,
}

/// One fully resolved queue submission, ready to hand to the telemetry
/// consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuQueueSubmission {
    pub queue: Queue,
    pub meta_info: SubmissionMetaInformation,
    pub submit_infos: Vec<ResolvedSubmitInfo>,
    pub num_begin_markers: u32,
    pub completed_markers: Vec<GpuDebugMarker>,
}

/// Emitted once per distinct label text per capture; `key` is the stable
/// hash used by every subsequent [`GpuDebugMarker::text_key`] referencing
/// this label.
#[derive(Debug, Clone, PartialEq)]
pub struct InternedString {
    pub key: u64,
    pub intern: String,
}

/// The two message shapes flowing from tracker to producer.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    InternedString(InternedString),
    GpuQueueSubmission(GpuQueueSubmission),
}
