//! The seam between [`crate::submission_tracker::SubmissionTracker`] and the
//! out-of-process telemetry consumer. The IPC transport itself is an
//! external collaborator; these traits are the interface the core consumes
//! from it.

use crate::events::Event;

/// Per-capture options, carried on [`CaptureStatusListener::on_capture_start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// `0` discards all markers; `u32::MAX` disables the limit.
    pub max_local_marker_depth_per_command_buffer: u32,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            max_local_marker_depth_per_command_buffer: u32::MAX,
        }
    }
}

/// Capture start/stop/finished transitions the producer drives the tracker
/// through. The producer calls `on_capture_start` before setting
/// [`VulkanLayerProducer::is_capturing`] to `true`, `on_capture_stop` when
/// it stops accepting new events, and `on_capture_finished` once the event
/// stream has fully drained.
pub trait CaptureStatusListener: Send + Sync {
    fn on_capture_start(&self, options: CaptureOptions);
    fn on_capture_stop(&self);
    fn on_capture_finished(&self);
}

/// What [`crate::submission_tracker::SubmissionTracker`] asks of the
/// external producer: whether a capture is currently accepting events, and
/// a place to push them. The tracker carries no local capture flag — it
/// reads `is_capturing` on every entry point instead.
pub trait VulkanLayerProducer: Send + Sync {
    fn is_capturing(&self) -> bool;

    /// Silently dropped by the producer if it is no longer capturing by the
    /// time this is called.
    fn emit(&self, event: Event);
}
