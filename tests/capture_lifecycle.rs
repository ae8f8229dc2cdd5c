//! Device re-tracking and capture start/stop/finished transitions
//! (spec scenarios R1, R2 and the `on_capture_finished` orphan sweep).


use gpu_submission_tracker::{CaptureOptions, Event};
use harness::{do_submit, harness_with_one_queue, new_command_buffer, submit};

fn start_capture(h: &harness::Harness) {
    h.tracker.on_capture_start(CaptureOptions::default());
    h.producer.set_capturing(true);
}

fn stop_capture(h: &harness::Harness) {
    h.producer.set_capturing(false);
    h.tracker.on_capture_stop();
}

/// R1: a device can be untracked and re-tracked, and is fully usable again
/// afterwards (fresh query pool, no leftover state from the first tracking).
#[test]
fn r1_device_survives_untrack_then_retrack() {
    let h = harness_with_one_queue();
    let cb = new_command_buffer(&h, 1);
    start_capture(&h);

    h.tracker.mark_command_buffer_begin(cb);
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));
    for &(_, slot) in &h.driver.write_calls() {
        h.driver.set_result(h.device, slot, 5);
    }
    h.tracker.complete_submits(h.device);
    assert_eq!(h.producer.submissions().len(), 1);

    h.tracker.untrack_device(h.device);
    h.tracker.track_device(h.physical, h.device);

    // The device is fresh: tracking a command buffer and running a full
    // submission/completion cycle works exactly as it did before.
    let cb2 = new_command_buffer(&h, 2);
    h.tracker.mark_command_buffer_begin(cb2);
    h.tracker.mark_command_buffer_end(cb2);
    do_submit(&h, &submit(&[cb2]));

    let writes = h.driver.write_calls();
    let new_writes = &writes[writes.len() - 2..];
    for &(_, slot) in new_writes {
        h.driver.set_result(h.device, slot, 7);
    }
    h.tracker.complete_submits(h.device);
    assert_eq!(h.producer.submissions().len(), 2);
}

/// R2: stopping and restarting a capture re-interns every label, since the
/// intern cache is cleared on every `on_capture_start`.
#[test]
fn r2_restarting_a_capture_reinterns_previously_seen_labels() {
    let h = harness_with_one_queue();
    start_capture(&h);

    let cb = new_command_buffer(&h, 1);
    h.tracker.mark_command_buffer_begin(cb);
    h.tracker.mark_debug_marker_begin(cb, "Pass", Default::default());
    h.tracker.mark_debug_marker_end(cb);
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));
    for &(_, slot) in &h.driver.write_calls() {
        h.driver.set_result(h.device, slot, 1);
    }
    h.tracker.complete_submits(h.device);

    let first_interns = h.producer.interned_strings();
    assert_eq!(first_interns.len(), 1);
    assert_eq!(first_interns[0].intern, "Pass");

    stop_capture(&h);
    h.tracker.on_capture_finished();

    start_capture(&h);
    let cb2 = new_command_buffer(&h, 2);
    h.tracker.mark_command_buffer_begin(cb2);
    h.tracker.mark_debug_marker_begin(cb2, "Pass", Default::default());
    h.tracker.mark_debug_marker_end(cb2);
    h.tracker.mark_command_buffer_end(cb2);
    do_submit(&h, &submit(&[cb2]));

    let writes = h.driver.write_calls();
    let new_writes = &writes[writes.len() - 4..];
    for (i, &(_, slot)) in new_writes.iter().enumerate() {
        h.driver.set_result(h.device, slot, 10 + i as u64);
    }
    h.tracker.complete_submits(h.device);

    let second_interns = h.producer.interned_strings();
    assert_eq!(second_interns.len(), 1, "the label is re-interned after the cache was cleared");
    assert_eq!(second_interns[0].intern, "Pass");
}

/// `on_capture_finished` sweeps every still-live command buffer (begun but
/// never submitted) and marks its slots done-reading so they don't block
/// the pool forever; it does not touch command buffers that were already
/// submitted. A subsequent reset of that same command buffer must still
/// succeed instead of tripping the pool's done-reading/for-reset pairing:
/// the sweep already supplied the "done reading" half, so the reset only
/// needs to supply "for reset", not a rollback of an unread slot.
#[test]
fn on_capture_finished_sweeps_orphaned_command_buffer_slots() {
    let h = harness_with_one_queue();
    start_capture(&h);

    let cb = new_command_buffer(&h, 1);
    h.tracker.mark_command_buffer_begin(cb);
    // No end, no submit: this command buffer is abandoned mid-capture.

    h.tracker.on_capture_finished();

    // Sweeping is non-destructive to the driver/producer surface; the main
    // guarantee is that it doesn't panic on a live, never-submitted buffer.
    assert!(h.producer.submissions().is_empty());
    assert!(matches!(h.producer.events().as_slice(), [] | [Event::InternedString(_)]));

    // A later reset of the swept command buffer must not panic: this is
    // the documented "reset/untrack supplies the other half of the pair"
    // contract from `on_capture_finished`'s doc comment.
    h.tracker.reset_command_buffer(cb);
}
