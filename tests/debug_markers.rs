//! Debug-marker bookkeeping across command buffers and submissions
//! (spec scenarios S3-S6, boundary behaviors B1-B4).


use gpu_submission_tracker::{CaptureOptions, Color};
use harness::{do_submit, harness_with_one_queue, new_command_buffer, submit, Harness};

fn start_capture(h: &Harness, options: CaptureOptions) {
    h.tracker.on_capture_start(options);
    h.producer.set_capturing(true);
}

fn stage_results_in_write_order(h: &Harness, first_timestamp: u64) {
    for (i, &(_, slot)) in h.driver.write_calls().iter().enumerate() {
        h.driver.set_result(h.device, slot, first_timestamp + i as u64);
    }
}

/// Like [`stage_results_in_write_order`], but only for calls issued since
/// `already_staged` (the write-call count at the last staging point), so a
/// later submission in the same test doesn't re-stage earlier slots.
fn stage_new_results(h: &Harness, already_staged: usize, first_timestamp: u64) -> usize {
    let writes = h.driver.write_calls();
    for (i, &(_, slot)) in writes[already_staged..].iter().enumerate() {
        h.driver.set_result(h.device, slot, first_timestamp + i as u64);
    }
    writes.len()
}

/// S3: nested markers within a single command buffer/submission resolve to
/// the right depths and timestamps.
#[test]
fn s3_nested_markers_resolve_with_correct_depth_and_order() {
    let h = harness_with_one_queue();
    let cb = new_command_buffer(&h, 1);
    start_capture(&h, CaptureOptions::default());

    let outer_color = Color {
        red: 1.0,
        green: 0.8,
        blue: 0.6,
        alpha: 0.4,
    };
    h.tracker.mark_command_buffer_begin(cb);
    h.tracker.mark_debug_marker_begin(cb, "Outer", outer_color);
    h.tracker.mark_debug_marker_begin(cb, "Inner", Color::default());
    h.tracker.mark_debug_marker_end(cb); // closes Inner
    h.tracker.mark_debug_marker_end(cb); // closes Outer
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));

    // Write order: cb-begin(1), Outer-begin(2), Inner-begin(3), Inner-end(4), Outer-end(5), cb-end(6).
    stage_results_in_write_order(&h, 1);
    h.tracker.complete_submits(h.device);

    let submissions = h.producer.submissions();
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.num_begin_markers, 2);
    assert_eq!(submission.submit_infos[0].command_buffers[0].begin_gpu_timestamp_ns, Some(1.0));
    assert_eq!(submission.submit_infos[0].command_buffers[0].end_gpu_timestamp_ns, 6.0);

    assert_eq!(submission.completed_markers.len(), 2);
    let inner = &submission.completed_markers[0];
    assert_eq!(inner.depth, 1);
    assert_eq!(inner.begin_marker.unwrap().gpu_timestamp_ns, 3.0);
    assert_eq!(inner.end_gpu_timestamp_ns, 4.0);
    assert!(inner.color.is_none(), "zeroed color is represented as None");

    let outer = &submission.completed_markers[1];
    assert_eq!(outer.depth, 0);
    assert_eq!(outer.begin_marker.unwrap().gpu_timestamp_ns, 2.0);
    assert_eq!(outer.end_gpu_timestamp_ns, 5.0);
    assert_eq!(outer.color, Some(outer_color));
}

/// S4 / B4: a marker whose begin was recorded before capture started has no
/// `begin_marker` in its emitted slice, but its end resolves normally.
#[test]
fn s4_marker_begun_before_capture_has_no_begin_marker_but_resolved_end() {
    let h = harness_with_one_queue();
    let cb = new_command_buffer(&h, 1);

    h.tracker.mark_command_buffer_begin(cb);
    h.tracker.mark_debug_marker_begin(cb, "T", Color::default());

    start_capture(&h, CaptureOptions::default());

    h.tracker.mark_debug_marker_end(cb);
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));

    // Only the end-marker and the cb-end timestamps were ever recorded.
    assert_eq!(h.driver.write_calls().len(), 2);
    stage_results_in_write_order(&h, 10);
    h.tracker.complete_submits(h.device);

    let submissions = h.producer.submissions();
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.num_begin_markers, 0);
    assert!(submission.submit_infos[0].command_buffers[0].begin_gpu_timestamp_ns.is_none());
    assert_eq!(submission.completed_markers.len(), 1);
    assert!(submission.completed_markers[0].begin_marker.is_none());
    assert_eq!(submission.completed_markers[0].end_gpu_timestamp_ns, 10.0);
}

/// S5: a marker whose begin and end land in different submissions is
/// emitted in the second submission's `completed_markers`, carrying the
/// first submission's meta-info on its `begin_marker`.
#[test]
fn s5_marker_spanning_two_submissions_carries_begin_meta_info_forward() {
    let h = harness_with_one_queue();
    start_capture(&h, CaptureOptions::default());

    let cb = new_command_buffer(&h, 1);
    h.tracker.mark_command_buffer_begin(cb);
    h.tracker.mark_debug_marker_begin(cb, "T", Color::default());
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));

    let staged = stage_new_results(&h, 0, 1);
    h.tracker.complete_submits(h.device);

    let first = h.producer.submissions();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].num_begin_markers, 1);
    assert!(first[0].completed_markers.is_empty());
    let first_meta_info = first[0].meta_info;

    // The command buffer is reset (no live state existed for it at submit
    // time, so this is a harmless no-op) and recorded again.
    h.tracker.reset_command_buffer(cb);
    h.tracker.mark_command_buffer_begin(cb);
    h.tracker.mark_debug_marker_end(cb);
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));

    stage_new_results(&h, staged, 100);
    h.tracker.complete_submits(h.device);

    let second = h.producer.submissions();
    assert_eq!(second.len(), 2, "the first submission's event is still recorded");
    let last = second.last().unwrap();
    assert_eq!(last.num_begin_markers, 0);
    assert_eq!(last.completed_markers.len(), 1);
    let begin_marker = last.completed_markers[0].begin_marker.expect("carried forward from the first submission");
    assert_eq!(begin_marker.meta_info, first_meta_info);
}

/// S6: a marker whose nesting exceeds `max_local_marker_depth_per_command_buffer`
/// is dropped entirely — no slot is ever issued for it, and it does not
/// appear in the emitted event.
#[test]
fn s6_markers_beyond_the_depth_limit_are_dropped() {
    let h = harness_with_one_queue();
    let cb = new_command_buffer(&h, 1);
    start_capture(
        &h,
        CaptureOptions {
            max_local_marker_depth_per_command_buffer: 1,
        },
    );

    h.tracker.mark_command_buffer_begin(cb);
    h.tracker.mark_debug_marker_begin(cb, "Outer", Color::default());
    h.tracker.mark_debug_marker_begin(cb, "Inner", Color::default()); // depth 2 > max 1: cut off
    h.tracker.mark_debug_marker_end(cb); // closes Inner: also cut off
    h.tracker.mark_debug_marker_end(cb); // closes Outer
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));

    // Only cb-begin, Outer-begin, Outer-end, cb-end ever get a slot; Inner
    // never reaches the driver at all.
    assert_eq!(h.driver.write_calls().len(), 4);
    stage_results_in_write_order(&h, 1);
    h.tracker.complete_submits(h.device);

    let submissions = h.producer.submissions();
    assert_eq!(submissions.len(), 1);
    let submission = &submissions[0];
    assert_eq!(submission.num_begin_markers, 1);
    assert_eq!(submission.completed_markers.len(), 1);
    assert_eq!(submission.completed_markers[0].depth, 0);
}

/// B1: `max_depth = 0` discards every marker; `num_begin_markers` is 0 in
/// every emission.
#[test]
fn b1_zero_depth_drops_every_marker() {
    let h = harness_with_one_queue();
    let cb = new_command_buffer(&h, 1);
    start_capture(
        &h,
        CaptureOptions {
            max_local_marker_depth_per_command_buffer: 0,
        },
    );

    h.tracker.mark_command_buffer_begin(cb);
    h.tracker.mark_debug_marker_begin(cb, "X", Color::default());
    h.tracker.mark_debug_marker_end(cb);
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));

    // Only the cb-level begin/end ever get a slot.
    assert_eq!(h.driver.write_calls().len(), 2);
    stage_results_in_write_order(&h, 1);
    h.tracker.complete_submits(h.device);

    let submissions = h.producer.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].num_begin_markers, 0);
    assert!(submissions[0].completed_markers.is_empty());
}

/// B2: `max_depth = MAX` preserves arbitrarily deep nesting.
#[test]
fn b2_max_depth_preserves_deep_nesting() {
    let h = harness_with_one_queue();
    let cb = new_command_buffer(&h, 1);
    start_capture(
        &h,
        CaptureOptions {
            max_local_marker_depth_per_command_buffer: u32::MAX,
        },
    );

    h.tracker.mark_command_buffer_begin(cb);
    for i in 0..16 {
        h.tracker.mark_debug_marker_begin(cb, &format!("depth-{i}"), Color::default());
    }
    for _ in 0..16 {
        h.tracker.mark_debug_marker_end(cb);
    }
    h.tracker.mark_command_buffer_end(cb);
    do_submit(&h, &submit(&[cb]));

    stage_results_in_write_order(&h, 1);
    h.tracker.complete_submits(h.device);

    let submissions = h.producer.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].num_begin_markers, 16);
    assert_eq!(submissions[0].completed_markers.len(), 16);
}
