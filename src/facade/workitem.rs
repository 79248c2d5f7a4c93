//! Deferred-work glue (C8).
//!
//! The slot's media-change handling needs to get off dispatch level
//! before it can re-enumerate (enumeration calls into the controller
//! and may sleep), so the dispatch-level media-change callback queues
//! a work item rather than running the re-enumeration inline. Backed
//! by a plain spawned thread: there is no in-house scheduler here to
//! hand a work item to, and a thread gives the queued closure the
//! same "runs at low level, may block" contract a real work item has.

use std::thread;

/// Queue `work` to run at low scheduling level, off the calling
/// (dispatch-level) context.
pub fn queue_work_item(work: impl FnOnce() + Send + 'static) {
    thread::spawn(work);
}
