//! Progress reporting seam.
//!
//! The filter wants to narrate what it is doing without caring how (or
//! whether) the narration is displayed, so it talks to this trait and the
//! binary decides what backs it. In essence a newtype over any progress
//! bar, with only the update calls present; styling is entirely the
//! implementer's business.

pub trait SlamProgress: Clone + Send {
    fn inc(&self, delta: u64);
    fn set_message(&self, msg: &str);
    fn finish_with_message(&self, msg: &str);
    fn println(&self, msg: &str);
}

/// Swallows everything. For tests and headless runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentProgress;

impl SlamProgress for SilentProgress {
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: &str) {}
    fn finish_with_message(&self, _msg: &str) {}
    fn println(&self, _msg: &str) {}
}
