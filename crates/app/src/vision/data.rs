use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use ml_core::InferenceResult;
use video_io::Frame;

/// Item travelling through a bounded stage queue.
#[derive(Debug)]
pub(crate) enum Envelope<T> {
    Item(T),
    /// No further items follow on this queue.
    EndOfStream,
}

/// A frame paired with the inference result that was current when the
/// scheduler handled it.
pub(crate) struct PendingFrame {
    pub(crate) index: u64,
    pub(crate) frame: Frame,
    pub(crate) result: Arc<InferenceResult>,
}

/// Cooperative cancellation shared by every stage of one run.
///
/// The flag cannot be lowered again; every run gets a fresh one.
#[derive(Clone, Debug, Default)]
pub(crate) struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Whether both handles observe the same flag.
    pub(crate) fn same_as(&self, other: &StopFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
