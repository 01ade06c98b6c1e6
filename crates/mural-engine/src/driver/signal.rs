use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Device-lost notification shared between a driver's event source and the
/// rendering thread.
///
/// Raising it never interrupts anything; the rendering thread consumes it at
/// the next frame boundary.
#[derive(Debug, Clone, Default)]
pub struct DeviceLostSignal {
    raised: Arc<AtomicBool>,
}

impl DeviceLostSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the device as lost. Safe to call from any thread.
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    /// Consumes the notification, returning whether it was raised.
    pub fn take(&self) -> bool {
        self.raised.swap(false, Ordering::AcqRel)
    }
}
