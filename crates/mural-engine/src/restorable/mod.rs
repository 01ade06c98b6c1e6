//! Restorable image layer.
//!
//! Every image keeps a [`RestorationLog`]: a base state plus the operations
//! applied since, expressed in the image's own coordinates so they replay
//! correctly wherever the atlas places the image later. The coordinator uses
//! these logs to rebuild all pixel contents after a device loss.

mod coordinator;
mod history;
mod table;

pub use coordinator::{ContextState, RestoreReport};
pub use history::{BaseState, DrawOperation, LogOp, RestorationLog};

pub(crate) use coordinator::{restore, restore_order};
pub(crate) use table::{ImageRecord, ImageTable};

/// Handle to a logical image.
///
/// Generational: a handle to a disposed image never aliases a newer image that
/// reuses its slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ImageId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl ImageId {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }
}
