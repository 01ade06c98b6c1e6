//! Graphics command queue.
//!
//! Operations against backing textures are recorded here and only reach the
//! driver on [`CommandQueue::flush`]. Draw requests with identical pipeline
//! state that arrive back to back are combined into one driver call.

mod entry;
mod queue;

pub use entry::{Command, DrawTrianglesCommand};
pub use queue::{CommandQueue, FlushStats};
