//! Transfer queue and scheduler.
//!
//! The queue is a single-writer actor: one control task owns every transfer,
//! decides FIFO admission under the concurrency bound, and is the only place
//! state transitions happen. Commands arrive through a cloneable
//! [`QueueHandle`]; running workers report back on an internal channel and
//! never touch queue state directly.

mod actor;
mod handle;
mod messages;
mod worker;

use std::path::PathBuf;

pub use actor::{QueueOptions, TransferQueue};
pub use handle::QueueHandle;
pub use messages::{QueueStats, TransferEvent};

/// Decides where a transfer's destination file lives.
///
/// Implemented by the settings service, which maps categories to directories.
pub trait DestinationPolicy: Send + Sync {
    /// Directory for a transfer with the given category.
    fn destination_dir(&self, category: Option<&str>) -> PathBuf;
}
