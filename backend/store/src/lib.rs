//! Persistent state of the pipeline: stored uploads, result artifacts, and
//! the task ledger, all under one data directory.

pub mod layout;
pub mod ledger;
pub mod results;
pub mod uploads;

pub use layout::DataLayout;
pub use ledger::{TaskEntry, TaskLedger};
pub use results::ResultStore;
pub use uploads::UploadStore;

use anyhow::{bail, Result};

/// Reject task ids that could escape the data directory.
pub fn check_task_id(task_id: &str) -> Result<()> {
    if task_id.is_empty()
        || !task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("invalid task id: {task_id:?}");
    }
    Ok(())
}
