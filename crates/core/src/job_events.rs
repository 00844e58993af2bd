//! Message type constants for batch job lifecycle notifications.
//!
//! Used by the UI shells when forwarding job updates to their views, so the
//! desktop, mobile, and wrist clients agree on one vocabulary.

use crate::job::JobStatus;

/// Progress update during batch execution (counters + current item).
pub const MSG_TYPE_BATCH_PROGRESS: &str = "batch_progress";

/// Batch completed (possibly with partial item failures).
pub const MSG_TYPE_BATCH_COMPLETED: &str = "batch_completed";

/// Batch failed: the execution path itself errored.
pub const MSG_TYPE_BATCH_FAILED: &str = "batch_failed";

/// Batch was cancelled (by user or system).
pub const MSG_TYPE_BATCH_CANCELLED: &str = "batch_cancelled";

/// Batch was paused.
pub const MSG_TYPE_BATCH_PAUSED: &str = "batch_paused";

/// The message type to broadcast for a job in the given status.
pub fn message_type_for(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Processing => MSG_TYPE_BATCH_PROGRESS,
        JobStatus::Paused => MSG_TYPE_BATCH_PAUSED,
        JobStatus::Completed => MSG_TYPE_BATCH_COMPLETED,
        JobStatus::Failed => MSG_TYPE_BATCH_FAILED,
        JobStatus::Cancelled => MSG_TYPE_BATCH_CANCELLED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_status_has_a_message_type() {
        assert_eq!(message_type_for(JobStatus::Processing), "batch_progress");
        assert_eq!(message_type_for(JobStatus::Paused), "batch_paused");
        assert_eq!(message_type_for(JobStatus::Completed), "batch_completed");
        assert_eq!(message_type_for(JobStatus::Failed), "batch_failed");
        assert_eq!(message_type_for(JobStatus::Cancelled), "batch_cancelled");
    }
}
