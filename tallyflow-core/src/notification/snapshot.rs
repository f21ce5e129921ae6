use std::collections::HashMap;

use tallyflow_model::{ErrorType, RecordState, TaskCounters, TaskId};
use uuid::Uuid;

use super::event::RecordOutcome;

const ERROR_TYPE_NAMESPACE: Uuid =
    Uuid::from_u128(0x3e1c6f0a_9b7d_4c52_8f1e_2a6d4b9c7e31);

/// Message of the signature collecting errors past the per-task limit.
pub const OTHER_ERRORS_MESSAGE: &str = "Other errors (distinct error limit reached)";

/// Identifier of the error signature for `message`.
pub fn error_type_id(message: &str) -> Uuid {
    Uuid::new_v5(&ERROR_TYPE_NAMESPACE, message.as_bytes())
}

/// Cached aggregate state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    /// Stored counters as of the last batch this worker wrote.
    pub counters: TaskCounters,
    pub expected_size: Option<i64>,
    /// Occurrences per error message.
    pub error_types: HashMap<String, ErrorType>,
}

impl TaskSnapshot {
    pub fn new(
        counters: TaskCounters,
        expected_size: Option<i64>,
        error_types: impl IntoIterator<Item = ErrorType>,
    ) -> Self {
        Self {
            counters,
            expected_size,
            error_types: error_types
                .into_iter()
                .map(|error_type| (error_type.message.clone(), error_type))
                .collect(),
        }
    }

    /// Counts one more occurrence of `message`.
    ///
    /// Once the task holds `max_types` distinct signatures, new messages are
    /// folded into a shared signature.
    pub fn register_error(
        &mut self,
        task_id: TaskId,
        message: &str,
        max_types: usize,
    ) -> ErrorType {
        let key = if self.error_types.contains_key(message)
            || self.error_types.len() < max_types
        {
            message
        } else {
            OTHER_ERRORS_MESSAGE
        };

        let entry =
            self.error_types
                .entry(key.to_string())
                .or_insert_with(|| ErrorType {
                    task_id,
                    error_type: error_type_id(key),
                    message: key.to_string(),
                    count: 0,
                });
        entry.count += 1;
        entry.clone()
    }
}

/// Counters after accounting for one more record.
pub fn apply_outcome(
    counters: TaskCounters,
    outcome: &RecordOutcome,
) -> TaskCounters {
    let mut next = counters;
    match outcome.state {
        RecordState::Error if outcome.marked_as_deleted => {
            next.deleted += 1;
            next.deleted_errors += 1;
        }
        RecordState::Error => {
            next.processed += 1;
            next.processed_errors += 1;
        }
        RecordState::Success if outcome.marked_as_deleted => next.deleted += 1,
        RecordState::Success if outcome.ignored => next.ignored += 1,
        RecordState::Success => next.processed += 1,
        RecordState::Dropped | RecordState::Killed => next.ignored += 1,
        RecordState::Queued => {}
    }
    next
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn outcome(state: RecordState) -> RecordOutcome {
        RecordOutcome {
            task_id: TaskId(1),
            resource: "r".into(),
            state,
            info_text: String::new(),
            additional_info: BTreeMap::new(),
            result_resource: None,
            attempt: 0,
            marked_as_deleted: false,
            ignored: false,
        }
    }

    #[test]
    fn each_outcome_moves_exactly_one_total_counter() {
        let start = TaskCounters::default();
        let mut deleted_error = outcome(RecordState::Error);
        deleted_error.marked_as_deleted = true;
        let mut deleted = outcome(RecordState::Success);
        deleted.marked_as_deleted = true;
        let mut ignored = outcome(RecordState::Success);
        ignored.ignored = true;

        let cases = [
            (outcome(RecordState::Success), (1, 0, 0, 0, 0)),
            (outcome(RecordState::Error), (1, 0, 0, 1, 0)),
            (ignored, (0, 1, 0, 0, 0)),
            (deleted, (0, 0, 1, 0, 0)),
            (deleted_error, (0, 0, 1, 0, 1)),
            (outcome(RecordState::Dropped), (0, 1, 0, 0, 0)),
            (outcome(RecordState::Killed), (0, 1, 0, 0, 0)),
        ];

        for (event, expected) in cases {
            let next = apply_outcome(start, &event);
            assert_eq!(
                (
                    next.processed,
                    next.ignored,
                    next.deleted,
                    next.processed_errors,
                    next.deleted_errors
                ),
                expected,
                "{event:?}"
            );
            assert_eq!(next.total(), 1);
        }
    }

    #[test]
    fn error_signatures_are_stable_per_message() {
        let mut snapshot = TaskSnapshot::new(TaskCounters::default(), None, []);
        let first = snapshot.register_error(TaskId(1), "timeout", 10);
        let second = snapshot.register_error(TaskId(1), "timeout", 10);

        assert_eq!(first.error_type, second.error_type);
        assert_eq!(first.error_type, error_type_id("timeout"));
        assert_eq!(second.count, 2);
    }

    #[test]
    fn distinct_signatures_are_bounded() {
        let mut snapshot = TaskSnapshot::new(TaskCounters::default(), None, []);
        snapshot.register_error(TaskId(1), "a", 2);
        snapshot.register_error(TaskId(1), "b", 2);
        let overflow = snapshot.register_error(TaskId(1), "c", 2);
        let known = snapshot.register_error(TaskId(1), "a", 2);

        assert_eq!(overflow.message, OTHER_ERRORS_MESSAGE);
        assert_eq!(known.message, "a");
        assert_eq!(known.count, 2);
        assert_eq!(snapshot.error_types.len(), 3);
    }

    #[test]
    fn rebuilt_snapshot_keeps_stored_error_counts() {
        let stored = ErrorType {
            task_id: TaskId(1),
            error_type: error_type_id("boom"),
            message: "boom".into(),
            count: 41,
        };
        let mut snapshot =
            TaskSnapshot::new(TaskCounters::default(), Some(100), [stored]);

        assert_eq!(snapshot.register_error(TaskId(1), "boom", 10).count, 42);
    }
}
