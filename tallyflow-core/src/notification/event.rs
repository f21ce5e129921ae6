use std::collections::BTreeMap;

use tallyflow_model::{NotificationEvent, RecordState, TaskId};

/// A notification event that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub task_id: TaskId,
    pub resource: String,
    pub state: RecordState,
    pub info_text: String,
    pub additional_info: BTreeMap<String, String>,
    pub result_resource: Option<String>,
    pub attempt: i32,
    pub marked_as_deleted: bool,
    pub ignored: bool,
}

impl RecordOutcome {
    /// Validates an inbound event; the error names the missing part.
    pub fn parse(event: &NotificationEvent) -> Result<Self, &'static str> {
        let task_id = event.task_id.ok_or("missing task id")?;
        let resource = event
            .resource_id
            .as_deref()
            .map(str::trim)
            .filter(|resource| !resource.is_empty())
            .ok_or("missing resource id")?;
        let state = event.state.ok_or("missing terminal state")?;
        if !state.is_terminal() {
            return Err("state is not terminal");
        }
        if event.attempt < 0 {
            return Err("negative attempt number");
        }

        Ok(Self {
            task_id,
            resource: resource.to_string(),
            state,
            info_text: event.info_text.clone().unwrap_or_default(),
            additional_info: event.additional_info.clone(),
            result_resource: event.result_resource.clone(),
            attempt: event.attempt,
            marked_as_deleted: event.marked_as_deleted,
            ignored: event.ignored,
        })
    }
}
