//! Wire data model shared with the emulator service.
//!
//! The service omits fields freely, so every response type decodes with
//! `#[serde(default)]` and ignores unknown fields.

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::limits::REGISTER_COUNT;

/// Identifier of a canned exercise. Only ids greater than zero are sent to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u32);

impl TaskId {
    pub fn is_valid(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flags {
    pub zero: bool,
    pub carry: bool,
    pub overflow: bool,
    pub negative: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorState {
    pub registers: [i64; REGISTER_COUNT],
    pub program_counter: i64,
    pub instruction_register: i64,
    pub instruction_register_asm: String,
    pub flags: Flags,
    pub current_command: String,
    pub is_halted: bool,
    pub cycles: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryState {
    /// Shared so observers can detect a new buffer with `Arc::ptr_eq`.
    pub ram: Arc<[i64]>,
    pub history: Vec<Value>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            ram: Arc::from(Vec::new()),
            history: Vec::new(),
        }
    }
}

/// Complete emulator state as last reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorSnapshot {
    pub processor: ProcessorState,
    pub memory: MemoryState,
    pub source_code: String,
    pub machine_code: Vec<String>,
    pub current_task: Option<TaskId>,
}

impl EmulatorSnapshot {
    /// Replace the ram buffer with a fresh allocation holding the same words.
    ///
    /// INVARIANT: the returned snapshot never shares its ram with any earlier snapshot.
    pub fn with_detached_ram(mut self) -> Self {
        self.memory.ram = Arc::from(&self.memory.ram[..]);
        self
    }

    /// True when the processor looks freshly reset: PC at zero and every register cleared.
    pub fn is_initial(&self) -> bool {
        self.processor.program_counter == 0 && self.processor.registers.iter().all(|r| *r == 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub test_data: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgram {
    pub task_id: TaskId,
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub test_data: Vec<i64>,
}

// ----------------------------------------------------------------------------
// Requests
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileRequest {
    pub source_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

impl CompileRequest {
    /// Build a compile request; a task id of zero is treated as absent.
    pub fn new(source_code: impl Into<String>, task_id: Option<TaskId>) -> Self {
        Self {
            source_code: source_code.into(),
            task_id: task_id.filter(|t| t.is_valid()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadTaskRequest {
    pub task_id: TaskId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteRequest {
    /// Serialized as `null` when absent; the service distinguishes it from a missing key.
    pub task_id: Option<TaskId>,
    pub step_by_step: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
}

impl ExecuteRequest {
    pub fn for_task(task_id: TaskId) -> Self {
        Self {
            task_id: Some(task_id),
            step_by_step: false,
            source_code: None,
        }
    }

    pub fn for_source(source_code: impl Into<String>) -> Self {
        Self {
            task_id: None,
            step_by_step: false,
            source_code: Some(source_code.into()),
        }
    }
}

// ----------------------------------------------------------------------------
// Responses
// ----------------------------------------------------------------------------

/// Common accessors for `{success, message?, error?}` envelopes.
pub trait ServiceReply {
    fn succeeded(&self) -> bool;
    fn diagnostic(&self) -> Option<&str>;
    fn into_state(self) -> Option<EmulatorSnapshot>;
}

macro_rules! impl_service_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ServiceReply for $ty {
                fn succeeded(&self) -> bool {
                    self.success
                }

                fn diagnostic(&self) -> Option<&str> {
                    self.error.as_deref().or(self.message.as_deref())
                }

                fn into_state(self) -> Option<EmulatorSnapshot> {
                    self.state
                }
            }
        )*
    };
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileResponse {
    pub success: bool,
    pub machine_code: Vec<String>,
    pub labels: BTreeMap<String, Value>,
    pub state: Option<EmulatorSnapshot>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadTaskResponse {
    pub success: bool,
    pub state: Option<EmulatorSnapshot>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteResponse {
    pub success: bool,
    pub state: Option<EmulatorSnapshot>,
    pub result: Option<Value>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepResponse {
    pub success: bool,
    pub state: Option<EmulatorSnapshot>,
    /// Absent is treated as "no further instructions".
    pub continues: Option<bool>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetResponse {
    pub success: bool,
    pub state: Option<EmulatorSnapshot>,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl_service_reply!(
    CompileResponse,
    LoadTaskResponse,
    ExecuteResponse,
    StepResponse,
    ResetResponse,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn snapshot_decodes_with_missing_and_unknown_fields() {
        let snap: EmulatorSnapshot = serde_json::from_value(json!({
            "processor": {
                "registers": [1, 2, 3, 4, 5, 6, 7, 8],
                "program_counter": 12,
                "accumulator": 99,
                "flags": { "zero": true }
            },
            "memory": { "ram": [0, 5, 7] },
            "current_task": null
        }))
        .unwrap();
        assert_eq!(snap.processor.registers[7], 8);
        assert_eq!(snap.processor.program_counter, 12);
        assert!(snap.processor.flags.zero);
        assert!(!snap.processor.flags.carry);
        assert_eq!(&snap.memory.ram[..], &[0, 5, 7]);
        assert!(snap.memory.history.is_empty());
        assert_eq!(snap.current_task, None);
    }

    #[test]
    fn register_file_must_hold_eight_entries() {
        let err = serde_json::from_value::<ProcessorState>(json!({ "registers": [1, 2, 3] }));
        assert!(err.is_err());
    }

    #[test]
    fn detached_ram_is_a_new_buffer_with_same_contents() {
        let mut snap = EmulatorSnapshot::default();
        snap.memory.ram = Arc::from(vec![1, 2, 3]);
        let before = snap.memory.ram.clone();
        let after = snap.with_detached_ram();
        assert!(!Arc::ptr_eq(&before, &after.memory.ram));
        assert_eq!(&before[..], &after.memory.ram[..]);
    }

    #[test]
    fn initial_condition_requires_zero_pc_and_registers() {
        let mut snap = EmulatorSnapshot::default();
        assert!(snap.is_initial());
        snap.processor.registers[3] = 1;
        assert!(!snap.is_initial());
        snap.processor.registers[3] = 0;
        snap.processor.program_counter = 4;
        assert!(!snap.is_initial());
    }

    #[test]
    fn compile_request_omits_absent_or_zero_task() {
        let with = serde_json::to_value(CompileRequest::new("HALT", Some(TaskId(2)))).unwrap();
        assert_eq!(with, json!({ "source_code": "HALT", "task_id": 2 }));
        let without = serde_json::to_value(CompileRequest::new("HALT", None)).unwrap();
        assert_eq!(without, json!({ "source_code": "HALT" }));
        let zero = serde_json::to_value(CompileRequest::new("HALT", Some(TaskId(0)))).unwrap();
        assert_eq!(zero, json!({ "source_code": "HALT" }));
    }

    #[test]
    fn execute_request_keeps_null_task_id() {
        let body = serde_json::to_value(ExecuteRequest::for_source("HALT")).unwrap();
        assert_eq!(
            body,
            json!({ "task_id": null, "step_by_step": false, "source_code": "HALT" })
        );
    }

    #[test]
    fn failure_envelope_prefers_error_text() {
        let reply: CompileResponse = serde_json::from_value(json!({
            "success": false,
            "error": "unknown mnemonic FOO",
            "message": "Compilation error: unknown mnemonic FOO"
        }))
        .unwrap();
        assert!(!reply.succeeded());
        assert_eq!(reply.diagnostic(), Some("unknown mnemonic FOO"));
    }
}
