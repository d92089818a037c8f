use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::client::{ClientError, EmulatorService};
use crate::model::{
    CompileRequest, CompileResponse, EmulatorSnapshot, ExecuteRequest, ExecuteResponse,
    LoadTaskRequest, LoadTaskResponse, ResetResponse, StepResponse, TaskId, TaskInfo, TaskProgram,
};

type Reply<T> = (Result<T, ClientError>, Option<oneshot::Receiver<()>>);

fn unscripted(op: &str) -> ClientError {
    ClientError::Service {
        status: 500,
        message: format!("unscripted {op}"),
    }
}

#[derive(Default)]
struct Script {
    state: VecDeque<Reply<EmulatorSnapshot>>,
    compile: VecDeque<Reply<CompileResponse>>,
    load_task: VecDeque<Reply<LoadTaskResponse>>,
    execute: VecDeque<Reply<ExecuteResponse>>,
    step: VecDeque<Reply<StepResponse>>,
    step_default: Option<Result<StepResponse, ClientError>>,
    reset: VecDeque<Reply<ResetResponse>>,
    tasks: Vec<TaskInfo>,
    programs: HashMap<TaskId, Result<TaskProgram, ClientError>>,
}

#[derive(Default)]
struct Calls {
    state: usize,
    compile: Vec<CompileRequest>,
    load_task: Vec<LoadTaskRequest>,
    execute: Vec<ExecuteRequest>,
    step: usize,
    reset: usize,
    programs: Vec<TaskId>,
}

/// In-process emulator service answering from per-operation queues.
///
/// Unscripted calls fail with a 500 so tests notice missing setup.
#[derive(Default)]
pub struct ScriptedService {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
}

impl ScriptedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_state(&self, r: Result<EmulatorSnapshot, ClientError>) {
        self.script.lock().state.push_back((r, None));
    }

    pub fn push_compile(&self, r: Result<CompileResponse, ClientError>) {
        self.script.lock().compile.push_back((r, None));
    }

    /// Queue a compile reply that is held back until the returned sender fires.
    pub fn push_compile_gated(
        &self,
        r: Result<CompileResponse, ClientError>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().compile.push_back((r, Some(rx)));
        tx
    }

    pub fn push_load_task(&self, r: Result<LoadTaskResponse, ClientError>) {
        self.script.lock().load_task.push_back((r, None));
    }

    pub fn push_load_task_gated(
        &self,
        r: Result<LoadTaskResponse, ClientError>,
    ) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().load_task.push_back((r, Some(rx)));
        tx
    }

    pub fn push_execute(&self, r: Result<ExecuteResponse, ClientError>) {
        self.script.lock().execute.push_back((r, None));
    }

    pub fn push_step(&self, r: Result<StepResponse, ClientError>) {
        self.script.lock().step.push_back((r, None));
    }

    pub fn push_step_gated(&self, r: Result<StepResponse, ClientError>) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().step.push_back((r, Some(rx)));
        tx
    }

    /// Reply used for every step once the step queue is drained.
    pub fn set_step_default(&self, r: Result<StepResponse, ClientError>) {
        self.script.lock().step_default = Some(r);
    }

    pub fn push_reset(&self, r: Result<ResetResponse, ClientError>) {
        self.script.lock().reset.push_back((r, None));
    }

    pub fn set_tasks(&self, tasks: Vec<TaskInfo>) {
        self.script.lock().tasks = tasks;
    }

    pub fn set_program(&self, task: TaskId, r: Result<TaskProgram, ClientError>) {
        self.script.lock().programs.insert(task, r);
    }

    pub fn state_calls(&self) -> usize {
        self.calls.lock().state
    }

    pub fn compile_calls(&self) -> Vec<CompileRequest> {
        self.calls.lock().compile.clone()
    }

    pub fn load_task_calls(&self) -> Vec<LoadTaskRequest> {
        self.calls.lock().load_task.clone()
    }

    pub fn execute_calls(&self) -> Vec<ExecuteRequest> {
        self.calls.lock().execute.clone()
    }

    pub fn step_calls(&self) -> usize {
        self.calls.lock().step
    }

    pub fn reset_calls(&self) -> usize {
        self.calls.lock().reset
    }

    pub fn program_calls(&self) -> Vec<TaskId> {
        self.calls.lock().programs.clone()
    }
}

async fn answer<T>(reply: Option<Reply<T>>, op: &str) -> Result<T, ClientError> {
    match reply {
        Some((r, gate)) => {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            r
        }
        None => Err(unscripted(op)),
    }
}

#[async_trait]
impl EmulatorService for ScriptedService {
    async fn get_state(&self) -> Result<EmulatorSnapshot, ClientError> {
        self.calls.lock().state += 1;
        let reply = self.script.lock().state.pop_front();
        answer(reply, "get-state").await
    }

    async fn compile(&self, req: &CompileRequest) -> Result<CompileResponse, ClientError> {
        self.calls.lock().compile.push(req.clone());
        let reply = self.script.lock().compile.pop_front();
        answer(reply, "compile").await
    }

    async fn load_task(&self, req: &LoadTaskRequest) -> Result<LoadTaskResponse, ClientError> {
        self.calls.lock().load_task.push(*req);
        let reply = self.script.lock().load_task.pop_front();
        answer(reply, "load-task").await
    }

    async fn execute(&self, req: &ExecuteRequest) -> Result<ExecuteResponse, ClientError> {
        self.calls.lock().execute.push(req.clone());
        let reply = self.script.lock().execute.pop_front();
        answer(reply, "execute").await
    }

    async fn step(&self) -> Result<StepResponse, ClientError> {
        self.calls.lock().step += 1;
        let reply = {
            let mut script = self.script.lock();
            script
                .step
                .pop_front()
                .or_else(|| script.step_default.clone().map(|r| (r, None)))
        };
        answer(reply, "step").await
    }

    async fn reset(&self) -> Result<ResetResponse, ClientError> {
        self.calls.lock().reset += 1;
        let reply = self.script.lock().reset.pop_front();
        answer(reply, "reset").await
    }

    async fn list_tasks(&self) -> Result<Vec<TaskInfo>, ClientError> {
        Ok(self.script.lock().tasks.clone())
    }

    async fn get_task(&self, task_id: TaskId) -> Result<TaskInfo, ClientError> {
        self.script
            .lock()
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .ok_or_else(|| ClientError::Service {
                status: 404,
                message: format!("Task {task_id} not found"),
            })
    }

    async fn get_task_program(&self, task_id: TaskId) -> Result<TaskProgram, ClientError> {
        self.calls.lock().programs.push(task_id);
        self.script
            .lock()
            .programs
            .get(&task_id)
            .cloned()
            .unwrap_or_else(|| Err(unscripted("get-task-program")))
    }
}

/// Snapshot at `pc` whose ram is `ram` (shared, not copied).
pub fn snapshot_at(pc: i64, ram: &Arc<[i64]>) -> EmulatorSnapshot {
    let mut snap = EmulatorSnapshot::default();
    snap.processor.program_counter = pc;
    snap.processor.registers[0] = pc;
    snap.memory.ram = ram.clone();
    snap
}

pub fn running_step(pc: i64, ram: &Arc<[i64]>) -> StepResponse {
    StepResponse {
        success: true,
        state: Some(snapshot_at(pc, ram)),
        continues: Some(true),
        ..StepResponse::default()
    }
}

pub fn halted_step(pc: i64, ram: &Arc<[i64]>) -> StepResponse {
    let mut state = snapshot_at(pc, ram);
    state.processor.is_halted = true;
    StepResponse {
        success: true,
        state: Some(state),
        continues: Some(false),
        ..StepResponse::default()
    }
}
