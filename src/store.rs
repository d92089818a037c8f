//! Session state store.
//!
//! Holds the last snapshot reported by the emulator service, the active task
//! selection and the status flags observers render. Every server round trip
//! goes through the same reconciliation: the ram buffer is copied into a new
//! allocation, the task selection is reapplied, and failures only touch the
//! status. Responses overtaken by a newer request of the same category are
//! dropped.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use crate::client::{ClientError, EmulatorService};
use crate::config::errors::{ERR_LOGICAL_FAILURE, ERR_SESSION_CLOSED};
use crate::core::SessionConfig;
use crate::events::SessionEvent;
use crate::model::{
    CompileRequest, CompileResponse, EmulatorSnapshot, ExecuteRequest, LoadTaskRequest,
    ServiceReply, TaskId, TaskInfo, TaskProgram,
};
use crate::run_loop::{RunLoopController, RunOutcome};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),
    /// Well-formed reply with `success=false`, e.g. a compile error in the source.
    #[error("{code}: {operation} failed: {message}", code = ERR_LOGICAL_FAILURE)]
    LogicalFailure {
        operation: &'static str,
        message: String,
    },
    #[error("{code}: the session is closed", code = ERR_SESSION_CLOSED)]
    SessionClosed,
}

/// UI-facing flags. Exactly one error is kept; it is cleared when the next operation starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatus {
    pub loading: bool,
    pub error: Option<String>,
    /// Deadline of the "compiled without errors" indicator.
    pub compile_ok_until: Option<Instant>,
}

impl SessionStatus {
    pub fn compile_ok_visible(&self, now: Instant) -> bool {
        self.error.is_none() && self.compile_ok_until.is_some_and(|until| now < until)
    }
}

/// Published to subscribers after every change.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub snapshot: Arc<EmulatorSnapshot>,
    pub status: SessionStatus,
    pub current_task: Option<TaskId>,
    pub revision: u64,
    pub event: SessionEvent,
    pub updated_at: DateTime<Utc>,
}

/// What happened to one store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Task data was loaded instead of stepping; call again to step.
    Primed,
    /// A newer request of the same kind was issued meanwhile; nothing changed.
    Discarded,
    /// The error is recorded in [`SessionStatus::error`].
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepResult {
    Applied { halted: bool, continues: bool },
    Discarded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpCategory {
    State,
    Tasks,
    Compile,
    Task,
    Execute,
    Step,
    Reset,
}

const CATEGORY_COUNT: usize = 7;

impl OpCategory {
    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            OpCategory::State => "get-state",
            OpCategory::Tasks => "list-tasks",
            OpCategory::Compile => "compile",
            OpCategory::Task => "load-task",
            OpCategory::Execute => "execute",
            OpCategory::Step => "step",
            OpCategory::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Ticket {
    category: OpCategory,
    seq: u64,
}

/// How a reconciled snapshot treats the task selection.
#[derive(Debug, Clone, Copy)]
enum TaskScope {
    /// The request named this task; it wins over whatever the server reports.
    Scoped(TaskId),
    /// Keep the store selection; with none, the server's value stands.
    Mirror,
    Clear,
}

struct SessionState {
    snapshot: Arc<EmulatorSnapshot>,
    current_task: Option<TaskId>,
    tasks: Vec<TaskInfo>,
    status: SessionStatus,
    issued: [u64; CATEGORY_COUNT],
    /// Categories whose latest ticket still awaits its reply.
    in_flight: [bool; CATEGORY_COUNT],
    /// Raised by a run loop for its whole lifetime.
    held: bool,
    revision: u64,
}

impl SessionState {
    fn issue(&mut self, category: OpCategory) -> Ticket {
        let slot = &mut self.issued[category.index()];
        *slot += 1;
        Ticket {
            category,
            seq: *slot,
        }
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        self.issued[ticket.category.index()] == ticket.seq
    }

    /// Derive `loading` from what is still outstanding. Returns whether it changed.
    fn refresh_loading(&mut self) -> bool {
        let loading = self.held || self.in_flight.iter().any(|f| *f);
        std::mem::replace(&mut self.status.loading, loading) != loading
    }

    fn resolve(&mut self, category: OpCategory) {
        self.in_flight[category.index()] = false;
        self.refresh_loading();
    }

    fn view(&self, event: SessionEvent) -> SessionView {
        SessionView {
            snapshot: self.snapshot.clone(),
            status: self.status.clone(),
            current_task: self.current_task,
            revision: self.revision,
            event,
            updated_at: Utc::now(),
        }
    }
}

struct StoreInner {
    id: Uuid,
    service: Arc<dyn EmulatorService>,
    config: SessionConfig,
    state: RwLock<SessionState>,
    closed: AtomicBool,
    tx: Mutex<Option<watch::Sender<SessionView>>>,
}

/// Cheap, clonable handle to one emulator session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionStore {
    pub fn new(service: Arc<dyn EmulatorService>, config: SessionConfig) -> Self {
        let state = SessionState {
            snapshot: Arc::new(EmulatorSnapshot::default()),
            current_task: None,
            tasks: Vec::new(),
            status: SessionStatus::default(),
            issued: [0; CATEGORY_COUNT],
            in_flight: [false; CATEGORY_COUNT],
            held: false,
            revision: 0,
        };
        let (tx, _rx) = watch::channel(state.view(SessionEvent::SnapshotUpdated));
        let id = Uuid::new_v4();
        tracing::info!(target = "emuctl", session = %id, "session opened");
        Self {
            inner: Arc::new(StoreInner {
                id,
                service,
                config,
                state: RwLock::new(state),
                closed: AtomicBool::new(false),
                tx: Mutex::new(Some(tx)),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn snapshot(&self) -> Arc<EmulatorSnapshot> {
        self.inner.state.read().snapshot.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.state.read().status.clone()
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.inner.state.read().current_task
    }

    pub fn tasks(&self) -> Vec<TaskInfo> {
        self.inner.state.read().tasks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Receiver of every published [`SessionView`]. After [`close`](Self::close)
    /// the receiver holds the final view and `changed()` fails.
    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        if let Some(tx) = self.inner.tx.lock().as_ref() {
            return tx.subscribe();
        }
        let view = self.inner.state.read().view(SessionEvent::SessionClosed);
        let (_tx, rx) = watch::channel(view);
        rx
    }

    /// Tear the session down. Subscribers see a final `SessionClosed` view and
    /// later operations fail with [`SessionError::SessionClosed`].
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut st = self.inner.state.write();
            st.in_flight = [false; CATEGORY_COUNT];
            st.held = false;
            st.status.loading = false;
            self.publish(&mut st, SessionEvent::SessionClosed);
        }
        self.inner.tx.lock().take();
        tracing::info!(target = "emuctl", session = %self.inner.id, "session closed");
    }

    // ------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------

    /// Replace the editor text ahead of compilation. No server call.
    pub fn set_source_code(&self, code: impl Into<String>) {
        let mut st = self.inner.state.write();
        let mut next = (*st.snapshot).clone();
        next.source_code = code.into();
        st.snapshot = Arc::new(next);
        self.publish(&mut st, SessionEvent::SnapshotUpdated);
    }

    /// Select (or clear) the active task. The selection is visible at once; the
    /// task data is then loaded in the background of this call and a failure is
    /// only logged. Any task load still in flight is superseded.
    pub async fn set_current_task(&self, task: Option<TaskId>) -> Outcome {
        let task = task.filter(|t| t.is_valid());
        if self.is_closed() {
            self.record_closed(OpCategory::Task);
            return Outcome::Failed;
        }
        let ticket = {
            let mut st = self.inner.state.write();
            st.current_task = task;
            if st.snapshot.current_task != task {
                let mut next = (*st.snapshot).clone();
                next.current_task = task;
                st.snapshot = Arc::new(next);
            }
            let ticket = st.issue(OpCategory::Task);
            st.in_flight[OpCategory::Task.index()] = task.is_some();
            st.refresh_loading();
            self.publish(&mut st, SessionEvent::SnapshotUpdated);
            ticket
        };
        let Some(task) = task else {
            return Outcome::Applied;
        };

        let span = tracing::info_span!("select_task", session = %self.inner.id, task = %task);
        let reply = self
            .inner
            .service
            .load_task(&LoadTaskRequest { task_id: task })
            .instrument(span)
            .await;
        match accept(OpCategory::Task, reply, "task load failed").and_then(require_state) {
            Ok(snapshot) => {
                self.applied(self.apply(ticket, snapshot, TaskScope::Scoped(task)))
            }
            Err(err) => {
                let mut st = self.inner.state.write();
                if !st.is_current(ticket) {
                    drop(st);
                    self.log_discard(ticket);
                    return Outcome::Discarded;
                }
                tracing::warn!(target = "emuctl", task = %task, error = %err, "task data not loaded");
                st.resolve(OpCategory::Task);
                self.publish(&mut st, SessionEvent::StatusChanged);
                Outcome::Failed
            }
        }
    }

    // ------------------------------------------------------------------
    // Server round trips
    // ------------------------------------------------------------------

    pub async fn load_state(&self) -> Outcome {
        let Some(ticket) = self.begin(OpCategory::State) else {
            return Outcome::Failed;
        };
        let span = tracing::info_span!("load_state", session = %self.inner.id);
        let result = self.inner.service.get_state().instrument(span).await;
        match result {
            Ok(snapshot) => self.applied(self.apply(ticket, snapshot, TaskScope::Mirror)),
            Err(err) => self.failed(ticket, err.into()),
        }
    }

    pub async fn load_tasks(&self) -> Outcome {
        let Some(ticket) = self.begin(OpCategory::Tasks) else {
            return Outcome::Failed;
        };
        let span = tracing::info_span!("load_tasks", session = %self.inner.id);
        let result = self.inner.service.list_tasks().instrument(span).await;
        match result {
            Ok(tasks) => {
                let mut st = self.inner.state.write();
                if !st.is_current(ticket) {
                    drop(st);
                    self.log_discard(ticket);
                    return Outcome::Discarded;
                }
                tracing::debug!(target = "emuctl", count = tasks.len(), "task catalog loaded");
                st.tasks = tasks;
                st.resolve(OpCategory::Tasks);
                self.publish(&mut st, SessionEvent::TasksLoaded);
                Outcome::Applied
            }
            Err(err) => self.failed(ticket, err.into()),
        }
    }

    /// Load the task's data into the emulator and make it the active task.
    pub async fn load_task(&self, task: TaskId) -> Outcome {
        self.load_task_scoped(task).await
    }

    /// Compile `code`, targeting the store's task, else the snapshot's, else none.
    pub async fn compile(&self, code: impl Into<String>) -> Outcome {
        let code = code.into();
        let Some(ticket) = self.begin(OpCategory::Compile) else {
            return Outcome::Failed;
        };
        let task = {
            let st = self.inner.state.read();
            st.current_task
                .or(st.snapshot.current_task)
                .filter(|t| t.is_valid())
        };
        let req = CompileRequest::new(code.clone(), task);

        let span = tracing::info_span!("compile", session = %self.inner.id, task = ?task);
        let t0 = Instant::now();
        let reply = self.inner.service.compile(&req).instrument(span).await;
        let ms = t0.elapsed().as_millis() as u64;

        match accept(OpCategory::Compile, reply, "compilation failed") {
            Ok(CompileResponse {
                machine_code,
                state,
                ..
            }) => {
                tracing::info!(
                    target = "emuctl",
                    duration_ms = ms,
                    words = machine_code.len(),
                    server_state = state.is_some(),
                    "compiled"
                );
                let scope = task.map_or(TaskScope::Mirror, TaskScope::Scoped);
                let applied = self.apply_with(ticket, scope, move |local| {
                    let mut next = state.unwrap_or_else(|| local.clone());
                    next.source_code = code;
                    next.machine_code = machine_code;
                    next
                });
                self.applied(applied)
            }
            Err(err) => self.failed(ticket, err),
        }
    }

    /// Run a whole program on the server: the given task, or the current source when `None`.
    pub async fn execute(&self, task: Option<TaskId>) -> Outcome {
        let Some(ticket) = self.begin(OpCategory::Execute) else {
            return Outcome::Failed;
        };
        let task = task.filter(|t| t.is_valid());
        let req = match task {
            Some(t) => ExecuteRequest::for_task(t),
            None => ExecuteRequest::for_source(self.snapshot().source_code.clone()),
        };
        let span = tracing::info_span!("execute", session = %self.inner.id, task = ?task);
        let reply = self.inner.service.execute(&req).instrument(span).await;
        match accept(OpCategory::Execute, reply, "execution failed").and_then(require_state) {
            Ok(snapshot) => {
                let scope = task.map_or(TaskScope::Mirror, TaskScope::Scoped);
                self.applied(self.apply(ticket, snapshot, scope))
            }
            Err(err) => self.failed(ticket, err),
        }
    }

    /// Advance one instruction. When a task is selected but its data is not in
    /// memory yet, the task is loaded instead and [`Outcome::Primed`] returned.
    pub async fn step(&self) -> Outcome {
        if let Some(task) = self.needs_priming() {
            return self.prime(task).await;
        }
        match self.step_once().await {
            StepResult::Applied { .. } => Outcome::Applied,
            StepResult::Discarded => Outcome::Discarded,
            StepResult::Failed => Outcome::Failed,
        }
    }

    /// Step until halt, exhaustion or the configured budget.
    pub async fn run_remaining(&self) -> RunOutcome {
        RunLoopController::new(self.inner.config.run_loop.clone())
            .run(self, None)
            .await
    }

    /// Like [`run_remaining`](Self::run_remaining), stopping early once `cancel` reads `true`.
    pub async fn run_remaining_until(&self, cancel: watch::Receiver<bool>) -> RunOutcome {
        RunLoopController::new(self.inner.config.run_loop.clone())
            .run(self, Some(cancel))
            .await
    }

    /// Reset the emulator. Clears the task selection, the last error and the
    /// compile indicator.
    pub async fn reset(&self) -> Outcome {
        let Some(ticket) = self.begin(OpCategory::Reset) else {
            return Outcome::Failed;
        };
        let span = tracing::info_span!("reset", session = %self.inner.id);
        let reply = self.inner.service.reset().instrument(span).await;
        match accept(OpCategory::Reset, reply, "reset failed").and_then(require_state) {
            Ok(snapshot) => self.applied(self.apply(ticket, snapshot, TaskScope::Clear)),
            Err(err) => self.failed(ticket, err),
        }
    }

    /// Program text the service holds for `task`. Does not touch the status.
    pub async fn fetch_task_program(&self, task: TaskId) -> Result<TaskProgram, SessionError> {
        if self.is_closed() {
            return Err(SessionError::SessionClosed);
        }
        let span = tracing::info_span!("task_program", session = %self.inner.id, task = %task);
        Ok(self
            .inner
            .service
            .get_task_program(task)
            .instrument(span)
            .await?)
    }

    // ------------------------------------------------------------------
    // Run loop plumbing
    // ------------------------------------------------------------------

    /// Selected task whose data has not been loaded into memory yet.
    pub(crate) fn needs_priming(&self) -> Option<TaskId> {
        let st = self.inner.state.read();
        st.current_task.filter(|_| st.snapshot.memory.ram.is_empty())
    }

    pub(crate) async fn prime(&self, task: TaskId) -> Outcome {
        tracing::debug!(target = "emuctl", task = %task, "loading task data before stepping");
        match self.load_task_scoped(task).await {
            Outcome::Applied => Outcome::Primed,
            other => other,
        }
    }

    /// One step round trip.
    pub(crate) async fn step_once(&self) -> StepResult {
        let Some(ticket) = self.begin(OpCategory::Step) else {
            return StepResult::Failed;
        };
        let span = tracing::debug_span!("step", session = %self.inner.id, seq = ticket.seq);
        let reply = self.inner.service.step().instrument(span).await;
        let reply = accept(OpCategory::Step, reply, "step failed").and_then(|r| {
            let continues = r.continues.unwrap_or(false);
            require_state(r).map(|s| (s, continues))
        });
        match reply {
            Ok((snapshot, continues)) => {
                let halted = snapshot.processor.is_halted;
                if self.apply(ticket, snapshot, TaskScope::Mirror) {
                    StepResult::Applied { halted, continues }
                } else {
                    StepResult::Discarded
                }
            }
            Err(err) => {
                if self.apply_failure(ticket, err) {
                    StepResult::Failed
                } else {
                    StepResult::Discarded
                }
            }
        }
    }

    /// Keep `loading` up across the steps of a run.
    pub(crate) fn hold_loading(&self) {
        let mut st = self.inner.state.write();
        st.held = true;
        let cleared = st.status.error.take().is_some();
        if st.refresh_loading() || cleared {
            self.publish(&mut st, SessionEvent::StatusChanged);
        }
    }

    /// Drop the run's hold. `loading` stays up while another request is outstanding.
    pub(crate) fn release_loading(&self) {
        let mut st = self.inner.state.write();
        st.held = false;
        if st.refresh_loading() {
            self.publish(&mut st, SessionEvent::StatusChanged);
        }
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    async fn load_task_scoped(&self, task: TaskId) -> Outcome {
        let Some(ticket) = self.begin(OpCategory::Task) else {
            return Outcome::Failed;
        };
        let span = tracing::info_span!("load_task", session = %self.inner.id, task = %task);
        let reply = self
            .inner
            .service
            .load_task(&LoadTaskRequest { task_id: task })
            .instrument(span)
            .await;
        match accept(OpCategory::Task, reply, "task load failed").and_then(require_state) {
            Ok(snapshot) => {
                self.applied(self.apply(ticket, snapshot, TaskScope::Scoped(task)))
            }
            Err(err) => self.failed(ticket, err),
        }
    }

    /// Issue a ticket and flag the start of an operation.
    fn begin(&self, category: OpCategory) -> Option<Ticket> {
        if self.is_closed() {
            self.record_closed(category);
            return None;
        }
        let mut st = self.inner.state.write();
        let ticket = st.issue(category);
        st.in_flight[category.index()] = true;
        let mut changed = st.refresh_loading();
        changed |= st.status.error.take().is_some();
        if category == OpCategory::Compile && st.status.compile_ok_until.take().is_some() {
            changed = true;
        }
        if changed {
            self.publish(&mut st, SessionEvent::StatusChanged);
        }
        Some(ticket)
    }

    fn record_closed(&self, category: OpCategory) {
        tracing::warn!(target = "emuctl", op = category.name(), "operation on closed session");
        let mut st = self.inner.state.write();
        st.status.loading = false;
        st.status.error = Some(SessionError::SessionClosed.to_string());
    }

    fn apply(&self, ticket: Ticket, snapshot: EmulatorSnapshot, scope: TaskScope) -> bool {
        self.apply_with(ticket, scope, move |_| snapshot)
    }

    /// Swap in the snapshot produced by `build` if `ticket` is still the latest
    /// of its category. Returns whether it was applied.
    fn apply_with<F>(&self, ticket: Ticket, scope: TaskScope, build: F) -> bool
    where
        F: FnOnce(&EmulatorSnapshot) -> EmulatorSnapshot,
    {
        let mut st = self.inner.state.write();
        if !st.is_current(ticket) {
            drop(st);
            self.log_discard(ticket);
            return false;
        }

        // INVARIANT: the stored ram never aliases the server's or the previous buffer.
        let mut next = build(&st.snapshot).with_detached_ram();
        match scope {
            TaskScope::Scoped(task) => st.current_task = Some(task),
            TaskScope::Clear => st.current_task = None,
            TaskScope::Mirror => {}
        }
        if st.current_task.is_some() || matches!(scope, TaskScope::Clear) {
            next.current_task = st.current_task;
        }

        match ticket.category {
            OpCategory::Compile => {
                st.status.compile_ok_until = Some(Instant::now() + self.inner.config.compile_banner);
            }
            OpCategory::Reset => st.status.compile_ok_until = None,
            _ if next.is_initial() => st.status.compile_ok_until = None,
            _ => {}
        }
        st.resolve(ticket.category);

        st.snapshot = Arc::new(next);
        self.publish(&mut st, SessionEvent::SnapshotUpdated);
        true
    }

    fn apply_failure(&self, ticket: Ticket, err: SessionError) -> bool {
        let mut st = self.inner.state.write();
        if !st.is_current(ticket) {
            drop(st);
            self.log_discard(ticket);
            return false;
        }
        tracing::warn!(
            target = "emuctl",
            session = %self.inner.id,
            op = ticket.category.name(),
            error = %err,
            "operation failed"
        );
        st.status.error = Some(err.to_string());
        st.resolve(ticket.category);
        self.publish(&mut st, SessionEvent::StatusChanged);
        true
    }

    fn applied(&self, applied: bool) -> Outcome {
        if applied {
            Outcome::Applied
        } else {
            Outcome::Discarded
        }
    }

    fn failed(&self, ticket: Ticket, err: SessionError) -> Outcome {
        if self.apply_failure(ticket, err) {
            Outcome::Failed
        } else {
            Outcome::Discarded
        }
    }

    fn log_discard(&self, ticket: Ticket) {
        tracing::debug!(
            target = "emuctl",
            session = %self.inner.id,
            op = ticket.category.name(),
            seq = ticket.seq,
            "stale response discarded"
        );
    }

    fn publish(&self, st: &mut SessionState, event: SessionEvent) {
        st.revision += 1;
        tracing::trace!(target = "emuctl", event = event.name(), revision = st.revision, "publish");
        if let Some(tx) = self.inner.tx.lock().as_ref() {
            tx.send_replace(st.view(event));
        }
    }
}

fn accept<R: ServiceReply>(
    category: OpCategory,
    reply: Result<R, ClientError>,
    fallback: &str,
) -> Result<R, SessionError> {
    let reply = reply?;
    if reply.succeeded() {
        Ok(reply)
    } else {
        Err(SessionError::LogicalFailure {
            operation: category.name(),
            message: reply.diagnostic().unwrap_or(fallback).to_string(),
        })
    }
}

fn require_state<R: ServiceReply>(reply: R) -> Result<EmulatorSnapshot, SessionError> {
    reply.into_state().ok_or(SessionError::LogicalFailure {
        operation: "reconcile",
        message: "reply carried no emulator state".into(),
    })
}
