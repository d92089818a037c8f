//! Task selection.
//!
//! Tasks 1 and 2 need a second choice between a worked example (program text
//! from the service) and a hand-initialised template before any text is
//! loaded. Other tasks load their program right away. Deselecting clears the
//! cached text and the store's active task.

pub mod bundled;

use std::{fmt, str::FromStr};

use serde::Serialize;
use thiserror::Error;

use crate::model::TaskId;
use crate::store::{SessionError, SessionStore};

/// Tasks that require a variant choice.
pub const VARIANT_TASKS: [TaskId; 2] = [TaskId(1), TaskId(2)];

pub fn has_variants(task: TaskId) -> bool {
    VARIANT_TASKS.contains(&task)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Variant {
    Example,
    Template,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Example => f.write_str("example"),
            Variant::Template => f.write_str("template"),
        }
    }
}

impl FromStr for Variant {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "example" => Ok(Variant::Example),
            "template" => Ok(Variant::Template),
            other => Err(SelectionError::UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskSelection {
    #[default]
    None,
    PendingVariant(TaskId),
    Variant(TaskId, Variant),
    Other(TaskId),
}

impl TaskSelection {
    pub fn task(&self) -> Option<TaskId> {
        match *self {
            TaskSelection::None => None,
            TaskSelection::PendingVariant(t)
            | TaskSelection::Variant(t, _)
            | TaskSelection::Other(t) => Some(t),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("selected task has no example/template variants")]
    NoVariantTask,
    #[error("no task is active")]
    NoActiveTask,
    #[error("unknown variant '{0}' (expected 'example' or 'template')")]
    UnknownVariant(String),
    #[error(transparent)]
    Fetch(#[from] SessionError),
}

/// Selection state plus the example text cached for it.
#[derive(Debug)]
pub struct TaskPicker {
    store: SessionStore,
    selection: TaskSelection,
    example_text: String,
    loading_example: bool,
}

impl TaskPicker {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            selection: TaskSelection::None,
            example_text: String::new(),
            loading_example: false,
        }
    }

    pub fn selection(&self) -> TaskSelection {
        self.selection
    }

    pub fn example_text(&self) -> &str {
        &self.example_text
    }

    pub fn loading_example(&self) -> bool {
        self.loading_example
    }

    /// Select `task`; selecting the current one again deselects it.
    pub async fn select_task(&mut self, task: TaskId) -> TaskSelection {
        self.example_text.clear();

        if self.selection.task() == Some(task) {
            self.selection = TaskSelection::None;
            self.store.set_current_task(None).await;
        } else if has_variants(task) {
            self.selection = TaskSelection::PendingVariant(task);
            self.store.set_current_task(None).await;
        } else {
            self.selection = TaskSelection::Other(task);
            self.store.set_current_task(Some(task)).await;
            self.fill_example(task).await;
        }

        tracing::debug!(target = "emuctl", selection = ?self.selection, "task selection changed");
        self.selection
    }

    /// Choose the variant of a task that has them; choosing the active variant again clears it.
    pub async fn select_variant(&mut self, variant: Variant) -> Result<TaskSelection, SelectionError> {
        let task = match self.selection {
            TaskSelection::PendingVariant(t) | TaskSelection::Variant(t, _) => t,
            _ => return Err(SelectionError::NoVariantTask),
        };

        if self.selection == TaskSelection::Variant(task, variant) {
            self.selection = TaskSelection::PendingVariant(task);
            self.example_text.clear();
            self.store.set_current_task(None).await;
            return Ok(self.selection);
        }

        self.selection = TaskSelection::Variant(task, variant);
        self.store.set_current_task(Some(task)).await;
        match variant {
            Variant::Example => self.fill_example(task).await,
            Variant::Template => {
                self.example_text = bundled::template(task).unwrap_or_default().to_string();
            }
        }
        Ok(self.selection)
    }

    /// Refetch the active task's program from the service and reload its data.
    pub async fn load_example(&mut self) -> Result<(), SelectionError> {
        let Some(task) = self.store.current_task() else {
            tracing::warn!(target = "emuctl", "no task selected; nothing to load");
            return Err(SelectionError::NoActiveTask);
        };

        self.loading_example = true;
        let program = self.store.fetch_task_program(task).await;
        self.loading_example = false;

        let program = program.map_err(|e| {
            tracing::error!(target = "emuctl", task = %task, error = %e, "example program unavailable");
            e
        })?;
        self.example_text = program.program;
        self.store.set_current_task(Some(task)).await;
        Ok(())
    }

    /// Copy the cached text into the editor. Returns false when there is nothing to copy.
    pub fn insert_example(&self) -> bool {
        if self.example_text.is_empty() {
            return false;
        }
        self.store.set_source_code(self.example_text.clone());
        true
    }

    async fn fill_example(&mut self, task: TaskId) {
        self.loading_example = true;
        match self.store.fetch_task_program(task).await {
            Ok(program) => self.example_text = program.program,
            Err(err) => {
                tracing::warn!(
                    target = "emuctl",
                    task = %task,
                    error = %err,
                    "falling back to bundled example"
                );
                self.example_text = bundled::example(task).unwrap_or_default().to_string();
            }
        }
        self.loading_example = false;
    }
}
