// Event names published to session subscribers.
pub const EVENT_SNAPSHOT_UPDATED: &str = "snapshot-updated";
pub const EVENT_STATUS_CHANGED: &str = "status-changed";
pub const EVENT_TASKS_LOADED: &str = "tasks-loaded";
pub const EVENT_SESSION_CLOSED: &str = "session-closed";

/// What caused the latest published view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionEvent {
    #[default]
    SnapshotUpdated,
    StatusChanged,
    TasksLoaded,
    SessionClosed,
}

impl SessionEvent {
    pub fn name(self) -> &'static str {
        match self {
            SessionEvent::SnapshotUpdated => EVENT_SNAPSHOT_UPDATED,
            SessionEvent::StatusChanged => EVENT_STATUS_CHANGED,
            SessionEvent::TasksLoaded => EVENT_TASKS_LOADED,
            SessionEvent::SessionClosed => EVENT_SESSION_CLOSED,
        }
    }
}
