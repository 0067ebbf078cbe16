use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::event::Event;

/// State of a [`Task`]. Terminal states (`Ended`, `Failed`, `Canceled`) are
/// absorbing: once reached, further transitions are silently ignored rather
/// than treated as errors, so that cancellation races stay safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Ended,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Ended | TaskState::Failed | TaskState::Canceled)
    }
}

struct Inner {
    state: TaskState,
    progress: Option<Value>,
    result: Option<Value>,
    error: Option<Value>,
    stopped_fired: bool,
}

/// One unit of asynchronous work, tracked through `Pending -> Running ->
/// {Ended, Failed, Canceled}`. Used both for inbound JSON-RPC requests the
/// endpoint dispatches and for outbound requests awaiting a peer's response.
pub struct Task {
    inner: Mutex<Inner>,
    pub state_changed: Event<TaskState>,
    pub progress_changed: Event<Value>,
    /// Fires exactly once, the first time any terminal state is reached.
    pub stopped_event: Event<TaskState>,
}

impl Task {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: TaskState::Pending,
                progress: None,
                result: None,
                error: None,
                stopped_fired: false,
            }),
            state_changed: Event::new(),
            progress_changed: Event::new(),
            stopped_event: Event::new(),
        })
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().unwrap().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    pub fn result(&self) -> Option<Value> {
        self.inner.lock().unwrap().result.clone()
    }

    pub fn error(&self) -> Option<Value> {
        self.inner.lock().unwrap().error.clone()
    }

    pub fn progress(&self) -> Option<Value> {
        self.inner.lock().unwrap().progress.clone()
    }

    /// `Pending -> Running`. No-op outside `Pending`.
    pub fn start(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == TaskState::Pending {
            inner.state = TaskState::Running;
            drop(inner);
            self.state_changed.fire(TaskState::Running);
        }
    }

    /// Refreshes progress and fires `progress_changed`, but only while
    /// `Running`. No-op otherwise (including on terminal tasks).
    pub fn heartbeat(&self, progress: Value) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == TaskState::Running {
            inner.progress = Some(progress.clone());
            drop(inner);
            self.progress_changed.fire(progress);
        }
    }

    /// Like [`Task::heartbeat`] but suppresses the event (though it still
    /// latches the value) when `new == old_progress`.
    pub fn lazy_heartbeat(&self, new: Value) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != TaskState::Running {
            return;
        }
        let unchanged = inner.progress.as_ref() == Some(&new);
        inner.progress = Some(new.clone());
        drop(inner);
        if !unchanged {
            self.progress_changed.fire(new);
        }
    }

    /// `Running -> Ended`, latching `result`. No-op outside `Running`.
    pub fn end(&self, result: Value) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == TaskState::Running {
            inner.state = TaskState::Ended;
            inner.result = Some(result);
            self.finish_terminal(inner);
        }
    }

    /// `Running -> Failed`, latching `error`. No-op outside `Running`.
    pub fn fail(&self, error: Value) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == TaskState::Running {
            inner.state = TaskState::Failed;
            inner.error = Some(error);
            self.finish_terminal(inner);
        }
    }

    /// `{Pending, Running} -> Canceled`. A no-op on an already-terminal task,
    /// so callers can always call `cancel()` without checking state first.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.state.is_terminal() {
            inner.state = TaskState::Canceled;
            self.finish_terminal(inner);
        }
    }

    fn finish_terminal(&self, mut inner: std::sync::MutexGuard<'_, Inner>) {
        let state = inner.state;
        let fire_stopped = !inner.stopped_fired;
        inner.stopped_fired = true;
        drop(inner);
        self.state_changed.fire(state);
        if fire_stopped {
            self.stopped_event.fire(state);
        }
    }
}
