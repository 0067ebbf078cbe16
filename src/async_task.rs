use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::event::Event;

/// State of an [`Async`]. Unlike [`crate::task::Task`], `Heartbeat` is not a
/// state of its own — it refreshes progress while remaining `Running` and
/// fires `heartbeat_event` so listeners observe liveness without a
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    Pending,
    Running,
    Success,
    Error,
    Timeout,
    Canceled,
}

impl AsyncState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AsyncState::Success | AsyncState::Error | AsyncState::Timeout | AsyncState::Canceled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start,
    Heartbeat,
    Success,
    Error,
    Timeout,
    Cancel,
}

struct Inner {
    state: AsyncState,
    heartbeat: Option<Value>,
    reply: Option<Value>,
    error: Option<Value>,
}

/// A cooperative asynchronous operation tracker with a richer terminal
/// vocabulary than [`crate::task::Task`] (`Success`/`Error`/`Timeout` are
/// distinct, and `Canceled` is reachable directly from `Pending`), and a
/// payload latched on each of `heartbeat`/`succeed`/`fail` so a caller
/// wrapping foreign asynchronous work can later read what was delivered.
///
/// Every public trigger method (`start`/`heartbeat`/`succeed`/`fail`/
/// `time_out`/`cancel`) silently absorbs an illegal transition rather than
/// panicking or returning an error — this mirrors the reference
/// implementation's `_trigger_transition`, which catches and discards
/// `IllegalTransitionException` unconditionally, not only for terminal
/// states. Callers that need to know whether a call actually took effect
/// should compare `state()` before and after.
pub struct Async {
    inner: Mutex<Inner>,
    pub state_changed: Event<AsyncState>,
    pub heartbeat_event: Event<Value>,
}

impl Async {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: AsyncState::Pending,
                heartbeat: None,
                reply: None,
                error: None,
            }),
            state_changed: Event::new(),
            heartbeat_event: Event::new(),
        })
    }

    pub fn state(&self) -> AsyncState {
        self.inner.lock().unwrap().state
    }

    /// The payload latched by the most recent [`Async::heartbeat`] call.
    pub fn last_heartbeat(&self) -> Option<Value> {
        self.inner.lock().unwrap().heartbeat.clone()
    }

    /// The payload latched by [`Async::succeed`], once `state() ==
    /// AsyncState::Success`.
    pub fn reply(&self) -> Option<Value> {
        self.inner.lock().unwrap().reply.clone()
    }

    /// The payload latched by [`Async::fail`], once `state() ==
    /// AsyncState::Error`.
    pub fn error(&self) -> Option<Value> {
        self.inner.lock().unwrap().error.clone()
    }

    fn is_legal(current: AsyncState, transition: Transition) -> bool {
        use AsyncState::*;
        use Transition::*;
        match (current, transition) {
            (Pending, Start) => true,
            (Pending, Cancel) => true,
            (Running, Heartbeat) => true,
            (Running, Success) => true,
            (Running, Error) => true,
            (Running, Timeout) => true,
            (Running, Cancel) => true,
            _ => false,
        }
    }

    /// Drives a state-only transition (no latched payload). Returns whether
    /// it actually took effect, for callers that only ever need the state
    /// side effect (`start`/`time_out`/`cancel`).
    fn trigger_state(&self, transition: Transition, next: AsyncState) {
        let mut inner = self.inner.lock().unwrap();
        if !Self::is_legal(inner.state, transition) {
            return;
        }
        inner.state = next;
        drop(inner);
        self.state_changed.fire(next);
    }

    pub fn start(&self) {
        self.trigger_state(Transition::Start, AsyncState::Running);
    }

    /// Latches `payload` as the current heartbeat and fires
    /// `heartbeat_event` with it, without altering `state`. Absorbed
    /// silently if not currently `Running`.
    pub fn heartbeat(&self, payload: Value) {
        let mut inner = self.inner.lock().unwrap();
        if !Self::is_legal(inner.state, Transition::Heartbeat) {
            return;
        }
        inner.heartbeat = Some(payload.clone());
        drop(inner);
        self.heartbeat_event.fire(payload);
    }

    /// `Running -> Success`, latching `payload` as the reply.
    pub fn succeed(&self, payload: Value) {
        let mut inner = self.inner.lock().unwrap();
        if !Self::is_legal(inner.state, Transition::Success) {
            return;
        }
        inner.state = AsyncState::Success;
        inner.reply = Some(payload);
        drop(inner);
        self.state_changed.fire(AsyncState::Success);
    }

    /// `Running -> Error`, latching `payload` as the error.
    pub fn fail(&self, payload: Value) {
        let mut inner = self.inner.lock().unwrap();
        if !Self::is_legal(inner.state, Transition::Error) {
            return;
        }
        inner.state = AsyncState::Error;
        inner.error = Some(payload);
        drop(inner);
        self.state_changed.fire(AsyncState::Error);
    }

    pub fn time_out(&self) {
        self.trigger_state(Transition::Timeout, AsyncState::Timeout);
    }

    /// `Pending -> Canceled` or `Running -> Canceled`. Absorbed silently if
    /// already terminal.
    pub fn cancel(&self) {
        self.trigger_state(Transition::Cancel, AsyncState::Canceled);
    }
}

/// Chains a sequence of [`Async`] factories so that each stage starts only
/// after the previous one reaches `Success`, and any non-success terminal
/// state short-circuits the whole sequence into that same state.
///
/// `stages` are invoked lazily: the factory for stage N+1 is not called until
/// stage N succeeds, mirroring the reference implementation's
/// `async_sequence`, which builds each subsequent `Async` only once its
/// predecessor resolves.
pub async fn async_sequence<F>(stages: Vec<F>) -> AsyncState
where
    F: FnOnce() -> Arc<Async>,
{
    use tokio::sync::oneshot;

    for stage in stages {
        let op = stage();
        op.start();

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        op.state_changed.attach(move |state| {
            if state.is_terminal() {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(state);
                }
            }
        });

        // The state may already be terminal by the time we attached (a
        // synchronous operation completing inline from `start()`).
        let already = op.state();
        let outcome = if already.is_terminal() {
            already
        } else {
            rx.await.unwrap_or(AsyncState::Error)
        };

        if outcome != AsyncState::Success {
            return outcome;
        }
    }

    AsyncState::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn happy_path_success() {
        let op = Async::new();
        op.start();
        assert_eq!(op.state(), AsyncState::Running);
        op.succeed(json!({"result": 42}));
        assert_eq!(op.state(), AsyncState::Success);
        assert_eq!(op.reply(), Some(json!({"result": 42})));
    }

    #[test]
    fn pending_to_canceled_direct() {
        let op = Async::new();
        op.cancel();
        assert_eq!(op.state(), AsyncState::Canceled);
    }

    #[test]
    fn illegal_transitions_are_silently_absorbed() {
        let op = Async::new();
        // succeed() before start(): illegal, absorbed, no state change.
        op.succeed(json!(null));
        assert_eq!(op.state(), AsyncState::Pending);
        assert_eq!(op.reply(), None);

        op.start();
        op.succeed(json!("done"));
        assert_eq!(op.state(), AsyncState::Success);

        // Every trigger on a terminal Async is absorbed, matching the
        // reference implementation's unconditional exception swallowing.
        op.fail(json!("late error"));
        op.time_out();
        op.cancel();
        op.start();
        assert_eq!(op.state(), AsyncState::Success);
        assert_eq!(op.reply(), Some(json!("done")));
        assert_eq!(op.error(), None);
    }

    #[test]
    fn fail_latches_the_error_payload() {
        let op = Async::new();
        op.start();
        op.fail(json!({"code": -1, "message": "boom"}));
        assert_eq!(op.state(), AsyncState::Error);
        assert_eq!(op.error(), Some(json!({"code": -1, "message": "boom"})));
        assert_eq!(op.reply(), None);
    }

    #[test]
    fn heartbeat_only_fires_while_running() {
        let op = Async::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        op.heartbeat_event.attach(move |payload| {
            sink.lock().unwrap().push(payload);
        });

        op.heartbeat(json!(1)); // Pending: absorbed
        assert!(fired.lock().unwrap().is_empty());
        assert_eq!(op.last_heartbeat(), None);

        op.start();
        op.heartbeat(json!(10));
        op.heartbeat(json!(20));
        assert_eq!(*fired.lock().unwrap(), vec![json!(10), json!(20)]);
        assert_eq!(op.last_heartbeat(), Some(json!(20)));

        op.succeed(json!(null));
        op.heartbeat(json!(30)); // terminal: absorbed
        assert_eq!(*fired.lock().unwrap(), vec![json!(10), json!(20)]);
        assert_eq!(op.last_heartbeat(), Some(json!(20)));
    }

    #[tokio::test]
    async fn async_sequence_short_circuits_on_first_failure() {
        let outcome = async_sequence(vec![
            (|| {
                let op = Async::new();
                op.clone().succeed_immediately();
                op
            }) as fn() -> Arc<Async>,
            || {
                let op = Async::new();
                op.clone().fail_immediately();
                op
            },
        ])
        .await;

        assert_eq!(outcome, AsyncState::Error);
    }

    #[tokio::test]
    async fn async_sequence_all_success_returns_success() {
        let outcome = async_sequence(vec![
            (|| {
                let op = Async::new();
                op.clone().succeed_immediately();
                op
            }) as fn() -> Arc<Async>,
            || {
                let op = Async::new();
                op.clone().succeed_immediately();
                op
            },
        ])
        .await;

        assert_eq!(outcome, AsyncState::Success);
    }

    // Test-only helpers so stage factories can resolve synchronously inline
    // (mirrors an Async whose underlying work is already done by the time
    // start() returns, e.g. a cache hit).
    impl Async {
        fn succeed_immediately(self: Arc<Self>) {
            self.start();
            self.succeed(serde_json::json!(null));
        }

        fn fail_immediately(self: Arc<Self>) {
            self.start();
            self.fail(serde_json::json!(null));
        }
    }
}
