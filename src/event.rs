use std::sync::{Arc, Mutex};

/// Multicast hook: attach any number of listeners, fire them all in attachment
/// order with the same payload. Firing does not block on listeners doing
/// anything slow — a listener that needs to do blocking work should offload it
/// itself (spawn a task, send on a channel).
///
/// Payloads are cloned once per listener, so `Payload` is typically cheap to
/// clone (an `Arc`, a small struct, or a `Copy` type).
pub struct Event<Payload: Clone> {
    listeners: Mutex<Vec<(u64, Arc<dyn Fn(Payload) + Send + Sync>)>>,
    next_id: Mutex<u64>,
}

/// Handle returned by [`Event::attach`]; pass to [`Event::detach`] to remove
/// the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

impl<Payload: Clone> Event<Payload> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
        }
    }

    /// Attaches a listener, returning an id that can later be passed to
    /// [`Event::detach`].
    pub fn attach(&self, listener: impl Fn(Payload) + Send + Sync + 'static) -> ListenerId {
        let mut next_id = self.next_id.lock().unwrap();
        let id = *next_id;
        *next_id += 1;
        self.listeners
            .lock()
            .unwrap()
            .push((id, Arc::new(listener)));
        ListenerId(id)
    }

    /// Removes a previously attached listener. A no-op if the id is unknown
    /// (already detached, or from a different `Event`).
    pub fn detach(&self, id: ListenerId) {
        self.listeners.lock().unwrap().retain(|(lid, _)| *lid != id.0);
    }

    /// Invokes every attached listener, in attachment order, with a clone of
    /// `payload`.
    pub fn fire(&self, payload: Payload) {
        let listeners = self.listeners.lock().unwrap().clone();
        for (_, listener) in listeners {
            listener(payload.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

impl<Payload: Clone> Default for Event<Payload> {
    fn default() -> Self {
        Self::new()
    }
}
