use std::sync::{Mutex, Weak};

use crate::machine::Machine;

/// A discovered device endpoint. Ports themselves are created by an
/// out-of-scope discovery subsystem; this crate only ever receives one and
/// tracks which [`Machine`], if any, is currently bound to it.
#[derive(Debug)]
pub struct Port {
    pub vid: u16,
    pub pid: u16,
    pub iserial: String,
    pub path: String,
    bound_machine: Mutex<Weak<Machine>>,
}

impl Port {
    pub fn new(vid: u16, pid: u16, iserial: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            vid,
            pid,
            iserial: iserial.into(),
            path: path.into(),
            bound_machine: Mutex::new(Weak::new()),
        }
    }

    /// The machine currently bound to this port, if it is still alive.
    pub fn bound_machine(&self) -> Option<std::sync::Arc<Machine>> {
        self.bound_machine.lock().unwrap().upgrade()
    }

    pub(crate) fn bind(&self, machine: &std::sync::Arc<Machine>) {
        *self.bound_machine.lock().unwrap() = std::sync::Arc::downgrade(machine);
    }
}
