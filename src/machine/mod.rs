pub mod operation;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::device::{DeviceHandle, MotherboardStatus};
use crate::driver::profile::Profile;
use crate::error::{DriverError, MachineError};
use crate::event::Event;
use crate::task::Task;

use operation::Operation;

/// The actor's externally observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Disconnected,
    Busy,
    Idle,
    Operation,
}

/// Construction-time tuning for a [`Machine`], styled after the endpoint's
/// own construction-time configuration (see crate docs).
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub poll_interval: Duration,
    pub buffer_overflow_retry: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            buffer_overflow_retry: Duration::from_millis(200),
        }
    }
}

/// Latest telemetry snapshot taken by the poll task.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    pub motherboard_status: MotherboardStatus,
    pub is_finished: bool,
    pub platform_temperature: f64,
    pub platform_ready: bool,
    pub tool_temperatures: Vec<f64>,
    pub tool_ready: Vec<bool>,
}

struct Inner {
    state: MachineState,
    device: Option<Arc<dyn DeviceHandle>>,
    operation: Option<Arc<dyn Operation>>,
    current_task: Option<Arc<Task>>,
    telemetry: Telemetry,
    stopping: bool,
}

/// Per-device actor. Owns the driver-supplied device handle, the latest
/// polled telemetry, at most one running [`Operation`], and the [`Task`]
/// tracking it. A poll task samples device state on an interval; a work task
/// runs queued operations one at a time. Both cooperate over one shared
/// [`Notify`] plus a [`Mutex`]-guarded state struct — the async analogue of
/// the reference design's single condition variable.
pub struct Machine {
    config: MachineConfig,
    pub profile: Arc<Profile>,
    inner: Mutex<Inner>,
    notify: Notify,
    pub state_changed: Event<MachineState>,
    pub temperature_changed: Event<Telemetry>,
}

impl Machine {
    pub fn new(profile: Arc<Profile>, config: MachineConfig) -> Arc<Self> {
        let machine = Arc::new(Self {
            config,
            profile,
            inner: Mutex::new(Inner {
                state: MachineState::Disconnected,
                device: None,
                operation: None,
                current_task: None,
                telemetry: Telemetry::default(),
                stopping: false,
            }),
            notify: Notify::new(),
            state_changed: Event::new(),
            temperature_changed: Event::new(),
        });

        let poll_handle = machine.clone();
        tokio::spawn(async move { poll_handle.poll_loop().await });

        let work_handle = machine.clone();
        tokio::spawn(async move { work_handle.work_loop().await });

        machine
    }

    pub fn state(&self) -> MachineState {
        self.inner.lock().unwrap().state
    }

    pub fn telemetry(&self) -> Telemetry {
        self.inner.lock().unwrap().telemetry.clone()
    }

    pub fn current_task(&self) -> Option<Arc<Task>> {
        self.inner.lock().unwrap().current_task.clone()
    }

    /// `operation == null` iff `state != Operation`, invariant I4/I5 (see
    /// crate's testable-properties docs).
    pub fn has_operation(&self) -> bool {
        self.inner.lock().unwrap().operation.is_some()
    }

    fn set_state(&self, next: MachineState) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == next {
            return;
        }
        inner.state = next;
        drop(inner);
        self.state_changed.fire(next);
        self.notify.notify_waiters();
    }

    async fn wait_for_notification(&self) {
        self.notify.notified().await;
    }

    /// Acquires a device handle, queries firmware identity, runs one
    /// eager poll, and transitions `Disconnected -> Busy`.
    pub async fn connect(self: &Arc<Self>, device: Arc<dyn DeviceHandle>) -> Result<(), MachineError> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state != MachineState::Disconnected {
                return Err(MachineError::MachineState("connect requires Disconnected"));
            }
        }

        let version = device.get_version().await?;
        let toolhead_count = device.get_toolhead_count().await?;
        debug!("connected to device firmware {version} with {toolhead_count} toolhead(s)");

        {
            let mut inner = self.inner.lock().unwrap();
            inner.device = Some(device);
            inner.state = MachineState::Busy;
        }
        self.state_changed.fire(MachineState::Busy);
        self.notify.notify_waiters();

        self.poll_once().await;
        Ok(())
    }

    /// Closes the device handle and transitions to `Disconnected`,
    /// clearing telemetry and any in-flight operation/task.
    pub async fn disconnect(self: &Arc<Self>) {
        let device = {
            let mut inner = self.inner.lock().unwrap();
            let device = inner.device.take();
            inner.operation = None;
            if let Some(task) = inner.current_task.take() {
                task.cancel();
            }
            inner.telemetry = Telemetry::default();
            inner.state = MachineState::Disconnected;
            device
        };
        if let Some(device) = device {
            if let Err(err) = device.close().await {
                warn!("error closing device handle during disconnect: {err}");
            }
        }
        self.state_changed.fire(MachineState::Disconnected);
        self.notify.notify_waiters();
    }

    /// Asks both background tasks to exit after their current wait.
    pub fn stop(&self) {
        self.inner.lock().unwrap().stopping = true;
        self.notify.notify_waiters();
    }

    fn is_stopping(&self) -> bool {
        self.inner.lock().unwrap().stopping
    }

    /// Starts a print-from-device operation. Requires `Idle`.
    pub fn print(
        self: &Arc<Self>,
        parser: Box<dyn crate::gcode::GcodeParser>,
        input_path: std::path::PathBuf,
        skip_start_end: bool,
    ) -> Result<Arc<Task>, MachineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != MachineState::Idle {
            return Err(MachineError::MachineState("print requires Idle"));
        }
        let device = inner
            .device
            .clone()
            .ok_or(MachineError::MachineState("no device handle bound"))?;

        let task = Task::new();
        let op: Arc<dyn Operation> = Arc::new(operation::MakeOperation::new(
            device,
            parser,
            task.clone(),
            input_path,
            skip_start_end,
            Arc::downgrade(self),
            self.config.buffer_overflow_retry,
        ));

        inner.operation = Some(op);
        inner.current_task = Some(task.clone());
        inner.state = MachineState::Operation;
        drop(inner);

        self.state_changed.fire(MachineState::Operation);
        self.notify.notify_waiters();
        Ok(task)
    }

    pub fn pause(&self) -> Result<(), MachineError> {
        let op = self
            .inner
            .lock()
            .unwrap()
            .operation
            .clone()
            .ok_or(MachineError::NoOperation)?;
        op.pause();
        Ok(())
    }

    pub fn unpause(&self) -> Result<(), MachineError> {
        let op = self
            .inner
            .lock()
            .unwrap()
            .operation
            .clone()
            .ok_or(MachineError::NoOperation)?;
        op.unpause();
        Ok(())
    }

    pub fn cancel(&self) -> Result<(), MachineError> {
        let op = self
            .inner
            .lock()
            .unwrap()
            .operation
            .clone()
            .ok_or(MachineError::NoOperation)?;
        op.cancel();
        Ok(())
    }

    /// Applies the poll/work error classification table: the
    /// recoverable-transient conditions mutate state without tearing the
    /// connection down; everything else is fatal and triggers a full
    /// disconnect. Shared by the poll loop and by operations that encounter
    /// a driver error mid-execution.
    pub(crate) async fn handle_driver_error(self: &Arc<Self>, err: &DriverError) {
        match err {
            DriverError::ActiveBuild => {
                self.set_state(MachineState::Busy);
            }
            DriverError::BuildCancelled | DriverError::ExternalStop => {
                let task = {
                    let mut inner = self.inner.lock().unwrap();
                    inner.current_task.take()
                };
                if let Some(task) = task {
                    if task.is_running() {
                        task.cancel();
                    }
                }
            }
            _ => {
                error!("fatal driver error, disconnecting: {err}");
                let task = {
                    let mut inner = self.inner.lock().unwrap();
                    inner.current_task.take()
                };
                if let Some(task) = task {
                    if task.is_running() {
                        task.fail(Value::String(err.to_string()));
                    }
                }
                self.disconnect().await;
            }
        }
    }

    /// One poll cycle: snapshots telemetry, classifies busy/idle, fires
    /// `temperature_changed` on change, and applies the poll-only transition
    /// rules (BUSY <-> IDLE; OPERATION and DISCONNECTED are left alone).
    async fn poll_once(self: &Arc<Self>) {
        let device = {
            let inner = self.inner.lock().unwrap();
            if inner.state == MachineState::Disconnected {
                return;
            }
            inner.device.clone()
        };
        let Some(device) = device else { return };

        let motherboard_status = match device.get_motherboard_status().await {
            Ok(status) => status,
            Err(err) => {
                self.handle_driver_error(&err).await;
                return;
            }
        };
        let build_stats = match device.get_build_stats().await {
            Ok(stats) => stats,
            Err(err) => {
                self.handle_driver_error(&err).await;
                return;
            }
        };
        let platform_temperature = match device.get_platform_temperature(0).await {
            Ok(t) => t,
            Err(err) => {
                self.handle_driver_error(&err).await;
                return;
            }
        };
        let platform_ready = match device.is_platform_ready(0).await {
            Ok(r) => r,
            Err(err) => {
                self.handle_driver_error(&err).await;
                return;
            }
        };

        let toolhead_count = {
            let mut count = 0usize;
            loop {
                match device.get_tool_status(count).await {
                    Ok(_) => count += 1,
                    Err(_) => break,
                }
                if count > 16 {
                    break;
                }
            }
            count
        };

        let mut tool_temperatures = Vec::with_capacity(toolhead_count);
        let mut tool_ready = Vec::with_capacity(toolhead_count);
        for i in 0..toolhead_count {
            let temp = device.get_toolhead_temperature(i).await.unwrap_or(0.0);
            let ready = device.is_tool_ready(i).await.unwrap_or(false);
            tool_temperatures.push(temp);
            tool_ready.push(ready);
        }

        let new_telemetry = Telemetry {
            motherboard_status,
            is_finished: build_stats.is_finished,
            platform_temperature,
            platform_ready,
            tool_temperatures,
            tool_ready,
        };

        let (changed, was_busy_state) = {
            let mut inner = self.inner.lock().unwrap();
            let changed = inner.telemetry.platform_temperature != new_telemetry.platform_temperature
                || inner.telemetry.tool_temperatures != new_telemetry.tool_temperatures;
            let was_busy_state = inner.state == MachineState::Busy;
            inner.telemetry = new_telemetry.clone();
            (changed, was_busy_state)
        };

        if changed {
            self.temperature_changed.fire(new_telemetry.clone());
        }

        let is_busy = new_telemetry.motherboard_status.is_busy();
        if was_busy_state && !is_busy && new_telemetry.is_finished {
            self.set_state(MachineState::Idle);
        } else if !was_busy_state && is_busy {
            let should_transition = {
                let inner = self.inner.lock().unwrap();
                matches!(inner.state, MachineState::Idle)
            };
            if should_transition {
                self.set_state(MachineState::Busy);
            }
        }
    }

    async fn poll_loop(self: Arc<Self>) {
        loop {
            if self.is_stopping() {
                return;
            }
            self.poll_once().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.wait_for_notification() => {}
            }
            if self.is_stopping() {
                return;
            }
        }
    }

    async fn work_loop(self: Arc<Self>) {
        loop {
            if self.is_stopping() {
                return;
            }
            let op = {
                let inner = self.inner.lock().unwrap();
                inner.operation.clone()
            };
            let Some(op) = op else {
                self.wait_for_notification().await;
                continue;
            };

            op.run().await;

            let mut inner = self.inner.lock().unwrap();
            inner.operation = None;
            inner.current_task = None;
            if inner.state == MachineState::Operation {
                inner.state = MachineState::Idle;
                drop(inner);
                self.state_changed.fire(MachineState::Idle);
                self.notify.notify_waiters();
            }
        }
    }
}
