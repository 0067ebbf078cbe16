use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::warn;

use crate::device::DeviceHandle;
use crate::driver::profile::Scaffold;
use crate::error::DriverError;
use crate::gcode::GcodeParser;
use crate::task::Task;

use super::Machine;

/// A pluggable unit of device work. `run()` is called exactly once, by
/// whichever thread owns the operation (a machine's work task, or the
/// caller's own task for a synchronous print-to-file); `pause`/`unpause`/
/// `cancel` may be called from any task at any time and are idempotent.
#[async_trait]
pub trait Operation: Send + Sync {
    async fn run(self: Arc<Self>);
    fn pause(&self);
    fn unpause(&self);
    fn cancel(&self);
}

/// Executes `lines` against `parser`, respecting `paused` and retrying on
/// `BufferOverflow`. Shared by [`MakeOperation`] and [`PrintToFileOperation`]
/// since both run the same scaffold/body/scaffold shape.
async fn execute_lines(
    parser: &AsyncMutex<Box<dyn GcodeParser>>,
    task: &Task,
    paused: &AtomicBool,
    pause_notify: &Notify,
    buffer_overflow_retry: Duration,
    lines: impl Iterator<Item = String>,
) -> Result<(), DriverError> {
    for line in lines {
        let trimmed = line.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        loop {
            // Register interest in the notification *before* checking
            // `paused`, so an unpause() that lands between the load and the
            // await is still observed instead of dropped.
            let notified = pause_notify.notified();
            if paused.load(Ordering::SeqCst) {
                notified.await;
                continue;
            }
            let mut parser = parser.lock().await;
            match parser.execute_line(&trimmed).await {
                Ok(()) => {
                    let percentage = parser.percentage().round() as i64;
                    drop(parser);
                    task.lazy_heartbeat(json!(percentage));
                    break;
                }
                Err(DriverError::BufferOverflow) => {
                    drop(parser);
                    tokio::time::sleep(buffer_overflow_retry).await;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }
    Ok(())
}

/// Arranges for a cancellation of `task` to signal the driver's external
/// stop flag and abort the device immediately, rather than waiting for the
/// in-flight line to finish.
fn install_cancel_hook(task: &Task, device: Arc<dyn DeviceHandle>) {
    task.stopped_event.attach(move |state| {
        if state == crate::task::TaskState::Canceled {
            let device = device.clone();
            tokio::spawn(async move {
                if let Err(err) = device.set_external_stop(true).await {
                    warn!("failed to set external stop after cancellation: {err}");
                }
                if let Err(err) = device.abort_immediately().await {
                    warn!("failed to abort device after cancellation: {err}");
                }
            });
        }
    });
}

/// Prints a G-code file to a physical device, driven on a machine's work
/// task. Waits for the device's "clear build plate" button before running
/// the file body.
pub struct MakeOperation {
    device: Arc<dyn DeviceHandle>,
    parser: AsyncMutex<Box<dyn GcodeParser>>,
    task: Arc<Task>,
    input_path: PathBuf,
    skip_start_end: bool,
    machine: Weak<Machine>,
    buffer_overflow_retry: Duration,
    paused: AtomicBool,
    pause_notify: Notify,
}

impl MakeOperation {
    pub fn new(
        device: Arc<dyn DeviceHandle>,
        parser: Box<dyn GcodeParser>,
        task: Arc<Task>,
        input_path: PathBuf,
        skip_start_end: bool,
        machine: Weak<Machine>,
        buffer_overflow_retry: Duration,
    ) -> Self {
        Self {
            device,
            parser: AsyncMutex::new(parser),
            task,
            input_path,
            skip_start_end,
            machine,
            buffer_overflow_retry,
            paused: AtomicBool::new(false),
            pause_notify: Notify::new(),
        }
    }

    async fn scaffold(&self) -> Scaffold {
        // Extruder selection, temperatures, and material are placeholders
        // until a caller-supplied print-options type is threaded through;
        // `get_gcode_scaffold`'s contract only depends on the profile.
        let parser = self.parser.lock().await;
        parser.profile().get_gcode_scaffold(&[0], 0.0, 0.0, "PLA")
    }

    async fn run_inner(&self) -> Result<(), DriverError> {
        self.task.start();
        install_cancel_hook(&self.task, self.device.clone());

        let scaffold = self.scaffold().await;
        {
            let mut parser = self.parser.lock().await;
            for (key, value) in scaffold.variables.clone() {
                parser.environment().insert(key, value);
            }
        }

        self.device.reset().await?;
        self.device.display_message("clear build plate").await?;
        loop {
            let Some(machine) = self.machine.upgrade() else {
                break;
            };
            if !machine.telemetry().motherboard_status.wait_for_button {
                break;
            }
            machine.wait_for_notification().await;
        }

        if !self.skip_start_end {
            execute_lines(
                &self.parser,
                &self.task,
                &self.paused,
                &self.pause_notify,
                self.buffer_overflow_retry,
                scaffold.start_lines.clone().into_iter(),
            )
            .await?;
        }

        if self.task.is_running() {
            let contents = tokio::fs::read_to_string(&self.input_path)
                .await
                .map_err(|err| DriverError::Io(err.to_string()))?;
            execute_lines(
                &self.parser,
                &self.task,
                &self.paused,
                &self.pause_notify,
                self.buffer_overflow_retry,
                contents.lines().map(str::to_string),
            )
            .await?;
        }

        if !self.skip_start_end {
            execute_lines(
                &self.parser,
                &self.task,
                &self.paused,
                &self.pause_notify,
                self.buffer_overflow_retry,
                scaffold.end_lines.clone().into_iter(),
            )
            .await?;
        }

        if self.task.is_running() {
            self.task.heartbeat(json!(100));
            self.task.end(json!({"status": "ok"}));
        }

        Ok(())
    }
}

#[async_trait]
impl Operation for MakeOperation {
    async fn run(self: Arc<Self>) {
        if let Err(err) = self.run_inner().await {
            if let Some(machine) = self.machine.upgrade() {
                machine.handle_driver_error(&err).await;
            }
            match err {
                DriverError::BuildCancelled | DriverError::ExternalStop => {}
                _ => {
                    if self.task.is_running() {
                        self.task.fail(json!({"message": err.to_string()}));
                    }
                }
            }
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let device = self.device.clone();
        tokio::spawn(async move {
            if let Err(err) = device.pause().await {
                warn!("device pause command failed: {err}");
            }
        });
    }

    fn unpause(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.pause_notify.notify_waiters();
        let device = self.device.clone();
        tokio::spawn(async move {
            if let Err(err) = device.pause().await {
                warn!("device (un)pause command failed: {err}");
            }
        });
    }

    fn cancel(&self) {
        self.task.cancel();
    }
}


/// Prints a G-code file synchronously in the caller's own task, streaming
/// through a file-writer rather than a physical device. Skips the button
/// wait and temperature observation `MakeOperation` needs for a real device.
pub struct PrintToFileOperation {
    parser: AsyncMutex<Box<dyn GcodeParser>>,
    task: Arc<Task>,
    input_path: PathBuf,
    skip_start_end: bool,
    buffer_overflow_retry: Duration,
    paused: AtomicBool,
    pause_notify: Notify,
}

impl PrintToFileOperation {
    pub fn new(
        parser: Box<dyn GcodeParser>,
        task: Arc<Task>,
        input_path: PathBuf,
        skip_start_end: bool,
        buffer_overflow_retry: Duration,
    ) -> Self {
        Self {
            parser: AsyncMutex::new(parser),
            task,
            input_path,
            skip_start_end,
            buffer_overflow_retry,
            paused: AtomicBool::new(false),
            pause_notify: Notify::new(),
        }
    }

    async fn run_inner(&self) -> Result<(), DriverError> {
        self.task.start();

        let scaffold = {
            let parser = self.parser.lock().await;
            parser.profile().get_gcode_scaffold(&[0], 0.0, 0.0, "PLA")
        };
        {
            let mut parser = self.parser.lock().await;
            for (key, value) in scaffold.variables.clone() {
                parser.environment().insert(key, value);
            }
        }

        if !self.skip_start_end {
            execute_lines(
                &self.parser,
                &self.task,
                &self.paused,
                &self.pause_notify,
                self.buffer_overflow_retry,
                scaffold.start_lines.clone().into_iter(),
            )
            .await?;
        }

        if self.task.is_running() {
            let contents = tokio::fs::read_to_string(&self.input_path)
                .await
                .map_err(|err| DriverError::Io(err.to_string()))?;
            execute_lines(
                &self.parser,
                &self.task,
                &self.paused,
                &self.pause_notify,
                self.buffer_overflow_retry,
                contents.lines().map(str::to_string),
            )
            .await?;
        }

        if !self.skip_start_end {
            execute_lines(
                &self.parser,
                &self.task,
                &self.paused,
                &self.pause_notify,
                self.buffer_overflow_retry,
                scaffold.end_lines.clone().into_iter(),
            )
            .await?;
        }

        if self.task.is_running() {
            self.task.heartbeat(json!(100));
            self.task.end(json!({"status": "ok"}));
        }

        Ok(())
    }
}

#[async_trait]
impl Operation for PrintToFileOperation {
    async fn run(self: Arc<Self>) {
        if let Err(err) = self.run_inner().await {
            if self.task.is_running() {
                self.task.fail(json!({"message": err.to_string()}));
            }
        }
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn unpause(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.pause_notify.notify_waiters();
    }

    fn cancel(&self) {
        self.task.cancel();
    }
}
