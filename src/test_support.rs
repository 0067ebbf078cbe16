//! In-memory fakes for the two collaborator interfaces (`DeviceHandle`,
//! `GcodeParser`), shared by unit tests across the `machine` module.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::device::{BuildStats, DeviceHandle, MotherboardStatus, ToolStatus};
use crate::driver::profile::Profile;
use crate::error::DriverError;
use crate::gcode::{Environment, GcodeParser};

/// Initializes a `tracing` subscriber that writes to the test harness's
/// captured output, so `cargo test -- --nocapture` shows log lines from the
/// machine/poll/work tasks under test. Safe to call from multiple tests;
/// only the first call installs the subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

/// A device handle whose telemetry and failure behavior a test can script
/// up front. `wait_for_button` reports `false` by default so tests don't
/// have to wait one out unless they opt in.
pub struct FakeDeviceHandle {
    pub motherboard_status: Mutex<MotherboardStatus>,
    pub finished: AtomicBool,
    pub closed: AtomicBool,
    pub external_stop: AtomicBool,
    pub reset_calls: AtomicUsize,
    pub fail_next_reset: Mutex<Option<DriverError>>,
}

impl Default for FakeDeviceHandle {
    fn default() -> Self {
        Self {
            motherboard_status: Mutex::new(MotherboardStatus::default()),
            finished: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            external_stop: AtomicBool::new(false),
            reset_calls: AtomicUsize::new(0),
            fail_next_reset: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DeviceHandle for FakeDeviceHandle {
    async fn get_version(&self) -> Result<String, DriverError> {
        Ok("fake-1.0".into())
    }

    async fn get_toolhead_count(&self) -> Result<usize, DriverError> {
        Ok(1)
    }

    async fn get_motherboard_status(&self) -> Result<MotherboardStatus, DriverError> {
        Ok(*self.motherboard_status.lock().unwrap())
    }

    async fn get_build_stats(&self) -> Result<BuildStats, DriverError> {
        Ok(BuildStats {
            is_finished: self.finished.load(Ordering::SeqCst),
        })
    }

    async fn get_platform_temperature(&self, _index: usize) -> Result<f64, DriverError> {
        Ok(20.0)
    }

    async fn is_platform_ready(&self, _index: usize) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn get_tool_status(&self, index: usize) -> Result<ToolStatus, DriverError> {
        if index == 0 {
            Ok(ToolStatus {
                temperature: 20.0,
                ready: true,
            })
        } else {
            Err(DriverError::CommandNotSupported)
        }
    }

    async fn get_toolhead_temperature(&self, _index: usize) -> Result<f64, DriverError> {
        Ok(20.0)
    }

    async fn is_tool_ready(&self, _index: usize) -> Result<bool, DriverError> {
        Ok(true)
    }

    async fn is_finished(&self) -> Result<bool, DriverError> {
        Ok(self.finished.load(Ordering::SeqCst))
    }

    async fn reset(&self) -> Result<(), DriverError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_next_reset.lock().unwrap().take() {
            return Err(err);
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn display_message(&self, _message: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn wait_for_button(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn abort_immediately(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn set_external_stop(&self, stop: bool) -> Result<(), DriverError> {
        self.external_stop.store(stop, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A G-code parser that just counts executed lines against a fixed total to
/// derive `percentage`, recording everything it was asked to execute.
pub struct FakeGcodeParser {
    profile: Profile,
    environment: Environment,
    executed: Vec<String>,
    expected_total_lines: usize,
    fail_on_line_containing: Option<String>,
}

impl FakeGcodeParser {
    pub fn new(profile: Profile, expected_total_lines: usize) -> Self {
        Self {
            profile,
            environment: Environment::new(),
            executed: Vec::new(),
            expected_total_lines: expected_total_lines.max(1),
            fail_on_line_containing: None,
        }
    }

    pub fn fail_on_line_containing(mut self, needle: impl Into<String>) -> Self {
        self.fail_on_line_containing = Some(needle.into());
        self
    }

    pub fn executed_lines(&self) -> &[String] {
        &self.executed
    }
}

#[async_trait]
impl GcodeParser for FakeGcodeParser {
    fn profile(&self) -> &Profile {
        &self.profile
    }

    fn set_build_name(&mut self, _name: &str) {}

    fn percentage(&self) -> f64 {
        (self.executed.len() as f64 / self.expected_total_lines as f64) * 100.0
    }

    fn environment(&mut self) -> &mut Environment {
        &mut self.environment
    }

    async fn execute_line(&mut self, line: &str) -> Result<(), DriverError> {
        if let Some(needle) = &self.fail_on_line_containing {
            if line.contains(needle.as_str()) {
                return Err(DriverError::Protocol(format!("rejected line: {line}")));
            }
        }
        self.executed.push(line.to_string());
        Ok(())
    }
}
