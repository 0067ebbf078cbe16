//! The device driver collaborator interface. Concrete drivers (talking to a
//! real serial link) are out of scope for this crate; `Machine` only ever
//! sees this trait.

use async_trait::async_trait;

use crate::error::DriverError;

/// Snapshot of one poll of the device's motherboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotherboardStatus {
    pub manual_mode: bool,
    pub onboard_script: bool,
    pub onboard_process: bool,
    pub build_cancelling: bool,
    pub wait_for_button: bool,
}

impl MotherboardStatus {
    /// The device is doing something the poll loop must not interrupt with
    /// an IDLE transition.
    pub fn is_busy(&self) -> bool {
        self.manual_mode || self.onboard_script || self.onboard_process || self.build_cancelling
    }
}

/// Snapshot of the current build, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildStats {
    pub is_finished: bool,
}

/// Per-tool telemetry read during a poll.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ToolStatus {
    pub temperature: f64,
    pub ready: bool,
}

/// A single device's handle, created on `Machine::connect` and closed on
/// `Machine::disconnect`. Every fallible operation returns [`DriverError`];
/// the machine classifies it into recoverable-transient or fatal.
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    async fn get_version(&self) -> Result<String, DriverError>;
    async fn get_toolhead_count(&self) -> Result<usize, DriverError>;
    async fn get_motherboard_status(&self) -> Result<MotherboardStatus, DriverError>;
    async fn get_build_stats(&self) -> Result<BuildStats, DriverError>;
    async fn get_platform_temperature(&self, index: usize) -> Result<f64, DriverError>;
    async fn is_platform_ready(&self, index: usize) -> Result<bool, DriverError>;
    async fn get_tool_status(&self, index: usize) -> Result<ToolStatus, DriverError>;
    async fn get_toolhead_temperature(&self, index: usize) -> Result<f64, DriverError>;
    async fn is_tool_ready(&self, index: usize) -> Result<bool, DriverError>;
    async fn is_finished(&self) -> Result<bool, DriverError>;
    async fn reset(&self) -> Result<(), DriverError>;
    /// Toggles device-side pause state; callers must keep this synchronized
    /// with their own local `paused` flag (see `Operation::pause`).
    async fn pause(&self) -> Result<(), DriverError>;
    async fn display_message(&self, message: &str) -> Result<(), DriverError>;
    async fn wait_for_button(&self) -> Result<(), DriverError>;
    async fn abort_immediately(&self) -> Result<(), DriverError>;
    async fn set_external_stop(&self, stop: bool) -> Result<(), DriverError>;
    async fn close(&self) -> Result<(), DriverError>;
}
