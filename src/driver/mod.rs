pub mod port;
pub mod profile;

use std::path::Path;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::gcode::GcodeParser;
use crate::machine::operation::{Operation, PrintToFileOperation};
use crate::machine::{Machine, MachineConfig};
use crate::task::Task;

use port::Port;
use profile::Profile;

/// Enumerates device profiles and maps discovered ports to machines. The
/// registry itself holds no device state; it only knows how to look
/// profiles up and how to construct the actor objects that do.
pub struct DriverRegistry {
    profiles: Vec<Arc<Profile>>,
}

impl DriverRegistry {
    pub fn new(profiles: Vec<Arc<Profile>>) -> Self {
        Self { profiles }
    }

    /// All profiles, or only those whose matcher accepts `port`.
    pub fn get_profiles(&self, port: Option<&Port>) -> Vec<Arc<Profile>> {
        match port {
            None => self.profiles.clone(),
            Some(port) => self
                .profiles
                .iter()
                .filter(|profile| profile.matches(port.vid, port.pid))
                .cloned()
                .collect(),
        }
    }

    pub fn get_profile(&self, name: &str) -> Result<Arc<Profile>, RegistryError> {
        self.profiles
            .iter()
            .find(|profile| profile.name == name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProfile(name.to_string()))
    }

    /// Binds `port` to a newly constructed [`Machine`], or returns the
    /// machine already bound to it. If the port is already bound and the
    /// caller specified an incompatible profile, fails with
    /// [`RegistryError::ProfileMismatch`].
    pub fn new_machine_from_port(
        &self,
        port: &Arc<Port>,
        profile: Option<Arc<Profile>>,
        config: MachineConfig,
    ) -> Result<Arc<Machine>, RegistryError> {
        if let Some(existing) = port.bound_machine() {
            if let Some(profile) = &profile {
                if profile.as_ref() != existing.profile.as_ref() {
                    return Err(RegistryError::ProfileMismatch);
                }
            }
            return Ok(existing);
        }

        let profile = match profile {
            Some(profile) => profile,
            None => self
                .get_profiles(Some(port))
                .into_iter()
                .next()
                .ok_or_else(|| RegistryError::UnknownProfile(format!("{}:{}", port.vid, port.pid)))?,
        };

        let machine = Machine::new(profile, config);
        port.bind(&machine);
        Ok(machine)
    }

    /// Streams G-code through a file-writer rather than a device, running
    /// synchronously (from the caller's perspective — no machine work task
    /// is involved) to completion before returning.
    pub async fn print_to_file(
        &self,
        parser: Box<dyn GcodeParser>,
        input_path: &Path,
        task: Arc<Task>,
        skip_start_end: bool,
        buffer_overflow_retry: std::time::Duration,
    ) {
        let operation = Arc::new(PrintToFileOperation::new(
            parser,
            task,
            input_path.to_path_buf(),
            skip_start_end,
            buffer_overflow_retry,
        ));
        operation.run().await;
    }
}
