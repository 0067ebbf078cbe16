//! The G-code parser collaborator interface. Out of scope for this crate;
//! `Operation` only ever sees this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::driver::profile::Profile;
use crate::error::DriverError;

/// Mutable substitution environment the parser reads while executing lines
/// (seeded from a [`Profile`]'s G-code scaffold).
pub type Environment = HashMap<String, Value>;

/// A G-code execution engine bound to one device handle for the duration of
/// an [`crate::machine::operation::Operation`].
#[async_trait]
pub trait GcodeParser: Send + Sync {
    fn profile(&self) -> &Profile;
    fn set_build_name(&mut self, name: &str);
    /// Fraction of the current file executed so far, in `[0.0, 100.0]`.
    fn percentage(&self) -> f64;
    fn environment(&mut self) -> &mut Environment;
    async fn execute_line(&mut self, line: &str) -> Result<(), DriverError>;
}
