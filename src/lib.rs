#![forbid(unsafe_code)]
//! Core of a printing-dispatch daemon: a framing-aware JSON-RPC 2.0 endpoint
//! that mediates between client applications and per-device actors driving
//! physical fabrication hardware.
//!
//! Two subsystems carry the real engineering, and the rest of the crate
//! exists to connect them:
//!
//! - [`rpc`] — a bidirectional JSON-RPC endpoint ([`rpc::Endpoint`]) built on
//!   a chunk-agnostic [`framer::JsonFramer`]. It dispatches inbound requests
//!   to registered handlers and correlates outbound requests to their
//!   eventual responses.
//! - [`machine`] — [`machine::Machine`] is the per-device actor: a poll task
//!   samples telemetry on an interval, a work task runs one
//!   [`machine::operation::Operation`] at a time, and both cooperate over a
//!   shared condition (`tokio::sync::Notify`) rather than their own OS
//!   threads.
//!
//! [`task::Task`] and [`async_task::Async`] are the two state-machine
//! primitives everything else is built from: the endpoint uses `Task` to
//! track outbound requests and the machine uses it to track the
//! currently-running operation; `Async` is the richer primitive for
//! composing sequences of foreign asynchronous work (`async_sequence`).
//!
//! [`driver`] enumerates device profiles and binds discovered ports to
//! machines; [`device`] and [`gcode`] are the narrow collaborator interfaces
//! this crate consumes but does not implement (the actual serial driver and
//! G-code engine are out of scope).

pub mod async_task;
pub mod device;
pub mod driver;
pub mod error;
pub mod event;
pub mod framer;
pub mod gcode;
pub mod machine;
pub mod rpc;
pub mod task;

#[cfg(test)]
mod test_support;

pub use async_task::{async_sequence, Async, AsyncState};
pub use error::{DriverError, HandlerError, MachineError, ProtocolError, RegistryError, RpcCallError};
pub use event::{Event, ListenerId};
pub use framer::JsonFramer;
pub use machine::{Machine, MachineConfig, MachineState};
pub use rpc::{Endpoint, EndpointConfig, Params};
pub use task::{Task, TaskState};
