//! Bidirectional JSON-RPC 2.0 transport and dispatch engine (see the crate's
//! module docs for how this fits into the printing-dispatch daemon).

mod endpoint;
pub mod message;

pub use endpoint::{Endpoint, EndpointConfig, Handler, Params};
