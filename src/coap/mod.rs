//! The CoAP(S) messaging engine (spec §3.3, §4.3): RFC 7252 wire codec,
//! resource routing, and the request/response agent built on
//! [`crate::messaging_core`].

pub mod agent;
pub mod header;
pub mod message;
pub mod option;
pub mod resource;

pub use agent::{CoapAgent, SendInterceptor};
pub use header::{Code, Header, Type};
pub use message::CoapMessage;
pub use option::CoapOption;
pub use resource::{CoapResource, ResourceHandler, ResourceResponse};
