//! Network diagnostics / history-tracker query-answer engine (spec §3.6,
//! §4.5): a paginated, fragment-ordered request/response exchange layered
//! on the CoAP messaging engine.

pub mod engine;
pub mod query;
pub mod tlv_types;

pub use engine::DiagEngine;
pub use query::{AnswerMessage, ClientQuery, DiagClientEvent, DiagQueryContext};
pub use tlv_types::{ResponderTable, TlvType};
