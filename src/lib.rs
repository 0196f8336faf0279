//! thornmesh: a Thread-network application-layer toolkit.
//!
//! Three subsystems share one architectural idiom -- a pending-request
//! table keyed by message id, driven by a millisecond clock and an
//! exponential-backoff retry timer (spec §3.2, §4.2):
//!
//! - [`coap`]: a CoAP(S) messaging engine -- reliable request/response over
//!   UDP, with a DTLS session seam ([`dtls`]) layered underneath.
//! - [`mqttsn`]: an MQTT-SN 1.2 client, modeling a gateway's broker-facing
//!   state machine with per-packet retransmission.
//! - [`diag`]: a network-diagnostics / history-tracker query-answer engine,
//!   answering paginated, fragment-ordered queries over the CoAP engine.
//!
//! None of these subsystems open a socket or own a clock themselves; the
//! embedder supplies both through the [`net::Transport`], [`net::Entropy`],
//! and [`time::Clock`] traits (spec §6).

/// Bit-exact wire codecs shared across subsystems: frame cursor, CRC, TLV.
pub mod codec;

/// The CoAP(S) messaging engine: wire format, routing, request/response.
pub mod coap;

/// Per-subsystem runtime configuration.
pub mod config;

/// Datagram TLS session management, layered under the CoAP engine.
pub mod dtls;

/// Network diagnostics / history-tracker query-answer engine.
pub mod diag;

/// The crate-wide error taxonomy.
pub mod error;

/// The append-only message buffer every codec writes into and reads from.
pub mod message;

/// The pending-request table and retransmission timer shared by §3.2/§4.2.
pub mod messaging_core;

/// The MQTT-SN 1.2 client.
pub mod mqttsn;

/// Transport, entropy, and peer-addressing traits supplied by the embedder.
pub mod net;

/// Retry timers and backoff strategies.
pub mod retry;

/// Monotonic-millisecond clock abstractions.
pub mod time;

pub use error::{Error, Kind, When};
