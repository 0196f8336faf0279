//! MQTT-SN 1.2 client (spec §3.5, §4.4): PDU codec, session state, and the
//! retransmission-tracked broker-facing client built on it.

pub mod client;
pub mod pdu;
pub mod session;

pub use client::{MqttSnClient, MqttSnOutcome};
pub use pdu::{MessageType, Pdu, Qos, ReturnCode, TopicIdType, TopicRef};
pub use session::{Gateway, GatewayTable, MqttSnSession, RegistrationCache, State as MqttSnState};
