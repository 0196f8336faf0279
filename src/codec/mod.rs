//! Bit-exact encode/decode helpers shared by the CoAP, MQTT-SN, and
//! diagnostic TLV wire formats (spec §4.1).

pub mod crc;
pub mod frame;
pub mod tlv;

pub use crc::{Crc, Width as CrcWidth};
pub use frame::{Appender, FrameBuilder, FrameData};
pub use tlv::{append_tlv, TlvRef};
