//! The 4-byte CoAP base header, token, and code (RFC 7252 §3).

use crate::codec::{Appender, FrameData};
use crate::error::{Error, Kind, When};

/// CoAP protocol version this crate speaks. RFC 7252 fixes this at 1;
/// messages with any other version are silently dropped.
pub const VERSION: u8 = 1;

/// Maximum token length in bytes (RFC 7252 §3).
pub const MAX_TOKEN_LEN: usize = 8;

/// The CoAP message type (RFC 7252 §3, 2 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
  /// Confirmable: triggers ACK/retransmit behavior.
  Con,
  /// Non-confirmable: fire and forget.
  NonCon,
  /// Acknowledgement.
  Ack,
  /// Reset.
  Rst,
}

impl Type {
  fn to_bits(self) -> u8 {
    match self {
      | Type::Con => 0,
      | Type::NonCon => 1,
      | Type::Ack => 2,
      | Type::Rst => 3,
    }
  }

  fn from_bits(bits: u8) -> Type {
    match bits & 0b11 {
      | 0 => Type::Con,
      | 1 => Type::NonCon,
      | 2 => Type::Ack,
      | _ => Type::Rst,
    }
  }
}

/// A CoAP response/request code, `class.detail` (RFC 7252 §3), packed as
/// `(class << 5) | detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u8);

#[allow(missing_docs)]
impl Code {
  pub const EMPTY: Code = Code::new(0, 0);
  pub const GET: Code = Code::new(0, 1);
  pub const POST: Code = Code::new(0, 2);
  pub const PUT: Code = Code::new(0, 3);
  pub const DELETE: Code = Code::new(0, 4);

  pub const CREATED_2_01: Code = Code::new(2, 1);
  pub const DELETED_2_02: Code = Code::new(2, 2);
  pub const VALID_2_03: Code = Code::new(2, 3);
  pub const CHANGED_2_04: Code = Code::new(2, 4);
  pub const CONTENT_2_05: Code = Code::new(2, 5);

  pub const BAD_REQUEST_4_00: Code = Code::new(4, 0);
  pub const NOT_FOUND_4_04: Code = Code::new(4, 4);

  pub const INTERNAL_SERVER_ERROR_5_00: Code = Code::new(5, 0);

  /// Construct from class and detail.
  pub const fn new(class: u8, detail: u8) -> Code {
    Code((class << 5) | (detail & 0b1_1111))
  }

  /// The response/request class (0-7).
  pub fn class(self) -> u8 {
    self.0 >> 5
  }

  /// The response/request detail (0-31).
  pub fn detail(self) -> u8 {
    self.0 & 0b1_1111
  }

  /// Is this the empty code `0.00`, used for empty ACKs and RSTs?
  pub fn is_empty(self) -> bool {
    self.0 == 0
  }

  /// Is this a request code (0.01-0.31)?
  pub fn is_request(self) -> bool {
    self.class() == 0 && self.detail() != 0
  }

  /// Is this a success response (2.xx)?
  pub fn is_success(self) -> bool {
    self.class() == 2
  }
}

impl std::fmt::Display for Code {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{:02}", self.class(), self.detail())
  }
}

/// A decoded base header, token stripped out separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
  /// Message type.
  pub ty: Type,
  /// Request/response code.
  pub code: Code,
  /// Message id, used for deduplication and ACK/RST correlation.
  pub message_id: u16,
  /// Token length in bytes (0-8); the token itself follows the header.
  pub token_len: u8,
}

impl Header {
  /// Write the 4-byte base header.
  pub fn encode(&self, out: &mut Appender) -> Result<(), Error> {
    let byte0 = (VERSION << 6) | (self.ty.to_bits() << 4) | (self.token_len & 0b1111);
    out.append_u8(byte0)?;
    out.append_u8(self.code.0)?;
    out.append_bytes(&self.message_id.to_be_bytes())?;
    Ok(())
  }

  /// Parse the 4-byte base header from `data`. Does not consume the token.
  pub fn decode(data: &mut FrameData) -> Result<Header, Error> {
    let byte0 = data.read_u8()?;
    let version = byte0 >> 6;
    if version != VERSION {
      return Err(When::Parsing.what(Kind::Parse("unsupported CoAP version")));
    }

    let ty = Type::from_bits(byte0 >> 4);
    let token_len = byte0 & 0b1111;
    if token_len as usize > MAX_TOKEN_LEN {
      return Err(When::Parsing.what(Kind::Parse("token length exceeds 8 bytes")));
    }

    let code = Code(data.read_u8()?);
    let message_id = data.read_be_u16()?;

    Ok(Header { ty, code, message_id, token_len })
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::message::Message;

  #[test]
  fn header_round_trips() {
    let header = Header { ty: Type::Con, code: Code::GET, message_id: 0x1234, token_len: 2 };

    let mut msg = Message::new();
    let mut appender = Appender::for_message(&mut msg);
    header.encode(&mut appender).unwrap();

    let mut data = FrameData::new(msg.as_bytes());
    let decoded = Header::decode(&mut data).unwrap();
    assert_eq!(decoded, header);
  }

  #[test]
  fn unsupported_version_is_parse_error() {
    let bytes = [0b0100_0000u8, 0, 0, 0]; // version = 1 in top 2 bits -> actually 01 shifted
    let mut data = FrameData::new(&bytes);
    // byte0 = 0b01000000 -> version = 0b01 = 1 (valid); construct an invalid one instead.
    let invalid = [0b1000_0000u8, 0, 0, 0]; // version = 0b10 = 2
    let mut invalid_data = FrameData::new(&invalid);
    assert!(Header::decode(&mut invalid_data).is_err());
    let _ = data.read_u8();
  }

  #[test]
  fn code_class_and_detail_decompose() {
    assert_eq!(Code::CONTENT_2_05.class(), 2);
    assert_eq!(Code::CONTENT_2_05.detail(), 5);
    assert_eq!(Code::CONTENT_2_05.to_string(), "2.05");
  }
}
