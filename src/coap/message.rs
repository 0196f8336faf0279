//! [`CoapMessage`]: header + token + options + payload, the unit this
//! toolkit sends and receives (RFC 7252 §3).

use crate::coap::header::{Code, Header, Type, MAX_TOKEN_LEN};
use crate::coap::option::{self, CoapOption, PAYLOAD_MARKER};
use crate::codec::Appender;
use crate::error::{Error, Kind, When};
use crate::message::Message;

/// A fully decoded/to-be-encoded CoAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapMessage {
  /// Message type.
  pub ty: Type,
  /// Request/response code.
  pub code: Code,
  /// Message id.
  pub message_id: u16,
  /// Token (0-8 bytes).
  pub token: Vec<u8>,
  /// Options, in any push order -- [`CoapMessage::to_bytes`] sorts a
  /// working copy by ascending option number before encoding, since the
  /// wire format's delta encoding requires it.
  pub options: Vec<CoapOption>,
  /// Payload bytes (may be empty).
  pub payload: Vec<u8>,
}

impl CoapMessage {
  /// Construct an empty ACK or RST (code `0.00`, no token, no payload).
  pub fn empty(ty: Type, message_id: u16) -> CoapMessage {
    CoapMessage { ty, code: Code::EMPTY, message_id, token: Vec::new(), options: Vec::new(), payload: Vec::new() }
  }

  /// Is this an "empty message": code `0.00` and no payload (spec §4.2)?
  pub fn is_empty_message(&self) -> bool {
    self.code.is_empty() && self.payload.is_empty()
  }

  /// Find the Uri-Path option segments, in order, decoded as UTF-8.
  pub fn uri_path_segments(&self) -> Vec<String> {
    self.options
        .iter()
        .filter(|o| o.number == option::URI_PATH)
        .map(|o| o.as_str().into_owned())
        .collect()
  }

  /// Encode this message to a fresh byte buffer.
  pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
    if self.token.len() > MAX_TOKEN_LEN {
      return Err(When::None.what(Kind::InvalidArgument("token longer than 8 bytes")));
    }

    let mut msg = Message::new();
    let mut appender = Appender::for_message(&mut msg);

    let header = Header { ty: self.ty, code: self.code, message_id: self.message_id, token_len: self.token.len() as u8 };
    header.encode(&mut appender)?;
    appender.append_bytes(&self.token)?;

    let mut sorted = self.options.clone();
    sorted.sort_by_key(|o| o.number);
    option::encode_options(&sorted, &mut appender)?;

    if !self.payload.is_empty() {
      appender.append_u8(PAYLOAD_MARKER)?;
      appender.append_bytes(&self.payload)?;
    }

    Ok(msg.as_bytes().to_vec())
  }

  /// Decode a message from `bytes`.
  pub fn from_bytes(bytes: &[u8]) -> Result<CoapMessage, Error> {
    let mut data = crate::codec::FrameData::new(bytes);
    let header = Header::decode(&mut data)?;
    let token = data.read_bytes(header.token_len as usize)?.to_vec();
    let options = option::decode_options(&mut data)?;
    let payload = data.read_rest().to_vec();

    Ok(CoapMessage { ty: header.ty, code: header.code, message_id: header.message_id, token, options, payload })
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn request_with_options_and_payload_round_trips() {
    let msg = CoapMessage { ty: Type::Con,
                            code: Code::POST,
                            message_id: 0x1234,
                            token: vec![0xCA, 0xFE],
                            options: vec![CoapOption::uri_path("diag"),
                                          CoapOption::uri_path("get"),
                                          CoapOption::content_format(40)],
                            payload: vec![1, 2, 3] };

    let bytes = msg.to_bytes().unwrap();
    let decoded = CoapMessage::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, msg);
  }

  #[test]
  fn empty_ack_round_trips_with_no_payload() {
    let msg = CoapMessage::empty(Type::Ack, 7);
    let bytes = msg.to_bytes().unwrap();
    let decoded = CoapMessage::from_bytes(&bytes).unwrap();
    assert!(decoded.is_empty_message());
    assert_eq!(decoded.message_id, 7);
  }

  #[test]
  fn uri_path_segments_extracted_in_order() {
    let msg = CoapMessage { ty: Type::Con,
                            code: Code::GET,
                            message_id: 1,
                            token: vec![],
                            options: vec![CoapOption::uri_path("a"), CoapOption::uri_path("b")],
                            payload: vec![] };
    assert_eq!(msg.uri_path_segments(), vec!["a".to_string(), "b".to_string()]);
  }

  #[test]
  fn token_too_long_is_rejected() {
    let msg = CoapMessage { ty: Type::Con,
                            code: Code::GET,
                            message_id: 1,
                            token: vec![0; 9],
                            options: vec![],
                            payload: vec![] };
    assert!(msg.to_bytes().is_err());
  }
}
