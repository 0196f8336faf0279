//! Delta-encoded CoAP options (RFC 7252 §3.1).
//!
//! Only the four option numbers this toolkit actually needs are named
//! (spec §4.3): Uri-Path, Content-Format, Uri-Query, Accept. Any other
//! option number round-trips fine through [`CoapOption`] but has no typed
//! accessor.

use crate::codec::{Appender, FrameData};
use crate::error::{Error, Kind, When};

/// `Uri-Path` (repeatable).
pub const URI_PATH: u16 = 11;
/// `Content-Format` (uint).
pub const CONTENT_FORMAT: u16 = 12;
/// `Uri-Query` (repeatable).
pub const URI_QUERY: u16 = 15;
/// `Accept` (uint).
pub const ACCEPT: u16 = 17;

/// The payload marker separating options from the payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// One decoded CoAP option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
  /// The option number.
  pub number: u16,
  /// The raw option value.
  pub value: Vec<u8>,
}

impl CoapOption {
  /// Build a `Uri-Path` option segment.
  pub fn uri_path(segment: impl Into<Vec<u8>>) -> CoapOption {
    CoapOption { number: URI_PATH, value: segment.into() }
  }

  /// Build a `Uri-Query` option (`key=value` or a bare flag).
  pub fn uri_query(segment: impl Into<Vec<u8>>) -> CoapOption {
    CoapOption { number: URI_QUERY, value: segment.into() }
  }

  /// Build a `Content-Format` option from a numeric format id.
  pub fn content_format(id: u16) -> CoapOption {
    CoapOption { number: CONTENT_FORMAT, value: encode_uint(id as u32) }
  }

  /// Build an `Accept` option from a numeric format id.
  pub fn accept(id: u16) -> CoapOption {
    CoapOption { number: ACCEPT, value: encode_uint(id as u32) }
  }

  /// Decode this option's value as a variable-length big-endian uint.
  pub fn as_uint(&self) -> u32 {
    self.value.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
  }

  /// Decode this option's value as UTF-8 (lossy), for Uri-Path/Uri-Query
  /// segments.
  pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(&self.value)
  }
}

fn encode_uint(v: u32) -> Vec<u8> {
  if v == 0 {
    return Vec::new();
  }
  let bytes = v.to_be_bytes();
  let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap();
  bytes[first_nonzero..].to_vec()
}

/// Encode a list of options (already sorted by ascending option number, as
/// the caller must provide -- delta encoding assumes it) into `out`.
pub fn encode_options(options: &[CoapOption], out: &mut Appender) -> Result<(), Error> {
  let mut prev_number = 0u16;

  for opt in options {
    if opt.number < prev_number {
      return Err(When::None.what(Kind::InvalidArgument("options must be sorted by ascending number")));
    }
    let delta = opt.number - prev_number;
    prev_number = opt.number;

    let length = opt.value.len() as u16;

    let delta_nibble = delta_or_length_nibble(delta);
    let length_nibble = delta_or_length_nibble(length);

    out.append_u8((delta_nibble << 4) | length_nibble)?;

    if delta >= 269 {
      out.append_bytes(&(delta - 269).to_be_bytes())?;
    } else if delta >= 13 {
      out.append_u8((delta - 13) as u8)?;
    }

    if length >= 269 {
      out.append_bytes(&(length - 269).to_be_bytes())?;
    } else if length >= 13 {
      out.append_u8((length - 13) as u8)?;
    }

    out.append_bytes(&opt.value)?;
  }

  Ok(())
}

fn delta_or_length_nibble(value: u16) -> u8 {
  if value < 13 {
    value as u8
  } else if value < 269 {
    13
  } else {
    14
  }
}

/// Decode the option sequence from `data`, stopping at the payload marker
/// or end of input. Consumes the payload marker byte if present.
pub fn decode_options(data: &mut FrameData) -> Result<Vec<CoapOption>, Error> {
  let mut options = Vec::new();
  let mut prev_number = 0u16;

  loop {
    match data.peek_u8() {
      | None => break,
      | Some(PAYLOAD_MARKER) => {
        let _ = data.read_u8();
        break;
      },
      | Some(_) => {},
    }

    let byte0 = data.read_u8()?;
    let delta_nibble = byte0 >> 4;
    let length_nibble = byte0 & 0b1111;

    if delta_nibble == 15 || length_nibble == 15 {
      return Err(When::Parsing.what(Kind::Parse("reserved option nibble 15")));
    }

    let delta = read_extended(data, delta_nibble)?;
    let length = read_extended(data, length_nibble)?;

    let number = prev_number + delta;
    prev_number = number;

    let value = data.read_bytes(length as usize)?.to_vec();
    options.push(CoapOption { number, value });
  }

  Ok(options)
}

fn read_extended(data: &mut FrameData, nibble: u8) -> Result<u16, Error> {
  match nibble {
    | 13 => Ok(data.read_u8()? as u16 + 13),
    | 14 => Ok(data.read_be_u16()? + 269),
    | n => Ok(n as u16),
  }
}
