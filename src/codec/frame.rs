//! [`FrameBuilder`] (write cursor), [`FrameData`] (read cursor), and
//! [`Appender`] (backing-agnostic append wrapper).
//!
//! Grounded on OpenThread's `common/frame_builder.hpp`, `frame_data.hpp`,
//! and `appender.hpp`: a caller-owned buffer plus explicit cursor, rather
//! than a growable `Vec` -- this lets callers pre-size exactly one scratch
//! buffer per outbound datagram, matching the "process-wide buffer pool"
//! resource model in spec §5.

use crate::error::{Error, Kind, When};
use crate::message::Message;

/// A write cursor into a caller-owned, fixed-capacity buffer.
///
/// Once an append fails with [`Kind::NoBuffer`], the builder is considered
/// poisoned for further appends -- matching "a FrameBuilder is not
/// restartable once full" (spec §4.1). Callers should discard and retry
/// with a larger buffer.
#[derive(Debug)]
pub struct FrameBuilder<'b> {
  buf: &'b mut [u8],
  len: usize,
  max: usize,
}

impl<'b> FrameBuilder<'b> {
  /// Create a builder over `buf`, bounding appends to `buf`'s length.
  pub fn new(buf: &'b mut [u8]) -> Self {
    let max = buf.len();
    Self { buf, len: 0, max }
  }

  /// Bytes written so far.
  pub fn len(&self) -> usize {
    self.len
  }

  /// Is nothing written yet?
  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// The written bytes.
  pub fn as_bytes(&self) -> &[u8] {
    &self.buf[..self.len]
  }

  fn ensure_room(&self, additional: usize) -> Result<(), Error> {
    if self.len + additional > self.max {
      Err(When::None.what(Kind::NoBuffer))
    } else {
      Ok(())
    }
  }

  /// Append a single byte.
  pub fn append_u8(&mut self, b: u8) -> Result<(), Error> {
    self.ensure_room(1)?;
    self.buf[self.len] = b;
    self.len += 1;
    Ok(())
  }

  /// Append a big-endian `u16`.
  pub fn append_be_u16(&mut self, v: u16) -> Result<(), Error> {
    self.append_bytes(&v.to_be_bytes())
  }

  /// Append a big-endian `u32`.
  pub fn append_be_u32(&mut self, v: u32) -> Result<(), Error> {
    self.append_bytes(&v.to_be_bytes())
  }

  /// Append a little-endian `u16`.
  pub fn append_le_u16(&mut self, v: u16) -> Result<(), Error> {
    self.append_bytes(&v.to_le_bytes())
  }

  /// Append a little-endian `u32`.
  pub fn append_le_u32(&mut self, v: u32) -> Result<(), Error> {
    self.append_bytes(&v.to_le_bytes())
  }

  /// Append a raw byte slice.
  pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
    self.ensure_room(bytes.len())?;
    self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
    self.len += bytes.len();
    Ok(())
  }

  /// Append `len` bytes read out of `msg` starting at `msg_offset`.
  pub fn append_bytes_from_message(&mut self,
                                    msg: &Message,
                                    msg_offset: usize,
                                    len: usize)
                                    -> Result<(), Error> {
    let src = msg.as_bytes();
    if msg_offset + len > src.len() {
      return Err(When::None.what(Kind::Parse("message range out of bounds")));
    }
    self.append_bytes(&src[msg_offset..msg_offset + len])
  }

  /// Insert `bytes` at `offset`, shifting existing tail bytes forward.
  ///
  /// `offset` must be within `[0, len]`; fails with [`Kind::InvalidArgument`]
  /// otherwise, and with [`Kind::NoBuffer`] if there isn't room.
  pub fn insert_bytes(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
    if offset > self.len {
      return Err(When::None.what(Kind::InvalidArgument("insert offset beyond current length")));
    }
    self.ensure_room(bytes.len())?;

    self.buf.copy_within(offset..self.len, offset + bytes.len());
    self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    self.len += bytes.len();
    Ok(())
  }

  /// Remove `count` bytes starting at `offset`, shifting the tail backward.
  ///
  /// The caller guarantees `offset + count <= len` (spec §4.1); out-of-range
  /// removal is a programmer error here and panics rather than silently
  /// truncating, matching "caller guarantees bounds".
  pub fn remove_bytes(&mut self, offset: usize, count: usize) {
    assert!(offset + count <= self.len, "remove_bytes out of bounds");
    self.buf.copy_within(offset + count..self.len, offset);
    self.len -= count;
  }

  /// Overwrite `bytes` starting at `offset`, without changing `len`.
  pub fn overwrite(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
    if offset + bytes.len() > self.len {
      return Err(When::None.what(Kind::InvalidArgument("overwrite range beyond current length")));
    }
    self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    Ok(())
  }
}

/// A read cursor over a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct FrameData<'b> {
  buf: &'b [u8],
  pos: usize,
}

impl<'b> FrameData<'b> {
  /// Create a reader over `buf`, positioned at the start.
  pub fn new(buf: &'b [u8]) -> Self {
    Self { buf, pos: 0 }
  }

  /// Current read position.
  pub fn pos(&self) -> usize {
    self.pos
  }

  /// Bytes left to read.
  pub fn remaining(&self) -> usize {
    self.buf.len() - self.pos
  }

  fn ensure(&self, n: usize) -> Result<(), Error> {
    if self.remaining() < n {
      Err(When::Parsing.what(Kind::Parse("unexpected end of buffer")))
    } else {
      Ok(())
    }
  }

  /// Read and advance past a single byte.
  pub fn read_u8(&mut self) -> Result<u8, Error> {
    self.ensure(1)?;
    let b = self.buf[self.pos];
    self.pos += 1;
    Ok(b)
  }

  /// Read and advance past a big-endian `u16`.
  pub fn read_be_u16(&mut self) -> Result<u16, Error> {
    let bytes = self.read_bytes(2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
  }

  /// Read and advance past a big-endian `u32`.
  pub fn read_be_u32(&mut self) -> Result<u32, Error> {
    let bytes = self.read_bytes(4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
  }

  /// Read and advance past a little-endian `u16`.
  pub fn read_le_u16(&mut self) -> Result<u16, Error> {
    let bytes = self.read_bytes(2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
  }

  /// Read and advance past `n` raw bytes.
  pub fn read_bytes(&mut self, n: usize) -> Result<&'b [u8], Error> {
    self.ensure(n)?;
    let out = &self.buf[self.pos..self.pos + n];
    self.pos += n;
    Ok(out)
  }

  /// Peek at the next byte without advancing.
  pub fn peek_u8(&self) -> Option<u8> {
    self.buf.get(self.pos).copied()
  }

  /// Read the remaining bytes (e.g. a message payload), advancing to the
  /// end.
  pub fn read_rest(&mut self) -> &'b [u8] {
    let out = &self.buf[self.pos..];
    self.pos = self.buf.len();
    out
  }
}

/// A tagged-union wrapper letting callers build content identically into
/// either a [`Message`] or a raw buffer (spec §4.1's `Appender`).
pub enum Appender<'b> {
  /// Appends onto a [`Message`]'s tail.
  Message(&'b mut Message),
  /// Appends into a fixed-capacity buffer via a [`FrameBuilder`].
  Frame(FrameBuilder<'b>),
}

impl<'b> Appender<'b> {
  /// Build onto a message.
  pub fn for_message(msg: &'b mut Message) -> Self {
    Appender::Message(msg)
  }

  /// Build into a raw buffer.
  pub fn for_buffer(buf: &'b mut [u8]) -> Self {
    Appender::Frame(FrameBuilder::new(buf))
  }

  /// Append bytes through whichever backing was selected.
  pub fn append_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
    match self {
      | Appender::Message(m) => {
        m.append(bytes);
        Ok(())
      },
      | Appender::Frame(f) => f.append_bytes(bytes),
    }
  }

  /// Append a single byte through whichever backing was selected.
  pub fn append_u8(&mut self, b: u8) -> Result<(), Error> {
    self.append_bytes(&[b])
  }

  /// Number of bytes appended so far.
  pub fn len(&self) -> usize {
    match self {
      | Appender::Message(m) => m.len(),
      | Appender::Frame(f) => f.len(),
    }
  }

  /// Is nothing appended yet?
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn append_and_read_round_trip() {
    let mut buf = [0u8; 16];
    let mut fb = FrameBuilder::new(&mut buf);
    fb.append_u8(0xAB).unwrap();
    fb.append_be_u16(0x1234).unwrap();
    fb.append_bytes(b"hi").unwrap();

    let mut fd = FrameData::new(fb.as_bytes());
    assert_eq!(fd.read_u8().unwrap(), 0xAB);
    assert_eq!(fd.read_be_u16().unwrap(), 0x1234);
    assert_eq!(fd.read_bytes(2).unwrap(), b"hi");
  }

  #[test]
  fn append_fails_when_buffer_full() {
    let mut buf = [0u8; 2];
    let mut fb = FrameBuilder::new(&mut buf);
    fb.append_u8(1).unwrap();
    fb.append_u8(2).unwrap();
    assert_eq!(fb.append_u8(3).unwrap_err().what, Kind::NoBuffer);
  }

  #[test]
  fn insert_shifts_tail_forward() {
    let mut buf = [0u8; 8];
    let mut fb = FrameBuilder::new(&mut buf);
    fb.append_bytes(b"ac").unwrap();
    fb.insert_bytes(1, b"b").unwrap();
    assert_eq!(fb.as_bytes(), b"abc");
  }

  #[test]
  fn insert_out_of_range_offset_errors() {
    let mut buf = [0u8; 8];
    let mut fb = FrameBuilder::new(&mut buf);
    fb.append_bytes(b"ab").unwrap();
    assert!(fb.insert_bytes(5, b"x").is_err());
  }

  #[test]
  fn remove_shifts_tail_backward() {
    let mut buf = [0u8; 8];
    let mut fb = FrameBuilder::new(&mut buf);
    fb.append_bytes(b"abc").unwrap();
    fb.remove_bytes(1, 1);
    assert_eq!(fb.as_bytes(), b"ac");
  }

  #[test]
  fn overwrite_replaces_in_place() {
    let mut buf = [0u8; 8];
    let mut fb = FrameBuilder::new(&mut buf);
    fb.append_bytes(b"abc").unwrap();
    fb.overwrite(1, b"X").unwrap();
    assert_eq!(fb.as_bytes(), b"aXc");
  }

  #[test]
  fn read_past_end_is_parse_error() {
    let mut fd = FrameData::new(&[1u8]);
    fd.read_u8().unwrap();
    assert!(matches!(fd.read_u8().unwrap_err().what, Kind::Parse(_)));
  }

  #[test]
  fn appender_message_and_frame_agree() {
    let mut msg = Message::new();
    let mut a1 = Appender::for_message(&mut msg);
    a1.append_bytes(b"hey").unwrap();

    let mut buf = [0u8; 8];
    let mut a2 = Appender::for_buffer(&mut buf);
    a2.append_bytes(b"hey").unwrap();

    assert_eq!(msg.as_bytes(), b"hey");
    if let Appender::Frame(fb) = &a2 {
      assert_eq!(fb.as_bytes(), b"hey");
    }
  }
}
