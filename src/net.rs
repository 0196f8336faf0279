//! Transport, entropy, and peer-addressing abstractions (spec §6).
//!
//! These are the "external collaborators" the spec keeps out of scope:
//! actual UDP socket plumbing and actual entropy sources are supplied by the
//! embedder through these traits.

use std::fmt::Debug;
use std::net::SocketAddr;

/// A value tagged with the peer address it came from or is destined to.
///
/// Grounded on `toad::net::Addrd<T>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents.
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Mutably borrow the contents.
  pub fn data_mut(&mut self) -> &mut T {
    &mut self.0
  }

  /// The peer address.
  pub fn addr(&self) -> SocketAddr {
    self.1
  }

  /// Discard the address, keeping only the data.
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the contained data, keeping the address.
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }
}

/// The UDP-send primitive consumed by every subsystem (spec §6).
///
/// Implementors are synchronous: `send` either enqueues the datagram with
/// the OS or fails immediately. Inbound datagrams are not polled through
/// this trait; they are pushed into the owning subsystem via its `recv_*`
/// entry point, matching the spec's "receives inbound datagrams via a
/// callback" framing.
pub trait Transport {
  /// Error type yielded by a failed send.
  type Error: Debug;

  /// Send `bytes` to `addr`. Returns `Err(nb::Error::WouldBlock)` if the
  /// underlying socket cannot accept the write right now.
  fn send(&mut self, addr: SocketAddr, bytes: &[u8]) -> nb::Result<(), Self::Error>;

  /// This transport's local bound address, if meaningful.
  fn local_addr(&self) -> Option<SocketAddr> {
    None
  }
}

/// The entropy dependency (spec §6): fills a buffer with random bytes for
/// token generation, message-id seeding, and retransmission jitter.
pub trait Entropy {
  /// Fill `buf` with random bytes.
  fn fill(&mut self, buf: &mut [u8]);

  /// Convenience: a random `u16`.
  fn next_u16(&mut self) -> u16 {
    let mut buf = [0u8; 2];
    self.fill(&mut buf);
    u16::from_be_bytes(buf)
  }
}

/// An [`Entropy`] backed by [`rand`]'s thread-local RNG.
#[derive(Debug, Default)]
pub struct SystemEntropy;

impl Entropy for SystemEntropy {
  fn fill(&mut self, buf: &mut [u8]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(buf);
  }
}

#[cfg(test)]
pub(crate) mod test {
  use std::collections::VecDeque;

  use super::*;

  /// A [`Transport`] that records every send and lets tests assert on it.
  #[derive(Debug, Default)]
  pub struct FakeTransport {
    pub sent: VecDeque<Addrd<Vec<u8>>>,
  }

  impl FakeTransport {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn drain(&mut self) -> Vec<Addrd<Vec<u8>>> {
      self.sent.drain(..).collect()
    }
  }

  impl Transport for FakeTransport {
    type Error = std::convert::Infallible;

    fn send(&mut self, addr: SocketAddr, bytes: &[u8]) -> nb::Result<(), Self::Error> {
      self.sent.push_back(Addrd(bytes.to_vec(), addr));
      Ok(())
    }
  }

  /// A deterministic [`Entropy`] yielding a fixed byte sequence, cycling.
  #[derive(Debug)]
  pub struct FakeEntropy {
    bytes: Vec<u8>,
    pos: usize,
  }

  impl FakeEntropy {
    pub fn new(bytes: Vec<u8>) -> Self {
      Self { bytes, pos: 0 }
    }
  }

  impl Entropy for FakeEntropy {
    fn fill(&mut self, buf: &mut [u8]) {
      for b in buf.iter_mut() {
        *b = self.bytes[self.pos % self.bytes.len()];
        self.pos += 1;
      }
    }
  }
}
