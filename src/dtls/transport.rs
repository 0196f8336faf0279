//! [`DtlsTransport`]: the transmit queue and ciphertext plumbing that sits
//! between a [`DtlsSession`] and the real transport (spec §4.3).
//!
//! Per the design notes on cyclic references, this type does not hold a
//! back-pointer to `CoapAgent`; it only exposes a send-capability
//! ([`DtlsTransport::enqueue_plaintext`]) and an inbound-bytes entry point
//! ([`DtlsTransport::feed_ciphertext`]). The embedder wires
//! `CoapAgent::set_send_interceptor` to the former and forwards decrypted
//! bytes from the latter into `CoapAgent::recv`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::dtls::session::{DtlsSession, State};
use crate::error::{Error, Kind, When};
use crate::net::Transport;

/// Wraps a real [`Transport`] with DTLS encrypt/decrypt and a
/// Connected-gated transmit queue.
pub struct DtlsTransport<T: Transport> {
  session: DtlsSession,
  transport: T,
  queue: VecDeque<(SocketAddr, Vec<u8>)>,
  decoded: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl<T: Transport> DtlsTransport<T> {
  /// Wrap `transport` with `session`.
  pub fn new(transport: T, mut session: DtlsSession) -> Self {
    let decoded = Rc::new(RefCell::new(VecDeque::new()));
    let decoded_for_cb = decoded.clone();
    session.on_receive(Box::new(move |bytes| decoded_for_cb.borrow_mut().push_back(bytes.to_vec())));

    Self { session, transport, queue: VecDeque::new(), decoded }
  }

  /// Current handshake state.
  pub fn state(&self) -> State {
    self.session.state()
  }

  /// Start the handshake.
  pub fn connect(&mut self) -> Result<(), Error> {
    self.session.begin_connect()
  }

  /// Enqueue a plaintext message for `peer`. Only `session.peer()` is ever
  /// actually reachable (spec §3.4: "only one peer at a time"); enqueuing
  /// for any other address is rejected.
  pub fn enqueue_plaintext(&mut self, peer: SocketAddr, bytes: Vec<u8>) -> Result<(), Error> {
    if peer != self.session.peer() {
      return Err(When::DtlsHandshake.what(Kind::InvalidArgument("DtlsTransport serves a single peer")));
    }
    self.queue.push_back((peer, bytes));
    self.drain_if_connected()
  }

  /// Drain the transmit queue into the real transport, FIFO, if and only
  /// if the session is `Connected` (spec: "the transmit queue defers
  /// sending until Connected").
  pub fn drain_if_connected(&mut self) -> Result<(), Error> {
    if self.session.state() != State::Connected {
      return Ok(());
    }

    while let Some((peer, bytes)) = self.queue.pop_front() {
      self.session.send_plaintext(&bytes)?;
      let ciphertext = self.session.drain_outbound_ciphertext();
      nb::block!(self.transport.send(peer, &ciphertext)).map_err(|e| {
                                                            log::warn!("dtls: transport send to {peer} failed: {e:?}");
                                                            When::DtlsHandshake.what(Kind::NoBuffer)
                                                          })?;
    }

    Ok(())
  }

  /// Feed inbound ciphertext from the peer. Drives the handshake forward,
  /// or decrypts application data and returns it, in arrival order.
  pub fn feed_ciphertext(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
    let was_connecting = self.session.state() == State::Connecting;
    self.session.feed_ciphertext(bytes)?;

    // Flush any handshake response bytes the session produced.
    let handshake_out = self.session.drain_outbound_ciphertext();
    if !handshake_out.is_empty() {
      nb::block!(self.transport.send(self.session.peer(), &handshake_out)).map_err(|e| {
                                                                              log::warn!("dtls: handshake send failed: {e:?}");
                                                                              When::DtlsHandshake.what(Kind::NoBuffer)
                                                                            })?;
    }

    if was_connecting && self.session.state() == State::Connected {
      self.drain_if_connected()?;
    }

    Ok(self.decoded.borrow_mut().drain(..).collect())
  }

  /// Disconnect, aborting every queued plaintext message (spec §5,
  /// "Cancellation", form 2). Returns the aborted entries so the caller can
  /// invoke their response callbacks with `Outcome::Aborted`.
  pub fn disconnect(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
    self.session.disconnect();
    self.queue.drain(..).collect()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::dtls::session::CredentialMode;
  use crate::net::test::FakeTransport;

  fn peer() -> SocketAddr {
    "127.0.0.1:5684".parse().unwrap()
  }

  fn transport() -> DtlsTransport<FakeTransport> {
    let session = DtlsSession::new(peer(), CredentialMode::Psk { identity: vec![], key: vec![1] }, true);
    DtlsTransport::new(FakeTransport::new(), session)
  }

  #[test]
  fn enqueue_before_connected_does_not_transmit() {
    let mut t = transport();
    t.connect().unwrap();
    t.enqueue_plaintext(peer(), vec![1, 2, 3]).unwrap();
    assert_eq!(t.transport.sent.len(), 0);
  }

  #[test]
  fn enqueue_for_wrong_peer_is_rejected() {
    let mut t = transport();
    let other: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    assert!(t.enqueue_plaintext(other, vec![1]).is_err());
  }

  #[test]
  fn queue_drains_once_connected() {
    let mut t = transport();
    t.connect().unwrap();
    t.enqueue_plaintext(peer(), vec![9, 9]).unwrap();

    t.feed_ciphertext(&[0xAA]).unwrap(); // drives Connecting -> Connected, flushes queue

    assert_eq!(t.state(), State::Connected);
    assert_eq!(t.transport.sent.len(), 1);
  }

  #[test]
  fn disconnect_returns_aborted_queue_entries() {
    let mut t = transport();
    t.connect().unwrap();
    t.enqueue_plaintext(peer(), vec![1]).unwrap();

    // Still Connecting, so the entry is sitting in the queue.
    let aborted = t.disconnect();
    assert_eq!(aborted, vec![(peer(), vec![1])]);
    assert_eq!(t.state(), State::Closed);
  }
}
