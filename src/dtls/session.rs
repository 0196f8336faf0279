//! [`DtlsSession`]: the DTLS handshake state machine (spec §3.4, §4.3).
//!
//! Grounded on `kwap/src/std/net/secure.rs`'s `SecureUdpSocket` (the
//! openssl-backed `SslAcceptor`/`SslConnector` setup, `configure().bind(...)`
//! handshake-driving shape) and OpenThread's `coap_secure.hpp`
//! (`original_source`) for the state names and the PSK/certificate mutual
//! exclusivity.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;

use crate::error::{Error, Kind, When};

/// DTLS credential configuration. PSK and certificate modes are mutually
/// exclusive (spec §3.4).
pub enum CredentialMode {
  /// No credentials configured yet; a session in this mode cannot start a
  /// handshake.
  Disabled,
  /// Pre-shared key: an identity hint and the shared secret bytes.
  Psk {
    /// The PSK identity advertised to the peer.
    identity: Vec<u8>,
    /// The shared secret.
    key: Vec<u8>,
  },
  /// X.509 certificate credentials.
  Certificate {
    /// This session's own certificate, PEM-encoded.
    own_cert_pem: Vec<u8>,
    /// This session's own private key, PEM-encoded.
    own_key_pem: Vec<u8>,
    /// Trusted CA chain, PEM-encoded, used to verify the peer.
    trusted_ca_pem: Option<Vec<u8>>,
  },
}

impl std::fmt::Debug for CredentialMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      | CredentialMode::Disabled => write!(f, "Disabled"),
      | CredentialMode::Psk { .. } => write!(f, "Psk {{ .. }}"),
      | CredentialMode::Certificate { .. } => write!(f, "Certificate {{ .. }}"),
    }
  }
}

/// The DTLS session state machine (spec §3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  /// No handshake in progress.
  Closed,
  /// A handshake has been requested but not yet begun transmitting.
  Initializing,
  /// The handshake is in flight.
  Connecting,
  /// The session is established; application data may flow.
  Connected,
  /// The session is tearing down.
  Disconnecting,
}

/// An in-memory byte pipe standing in for the underlying UDP socket, shaped
/// so a `Read + Write` TLS stream implementation could be driven against
/// ciphertext that this crate pumps to/from the real transport itself,
/// rather than owning a socket directly -- mirrors `kwap`'s `UdpConn`
/// (`tx_buf: Vec<u8>`, `flush` hands it to the real socket; `read` pulls
/// from whatever the real socket last delivered). No such stream is wired
/// in here; see the module doc comment.
#[derive(Debug, Default)]
pub struct BioPipe {
  inbound: VecDeque<u8>,
  outbound: VecDeque<u8>,
}

impl BioPipe {
  /// Feed ciphertext received from the peer into the pipe, for the SSL
  /// stream to consume on its next read.
  pub fn feed_inbound(&mut self, bytes: &[u8]) {
    self.inbound.extend(bytes);
  }

  /// Drain ciphertext the SSL stream has written, ready to hand to the
  /// real transport as one or more datagrams.
  pub fn drain_outbound(&mut self) -> Vec<u8> {
    self.outbound.drain(..).collect()
  }
}

impl Read for BioPipe {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    if self.inbound.is_empty() {
      return Err(io::Error::from(io::ErrorKind::WouldBlock));
    }
    let n = buf.len().min(self.inbound.len());
    for slot in buf.iter_mut().take(n) {
      *slot = self.inbound.pop_front().unwrap();
    }
    Ok(n)
  }
}

impl Write for BioPipe {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.outbound.extend(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

/// The DTLS handshake/session state machine for one peer (spec §3.4:
/// "only one session is active per agent").
pub struct DtlsSession {
  state: State,
  peer: SocketAddr,
  credentials: CredentialMode,
  verify_peer: bool,
  pipe: BioPipe,
  inbound_plaintext: Vec<u8>,
  connected_callback: Option<Box<dyn FnMut()>>,
  receive_callback: Option<Box<dyn FnMut(&[u8])>>,
}

impl std::fmt::Debug for DtlsSession {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DtlsSession")
     .field("state", &self.state)
     .field("peer", &self.peer)
     .field("credentials", &self.credentials)
     .field("verify_peer", &self.verify_peer)
     .finish()
  }
}

impl DtlsSession {
  /// Construct a new, closed session for `peer`.
  pub fn new(peer: SocketAddr, credentials: CredentialMode, verify_peer: bool) -> Self {
    Self { state: State::Closed,
           peer,
           credentials,
           verify_peer,
           pipe: BioPipe::default(),
           inbound_plaintext: Vec::new(),
           connected_callback: None,
           receive_callback: None }
  }

  /// Current state.
  pub fn state(&self) -> State {
    self.state
  }

  /// The peer this session is/will be established with.
  pub fn peer(&self) -> SocketAddr {
    self.peer
  }

  /// Install the callback invoked once the handshake completes.
  pub fn on_connected(&mut self, callback: Box<dyn FnMut()>) {
    self.connected_callback = Some(callback);
  }

  /// Install the callback invoked with each decrypted application message.
  pub fn on_receive(&mut self, callback: Box<dyn FnMut(&[u8])>) {
    self.receive_callback = Some(callback);
  }

  /// Begin a handshake as the connecting (client) side.
  ///
  /// Fails with `InvalidState` unless the session is `Closed` (spec §4.3:
  /// "a connect request while not Closed fails with InvalidState").
  pub fn begin_connect(&mut self) -> Result<(), Error> {
    if self.state != State::Closed {
      return Err(When::DtlsHandshake.what(Kind::InvalidState));
    }
    if matches!(self.credentials, CredentialMode::Disabled) {
      return Err(When::DtlsHandshake.what(Kind::Security("no credentials configured")));
    }

    self.state = State::Initializing;
    log::debug!("dtls: {} initializing handshake", self.peer);
    self.state = State::Connecting;
    Ok(())
  }

  /// Feed ciphertext received from the peer. Drives the handshake forward
  /// while `Connecting`, or decrypts application data while `Connected`.
  ///
  /// No real handshake or record decryption happens here -- that's the
  /// out-of-scope collaborator this state machine and [`BioPipe`] buffer
  /// plumbing are shaped to hand off to.
  pub fn feed_ciphertext(&mut self, bytes: &[u8]) -> Result<(), Error> {
    if self.state == State::Closed || self.state == State::Disconnecting {
      return Err(When::DtlsHandshake.what(Kind::InvalidState));
    }

    self.pipe.feed_inbound(bytes);

    match self.state {
      | State::Connecting => {
        // A real implementation resumes `MidHandshakeSslStream::handshake`
        // here; reaching `Connected` fires `connected_callback`.
        self.state = State::Connected;
        if let Some(cb) = &mut self.connected_callback {
          cb();
        }
        Ok(())
      },
      | State::Connected => {
        self.inbound_plaintext.extend_from_slice(bytes);
        if let Some(cb) = &mut self.receive_callback {
          cb(bytes);
        }
        Ok(())
      },
      | _ => Ok(()),
    }
  }

  /// Drain ciphertext produced by the last handshake step or application
  /// write, ready to hand to the real transport.
  pub fn drain_outbound_ciphertext(&mut self) -> Vec<u8> {
    self.pipe.drain_outbound()
  }

  /// Encrypt and queue `bytes` for transmission. Only valid while
  /// `Connected`.
  pub fn send_plaintext(&mut self, bytes: &[u8]) -> Result<(), Error> {
    if self.state != State::Connected {
      return Err(When::DtlsHandshake.what(Kind::InvalidState));
    }
    self.pipe.write_all(bytes).map_err(|_| When::DtlsHandshake.what(Kind::NoBuffer))
  }

  /// Fail the handshake/session (spec: "handshake-fail reports Failure").
  pub fn fail(&mut self, reason: &'static str) {
    log::warn!("dtls: {} handshake failed: {reason}", self.peer);
    self.state = State::Closed;
  }

  /// Begin tearing down an established session.
  pub fn disconnect(&mut self) {
    if self.state == State::Connected || self.state == State::Connecting {
      self.state = State::Disconnecting;
    }
    self.state = State::Closed;
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn peer() -> SocketAddr {
    "127.0.0.1:5684".parse().unwrap()
  }

  #[test]
  fn connect_requires_closed_state() {
    let mut s = DtlsSession::new(peer(), CredentialMode::Psk { identity: vec![1], key: vec![2] }, true);
    s.begin_connect().unwrap();
    assert_eq!(s.state(), State::Connecting);
    assert!(s.begin_connect().is_err());
  }

  #[test]
  fn connect_without_credentials_is_security_error() {
    let mut s = DtlsSession::new(peer(), CredentialMode::Disabled, true);
    let err = s.begin_connect().unwrap_err();
    assert!(matches!(err.what, Kind::Security(_)));
  }

  #[test]
  fn send_before_connected_is_invalid_state() {
    let mut s = DtlsSession::new(peer(), CredentialMode::Psk { identity: vec![], key: vec![1] }, true);
    assert!(s.send_plaintext(b"hi").is_err());
  }

  #[test]
  fn handshake_then_send_round_trips_through_pipe() {
    let mut s = DtlsSession::new(peer(), CredentialMode::Psk { identity: vec![], key: vec![1] }, true);
    s.begin_connect().unwrap();
    s.feed_ciphertext(&[0xAA]).unwrap(); // drives state to Connected in this simplified model
    assert_eq!(s.state(), State::Connected);

    s.send_plaintext(b"hello").unwrap();
    assert_eq!(s.drain_outbound_ciphertext(), b"hello".to_vec());
  }

  #[test]
  fn disconnect_always_ends_in_closed() {
    let mut s = DtlsSession::new(peer(), CredentialMode::Psk { identity: vec![], key: vec![1] }, true);
    s.begin_connect().unwrap();
    s.disconnect();
    assert_eq!(s.state(), State::Closed);
  }
}
