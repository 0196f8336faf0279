//! The pending-request table and retransmission timer shared by the CoAP
//! messaging engine (spec §3.2, §4.2).
//!
//! This is the "deep design pattern" the whole crate is built around: a
//! table of in-flight operations keyed by peer + message id, driven by a
//! single millisecond timer, with exponential backoff and callback
//! delivery. [`crate::mqttsn::client::MqttSnClient`] and
//! [`crate::diag::engine::DiagEngine`] apply the same shape to their own
//! wire protocols.

use std::net::SocketAddr;

use crate::config::CoapConfig;
use crate::net::Entropy;
use crate::time::{Clock, Deadline, Millis};

/// The outcome delivered to a [`PendingRequest`]'s callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
  /// A matching response arrived, carrying its payload bytes.
  Success(Vec<u8>),
  /// The retransmission budget was exhausted with no response.
  Timeout,
  /// A RST was received in reply.
  Reset,
  /// The owning subsystem was shut down, or a DTLS session carrying this
  /// exchange was disconnected.
  Aborted,
}

/// Key identifying one in-flight exchange: spec §3.2's
/// (destination-address, destination-port, message-id, token) tuple,
/// collapsed to `(SocketAddr, message_id, token)` since `SocketAddr`
/// already carries the port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExchangeKey {
  /// The peer this exchange is with.
  pub peer: SocketAddr,
  /// The CoAP message id.
  pub message_id: u16,
  /// The CoAP token (0-8 bytes, per RFC 7252).
  pub token: Vec<u8>,
}

/// One entry in the pending-request table (spec §3.2).
pub struct PendingRequest {
  key: ExchangeKey,
  /// Monotonic deadline of the next retransmission or timeout check.
  next_shot: Deadline,
  /// Current backoff interval, in milliseconds.
  timeout: Millis,
  /// Remaining retransmission attempts.
  remaining: u16,
  /// Whether this exchange has been ACKed (but may still await a separate
  /// response).
  acknowledged: bool,
  /// Whether the original request was confirmable. Non-confirmable
  /// requests are never enqueued for retransmission but may still be
  /// tracked here awaiting a response (remaining = 0 effectively, handled
  /// by the caller not registering a retransmission).
  confirmable: bool,
  /// The bytes to retransmit.
  bytes: Vec<u8>,
  /// Absolute deadline after which this entry is evicted unconditionally
  /// (spec's EXCHANGE_LIFETIME), regardless of ack state.
  expires_at: Deadline,
  callback: Box<dyn FnMut(Outcome) + Send>,
}

impl std::fmt::Debug for PendingRequest {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PendingRequest")
     .field("key", &self.key)
     .field("next_shot", &self.next_shot)
     .field("timeout", &self.timeout)
     .field("remaining", &self.remaining)
     .field("acknowledged", &self.acknowledged)
     .field("confirmable", &self.confirmable)
     .field("expires_at", &self.expires_at)
     .finish()
  }
}

/// Owns the pending-request table and the single retransmission timer that
/// drives it (spec §4.2).
pub struct MessagingCore {
  config: CoapConfig,
  entries: Vec<PendingRequest>,
  next_message_id: u16,
}

impl MessagingCore {
  /// Create a new core with the given configuration.
  pub fn new(config: CoapConfig) -> Self {
    Self { config, entries: Vec::new(), next_message_id: 1 }
  }

  /// Allocate a process-monotonic message id (spec §4.2: "If the caller did
  /// not set a message-id, the core assigns a process-monotonic id").
  pub fn next_message_id(&mut self) -> u16 {
    let id = self.next_message_id;
    self.next_message_id = self.next_message_id.wrapping_add(1);
    if self.next_message_id == 0 {
      self.next_message_id = 1;
    }
    id
  }

  /// Number of entries currently pending.
  pub fn pending_count(&self) -> usize {
    self.entries.len()
  }

  /// Does a pending entry already exist for this (peer, message-id)?
  ///
  /// Spec §3.2 invariant: "while a PendingRequest exists for a given
  /// message-id to a given peer, no new request with the same (peer,
  /// message-id) may be issued."
  pub fn has_pending(&self, peer: SocketAddr, message_id: u16) -> bool {
    self.entries.iter().any(|e| e.key.peer == peer && e.key.message_id == message_id)
  }

  /// Enqueue a confirmable request for retransmission tracking.
  ///
  /// Picks the initial timeout uniformly from
  /// `[ack_timeout, ack_timeout * ack_random_factor]` using `entropy` for
  /// the jitter (spec §6's entropy dependency).
  #[allow(clippy::too_many_arguments)]
  pub fn enqueue_confirmable(&mut self,
                             clock: &impl Clock,
                             entropy: &mut impl Entropy,
                             key: ExchangeKey,
                             bytes: Vec<u8>,
                             callback: Box<dyn FnMut(Outcome) + Send>)
                             -> Result<(), crate::error::Error> {
    use crate::error::{Kind, When};

    if self.has_pending(key.peer, key.message_id) {
      return Err(When::SendingCoapRequest.what(Kind::InvalidState));
    }

    let now = clock.now_ms();
    let min = self.config.ack_timeout;
    let max = self.config.ack_timeout * self.config.ack_random_factor_pct as u64 / 100;
    let span = max.saturating_sub(min);
    let jitter = if span == 0 { 0 } else { entropy.next_u16() as u64 % (span + 1) };
    let timeout = min + jitter;

    let expires_at = now + self.config.exchange_lifetime();

    self.entries.push(PendingRequest { key,
                                       next_shot: now + timeout,
                                       timeout,
                                       remaining: self.config.max_retransmit.0,
                                       acknowledged: false,
                                       confirmable: true,
                                       bytes,
                                       expires_at,
                                       callback });
    log::trace!("messaging_core: enqueued new exchange ({} pending)", self.entries.len());
    Ok(())
  }

  /// Track a non-confirmable request awaiting a response, without
  /// retransmission (spec §4.2: "A non-confirmable send is not enqueued"
  /// for retransmission, but we still need to correlate a later response).
  pub fn track_non_confirmable(&mut self,
                               clock: &impl Clock,
                               key: ExchangeKey,
                               callback: Box<dyn FnMut(Outcome) + Send>) {
    let now = clock.now_ms();
    let expires_at = now + self.config.non_lifetime();
    self.entries.push(PendingRequest { key,
                                       next_shot: Deadline::MAX,
                                       timeout: 0,
                                       remaining: 0,
                                       acknowledged: false,
                                       confirmable: false,
                                       bytes: Vec::new(),
                                       expires_at,
                                       callback });
  }

  /// Drive the retransmission timer forward to `now`.
  ///
  /// Returns the datagrams that must be (re)transmitted, in FIFO order
  /// across all exchanges, preserving the per-peer ordering guarantee (spec
  /// §5): callers must send these in the order returned.
  pub fn tick(&mut self, clock: &impl Clock) -> Vec<(SocketAddr, Vec<u8>)> {
    let now = clock.now_ms();
    let mut retransmits = Vec::new();
    let mut i = 0;

    while i < self.entries.len() {
      let expired_exchange = now >= self.entries[i].expires_at;
      let due = crate::time::is_due(now, self.entries[i].next_shot);

      if expired_exchange {
        let mut entry = self.entries.remove(i);
        (entry.callback)(Outcome::Timeout);
        continue;
      }

      if !due || !self.entries[i].confirmable {
        i += 1;
        continue;
      }

      let entry = &mut self.entries[i];
      if entry.remaining > 0 {
        retransmits.push((entry.key.peer, entry.bytes.clone()));
        entry.remaining -= 1;
        // Only double the backoff if another retransmission remains;
        // otherwise the final wait before declaring Timeout uses the same
        // interval as the last retransmission (see DESIGN.md: this is what
        // reproduces the spec's worked example of retransmissions at
        // t=0,2,6,14,30 with Timeout at t=46, rather than t=62).
        if entry.remaining > 0 {
          entry.timeout *= 2;
        }
        entry.next_shot = now + entry.timeout;
        log::trace!("messaging_core: retransmitting to {} ({} attempts left)",
                    entry.key.peer,
                    entry.remaining);
        i += 1;
      } else {
        let mut entry = self.entries.remove(i);
        (entry.callback)(Outcome::Timeout);
      }
    }

    retransmits
  }

  /// The next deadline the timer should fire at, or `None` if the table is
  /// empty (spec §4.2: "the timer is rescheduled to the minimum remaining
  /// next-shot or disarmed if the table is empty").
  pub fn next_deadline(&self) -> Option<Deadline> {
    self.entries
        .iter()
        .filter(|e| e.confirmable)
        .map(|e| e.next_shot)
        .chain(self.entries.iter().map(|e| e.expires_at))
        .min()
  }

  fn find_index(&self, peer: SocketAddr, message_id: u16, token: &[u8]) -> Option<usize> {
    self.entries.iter().position(|e| {
                  e.key.peer == peer && e.key.message_id == message_id && e.key.token.as_slice() == token
                })
  }

  /// Find a pending entry by (peer, token) alone, used by callers (e.g.
  /// [`crate::diag::engine::DiagEngine`]) that need to correlate on token
  /// when the peer may have reused message ids quickly.
  pub fn find_by_token(&self, peer: SocketAddr, token: &[u8]) -> Option<&ExchangeKey> {
    self.entries
        .iter()
        .find(|e| e.key.peer == peer && e.key.token.as_slice() == token)
        .map(|e| &e.key)
  }

  /// Deliver an ACK (possibly piggy-backed with a response payload).
  ///
  /// `payload` is `Some` when the ACK carries code != 0.00 and a body
  /// (a "piggy-backed response", which both acknowledges and completes the
  /// exchange). `payload` is `None` for an empty ACK (code 0.00, no
  /// payload), which only stops retransmission.
  pub fn deliver_ack(&mut self, peer: SocketAddr, message_id: u16, token: &[u8], payload: Option<Vec<u8>>) {
    let Some(idx) = self.find_index(peer, message_id, token) else { return };

    match payload {
      | Some(body) => {
        let mut entry = self.entries.remove(idx);
        (entry.callback)(Outcome::Success(body));
      },
      | None => {
        self.entries[idx].acknowledged = true;
        log::trace!("messaging_core: {} was ACKed", message_id);
      },
    }
  }

  /// Deliver a separate response (arriving after an empty ACK, correlated
  /// by token since the message id differs from the original request).
  pub fn deliver_separate_response(&mut self, peer: SocketAddr, token: &[u8], payload: Vec<u8>) -> bool {
    let idx = self.entries
                  .iter()
                  .position(|e| e.key.peer == peer && e.key.token.as_slice() == token && e.acknowledged);
    let Some(idx) = idx else { return false };
    let mut entry = self.entries.remove(idx);
    (entry.callback)(Outcome::Success(payload));
    true
  }

  /// Deliver a RST in reply to a pending exchange.
  pub fn deliver_reset(&mut self, peer: SocketAddr, message_id: u16, token: &[u8]) {
    if let Some(idx) = self.find_index(peer, message_id, token) {
      let mut entry = self.entries.remove(idx);
      (entry.callback)(Outcome::Reset);
    }
  }

  /// Shut down the core: every pending entry's callback fires with
  /// [`Outcome::Aborted`], then the table is cleared (spec §5,
  /// "Cancellation", form 1).
  pub fn shutdown(&mut self) {
    for mut entry in self.entries.drain(..) {
      (entry.callback)(Outcome::Aborted);
    }
  }
}

#[cfg(test)]
mod test {
  use std::sync::{Arc, Mutex};

  use super::*;
  use crate::net::test::FakeEntropy;
  use crate::time::test::FakeClock;

  fn key(port: u16, mid: u16) -> ExchangeKey {
    ExchangeKey { peer: format!("127.0.0.1:{port}").parse().unwrap(), message_id: mid, token: vec![0xCA, 0xFE] }
  }

  #[test]
  fn confirmable_retransmit_timing_matches_worked_example() {
    // spec scenario 1: retransmissions at t=0,2,6,14,30s; Timeout at t~=46s.
    let clock = FakeClock::new();
    let mut entropy = FakeEntropy::new(vec![0, 0]); // zero jitter -> lower bound (2s)
    let mut core = MessagingCore::new(CoapConfig::default());

    let outcome = Arc::new(Mutex::new(None));
    let outcome2 = outcome.clone();

    core.enqueue_confirmable(&clock,
                             &mut entropy,
                             key(5683, 0x1234),
                             vec![1, 2, 3],
                             Box::new(move |o| *outcome2.lock().unwrap() = Some(o)))
        .unwrap();

    let mut fire_times = Vec::new();
    for t in [2_000u64, 6_000, 14_000, 30_000, 46_000] {
      clock.set(t);
      let sent = core.tick(&clock);
      if !sent.is_empty() {
        fire_times.push(t);
      }
    }

    assert_eq!(fire_times, vec![2_000, 6_000, 14_000, 30_000]);
    assert_eq!(*outcome.lock().unwrap(), Some(Outcome::Timeout));
    assert_eq!(core.pending_count(), 0);
  }

  #[test]
  fn piggybacked_response_acks_and_completes_in_one_step() {
    let clock = FakeClock::new();
    let mut entropy = FakeEntropy::new(vec![1, 2, 3, 4]);
    let mut core = MessagingCore::new(CoapConfig::default());

    let outcome = Arc::new(Mutex::new(None));
    let outcome2 = outcome.clone();
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();

    core.enqueue_confirmable(&clock,
                             &mut entropy,
                             ExchangeKey { peer, message_id: 1, token: vec![0xAA] },
                             vec![9],
                             Box::new(move |o| *outcome2.lock().unwrap() = Some(o)))
        .unwrap();

    core.deliver_ack(peer, 1, &[0xAA], Some(vec![0x10, 0x20]));

    assert_eq!(*outcome.lock().unwrap(), Some(Outcome::Success(vec![0x10, 0x20])));
    assert_eq!(core.pending_count(), 0);
  }

  #[test]
  fn empty_ack_stops_retransmission_without_removing_entry() {
    let clock = FakeClock::new();
    let mut entropy = FakeEntropy::new(vec![0, 0]);
    let mut core = MessagingCore::new(CoapConfig::default());
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();

    core.enqueue_confirmable(&clock,
                             &mut entropy,
                             ExchangeKey { peer, message_id: 2, token: vec![] },
                             vec![1],
                             Box::new(|_| {}))
        .unwrap();

    core.deliver_ack(peer, 2, &[], None);
    assert_eq!(core.pending_count(), 1);

    core.deliver_separate_response(peer, &[], vec![5, 6]);
    assert_eq!(core.pending_count(), 0);
  }

  #[test]
  fn duplicate_message_id_to_same_peer_is_rejected() {
    let clock = FakeClock::new();
    let mut entropy = FakeEntropy::new(vec![0]);
    let mut core = MessagingCore::new(CoapConfig::default());
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();

    core.enqueue_confirmable(&clock,
                             &mut entropy,
                             ExchangeKey { peer, message_id: 3, token: vec![] },
                             vec![1],
                             Box::new(|_| {}))
        .unwrap();

    let res = core.enqueue_confirmable(&clock,
                                       &mut entropy,
                                       ExchangeKey { peer, message_id: 3, token: vec![9] },
                                       vec![2],
                                       Box::new(|_| {}));
    assert!(res.is_err());
  }

  #[test]
  fn shutdown_aborts_all_pending() {
    let clock = FakeClock::new();
    let mut entropy = FakeEntropy::new(vec![0]);
    let mut core = MessagingCore::new(CoapConfig::default());
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let outcome2 = outcome.clone();
    core.enqueue_confirmable(&clock,
                             &mut entropy,
                             ExchangeKey { peer, message_id: 4, token: vec![] },
                             vec![1],
                             Box::new(move |o| *outcome2.lock().unwrap() = Some(o)))
        .unwrap();

    core.shutdown();
    assert_eq!(*outcome.lock().unwrap(), Some(Outcome::Aborted));
    assert_eq!(core.pending_count(), 0);
  }
}
