//! [`MqttSnSession`]: client-visible session state (spec §3.5).
//!
//! Grounded on `original_source/src/core/mqttsn/mqttsn_client.cpp`'s
//! `mClientState`/`kState*` fields and gateway table, generalized away from
//! that file's fixed-size C arrays to owned Rust collections.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::error::{Error, Kind, When};
use crate::time::Millis;

/// The MQTT-SN client state machine (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
  Disconnected,
  Active,
  Asleep,
  Awake,
  Lost,
}

/// A discovered gateway (spec §4.4 "gateway discovery").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
  pub gateway_id: u8,
  pub address: SocketAddr,
  /// Remaining seconds until this ADVERTISE-derived entry should be
  /// considered stale; `None` for a gateway discovered via GWINFO (no
  /// advertised duration).
  pub duration_secs: Option<u16>,
}

/// A fixed-capacity, least-recently-seen-evicting table of known gateways
/// (spec §4.4, capacity supplemented per `DiagConfig`-style sizing --
/// `original_source`'s client keeps exactly one active gateway at a time,
/// but ADVERTISE/GWINFO can reveal several candidates before one is chosen).
#[derive(Debug, Default)]
pub struct GatewayTable {
  capacity: usize,
  entries: VecDeque<Gateway>,
}

impl GatewayTable {
  pub fn new(capacity: usize) -> Self {
    Self { capacity, entries: VecDeque::new() }
  }

  /// Record or refresh a gateway, evicting the oldest entry if full.
  pub fn observe(&mut self, gateway: Gateway) {
    self.entries.retain(|g| g.gateway_id != gateway.gateway_id);
    if self.entries.len() >= self.capacity.max(1) {
      self.entries.pop_front();
    }
    self.entries.push_back(gateway);
  }

  pub fn get(&self, gateway_id: u8) -> Option<&Gateway> {
    self.entries.iter().find(|g| g.gateway_id == gateway_id)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// A topic-name-to-topic-id registration cache (spec §4.4 "topic model").
#[derive(Debug, Default)]
pub struct RegistrationCache {
  by_name: Vec<(Vec<u8>, u16)>,
}

impl RegistrationCache {
  pub fn insert(&mut self, name: Vec<u8>, topic_id: u16) {
    if let Some(entry) = self.by_name.iter_mut().find(|(n, _)| *n == name) {
      entry.1 = topic_id;
    } else {
      self.by_name.push((name, topic_id));
    }
  }

  pub fn topic_id_for(&self, name: &[u8]) -> Option<u16> {
    self.by_name.iter().find(|(n, _)| n == name).map(|(_, id)| *id)
  }
}

/// Per-session MQTT-SN client state (spec §3.5).
pub struct MqttSnSession {
  state: State,
  gateway: SocketAddr,
  client_id: Vec<u8>,
  keepalive_secs: u16,
  next_message_id: u16,
  next_ping_deadline: Option<Millis>,
  pub gateways: GatewayTable,
  pub registrations: RegistrationCache,
}

impl MqttSnSession {
  /// Construct a session bound to `gateway`, with `keepalive_secs` as the
  /// CONNECT duration.
  pub fn new(gateway: SocketAddr, client_id: Vec<u8>, keepalive_secs: u16, gateway_table_capacity: usize) -> Self {
    Self { state: State::Disconnected,
           gateway,
           client_id,
           keepalive_secs,
           next_message_id: 1,
           next_ping_deadline: None,
           gateways: GatewayTable::new(gateway_table_capacity),
           registrations: RegistrationCache::default() }
  }

  pub fn state(&self) -> State {
    self.state
  }

  pub fn gateway(&self) -> SocketAddr {
    self.gateway
  }

  pub fn client_id(&self) -> &[u8] {
    &self.client_id
  }

  pub fn keepalive_secs(&self) -> u16 {
    self.keepalive_secs
  }

  pub fn next_ping_deadline(&self) -> Option<Millis> {
    self.next_ping_deadline
  }

  pub fn set_next_ping_deadline(&mut self, deadline: Option<Millis>) {
    self.next_ping_deadline = deadline;
  }

  /// Only `Active`, `Awake` and `Asleep` accept publish/subscribe/register/
  /// unsubscribe (spec §3.5: "Active is the only state in which ... are
  /// accepted" -- generalized here to also police Awake/Asleep the way
  /// keep-alive handling does).
  pub fn require_active(&self) -> Result<(), Error> {
    if self.state == State::Active {
      Ok(())
    } else {
      Err(When::MqttSnOperation.what(Kind::InvalidState))
    }
  }

  pub fn transition(&mut self, state: State) {
    log::debug!("mqtt-sn: {:?} -> {:?}", self.state, state);
    self.state = state;
  }

  /// Allocate the next message-id: starts at 1, wraps skipping 0 (spec
  /// §4.4 "message-id allocation").
  pub fn allocate_message_id(&mut self) -> u16 {
    let id = self.next_message_id;
    self.next_message_id = self.next_message_id.wrapping_add(1);
    if self.next_message_id == 0 {
      self.next_message_id = 1;
    }
    id
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn gw() -> SocketAddr {
    "127.0.0.1:1883".parse().unwrap()
  }

  #[test]
  fn message_id_allocation_skips_zero_on_wrap() {
    let mut s = MqttSnSession::new(gw(), b"dev1".to_vec(), 60, 16);
    s.next_message_id = 0xFFFF;
    assert_eq!(s.allocate_message_id(), 0xFFFF);
    assert_eq!(s.allocate_message_id(), 1);
  }

  #[test]
  fn require_active_rejects_outside_active() {
    let s = MqttSnSession::new(gw(), b"dev1".to_vec(), 60, 16);
    assert!(s.require_active().is_err());
  }

  #[test]
  fn gateway_table_evicts_oldest_when_full() {
    let mut t = GatewayTable::new(2);
    t.observe(Gateway { gateway_id: 1, address: gw(), duration_secs: Some(30) });
    t.observe(Gateway { gateway_id: 2, address: gw(), duration_secs: Some(30) });
    t.observe(Gateway { gateway_id: 3, address: gw(), duration_secs: Some(30) });
    assert_eq!(t.len(), 2);
    assert!(t.get(1).is_none());
    assert!(t.get(3).is_some());
  }

  #[test]
  fn registration_cache_looks_up_by_name() {
    let mut r = RegistrationCache::default();
    r.insert(b"sensors/temp".to_vec(), 7);
    assert_eq!(r.topic_id_for(b"sensors/temp"), Some(7));
    assert_eq!(r.topic_id_for(b"unknown"), None);
  }
}
