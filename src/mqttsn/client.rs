//! [`MqttSnClient`]: the MQTT-SN 1.2 broker-facing state machine (spec
//! §4.4).
//!
//! Ten pending-operation queues apply the same shape as
//! [`crate::messaging_core::MessagingCore`] to this protocol's own
//! request/response pairs: CONNECT, DISCONNECT, PINGREQ, REGISTER,
//! SUBSCRIBE, UNSUBSCRIBE, PUBLISH at QoS 1, and the three legs of the QoS 2
//! publisher handshake (PUBLISH/PUBREC/PUBREL/PUBCOMP). A tenth table tracks
//! QoS 2 receiver-side duplicate suppression, which has no retransmission of
//! its own. Grounded on
//! `original_source/src/core/mqttsn/mqttsn_client.cpp`'s per-message
//! `XxxReceived` dispatch (state check, queue lookup by message id,
//! callback, dequeue) and its QoS 0/1/2 receiver flow.

use std::net::SocketAddr;

use crate::config::MqttSnConfig;
use crate::error::{Error, Kind, When};
use crate::mqttsn::pdu::{Pdu, Qos, ReturnCode, TopicIdType, TopicRef};
use crate::mqttsn::session::{Gateway, MqttSnSession, State};
use crate::net::Transport;
use crate::time::{is_due, Clock, Deadline, Millis};

/// The outcome delivered to a pending operation's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MqttSnOutcome {
  /// A matching response PDU arrived.
  Success(Pdu),
  /// The retransmission budget was exhausted with no response.
  Timeout,
  /// The client was disconnected or shut down mid-operation.
  Aborted,
}

type Callback = Box<dyn FnMut(MqttSnOutcome) + Send>;

/// Set the DUP flag on a PDU that carries one. Message types without a DUP
/// bit (e.g. REGISTER) are retransmitted byte-identical.
fn mark_dup(pdu: &mut Pdu) {
  match pdu {
    | Pdu::Publish { dup, .. } | Pdu::Subscribe { dup, .. } => *dup = true,
    | _ => {},
  }
}

/// One entry in a retransmission-tracked queue. `message_id` is `None` for
/// the message types that carry no message-id field at all (CONNECT,
/// DISCONNECT, PINGREQ), which are instead correlated by peer alone --
/// the protocol allows only one such exchange in flight per gateway.
struct PendingOp {
  peer: SocketAddr,
  message_id: Option<u16>,
  /// The original request, kept (not just its encoded bytes) so a
  /// retransmission can flip DUP and re-serialize rather than resend a
  /// stale buffer (spec §9 open question: re-serialize on every shot).
  pdu: Pdu,
  next_shot: Deadline,
  timeout: Millis,
  remaining: u8,
  callback: Callback,
}

/// Drive one queue forward, returning how many entries timed out (spec
/// §4.4 tick rule: on count == 0, fire Timeout and dequeue).
fn tick_queue(queue: &mut Vec<PendingOp>, now: Deadline, transport: &mut impl Transport) -> usize {
  let mut i = 0;
  let mut timed_out = 0;
  while i < queue.len() {
    if !is_due(now, queue[i].next_shot) {
      i += 1;
      continue;
    }

    if queue[i].remaining > 0 {
      queue[i].remaining -= 1;
      mark_dup(&mut queue[i].pdu);
      if let Ok(bytes) = queue[i].pdu.encode() {
        let peer = queue[i].peer;
        let _ = nb::block!(transport.send(peer, &bytes));
      }
      if queue[i].remaining > 0 {
        queue[i].timeout *= 2;
      }
      queue[i].next_shot = now + queue[i].timeout;
      i += 1;
    } else {
      let mut op = queue.remove(i);
      (op.callback)(MqttSnOutcome::Timeout);
      timed_out += 1;
    }
  }
  timed_out
}

fn find_by_message_id(queue: &[PendingOp], message_id: u16) -> Option<usize> {
  queue.iter().position(|op| op.message_id == Some(message_id))
}

fn find_by_peer(queue: &[PendingOp], peer: SocketAddr) -> Option<usize> {
  queue.iter().position(|op| op.peer == peer)
}

fn abort_all(queue: &mut Vec<PendingOp>) {
  for mut op in queue.drain(..) {
    (op.callback)(MqttSnOutcome::Aborted);
  }
}

/// The well-known MQTT-SN gateway port, used when a GWINFO's address field
/// carries only an IP address (the TLV has no room for a port number).
const DEFAULT_GATEWAY_PORT: u16 = 1883;

fn parse_gateway_address(raw: &[u8]) -> Option<SocketAddr> {
  use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
  match raw.len() {
    | 4 => Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])), DEFAULT_GATEWAY_PORT)),
    | 16 => {
      let mut octets = [0u8; 16];
      octets.copy_from_slice(raw);
      Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), DEFAULT_GATEWAY_PORT))
    },
    | _ => None,
  }
}

/// A QoS 2 receiver-side duplicate-suppression entry: the message id of a
/// PUBLISH we have PUBRECed and are waiting to see PUBRELed.
struct PubrecEntry {
  message_id: u16,
  expires_at: Deadline,
}

/// The MQTT-SN client (spec §3.5/§4.4).
pub struct MqttSnClient<T: Transport> {
  config: MqttSnConfig,
  transport: T,
  session: MqttSnSession,

  connect_q: Vec<PendingOp>,
  disconnect_q: Vec<PendingOp>,
  pingreq_q: Vec<PendingOp>,
  register_q: Vec<PendingOp>,
  subscribe_q: Vec<PendingOp>,
  unsubscribe_q: Vec<PendingOp>,
  publish_qos1_q: Vec<PendingOp>,
  publish_qos2_publish_q: Vec<PendingOp>,
  publish_qos2_pubrel_q: Vec<PendingOp>,
  publish_qos2_pubrec_q: Vec<PubrecEntry>,

  advertise_cb: Option<Box<dyn FnMut(SocketAddr, u8, u16) + Send>>,
  search_gw_cb: Option<Box<dyn FnMut(SocketAddr, u8) + Send>>,
  register_received_cb: Option<Box<dyn FnMut(u16, &[u8]) -> ReturnCode + Send>>,
  publish_received_cb: Option<Box<dyn FnMut(TopicIdType, TopicRef, &[u8]) -> ReturnCode + Send>>,
  disconnected_cb: Option<Box<dyn FnMut(State) + Send>>,
}

impl<T: Transport> MqttSnClient<T> {
  /// Create a client bound to `gateway`, not yet connected.
  pub fn new(transport: T, config: MqttSnConfig, gateway: SocketAddr, client_id: Vec<u8>, keepalive_secs: u16) -> Self {
    let session = MqttSnSession::new(gateway, client_id, keepalive_secs, config.gateway_table_capacity);
    Self { config,
           transport,
           session,
           connect_q: Vec::new(),
           disconnect_q: Vec::new(),
           pingreq_q: Vec::new(),
           register_q: Vec::new(),
           subscribe_q: Vec::new(),
           unsubscribe_q: Vec::new(),
           publish_qos1_q: Vec::new(),
           publish_qos2_publish_q: Vec::new(),
           publish_qos2_pubrel_q: Vec::new(),
           publish_qos2_pubrec_q: Vec::new(),
           advertise_cb: None,
           search_gw_cb: None,
           register_received_cb: None,
           publish_received_cb: None,
           disconnected_cb: None }
  }

  pub fn session(&self) -> &MqttSnSession {
    &self.session
  }

  pub fn on_advertise(&mut self, cb: Box<dyn FnMut(SocketAddr, u8, u16) + Send>) {
    self.advertise_cb = Some(cb);
  }

  pub fn on_gwinfo(&mut self, cb: Box<dyn FnMut(SocketAddr, u8) + Send>) {
    self.search_gw_cb = Some(cb);
  }

  pub fn on_register_received(&mut self, cb: Box<dyn FnMut(u16, &[u8]) -> ReturnCode + Send>) {
    self.register_received_cb = Some(cb);
  }

  pub fn on_publish_received(&mut self, cb: Box<dyn FnMut(TopicIdType, TopicRef, &[u8]) -> ReturnCode + Send>) {
    self.publish_received_cb = Some(cb);
  }

  pub fn on_disconnected(&mut self, cb: Box<dyn FnMut(State) + Send>) {
    self.disconnected_cb = Some(cb);
  }

  fn enqueue(queue: &mut Vec<PendingOp>,
             config: &MqttSnConfig,
             clock: &impl Clock,
             peer: SocketAddr,
             message_id: Option<u16>,
             pdu: Pdu,
             callback: Callback) {
    let now = clock.now_ms();
    queue.push(PendingOp { peer,
                           message_id,
                           pdu,
                           next_shot: now + config.retry_timeout as Deadline,
                           timeout: config.retry_timeout,
                           remaining: config.retry_count,
                           callback });
  }

  fn send_now(&mut self, peer: SocketAddr, pdu: &Pdu) -> Result<(), Error> {
    let bytes = pdu.encode()?;
    nb::block!(self.transport.send(peer, &bytes)).map_err(|e| {
                                                    log::warn!("mqtt-sn: send to {peer} failed: {e:?}");
                                                    When::MqttSnOperation.what(Kind::NoBuffer)
                                                  })
  }

  /// Discover gateways: broadcast SEARCHGW (spec §4.4 "gateway discovery").
  /// Replies arrive asynchronously via [`Self::on_gwinfo`]; there is no
  /// retransmission queue for this one-shot announcement.
  pub fn search_gw(&mut self, broadcast: SocketAddr, radius: u8) -> Result<(), Error> {
    self.send_now(broadcast, &Pdu::SearchGw { radius })
  }

  /// CONNECT to the configured gateway (spec §4.4 state diagram:
  /// `Disconnected -> Active` on CONNACK).
  pub fn connect(&mut self,
                 clock: &impl Clock,
                 clean_session: bool,
                 will: bool,
                 callback: Box<dyn FnMut(MqttSnOutcome) + Send>)
                 -> Result<(), Error> {
    let gateway = self.session.gateway();
    let pdu = Pdu::Connect { clean_session,
                             will,
                             duration_secs: self.session.keepalive_secs(),
                             client_id: self.session.client_id().to_vec() };
    self.send_now(gateway, &pdu)?;
    Self::enqueue(&mut self.connect_q, &self.config, clock, gateway, None, pdu, callback);
    Ok(())
  }

  /// DISCONNECT, optionally requesting sleep for `duration_secs` (spec
  /// §4.4: `Active -> Asleep` when a duration is given, else `-> Disconnected`).
  pub fn disconnect(&mut self, clock: &impl Clock, duration_secs: Option<u16>, callback: Box<dyn FnMut(MqttSnOutcome) + Send>) -> Result<(), Error> {
    let gateway = self.session.gateway();
    let pdu = Pdu::Disconnect { duration_secs };
    self.send_now(gateway, &pdu)?;
    Self::enqueue(&mut self.disconnect_q, &self.config, clock, gateway, None, pdu, callback);
    Ok(())
  }

  /// Send an explicit PINGREQ (keep-alive ticking also schedules these
  /// automatically; see [`Self::tick`]). A sleeping client moves to `Awake`
  /// until the matching PINGRESP returns it to `Asleep` (spec §4.4 state
  /// diagram).
  pub fn ping(&mut self, clock: &impl Clock, callback: Box<dyn FnMut(MqttSnOutcome) + Send>) -> Result<(), Error> {
    if self.session.state() == State::Asleep {
      self.session.transition(State::Awake);
    }
    let gateway = self.session.gateway();
    let pdu = Pdu::Pingreq { client_id: self.session.client_id().to_vec() };
    self.send_now(gateway, &pdu)?;
    Self::enqueue(&mut self.pingreq_q, &self.config, clock, gateway, None, pdu, callback);
    Ok(())
  }

  /// REGISTER a topic name, caching the returned id on success (spec §4.4
  /// "topic model").
  pub fn register(&mut self, clock: &impl Clock, topic_name: Vec<u8>, callback: Box<dyn FnMut(MqttSnOutcome) + Send>) -> Result<(), Error> {
    self.session.require_active()?;
    let gateway = self.session.gateway();
    let message_id = self.session.allocate_message_id();
    let pdu = Pdu::Register { topic_id: 0, message_id, topic_name };
    self.send_now(gateway, &pdu)?;
    Self::enqueue(&mut self.register_q, &self.config, clock, gateway, Some(message_id), pdu, callback);
    Ok(())
  }

  /// SUBSCRIBE to a topic (spec §9 fix: QoS outside {0,1,2} is rejected
  /// here too, not just in `publish()` -- QoS -1 has no SUBSCRIBE meaning).
  pub fn subscribe(&mut self,
                   clock: &impl Clock,
                   qos: Qos,
                   topic_id_type: TopicIdType,
                   topic: TopicRef,
                   callback: Box<dyn FnMut(MqttSnOutcome) + Send>)
                   -> Result<(), Error> {
    if matches!(qos, Qos::MinusOne) {
      return Err(When::MqttSnOperation.what(Kind::InvalidArgument("subscribe() only accepts QoS 0, 1, or 2")));
    }
    self.session.require_active()?;
    let gateway = self.session.gateway();
    let message_id = self.session.allocate_message_id();
    let pdu = Pdu::Subscribe { dup: false, qos, message_id, topic_id_type, topic };
    self.send_now(gateway, &pdu)?;
    Self::enqueue(&mut self.subscribe_q, &self.config, clock, gateway, Some(message_id), pdu, callback);
    Ok(())
  }

  /// UNSUBSCRIBE from a topic.
  pub fn unsubscribe(&mut self,
                     clock: &impl Clock,
                     topic_id_type: TopicIdType,
                     topic: TopicRef,
                     callback: Box<dyn FnMut(MqttSnOutcome) + Send>)
                     -> Result<(), Error> {
    self.session.require_active()?;
    let gateway = self.session.gateway();
    let message_id = self.session.allocate_message_id();
    let pdu = Pdu::Unsubscribe { message_id, topic_id_type, topic };
    self.send_now(gateway, &pdu)?;
    Self::enqueue(&mut self.unsubscribe_q, &self.config, clock, gateway, Some(message_id), pdu, callback);
    Ok(())
  }

  /// PUBLISH at the given QoS (spec §9 fix: QoS outside {0,1,2} -- i.e.
  /// [`Qos::MinusOne`] is rejected here rather than silently treated as
  /// QoS 0, since it changes which queue, if any, tracks the send).
  pub fn publish(&mut self,
                 clock: &impl Clock,
                 qos: Qos,
                 retain: bool,
                 topic_id_type: TopicIdType,
                 topic: TopicRef,
                 payload: Vec<u8>,
                 callback: Box<dyn FnMut(MqttSnOutcome) + Send>)
                 -> Result<(), Error> {
    if matches!(qos, Qos::MinusOne) {
      return Err(When::MqttSnOperation.what(Kind::InvalidArgument("publish() only accepts QoS 0, 1, or 2")));
    }
    self.session.require_active()?;
    let gateway = self.session.gateway();
    let message_id = self.session.allocate_message_id();
    let pdu = Pdu::Publish { dup: false, retain, qos, topic_id_type, topic, message_id, payload };

    self.send_now(gateway, &pdu)?;
    match qos {
      | Qos::AtMostOnce => {
        callback(MqttSnOutcome::Success(pdu)); // QoS 0: no ack, fire immediately
      },
      | Qos::AtLeastOnce => {
        Self::enqueue(&mut self.publish_qos1_q, &self.config, clock, gateway, Some(message_id), pdu, callback);
      },
      | Qos::ExactlyOnce => {
        Self::enqueue(&mut self.publish_qos2_publish_q, &self.config, clock, gateway, Some(message_id), pdu, callback);
      },
      | Qos::MinusOne => unreachable!("rejected above"),
    }
    Ok(())
  }

  /// Publish without a prior REGISTER/SUBSCRIBE and without waiting for an
  /// acknowledgement (QoS -1, spec §4.4 "publish without handshake").
  pub fn publish_without_ack(&mut self, topic_id_type: TopicIdType, topic: TopicRef, payload: Vec<u8>) -> Result<(), Error> {
    let gateway = self.session.gateway();
    let message_id = self.session.allocate_message_id();
    let pdu = Pdu::Publish { dup: false, retain: false, qos: Qos::MinusOne, topic_id_type, topic, message_id, payload };
    self.send_now(gateway, &pdu)
  }

  /// Drive every retransmission queue forward, and schedule/send keep-alive
  /// PINGREQ at `keepalive_ping_pct` of the keep-alive interval (spec §4.4).
  ///
  /// A timeout in any queue that only operates while `Active` drops the
  /// session to `Lost` and fires the disconnected callback (spec §4.4
  /// tick rule: "if the operation was user-visible in Active state, mark
  /// the session Lost").
  pub fn tick(&mut self, clock: &impl Clock) {
    let now = clock.now_ms();

    tick_queue(&mut self.connect_q, now, &mut self.transport);
    tick_queue(&mut self.disconnect_q, now, &mut self.transport);

    let mut active_timeouts = 0;
    active_timeouts += tick_queue(&mut self.pingreq_q, now, &mut self.transport);
    active_timeouts += tick_queue(&mut self.register_q, now, &mut self.transport);
    active_timeouts += tick_queue(&mut self.subscribe_q, now, &mut self.transport);
    active_timeouts += tick_queue(&mut self.unsubscribe_q, now, &mut self.transport);
    active_timeouts += tick_queue(&mut self.publish_qos1_q, now, &mut self.transport);
    active_timeouts += tick_queue(&mut self.publish_qos2_publish_q, now, &mut self.transport);
    active_timeouts += tick_queue(&mut self.publish_qos2_pubrel_q, now, &mut self.transport);

    self.publish_qos2_pubrec_q.retain(|e| !is_due(now, e.expires_at));

    if active_timeouts > 0 && self.session.state() == State::Active {
      self.session.transition(State::Lost);
      if let Some(cb) = self.disconnected_cb.as_mut() {
        cb(State::Lost);
      }
    }

    if self.session.state() == State::Active {
      let due = self.session
                    .next_ping_deadline()
                    .map(|deadline| is_due(now, deadline))
                    .unwrap_or(true);
      if due {
        if let Err(e) = self.ping(clock, Box::new(|_| {})) {
          log::warn!("mqtt-sn: keep-alive PINGREQ failed: {e}");
        }
        let interval = (self.session.keepalive_secs() as u64 * 1000 * self.config.keepalive_ping_pct as u64) / 100;
        self.session.set_next_ping_deadline(Some(now + interval));
      }
    }
  }

  /// Shut down: every pending operation's callback fires with
  /// [`MqttSnOutcome::Aborted`] (spec §5, "Cancellation").
  pub fn shutdown(&mut self) {
    abort_all(&mut self.connect_q);
    abort_all(&mut self.disconnect_q);
    abort_all(&mut self.pingreq_q);
    abort_all(&mut self.register_q);
    abort_all(&mut self.subscribe_q);
    abort_all(&mut self.unsubscribe_q);
    abort_all(&mut self.publish_qos1_q);
    abort_all(&mut self.publish_qos2_publish_q);
    abort_all(&mut self.publish_qos2_pubrel_q);
    self.publish_qos2_pubrec_q.clear();
    self.session.transition(State::Disconnected);
  }

  /// Decode and dispatch one inbound datagram from `from` (spec §4.4,
  /// mirroring `mqttsn_client.cpp`'s `Receive()` switch: queue lookup by
  /// message id or peer, invoke callback, dequeue).
  pub fn recv(&mut self, clock: &impl Clock, from: SocketAddr, bytes: &[u8]) -> Result<(), Error> {
    let pdu = Pdu::decode(bytes)?;
    match &pdu {
      | Pdu::Advertise { gateway_id, duration_secs } => {
        let (gateway_id, duration_secs) = (*gateway_id, *duration_secs);
        self.session.gateways.observe(Gateway { gateway_id, address: from, duration_secs: Some(duration_secs) });
        if let Some(cb) = self.advertise_cb.as_mut() {
          cb(from, gateway_id, duration_secs);
        }
      },
      | Pdu::GwInfo { gateway_id, gateway_address } => {
        let gateway_id = *gateway_id;
        let address = if let Some(raw) = gateway_address { parse_gateway_address(raw).unwrap_or(from) } else { from };
        self.session.gateways.observe(Gateway { gateway_id, address, duration_secs: None });
        if let Some(cb) = self.search_gw_cb.as_mut() {
          cb(address, gateway_id);
        }
      },
      | Pdu::Connack { .. } => {
        if let Some(idx) = find_by_peer(&self.connect_q, from) {
          let mut op = self.connect_q.remove(idx);
          self.session.transition(State::Active);
          let interval = (self.session.keepalive_secs() as u64 * 1000 * self.config.keepalive_ping_pct as u64) / 100;
          self.session.set_next_ping_deadline(Some(clock.now_ms() + interval));
          (op.callback)(MqttSnOutcome::Success(pdu));
        }
      },
      | Pdu::Disconnect { duration_secs } => {
        if let Some(idx) = find_by_peer(&self.disconnect_q, from) {
          let mut op = self.disconnect_q.remove(idx);
          (op.callback)(MqttSnOutcome::Success(pdu.clone()));
        }
        let next = if duration_secs.is_some() { State::Asleep } else { State::Disconnected };
        self.session.transition(next);
        if let Some(cb) = self.disconnected_cb.as_mut() {
          cb(next);
        }
      },
      | Pdu::Pingresp => {
        if let Some(idx) = find_by_peer(&self.pingreq_q, from) {
          let mut op = self.pingreq_q.remove(idx);
          (op.callback)(MqttSnOutcome::Success(pdu));
        }
        if self.session.state() == State::Awake {
          self.session.transition(State::Asleep);
        }
      },
      | Pdu::Regack { message_id, .. } => {
        if let Some(idx) = find_by_message_id(&self.register_q, *message_id) {
          let (topic_id, return_code) = match &pdu {
            | Pdu::Regack { topic_id, return_code, .. } => (*topic_id, *return_code),
            | _ => unreachable!(),
          };
          if return_code == ReturnCode::Accepted {
            if let Pdu::Register { topic_name, .. } = &self.register_q[idx].pdu {
              self.session.registrations.insert(topic_name.clone(), topic_id);
            }
          }
          let mut op = self.register_q.remove(idx);
          (op.callback)(MqttSnOutcome::Success(pdu));
        }
      },
      | Pdu::Suback { message_id, .. } => {
        if let Some(idx) = find_by_message_id(&self.subscribe_q, *message_id) {
          let mut op = self.subscribe_q.remove(idx);
          (op.callback)(MqttSnOutcome::Success(pdu));
        }
      },
      | Pdu::Unsuback { message_id } => {
        if let Some(idx) = find_by_message_id(&self.unsubscribe_q, *message_id) {
          let mut op = self.unsubscribe_q.remove(idx);
          (op.callback)(MqttSnOutcome::Success(pdu));
        }
      },
      | Pdu::Puback { message_id, .. } => {
        if let Some(idx) = find_by_message_id(&self.publish_qos1_q, *message_id) {
          let mut op = self.publish_qos1_q.remove(idx);
          (op.callback)(MqttSnOutcome::Success(pdu));
        }
      },
      | Pdu::Pubrec { message_id } => {
        if let Some(idx) = find_by_message_id(&self.publish_qos2_publish_q, *message_id) {
          let op = self.publish_qos2_publish_q.remove(idx);
          let pubrel = Pdu::Pubrel { message_id: *message_id };
          self.send_now(from, &pubrel)?;
          Self::enqueue(&mut self.publish_qos2_pubrel_q, &self.config, clock, from, Some(*message_id), pubrel, op.callback);
        }
      },
      | Pdu::Pubcomp { message_id } => {
        if let Some(idx) = find_by_message_id(&self.publish_qos2_pubrel_q, *message_id) {
          let mut op = self.publish_qos2_pubrel_q.remove(idx);
          (op.callback)(MqttSnOutcome::Success(pdu));
        }
      },
      | Pdu::Pubrel { message_id } => {
        let message_id = *message_id;
        self.publish_qos2_pubrec_q.retain(|e| e.message_id != message_id);
        self.send_now(from, &Pdu::Pubcomp { message_id })?;
      },
      | Pdu::Register { topic_id, message_id, topic_name } => {
        let (topic_id, message_id) = (*topic_id, *message_id);
        let code = self.register_received_cb
                       .as_mut()
                       .map(|cb| cb(topic_id, topic_name))
                       .unwrap_or(ReturnCode::RejectedNotSupported);
        self.send_now(from, &Pdu::Regack { topic_id, message_id, return_code: code })?;
      },
      | Pdu::Publish { qos, topic_id_type, topic, message_id, payload, .. } => {
        let (qos, topic_id_type, topic, message_id) = (*qos, *topic_id_type, *topic, *message_id);
        if qos == Qos::ExactlyOnce && self.publish_qos2_pubrec_q.iter().any(|e| e.message_id == message_id) {
          return Ok(()); // spec §4.4: suppress a re-delivered QoS 2 PUBLISH awaiting PUBREL
        }

        let code = self.publish_received_cb
                       .as_mut()
                       .map(|cb| cb(topic_id_type, topic, payload))
                       .unwrap_or(ReturnCode::RejectedInvalidTopicId);

        match qos {
          | Qos::AtMostOnce | Qos::MinusOne => {},
          | Qos::AtLeastOnce => {
            // PUBACK's topic-id field is the same two wire bytes regardless of
            // topic-id-type, so a short name is echoed back reinterpreted as a u16.
            let topic_id = match topic { | TopicRef::Id(id) => id, | TopicRef::Short(bytes) => u16::from_be_bytes(bytes) };
            self.send_now(from, &Pdu::Puback { topic_id, message_id, return_code: code })?;
          },
          | Qos::ExactlyOnce => {
            self.send_now(from, &Pdu::Pubrec { message_id })?;
            let now = clock.now_ms();
            self.publish_qos2_pubrec_q
                .push(PubrecEntry { message_id, expires_at: now + self.config.retry_timeout as Deadline });
          },
        }
      },
      | _ => log::debug!("mqtt-sn: ignoring unhandled inbound message from {from}"),
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use std::sync::{Arc, Mutex};

  use super::*;
  use crate::net::test::FakeTransport;
  use crate::time::test::FakeClock;

  fn gateway() -> SocketAddr {
    "127.0.0.1:1883".parse().unwrap()
  }

  fn client() -> MqttSnClient<FakeTransport> {
    MqttSnClient::new(FakeTransport::new(), MqttSnConfig::default(), gateway(), b"dev1".to_vec(), 60)
  }

  #[test]
  fn connect_transitions_to_active_and_schedules_keepalive() {
    let clock = FakeClock::new();
    let mut c = client();
    let outcome = Arc::new(Mutex::new(None));
    let outcome2 = outcome.clone();

    c.connect(&clock, true, false, Box::new(move |o| *outcome2.lock().unwrap() = Some(o))).unwrap();
    assert_eq!(c.transport.sent.len(), 1);

    c.recv(&clock, gateway(), &Pdu::Connack { return_code: ReturnCode::Accepted }.encode().unwrap())
     .unwrap();

    assert_eq!(c.session.state(), State::Active);
    assert!(c.session.next_ping_deadline().is_some());
    assert_eq!(*outcome.lock().unwrap(), Some(MqttSnOutcome::Success(Pdu::Connack { return_code: ReturnCode::Accepted })));
  }

  #[test]
  fn register_accepted_populates_topic_cache() {
    let clock = FakeClock::new();
    let mut c = client();
    c.session.transition(State::Active);

    c.register(&clock, b"sensors/temp".to_vec(), Box::new(|_| {})).unwrap();
    let pending_message_id = match &c.register_q[0].pdu {
      | Pdu::Register { message_id, .. } => *message_id,
      | _ => panic!("expected Register"),
    };

    let regack = Pdu::Regack { topic_id: 7, message_id: pending_message_id, return_code: ReturnCode::Accepted };
    c.recv(&clock, gateway(), &regack.encode().unwrap()).unwrap();

    assert_eq!(c.session.registrations.topic_id_for(b"sensors/temp"), Some(7));
    assert!(c.register_q.is_empty());
  }

  #[test]
  fn publish_qos1_retransmits_with_dup_then_times_out() {
    let clock = FakeClock::new();
    let mut c = client();
    c.session.transition(State::Active);

    c.publish(&clock,
              Qos::AtLeastOnce,
              false,
              TopicIdType::Normal,
              TopicRef::Id(3),
              vec![1, 2],
              Box::new(|_| {}))
     .unwrap();
    assert_eq!(c.transport.sent.len(), 1);

    clock.set(c.config.retry_timeout);
    c.tick(&clock);
    assert_eq!(c.transport.sent.len(), 2);
    let retransmitted = Pdu::decode(c.transport.sent.back().unwrap().data()).unwrap();
    assert!(matches!(retransmitted, Pdu::Publish { dup: true, .. }));

    let mut t = c.config.retry_timeout * 2;
    for _ in 0..c.config.retry_count {
      clock.set(clock.now_ms() + t);
      c.tick(&clock);
      t *= 2;
    }
    assert!(c.publish_qos1_q.is_empty());
  }

  #[test]
  fn duplicate_qos2_publish_is_suppressed_while_awaiting_pubrel() {
    let clock = FakeClock::new();
    let mut c = client();
    let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    c.on_publish_received(Box::new(|_, _, _| ReturnCode::Accepted));

    let publish =
      Pdu::Publish { dup: false, retain: false, qos: Qos::ExactlyOnce, topic_id_type: TopicIdType::Normal, topic: TopicRef::Id(1), message_id: 9, payload: vec![1] };
    c.recv(&clock, peer, &publish.encode().unwrap()).unwrap();
    assert_eq!(c.publish_qos2_pubrec_q.len(), 1);

    let dup = Pdu::Publish { dup: true, ..publish };
    c.recv(&clock, peer, &dup.encode().unwrap()).unwrap();
    assert_eq!(c.publish_qos2_pubrec_q.len(), 1); // not duplicated

    c.recv(&clock, peer, &Pdu::Pubrel { message_id: 9 }.encode().unwrap()).unwrap();
    assert!(c.publish_qos2_pubrec_q.is_empty());
  }

  #[test]
  fn publish_with_reserved_qos_is_rejected() {
    let clock = FakeClock::new();
    let mut c = client();
    c.session.transition(State::Active);

    let res = c.publish(&clock, Qos::MinusOne, false, TopicIdType::Normal, TopicRef::Id(1), vec![], Box::new(|_| {}));
    assert!(res.is_err());
  }

  #[test]
  fn subscribe_with_reserved_qos_is_rejected() {
    let clock = FakeClock::new();
    let mut c = client();
    c.session.transition(State::Active);

    let res = c.subscribe(&clock, Qos::MinusOne, TopicIdType::Normal, TopicRef::Id(1), Box::new(|_| {}));
    assert!(res.is_err());
    assert!(c.subscribe_q.is_empty());
  }
}
