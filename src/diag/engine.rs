//! [`DiagEngine`]: the network-diagnostics query/answer subsystem (spec
//! §4.5).
//!
//! Spec §4.5 describes this as a handler plugged into `CoapAgent`'s generic
//! resource-registration mechanism. That mechanism hands a resource a
//! `&CoapMessage` and returns one `ResourceResponse` synchronously, which
//! fits a request/single-response exchange but not this subsystem's
//! fragmented, ack-gated answer stream (spec §4.5 step 6: "send the first,
//! await its 2.04 response, then send the second"). `DiagEngine` instead
//! owns its `CoapAgent` outright -- the same composition
//! `crate::mqttsn::client::MqttSnClient` uses for its transport -- and
//! inspects inbound messages itself before ever reaching the generic
//! resource table, dispatching diagnostic traffic to its own state and
//! forwarding everything else to the agent unchanged.
//!
//! Grounded on `original_source/src/core/thread/network_diagnostic.{hpp,cpp}`
//! for the three URIs, the TLV catalog and pagination threshold, and
//! `history_tracker_server.cpp` for the supplemented per-peer query rate
//! limit.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use crate::coap::{CoapAgent, CoapMessage, CoapOption, Code, Type};
use crate::codec::tlv;
use crate::config::{CoapConfig, DiagConfig};
use crate::diag::query::{AnswerMessage, ClientQuery, DiagClientEvent, DiagQueryContext};
use crate::diag::tlv_types::{ResponderTable, TlvType, ANSWER_TLV, QUERY_ID_TLV, TYPE_LIST_TLV};
use crate::error::{Error, Kind, When};
use crate::messaging_core::Outcome;
use crate::net::{Entropy, Transport};
use crate::time::{Clock, Deadline};

fn path_is(segments: &[String], want: &[&str]) -> bool {
  segments.len() == want.len() && segments.iter().zip(want).all(|(a, b)| a == b)
}

fn parse_query_id(payload: &[u8]) -> Option<u16> {
  match tlv::find(payload, 0, QUERY_ID_TLV) {
    | Ok(Some(t)) if t.len() >= 2 => {
      let v = t.value(payload);
      Some(u16::from_be_bytes([v[0], v[1]]))
    },
    | _ => None,
  }
}

fn append_answer_tlv(buf: &mut Vec<u8>, index: u8, more_follows: bool) {
  tlv::append_tlv(buf, ANSWER_TLV, &[index, more_follows as u8]);
}

/// Parse every non-framing TLV out of an answer payload, as `(type, value)`
/// pairs (spec §4.5: "populating a strongly-typed result object one TLV at
/// a time ... unknown TLV types are skipped silently").
fn collect_response_tlvs(payload: &[u8]) -> Vec<(u8, Vec<u8>)> {
  tlv::iter(payload, 0).filter_map(|r| r.ok())
                       .filter(|t| !matches!(t.ty, QUERY_ID_TLV | TYPE_LIST_TLV | ANSWER_TLV))
                       .map(|t| (t.ty, t.value(payload).to_vec()))
                       .collect()
}

/// One server-initiated answer fragment awaiting its empty ACK, plus
/// whatever fragments still need to follow it (spec §4.5 step 6).
struct ServerPush {
  peer: SocketAddr,
  message_id: u16,
  remaining: VecDeque<AnswerMessage>,
}

/// Per-peer rate-limiter state for the supplemented `query_rate_limit_per_sec`
/// config (grounded on `history_tracker_server.cpp`'s query throttling).
struct RateLimit {
  peer: SocketAddr,
  window_start: Deadline,
  count: u32,
}

/// The diagnostic query/answer engine: server-side pagination and reset
/// handling, plus a client-side single-in-flight query (spec §4.5).
pub struct DiagEngine<T: Transport> {
  agent: CoapAgent<T>,
  config: DiagConfig,
  responders: ResponderTable,
  client_query: Option<ClientQuery>,
  server_pushes: Vec<ServerPush>,
  rate_limits: Vec<RateLimit>,
  first_answer_events: Arc<Mutex<VecDeque<(SocketAddr, Outcome)>>>,
  next_message_id: u16,
  next_token: u8,
}

impl<T: Transport> DiagEngine<T> {
  /// Construct a new engine, owning a fresh `CoapAgent` over `transport`.
  pub fn new(transport: T,
             entropy: Box<dyn Entropy + Send>,
             coap_config: CoapConfig,
             diag_config: DiagConfig,
             responders: ResponderTable)
             -> Self {
    Self { agent: CoapAgent::new(transport, entropy, coap_config),
           config: diag_config,
           responders,
           client_query: None,
           server_pushes: Vec::new(),
           rate_limits: Vec::new(),
           first_answer_events: Arc::new(Mutex::new(VecDeque::new())),
           next_message_id: 1,
           next_token: 0 }
  }

  /// Borrow the underlying agent (for registering unrelated resources on
  /// the same socket, or reading its `local_addr`).
  pub fn agent(&self) -> &CoapAgent<T> {
    &self.agent
  }

  /// Mutably borrow the registered response-TLV/reset-hook table.
  pub fn responders_mut(&mut self) -> &mut ResponderTable {
    &mut self.responders
  }

  /// Is a client query currently in flight?
  pub fn client_busy(&self) -> bool {
    self.client_query.is_some()
  }

  fn alloc_message_id(&mut self) -> u16 {
    let id = self.next_message_id;
    self.next_message_id = self.next_message_id.wrapping_add(1);
    if self.next_message_id == 0 {
      self.next_message_id = 1;
    }
    id
  }

  fn alloc_token(&mut self) -> u8 {
    let t = self.next_token;
    self.next_token = self.next_token.wrapping_add(1);
    t
  }

  /// Is `peer` over its configured query rate limit right now? Also
  /// records this query against the window (spec §6/§9 supplemented
  /// feature, grounded on `history_tracker_server.cpp`'s per-peer
  /// throttling; `None` limit disables the check entirely).
  fn rate_limited(&mut self, clock: &impl Clock, peer: SocketAddr) -> bool {
    let Some(limit_per_sec) = self.config.query_rate_limit_per_sec else { return false };
    let now = clock.now_ms();

    self.rate_limits.retain(|r| now.saturating_sub(r.window_start) < 1_000 || r.peer != peer);

    match self.rate_limits.iter_mut().find(|r| r.peer == peer) {
      | Some(r) if now.saturating_sub(r.window_start) >= 1_000 => {
        r.window_start = now;
        r.count = 1;
        false
      },
      | Some(r) => {
        r.count += 1;
        r.count > limit_per_sec
      },
      | None => {
        self.rate_limits.push(RateLimit { peer, window_start: now, count: 1 });
        false
      },
    }
  }

  fn parse_type_list(&self, payload: &[u8]) -> Vec<TlvType> {
    let Ok(Some(type_list)) = tlv::find(payload, 0, TYPE_LIST_TLV) else { return Vec::new() };
    let bytes = type_list.value(payload);

    let mut seen = Vec::new();
    for &b in bytes.iter().take(self.config.max_type_list_len) {
      if let Some(ty) = TlvType::from_byte(b) {
        if !seen.contains(&ty) {
          seen.push(ty);
        }
      }
    }
    seen
  }

  /// Build every answer fragment for `ctx`, consuming its remaining-types
  /// queue (spec §4.5 steps 3-5).
  fn build_answers(&mut self, ctx: &mut DiagQueryContext) -> Vec<AnswerMessage> {
    let mut finished = Vec::new();
    let mut current = Vec::new();
    if let Some(qid) = ctx.query_id {
      tlv::append_tlv(&mut current, QUERY_ID_TLV, &qid.to_be_bytes());
    }

    while let Some(ty) = ctx.remaining_types.pop_front() {
      if let Some(value) = self.responders.generate(ty) {
        tlv::append_tlv(&mut current, ty.to_byte(), &value);
      }

      if current.len() >= self.config.answer_length_threshold {
        let index = ctx.current_index;
        ctx.current_index += 1;
        append_answer_tlv(&mut current, index, true);
        finished.push(AnswerMessage { index, more_follows: true, payload: current });

        current = Vec::new();
        if let Some(qid) = ctx.query_id {
          tlv::append_tlv(&mut current, QUERY_ID_TLV, &qid.to_be_bytes());
        }
      }
    }

    let index = ctx.current_index;
    ctx.current_index += 1;
    append_answer_tlv(&mut current, index, false);
    finished.push(AnswerMessage { index, more_follows: false, payload: current });

    finished
  }

  fn handle_get(&mut self, peer: SocketAddr, req: CoapMessage) -> Result<(), Error> {
    let confirmable = req.ty == Type::Con;
    let query_id = parse_query_id(&req.payload);
    let types = self.parse_type_list(&req.payload);

    let mut ctx = DiagQueryContext::new(peer, query_id, types);
    let mut fragments: VecDeque<AnswerMessage> = self.build_answers(&mut ctx).into();

    if confirmable {
      // An empty ACK first, unconditionally; every fragment -- including
      // the first -- goes out through the same ack-gated push path (spec
      // §5: "fragment N+1 is not sent until fragment N's ACK arrives").
      self.agent.send_response(peer, CoapMessage::empty(Type::Ack, req.message_id))?;
      self.start_server_push(peer, fragments);
    } else {
      for fragment in fragments {
        let message_id = self.alloc_message_id();
        let message = CoapMessage { ty: Type::NonCon,
                                    code: Code::CONTENT_2_05,
                                    message_id,
                                    token: req.token.clone(),
                                    options: Vec::new(),
                                    payload: fragment.payload };
        if let Err(e) = self.agent.send_response(peer, message) {
          log::warn!("diag: non-confirmable answer send failed, dropping remaining fragments: {e}");
          break;
        }
      }
    }

    Ok(())
  }

  /// Send the next queued fragment to `peer` as a fresh confirmable
  /// message, or do nothing if `remaining` is empty. Any send failure
  /// frees the rest of `remaining` (spec §4.5 step 6, §7).
  fn start_server_push(&mut self, peer: SocketAddr, mut remaining: VecDeque<AnswerMessage>) {
    let Some(fragment) = remaining.pop_front() else { return };

    let message_id = self.alloc_message_id();
    let message = CoapMessage { ty: Type::Con,
                                code: Code::CONTENT_2_05,
                                message_id,
                                token: Vec::new(),
                                options: Vec::new(),
                                payload: fragment.payload };

    match self.agent.send_response(peer, message) {
      | Ok(()) => self.server_pushes.push(ServerPush { peer, message_id, remaining }),
      | Err(e) => {
        log::warn!("diag: dropping {} unsent answer fragment(s) after send failure: {e}", remaining.len())
      },
    }
  }

  /// An empty ACK arrived; if it completes one of our server pushes, send
  /// the next queued fragment (if any) and report that we handled it.
  fn try_complete_server_push(&mut self, peer: SocketAddr, message_id: u16) -> bool {
    let Some(idx) = self.server_pushes.iter().position(|p| p.peer == peer && p.message_id == message_id) else {
      return false;
    };
    let push = self.server_pushes.remove(idx);
    self.start_server_push(peer, push.remaining);
    true
  }

  fn handle_reset(&mut self, peer: SocketAddr, req: CoapMessage) -> Result<(), Error> {
    for ty in self.parse_type_list(&req.payload) {
      self.responders.reset(ty);
    }
    if req.ty == Type::Con {
      self.agent.send_response(peer, CoapMessage::empty(Type::Ack, req.message_id))?;
    }
    Ok(())
  }

  fn try_handle_diag_request(&mut self, peer: SocketAddr, msg: &CoapMessage) -> Result<bool, Error> {
    let segments = msg.uri_path_segments();

    if path_is(&segments, &["diag", "get", "qry"]) || path_is(&segments, &["diag", "get", "req"]) {
      self.handle_get(peer, msg.clone())?;
      return Ok(true);
    }
    if path_is(&segments, &["diag", "reset"]) {
      self.handle_reset(peer, msg.clone())?;
      return Ok(true);
    }
    Ok(false)
  }

  /// Deliver one answer fragment to the in-flight client query: enforce
  /// ordering, invoke the user callback, and drop the query on mismatch or
  /// completion (spec §4.5 "Client flow").
  fn deliver_client_answer(&mut self, peer: SocketAddr, payload: &[u8]) {
    let Ok(Some(answer)) = tlv::find(payload, 0, ANSWER_TLV) else { return };
    let value = answer.value(payload);
    if value.len() < 2 {
      return;
    }
    let index = value[0];
    let more_follows = value[1] != 0;

    match &self.client_query {
      | Some(query) if query.destination == peer && index == query.expected_next_index => {},
      | Some(query) if query.destination == peer => {
        if let Some(mut query) = self.client_query.take() {
          (query.callback)(DiagClientEvent::ResponseTimeout);
        }
        return;
      },
      | _ => return,
    }

    let tlvs = collect_response_tlvs(payload);
    let mut query = self.client_query.take().expect("checked Some above");
    query.expected_next_index += 1;
    (query.callback)(DiagClientEvent::Answer(tlvs));

    if more_follows {
      self.client_query = Some(query);
    }
  }

  /// A server-pushed answer fragment arrives as its own confirmable
  /// message (it isn't a response the agent's pending table is tracking,
  /// since the original request already completed via its empty ACK).
  /// Recognize and ACK it directly.
  fn try_deliver_client_answer(&mut self, peer: SocketAddr, msg: &CoapMessage) -> Result<bool, Error> {
    if msg.ty != Type::Con || !msg.code.is_success() {
      return Ok(false);
    }
    if !matches!(tlv::find(&msg.payload, 0, ANSWER_TLV), Ok(Some(_))) {
      return Ok(false);
    }
    let is_ours = matches!(&self.client_query, Some(q) if q.destination == peer);
    if !is_ours {
      return Ok(false);
    }

    self.deliver_client_answer(peer, &msg.payload);
    self.agent.send_response(peer, CoapMessage::empty(Type::Ack, msg.message_id))?;
    Ok(true)
  }

  fn drain_first_answer_events(&mut self) {
    let events: Vec<_> = self.first_answer_events.lock().unwrap().drain(..).collect();
    for (peer, outcome) in events {
      match outcome {
        | Outcome::Success(payload) => self.deliver_client_answer(peer, &payload),
        | Outcome::Timeout | Outcome::Reset | Outcome::Aborted => {
          if let Some(mut query) = self.client_query.take() {
            (query.callback)(DiagClientEvent::ResponseTimeout);
          }
        },
      }
    }
  }

  /// Deliver an inbound datagram. Diagnostic traffic is handled directly;
  /// anything else is forwarded to the owned `CoapAgent` unchanged.
  pub fn recv(&mut self, clock: &impl Clock, peer: SocketAddr, bytes: &[u8]) -> Result<(), Error> {
    let handled = match CoapMessage::from_bytes(bytes) {
      | Ok(msg) if msg.code.is_request() => self.try_handle_diag_request(peer, &msg)?,
      | Ok(msg) if msg.ty == Type::Ack => self.try_complete_server_push(peer, msg.message_id),
      | Ok(msg) => self.try_deliver_client_answer(peer, &msg)?,
      | Err(_) => false,
    };

    if !handled {
      self.agent.recv(clock, peer, bytes)?;
    }

    self.drain_first_answer_events();
    Ok(())
  }

  /// Drive the agent's retransmission timer.
  pub fn tick(&mut self, clock: &impl Clock) -> Result<(), Error> {
    self.agent.tick(clock)?;
    self.drain_first_answer_events();
    Ok(())
  }

  /// Send a `diag/get/{req,qry}` request and register the single in-flight
  /// callback (spec §4.5 "Client flow").
  pub fn send_diag_get(&mut self,
                        clock: &impl Clock,
                        peer: SocketAddr,
                        confirmable: bool,
                        query_id: Option<u16>,
                        types: &[TlvType],
                        callback: Box<dyn FnMut(DiagClientEvent) + Send>)
                        -> Result<(), Error> {
    if self.client_query.is_some() {
      return Err(When::DiagAnswer.what(Kind::Busy));
    }
    if self.rate_limited(clock, peer) {
      return Err(When::DiagAnswer.what(Kind::Busy));
    }

    let mut payload = Vec::new();
    if let Some(qid) = query_id {
      tlv::append_tlv(&mut payload, QUERY_ID_TLV, &qid.to_be_bytes());
    }
    let mut type_bytes = Vec::new();
    for ty in types.iter().take(self.config.max_type_list_len) {
      let b = ty.to_byte();
      if !type_bytes.contains(&b) {
        type_bytes.push(b);
      }
    }
    tlv::append_tlv(&mut payload, TYPE_LIST_TLV, &type_bytes);

    let uri_leaf = if confirmable { "req" } else { "qry" };
    let message = CoapMessage { ty: if confirmable { Type::Con } else { Type::NonCon },
                                code: Code::POST,
                                message_id: 0,
                                token: vec![self.alloc_token()],
                                options: vec![CoapOption::uri_path("diag"),
                                              CoapOption::uri_path("get"),
                                              CoapOption::uri_path(uri_leaf)],
                                payload };

    self.client_query = Some(ClientQuery { destination: peer, query_id, expected_next_index: 0, callback });

    let events = self.first_answer_events.clone();
    let result = self.agent.send_request(clock, peer, message, Box::new(move |outcome| {
                                     events.lock().unwrap().push_back((peer, outcome));
                                   }));

    if result.is_err() {
      self.client_query = None;
    }
    result
  }

  /// Send a `diag/reset` request (spec §4.5 "Also acts as a client:
  /// send-diag-get and send-diag-reset").
  pub fn send_diag_reset(&mut self,
                          clock: &impl Clock,
                          peer: SocketAddr,
                          types: &[TlvType],
                          callback: Box<dyn FnMut(Outcome) + Send>)
                          -> Result<(), Error> {
    let mut payload = Vec::new();
    let mut type_bytes = Vec::new();
    for ty in types.iter().take(self.config.max_type_list_len) {
      let b = ty.to_byte();
      if !type_bytes.contains(&b) {
        type_bytes.push(b);
      }
    }
    tlv::append_tlv(&mut payload, TYPE_LIST_TLV, &type_bytes);

    let message = CoapMessage { ty: Type::Con,
                                code: Code::POST,
                                message_id: 0,
                                token: vec![self.alloc_token()],
                                options: vec![CoapOption::uri_path("diag"), CoapOption::uri_path("reset")],
                                payload };

    self.agent.send_request(clock, peer, message, callback)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::net::test::{FakeEntropy, FakeTransport};
  use crate::time::test::FakeClock;

  fn engine() -> DiagEngine<FakeTransport> {
    DiagEngine::new(FakeTransport::new(),
                     Box::new(FakeEntropy::new(vec![0, 0])),
                     CoapConfig::default(),
                     DiagConfig::default(),
                     ResponderTable::new())
  }

  fn peer() -> SocketAddr {
    "127.0.0.1:61631".parse().unwrap()
  }

  fn request(uri: &[&str], ty: Type, message_id: u16, token: Vec<u8>, payload: Vec<u8>) -> Vec<u8> {
    CoapMessage { ty,
                 code: Code::POST,
                 message_id,
                 token,
                 options: uri.iter().map(|s| CoapOption::uri_path(*s)).collect(),
                 payload }.to_bytes()
                          .unwrap()
  }

  fn type_list_payload(query_id: Option<u16>, types: &[TlvType]) -> Vec<u8> {
    let mut payload = Vec::new();
    if let Some(qid) = query_id {
      tlv::append_tlv(&mut payload, QUERY_ID_TLV, &qid.to_be_bytes());
    }
    let bytes: Vec<u8> = types.iter().map(|t| t.to_byte()).collect();
    tlv::append_tlv(&mut payload, TYPE_LIST_TLV, &bytes);
    payload
  }

  #[test]
  fn single_fragment_answer_is_pushed_after_an_empty_ack() {
    let mut e = engine();
    e.responders_mut().register(TlvType::ShortAddress, Box::new(|| vec![0xAB, 0xCD]));

    let clock = FakeClock::new();
    let bytes = request(&["diag", "get", "req"], Type::Con, 0x10, vec![0xAA],
                        type_list_payload(Some(7), &[TlvType::ShortAddress]));

    e.recv(&clock, peer(), &bytes).unwrap();

    let sent = e.agent.transport_mut().drain();
    assert_eq!(sent.len(), 2);

    let ack = CoapMessage::from_bytes(sent[0].data()).unwrap();
    assert_eq!(ack.ty, Type::Ack);
    assert!(ack.is_empty_message());

    let push = CoapMessage::from_bytes(sent[1].data()).unwrap();
    assert_eq!(push.ty, Type::Con);
    assert_eq!(push.code, Code::CONTENT_2_05);

    let answer = tlv::find(&push.payload, 0, ANSWER_TLV).unwrap().unwrap();
    assert_eq!(answer.value(&push.payload), &[0u8, 0]); // index 0, more_follows=false

    let addr = tlv::find(&push.payload, 0, TlvType::ShortAddress.to_byte()).unwrap().unwrap();
    assert_eq!(addr.value(&push.payload), &[0xAB, 0xCD]);

    assert_eq!(e.server_pushes.len(), 1);
  }

  #[test]
  fn type_list_is_deduplicated() {
    let mut e = engine();
    let calls = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let calls2 = calls.clone();
    e.responders_mut().register(TlvType::Mode, Box::new(move || {
                           calls2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                           vec![1]
                         }));

    let clock = FakeClock::new();
    let bytes = request(&["diag", "get", "req"], Type::Con, 1, vec![],
                        type_list_payload(None, &[TlvType::Mode, TlvType::Mode, TlvType::Mode]));
    e.recv(&clock, peer(), &bytes).unwrap();

    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
  }

  #[test]
  fn pagination_splits_into_two_fragments_and_gates_the_second_on_an_ack() {
    let mut e = engine();
    e.config.answer_length_threshold = 1; // force a split after the first TLV
    e.responders_mut().register(TlvType::ShortAddress, Box::new(|| vec![1, 2]));
    e.responders_mut().register(TlvType::Mode, Box::new(|| vec![3]));

    let clock = FakeClock::new();
    let bytes = request(&["diag", "get", "req"], Type::Con, 2, vec![],
                        type_list_payload(Some(9), &[TlvType::ShortAddress, TlvType::Mode]));
    e.recv(&clock, peer(), &bytes).unwrap();

    let sent = e.agent.transport_mut().drain();
    // the empty Ack to the request, plus the first fragment pushed as its
    // own Con. The second fragment stays queued, gated on that Con's ACK.
    assert_eq!(sent.len(), 2);

    let ack = CoapMessage::from_bytes(sent[0].data()).unwrap();
    assert_eq!(ack.ty, Type::Ack);
    assert!(ack.is_empty_message());

    let first = CoapMessage::from_bytes(sent[1].data()).unwrap();
    assert_eq!(first.ty, Type::Con);
    let a0 = tlv::find(&first.payload, 0, ANSWER_TLV).unwrap().unwrap();
    assert_eq!(a0.value(&first.payload), &[0u8, 1]); // index 0, more=true

    assert_eq!(e.server_pushes.len(), 1);

    // Ack the first push; only now does the second fragment go out.
    let first_ack = CoapMessage::empty(Type::Ack, first.message_id).to_bytes().unwrap();
    e.recv(&clock, peer(), &first_ack).unwrap();

    let sent = e.agent.transport_mut().drain();
    assert_eq!(sent.len(), 1);
    let second = CoapMessage::from_bytes(sent[0].data()).unwrap();
    assert_eq!(second.ty, Type::Con);
    let a1 = tlv::find(&second.payload, 0, ANSWER_TLV).unwrap().unwrap();
    assert_eq!(a1.value(&second.payload), &[1u8, 0]); // index 1, more=false
  }

  #[test]
  fn reset_invokes_hook_and_sends_empty_ack() {
    let mut e = engine();
    let reset = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let reset2 = reset.clone();
    e.responders_mut().register_reset(TlvType::MacCounters, Box::new(move || {
                           reset2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                         }));

    let clock = FakeClock::new();
    let bytes = request(&["diag", "reset"], Type::Con, 3, vec![],
                        type_list_payload(None, &[TlvType::MacCounters]));
    e.recv(&clock, peer(), &bytes).unwrap();

    assert_eq!(reset.load(std::sync::atomic::Ordering::SeqCst), 1);
    let sent = e.agent.transport_mut().drain();
    assert_eq!(sent.len(), 1);
    let resp = CoapMessage::from_bytes(sent[0].data()).unwrap();
    assert!(resp.is_empty_message());
  }

  #[test]
  fn client_receives_single_fragment_answer_pushed_after_the_empty_ack() {
    let mut e = engine();
    let clock = FakeClock::new();

    let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let received2 = received.clone();

    e.send_diag_get(&clock, peer(), true, Some(5), &[TlvType::ShortAddress], Box::new(move |ev| {
        received2.lock().unwrap().push(ev);
      }))
     .unwrap();
    assert!(e.client_busy());

    let sent = e.agent.transport_mut().drain();
    assert_eq!(sent.len(), 1);
    let req = CoapMessage::from_bytes(sent[0].data()).unwrap();

    // The server's empty ACK completes the request without answering yet.
    let ack = CoapMessage::empty(Type::Ack, req.message_id).to_bytes().unwrap();
    e.recv(&clock, peer(), &ack).unwrap();
    assert!(e.client_busy());
    assert!(received.lock().unwrap().is_empty());

    let mut answer_payload = Vec::new();
    tlv::append_tlv(&mut answer_payload, QUERY_ID_TLV, &5u16.to_be_bytes());
    tlv::append_tlv(&mut answer_payload, TlvType::ShortAddress.to_byte(), &[9, 9]);
    append_answer_tlv(&mut answer_payload, 0, false);

    let push = CoapMessage { ty: Type::Con,
                             code: Code::CONTENT_2_05,
                             message_id: 0x55,
                             token: Vec::new(),
                             options: Vec::new(),
                             payload: answer_payload }.to_bytes()
                                                       .unwrap();

    e.recv(&clock, peer(), &push).unwrap();

    assert!(!e.client_busy());
    let events = received.lock().unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
      | DiagClientEvent::Answer(tlvs) => {
        assert_eq!(tlvs, &vec![(TlvType::ShortAddress.to_byte(), vec![9, 9])]);
      },
      | other => panic!("expected Answer, got {other:?}"),
    }

    // The client ACKs the pushed fragment in turn.
    let sent = e.agent.transport_mut().drain();
    assert_eq!(sent.len(), 1);
    let fragment_ack = CoapMessage::from_bytes(sent[0].data()).unwrap();
    assert_eq!(fragment_ack.ty, Type::Ack);
    assert_eq!(fragment_ack.message_id, 0x55);
  }

  #[test]
  fn out_of_order_answer_index_drops_the_query() {
    let mut e = engine();
    let clock = FakeClock::new();

    let events = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let events2 = events.clone();
    e.send_diag_get(&clock, peer(), true, None, &[TlvType::Mode], Box::new(move |ev| events2.lock().unwrap().push(ev)))
     .unwrap();

    let sent = e.agent.transport_mut().drain();
    let req = CoapMessage::from_bytes(sent[0].data()).unwrap();

    let mut bad_payload = Vec::new();
    append_answer_tlv(&mut bad_payload, 1, false); // expected index 0, got 1

    let ack = CoapMessage { ty: Type::Ack,
                            code: Code::CONTENT_2_05,
                            message_id: req.message_id,
                            token: req.token,
                            options: Vec::new(),
                            payload: bad_payload }.to_bytes()
                                                   .unwrap();
    e.recv(&clock, peer(), &ack).unwrap();

    assert!(!e.client_busy());
    let events = events.lock().unwrap();
    assert_eq!(events.as_slice(), &[DiagClientEvent::ResponseTimeout]);
  }

  #[test]
  fn second_in_flight_query_is_rejected_while_busy() {
    let mut e = engine();
    let clock = FakeClock::new();
    e.send_diag_get(&clock, peer(), true, None, &[TlvType::Mode], Box::new(|_| {})).unwrap();

    let err = e.send_diag_get(&clock, peer(), true, None, &[TlvType::Mode], Box::new(|_| {}))
               .unwrap_err();
    assert_eq!(err.what, Kind::Busy);
  }
}
