//! [`CoapAgent`]: the request/response/routing surface built on top of
//! [`crate::messaging_core::MessagingCore`] (spec §4.3).

use std::net::SocketAddr;

use crate::coap::header::{Code, Header, Type};
use crate::coap::message::CoapMessage;
use crate::coap::resource::{CoapResource, ResourceHandler, ResourceResponse};
use crate::codec::FrameData;
use crate::config::CoapConfig;
use crate::error::{Error, Kind, When};
use crate::messaging_core::{ExchangeKey, MessagingCore, Outcome};
use crate::net::{Entropy, Transport};
use crate::time::Clock;

/// Intercepts every outbound datagram before it reaches the transport.
/// [`crate::dtls::transport::DtlsTransport`] installs one of these to
/// redirect plaintext bytes into its own encrypt-then-enqueue pipeline
/// (spec §4.3, "set-send-interceptor (for transport wrapping)").
pub type SendInterceptor = Box<dyn FnMut(SocketAddr, &[u8]) + Send>;

/// The CoAP request/response engine: owns the pending-request table, the
/// registered resource list, and the transport it sends through.
pub struct CoapAgent<T: Transport> {
  transport: T,
  entropy: Box<dyn Entropy + Send>,
  core: MessagingCore,
  resources: Vec<CoapResource>,
  default_handler: Option<ResourceHandler>,
  send_interceptor: Option<SendInterceptor>,
}

impl<T: Transport> CoapAgent<T> {
  /// Construct a new agent over `transport`, using `entropy` for token/
  /// message-id jitter.
  pub fn new(transport: T, entropy: Box<dyn Entropy + Send>, config: CoapConfig) -> Self {
    Self { transport,
           entropy,
           core: MessagingCore::new(config),
           resources: Vec::new(),
           default_handler: None,
           send_interceptor: None }
  }

  /// Register a resource. Later registrations do not shadow earlier ones
  /// with the same uri-path; the first-registered, first-matching resource
  /// always wins (spec §3.3, first match wins).
  pub fn add_resource(&mut self, resource: CoapResource) {
    self.resources.push(resource);
  }

  /// Remove the resource registered at this uri-path, if any.
  pub fn remove_resource(&mut self, uri_path: &[String]) {
    self.resources.retain(|r| r.uri_path() != uri_path);
  }

  /// Install a catch-all handler invoked when no resource matches.
  pub fn set_default_handler(&mut self, handler: ResourceHandler) {
    self.default_handler = Some(handler);
  }

  /// Install a send interceptor (spec §4.3: "for transport wrapping").
  pub fn set_send_interceptor(&mut self, interceptor: SendInterceptor) {
    self.send_interceptor = Some(interceptor);
  }

  /// Borrow the underlying transport (embedders composing an agent into a
  /// larger subsystem, e.g. `DiagEngine`, need this for test introspection
  /// and for reading `local_addr`).
  pub fn transport(&self) -> &T {
    &self.transport
  }

  /// Mutably borrow the underlying transport.
  pub fn transport_mut(&mut self) -> &mut T {
    &mut self.transport
  }

  fn transmit(&mut self, peer: SocketAddr, bytes: &[u8]) -> Result<(), Error> {
    if let Some(interceptor) = &mut self.send_interceptor {
      interceptor(peer, bytes);
      return Ok(());
    }

    nb::block!(self.transport.send(peer, bytes)).map_err(|e| {
                                                   log::warn!("coap: transport send to {peer} failed: {e:?}");
                                                   When::SendingCoapRequest.what(Kind::NoBuffer)
                                                 })
  }

  /// Send a request. `message.message_id == 0` means "let the agent
  /// assign one" (spec §4.2).
  pub fn send_request(&mut self,
                       clock: &impl Clock,
                       peer: SocketAddr,
                       mut message: CoapMessage,
                       callback: Box<dyn FnMut(Outcome) + Send>)
                       -> Result<(), Error> {
    if message.message_id == 0 {
      message.message_id = self.core.next_message_id();
    }

    let bytes = message.to_bytes()?;
    let key = ExchangeKey { peer, message_id: message.message_id, token: message.token.clone() };

    match message.ty {
      | Type::Con => self.core.enqueue_confirmable(clock, &mut *self.entropy, key, bytes.clone(), callback)?,
      | Type::NonCon => self.core.track_non_confirmable(clock, key, callback),
      | Type::Ack | Type::Rst => {
        return Err(When::SendingCoapRequest.what(Kind::InvalidArgument("requests must be Con or NonCon")))
      },
    }

    self.transmit(peer, &bytes)
  }

  /// Send a response (including empty ACKs/RSTs).
  pub fn send_response(&mut self, peer: SocketAddr, response: CoapMessage) -> Result<(), Error> {
    let bytes = response.to_bytes()?;
    self.transmit(peer, &bytes)
  }

  /// Drive the retransmission timer.
  pub fn tick(&mut self, clock: &impl Clock) -> Result<(), Error> {
    for (peer, bytes) in self.core.tick(clock) {
      self.transmit(peer, &bytes)?;
    }
    Ok(())
  }

  /// Deliver an inbound datagram from `peer`.
  pub fn recv(&mut self, clock: &impl Clock, peer: SocketAddr, bytes: &[u8]) -> Result<(), Error> {
    let msg = match CoapMessage::from_bytes(bytes) {
      | Ok(m) => m,
      | Err(e) => {
        log::debug!("coap: dropping unparseable datagram from {peer}: {e}");
        let mut data = FrameData::new(bytes);
        if let Ok(header) = Header::decode(&mut data) {
          if header.ty == Type::Con {
            let rst = CoapMessage::empty(Type::Rst, header.message_id);
            let _ = self.send_response(peer, rst);
          }
        }
        return Ok(());
      },
    };

    match msg.ty {
      | Type::Ack => {
        let payload = if msg.is_empty_message() { None } else { Some(msg.payload) };
        self.core.deliver_ack(peer, msg.message_id, &msg.token, payload);
        Ok(())
      },
      | Type::Rst => {
        self.core.deliver_reset(peer, msg.message_id, &msg.token);
        Ok(())
      },
      | Type::Con | Type::NonCon => self.handle_con_or_non(clock, peer, msg),
    }
  }

  fn handle_con_or_non(&mut self, clock: &impl Clock, peer: SocketAddr, msg: CoapMessage) -> Result<(), Error> {
    if msg.code.is_request() {
      return self.handle_request(clock, peer, msg);
    }

    if msg.code.is_empty() {
      // An empty Con/NonCon with no payload is a ping; RST it if Con.
      if msg.ty == Type::Con {
        let rst = CoapMessage::empty(Type::Rst, msg.message_id);
        self.send_response(peer, rst)?;
      }
      return Ok(());
    }

    // A separate response (arrived after an earlier empty ACK).
    if self.core.deliver_separate_response(peer, &msg.token, msg.payload) {
      if msg.ty == Type::Con {
        let ack = CoapMessage::empty(Type::Ack, msg.message_id);
        self.send_response(peer, ack)?;
      }
    } else if msg.ty == Type::Con {
      log::debug!("coap: spurious confirmable response from {peer}, sending RST");
      let rst = CoapMessage::empty(Type::Rst, msg.message_id);
      self.send_response(peer, rst)?;
    }

    Ok(())
  }

  fn handle_request(&mut self, clock: &impl Clock, peer: SocketAddr, req: CoapMessage) -> Result<(), Error> {
    let _ = clock;
    let segments = req.uri_path_segments();

    let resp = if let Some(resource) = self.resources.iter_mut().find(|r| r.matches(&segments)) {
      resource.handle(&req, peer)
    } else if let Some(handler) = &mut self.default_handler {
      handler(&req, peer)
    } else {
      ResourceResponse::code_only(Code::NOT_FOUND_4_04)
    };

    let (response_ty, message_id) = match req.ty {
      | Type::Con => (Type::Ack, req.message_id),
      | _ => (Type::NonCon, self.core.next_message_id()),
    };

    let response = CoapMessage { ty: response_ty,
                                 code: resp.code,
                                 message_id,
                                 token: req.token.clone(),
                                 options: resp.options,
                                 payload: resp.payload };

    self.send_response(peer, response)
  }
}

#[cfg(test)]
mod test {
  use std::sync::{Arc, Mutex};

  use super::*;
  use crate::coap::option::CoapOption;
  use crate::net::test::{FakeEntropy, FakeTransport};
  use crate::time::test::FakeClock;

  fn agent() -> CoapAgent<FakeTransport> {
    CoapAgent::new(FakeTransport::new(), Box::new(FakeEntropy::new(vec![0, 0])), CoapConfig::default())
  }

  #[test]
  fn unmatched_request_gets_not_found() {
    let mut agent = agent();
    let clock = FakeClock::new();
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();

    let req = CoapMessage { ty: Type::Con,
                            code: Code::GET,
                            message_id: 1,
                            token: vec![],
                            options: vec![CoapOption::uri_path("nope")],
                            payload: vec![] };
    let bytes = req.to_bytes().unwrap();

    agent.recv(&clock, peer, &bytes).unwrap();

    let sent = agent.transport.drain();
    assert_eq!(sent.len(), 1);
    let resp = CoapMessage::from_bytes(sent[0].data()).unwrap();
    assert_eq!(resp.code, Code::NOT_FOUND_4_04);
    assert_eq!(resp.ty, Type::Ack);
  }

  #[test]
  fn matching_resource_handles_request() {
    let mut agent = agent();
    let clock = FakeClock::new();
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();

    agent.add_resource(CoapResource::new(vec!["diag".into(), "get".into(), "req".into()],
                                         Box::new(|_, _| ResourceResponse { code: Code::CHANGED_2_04,
                                                                            options: vec![],
                                                                            payload: vec![9] })));

    let req = CoapMessage { ty: Type::Con,
                            code: Code::POST,
                            message_id: 2,
                            token: vec![0xAA],
                            options: vec![CoapOption::uri_path("diag"),
                                          CoapOption::uri_path("get"),
                                          CoapOption::uri_path("req")],
                            payload: vec![] };
    agent.recv(&clock, peer, &req.to_bytes().unwrap()).unwrap();

    let sent = agent.transport.drain();
    let resp = CoapMessage::from_bytes(sent[0].data()).unwrap();
    assert_eq!(resp.code, Code::CHANGED_2_04);
    assert_eq!(resp.payload, vec![9]);
    assert_eq!(resp.token, vec![0xAA]);
  }

  #[test]
  fn piggybacked_ack_completes_pending_request() {
    let mut agent = agent();
    let clock = FakeClock::new();
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let outcome2 = outcome.clone();

    let req = CoapMessage { ty: Type::Con,
                            code: Code::GET,
                            message_id: 1,
                            token: vec![0xAA],
                            options: vec![],
                            payload: vec![] };
    agent.send_request(&clock, peer, req, Box::new(move |o| *outcome2.lock().unwrap() = Some(o))).unwrap();
    agent.transport.drain();

    let ack = CoapMessage { ty: Type::Ack,
                            code: Code::CONTENT_2_05,
                            message_id: 1,
                            token: vec![0xAA],
                            options: vec![],
                            payload: vec![0x10, 0x20] };
    agent.recv(&clock, peer, &ack.to_bytes().unwrap()).unwrap();

    assert_eq!(*outcome.lock().unwrap(), Some(Outcome::Success(vec![0x10, 0x20])));
  }

  #[test]
  fn unparseable_confirmable_datagram_gets_reset() {
    let mut agent = agent();
    let clock = FakeClock::new();
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();

    // Valid 4-byte header (Con, token_len=0), but then garbage option bytes
    // that underflow the buffer.
    let bytes = vec![0b0100_0000u8, 1, 0, 5, 0b1111_0000];
    agent.recv(&clock, peer, &bytes).unwrap();

    let sent = agent.transport.drain();
    assert_eq!(sent.len(), 1);
    let rst = CoapMessage::from_bytes(sent[0].data()).unwrap();
    assert_eq!(rst.ty, Type::Rst);
    assert_eq!(rst.message_id, 5);
  }
}
