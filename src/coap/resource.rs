//! [`CoapResource`]: a routed handler for inbound requests (spec §3.3).

use std::net::SocketAddr;

use crate::coap::header::Code;
use crate::coap::message::CoapMessage;
use crate::coap::option::CoapOption;

/// What a resource (or the default handler) hands back to
/// [`crate::coap::agent::CoapAgent`] to send as the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
  /// Response code.
  pub code: Code,
  /// Response options.
  pub options: Vec<CoapOption>,
  /// Response payload.
  pub payload: Vec<u8>,
}

impl ResourceResponse {
  /// A response carrying a code and no options/payload.
  pub fn code_only(code: Code) -> ResourceResponse {
    ResourceResponse { code, options: Vec::new(), payload: Vec::new() }
  }
}

/// A request handler, invoked with the decoded request and its sender.
pub type ResourceHandler = Box<dyn FnMut(&CoapMessage, SocketAddr) -> ResourceResponse + Send>;

/// A `(uri-path, handler)` pair (spec §3.3's context collapses into the
/// handler closure's captures, per the design notes on callback+context
/// pairs). Resources are stored in an ordered `Vec` and matched by a linear
/// scan, first match wins; they are pinned in place while registered
/// (never moved out from under an in-flight request) because routing and
/// dispatch happen synchronously within one `recv` call.
pub struct CoapResource {
  uri_path: Vec<String>,
  handler: ResourceHandler,
}

impl CoapResource {
  /// Register a resource at the given uri-path segments (e.g.
  /// `["diag", "get", "req"]`).
  pub fn new(uri_path: Vec<String>, handler: ResourceHandler) -> CoapResource {
    CoapResource { uri_path, handler }
  }

  /// This resource's uri-path segments.
  pub fn uri_path(&self) -> &[String] {
    &self.uri_path
  }

  /// Does this resource's uri-path exactly match `segments`?
  pub fn matches(&self, segments: &[String]) -> bool {
    self.uri_path == segments
  }

  /// Invoke the handler.
  pub fn handle(&mut self, req: &CoapMessage, peer: SocketAddr) -> ResourceResponse {
    (self.handler)(req, peer)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::coap::header::Type;

  #[test]
  fn matches_requires_exact_segment_equality() {
    let resource = CoapResource::new(vec!["diag".into(), "get".into(), "req".into()],
                                     Box::new(|_, _| ResourceResponse::code_only(Code::CONTENT_2_05)));

    assert!(resource.matches(&["diag".to_string(), "get".to_string(), "req".to_string()]));
    assert!(!resource.matches(&["diag".to_string(), "get".to_string()]));
  }

  #[test]
  fn handle_invokes_closure() {
    let mut resource =
      CoapResource::new(vec!["x".into()], Box::new(|_, _| ResourceResponse::code_only(Code::CHANGED_2_04)));
    let req = CoapMessage { ty: Type::Con, code: Code::GET, message_id: 1, token: vec![], options: vec![], payload: vec![] };
    let peer: SocketAddr = "127.0.0.1:5683".parse().unwrap();
    let resp = resource.handle(&req, peer);
    assert_eq!(resp.code, Code::CHANGED_2_04);
  }
}
