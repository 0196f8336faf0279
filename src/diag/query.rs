//! Per-query bookkeeping on both sides of the diagnostic exchange (spec
//! §3.6).

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::diag::tlv_types::TlvType;

/// One answer fragment, built and queued for transmission (spec §4.5 steps
/// 4-5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerMessage {
  /// Zero-based position in the fragment sequence.
  pub index: u8,
  /// Whether another fragment follows this one.
  pub more_follows: bool,
  /// The fully-built CoAP payload (Query-Id TLV, response TLVs, Answer
  /// TLV) ready to send as-is.
  pub payload: Vec<u8>,
}

/// Server-side state for one in-flight diagnostic query (spec §3.6).
///
/// Created per inbound `diag/get/qry` or `diag/get/req`; the spec's "first
/// -allocated answer-message pointer (head of a linked chain in the answer
/// queue)" is represented here as the plain `VecDeque` `answers` builds up
/// into -- there is no separate pointer to track since Rust's owned
/// collection already is the chain.
pub struct DiagQueryContext {
  /// Who this query came from (and where the answers are addressed).
  pub destination: SocketAddr,
  /// The optional 16-bit correlator carried by the request, echoed into
  /// every answer fragment.
  pub query_id: Option<u16>,
  /// The next answer-fragment index to allocate.
  pub current_index: u8,
  /// Completed answer fragments, in transmission order.
  pub answers: VecDeque<AnswerMessage>,
  /// TLV types not yet appended to the answer under construction, in
  /// request order with duplicates already removed.
  pub remaining_types: VecDeque<TlvType>,
}

impl DiagQueryContext {
  /// Start a new query context. `types` is de-duplicated, first occurrence
  /// wins (spec §8 scenario 6).
  pub fn new(destination: SocketAddr, query_id: Option<u16>, types: Vec<TlvType>) -> Self {
    let mut seen = Vec::new();
    let mut remaining = VecDeque::new();
    for ty in types {
      if !seen.contains(&ty) {
        seen.push(ty);
        remaining.push_back(ty);
      }
    }

    Self { destination, query_id, current_index: 0, answers: VecDeque::new(), remaining_types: remaining }
  }
}

/// What a client-side [`crate::diag::engine::DiagEngine::send_diag_get`]
/// callback is invoked with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagClientEvent {
  /// One answer fragment arrived, with its response TLVs parsed as
  /// `(type-code, value-bytes)` pairs. Framing TLVs (Query-Id, Type-List,
  /// Answer) are not included.
  Answer(Vec<(u8, Vec<u8>)>),
  /// The request timed out, was reset, was aborted, or an answer arrived
  /// out of order; the in-flight query has been dropped (spec §4.5:
  /// "invoke the callback with ResponseTimeout and drop the in-flight
  /// query").
  ResponseTimeout,
}

/// Client-side state for the single in-flight diagnostic query (spec §4.5:
/// "stores a single in-flight query-id and callback").
pub struct ClientQuery {
  /// The peer this query was sent to; later answers are only accepted from
  /// this address.
  pub destination: SocketAddr,
  /// The query-id this request was sent with, if any.
  pub query_id: Option<u16>,
  /// The next answer index this query expects (starts at 0, must advance
  /// by exactly one per answer).
  pub expected_next_index: u8,
  /// Invoked once per answer, and once more with `ResponseTimeout` on
  /// failure.
  pub callback: Box<dyn FnMut(DiagClientEvent) + Send>,
}

#[cfg(test)]
mod test {
  use super::*;

  fn peer() -> SocketAddr {
    "127.0.0.1:61631".parse().unwrap()
  }

  #[test]
  fn duplicate_types_are_collapsed_keeping_first_occurrence_order() {
    let types = vec![TlvType::ShortAddress, TlvType::Mode, TlvType::Mode, TlvType::Timeout, TlvType::ShortAddress];
    let ctx = DiagQueryContext::new(peer(), Some(7), types);
    let remaining: Vec<_> = ctx.remaining_types.into_iter().collect();
    assert_eq!(remaining, vec![TlvType::ShortAddress, TlvType::Mode, TlvType::Timeout]);
  }

  #[test]
  fn fresh_context_starts_at_index_zero_with_no_answers() {
    let ctx = DiagQueryContext::new(peer(), None, vec![]);
    assert_eq!(ctx.current_index, 0);
    assert!(ctx.answers.is_empty());
  }
}
