//! Diagnostic TLV type catalog and pluggable response/reset hooks (spec
//! §4.5).
//!
//! `original_source/src/core/thread/network_diagnostic.cpp` switches on
//! `Tlv::kExtMacAddress`, `Tlv::kAddress16`, etc., but the header that
//! assigns those names their numeric codes is not part of this pack (only
//! `link_metrics_tlvs.hpp` and `history_tracker_tlvs.hpp` ship, neither of
//! which is the network-diagnostic registry). Per the toolkit's own
//! "no central registry in scope" note, this module assigns its own 1-byte
//! codes below rather than guessing at unavailable values.

use std::collections::HashMap;

/// Reserved type code marking the Query-Id TLV (spec §3.6).
pub const QUERY_ID_TLV: u8 = 0xF0;
/// Reserved type code marking the Type-List TLV (spec §4.5 step 2).
pub const TYPE_LIST_TLV: u8 = 0xF1;
/// Reserved type code marking the Answer TLV (spec §4.5 step 4-5).
pub const ANSWER_TLV: u8 = 0xF2;

macro_rules! tlv_catalog {
  ($($variant:ident = $code:literal),+ $(,)?) => {
    /// One of the pluggable diagnostic response TLV types enumerated in
    /// spec §4.5 step 3.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TlvType {
      $(#[allow(missing_docs)] $variant),+
    }

    impl TlvType {
      /// This type's locally-assigned 1-byte wire code.
      pub fn to_byte(self) -> u8 {
        match self {
          $(TlvType::$variant => $code),+
        }
      }

      /// Look up a [`TlvType`] from its wire code.
      pub fn from_byte(b: u8) -> Option<TlvType> {
        match b {
          $($code => Some(TlvType::$variant),)+
          _ => None,
        }
      }

      /// Every catalogued type, in the order spec §4.5 step 3 lists them.
      pub fn all() -> &'static [TlvType] {
        &[$(TlvType::$variant),+]
      }
    }
  };
}

tlv_catalog! {
  ExtendedMacAddress = 0,
  ShortAddress = 1,
  Mode = 2,
  Timeout = 3,
  Connectivity = 4,
  Route = 5,
  LeaderData = 6,
  NetworkData = 7,
  Ipv6AddressList = 8,
  MacCounters = 9,
  MleCounters = 10,
  BatteryLevel = 11,
  SupplyVoltage = 12,
  ChildTable = 13,
  ChannelPages = 14,
  MaxChildTimeout = 15,
  VendorName = 16,
  VendorModel = 17,
  VendorSwVersion = 18,
  VendorAppUrl = 19,
  ThreadStackVersion = 20,
  Version = 21,
}

/// A generator invoked to produce one response TLV's value bytes.
pub type Generator = Box<dyn FnMut() -> Vec<u8> + Send>;
/// A hook invoked to reset whatever state backs a response TLV (spec §4.5
/// "Reset flow").
pub type ResetHook = Box<dyn FnMut() + Send>;

/// Pluggable response-TLV generators and reset hooks (spec §4.5: "Response
/// TLV generators are pluggable").
///
/// A type with no registered generator is silently skipped when building an
/// answer; a type with no registered reset hook is silently skipped during
/// a reset request.
#[derive(Default)]
pub struct ResponderTable {
  generators: HashMap<TlvType, Generator>,
  resets: HashMap<TlvType, ResetHook>,
}

impl ResponderTable {
  /// An empty table; the embedder registers whichever TLVs it supports.
  pub fn new() -> Self {
    Self::default()
  }

  /// Register (or replace) the generator for `ty`.
  pub fn register(&mut self, ty: TlvType, generate: Generator) {
    self.generators.insert(ty, generate);
  }

  /// Register (or replace) the reset hook for `ty`.
  pub fn register_reset(&mut self, ty: TlvType, hook: ResetHook) {
    self.resets.insert(ty, hook);
  }

  /// Produce `ty`'s current value, or `None` if nothing is registered for
  /// it (the caller then omits the TLV entirely).
  pub fn generate(&mut self, ty: TlvType) -> Option<Vec<u8>> {
    self.generators.get_mut(&ty).map(|g| g())
  }

  /// Invoke `ty`'s reset hook, if any is registered.
  pub fn reset(&mut self, ty: TlvType) {
    if let Some(hook) = self.resets.get_mut(&ty) {
      hook();
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn byte_codes_round_trip_for_every_catalogued_type() {
    for ty in TlvType::all() {
      assert_eq!(TlvType::from_byte(ty.to_byte()), Some(*ty));
    }
  }

  #[test]
  fn unknown_byte_code_is_none() {
    assert_eq!(TlvType::from_byte(0xAA), None);
  }

  #[test]
  fn generate_returns_none_when_unregistered() {
    let mut table = ResponderTable::new();
    assert_eq!(table.generate(TlvType::Mode), None);
  }

  #[test]
  fn registered_generator_is_invoked() {
    let mut table = ResponderTable::new();
    table.register(TlvType::ShortAddress, Box::new(|| vec![0x12, 0x34]));
    assert_eq!(table.generate(TlvType::ShortAddress), Some(vec![0x12, 0x34]));
  }

  #[test]
  fn reset_hook_runs_exactly_once_per_call() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let calls = Arc::new(AtomicUsize::new(0));
    let calls2 = calls.clone();

    let mut table = ResponderTable::new();
    table.register_reset(TlvType::MacCounters, Box::new(move || {
            calls2.fetch_add(1, Ordering::SeqCst);
          }));

    table.reset(TlvType::MacCounters);
    table.reset(TlvType::MacCounters);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn reset_on_unregistered_type_is_a_no_op() {
    let mut table = ResponderTable::new();
    table.reset(TlvType::Version); // must not panic
  }
}
