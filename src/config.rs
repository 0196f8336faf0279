//! Runtime configuration for every subsystem.
//!
//! Mirrors `toad::config::Config`'s shape: one struct per subsystem, each
//! `Default`-constructible with the constants the spec names.

use crate::retry::{Attempts, Strategy};
use crate::time::Millis;

/// Configuration for [`crate::messaging_core::MessagingCore`] and
/// [`crate::coap`]'s confirmable-message retransmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoapConfig {
  /// `ACK_TIMEOUT`, in milliseconds. Default 2000.
  pub ack_timeout: Millis,
  /// `ACK_RANDOM_FACTOR`, expressed as `ack_timeout * ack_random_factor_pct
  /// / 100` for the upper bound of the initial retransmission window.
  /// Default 150 (i.e. 1.5).
  pub ack_random_factor_pct: u32,
  /// `MAX_RETRANSMIT`. Default 4.
  pub max_retransmit: Attempts,
  /// `NSTART`: max concurrent confirmable exchanges per peer. Default 1.
  pub nstart: u8,
  /// `MAX_LATENCY`, in milliseconds. Default 100_000.
  pub max_latency: Millis,
  /// `PROCESSING_DELAY`, in milliseconds. Defaults to `ack_timeout`.
  pub processing_delay: Millis,
}

impl Default for CoapConfig {
  fn default() -> Self {
    Self { ack_timeout: 2_000,
           ack_random_factor_pct: 150,
           max_retransmit: Attempts(4),
           nstart: 1,
           max_latency: 100_000,
           processing_delay: 2_000 }
  }
}

impl CoapConfig {
  /// The retry strategy for confirmable requests, derived from
  /// `ack_timeout`/`ack_random_factor_pct`.
  pub fn retry_strategy(&self) -> Strategy {
    Strategy::Exponential { init_min: self.ack_timeout,
                            init_max: self.ack_timeout * self.ack_random_factor_pct as u64
                                      / 100 }
  }

  /// `MAX_TRANSMIT_SPAN`: worst-case time from the first transmission to the
  /// last retransmission of a confirmable message.
  pub fn max_transmit_span(&self) -> Millis {
    self.retry_strategy().max_time(self.max_retransmit - Attempts(1))
  }

  /// `MAX_TRANSMIT_WAIT`: worst-case time from the first transmission to
  /// when the sender gives up entirely.
  pub fn max_transmit_wait(&self) -> Millis {
    self.retry_strategy().max_time(self.max_retransmit)
  }

  /// `MAX_RTT`: an upper bound on round-trip-time.
  pub fn max_rtt(&self) -> Millis {
    2 * self.max_latency + self.ack_timeout
  }

  /// `EXCHANGE_LIFETIME` = `MAX_TRANSMIT_SPAN + 2*MAX_LATENCY + PROCESSING_DELAY`.
  pub fn exchange_lifetime(&self) -> Millis {
    self.max_transmit_span() + 2 * self.max_latency + self.processing_delay
  }

  /// `NON_LIFETIME` = `MAX_TRANSMIT_SPAN + MAX_LATENCY`.
  pub fn non_lifetime(&self) -> Millis {
    self.max_transmit_span() + self.max_latency
  }
}

impl core::ops::Sub<Attempts> for Attempts {
  type Output = Attempts;

  fn sub(self, rhs: Attempts) -> Attempts {
    Attempts(self.0.saturating_sub(rhs.0))
  }
}

/// Per-queue retry defaults for [`crate::mqttsn::client::MqttSnClient`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MqttSnConfig {
  /// Retransmission timeout for any pending queue entry, in milliseconds.
  pub retry_timeout: Millis,
  /// Number of retransmission attempts before declaring Timeout.
  pub retry_count: u8,
  /// Fraction of `keepalive` (as a percent) at which PINGREQ is sent.
  /// Default 70 (i.e. 0.7 x keepalive).
  pub keepalive_ping_pct: u32,
  /// Capacity of the supplemented gateway table (populated by
  /// SEARCHGW/GWINFO/ADVERTISE). Default 16.
  pub gateway_table_capacity: usize,
}

impl Default for MqttSnConfig {
  fn default() -> Self {
    Self { retry_timeout: 10_000, retry_count: 3, keepalive_ping_pct: 70, gateway_table_capacity: 16 }
  }
}

/// Configuration for [`crate::diag::engine::DiagEngine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagConfig {
  /// Answer fragment size threshold, in bytes. Default 800.
  pub answer_length_threshold: usize,
  /// Maximum number of entries accepted in an inbound Type-List TLV.
  /// Default 64 (see spec §9's audit note on unbounded Type-List).
  pub max_type_list_len: usize,
  /// Optional per-peer query rate limit (queries per second); `None`
  /// disables the limiter. Default `None`.
  pub query_rate_limit_per_sec: Option<u32>,
}

impl Default for DiagConfig {
  fn default() -> Self {
    Self { answer_length_threshold: 800, max_type_list_len: 64, query_rate_limit_per_sec: None }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn default_exchange_lifetime_is_derived_consistently() {
    let cfg = CoapConfig::default();
    // init_max = 2000 * 150 / 100 = 3000; span uses (max_retransmit - 1) = 3
    // attempts: 3000 * 2^(3-1) = 12_000.
    assert_eq!(cfg.max_transmit_span(), 12_000);
    assert_eq!(cfg.exchange_lifetime(), 12_000 + 2 * 100_000 + 2_000);
  }
}
