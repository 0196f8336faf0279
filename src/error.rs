//! Crate-wide error taxonomy.
//!
//! Every fallible operation in this crate returns exactly one [`Error`]
//! variant, matching the taxonomy and locality rules described in the design
//! document's error handling section.

use core::fmt;

/// The context an error occurred in, used to enrich [`Error`]'s `Display`
/// output without adding a second enum per subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
  /// Sending a confirmable or non-confirmable CoAP request.
  SendingCoapRequest,
  /// Sending a CoAP response.
  SendingCoapResponse,
  /// Parsing an inbound datagram.
  Parsing,
  /// Driving the DTLS handshake.
  DtlsHandshake,
  /// An MQTT-SN client operation (connect, publish, subscribe, ...).
  MqttSnOperation,
  /// Building or transmitting a diagnostic answer.
  DiagAnswer,
  /// No particular context is relevant.
  None,
}

impl When {
  /// Attach a [`Kind`] to this context, producing a full [`Error`].
  pub fn what(self, what: Kind) -> Error {
    Error { when: self, what }
  }
}

impl fmt::Display for When {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | When::SendingCoapRequest => write!(f, "sending a CoAP request"),
      | When::SendingCoapResponse => write!(f, "sending a CoAP response"),
      | When::Parsing => write!(f, "parsing an inbound datagram"),
      | When::DtlsHandshake => write!(f, "driving the DTLS handshake"),
      | When::MqttSnOperation => write!(f, "an MQTT-SN client operation"),
      | When::DiagAnswer => write!(f, "building or transmitting a diagnostic answer"),
      | When::None => write!(f, "an unspecified operation"),
    }
  }
}

/// The kind of failure that occurred, independent of context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
  /// Out-of-range input from a caller.
  InvalidArgument(&'static str),
  /// Operation forbidden in the current state machine state.
  InvalidState,
  /// The message-buffer pool is exhausted.
  NoBuffer,
  /// Wire bytes could not be decoded.
  Parse(&'static str),
  /// The retransmission budget was exhausted.
  Timeout,
  /// The owning subsystem was shut down, or the DTLS session was
  /// disconnected, mid-operation.
  Aborted,
  /// A DTLS handshake or certificate-verification failure.
  Security(&'static str),
  /// An in-flight query already exists on a single-slot client.
  Busy,
  /// A QoS 2 PUBLISH arrived with an already-pending message id.
  Duplicate,
}

/// An error, with the context it occurred in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
  /// What happened.
  pub what: Kind,
  /// What we were doing when it happened.
  pub when: When,
}

impl Error {
  /// Construct an error with no particular context.
  pub fn new(what: Kind) -> Self {
    Self { what, when: When::None }
  }

  /// Is this a [`Kind::Timeout`]?
  pub fn is_timeout(&self) -> bool {
    matches!(self.what, Kind::Timeout)
  }

  /// Is this a [`Kind::Aborted`]?
  pub fn is_aborted(&self) -> bool {
    matches!(self.what, Kind::Aborted)
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.what {
      | Kind::InvalidArgument(msg) => write!(f, "invalid argument ({msg}) while {}", self.when),
      | Kind::InvalidState => write!(f, "operation forbidden in current state while {}", self.when),
      | Kind::NoBuffer => write!(f, "message buffer pool exhausted while {}", self.when),
      | Kind::Parse(msg) => write!(f, "parse error ({msg}) while {}", self.when),
      | Kind::Timeout => write!(f, "timed out while {}", self.when),
      | Kind::Aborted => write!(f, "aborted while {}", self.when),
      | Kind::Security(msg) => write!(f, "security error ({msg}) while {}", self.when),
      | Kind::Busy => write!(f, "busy while {}", self.when),
      | Kind::Duplicate => write!(f, "duplicate message while {}", self.when),
    }
  }
}

impl std::error::Error for Error {}

/// Convenience `Result` alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
