//! Datagram TLS session management (spec §3.4, §4.3): handshake state
//! machine and ciphertext plumbing. Real DTLS cryptography is out of scope
//! here -- [`session::BioPipe`] is a plaintext stand-in for the ciphertext
//! pipe a real TLS library would drive.

pub mod session;
pub mod transport;

pub use session::{CredentialMode, DtlsSession, State as DtlsState};
pub use transport::DtlsTransport;
