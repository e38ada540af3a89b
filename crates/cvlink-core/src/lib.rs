//! # cvlink-core
//!
//! Shared library for CVLink containing the Lenz POM wire codec and the
//! decoder domain model.
//!
//! This crate is used by the session crate and by anything that needs to
//! speak or test the wire format. It has zero dependencies on OS APIs,
//! network sockets, or an async runtime.
//!
//! # Architecture overview
//!
//! CVLink programs model-railway feedback decoders over a command
//! station's LAN gateway using programming-on-the-main (POM). This crate
//! is the shared foundation. It defines:
//!
//! - **`protocol`** - How bytes travel over the wire. POM write/verify
//!   requests and RS-bus feedback replies are fixed-layout binary frames
//!   with an XOR parity byte; the codec converts between them and typed
//!   Rust structs.
//!
//! - **`domain`** - Pure data with no I/O. Decoder addresses, CV numbers,
//!   and the [`CvRegisterFile`] mirroring one decoder's configuration.

// Declare the two top-level modules. Rust will look for each in a
// subdirectory with the same name (e.g., src/protocol/mod.rs).
pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `cvlink_core::DecoderAddress` instead of the full module path.
pub use domain::registers::{CvNumber, CvRegisterFile, DecoderAddress, DomainError};
pub use protocol::codec::{decode_feedback, encode_verify, encode_write, DecodeError};
pub use protocol::messages::{FeedbackMessage, PomRequest, StatusRequest};
