//! Domain entities for CVLink.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: no sockets, no OS APIs, no async runtime. It defines the
//! vocabulary the rest of the workspace speaks in - decoder addresses, CV
//! numbers, and the in-memory register file that mirrors one decoder's
//! configuration. Code in outer layers (transport, session, UI) depends on
//! this module, never the other way around, which keeps it trivially
//! unit-testable.

/// Decoder addresses, CV numbers, and the CV register file.
///
/// See [`registers::CvRegisterFile`] for the main type.
pub mod registers;
