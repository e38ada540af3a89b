//! All CVLink protocol message types.
//!
//! Messages follow the Lenz (XpressNet) operations-mode programming wire
//! format. Outbound frames target the command station's LAN gateway;
//! inbound feedback frames arrive from the RS-bus receiver on the status
//! channel.

use serde::{Deserialize, Serialize};

use crate::domain::registers::{CvNumber, DecoderAddress};

// ── Frame constants ───────────────────────────────────────────────────────────

/// Header byte of an operations-mode programming request frame.
pub const POM_HEADER: u8 = 0xE6;

/// Identification byte following the header of a programming request.
pub const POM_IDENT: u8 = 0x30;

/// Operation byte base for a POM byte write; the low two bits carry the
/// upper two bits of the 10-bit CV field.
pub const POM_OP_WRITE: u8 = 0xEC;

/// Operation byte base for a POM byte verify (read-back request).
pub const POM_OP_VERIFY: u8 = 0xE4;

/// Total length of a programming request frame, checksum included.
pub const POM_FRAME_LEN: usize = 8;

/// Header byte of an RS-bus feedback reply frame.
pub const FEEDBACK_HEADER: u8 = 0xE5;

/// Identification byte of an RS-bus feedback reply frame.
pub const FEEDBACK_IDENT: u8 = 0x62;

/// Operation byte base of a feedback reply; low two bits carry the upper
/// CV bits, as in the request frames.
pub const FEEDBACK_OP: u8 = 0x40;

/// Total length of a feedback reply frame, checksum included.
pub const FEEDBACK_FRAME_LEN: usize = 8;

/// Header byte of the short command-station status/version requests.
pub const STATUS_HEADER: u8 = 0x21;

/// Total length of a status request frame.
pub const STATUS_FRAME_LEN: usize = 3;

// ── Outbound programming requests ─────────────────────────────────────────────

/// One operations-mode programming request.
///
/// The enum shape is the invariant: a `Verify` structurally cannot carry a
/// value, and a `Write` always does. Instances are created when an
/// operation is queued and consumed exactly once when transmitted; they
/// are never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PomRequest {
    /// Set a CV on the decoder to the given value. The command station
    /// does not acknowledge writes on this protocol.
    Write {
        address: DecoderAddress,
        cv: CvNumber,
        value: u8,
    },
    /// Ask the decoder to report a CV's current value. The answer arrives
    /// asynchronously as a [`FeedbackMessage`] on the status channel.
    Verify {
        address: DecoderAddress,
        cv: CvNumber,
    },
}

impl PomRequest {
    /// Decoder the request targets.
    pub fn address(&self) -> DecoderAddress {
        match self {
            PomRequest::Write { address, .. } | PomRequest::Verify { address, .. } => *address,
        }
    }

    /// CV the request operates on.
    pub fn cv(&self) -> CvNumber {
        match self {
            PomRequest::Write { cv, .. } | PomRequest::Verify { cv, .. } => *cv,
        }
    }

    /// Returns `true` for a verify request.
    pub fn is_verify(&self) -> bool {
        matches!(self, PomRequest::Verify { .. })
    }
}

// ── Inbound feedback ──────────────────────────────────────────────────────────

/// A decoded feedback reply reporting one CV value.
///
/// Feedback is asynchronous relative to any specific request; the session
/// correlates it to the outstanding verify by `(address, cv)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackMessage {
    /// Decoder that produced the reply.
    pub address: DecoderAddress,
    /// CV the reply reports.
    pub cv: CvNumber,
    /// Current value of the CV on the decoder.
    pub value: u8,
}

// ── Idle-time status polls ────────────────────────────────────────────────────

/// The two command-station status requests sent alternately while the
/// programming queue is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusRequest {
    /// `21 24 05`: command station status (track power, emergency stop).
    CommandStation,
    /// `21 21 00`: command station software version.
    Version,
}
