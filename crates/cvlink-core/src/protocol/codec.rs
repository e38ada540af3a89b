//! Binary codec for the Lenz POM programming frames and RS-bus feedback
//! replies.
//!
//! Wire format (all frames end in an XOR parity byte over every preceding
//! byte):
//!
//! ```text
//! POM byte write   : [E6][30][AH][AL][EC|cc][CVL][VAL][XOR]
//! POM byte verify  : [E6][30][AH][AL][E4|cc][CVL][00 ][XOR]
//! Feedback reply   : [E5][62][AH][AL][40|cc][CVL][VAL][XOR]
//! Status request   : [21][24][05]   (command station status)
//! Version request  : [21][21][00]   (command station version)
//! ```
//!
//! Field encoding, bit-exact against the Lenz command-station family:
//!
//! - `AH`/`AL`: 14-bit decoder address. Addresses below 100 are sent as
//!   `AH = 0x00, AL = addr`; addresses from 100 up set the two top bits,
//!   `AH = 0xC0 | (addr >> 8), AL = addr & 0xFF`.
//! - `cc`/`CVL`: the 10-bit CV field is transmitted as `cv - 1`; `cc` is
//!   its upper two bits OR-ed into the operation byte, `CVL` the lower
//!   eight.
//!
//! The codec is pure and stateless. [`decode_feedback`] reports how many
//! bytes it consumed so a stream reader can advance its cursor, and a
//! [`DecodeError::FrameTooShort`] means "keep the bytes and retry once
//! more have arrived", never "discard".

use thiserror::Error;

use crate::domain::registers::{CvNumber, DecoderAddress};
use crate::protocol::messages::{
    FeedbackMessage, PomRequest, StatusRequest, FEEDBACK_FRAME_LEN, FEEDBACK_HEADER, FEEDBACK_IDENT,
    FEEDBACK_OP, POM_FRAME_LEN, POM_HEADER, POM_IDENT, POM_OP_VERIFY, POM_OP_WRITE, STATUS_HEADER,
};

/// Errors that can occur while decoding an inbound frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than a complete frame; the caller must buffer and retry.
    #[error("frame too short: need {needed} bytes, got {available}")]
    FrameTooShort { needed: usize, available: usize },

    /// The XOR parity byte does not match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:02X}, found 0x{found:02X}")]
    ChecksumMismatch { expected: u8, found: u8 },

    /// The header or operation byte is not a recognized frame type.
    #[error("unknown frame type: 0x{0:02X}")]
    UnknownFrameType(u8),

    /// A field decoded to a value outside its domain range.
    #[error("invalid field: {0}")]
    InvalidField(String),
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes a POM byte-write request frame.
pub fn encode_write(address: DecoderAddress, cv: CvNumber, value: u8) -> [u8; POM_FRAME_LEN] {
    encode_pom(POM_OP_WRITE, address, cv, value)
}

/// Encodes a POM byte-verify request frame.
///
/// The data byte of a verify is always zero; the decoder answers with the
/// CV's actual value on the feedback bus.
pub fn encode_verify(address: DecoderAddress, cv: CvNumber) -> [u8; POM_FRAME_LEN] {
    encode_pom(POM_OP_VERIFY, address, cv, 0x00)
}

/// Encodes either kind of [`PomRequest`].
pub fn encode_request(request: &PomRequest) -> [u8; POM_FRAME_LEN] {
    match *request {
        PomRequest::Write { address, cv, value } => encode_write(address, cv, value),
        PomRequest::Verify { address, cv } => encode_verify(address, cv),
    }
}

/// Encodes a feedback reply frame.
///
/// The programming side never sends these; the encoder exists so tests and
/// command-station simulators can produce byte-exact replies.
pub fn encode_feedback(msg: &FeedbackMessage) -> [u8; FEEDBACK_FRAME_LEN] {
    let (ah, al) = encode_address(msg.address);
    let wire_cv = msg.cv.wire_value();
    let mut frame = [
        FEEDBACK_HEADER,
        FEEDBACK_IDENT,
        ah,
        al,
        FEEDBACK_OP | ((wire_cv >> 8) as u8),
        (wire_cv & 0xFF) as u8,
        msg.value,
        0x00,
    ];
    frame[FEEDBACK_FRAME_LEN - 1] = xor_checksum(&frame[..FEEDBACK_FRAME_LEN - 1]);
    frame
}

/// Encodes one of the short command-station status requests.
pub fn encode_status_request(request: StatusRequest) -> [u8; 3] {
    let ident: u8 = match request {
        StatusRequest::CommandStation => 0x24,
        StatusRequest::Version => 0x21,
    };
    [STATUS_HEADER, ident, STATUS_HEADER ^ ident]
}

fn encode_pom(op_base: u8, address: DecoderAddress, cv: CvNumber, value: u8) -> [u8; POM_FRAME_LEN] {
    let (ah, al) = encode_address(address);
    let wire_cv = cv.wire_value();
    let mut frame = [
        POM_HEADER,
        POM_IDENT,
        ah,
        al,
        op_base | ((wire_cv >> 8) as u8),
        (wire_cv & 0xFF) as u8,
        value,
        0x00,
    ];
    frame[POM_FRAME_LEN - 1] = xor_checksum(&frame[..POM_FRAME_LEN - 1]);
    frame
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one feedback reply from the beginning of `bytes`.
///
/// Returns the decoded message and the number of bytes consumed so the
/// caller can advance its read cursor.
///
/// # Errors
///
/// [`DecodeError::FrameTooShort`] when fewer than [`FEEDBACK_FRAME_LEN`]
/// bytes are available (buffer and retry), [`DecodeError::UnknownFrameType`]
/// when the header or operation byte is not a feedback frame,
/// [`DecodeError::ChecksumMismatch`] on parity failure, and
/// [`DecodeError::InvalidField`] when the address decodes out of range.
pub fn decode_feedback(bytes: &[u8]) -> Result<(FeedbackMessage, usize), DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::FrameTooShort {
            needed: FEEDBACK_FRAME_LEN,
            available: 0,
        });
    }
    if bytes[0] != FEEDBACK_HEADER {
        return Err(DecodeError::UnknownFrameType(bytes[0]));
    }
    if bytes.len() < FEEDBACK_FRAME_LEN {
        return Err(DecodeError::FrameTooShort {
            needed: FEEDBACK_FRAME_LEN,
            available: bytes.len(),
        });
    }

    let frame = &bytes[..FEEDBACK_FRAME_LEN];
    verify_checksum(frame)?;

    if frame[1] != FEEDBACK_IDENT {
        return Err(DecodeError::UnknownFrameType(frame[1]));
    }
    if frame[4] & 0xFC != FEEDBACK_OP {
        return Err(DecodeError::UnknownFrameType(frame[4]));
    }

    let address = decode_address(frame[2], frame[3])?;
    let cv = decode_cv(frame[4] & 0x03, frame[5]);
    Ok((
        FeedbackMessage {
            address,
            cv,
            value: frame[6],
        },
        FEEDBACK_FRAME_LEN,
    ))
}

/// Decodes one programming request from the beginning of `bytes`.
///
/// The session never receives these; the decoder exists for loopback tests
/// and command-station simulators, and guarantees
/// `decode_request(encode_request(x)) == x`.
///
/// # Errors
///
/// Same taxonomy as [`decode_feedback`].
pub fn decode_request(bytes: &[u8]) -> Result<(PomRequest, usize), DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::FrameTooShort {
            needed: POM_FRAME_LEN,
            available: 0,
        });
    }
    if bytes[0] != POM_HEADER {
        return Err(DecodeError::UnknownFrameType(bytes[0]));
    }
    if bytes.len() < POM_FRAME_LEN {
        return Err(DecodeError::FrameTooShort {
            needed: POM_FRAME_LEN,
            available: bytes.len(),
        });
    }

    let frame = &bytes[..POM_FRAME_LEN];
    verify_checksum(frame)?;

    if frame[1] != POM_IDENT {
        return Err(DecodeError::UnknownFrameType(frame[1]));
    }

    let address = decode_address(frame[2], frame[3])?;
    let cv = decode_cv(frame[4] & 0x03, frame[5]);
    let request = match frame[4] & 0xFC {
        POM_OP_WRITE => PomRequest::Write {
            address,
            cv,
            value: frame[6],
        },
        POM_OP_VERIFY => PomRequest::Verify { address, cv },
        other => return Err(DecodeError::UnknownFrameType(other)),
    };
    Ok((request, POM_FRAME_LEN))
}

// ── Field helpers ─────────────────────────────────────────────────────────────

fn encode_address(address: DecoderAddress) -> (u8, u8) {
    let raw = address.value();
    if raw < 100 {
        (0x00, raw as u8)
    } else {
        (0xC0 | (raw >> 8) as u8, (raw & 0xFF) as u8)
    }
}

fn decode_address(ah: u8, al: u8) -> Result<DecoderAddress, DecodeError> {
    let raw = if ah == 0x00 {
        al as u16
    } else if ah & 0xC0 == 0xC0 {
        (((ah & 0x3F) as u16) << 8) | al as u16
    } else {
        return Err(DecodeError::InvalidField(format!(
            "malformed address high byte 0x{ah:02X}"
        )));
    };
    DecoderAddress::new(raw)
        .map_err(|_| DecodeError::InvalidField(format!("decoder address {raw} out of range")))
}

fn decode_cv(cc: u8, cvl: u8) -> CvNumber {
    // cc is masked to two bits by the callers, so the raw value is at most
    // 0x3FF and the +1 always lands inside 1..=1024.
    let wire = ((cc as u16) << 8) | cvl as u16;
    CvNumber::new(wire + 1).expect("10-bit wire CV is always in range")
}

fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

fn verify_checksum(frame: &[u8]) -> Result<(), DecodeError> {
    let expected = xor_checksum(&frame[..frame.len() - 1]);
    let found = frame[frame.len() - 1];
    if expected != found {
        return Err(DecodeError::ChecksumMismatch { expected, found });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
