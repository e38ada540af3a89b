//! The CV register model: a decoder's address and its configuration
//! variables.
//!
//! # What is a CV? (for beginners)
//!
//! A DCC decoder stores its settings in numbered, byte-valued registers
//! called *Configuration Variables* (CVs). CV 1 is the short address,
//! CV 7 the firmware version, CV 8 the manufacturer ID, and so on; the
//! meaning of each number is decoder-specific and deliberately not
//! modelled here. This module only cares about the shape: a decoder has
//! an address on the track bus, and a sparse map of CV number to byte
//! value.
//!
//! The register file is the in-memory mirror the application edits; the
//! session crate pushes entries to the real decoder over the wire and
//! pulls them back via verify replies.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for out-of-range domain values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// The decoder address is outside the DCC range 1..=10239.
    #[error("decoder address {0} outside valid range 1..=10239")]
    AddressOutOfRange(u16),

    /// The CV number is outside the range 1..=1024.
    #[error("CV number {0} outside valid range 1..=1024")]
    CvOutOfRange(u16),
}

/// Highest decoder address representable on the track bus.
pub const MAX_DECODER_ADDRESS: u16 = 10_239;

/// Highest CV number addressable by the programming protocol.
pub const MAX_CV_NUMBER: u16 = 1_024;

/// Address of the decoder a programming operation targets.
///
/// The address is the equality key used to match an asynchronous feedback
/// reply to the verify request that is waiting for it, so the type derives
/// `Eq` and `Hash` and is deliberately `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecoderAddress(u16);

impl DecoderAddress {
    /// Creates an address, rejecting values outside 1..=10239.
    pub fn new(raw: u16) -> Result<Self, DomainError> {
        if raw == 0 || raw > MAX_DECODER_ADDRESS {
            return Err(DomainError::AddressOutOfRange(raw));
        }
        Ok(Self(raw))
    }

    /// Returns the raw numeric address.
    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for DecoderAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for DecoderAddress {
    type Error = DomainError;

    fn try_from(raw: u16) -> Result<Self, DomainError> {
        Self::new(raw)
    }
}

/// Number of a configuration variable, 1-based as printed in decoder
/// manuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CvNumber(u16);

impl CvNumber {
    /// Creates a CV number, rejecting values outside 1..=1024.
    pub fn new(raw: u16) -> Result<Self, DomainError> {
        if raw == 0 || raw > MAX_CV_NUMBER {
            return Err(DomainError::CvOutOfRange(raw));
        }
        Ok(Self(raw))
    }

    /// Returns the 1-based CV number.
    pub fn value(self) -> u16 {
        self.0
    }

    /// Returns the 0-based value sent on the wire (`cv - 1`).
    pub fn wire_value(self) -> u16 {
        self.0 - 1
    }
}

impl fmt::Display for CvNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CV{}", self.0)
    }
}

impl TryFrom<u16> for CvNumber {
    type Error = DomainError;

    fn try_from(raw: u16) -> Result<Self, DomainError> {
        Self::new(raw)
    }
}

/// In-memory image of one decoder's configuration.
///
/// A `BTreeMap` keeps iteration in CV-number order, which is the order the
/// application lists and programs registers in. Unset CVs read as 0, the
/// hardware default for a factory-fresh feedback decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CvRegisterFile {
    address: DecoderAddress,
    cvs: BTreeMap<CvNumber, u8>,
}

impl CvRegisterFile {
    /// Creates an empty register file for the given decoder.
    pub fn new(address: DecoderAddress) -> Self {
        Self {
            address,
            cvs: BTreeMap::new(),
        }
    }

    /// Returns the decoder address this file mirrors.
    pub fn address(&self) -> DecoderAddress {
        self.address
    }

    /// Re-targets the file at a different decoder, keeping the CV image.
    pub fn set_address(&mut self, address: DecoderAddress) {
        self.address = address;
    }

    /// Stores a CV value, replacing any previous value.
    pub fn set(&mut self, cv: CvNumber, value: u8) {
        self.cvs.insert(cv, value);
    }

    /// Returns the stored value for a CV, if one has been set or read back.
    pub fn get(&self, cv: CvNumber) -> Option<u8> {
        self.cvs.get(&cv).copied()
    }

    /// Returns the stored value, or 0 for a CV that was never populated.
    pub fn get_or_default(&self, cv: CvNumber) -> u8 {
        self.get(cv).unwrap_or(0)
    }

    /// Discards all stored CV values.
    pub fn clear(&mut self) {
        self.cvs.clear();
    }

    /// Number of CVs with a known value.
    pub fn len(&self) -> usize {
        self.cvs.len()
    }

    /// Returns `true` when no CV has a known value.
    pub fn is_empty(&self) -> bool {
        self.cvs.is_empty()
    }

    /// Iterates over `(CvNumber, value)` pairs in CV-number order.
    pub fn iter(&self) -> impl Iterator<Item = (CvNumber, u8)> + '_ {
        self.cvs.iter().map(|(cv, v)| (*cv, *v))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
