//! Identifiers and scalar aliases shared by every layer of the node.

use std::{fmt, str::FromStr};

use ckb_hash::blake2b_256;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use thiserror::Error;

use crate::serde_utils::SliceHex;

pub const ADDRESS_LENGTH: usize = 20;

pub type BlockNumber = u64;
pub type TokenAmount = u128;
pub type TokenAddress = Address;
/// A channel is identified by the address of its ledger contract.
pub type ChannelId = Address;
/// Correlates a transfer with the events it produces.
pub type PaymentIdentifier = u64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseIdentifierError {
    #[error("identifier is not valid hex: {0}")]
    InvalidHex(String),
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

fn parse_hex_bytes<const N: usize>(s: &str) -> Result<[u8; N], ParseIdentifierError> {
    let s = s.trim_start_matches("0x");
    let bytes = hex::decode(s).map_err(|err| ParseIdentifierError::InvalidHex(err.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ParseIdentifierError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        })
}

/// A canonical 20-byte binary account, token or contract address.
#[serde_as]
#[derive(Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Address(#[serde_as(as = "SliceHex")] [u8; ADDRESS_LENGTH]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// The null address never names a real participant or contract.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Derives an address from the leading bytes of the blake2b digest of `data`.
    pub fn derive(data: &[u8]) -> Self {
        let digest = blake2b_256(data);
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    pub fn random() -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        rand::thread_rng().fill(&mut bytes[..]);
        Self(bytes)
    }
}

impl From<[u8; ADDRESS_LENGTH]> for Address {
    fn from(value: [u8; ADDRESS_LENGTH]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = ParseIdentifierError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        value
            .try_into()
            .map(Self)
            .map_err(|_| ParseIdentifierError::InvalidLength {
                expected: ADDRESS_LENGTH,
                actual: value.len(),
            })
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address({:#x})", self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self)
    }
}

impl FromStr for Address {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_bytes(s).map(Self)
    }
}

/// A 256-bit digest, used as the hash-lock of pending transfers.
#[serde_as]
#[derive(Copy, Clone, Serialize, Deserialize, Hash, Eq, PartialEq, Ord, PartialOrd, Default)]
pub struct Hash256(#[serde_as(as = "SliceHex")] [u8; 32]);

impl Hash256 {
    pub fn digest(data: &[u8]) -> Self {
        Self(blake2b_256(data))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::LowerHex for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if f.alternate() {
            write!(f, "0x")?;
        }
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash256({:#x})", self)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self)
    }
}

impl FromStr for Hash256 {
    type Err = ParseIdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex_bytes(s).map(Self)
    }
}

pub fn gen_rand_hash256() -> Hash256 {
    let mut result = [0u8; 32];
    rand::thread_rng().fill(&mut result[..]);
    result.into()
}
