//! Kiosk Common - Shared card data types for MIFARE processing
//!
//! UIDs, block addresses, the 16-byte block text codec and the sector
//! trailer access-bits decoder. Nothing in here talks to hardware.

use std::fmt;
use std::str::FromStr;

pub mod codec;
pub mod trailer;

pub use codec::{decode_text, encode_text};

/// Size of one MIFARE Classic block (and of four Ultralight pages)
pub const BLOCK_SIZE: usize = 16;

/// Size of one MIFARE Ultralight page
pub const PAGE_SIZE: usize = 4;

/// Number of blocks on a MIFARE Classic 1K card
pub const CLASSIC_1K_BLOCKS: u8 = 64;

/// Raw contents of one block
pub type Block = [u8; BLOCK_SIZE];

/// Card identifier reported during anti-collision
///
/// Only single (4 byte) and double (7 byte) size UIDs are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uid(Vec<u8>);

impl Uid {
    /// Wrap raw UID bytes, rejecting unsupported lengths
    pub fn new(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            4 | 7 => Some(Self(bytes.to_vec())),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The four UID bytes fed into MIFARE Classic authentication
    ///
    /// Double size UIDs authenticate with their last four bytes.
    pub fn auth_bytes(&self) -> [u8; 4] {
        let tail = &self.0[self.0.len() - 4..];
        [tail[0], tail[1], tail[2], tail[3]]
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

/// Error parsing a UID from hex text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseUidError;

impl fmt::Display for ParseUidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UID must be 4 or 7 bytes of hex")
    }
}

impl std::error::Error for ParseUidError {}

impl FromStr for Uid {
    type Err = ParseUidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|_| ParseUidError)?;
        Uid::new(&bytes).ok_or(ParseUidError)
    }
}

/// Address of a block on a MIFARE Classic 1K card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddress(u8);

impl BlockAddress {
    /// Create an address, `None` if it is outside the 1K address space
    pub const fn new(address: u8) -> Option<Self> {
        if address < CLASSIC_1K_BLOCKS {
            Some(Self(address))
        } else {
            None
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Sector this block belongs to (four blocks per sector)
    pub const fn sector(self) -> u8 {
        self.0 / 4
    }

    /// Whether this is the block holding the keys and access bits of its sector
    pub const fn is_sector_trailer(self) -> bool {
        self.0 % 4 == 3
    }

    /// Trailer block of the sector containing this block
    pub const fn sector_trailer(self) -> BlockAddress {
        BlockAddress(self.sector() * 4 + 3)
    }

    /// Position of the block inside its sector (0..=3)
    pub const fn index_in_sector(self) -> u8 {
        self.0 % 4
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_lengths() {
        assert!(Uid::new(&[0x01, 0x02, 0x03, 0x04]).is_some());
        assert!(Uid::new(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]).is_some());
        assert!(Uid::new(&[0x01, 0x02, 0x03]).is_none());
        assert!(Uid::new(&[0u8; 10]).is_none());
    }

    #[test]
    fn test_uid_display_and_parse() {
        let uid = Uid::new(&[0x63, 0x62, 0x7E, 0xCE]).unwrap();
        assert_eq!(uid.to_string(), "63627ECE");
        assert_eq!("63627ece".parse::<Uid>().unwrap(), uid);
        assert!("6362".parse::<Uid>().is_err());
        assert!("zz627ece".parse::<Uid>().is_err());
    }

    #[test]
    fn test_uid_auth_bytes() {
        let single = Uid::new(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(single.auth_bytes(), [0x01, 0x02, 0x03, 0x04]);

        let double = Uid::new(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]).unwrap();
        assert_eq!(double.auth_bytes(), [0x33, 0x44, 0x55, 0x66]);
    }

    #[test]
    fn test_block_address_geometry() {
        let block = BlockAddress::new(6).unwrap();
        assert_eq!(block.sector(), 1);
        assert!(!block.is_sector_trailer());
        assert_eq!(block.sector_trailer().value(), 7);
        assert_eq!(block.index_in_sector(), 2);

        assert!(BlockAddress::new(3).unwrap().is_sector_trailer());
        assert!(BlockAddress::new(63).unwrap().is_sector_trailer());
        assert!(BlockAddress::new(64).is_none());
    }
}
