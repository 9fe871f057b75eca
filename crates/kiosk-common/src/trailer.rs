//! Sector trailer access bits
//!
//! A trailer is `Key A (6) | access bits (4) | Key B (6)`. Bytes 6..9 hold
//! the C1/C2/C3 condition bits for each block of the sector together with
//! their complements; a trailer whose complements disagree is corrupted and
//! the card will refuse access to the whole sector.

use std::fmt;

use crate::Block;

/// Access bytes written by card manufacturers (transport configuration)
pub const FACTORY_ACCESS_BITS: [u8; 4] = [0xFF, 0x07, 0x80, 0x69];

/// Factory default trailer: default keys A/B with transport access bits
pub const FACTORY_TRAILER: Block = [
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x80, 0x69, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
];

/// Access condition bits of a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCondition {
    pub c1: bool,
    pub c2: bool,
    pub c3: bool,
}

impl fmt::Display for AccessCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.c1 as u8, self.c2 as u8, self.c3 as u8)
    }
}

/// Decoded access conditions of a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessConditions {
    c1: u8,
    c2: u8,
    c3: u8,
}

/// Which condition group failed the complement check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessBitsError {
    C1Mismatch,
    C2Mismatch,
    C3Mismatch,
}

impl fmt::Display for AccessBitsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = match self {
            AccessBitsError::C1Mismatch => "C1",
            AccessBitsError::C2Mismatch => "C2",
            AccessBitsError::C3Mismatch => "C3",
        };
        write!(f, "corrupted access bits: {} does not match its complement", group)
    }
}

impl std::error::Error for AccessBitsError {}

impl AccessConditions {
    /// Decode and validate the access bytes of a trailer block
    pub fn from_trailer(trailer: &Block) -> Result<Self, AccessBitsError> {
        let (b6, b7, b8) = (trailer[6], trailer[7], trailer[8]);

        let c1 = b7 >> 4;
        let c2 = b8 & 0x0F;
        let c3 = b8 >> 4;
        let c1_inv = b6 & 0x0F;
        let c2_inv = b6 >> 4;
        let c3_inv = b7 & 0x0F;

        if c1 ^ c1_inv != 0x0F {
            return Err(AccessBitsError::C1Mismatch);
        }
        if c2 ^ c2_inv != 0x0F {
            return Err(AccessBitsError::C2Mismatch);
        }
        if c3 ^ c3_inv != 0x0F {
            return Err(AccessBitsError::C3Mismatch);
        }

        Ok(Self { c1, c2, c3 })
    }

    /// Conditions for the block at `index` (0..=3, 3 being the trailer)
    pub fn block(&self, index: u8) -> AccessCondition {
        let bit = |group: u8| (group >> (index & 0x03)) & 0x01 == 1;
        AccessCondition {
            c1: bit(self.c1),
            c2: bit(self.c2),
            c3: bit(self.c3),
        }
    }

    /// Whether the sector still carries the manufacturer configuration
    pub fn is_factory(&self) -> bool {
        let data_blocks_open = (0..3).all(|i| {
            self.block(i)
                == AccessCondition {
                    c1: false,
                    c2: false,
                    c3: false,
                }
        });
        let trailer = self.block(3);
        data_blocks_open && !trailer.c1 && !trailer.c2 && trailer.c3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_trailer_is_valid() {
        assert_eq!(FACTORY_TRAILER[6..10], FACTORY_ACCESS_BITS);
        let conditions = AccessConditions::from_trailer(&FACTORY_TRAILER).unwrap();
        assert!(conditions.is_factory());
        assert_eq!(conditions.block(0).to_string(), "000");
        assert_eq!(conditions.block(3).to_string(), "001");
    }

    #[test]
    fn test_corrupted_complement_detected() {
        let mut trailer = FACTORY_TRAILER;
        trailer[7] = 0x17;
        assert_eq!(
            AccessConditions::from_trailer(&trailer),
            Err(AccessBitsError::C1Mismatch)
        );

        let mut trailer = FACTORY_TRAILER;
        trailer[8] = 0x81;
        assert_eq!(
            AccessConditions::from_trailer(&trailer),
            Err(AccessBitsError::C2Mismatch)
        );
    }

    #[test]
    fn test_read_only_configuration() {
        // Data blocks 110 (read with A|B, never write), trailer 011
        let mut trailer = FACTORY_TRAILER;
        trailer[6] = 0x08;
        trailer[7] = 0x77;
        trailer[8] = 0x8F;
        let conditions = AccessConditions::from_trailer(&trailer).unwrap();
        assert!(!conditions.is_factory());
        assert_eq!(conditions.block(0).to_string(), "110");
        assert_eq!(conditions.block(3).to_string(), "011");
    }
}
