//! Reader chip binding and the fixed card layout

use std::time::Duration;

use kiosk_common::{Block, BlockAddress, Uid, PAGE_SIZE};
use kiosk_keys::{KeySlot, MifareKey};
use tracing::warn;

use crate::error::Result;

/// Low-level operations of a contactless reader
///
/// Implementations perform blocking I/O and never retry on their own.
/// A key mismatch or an unreadable block is reported through the `Ok`
/// value; `Err` is reserved for transport failures. Implementations are
/// not safe to drive from two threads at once and callers must serialize
/// access.
pub trait Transceiver {
    /// Look for a card in the field, giving up after `timeout`
    fn detect(&mut self, timeout: Duration) -> Result<Option<Uid>>;

    /// Run the MIFARE Classic challenge-response for `block`
    fn authenticate(
        &mut self,
        uid: &Uid,
        block: BlockAddress,
        slot: KeySlot,
        key: &MifareKey,
    ) -> Result<bool>;

    /// Read a Classic block of an authenticated sector
    fn read_block(&mut self, block: BlockAddress) -> Result<Option<Block>>;

    /// Write user data into a Classic block
    ///
    /// Sector trailers hold the keys and access bits and are refused here
    /// without touching the card.
    fn write_block(&mut self, block: BlockAddress, data: &Block) -> Result<bool> {
        if block.is_sector_trailer() {
            warn!(block = %block, "Refusing to write user data to a sector trailer");
            return Ok(false);
        }
        self.program_block(block, data)
    }

    /// Send the write to the card; only reached through [`Transceiver::write_block`]
    fn program_block(&mut self, block: BlockAddress, data: &Block) -> Result<bool>;

    /// Read four consecutive Ultralight pages starting at `page`
    fn read_pages(&mut self, page: u8) -> Result<Option<Block>>;

    /// Write a single Ultralight page
    fn write_page(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<bool>;

    /// Bring a wedged reader back to a known state
    fn reinitialize(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transceiver + ?Sized> Transceiver for Box<T> {
    fn detect(&mut self, timeout: Duration) -> Result<Option<Uid>> {
        (**self).detect(timeout)
    }

    fn authenticate(
        &mut self,
        uid: &Uid,
        block: BlockAddress,
        slot: KeySlot,
        key: &MifareKey,
    ) -> Result<bool> {
        (**self).authenticate(uid, block, slot, key)
    }

    fn read_block(&mut self, block: BlockAddress) -> Result<Option<Block>> {
        (**self).read_block(block)
    }

    fn write_block(&mut self, block: BlockAddress, data: &Block) -> Result<bool> {
        (**self).write_block(block, data)
    }

    fn program_block(&mut self, block: BlockAddress, data: &Block) -> Result<bool> {
        (**self).program_block(block, data)
    }

    fn read_pages(&mut self, page: u8) -> Result<Option<Block>> {
        (**self).read_pages(page)
    }

    fn write_page(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<bool> {
        (**self).write_page(page, data)
    }

    fn reinitialize(&mut self) -> Result<()> {
        (**self).reinitialize()
    }
}

/// Card family, decided once per detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardFamily {
    /// Sector/key based cards (4 byte UID)
    Classic,
    /// Page based cards without authentication (7 byte UID)
    Ultralight,
}

impl CardFamily {
    pub fn from_uid(uid: &Uid) -> Self {
        if uid.len() == 7 {
            CardFamily::Ultralight
        } else {
            CardFamily::Classic
        }
    }
}

/// The two values stored on a guest card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Token,
    Cvc,
}

impl CredentialField {
    pub const ALL: [CredentialField; 2] = [CredentialField::Token, CredentialField::Cvc];

    pub fn block(self, layout: &CardLayout) -> BlockAddress {
        match self {
            CredentialField::Token => layout.token_block,
            CredentialField::Cvc => layout.cvc_block,
        }
    }

    pub fn page(self, layout: &CardLayout) -> u8 {
        match self {
            CredentialField::Token => layout.token_page,
            CredentialField::Cvc => layout.cvc_page,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CredentialField::Token => "token",
            CredentialField::Cvc => "cvc",
        }
    }
}

const fn data_block(address: u8) -> BlockAddress {
    match BlockAddress::new(address) {
        Some(block) if !block.is_sector_trailer() => block,
        _ => panic!("credential block must be a data block"),
    }
}

/// Where the token and CVC live on the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardLayout {
    /// Classic block holding the session token
    pub token_block: BlockAddress,
    /// Classic block holding the CVC
    pub cvc_block: BlockAddress,
    /// First of four Ultralight pages holding the token
    pub token_page: u8,
    /// First of four Ultralight pages holding the CVC
    pub cvc_page: u8,
}

impl CardLayout {
    /// Layout of the kiosk's guest cards: both Classic blocks in sector 1
    pub const HOTEL: CardLayout = CardLayout {
        token_block: data_block(5),
        cvc_block: data_block(6),
        token_page: 4,
        cvc_page: 8,
    };
}

impl Default for CardLayout {
    fn default() -> Self {
        Self::HOTEL
    }
}
