//! In-memory reader and card for tests and for running without hardware
//!
//! The simulated card follows MIFARE rules closely enough to exercise the
//! protocol: sectors stay locked until authenticated, trailers read back
//! with key A masked, and pages 0-3 of an Ultralight are not writable.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use kiosk_common::trailer::FACTORY_TRAILER;
use kiosk_common::{encode_text, Block, BlockAddress, Uid, BLOCK_SIZE, CLASSIC_1K_BLOCKS, PAGE_SIZE};
use kiosk_keys::{keys, KeySlot, MifareKey};

use crate::error::{Error, Result};
use crate::transceiver::{CardFamily, Transceiver};

/// Pages on an NTAG213 style Ultralight
const ULTRALIGHT_PAGES: usize = 45;

/// First user-writable Ultralight page
const FIRST_USER_PAGE: u8 = 4;

const SECTORS: usize = CLASSIC_1K_BLOCKS as usize / 4;

/// Card contents and behavior
#[derive(Debug, Clone)]
pub struct SimulatedCard {
    uid: Uid,
    family: CardFamily,
    blocks: Vec<Block>,
    pages: Vec<[u8; PAGE_SIZE]>,
    sector_keys: Vec<(MifareKey, MifareKey)>,
    unreadable: HashSet<u8>,
    trailer_only_auth: bool,
    garble_writes: bool,
}

impl SimulatedCard {
    /// Blank Classic 1K card in transport configuration
    pub fn classic(uid: Uid) -> Self {
        let mut blocks = vec![[0u8; BLOCK_SIZE]; CLASSIC_1K_BLOCKS as usize];
        for trailer in blocks.iter_mut().skip(3).step_by(4) {
            *trailer = FACTORY_TRAILER;
        }
        Self {
            uid,
            family: CardFamily::Classic,
            blocks,
            pages: Vec::new(),
            sector_keys: vec![(keys::FACTORY_DEFAULT, keys::FACTORY_DEFAULT); SECTORS],
            unreadable: HashSet::new(),
            trailer_only_auth: false,
            garble_writes: false,
        }
    }

    /// Blank Ultralight card
    pub fn ultralight(uid: Uid) -> Self {
        let mut pages = vec![[0u8; PAGE_SIZE]; ULTRALIGHT_PAGES];
        for (page, chunk) in pages.iter_mut().zip(uid.as_bytes().chunks(PAGE_SIZE)) {
            page[..chunk.len()].copy_from_slice(chunk);
        }
        Self {
            uid,
            family: CardFamily::Ultralight,
            blocks: Vec::new(),
            pages,
            sector_keys: Vec::new(),
            unreadable: HashSet::new(),
            trailer_only_auth: false,
            garble_writes: false,
        }
    }

    /// Protect a sector with `key` in `slot`, updating its trailer to match
    pub fn with_sector_key(mut self, sector: u8, slot: KeySlot, key: MifareKey) -> Self {
        let index = sector as usize;
        if let Some(pair) = self.sector_keys.get_mut(index) {
            match slot {
                KeySlot::A => pair.0 = key,
                KeySlot::B => pair.1 = key,
            }
            let trailer = &mut self.blocks[index * 4 + 3];
            match slot {
                KeySlot::A => trailer[..6].copy_from_slice(&key),
                KeySlot::B => trailer[10..].copy_from_slice(&key),
            }
        }
        self
    }

    /// Store text in a Classic block or at an Ultralight page
    pub fn with_text(mut self, address: u8, text: &str) -> Self {
        let data = encode_text(text);
        match self.family {
            CardFamily::Classic => {
                if let Some(block) = self.blocks.get_mut(address as usize) {
                    *block = data;
                }
            }
            CardFamily::Ultralight => self.store_pages(address, &data),
        }
        self
    }

    /// Replace a raw sector trailer (keys are left as they are)
    pub fn with_trailer(mut self, sector: u8, trailer: Block) -> Self {
        if let Some(block) = self.blocks.get_mut(sector as usize * 4 + 3) {
            *block = trailer;
        }
        self
    }

    /// Make a block fail to read even when authenticated
    pub fn with_unreadable_block(mut self, block: u8) -> Self {
        self.unreadable.insert(block);
        self
    }

    /// Reject authentication against data blocks; only trailers accept keys
    pub fn with_trailer_only_auth(mut self) -> Self {
        self.trailer_only_auth = true;
        self
    }

    /// Corrupt everything written to the card
    pub fn with_garbled_writes(mut self) -> Self {
        self.garble_writes = true;
        self
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn family(&self) -> CardFamily {
        self.family
    }

    /// Raw block contents as stored on the card
    pub fn block(&self, address: u8) -> Option<Block> {
        self.blocks.get(address as usize).copied()
    }

    /// Four pages starting at `page`
    pub fn pages(&self, page: u8) -> Option<Block> {
        let start = page as usize;
        let pages = self.pages.get(start..start + 4)?;
        let mut data = [0u8; BLOCK_SIZE];
        for (chunk, page) in data.chunks_exact_mut(PAGE_SIZE).zip(pages) {
            chunk.copy_from_slice(page);
        }
        Some(data)
    }

    fn store_pages(&mut self, page: u8, data: &Block) {
        for (offset, chunk) in data.chunks_exact(PAGE_SIZE).enumerate() {
            if let Some(target) = self.pages.get_mut(page as usize + offset) {
                target.copy_from_slice(chunk);
            }
        }
    }

    fn mangle<const N: usize>(&self, data: &[u8; N]) -> [u8; N] {
        if self.garble_writes {
            data.map(|b| b ^ 0x5A)
        } else {
            *data
        }
    }
}

/// One scripted detection result
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Report the current card, if any
    Present,
    /// Report no card even if one is in place
    Absent,
    /// Fail the detection with a bus error
    BusError,
    /// Put a new card in the field and report it
    Insert(Box<SimulatedCard>),
}

/// Reader backed by a [`SimulatedCard`]
///
/// Detection follows the script first; once the script runs out the
/// reader reports whatever card is in place.
#[derive(Debug, Default)]
pub struct SimulatedTransceiver {
    card: Option<SimulatedCard>,
    script: VecDeque<ScriptStep>,
    authenticated: Option<u8>,
    auth_attempts: usize,
    hardware_writes: usize,
    reinitializations: usize,
    read_errors: u32,
}

impl SimulatedTransceiver {
    /// Reader with an empty field
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_card(card: SimulatedCard) -> Self {
        Self {
            card: Some(card),
            ..Self::default()
        }
    }

    /// Queue detection results
    pub fn with_script<I>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = ScriptStep>,
    {
        self.script.extend(steps);
        self
    }

    /// Fail the next `count` block or page reads with a bus error
    pub fn with_read_errors(mut self, count: u32) -> Self {
        self.read_errors = count;
        self
    }

    pub fn insert(&mut self, card: SimulatedCard) {
        self.authenticated = None;
        self.card = Some(card);
    }

    pub fn remove(&mut self) -> Option<SimulatedCard> {
        self.authenticated = None;
        self.card.take()
    }

    pub fn card(&self) -> Option<&SimulatedCard> {
        self.card.as_ref()
    }

    /// Authentication attempts seen so far
    pub fn auth_attempts(&self) -> usize {
        self.auth_attempts
    }

    /// Writes that reached the card
    pub fn hardware_writes(&self) -> usize {
        self.hardware_writes
    }

    pub fn reinitializations(&self) -> usize {
        self.reinitializations
    }

    fn take_read_error(&mut self) -> Result<()> {
        if self.read_errors == 0 {
            return Ok(());
        }
        self.read_errors -= 1;
        Err(Error::Bus("simulated read error".into()))
    }

    fn classic_card(&self) -> Option<&SimulatedCard> {
        self.card.as_ref().filter(|c| c.family == CardFamily::Classic)
    }

    fn ultralight_card_mut(&mut self) -> Option<&mut SimulatedCard> {
        self.card.as_mut().filter(|c| c.family == CardFamily::Ultralight)
    }
}

impl Transceiver for SimulatedTransceiver {
    fn detect(&mut self, _timeout: Duration) -> Result<Option<Uid>> {
        self.authenticated = None;
        let visible = match self.script.pop_front() {
            None | Some(ScriptStep::Present) => true,
            Some(ScriptStep::Absent) => false,
            Some(ScriptStep::BusError) => return Err(Error::Bus("simulated bus error".into())),
            Some(ScriptStep::Insert(card)) => {
                self.card = Some(*card);
                true
            }
        };
        Ok(self.card.as_ref().filter(|_| visible).map(|c| c.uid.clone()))
    }

    fn authenticate(
        &mut self,
        uid: &Uid,
        block: BlockAddress,
        slot: KeySlot,
        key: &MifareKey,
    ) -> Result<bool> {
        self.auth_attempts += 1;
        self.authenticated = None;

        let Some(card) = self.classic_card() else {
            return Ok(false);
        };
        if card.uid != *uid || (card.trailer_only_auth && !block.is_sector_trailer()) {
            return Ok(false);
        }

        let sector = block.sector();
        let (key_a, key_b) = card.sector_keys[sector as usize];
        let accepted = match slot {
            KeySlot::A => key_a == *key,
            KeySlot::B => key_b == *key,
        };
        if accepted {
            self.authenticated = Some(sector);
        }
        Ok(accepted)
    }

    fn read_block(&mut self, block: BlockAddress) -> Result<Option<Block>> {
        self.take_read_error()?;
        let Some(card) = self.classic_card() else {
            return Ok(None);
        };
        if self.authenticated != Some(block.sector()) || card.unreadable.contains(&block.value())
        {
            return Ok(None);
        }

        let mut data = card.blocks[block.value() as usize];
        if block.is_sector_trailer() {
            // Key A never reads back
            data[..6].fill(0);
        }
        Ok(Some(data))
    }

    fn program_block(&mut self, block: BlockAddress, data: &Block) -> Result<bool> {
        self.hardware_writes += 1;
        if self.authenticated != Some(block.sector()) {
            return Ok(false);
        }
        let Some(card) = self.card.as_mut() else {
            return Ok(false);
        };
        let stored = card.mangle(data);
        card.blocks[block.value() as usize] = stored;
        Ok(true)
    }

    fn read_pages(&mut self, page: u8) -> Result<Option<Block>> {
        self.take_read_error()?;
        Ok(self
            .card
            .as_ref()
            .filter(|c| c.family == CardFamily::Ultralight)
            .and_then(|c| c.pages(page)))
    }

    fn write_page(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<bool> {
        self.hardware_writes += 1;
        let Some(card) = self.ultralight_card_mut() else {
            return Ok(false);
        };
        if page < FIRST_USER_PAGE || page as usize >= card.pages.len() {
            return Ok(false);
        }
        let stored = card.mangle(data);
        card.pages[page as usize] = stored;
        Ok(true)
    }

    fn reinitialize(&mut self) -> Result<()> {
        self.reinitializations += 1;
        self.authenticated = None;
        Ok(())
    }
}
