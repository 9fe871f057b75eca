//! PC/SC reader (ACR122U and compatible) as a [`Transceiver`]

use std::ffi::CString;
use std::time::Duration;

use kiosk_common::{Block, BlockAddress, Uid, BLOCK_SIZE, PAGE_SIZE};
use kiosk_keys::{KeySlot, MifareKey};
use pcsc::{Card, Context, Protocols, ReaderState, Scope, ShareMode, State};
use tracing::{debug, info, warn};

use crate::apdu::{commands, ApduCommand, ApduResponse};
use crate::error::{Error, Result};
use crate::transceiver::Transceiver;

/// List all available card readers
pub fn list_readers() -> Result<Vec<String>> {
    let context = Context::establish(Scope::User)?;
    let mut readers_buf = [0; 2048];
    let readers = context.list_readers(&mut readers_buf)?;

    Ok(readers
        .map(|r| r.to_str().unwrap_or("Unknown").to_string())
        .collect())
}

/// Contactless reader reached through the PC/SC stack
pub struct PcscTransceiver {
    context: Context,
    reader: CString,
    card: Option<Card>,
}

impl PcscTransceiver {
    /// Open the first reader whose name contains `filter` (any reader if `None`)
    pub fn open(filter: Option<&str>) -> Result<Self> {
        let context = Context::establish(Scope::User)?;
        let mut readers_buf = [0; 2048];
        let reader = context
            .list_readers(&mut readers_buf)?
            .find(|r| filter.map_or(true, |f| r.to_string_lossy().contains(f)))
            .map(|r| r.to_owned());

        let reader = reader.ok_or_else(|| {
            Error::ReaderNotFound(filter.map(|f| format!(" matching '{}'", f)).unwrap_or_default())
        })?;

        info!(reader = %reader.to_string_lossy(), "Using PC/SC reader");
        Ok(Self {
            context,
            reader,
            card: None,
        })
    }

    pub fn reader_name(&self) -> String {
        self.reader.to_string_lossy().into_owned()
    }

    /// Connect to the card in the field; `false` when there is none
    fn connect(&mut self) -> Result<bool> {
        match self
            .context
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
        {
            Ok(card) => {
                self.card = Some(card);
                Ok(true)
            }
            Err(pcsc::Error::NoSmartcard)
            | Err(pcsc::Error::RemovedCard)
            | Err(pcsc::Error::UnresponsiveCard) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Block until a card shows up or `timeout` passes
    fn wait_for_card(&self, timeout: Duration) -> Result<bool> {
        let mut states = [ReaderState::new(self.reader.clone(), State::UNAWARE)];
        self.context.get_status_change(Duration::ZERO, &mut states)?;
        if states[0].event_state().contains(State::PRESENT) {
            return Ok(true);
        }

        states[0].sync_current_state();
        match self.context.get_status_change(timeout, &mut states) {
            Ok(()) => Ok(states[0].event_state().contains(State::PRESENT)),
            Err(pcsc::Error::Timeout) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Send a command to the connected card; `None` if the card went away
    fn transmit(&mut self, command: ApduCommand) -> Result<Option<ApduResponse>> {
        let Some(card) = &self.card else {
            return Ok(None);
        };
        match command.send(card) {
            Ok(response) => Ok(Some(response)),
            Err(pcsc::Error::RemovedCard) | Err(pcsc::Error::ResetCard) => {
                debug!("Card left the field");
                self.card = None;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn succeeded(&mut self, command: ApduCommand) -> Result<bool> {
        Ok(self.transmit(command)?.is_some_and(|r| r.is_success()))
    }

    fn read_binary(&mut self, address: u8) -> Result<Option<Block>> {
        let response = self.transmit(commands::read_binary(address))?;
        Ok(response
            .filter(|r| r.is_success())
            .and_then(|r| r.data.get(..BLOCK_SIZE).and_then(|d| d.try_into().ok())))
    }
}

impl Transceiver for PcscTransceiver {
    fn detect(&mut self, timeout: Duration) -> Result<Option<Uid>> {
        if self.card.is_none() && !self.connect()? {
            if !self.wait_for_card(timeout)? || !self.connect()? {
                return Ok(None);
            }
        }

        match self.transmit(commands::get_uid())? {
            Some(response) if response.is_success() => match Uid::new(&response.data) {
                Some(uid) => Ok(Some(uid)),
                None => {
                    warn!(uid = %hex::encode_upper(&response.data), "Ignoring card with unsupported UID length");
                    Ok(None)
                }
            },
            Some(response) => {
                debug!(status = %response.status_string(), "GET UID rejected");
                self.card = None;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn authenticate(
        &mut self,
        _uid: &Uid,
        block: BlockAddress,
        slot: KeySlot,
        key: &MifareKey,
    ) -> Result<bool> {
        if !self.succeeded(commands::load_key(key))? {
            warn!("Reader refused to load key");
            return Ok(false);
        }
        self.succeeded(commands::general_authenticate(block.value(), slot))
    }

    fn read_block(&mut self, block: BlockAddress) -> Result<Option<Block>> {
        self.read_binary(block.value())
    }

    fn program_block(&mut self, block: BlockAddress, data: &Block) -> Result<bool> {
        self.succeeded(commands::update_binary(block.value(), data))
    }

    fn read_pages(&mut self, page: u8) -> Result<Option<Block>> {
        self.read_binary(page)
    }

    fn write_page(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<bool> {
        self.succeeded(commands::update_binary(page, data))
    }

    fn reinitialize(&mut self) -> Result<()> {
        self.card = None;
        self.context = Context::establish(Scope::User)?;
        info!(reader = %self.reader_name(), "PC/SC context re-established");
        Ok(())
    }
}
