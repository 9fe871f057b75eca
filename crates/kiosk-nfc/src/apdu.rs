//! Reader pseudo-APDUs for contactless memory cards over PC/SC
//!
//! ACR122U-class readers expose MIFARE operations as class `FF` commands
//! answered with a plain `90 00` status on success.

use pcsc::{Card, MAX_BUFFER_SIZE};

/// APDU response containing data and status word
#[derive(Debug, Clone)]
pub struct ApduResponse {
    /// Response data (without status word)
    pub data: Vec<u8>,
    /// Status word SW1
    pub sw1: u8,
    /// Status word SW2
    pub sw2: u8,
}

impl ApduResponse {
    /// Check if the response indicates success (9000)
    pub fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Status word as hex string (e.g., "6300")
    pub fn status_string(&self) -> String {
        format!("{:02X}{:02X}", self.sw1, self.sw2)
    }
}

/// Send raw APDU bytes to the card
pub fn send_apdu(card: &Card, apdu: &[u8]) -> Result<ApduResponse, pcsc::Error> {
    let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
    let rapdu = card.transmit(apdu, &mut rapdu_buf)?;

    if rapdu.len() < 2 {
        return Err(pcsc::Error::InsufficientBuffer);
    }

    let (data, status) = rapdu.split_at(rapdu.len() - 2);
    Ok(ApduResponse {
        data: data.to_vec(),
        sw1: status[0],
        sw2: status[1],
    })
}

/// APDU command builder
pub struct ApduCommand {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: Vec<u8>,
    le: Option<u8>,
}

impl ApduCommand {
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Set command data
    pub fn data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Set expected response length
    pub fn le(mut self, le: u8) -> Self {
        self.le = Some(le);
        self
    }

    /// Build the APDU command bytes
    pub fn build(&self) -> Vec<u8> {
        let mut apdu = vec![self.cla, self.ins, self.p1, self.p2];

        if !self.data.is_empty() {
            apdu.push(self.data.len() as u8);
            apdu.extend_from_slice(&self.data);
        }

        if let Some(le) = self.le {
            apdu.push(le);
        }

        apdu
    }

    /// Send this command to the card
    pub fn send(&self, card: &Card) -> Result<ApduResponse, pcsc::Error> {
        send_apdu(card, &self.build())
    }
}

/// Reader commands for MIFARE Classic and Ultralight
pub mod commands {
    use super::ApduCommand;
    use kiosk_common::BLOCK_SIZE;
    use kiosk_keys::{KeySlot, MifareKey};

    const CLA: u8 = 0xFF;

    /// Volatile key slot in the reader
    pub const KEY_LOCATION: u8 = 0x00;

    /// GET DATA (UID of the card in the field)
    pub fn get_uid() -> ApduCommand {
        ApduCommand::new(CLA, 0xCA, 0x00, 0x00).le(0x00)
    }

    /// LOAD AUTHENTICATION KEYS into the volatile slot
    pub fn load_key(key: &MifareKey) -> ApduCommand {
        ApduCommand::new(CLA, 0x82, 0x00, KEY_LOCATION).data(key.to_vec())
    }

    /// GENERAL AUTHENTICATE a block with the loaded key
    pub fn general_authenticate(block: u8, slot: KeySlot) -> ApduCommand {
        ApduCommand::new(CLA, 0x86, 0x00, 0x00).data(vec![
            0x01,
            0x00,
            block,
            slot.auth_command(),
            KEY_LOCATION,
        ])
    }

    /// READ BINARY: one Classic block or four Ultralight pages
    pub fn read_binary(address: u8) -> ApduCommand {
        ApduCommand::new(CLA, 0xB0, 0x00, address).le(BLOCK_SIZE as u8)
    }

    /// UPDATE BINARY: one Classic block or one Ultralight page
    pub fn update_binary(address: u8, data: &[u8]) -> ApduCommand {
        ApduCommand::new(CLA, 0xD6, 0x00, address).data(data.to_vec())
    }
}
