//! PN532 reader chip over I2C
//!
//! Host and chip exchange normal information frames:
//!
//! ```text
//! 00 00 FF LEN LCS TFI DATA.. DCS 00
//! ```
//!
//! Every I2C read from the chip starts with a status byte whose low bit
//! signals that a frame is ready. Each command is first acknowledged with
//! a fixed ACK frame and answered later with a response frame whose code
//! is the command code plus one.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use embedded_hal::i2c::I2c;
use kiosk_common::{Block, BlockAddress, Uid, BLOCK_SIZE, PAGE_SIZE};
use kiosk_keys::{KeySlot, MifareKey};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::transceiver::Transceiver;

/// 7-bit I2C address of the PN532
pub const DEFAULT_I2C_ADDRESS: u8 = 0x24;

const PREAMBLE: u8 = 0x00;
const START_CODE: [u8; 2] = [0x00, 0xFF];
const POSTAMBLE: u8 = 0x00;
const HOST_TO_PN532: u8 = 0xD4;
const PN532_TO_HOST: u8 = 0xD5;
const STATUS_READY: u8 = 0x01;

const ACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0x00, 0xFF, 0x00];
const NACK_FRAME: [u8; 6] = [0x00, 0x00, 0xFF, 0xFF, 0x00, 0x00];

/// Largest response we expect (status byte + frame with 16 bytes of data)
const RESPONSE_BUFFER: usize = 64;

const ACK_TIMEOUT: Duration = Duration::from_millis(50);
const COMMAND_TIMEOUT: Duration = Duration::from_millis(500);
const READY_POLL_INTERVAL: Duration = Duration::from_millis(5);
const RESELECT_TIMEOUT: Duration = Duration::from_millis(50);

/// Target number used for every InDataExchange
const TARGET: u8 = 0x01;

/// PN532 command codes
pub mod command {
    pub const GET_FIRMWARE_VERSION: u8 = 0x02;
    pub const SAM_CONFIGURATION: u8 = 0x14;
    pub const RF_CONFIGURATION: u8 = 0x32;
    pub const IN_DATA_EXCHANGE: u8 = 0x40;
    pub const IN_LIST_PASSIVE_TARGET: u8 = 0x4A;
}

/// MIFARE commands tunneled through InDataExchange
mod mifare {
    pub const READ: u8 = 0x30;
    pub const WRITE: u8 = 0xA0;
    pub const ULTRALIGHT_WRITE: u8 = 0xA2;
}

/// Chip identification returned by GetFirmwareVersion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub ic: u8,
    pub version: u8,
    pub revision: u8,
    pub support: u8,
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PN5{:02X} firmware {}.{}", self.ic, self.version, self.revision)
    }
}

/// Wrap a command (code followed by parameters) in a host frame
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 1) as u8;
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.push(PREAMBLE);
    frame.extend_from_slice(&START_CODE);
    frame.push(len);
    frame.push(len.wrapping_neg());
    frame.push(HOST_TO_PN532);

    let mut sum = HOST_TO_PN532;
    for &byte in payload {
        frame.push(byte);
        sum = sum.wrapping_add(byte);
    }
    frame.push(sum.wrapping_neg());
    frame.push(POSTAMBLE);
    frame
}

/// Check a frame from the chip and return everything after the TFI
pub fn decode_frame(raw: &[u8]) -> Result<Vec<u8>> {
    let start = raw
        .windows(2)
        .position(|w| w == START_CODE)
        .ok_or(Error::Frame("missing start code"))?;
    let body = &raw[start + 2..];

    let (&len, &lcs) = match body {
        [len, lcs, ..] => (len, lcs),
        _ => return Err(Error::Frame("truncated header")),
    };
    if len.wrapping_add(lcs) != 0 {
        return Err(Error::Frame("length checksum mismatch"));
    }
    if len == 0 {
        return Err(Error::Frame("empty frame"));
    }

    let len = len as usize;
    let data = body.get(2..2 + len).ok_or(Error::Frame("truncated frame"))?;
    let dcs = *body.get(2 + len).ok_or(Error::Frame("missing data checksum"))?;
    if data.iter().fold(dcs, |acc, b| acc.wrapping_add(*b)) != 0 {
        return Err(Error::Frame("data checksum mismatch"));
    }
    if data[0] != PN532_TO_HOST {
        return Err(Error::Frame("unexpected frame identifier"));
    }
    Ok(data[1..].to_vec())
}

/// Pull the first target's UID out of an InListPassiveTarget response
///
/// Response layout: `NbTg Tg SENS_RES(2) SEL_RES UIDLen UID..`
fn parse_target(response: &[u8]) -> Result<Option<Uid>> {
    match response.first() {
        None | Some(0) => return Ok(None),
        Some(_) => {}
    }
    let uid_len = *response.get(5).ok_or(Error::Frame("short target descriptor"))? as usize;
    let uid = response
        .get(6..6 + uid_len)
        .ok_or(Error::Frame("truncated target UID"))?;

    match Uid::new(uid) {
        Some(uid) => Ok(Some(uid)),
        None => {
            warn!(uid = %hex::encode_upper(uid), "Ignoring card with unsupported UID length");
            Ok(None)
        }
    }
}

fn bus_error<E: embedded_hal::i2c::Error>(err: E) -> Error {
    Error::Bus(format!("{:?}", err.kind()))
}

/// PN532 driver on any embedded-hal I2C bus
pub struct Pn532<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Pn532<I2C> {
    /// Wrap the bus without talking to the chip
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Wrap the bus and run the power-on configuration
    pub fn open(i2c: I2C, address: u8) -> Result<Self> {
        let mut pn532 = Self::new(i2c, address);
        let firmware = pn532.init()?;
        info!(address = format_args!("0x{:02X}", address), %firmware, "PN532 ready");
        Ok(pn532)
    }

    /// Identify the chip, enable the RF side and limit passive retries
    pub fn init(&mut self) -> Result<FirmwareVersion> {
        let firmware = self.firmware_version()?;
        // Normal mode, 50 ms virtual card timeout, use IRQ
        self.call_expecting(command::SAM_CONFIGURATION, &[0x01, 0x14, 0x01])?;
        // MaxRetries: ATR_REQ, PSL_REQ, passive activation
        self.call_expecting(command::RF_CONFIGURATION, &[0x05, 0xFF, 0x01, 0x02])?;
        Ok(firmware)
    }

    pub fn firmware_version(&mut self) -> Result<FirmwareVersion> {
        match *self.call_expecting(command::GET_FIRMWARE_VERSION, &[])?.as_slice() {
            [ic, version, revision, support, ..] => Ok(FirmwareVersion {
                ic,
                version,
                revision,
                support,
            }),
            _ => Err(Error::Frame("short firmware version")),
        }
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }

    /// Send a command and wait up to `timeout` for its response
    ///
    /// `Ok(None)` means the chip acknowledged but had nothing to say in time.
    fn call(&mut self, code: u8, params: &[u8], timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut payload = Vec::with_capacity(params.len() + 1);
        payload.push(code);
        payload.extend_from_slice(params);
        trace!(command = format_args!("0x{:02X}", code), len = params.len(), "PN532 command");

        self.i2c
            .write(self.address, &encode_frame(&payload))
            .map_err(bus_error)?;

        if !self.wait_ready(ACK_TIMEOUT)? {
            return Err(Error::NotResponding(ACK_TIMEOUT));
        }
        self.read_ack(code)?;

        if !self.wait_ready(timeout)? {
            return Ok(None);
        }

        let mut buf = [0u8; RESPONSE_BUFFER];
        self.i2c.read(self.address, &mut buf).map_err(bus_error)?;
        let response = decode_frame(&buf[1..])?;

        match response.split_first() {
            Some((&reply, rest)) if reply == code.wrapping_add(1) => Ok(Some(rest.to_vec())),
            _ => Err(Error::Frame("response does not match command")),
        }
    }

    fn call_expecting(&mut self, code: u8, params: &[u8]) -> Result<Vec<u8>> {
        self.call(code, params, COMMAND_TIMEOUT)?
            .ok_or(Error::NotResponding(COMMAND_TIMEOUT))
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut last_error = None;

        loop {
            let mut status = [0u8];
            match self.i2c.read(self.address, &mut status) {
                Ok(()) if status[0] & STATUS_READY != 0 => return Ok(true),
                Ok(()) => last_error = None,
                // The chip stretches or NAKs while busy
                Err(err) => last_error = Some(bus_error(err)),
            }
            if Instant::now() >= deadline {
                return match last_error {
                    Some(err) => Err(err),
                    None => Ok(false),
                };
            }
            thread::sleep(READY_POLL_INTERVAL);
        }
    }

    fn read_ack(&mut self, code: u8) -> Result<()> {
        let mut buf = [0u8; ACK_FRAME.len() + 1];
        self.i2c.read(self.address, &mut buf).map_err(bus_error)?;
        match &buf[1..] {
            frame if frame == ACK_FRAME => Ok(()),
            frame if frame == NACK_FRAME => Err(Error::Nack(code)),
            _ => Err(Error::Frame("expected ACK")),
        }
    }

    /// Cancel the pending command
    fn abort(&mut self) -> Result<()> {
        self.i2c.write(self.address, &ACK_FRAME).map_err(bus_error)
    }

    fn list_passive_target(&mut self, timeout: Duration) -> Result<Option<Uid>> {
        // One target, 106 kbps type A
        match self.call(command::IN_LIST_PASSIVE_TARGET, &[0x01, 0x00], timeout)? {
            Some(response) => parse_target(&response),
            None => {
                self.abort()?;
                Ok(None)
            }
        }
    }

    /// Tunnel a card command; `None` if the card reported an error status
    fn data_exchange(&mut self, card_command: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut params = Vec::with_capacity(card_command.len() + 1);
        params.push(TARGET);
        params.extend_from_slice(card_command);

        let response = self.call_expecting(command::IN_DATA_EXCHANGE, &params)?;
        match response.split_first() {
            Some((0x00, data)) => Ok(Some(data.to_vec())),
            Some((status, _)) => {
                debug!(status = format_args!("0x{:02X}", status), "Card command failed");
                Ok(None)
            }
            None => Err(Error::Frame("empty InDataExchange response")),
        }
    }

    fn read16(&mut self, address: u8) -> Result<Option<Block>> {
        Ok(self
            .data_exchange(&[mifare::READ, address])?
            .and_then(|data| data.get(..BLOCK_SIZE).and_then(|d| d.try_into().ok())))
    }
}

impl<I2C: I2c> Transceiver for Pn532<I2C> {
    fn detect(&mut self, timeout: Duration) -> Result<Option<Uid>> {
        self.list_passive_target(timeout)
    }

    fn authenticate(
        &mut self,
        uid: &Uid,
        block: BlockAddress,
        slot: KeySlot,
        key: &MifareKey,
    ) -> Result<bool> {
        let mut command = Vec::with_capacity(12);
        command.push(slot.auth_command());
        command.push(block.value());
        command.extend_from_slice(key);
        command.extend_from_slice(&uid.auth_bytes());

        if self.data_exchange(&command)?.is_some() {
            return Ok(true);
        }

        // A rejected key halts the card; select it again for the next try
        if self.list_passive_target(RESELECT_TIMEOUT)?.is_none() {
            debug!(uid = %uid, "Card did not come back after failed authentication");
        }
        Ok(false)
    }

    fn read_block(&mut self, block: BlockAddress) -> Result<Option<Block>> {
        self.read16(block.value())
    }

    fn program_block(&mut self, block: BlockAddress, data: &Block) -> Result<bool> {
        let mut command = Vec::with_capacity(BLOCK_SIZE + 2);
        command.push(mifare::WRITE);
        command.push(block.value());
        command.extend_from_slice(data);
        Ok(self.data_exchange(&command)?.is_some())
    }

    fn read_pages(&mut self, page: u8) -> Result<Option<Block>> {
        self.read16(page)
    }

    fn write_page(&mut self, page: u8, data: &[u8; PAGE_SIZE]) -> Result<bool> {
        let mut command = Vec::with_capacity(PAGE_SIZE + 2);
        command.push(mifare::ULTRALIGHT_WRITE);
        command.push(page);
        command.extend_from_slice(data);
        Ok(self.data_exchange(&command)?.is_some())
    }

    fn reinitialize(&mut self) -> Result<()> {
        let firmware = self.init()?;
        info!(%firmware, "PN532 reinitialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use std::collections::{HashMap, VecDeque};

    #[derive(Debug)]
    struct FakeBusError;

    impl embedded_hal::i2c::Error for FakeBusError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    /// Answers each command frame with an ACK and the next scripted response
    #[derive(Default)]
    struct FakeBus {
        responses: HashMap<u8, VecDeque<Vec<u8>>>,
        pending: VecDeque<Vec<u8>>,
        commands: Vec<Vec<u8>>,
        aborts: usize,
    }

    impl FakeBus {
        fn respond(mut self, code: u8, data: &[u8]) -> Self {
            self.responses.entry(code).or_default().push_back(data.to_vec());
            self
        }

        fn accept(&mut self, frame: &[u8]) {
            if frame == ACK_FRAME {
                self.aborts += 1;
                return;
            }
            let payload = &frame[6..frame.len() - 2];
            let code = payload[0];
            self.commands.push(payload.to_vec());

            let mut ack = vec![STATUS_READY];
            ack.extend_from_slice(&ACK_FRAME);
            self.pending.push_back(ack);

            if let Some(data) = self.responses.get_mut(&code).and_then(|q| q.pop_front()) {
                let mut reply = vec![code + 1];
                reply.extend_from_slice(&data);
                let mut message = vec![STATUS_READY];
                message.extend_from_slice(&device_frame(&reply));
                self.pending.push_back(message);
            }
        }

        fn fill(&mut self, buf: &mut [u8]) {
            if buf.len() == 1 {
                buf[0] = if self.pending.is_empty() { 0x00 } else { STATUS_READY };
                return;
            }
            buf.fill(0);
            if let Some(message) = self.pending.pop_front() {
                let n = message.len().min(buf.len());
                buf[..n].copy_from_slice(&message[..n]);
            }
        }
    }

    impl ErrorType for FakeBus {
        type Error = FakeBusError;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> std::result::Result<(), Self::Error> {
            if address != DEFAULT_I2C_ADDRESS {
                return Err(FakeBusError);
            }
            for operation in operations {
                match operation {
                    Operation::Write(bytes) => self.accept(bytes),
                    Operation::Read(buf) => self.fill(buf),
                }
            }
            Ok(())
        }
    }

    fn device_frame(payload: &[u8]) -> Vec<u8> {
        let len = (payload.len() + 1) as u8;
        let mut frame = vec![0x00, 0x00, 0xFF, len, len.wrapping_neg(), PN532_TO_HOST];
        frame.extend_from_slice(payload);
        let sum = payload.iter().fold(PN532_TO_HOST, |acc, b| acc.wrapping_add(*b));
        frame.push(sum.wrapping_neg());
        frame.push(0x00);
        frame
    }

    fn ready_bus() -> FakeBus {
        FakeBus::default()
            .respond(command::GET_FIRMWARE_VERSION, &[0x32, 0x01, 0x06, 0x07])
            .respond(command::SAM_CONFIGURATION, &[])
            .respond(command::RF_CONFIGURATION, &[])
    }

    #[test]
    fn test_encode_firmware_request() {
        assert_eq!(
            encode_frame(&[command::GET_FIRMWARE_VERSION]),
            vec![0x00, 0x00, 0xFF, 0x02, 0xFE, 0xD4, 0x02, 0x2A, 0x00]
        );
    }

    #[test]
    fn test_decode_firmware_response() {
        let raw = [
            0x00, 0x00, 0xFF, 0x06, 0xFA, 0xD5, 0x03, 0x32, 0x01, 0x06, 0x07, 0xE8, 0x00,
        ];
        assert_eq!(decode_frame(&raw).unwrap(), vec![0x03, 0x32, 0x01, 0x06, 0x07]);
    }

    #[test]
    fn test_decode_rejects_bad_checksums() {
        let mut raw = vec![
            0x00, 0x00, 0xFF, 0x06, 0xFA, 0xD5, 0x03, 0x32, 0x01, 0x06, 0x07, 0xE8, 0x00,
        ];
        raw[11] = 0xE9;
        assert!(matches!(decode_frame(&raw), Err(Error::Frame(_))));

        raw[11] = 0xE8;
        raw[4] = 0xFB;
        assert!(matches!(decode_frame(&raw), Err(Error::Frame(_))));

        assert!(decode_frame(&[0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_parse_target() {
        let response = [0x01, 0x01, 0x00, 0x04, 0x08, 0x04, 0x63, 0x62, 0x7E, 0xCE];
        let uid = parse_target(&response).unwrap().unwrap();
        assert_eq!(uid.to_string(), "63627ECE");

        assert_eq!(parse_target(&[0x00]).unwrap(), None);
        assert!(parse_target(&[0x01, 0x01, 0x00]).is_err());
        // 10 byte UIDs are not supported
        let mut triple = vec![0x01, 0x01, 0x00, 0x44, 0x00, 0x0A];
        triple.extend_from_slice(&[0xAA; 10]);
        assert_eq!(parse_target(&triple).unwrap(), None);
    }

    #[test]
    fn test_open_configures_chip() {
        let pn532 = Pn532::open(ready_bus(), DEFAULT_I2C_ADDRESS).unwrap();
        let bus = pn532.release();
        let codes: Vec<u8> = bus.commands.iter().map(|c| c[0]).collect();
        assert_eq!(
            codes,
            vec![
                command::GET_FIRMWARE_VERSION,
                command::SAM_CONFIGURATION,
                command::RF_CONFIGURATION
            ]
        );
        assert_eq!(bus.commands[1], vec![0x14, 0x01, 0x14, 0x01]);
    }

    #[test]
    fn test_detect_authenticate_read() {
        let mut block = [0u8; 16];
        block[..5].copy_from_slice(b"12345");
        let mut read_response = vec![0x00];
        read_response.extend_from_slice(&block);

        let bus = ready_bus()
            .respond(
                command::IN_LIST_PASSIVE_TARGET,
                &[0x01, 0x01, 0x00, 0x04, 0x08, 0x04, 0x01, 0x02, 0x03, 0x04],
            )
            .respond(command::IN_DATA_EXCHANGE, &[0x00])
            .respond(command::IN_DATA_EXCHANGE, &read_response);
        let mut pn532 = Pn532::open(bus, DEFAULT_I2C_ADDRESS).unwrap();

        let uid = pn532.detect(Duration::from_millis(50)).unwrap().unwrap();
        assert_eq!(uid.as_bytes(), &[0x01, 0x02, 0x03, 0x04]);

        let address = BlockAddress::new(5).unwrap();
        assert!(pn532
            .authenticate(&uid, address, KeySlot::A, &[0xFF; 6])
            .unwrap());
        let data = pn532.read_block(address).unwrap().unwrap();
        assert_eq!(&data[..5], b"12345");

        let bus = pn532.release();
        let auth = &bus.commands[4];
        assert_eq!(auth[..4], [command::IN_DATA_EXCHANGE, TARGET, 0x60, 0x05]);
        assert_eq!(auth[4..10], [0xFF; 6]);
        assert_eq!(auth[10..], [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_detect_timeout_aborts_command() {
        let mut pn532 = Pn532::open(ready_bus(), DEFAULT_I2C_ADDRESS).unwrap();
        assert_eq!(pn532.detect(Duration::from_millis(20)).unwrap(), None);
        assert_eq!(pn532.release().aborts, 1);
    }

    #[test]
    fn test_failed_auth_reselects_card() {
        let bus = ready_bus()
            .respond(command::IN_DATA_EXCHANGE, &[0x14])
            .respond(
                command::IN_LIST_PASSIVE_TARGET,
                &[0x01, 0x01, 0x00, 0x04, 0x08, 0x04, 0x01, 0x02, 0x03, 0x04],
            );
        let mut pn532 = Pn532::open(bus, DEFAULT_I2C_ADDRESS).unwrap();
        let uid = Uid::new(&[0x01, 0x02, 0x03, 0x04]).unwrap();

        let accepted = pn532
            .authenticate(&uid, BlockAddress::new(5).unwrap(), KeySlot::B, &[0x00; 6])
            .unwrap();
        assert!(!accepted);
        let last = pn532.release().commands.pop().unwrap();
        assert_eq!(last[0], command::IN_LIST_PASSIVE_TARGET);
    }

    #[test]
    fn test_wrong_address_is_bus_error() {
        let result = Pn532::open(ready_bus(), 0x48);
        assert!(matches!(result, Err(Error::Bus(_))));
    }
}
