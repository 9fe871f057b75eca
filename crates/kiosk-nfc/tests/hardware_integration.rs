//! Hardware-dependent integration tests
//!
//! These tests require a PC/SC contactless reader (ACR122U or compatible)
//! and, for most of them, a MIFARE Classic 1K card on it. They are ignored
//! by default and must be explicitly run with:
//!
//!     cargo test --package kiosk-nfc --test hardware_integration -- --ignored
//!
//! The write test overwrites blocks 5 and 6 of the card on the reader.

use std::time::Duration;

use kiosk_nfc::apdu::commands;
use kiosk_nfc::pcsc_reader::{list_readers, PcscTransceiver};
use kiosk_nfc::{CardReader, Transceiver};

const WAIT: Duration = Duration::from_secs(5);

/// **Requires**: Card reader connected (card not required)
#[test]
#[ignore = "requires hardware: card reader"]
fn test_list_readers() {
    let readers = list_readers().expect("PC/SC context should be available");
    println!("Readers: {:?}", readers);
    assert!(!readers.is_empty(), "No card reader found. Is a reader connected?");
}

/// **Requires**: Card reader with a card on it
#[test]
#[ignore = "requires hardware: card on reader"]
fn test_detect_card() {
    let mut transceiver = PcscTransceiver::open(None).expect("Failed to open reader");
    let uid = transceiver
        .detect(WAIT)
        .expect("Reader error")
        .expect("No card detected");

    println!("Card UID on {}: {}", transceiver.reader_name(), uid);
    assert!(uid.len() == 4 || uid.len() == 7);
}

/// **Requires**: Factory-fresh or kiosk-issued MIFARE Classic card
#[test]
#[ignore = "requires hardware: MIFARE Classic card"]
fn test_read_session() {
    let mut reader = CardReader::new(PcscTransceiver::open(None).expect("Failed to open reader"));
    let uid = reader
        .wait_for_card(WAIT)
        .expect("Reader error")
        .expect("No card detected");

    let session = reader.read_session(&uid);
    println!("Session: {:?}", session);
    assert!(session.is_complete(), "Session failed: {:?}", session.fault);
}

/// **Requires**: Writable MIFARE Classic card (blocks 5 and 6 are overwritten)
#[test]
#[ignore = "requires hardware: writable MIFARE Classic card"]
fn test_write_then_read_back() {
    let mut reader = CardReader::new(PcscTransceiver::open(None).expect("Failed to open reader"));
    let uid = reader
        .wait_for_card(WAIT)
        .expect("Reader error")
        .expect("No card detected");

    assert!(reader.write_credentials(&uid, "hw-test-token", "4242"));

    reader.forget_card();
    let session = reader.read_session(&uid);
    assert_eq!(session.credentials(), Some(("hw-test-token", "4242")));
}

/// The raw GET UID pseudo-APDU answers 90 00
#[test]
#[ignore = "requires hardware: card on reader"]
fn test_get_uid_apdu() {
    let context = pcsc::Context::establish(pcsc::Scope::User).expect("PC/SC context");
    let mut readers_buf = [0; 2048];
    let reader = context
        .list_readers(&mut readers_buf)
        .expect("list readers")
        .next()
        .expect("No reader");
    let card = context
        .connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)
        .expect("No card on reader");

    let response = commands::get_uid().send(&card).expect("transmit");
    println!("UID: {} ({})", hex::encode_upper(&response.data), response.status_string());
    assert!(response.is_success());
}
