pub mod account;
pub mod erase;
pub mod info;
pub mod inspect;
pub mod issue;
pub mod poll;
pub mod read;

use std::time::Duration;

use kiosk_nfc::{CardReader, Uid};

use crate::config::{BoxedTransceiver, ReaderArgs};

/// Open the configured reader, reporting failures on stderr
pub(crate) fn open_reader(reader_args: &ReaderArgs) -> Option<CardReader<BoxedTransceiver>> {
    match reader_args.open_reader() {
        Ok(reader) => Some(reader),
        Err(err) => {
            eprintln!("Failed to open {:?} reader: {}", reader_args.transport, err);
            None
        }
    }
}

/// Wait for a card, reporting a timeout or reader error on stderr
pub(crate) fn wait_for_card(reader: &mut CardReader<BoxedTransceiver>, wait: Duration) -> Option<Uid> {
    eprintln!("Waiting for a card...");
    match reader.wait_for_card(wait) {
        Ok(Some(uid)) => Some(uid),
        Ok(None) => {
            eprintln!("No card presented within {} s", wait.as_secs());
            eprintln!("Please place a card on the reader");
            None
        }
        Err(err) => {
            eprintln!("Reader error: {}", err);
            None
        }
    }
}
