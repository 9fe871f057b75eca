//! Kiosk NFC - Guest card reading and writing for the hotel kiosk
//!
//! This crate detects contactless cards on a PN532 (I2C) or PC/SC reader,
//! authenticates MIFARE Classic sectors against a key dictionary, reads and
//! writes the session token and CVC, and runs the background polling loop
//! that turns card taps into [`CardSession`]s.

pub mod apdu;
pub mod error;
pub mod keyring;
pub mod pcsc_reader;
pub mod pn532;
pub mod polling;
pub mod reader;
pub mod retry;
pub mod session;
pub mod sim;
pub mod stats;
pub mod transceiver;
pub mod write;

pub use error::{Error, Result};
pub use keyring::{KeyRing, SectorKeyCache};
pub use pcsc_reader::PcscTransceiver;
pub use pn532::Pn532;
pub use polling::{PollingConfig, PollingLoop, SessionSink};
pub use reader::CardReader;
pub use retry::RetryPolicy;
pub use session::{CardSession, SessionFault};
pub use stats::{ReaderStats, StatsSnapshot};
pub use transceiver::{CardFamily, CardLayout, Transceiver};

/// Re-export commonly used types
pub use kiosk_common::{BlockAddress, Uid};
pub use kiosk_keys::{KeyCandidate, KeySlot, MifareKey};
