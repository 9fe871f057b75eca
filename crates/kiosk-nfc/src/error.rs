//! Error types for reader operations
//!
//! Every variant is a transport-level failure: the bus, the reader chip or
//! the PC/SC stack did not do what was asked. Wrong keys, blank cards and
//! unreadable blocks are not errors and never show up here.

use std::time::Duration;

use thiserror::Error;

/// Transport failure talking to the reader
#[derive(Error, Debug)]
pub enum Error {
    /// The I2C transaction itself failed
    #[error("I2C bus error: {0}")]
    Bus(String),

    /// The reader chip did not signal ready in time
    #[error("reader chip not responding after {0:?}")]
    NotResponding(Duration),

    /// The reader answered with a frame we could not make sense of
    #[error("malformed reader frame: {0}")]
    Frame(&'static str),

    /// The reader refused a command
    #[error("reader rejected command 0x{0:02X}")]
    Nack(u8),

    /// PC/SC stack error
    #[error("PC/SC error: {0}")]
    Pcsc(#[from] pcsc::Error),

    /// No matching reader is attached
    #[error("no card reader found{0}")]
    ReaderNotFound(String),
}

/// Result type for reader operations
pub type Result<T> = std::result::Result<T, Error>;
