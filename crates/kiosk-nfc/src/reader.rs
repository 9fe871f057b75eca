//! Card reader: a transceiver plus the keys, layout and counters used with it

use std::sync::Arc;
use std::time::{Duration, Instant};

use kiosk_common::{Block, BlockAddress, Uid};
use tracing::{error, info};

use crate::error::Result;
use crate::keyring::KeyRing;
use crate::retry::RetryPolicy;
use crate::session::{CardSession, SessionFault, SessionProtocol};
use crate::stats::{Counter, ReaderStats, StatsSnapshot};
use crate::transceiver::{CardLayout, Transceiver};
use crate::write::CredentialWriter;

/// Everything needed to read and write guest cards on one reader
pub struct CardReader<T> {
    transceiver: T,
    keys: KeyRing,
    layout: CardLayout,
    retry: RetryPolicy,
    stats: Arc<ReaderStats>,
}

impl<T: Transceiver> CardReader<T> {
    /// Reader with the standard key dictionary and the hotel card layout
    pub fn new(transceiver: T) -> Self {
        Self {
            transceiver,
            keys: KeyRing::standard(),
            layout: CardLayout::HOTEL,
            retry: RetryPolicy::default(),
            stats: Arc::new(ReaderStats::default()),
        }
    }

    pub fn with_keys(mut self, keys: KeyRing) -> Self {
        self.keys = keys.with_retry(self.retry);
        self
    }

    pub fn with_layout(mut self, layout: CardLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Retry policy for every reader operation, including authentication
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self.keys.set_retry(retry);
        self
    }

    pub fn layout(&self) -> &CardLayout {
        &self.layout
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn transceiver(&self) -> &T {
        &self.transceiver
    }

    pub fn transceiver_mut(&mut self) -> &mut T {
        &mut self.transceiver
    }

    pub fn into_transceiver(self) -> T {
        self.transceiver
    }

    /// Shared handle to the counters
    pub fn stats(&self) -> Arc<ReaderStats> {
        Arc::clone(&self.stats)
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Look for a card, once, without retrying
    pub fn detect(&mut self, timeout: Duration) -> Result<Option<Uid>> {
        self.transceiver.detect(timeout).map_err(|err| {
            self.stats.record(Counter::Error);
            err
        })
    }

    /// Poll until a card shows up or `wait` has passed
    ///
    /// A `wait` too long to represent as a deadline waits forever.
    pub fn wait_for_card(&mut self, wait: Duration) -> Result<Option<Uid>> {
        let deadline = Instant::now().checked_add(wait);
        loop {
            if let Some(uid) = self.detect(self.retry.attempt_timeout)? {
                return Ok(Some(uid));
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(None);
            }
        }
    }

    /// Read the token and CVC from the card with `uid`
    pub fn read_session(&mut self, uid: &Uid) -> CardSession {
        let session =
            SessionProtocol::new(&mut self.transceiver, &mut self.keys, &self.layout, &self.retry)
                .run(uid);

        match &session.fault {
            None => self.stats.record(Counter::Read),
            Some(SessionFault::AuthenticationFailed(_)) => {
                self.stats.record(Counter::AuthenticationFailure)
            }
            Some(SessionFault::Unreadable(_)) | Some(SessionFault::Transport(_)) => {
                self.stats.record(Counter::Error)
            }
        }
        session
    }

    /// Write both credentials and verify them by reading back
    pub fn write_credentials(&mut self, uid: &Uid, token: &str, cvc: &str) -> bool {
        let written =
            CredentialWriter::new(&mut self.transceiver, &mut self.keys, &self.layout, &self.retry)
                .write_credentials(uid, token, cvc);

        self.stats.record(if written { Counter::Write } else { Counter::Error });
        written
    }

    /// Zero the token and CVC fields and verify the card now reads blank
    ///
    /// Only the credential blocks are touched; keys and access bits stay.
    pub fn clear_credentials(&mut self, uid: &Uid) -> bool {
        let cleared =
            CredentialWriter::new(&mut self.transceiver, &mut self.keys, &self.layout, &self.retry)
                .clear_credentials(uid);

        self.stats.record(if cleared { Counter::Write } else { Counter::Error });
        cleared
    }

    /// Read the trailer of `sector` (key A reads back as zeros)
    pub fn read_trailer(&mut self, uid: &Uid, sector: u8) -> Result<Option<Block>> {
        let Some(trailer) = BlockAddress::new(sector.saturating_mul(4).saturating_add(3)) else {
            return Ok(None);
        };
        if self.keys.authenticate_block(&mut self.transceiver, uid, trailer)?.is_none() {
            self.stats.record(Counter::AuthenticationFailure);
            return Ok(None);
        }
        let transceiver = &mut self.transceiver;
        self.retry.run("read trailer", || transceiver.read_block(trailer))
    }

    /// Drop per-card state after the card left or a different one arrived
    pub fn forget_card(&mut self) {
        self.keys.invalidate();
    }

    /// Reset the reader chip after repeated transport errors
    pub fn reinitialize(&mut self) -> Result<()> {
        self.keys.invalidate();
        match self.transceiver.reinitialize() {
            Ok(()) => {
                info!("Reader reinitialized");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Reader reinitialization failed");
                self.stats.record(Counter::ConnectionFailure);
                Err(err)
            }
        }
    }
}
