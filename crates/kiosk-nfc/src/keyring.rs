//! Key dictionary sweep with a per-sector cache
//!
//! MIFARE Classic sectors are protected by two keys. The ring tries every
//! candidate until one authenticates and remembers which one worked, so the
//! second block of the same sector costs a single attempt.

use std::collections::HashMap;

use kiosk_common::{BlockAddress, Uid};
use kiosk_keys::{keys, known_keys, KeyCandidate, KeySlot, MifareKey};
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::retry::RetryPolicy;
use crate::transceiver::Transceiver;

/// Sector number to the key that last opened it
#[derive(Debug, Default, Clone)]
pub struct SectorKeyCache {
    entries: HashMap<u8, KeyCandidate>,
}

impl SectorKeyCache {
    pub fn get(&self, sector: u8) -> Option<KeyCandidate> {
        self.entries.get(&sector).copied()
    }

    pub fn insert(&mut self, sector: u8, candidate: KeyCandidate) {
        self.entries.insert(sector, candidate);
    }

    pub fn remove(&mut self, sector: u8) {
        self.entries.remove(&sector);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered list of key candidates and the sector cache
#[derive(Debug, Clone)]
pub struct KeyRing {
    candidates: Vec<KeyCandidate>,
    cache: SectorKeyCache,
    retry: RetryPolicy,
}

impl KeyRing {
    /// Build a ring from keys in priority order
    ///
    /// Each key is tried as key A, then as key B, before moving on to the
    /// next key. Duplicate keys are dropped.
    pub fn new<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = MifareKey>,
    {
        let mut seen: Vec<MifareKey> = Vec::new();
        let mut candidates = Vec::new();

        for key in keys {
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            candidates.extend(KeySlot::ALL.iter().map(|&slot| KeyCandidate::new(key, slot)));
        }

        Self {
            candidates,
            cache: SectorKeyCache::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// The whole embedded dictionary, standard keys first
    pub fn standard() -> Self {
        Self::with_vendor_keys(&[])
    }

    /// Standard keys, then site specific keys, then the rest of the dictionary
    pub fn with_vendor_keys(vendor_keys: &[MifareKey]) -> Self {
        let dictionary = known_keys().into_iter().map(|k| k.key);
        Self::new(
            keys::STANDARD
                .iter()
                .chain(vendor_keys.iter())
                .copied()
                .chain(dictionary),
        )
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn set_retry(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn candidates(&self) -> &[KeyCandidate] {
        &self.candidates
    }

    pub fn cache(&self) -> &SectorKeyCache {
        &self.cache
    }

    /// Forget every cached key; call when the card changes
    pub fn invalidate(&mut self) {
        if !self.cache.is_empty() {
            debug!(sectors = self.cache.len(), "Clearing sector key cache");
        }
        self.cache.clear();
    }

    /// Authenticate the sector holding `block`
    ///
    /// Tries the cached key first, then sweeps every candidate against the
    /// block itself and finally against the sector trailer. Returns the
    /// candidate that worked, or `None` once all of them were rejected.
    pub fn authenticate_block<T>(
        &mut self,
        transceiver: &mut T,
        uid: &Uid,
        block: BlockAddress,
    ) -> Result<Option<KeyCandidate>>
    where
        T: Transceiver + ?Sized,
    {
        let sector = block.sector();

        if let Some(cached) = self.cache.get(sector) {
            if attempt(&self.retry, transceiver, uid, block, cached)? {
                trace!(sector, key = %cached, "Cached key accepted");
                return Ok(Some(cached));
            }
            debug!(sector, key = %cached, "Cached key rejected, evicting");
            self.cache.remove(sector);
        }

        let mut targets = vec![block];
        if !block.is_sector_trailer() {
            targets.push(block.sector_trailer());
        }

        for target in targets {
            for &candidate in &self.candidates {
                if attempt(&self.retry, transceiver, uid, target, candidate)? {
                    if target == block {
                        debug!(block = %block, key = %candidate, "Authenticated");
                    } else {
                        info!(block = %block, trailer = %target, key = %candidate,
                            "Authenticated through sector trailer");
                    }
                    self.cache.insert(sector, candidate);
                    return Ok(Some(candidate));
                }
            }
        }

        debug!(block = %block, tried = self.candidates.len(), "No key accepted");
        Ok(None)
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::standard()
    }
}

fn attempt<T>(
    retry: &RetryPolicy,
    transceiver: &mut T,
    uid: &Uid,
    block: BlockAddress,
    candidate: KeyCandidate,
) -> Result<bool>
where
    T: Transceiver + ?Sized,
{
    retry.run("authenticate", || {
        transceiver.authenticate(uid, block, candidate.slot, &candidate.key)
    })
}
