//! Writing the token and CVC to a card and checking they stuck

use kiosk_common::{decode_text, encode_text, Block, Uid, BLOCK_SIZE, PAGE_SIZE};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::keyring::KeyRing;
use crate::retry::RetryPolicy;
use crate::transceiver::{CardFamily, CardLayout, CredentialField, Transceiver};

/// Writes both credentials and re-reads them
///
/// A write only counts once the value decoded from the card equals the
/// value that was written.
pub struct CredentialWriter<'a, T: ?Sized> {
    transceiver: &'a mut T,
    keys: &'a mut KeyRing,
    layout: &'a CardLayout,
    retry: &'a RetryPolicy,
}

impl<'a, T: Transceiver + ?Sized> CredentialWriter<'a, T> {
    pub fn new(
        transceiver: &'a mut T,
        keys: &'a mut KeyRing,
        layout: &'a CardLayout,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            transceiver,
            keys,
            layout,
            retry,
        }
    }

    /// Write the token, then the CVC; `true` only if both verify
    pub fn write_credentials(&mut self, uid: &Uid, token: &str, cvc: &str) -> bool {
        let family = CardFamily::from_uid(uid);

        for (field, value) in CredentialField::ALL.into_iter().zip([token, cvc]) {
            if value.len() > BLOCK_SIZE {
                warn!(field = field.name(), len = value.len(), "Value longer than a block, it will be truncated");
            }
            match self.write_field(uid, family, field, value) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(err) => {
                    warn!(uid = %uid, field = field.name(), error = %err, "Write failed");
                    return false;
                }
            }
        }

        info!(uid = %uid, "Credentials written and verified");
        true
    }

    /// Write empty values to both fields; `true` only if both read back empty
    pub fn clear_credentials(&mut self, uid: &Uid) -> bool {
        let cleared = self.write_credentials(uid, "", "");
        if cleared {
            info!(uid = %uid, "Credentials cleared");
        }
        cleared
    }

    fn write_field(
        &mut self,
        uid: &Uid,
        family: CardFamily,
        field: CredentialField,
        value: &str,
    ) -> Result<bool> {
        let data = encode_text(value);
        let stored = match family {
            CardFamily::Classic => self.write_classic(uid, field, &data)?,
            CardFamily::Ultralight => self.write_ultralight(field, &data)?,
        };

        let Some(stored) = stored else {
            warn!(uid = %uid, field = field.name(), "Written value could not be read back");
            return Ok(false);
        };

        let readback = decode_text(&stored);
        if readback != value {
            warn!(uid = %uid, field = field.name(), expected = value, found = %readback,
                "Write verification failed");
            return Ok(false);
        }
        debug!(uid = %uid, field = field.name(), "Field verified");
        Ok(true)
    }

    fn write_classic(
        &mut self,
        uid: &Uid,
        field: CredentialField,
        data: &Block,
    ) -> Result<Option<Block>> {
        let block = field.block(self.layout);
        if self.keys.authenticate_block(&mut *self.transceiver, uid, block)?.is_none() {
            warn!(uid = %uid, block = %block, "No key accepted, cannot write");
            return Ok(None);
        }

        let transceiver = &mut *self.transceiver;
        if !self.retry.run("write block", || transceiver.write_block(block, data))? {
            warn!(uid = %uid, block = %block, "Card refused write");
            return Ok(None);
        }
        self.retry.run("read block", || transceiver.read_block(block))
    }

    fn write_ultralight(&mut self, field: CredentialField, data: &Block) -> Result<Option<Block>> {
        let first_page = field.page(self.layout);
        let transceiver = &mut *self.transceiver;

        for (offset, chunk) in data.chunks_exact(PAGE_SIZE).enumerate() {
            let page = first_page + offset as u8;
            let mut buf = [0u8; PAGE_SIZE];
            buf.copy_from_slice(chunk);
            if !self.retry.run("write page", || transceiver.write_page(page, &buf))? {
                warn!(page, "Card refused page write");
                return Ok(None);
            }
        }
        self.retry.run("read pages", || transceiver.read_pages(first_page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedCard, SimulatedTransceiver};
    use std::time::Duration;

    fn uid() -> Uid {
        Uid::new(&[0x01, 0x02, 0x03, 0x04]).unwrap()
    }

    fn write(transceiver: &mut SimulatedTransceiver, uid: &Uid, token: &str, cvc: &str) -> bool {
        let mut keys = KeyRing::standard();
        let layout = CardLayout::HOTEL;
        let retry = RetryPolicy::new(2, Duration::from_millis(10), Duration::ZERO);
        CredentialWriter::new(transceiver, &mut keys, &layout, &retry).write_credentials(uid, token, cvc)
    }

    #[test]
    fn test_write_then_card_holds_values() {
        let mut transceiver = SimulatedTransceiver::with_card(SimulatedCard::classic(uid()));
        assert!(write(&mut transceiver, &uid(), "abc", "123"));

        let card = transceiver.card().unwrap();
        assert_eq!(decode_text(&card.block(5).unwrap()), "abc");
        assert_eq!(decode_text(&card.block(6).unwrap()), "123");
    }

    #[test]
    fn test_garbled_write_fails_verification() {
        let card = SimulatedCard::classic(uid()).with_garbled_writes();
        let mut transceiver = SimulatedTransceiver::with_card(card);
        assert!(!write(&mut transceiver, &uid(), "abc", "123"));
        // Stops after the token fails, the CVC is never attempted
        assert_eq!(transceiver.hardware_writes(), 1);
    }

    #[test]
    fn test_overlong_value_fails_verification() {
        let mut transceiver = SimulatedTransceiver::with_card(SimulatedCard::classic(uid()));
        assert!(!write(&mut transceiver, &uid(), "this token is far too long", "123"));
    }

    #[test]
    fn test_clear_leaves_blank_blocks() {
        let card = SimulatedCard::classic(uid())
            .with_text(5, "100200300")
            .with_text(6, "4242");
        let mut transceiver = SimulatedTransceiver::with_card(card);

        let mut keys = KeyRing::standard();
        let retry = RetryPolicy::new(2, Duration::from_millis(10), Duration::ZERO);
        assert!(CredentialWriter::new(&mut transceiver, &mut keys, &CardLayout::HOTEL, &retry)
            .clear_credentials(&uid()));

        let card = transceiver.card().unwrap();
        assert_eq!(card.block(5), Some([0u8; BLOCK_SIZE]));
        assert_eq!(card.block(6), Some([0u8; BLOCK_SIZE]));
        assert_eq!(card.block(7), Some(kiosk_common::trailer::FACTORY_TRAILER));
    }

    #[test]
    fn test_ultralight_write_spans_four_pages() {
        let uid = Uid::new(&[0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]).unwrap();
        let mut transceiver = SimulatedTransceiver::with_card(SimulatedCard::ultralight(uid.clone()));
        assert!(write(&mut transceiver, &uid, "TOKEN-UL", "321"));
        assert_eq!(transceiver.hardware_writes(), 8);

        let card = transceiver.card().unwrap();
        assert_eq!(decode_text(&card.pages(4).unwrap()), "TOKEN-UL");
        assert_eq!(decode_text(&card.pages(8).unwrap()), "321");
    }
}
