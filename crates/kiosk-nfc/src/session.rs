//! Card session: the token and CVC read from a tapped card

use std::fmt;

use kiosk_common::{decode_text, Block, BlockAddress, Uid};
use tracing::{debug, info, warn};

use crate::keyring::KeyRing;
use crate::retry::RetryPolicy;
use crate::transceiver::{CardFamily, CardLayout, CredentialField, Transceiver};

/// Why a session came back without credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFault {
    /// No key in the ring opened the sector holding this block
    AuthenticationFailed(BlockAddress),
    /// The block (or first page) could not be read after authentication
    Unreadable(u8),
    /// The reader itself failed
    Transport(String),
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFault::AuthenticationFailed(block) => {
                write!(f, "no key accepted for block {}", block)
            }
            SessionFault::Unreadable(address) => write!(f, "address {} unreadable", address),
            SessionFault::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// Result of reading a tapped card
///
/// Either both credentials are present or neither is. A blank card gives
/// two empty strings, not `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSession {
    pub uid: Uid,
    pub token: Option<String>,
    pub cvc: Option<String>,
    pub fault: Option<SessionFault>,
}

impl CardSession {
    pub fn complete(uid: Uid, token: String, cvc: String) -> Self {
        Self {
            uid,
            token: Some(token),
            cvc: Some(cvc),
            fault: None,
        }
    }

    pub fn failed(uid: Uid, fault: SessionFault) -> Self {
        Self {
            uid,
            token: None,
            cvc: None,
            fault: Some(fault),
        }
    }

    /// Both values were read, possibly empty
    pub fn is_complete(&self) -> bool {
        self.token.is_some() && self.cvc.is_some()
    }

    /// Both values read and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.token.as_deref(), self.cvc.as_deref()) {
            (Some(token), Some(cvc)) if !token.is_empty() && !cvc.is_empty() => Some((token, cvc)),
            _ => None,
        }
    }

    /// Card read fine but holds no credentials
    pub fn is_blank(&self) -> bool {
        self.token.as_deref() == Some("") && self.cvc.as_deref() == Some("")
    }
}

/// Drives one read of the token and CVC from a detected card
///
/// Runs authenticate/read for the token and then for the CVC. The first
/// failure ends the session with both values absent.
pub struct SessionProtocol<'a, T: ?Sized> {
    transceiver: &'a mut T,
    keys: &'a mut KeyRing,
    layout: &'a CardLayout,
    retry: &'a RetryPolicy,
}

impl<'a, T: Transceiver + ?Sized> SessionProtocol<'a, T> {
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

    pub fn run(&mut self, uid: &Uid) -> CardSession {
        let family = CardFamily::from_uid(uid);
        debug!(uid = %uid, family = ?family, "Reading card session");

        let mut values = Vec::with_capacity(CredentialField::ALL.len());
        for field in CredentialField::ALL {
            match self.read_field(uid, family, field) {
                Ok(value) => values.push(value),
                Err(fault) => {
                    warn!(uid = %uid, field = field.name(), fault = %fault, "Card session failed");
                    return CardSession::failed(uid.clone(), fault);
                }
            }
        }

        let cvc = values.pop().unwrap_or_default();
        let token = values.pop().unwrap_or_default();
        info!(uid = %uid, blank = token.is_empty() && cvc.is_empty(), "Card session read");
        CardSession::complete(uid.clone(), token, cvc)
    }

    fn read_field(
        &mut self,
        uid: &Uid,
        family: CardFamily,
        field: CredentialField,
    ) -> Result<String, SessionFault> {
        let data = match family {
            CardFamily::Classic => self.read_classic(uid, field.block(self.layout))?,
            CardFamily::Ultralight => self.read_ultralight(field.page(self.layout))?,
        };
        Ok(decode_text(&data))
    }

    fn read_classic(&mut self, uid: &Uid, block: BlockAddress) -> Result<Block, SessionFault> {
        match self.keys.authenticate_block(&mut *self.transceiver, uid, block) {
            Ok(Some(_)) => {}
            Ok(None) => return Err(SessionFault::AuthenticationFailed(block)),
            Err(err) => return Err(SessionFault::Transport(err.to_string())),
        }

        let transceiver = &mut *self.transceiver;
        match self.retry.run("read block", || transceiver.read_block(block)) {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(SessionFault::Unreadable(block.value())),
            Err(err) => Err(SessionFault::Transport(err.to_string())),
        }
    }

    fn read_ultralight(&mut self, page: u8) -> Result<Block, SessionFault> {
        let transceiver = &mut *self.transceiver;
        match self.retry.run("read pages", || transceiver.read_pages(page)) {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(SessionFault::Unreadable(page)),
            Err(err) => Err(SessionFault::Transport(err.to_string())),
        }
    }
}
