//! Where a tapped card sends the guest

use std::fmt;

use kiosk_nfc::CardSession;
use tracing::{info, warn};

use crate::backend::{BackendClient, BackendError, StatusResponse};

const STATUS_REGISTERED: i64 = 1;
const STATUS_UNREGISTERED: i64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Blank, unreadable or unknown card: offer registration
    Register,
    /// Card belongs to a checked-in guest
    Customer { slug: Option<String> },
    /// Backend answered with a status the kiosk does not handle
    Invalid { status: i64 },
    /// Backend could not be reached
    Unavailable(String),
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Register => write!(f, "register"),
            Route::Customer { slug: Some(slug) } => write!(f, "customer ({})", slug),
            Route::Customer { slug: None } => write!(f, "customer"),
            Route::Invalid { status } => write!(f, "invalid card (status {})", status),
            Route::Unavailable(reason) => write!(f, "backend unavailable: {}", reason),
        }
    }
}

/// Card lookup against the backend
pub trait CardLookup {
    fn read_card(&self, token: &str, cvc: &str) -> Result<StatusResponse, BackendError>;
}

impl CardLookup for BackendClient {
    fn read_card(&self, token: &str, cvc: &str) -> Result<StatusResponse, BackendError> {
        BackendClient::read_card(self, token, cvc)
    }
}

/// Decide the next screen for a session
pub fn route_session<L: CardLookup + ?Sized>(session: &CardSession, lookup: &L) -> Route {
    let Some((token, cvc)) = session.credentials() else {
        info!(uid = %session.uid, "No credentials on card, offering registration");
        return Route::Register;
    };

    match lookup.read_card(token, cvc) {
        Ok(response) => match response.status {
            STATUS_REGISTERED => Route::Customer {
                slug: response.slug().map(str::to_string),
            },
            STATUS_UNREGISTERED => Route::Register,
            status => {
                warn!(uid = %session.uid, status, "Unexpected card status");
                Route::Invalid { status }
            }
        },
        Err(err) => {
            warn!(uid = %session.uid, "Card lookup failed: {}", err);
            Route::Unavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use kiosk_nfc::{SessionFault, Uid};
    use serde_json::json;

    struct StubLookup {
        reply: Option<StatusResponse>,
        calls: Cell<usize>,
    }

    impl StubLookup {
        fn answering(status: i64, data: Option<serde_json::Value>) -> Self {
            Self {
                reply: Some(StatusResponse { status, data }),
                calls: Cell::new(0),
            }
        }

        fn offline() -> Self {
            Self {
                reply: None,
                calls: Cell::new(0),
            }
        }
    }

    impl CardLookup for StubLookup {
        fn read_card(&self, _token: &str, _cvc: &str) -> Result<StatusResponse, BackendError> {
            self.calls.set(self.calls.get() + 1);
            self.reply.clone().ok_or(BackendError::Status {
                status: 503,
                body: "down".into(),
            })
        }
    }

    fn uid() -> Uid {
        Uid::new(&[0x11, 0x22, 0x33, 0x44]).unwrap()
    }

    fn tapped() -> CardSession {
        CardSession::complete(uid(), "100".into(), "200".into())
    }

    #[test]
    fn test_registered_guest() {
        let lookup = StubLookup::answering(1, Some(json!({"slug": "ana-204"})));
        assert_eq!(
            route_session(&tapped(), &lookup),
            Route::Customer {
                slug: Some("ana-204".into())
            }
        );
    }

    #[test]
    fn test_unregistered_card() {
        let lookup = StubLookup::answering(2, None);
        assert_eq!(route_session(&tapped(), &lookup), Route::Register);
    }

    #[test]
    fn test_unexpected_status() {
        let lookup = StubLookup::answering(7, None);
        assert_eq!(
            route_session(&tapped(), &lookup),
            Route::Invalid { status: 7 }
        );
    }

    #[test]
    fn test_backend_down() {
        let route = route_session(&tapped(), &StubLookup::offline());
        assert!(matches!(route, Route::Unavailable(_)));
    }

    #[test]
    fn test_blank_or_failed_card_skips_lookup() {
        let lookup = StubLookup::answering(1, None);
        let blank = CardSession::complete(uid(), String::new(), String::new());
        let failed = CardSession::failed(uid(), SessionFault::Unreadable(6));

        assert_eq!(route_session(&blank, &lookup), Route::Register);
        assert_eq!(route_session(&failed, &lookup), Route::Register);
        assert_eq!(lookup.calls.get(), 0);
    }
}
