use std::time::Duration;

use serde_json::json;

use crate::backend::BackendClient;
use crate::config::ReaderArgs;
use crate::formatters::FormatMode;

use super::{open_reader, wait_for_card};

/// Wipe the credentials from a card, optionally deactivating it first
///
/// Sector trailers are never written, so a card protected with site keys
/// stays protected with them.
pub fn cmd_erase(
    reader_args: &ReaderArgs,
    backend: Option<&BackendClient>,
    deactivate: bool,
    wait: Duration,
    format_mode: FormatMode,
) {
    let backend = match (deactivate, backend) {
        (true, None) => {
            eprintln!("No backend configured, set KIOSK_API_URL or drop --deactivate");
            return;
        }
        (true, Some(backend)) => Some(backend),
        (false, _) => None,
    };

    let Some(mut reader) = open_reader(reader_args) else {
        return;
    };
    let Some(uid) = wait_for_card(&mut reader, wait) else {
        return;
    };

    let mut deactivated = None;
    if let Some(backend) = backend {
        let session = reader.read_session(&uid);
        match session.credentials() {
            Some((token, cvc)) => match backend.deactivate_card(token, cvc) {
                Ok(response) => deactivated = Some(response.status),
                Err(err) => {
                    eprintln!("Deactivation failed for card {}, card left as it was: {}", uid, err);
                    return;
                }
            },
            None => eprintln!("Card {} carries no credentials, nothing to deactivate", uid),
        }
    }

    let cleared = reader.clear_credentials(&uid);

    match format_mode {
        FormatMode::Json => println!(
            "{}",
            json!({"uid": uid.to_string(), "cleared": cleared, "deactivation_status": deactivated})
        ),
        FormatMode::Human => {
            if let Some(status) = deactivated {
                println!("Card {} deactivated (status {})", uid, status);
            }
            if cleared {
                println!("Card {} erased, it now reads as blank", uid);
            } else {
                println!("Failed to erase card {}", uid);
                println!("Keep the card still on the reader and try again");
            }
        }
    }
}
