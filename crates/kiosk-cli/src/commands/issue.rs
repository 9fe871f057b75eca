use std::time::Duration;

use kiosk_common::BLOCK_SIZE;
use rand::Rng;
use serde_json::json;

use crate::backend::{Activation, BackendClient, GuestRegistration};
use crate::config::ReaderArgs;
use crate::formatters::FormatMode;

use super::{open_reader, wait_for_card};

/// Largest generated token or CVC
const MAX_CREDENTIAL: u32 = 1_000_000_000;

/// What to put on the card and who it belongs to
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub token: Option<String>,
    pub cvc: Option<String>,
    pub name: Option<String>,
    pub room: Option<String>,
    pub register: bool,
}

/// Random decimal credential in `1..=1_000_000_000`
pub fn generate_credential<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.gen_range(1..=MAX_CREDENTIAL).to_string()
}

/// Accept a token or CVC only if it fits one block unchanged
///
/// A longer value would be truncated on the card and fail verification
/// after the old credentials were already overwritten.
pub fn parse_credential(text: &str) -> Result<String, String> {
    if text.is_empty() {
        return Err("value must not be empty".to_string());
    }
    if text.len() > BLOCK_SIZE {
        return Err(format!(
            "value is {} bytes, a card block holds at most {}",
            text.len(),
            BLOCK_SIZE
        ));
    }
    Ok(text.to_string())
}

/// Write fresh credentials to a card and activate it for a guest
pub fn cmd_issue(
    reader_args: &ReaderArgs,
    backend: Option<&BackendClient>,
    request: IssueRequest,
    wait: Duration,
    format_mode: FormatMode,
) {
    let mut rng = rand::thread_rng();
    let token = request
        .token
        .clone()
        .unwrap_or_else(|| generate_credential(&mut rng));
    let cvc = request
        .cvc
        .clone()
        .unwrap_or_else(|| generate_credential(&mut rng));

    let Some(mut reader) = open_reader(reader_args) else {
        return;
    };
    let Some(uid) = wait_for_card(&mut reader, wait) else {
        return;
    };

    if !reader.write_credentials(&uid, &token, &cvc) {
        eprintln!("Failed to write card {}", uid);
        eprintln!("Keep the card still on the reader and try again");
        return;
    }

    let activation = match registration(&request, backend) {
        Some((backend, fullname, location)) => {
            let guest = GuestRegistration {
                fullname,
                location,
                uuid: uid.to_string(),
                card_number: token.clone(),
                cvc_code: cvc.clone(),
            };
            match backend.register_guest(&guest) {
                Ok(activation) => Some(activation),
                Err(err) => {
                    eprintln!("Card written but activation failed: {}", err);
                    None
                }
            }
        }
        None => {
            if request.register && backend.is_some() {
                eprintln!("Skipping activation: --name and --room are both needed");
            }
            None
        }
    };

    match format_mode {
        FormatMode::Json => println!(
            "{}",
            json!({
                "uid": uid.to_string(),
                "token": token,
                "cvc": cvc,
                "activation": activation.map(|a| format!("{:?}", a)),
            })
        ),
        FormatMode::Human => {
            println!("Card {} written and verified", uid);
            println!("  Token: {}", token);
            println!("  CVC:   {}", cvc);
            match activation {
                Some(Activation::Registered) => println!("  Guest registered"),
                Some(Activation::AlreadyExists) => println!("  Card was already registered"),
                Some(Activation::Rejected) => println!("  Backend rejected the guest details"),
                Some(Activation::Unknown(status)) => {
                    println!("  Unexpected activation status {}", status)
                }
                None => println!("  Not registered with the backend"),
            }
        }
    }
}

/// Backend and guest details, when registration was asked for and is possible
fn registration<'a>(
    request: &IssueRequest,
    backend: Option<&'a BackendClient>,
) -> Option<(&'a BackendClient, String, String)> {
    if !request.register {
        return None;
    }
    let backend = backend?;
    Some((backend, request.name.clone()?, request.room.clone()?))
}
