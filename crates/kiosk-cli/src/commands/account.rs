use std::time::Duration;

use clap::ValueEnum;
use serde_json::json;

use crate::backend::{BackendClient, BackendError};
use crate::config::ReaderArgs;
use crate::formatters::FormatMode;

use super::{open_reader, wait_for_card};

/// Guest actions the kiosk performs with a tapped card
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CardAction {
    /// Show the guest's stay history
    History,
    /// Log an entry to the restaurant
    Restaurant,
    /// Log an entry to the gym
    Gym,
    /// Deactivate the card at check-out
    Deactivate,
}

impl CardAction {
    /// Send the action for a card's credentials; returns status and data
    pub fn perform(
        self,
        backend: &BackendClient,
        token: &str,
        cvc: &str,
    ) -> Result<(Option<i64>, serde_json::Value), BackendError> {
        let response = match self {
            CardAction::History => return Ok((None, backend.history(token, cvc)?)),
            CardAction::Restaurant => backend.enter_restaurant(token, cvc)?,
            CardAction::Gym => backend.enter_gym(token, cvc)?,
            CardAction::Deactivate => backend.deactivate_card(token, cvc)?,
        };
        Ok((
            Some(response.status),
            response.data.unwrap_or(serde_json::Value::Null),
        ))
    }
}

pub fn cmd_card_action(
    reader_args: &ReaderArgs,
    backend: Option<&BackendClient>,
    action: CardAction,
    wait: Duration,
    format_mode: FormatMode,
) {
    let Some(backend) = backend else {
        eprintln!("No backend configured, set KIOSK_API_URL or --api-url");
        return;
    };
    let Some(mut reader) = open_reader(reader_args) else {
        return;
    };
    let Some(uid) = wait_for_card(&mut reader, wait) else {
        return;
    };

    let session = reader.read_session(&uid);
    let Some((token, cvc)) = session.credentials() else {
        eprintln!("Card {} carries no credentials, register it first", uid);
        return;
    };

    match action.perform(backend, token, cvc) {
        Ok((status, data)) => match format_mode {
            FormatMode::Json => println!(
                "{}",
                json!({"uid": uid.to_string(), "action": format!("{:?}", action), "status": status, "data": data})
            ),
            FormatMode::Human => {
                println!("Card {}: {:?}", uid, action);
                if let Some(status) = status {
                    println!("  Status: {}", status);
                }
                if !data.is_null() {
                    println!("  {}", data);
                }
            }
        },
        Err(err) => eprintln!("{:?} failed for card {}: {}", action, uid, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actions_hit_their_endpoints() {
        let mut server = mockito::Server::new();
        let history = server
            .mock("POST", "/nfc-card/history")
            .with_body(r#"{"status": 1, "data": ["2026-10-01"]}"#)
            .create();
        let gym = server
            .mock("POST", "/gym/enter")
            .with_body(r#"{"status": 1}"#)
            .create();
        let backend = BackendClient::new(&server.url(), "k").unwrap();

        let (status, data) = CardAction::History.perform(&backend, "1", "2").unwrap();
        assert_eq!(status, None);
        assert_eq!(data, json!(["2026-10-01"]));

        let (status, data) = CardAction::Gym.perform(&backend, "1", "2").unwrap();
        assert_eq!(status, Some(1));
        assert!(data.is_null());

        history.assert();
        gym.assert();
    }
}
