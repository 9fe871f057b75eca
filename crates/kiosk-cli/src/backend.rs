//! Hotel backend API client
//!
//! Every call is a JSON `POST` carrying the card credentials, authenticated
//! with the `X-API-KEY` header. Responses carry a numeric `status` and an
//! optional `data` object.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Timeout applied to every backend request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

const API_KEY_HEADER: &str = "X-API-KEY";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Serialize, Debug)]
struct CardCredentials<'a> {
    card_number: &'a str,
    cvc_code: &'a str,
}

/// Guest details sent when a freshly written card is activated
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GuestRegistration {
    pub fullname: String,
    pub location: String,
    pub uuid: String,
    pub card_number: String,
    pub cvc_code: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct StatusResponse {
    pub status: i64,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl StatusResponse {
    /// Customer slug of a registered card
    pub fn slug(&self) -> Option<&str> {
        self.data.as_ref()?.get("slug")?.as_str()
    }
}

/// Result of activating a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Registered,
    Rejected,
    AlreadyExists,
    Unknown(i64),
}

impl From<i64> for Activation {
    fn from(status: i64) -> Self {
        match status {
            1 => Activation::Registered,
            0 => Activation::Rejected,
            2 => Activation::AlreadyExists,
            other => Activation::Unknown(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, BackendError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let mut base_url = base_url.trim_end_matches('/').to_string();
        base_url.push('/');

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Look a card up; status 1 is a registered guest, 2 an unknown card
    pub fn read_card(&self, token: &str, cvc: &str) -> Result<StatusResponse, BackendError> {
        self.post("nfc-card/read", &CardCredentials::new(token, cvc))
    }

    pub fn register_guest(&self, guest: &GuestRegistration) -> Result<Activation, BackendError> {
        let response: StatusResponse = self.post("nfc-card/activate", guest)?;
        Ok(Activation::from(response.status))
    }

    /// Stay history of the card's guest
    pub fn history(&self, token: &str, cvc: &str) -> Result<serde_json::Value, BackendError> {
        let response: StatusResponse =
            self.post("nfc-card/history", &CardCredentials::new(token, cvc))?;
        Ok(response.data.unwrap_or(serde_json::Value::Null))
    }

    pub fn enter_restaurant(&self, token: &str, cvc: &str) -> Result<StatusResponse, BackendError> {
        self.post("restaurant/enter", &CardCredentials::new(token, cvc))
    }

    pub fn enter_gym(&self, token: &str, cvc: &str) -> Result<StatusResponse, BackendError> {
        self.post("gym/enter", &CardCredentials::new(token, cvc))
    }

    pub fn deactivate_card(&self, token: &str, cvc: &str) -> Result<StatusResponse, BackendError> {
        self.post("nfc-card/deactivate", &CardCredentials::new(token, cvc))
    }

    fn post<B, R>(&self, path: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "POST");

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json()?)
    }
}

impl<'a> CardCredentials<'a> {
    fn new(card_number: &'a str, cvc_code: &'a str) -> Self {
        Self {
            card_number,
            cvc_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::ServerGuard) -> BackendClient {
        BackendClient::new(&server.url(), "test-key").unwrap()
    }

    #[test]
    fn test_read_registered_card() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/nfc-card/read")
            .match_header("x-api-key", "test-key")
            .match_body(Matcher::Json(json!({
                "card_number": "12345",
                "cvc_code": "678"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": 1, "data": {"slug": "room-204"}}"#)
            .create();

        let response = client(&server).read_card("12345", "678").unwrap();
        assert_eq!(response.status, 1);
        assert_eq!(response.slug(), Some("room-204"));
        mock.assert();
    }

    #[test]
    fn test_read_unknown_card_without_data() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/nfc-card/read")
            .with_status(200)
            .with_body(r#"{"status": 2}"#)
            .create();

        let response = client(&server).read_card("1", "2").unwrap();
        assert_eq!(response.status, 2);
        assert_eq!(response.slug(), None);
    }

    #[test]
    fn test_register_guest() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/nfc-card/activate")
            .match_body(Matcher::PartialJson(json!({
                "fullname": "Ana Petrovic",
                "location": "204",
                "uuid": "DEADBEEF"
            })))
            .with_status(200)
            .with_body(r#"{"status": 2}"#)
            .create();

        let guest = GuestRegistration {
            fullname: "Ana Petrovic".into(),
            location: "204".into(),
            uuid: "DEADBEEF".into(),
            card_number: "111".into(),
            cvc_code: "222".into(),
        };
        assert_eq!(
            client(&server).register_guest(&guest).unwrap(),
            Activation::AlreadyExists
        );
        mock.assert();
    }

    #[test]
    fn test_history_returns_data() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/nfc-card/history")
            .with_status(200)
            .with_body(r#"{"status": 1, "data": [{"place": "gym"}]}"#)
            .create();

        let history = client(&server).history("1", "2").unwrap();
        assert_eq!(history, json!([{"place": "gym"}]));
    }

    #[test]
    fn test_entry_endpoints() {
        let mut server = mockito::Server::new();
        let restaurant = server
            .mock("POST", "/restaurant/enter")
            .with_body(r#"{"status": 1}"#)
            .create();
        let gym = server
            .mock("POST", "/gym/enter")
            .with_body(r#"{"status": 0}"#)
            .create();
        let deactivate = server
            .mock("POST", "/nfc-card/deactivate")
            .with_body(r#"{"status": 1}"#)
            .create();

        let client = client(&server);
        assert_eq!(client.enter_restaurant("1", "2").unwrap().status, 1);
        assert_eq!(client.enter_gym("1", "2").unwrap().status, 0);
        assert_eq!(client.deactivate_card("1", "2").unwrap().status, 1);
        restaurant.assert();
        gym.assert();
        deactivate.assert();
    }

    #[test]
    fn test_http_error_status() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/nfc-card/read")
            .with_status(403)
            .with_body("forbidden")
            .create();

        match client(&server).read_card("1", "2") {
            Err(BackendError::Status { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn test_base_url_normalized() {
        let client = BackendClient::new("https://hotel.example/api", "k").unwrap();
        assert_eq!(client.base_url(), "https://hotel.example/api/");
    }
}
